//! Client-side half of the protocol: clock sampling, offset estimation,
//! and deadline-driven playback execution.

pub mod executor;
pub mod sampler;
pub mod session;

pub use executor::{AudioBackend, PlaybackExecutor, PlaybackState};
pub use sampler::ClockSampler;
pub use session::ClientSession;
