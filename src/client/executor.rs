//! Playback executor — turns scheduled actions into local audio deadlines.
//!
//! DESIGN
//! ======
//! Every action arrives with an absolute coordinator-clock deadline. The
//! executor translates it through the current offset estimate into a local
//! timer and fires the audio backend when it lands. Only the newest
//! coordinator instruction is authoritative: a pending deadline is
//! cancelled and replaced, never queued behind. A deadline that has
//! already passed starts immediately and seeks forward by the missed
//! interval, so a late joiner lands in step with the room.
//!
//! The backend stands in for the platform audio stack (a Web Audio graph,
//! cpal stream, etc.). Asset loading happens out of band; when a PLAY
//! references audio the backend has not loaded yet, the executor requests
//! a re-announcement, parks the command, and runs it once the app reports
//! the asset ready.
//!
//! STATE MACHINE
//! =============
//! `Stopped → Scheduled → Playing → Stopped`, with `Paused` reachable from
//! `Playing`. Spatial configuration does not touch playback state — it
//! only ramps the output gain.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;
use uuid::Uuid;

use crate::clock::{now_ms, wait_ms};
use crate::config::Config;
use crate::message::{AudioSource, ClientMessage, ScheduledAction};

// =============================================================================
// AUDIO BACKEND
// =============================================================================

/// The local audio stack the executor drives. One per client; owned
/// exclusively by that client's executor.
pub trait AudioBackend: Send + Sync + 'static {
    /// Whether the asset is decoded and ready to start.
    fn is_loaded(&self, audio_id: &str) -> bool;

    /// Track length in seconds, once loaded.
    fn duration_secs(&self, audio_id: &str) -> Option<f64>;

    /// Start playback of `audio_id` from `offset_secs` into the track,
    /// replacing any active source.
    fn start(&self, audio_id: &str, offset_secs: f64);

    /// Stop the active source, if any.
    fn stop(&self);

    /// Seconds played since the last `start`.
    fn elapsed_secs(&self) -> f64;

    /// Ramp the output gain to `gain` over `ramp_secs`.
    fn set_gain(&self, gain: f64, ramp_secs: f64);
}

// =============================================================================
// STATE
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Stopped,
    Scheduled,
    Playing,
    Paused,
}

/// The source currently playing (or about to). The generation ties
/// end-of-track callbacks to the source that was active when the listener
/// was attached, so a superseded source can't masquerade as a natural end.
#[derive(Debug, Clone)]
struct ActiveTrack {
    audio_id: String,
    start_offset_secs: f64,
    generation: u64,
}

/// A PLAY parked until its asset finishes loading.
#[derive(Debug, Clone)]
struct DeferredPlay {
    execute_at: f64,
    audio_id: String,
    track_time_seconds: f64,
    offset_ms: f64,
}

struct Inner<B> {
    backend: Arc<B>,
    outbound: mpsc::Sender<ClientMessage>,
    config: Config,
    client_id: Option<Uuid>,
    /// Room library in announcement order; drives auto-advance.
    tracks: Vec<AudioSource>,
    state: PlaybackState,
    active: Option<ActiveTrack>,
    resume_point_secs: f64,
    deferred: Option<DeferredPlay>,
    /// Bumped on every new instruction; a timer that fires with a stale
    /// generation applies nothing.
    generation: u64,
    pending: Option<JoinHandle<()>>,
}

// =============================================================================
// EXECUTOR
// =============================================================================

pub struct PlaybackExecutor<B: AudioBackend> {
    inner: Arc<Mutex<Inner<B>>>,
}

impl<B: AudioBackend> Clone for PlaybackExecutor<B> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<B: AudioBackend> PlaybackExecutor<B> {
    #[must_use]
    pub fn new(backend: Arc<B>, outbound: mpsc::Sender<ClientMessage>, config: Config) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                backend,
                outbound,
                config,
                client_id: None,
                tracks: Vec::new(),
                state: PlaybackState::Stopped,
                active: None,
                resume_point_secs: 0.0,
                deferred: None,
                generation: 0,
                pending: None,
            })),
        }
    }

    pub fn set_client_id(&self, client_id: Uuid) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.client_id = Some(client_id);
        }
    }

    pub fn set_tracks(&self, tracks: Vec<AudioSource>) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.tracks = tracks;
        }
    }

    /// Add or replace one library entry.
    pub fn add_track(&self, source: AudioSource) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.tracks.retain(|t| t.id != source.id);
            inner.tracks.push(source);
        }
    }

    #[must_use]
    pub fn state(&self) -> PlaybackState {
        self.inner.lock().map_or(PlaybackState::Stopped, |inner| inner.state)
    }

    /// Track position captured by the last executed pause.
    #[must_use]
    pub fn resume_point_secs(&self) -> f64 {
        self.inner.lock().map_or(0.0, |inner| inner.resume_point_secs)
    }

    /// Apply one scheduled action. `offset_ms` is the trusted clock offset;
    /// `None` means the estimate is not ready yet, and the executor falls
    /// back to offset 0 — the only place that startup fallback is allowed.
    pub fn handle_action(&self, execute_at: f64, action: ScheduledAction, offset_ms: Option<f64>) {
        let offset = offset_ms.unwrap_or(0.0);
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };

        match action {
            ScheduledAction::Play { track_time_seconds, audio_id } => {
                Self::handle_play(&self.inner, &mut inner, execute_at, audio_id, track_time_seconds, offset);
            }
            ScheduledAction::Pause => {
                Self::handle_pause(&self.inner, &mut inner, execute_at, offset);
            }
            ScheduledAction::SpatialConfig { gains, .. } => {
                let Some(client_id) = inner.client_id else {
                    return;
                };
                if let Some(assignment) = gains.get(&client_id) {
                    inner.backend.set_gain(assignment.gain, assignment.ramp_time);
                }
            }
            ScheduledAction::StopSpatialAudio => {
                // Safe to apply with spatial already off: ramping to full
                // gain again changes nothing.
                let (max_gain, ramp) = (inner.config.max_gain, inner.config.ramp_time_secs);
                inner.backend.set_gain(max_gain, ramp);
            }
        }
    }

    /// The app finished loading an asset; run a parked PLAY if it was
    /// waiting on this one.
    pub fn on_asset_loaded(&self, audio_id: &str) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        if inner.deferred.as_ref().is_none_or(|d| d.audio_id != audio_id) {
            return;
        }
        let Some(deferred) = inner.deferred.take() else {
            return;
        };
        info!(audio_id, "deferred play resuming after asset load");
        supersede(&mut inner);
        Self::schedule_start(
            &self.inner,
            &mut inner,
            deferred.execute_at,
            deferred.audio_id,
            deferred.track_time_seconds,
            deferred.offset_ms,
        );
    }

    /// Notification that the source started under `generation` has ended.
    /// Ends that are not within tolerance of the expected end time — or
    /// that report a superseded source — are not natural ends and do
    /// nothing. A natural end asks the coordinator to play the next track
    /// so the whole room advances together.
    pub fn on_track_ended(&self, generation: u64) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        let Some(active) = inner.active.clone() else {
            return;
        };
        if active.generation != generation {
            return;
        }
        let Some(duration) = inner.backend.duration_secs(&active.audio_id) else {
            return;
        };

        let expected = (duration - active.start_offset_secs).max(0.0);
        let elapsed = inner.backend.elapsed_secs();
        if (elapsed - expected).abs() > inner.config.end_tolerance_secs {
            return;
        }

        inner.state = PlaybackState::Stopped;
        inner.active = None;
        inner.resume_point_secs = 0.0;

        if let Some(next) = next_track(&inner.tracks, &active.audio_id) {
            info!(ended = %active.audio_id, next = %next, "track ended, requesting next");
            let _ = inner
                .outbound
                .try_send(ClientMessage::Play { track_time_seconds: 0.0, audio_id: next });
        }
    }

    /// Cancel any pending deadline. Called on channel closure or teardown;
    /// whatever is audible keeps playing, but no timer fires afterwards.
    pub fn cancel_pending(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            supersede(&mut inner);
        }
    }

    // -------------------------------------------------------------------------
    // internals
    // -------------------------------------------------------------------------

    fn handle_play(
        shared: &Arc<Mutex<Inner<B>>>,
        inner: &mut MutexGuard<'_, Inner<B>>,
        execute_at: f64,
        audio_id: String,
        track_time_seconds: f64,
        offset_ms: f64,
    ) {
        supersede(inner);

        if !inner.backend.is_loaded(&audio_id) {
            info!(%audio_id, "play references unloaded asset, deferring");
            let audio_name = inner
                .tracks
                .iter()
                .find(|t| t.id == audio_id)
                .map_or_else(|| audio_id.clone(), |t| t.title.clone());
            inner.deferred = Some(DeferredPlay {
                execute_at,
                audio_id: audio_id.clone(),
                track_time_seconds,
                offset_ms,
            });
            let _ = inner
                .outbound
                .try_send(ClientMessage::ReuploadAudio { audio_id, audio_name });
            return;
        }

        Self::schedule_start(shared, inner, execute_at, audio_id, track_time_seconds, offset_ms);
    }

    fn schedule_start(
        shared: &Arc<Mutex<Inner<B>>>,
        inner: &mut MutexGuard<'_, Inner<B>>,
        execute_at: f64,
        audio_id: String,
        track_time_seconds: f64,
        offset_ms: f64,
    ) {
        let local_now = now_ms();
        let wait = wait_ms(execute_at, offset_ms, local_now);
        // Seek forward by however much of the deadline we already missed.
        let late_secs = ((local_now + offset_ms) - execute_at).max(0.0) / 1000.0;
        let start_offset = track_time_seconds + late_secs;

        let generation = inner.generation;
        inner.state = PlaybackState::Scheduled;
        inner.deferred = None;

        let shared = Arc::clone(shared);
        inner.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs_f64(wait / 1000.0)).await;
            let Ok(mut inner) = shared.lock() else {
                return;
            };
            if inner.generation != generation {
                return;
            }
            inner.backend.stop();
            inner.backend.start(&audio_id, start_offset);
            inner.state = PlaybackState::Playing;
            inner.active = Some(ActiveTrack { audio_id, start_offset_secs: start_offset, generation });
            inner.pending = None;
        }));
    }

    fn handle_pause(
        shared: &Arc<Mutex<Inner<B>>>,
        inner: &mut MutexGuard<'_, Inner<B>>,
        execute_at: f64,
        offset_ms: f64,
    ) {
        let generation = supersede(inner);
        let wait = wait_ms(execute_at, offset_ms, now_ms());

        let shared = Arc::clone(shared);
        inner.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs_f64(wait / 1000.0)).await;
            let Ok(mut inner) = shared.lock() else {
                return;
            };
            if inner.generation != generation {
                return;
            }
            if let Some(active) = inner.active.take() {
                // Resume point is wherever the track actually was when the
                // deadline landed.
                let position = active.start_offset_secs + inner.backend.elapsed_secs();
                inner.backend.stop();
                inner.resume_point_secs = position;
                inner.state = PlaybackState::Paused;
            }
            inner.pending = None;
        }));
    }
}

/// Invalidate everything an older instruction left behind: the pending
/// deadline, any parked PLAY, and timers that already fired their sleep
/// but have not applied yet. Returns the generation of the superseding
/// instruction.
fn supersede<B>(inner: &mut MutexGuard<'_, Inner<B>>) -> u64 {
    if let Some(handle) = inner.pending.take() {
        handle.abort();
    }
    inner.deferred = None;
    inner.generation += 1;
    inner.generation
}

/// Next track after `current` in announcement order, wrapping around.
fn next_track(tracks: &[AudioSource], current: &str) -> Option<String> {
    if tracks.is_empty() {
        return None;
    }
    let index = tracks.iter().position(|t| t.id == current)?;
    Some(tracks[(index + 1) % tracks.len()].id.clone())
}

#[cfg(test)]
#[path = "executor_test.rs"]
mod tests;
