//! Client session — wires the sampler and executor to a message channel.
//!
//! DESIGN
//! ======
//! The counterpart of the coordinator's per-connection loop. The app owns
//! the transport; it feeds inbound coordinator messages to
//! [`ClientSession::handle_server_message`] and drains the outbound
//! channel into the socket. Waiting for a deadline never blocks this path:
//! the executor parks deadlines on timers, so a newer instruction is
//! always seen while an older one is still pending.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::message::{ClientMessage, RoomEvent, ServerMessage};

use super::executor::{AudioBackend, PlaybackExecutor};
use super::sampler::{ClockSampler, spawn_sampling_task};

// =============================================================================
// CLIENT SESSION
// =============================================================================

pub struct ClientSession<B: AudioBackend> {
    backend: Arc<B>,
    sampler: Arc<Mutex<ClockSampler>>,
    executor: PlaybackExecutor<B>,
    outbound: mpsc::Sender<ClientMessage>,
    config: Config,
    sampling: Option<JoinHandle<()>>,
    client_id: Option<Uuid>,
}

impl<B: AudioBackend> ClientSession<B> {
    /// Build a session around a backend and the outbound half of the
    /// channel. Call [`Self::join`] once the transport is connected.
    #[must_use]
    pub fn new(backend: Arc<B>, outbound: mpsc::Sender<ClientMessage>, config: Config) -> Self {
        let sampler = Arc::new(Mutex::new(ClockSampler::from_config(&config)));
        let executor = PlaybackExecutor::new(Arc::clone(&backend), outbound.clone(), config.clone());
        Self { backend, sampler, executor, outbound, config, sampling: None, client_id: None }
    }

    /// Send the join handshake and start the clock-sampling cadence.
    pub async fn join(&mut self, room_id: &str, user_id: &str, username: &str) {
        let join = ClientMessage::JoinRoom {
            room_id: room_id.to_string(),
            user_id: user_id.to_string(),
            username: username.to_string(),
        };
        if self.outbound.send(join).await.is_err() {
            warn!("join not sent, channel closed");
            return;
        }
        if self.sampling.is_none() {
            self.sampling = Some(spawn_sampling_task(
                Arc::clone(&self.sampler),
                self.outbound.clone(),
                &self.config,
            ));
        }
    }

    /// Route one coordinator message to the component that owns it.
    pub fn handle_server_message(&mut self, msg: ServerMessage) {
        match msg {
            ServerMessage::NtpResponse { t0, t1, t2 } => {
                if let Ok(mut sampler) = self.sampler.lock() {
                    sampler.handle_response(t0, t1, t2);
                }
            }
            ServerMessage::SetClientId { client_id } => {
                self.client_id = Some(client_id);
                self.executor.set_client_id(client_id);
            }
            ServerMessage::RoomState { tracks, .. } => {
                self.executor.set_tracks(tracks);
            }
            ServerMessage::RoomEvent { event } => match event {
                RoomEvent::ClientChange { clients } => {
                    debug!(count = clients.len(), "room membership changed");
                }
                RoomEvent::NewAudioSource { source } => {
                    let audio_id = source.id.clone();
                    self.executor.add_track(source);
                    // The blob may already be local (e.g. this client
                    // uploaded it); unpark a waiting PLAY right away.
                    if self.backend.is_loaded(&audio_id) {
                        self.executor.on_asset_loaded(&audio_id);
                    }
                }
            },
            ServerMessage::ScheduledAction { server_time_to_execute, scheduled_action } => {
                let offset = self
                    .sampler
                    .lock()
                    .ok()
                    .and_then(|s| s.trusted_estimate())
                    .map(|e| e.average_offset);
                self.executor
                    .handle_action(server_time_to_execute, scheduled_action, offset);
            }
            ServerMessage::Error { message } => {
                warn!(%message, "coordinator reported an error");
            }
        }
    }

    /// The app finished decoding an asset into the backend.
    pub fn on_asset_loaded(&self, audio_id: &str) {
        self.executor.on_asset_loaded(audio_id);
    }

    /// The backend reports a source ended; `generation` identifies which.
    pub fn on_track_ended(&self, generation: u64) {
        self.executor.on_track_ended(generation);
    }

    #[must_use]
    pub fn client_id(&self) -> Option<Uuid> {
        self.client_id
    }

    #[must_use]
    pub fn executor(&self) -> &PlaybackExecutor<B> {
        &self.executor
    }

    /// Cancel the sampling cadence and any pending playback deadline.
    pub fn shutdown(&mut self) {
        if let Some(handle) = self.sampling.take() {
            handle.abort();
        }
        self.executor.cancel_pending();
    }
}

impl<B: AudioBackend> Drop for ClientSession<B> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
