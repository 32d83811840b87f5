//! WebSocket handler — per-connection loop and intent dispatch.
//!
//! DESIGN
//! ======
//! On upgrade, each connection gets a client ID and a push channel, then
//! enters a `select!` loop:
//! - Incoming client intents → parse + dispatch, replies go back inline
//! - Broadcasts from room peers → forwarded from the push channel
//!
//! Handlers mutate state through the services layer and return only the
//! frames owed to the sender; room-wide fan-out happens inside the
//! services through `presence::broadcast`, which is also what the orbit
//! tick uses. A malformed message is rejected with a unicast error, never
//! by tearing the connection down.
//!
//! NTP FAST PATH
//! =============
//! `t1` is captured the moment the socket yields a frame and `t2` right
//! before the response is assembled; nothing but JSON marshaling happens
//! between the two, keeping the server-side interval honest.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade
//! 2. `JOIN_ROOM` → `SET_CLIENT_ID` + `ROOM_STATE` to the joiner,
//!    `CLIENT_CHANGE` + `SPATIAL_CONFIG` to the room
//! 3. Intents dispatch until the socket closes
//! 4. Close → leave path (re-layout or room teardown)

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use tokio::sync::mpsc;
use tracing::{info, trace, warn};
use uuid::Uuid;

use crate::clock;
use crate::message::{ClientMessage, RoomEvent, ServerMessage};
use crate::services;
use crate::services::scheduler::ScheduleError;
use crate::state::AppState;

// =============================================================================
// SESSION
// =============================================================================

/// Connection-scoped state threaded through dispatch.
struct WsSession {
    client_id: Uuid,
    /// Room this connection has joined, if any.
    room: Option<String>,
    /// Sender handed to the room so peers and ticks can push to us.
    tx: mpsc::Sender<ServerMessage>,
}

// =============================================================================
// UPGRADE
// =============================================================================

pub async fn handle_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| run_ws(socket, state))
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(mut socket: WebSocket, state: AppState) {
    let client_id = Uuid::new_v4();
    let (client_tx, mut client_rx) = mpsc::channel::<ServerMessage>(256);
    let mut session = WsSession { client_id, room: None, tx: client_tx };

    info!(%client_id, "ws: client connected");

    loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(msg) = msg else { break };
                let Ok(msg) = msg else { break };
                match msg {
                    Message::Text(text) => {
                        // NTP t1: receive timestamp, captured before parsing.
                        let received_at = clock::now_ms();
                        let replies =
                            process_inbound_text(&state, &mut session, received_at, &text).await;
                        for reply in replies {
                            let _ = send_message(&mut socket, &reply).await;
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            Some(push) = client_rx.recv() => {
                if send_message(&mut socket, &push).await.is_err() {
                    break;
                }
            }
        }
    }

    if let Some(room_id) = session.room.take() {
        services::presence::leave(&state, &room_id, client_id).await;
    }
    info!(%client_id, "ws: client disconnected");
}

// =============================================================================
// DISPATCH
// =============================================================================

/// Parse one inbound intent and return the frames owed to the sender.
///
/// Kept free of transport concerns so tests can drive dispatch directly.
async fn process_inbound_text(
    state: &AppState,
    session: &mut WsSession,
    received_at: f64,
    text: &str,
) -> Vec<ServerMessage> {
    let msg: ClientMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            warn!(client_id = %session.client_id, error = %e, "ws: invalid inbound message");
            return vec![ServerMessage::error(format!("invalid message: {e}"))];
        }
    };

    match msg {
        ClientMessage::NtpRequest { t0, rtt } => {
            // t2 must follow t1 with nothing but marshaling in between.
            let reply = ServerMessage::NtpResponse { t0, t1: received_at, t2: clock::now_ms() };
            if let (Some(room_id), Some(rtt)) = (session.room.as_deref(), rtt) {
                services::presence::record_rtt(state, room_id, session.client_id, rtt).await;
            }
            vec![reply]
        }

        ClientMessage::JoinRoom { room_id, user_id, username } => {
            // A connection joins one room at a time.
            if let Some(old) = session.room.take() {
                services::presence::leave(state, &old, session.client_id).await;
            }

            let snapshot = services::presence::join(
                state,
                &room_id,
                &user_id,
                &username,
                session.client_id,
                session.tx.clone(),
            )
            .await;
            session.room = Some(room_id);

            vec![
                ServerMessage::SetClientId { client_id: session.client_id },
                ServerMessage::RoomState {
                    members: snapshot.members,
                    listening_source: snapshot.listening_source,
                    tracks: snapshot.tracks,
                },
            ]
        }

        ClientMessage::Play { track_time_seconds, audio_id } => {
            let Some(room_id) = session.room.as_deref() else {
                return vec![ServerMessage::error("join a room first")];
            };
            match services::scheduler::schedule_play(state, room_id, &audio_id, track_time_seconds)
                .await
            {
                Ok(_) => vec![],
                Err(e @ ScheduleError::UnknownAudio(_)) => vec![ServerMessage::error(e.to_string())],
                Err(ScheduleError::UnknownRoom(_)) => vec![],
            }
        }

        ClientMessage::Pause => {
            let Some(room_id) = session.room.as_deref() else {
                return vec![ServerMessage::error("join a room first")];
            };
            match services::scheduler::schedule_pause(state, room_id).await {
                Ok(_) | Err(ScheduleError::UnknownRoom(_)) => vec![],
                Err(e) => vec![ServerMessage::error(e.to_string())],
            }
        }

        ClientMessage::ReuploadAudio { audio_id, audio_name } => {
            let Some(room_id) = session.room.as_deref() else {
                return vec![ServerMessage::error("join a room first")];
            };
            match services::library::reannounce(state, room_id, &audio_id).await {
                Some(source) => {
                    vec![ServerMessage::RoomEvent { event: RoomEvent::NewAudioSource { source } }]
                }
                None => {
                    warn!(%room_id, %audio_id, %audio_name, "reupload for unknown audio source");
                    vec![ServerMessage::error(format!("unknown audio source: {audio_id}"))]
                }
            }
        }

        ClientMessage::ReorderClient { client_id } => {
            let Some(room_id) = session.room.as_deref() else {
                return vec![ServerMessage::error("join a room first")];
            };
            services::presence::reorder(state, room_id, client_id).await;
            vec![]
        }

        ClientMessage::StartSpatialAudio => {
            let Some(room_id) = session.room.as_deref() else {
                return vec![ServerMessage::error("join a room first")];
            };
            services::spatial::start(state, room_id).await;
            vec![]
        }

        ClientMessage::StopSpatialAudio => {
            let Some(room_id) = session.room.as_deref() else {
                return vec![ServerMessage::error("join a room first")];
            };
            services::spatial::stop(state, room_id).await;
            vec![]
        }

        ClientMessage::SetListeningSource { x, y } => {
            let Some(room_id) = session.room.as_deref() else {
                return vec![ServerMessage::error("join a room first")];
            };
            services::spatial::set_listening_source(state, room_id, x, y).await;
            vec![]
        }
    }
}

// =============================================================================
// HELPERS
// =============================================================================

async fn send_message(socket: &mut WebSocket, msg: &ServerMessage) -> Result<(), ()> {
    let json = match serde_json::to_string(msg) {
        Ok(j) => j,
        Err(e) => {
            warn!(error = %e, "ws: failed to serialize message");
            return Err(());
        }
    };
    match msg {
        // NTP responses are periodic noise; keep them out of the log.
        ServerMessage::NtpResponse { .. } => {}
        ServerMessage::Error { message } => warn!(%message, "ws: send error"),
        _ => trace!("ws: send message"),
    }
    socket.send(Message::Text(json.into())).await.map_err(|_| ())
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
