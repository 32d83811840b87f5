//! Wire protocol — every message that crosses the WebSocket channel.
//!
//! DESIGN
//! ======
//! Two families, both JSON with a `type` tag: client → coordinator intents
//! and coordinator → client pushes. Tag names are SCREAMING_SNAKE_CASE and
//! payload fields camelCase; the shapes here are the protocol, so browser
//! and native clients interoperate without a translation layer.
//!
//! Scheduled actions are wrapped with `serverTimeToExecute` (absolute
//! coordinator-clock epoch milliseconds) at broadcast time and are
//! immutable from then on.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::spatial::Position;

// =============================================================================
// CLIENT -> COORDINATOR
// =============================================================================

/// Intents a client may send. All room-scoped intents require a prior
/// `JOIN_ROOM` on the same connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    JoinRoom {
        room_id: String,
        user_id: String,
        username: String,
    },
    /// First half of a clock exchange. `rtt` optionally reports the
    /// client's current round-trip estimate so the coordinator can track
    /// per-member link quality; absent until the client has one.
    NtpRequest {
        t0: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rtt: Option<f64>,
    },
    Play {
        track_time_seconds: f64,
        audio_id: String,
    },
    Pause,
    ReuploadAudio {
        audio_id: String,
        audio_name: String,
    },
    ReorderClient {
        client_id: Uuid,
    },
    StartSpatialAudio,
    StopSpatialAudio,
    SetListeningSource {
        x: f64,
        y: f64,
    },
}

// =============================================================================
// COORDINATOR -> CLIENT
// =============================================================================

/// Pushes from the coordinator. `NtpResponse`, `SetClientId`, `RoomState`,
/// and `Error` are unicast; the rest are room broadcasts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    NtpResponse {
        t0: f64,
        t1: f64,
        t2: f64,
    },
    SetClientId {
        client_id: Uuid,
    },
    /// Snapshot sent to a client right after it joins.
    RoomState {
        members: Vec<MemberInfo>,
        listening_source: Position,
        tracks: Vec<AudioSource>,
    },
    ScheduledAction {
        server_time_to_execute: f64,
        scheduled_action: ScheduledAction,
    },
    RoomEvent {
        event: RoomEvent,
    },
    Error {
        message: String,
    },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error { message: message.into() }
    }
}

// =============================================================================
// SCHEDULED ACTIONS
// =============================================================================

/// The command half of a `SCHEDULED_ACTION` broadcast. Spatial variants are
/// broadcast with `serverTimeToExecute` set to "now" — gain ramps smooth
/// the transition, so they need no lead time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE", rename_all_fields = "camelCase")]
pub enum ScheduledAction {
    Play {
        track_time_seconds: f64,
        audio_id: String,
    },
    Pause,
    SpatialConfig {
        listening_source: Position,
        gains: HashMap<Uuid, GainAssignment>,
    },
    StopSpatialAudio,
}

/// Per-client gain, always inside the configured `[minGain, maxGain]`.
/// Derived on every recomputation, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GainAssignment {
    pub gain: f64,
    pub ramp_time: f64,
}

// =============================================================================
// ROOM EVENTS
// =============================================================================

/// Membership and library changes, broadcast to the room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE", rename_all_fields = "camelCase")]
pub enum RoomEvent {
    ClientChange {
        clients: Vec<MemberInfo>,
    },
    NewAudioSource {
        #[serde(flatten)]
        source: AudioSource,
    },
}

/// A room member as seen on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberInfo {
    pub client_id: Uuid,
    pub user_id: String,
    pub username: String,
    pub position: Position,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_known_rtt: Option<f64>,
}

/// An audio source known to a room's library.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioSource {
    pub id: String,
    pub title: String,
    /// Track length in seconds.
    pub duration: f64,
    /// Epoch milliseconds when the source was announced.
    pub added_at: f64,
    pub added_by: String,
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_message_tags_and_fields_match_protocol() {
        let msg = ClientMessage::Play { track_time_seconds: 12.5, audio_id: "room-1/a.mp3".into() };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""type":"PLAY""#), "{json}");
        assert!(json.contains(r#""trackTimeSeconds":12.5"#), "{json}");
        assert!(json.contains(r#""audioId":"room-1/a.mp3""#), "{json}");
    }

    #[test]
    fn ntp_request_omits_absent_rtt() {
        let msg = ClientMessage::NtpRequest { t0: 1000.0, rtt: None };
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, r#"{"type":"NTP_REQUEST","t0":1000.0}"#);

        // And a bare `{t0}` request parses.
        let parsed: ClientMessage =
            serde_json::from_str(r#"{"type":"NTP_REQUEST","t0":42.0}"#).unwrap();
        assert_eq!(parsed, ClientMessage::NtpRequest { t0: 42.0, rtt: None });
    }

    #[test]
    fn pause_is_a_bare_tag() {
        let json = serde_json::to_string(&ClientMessage::Pause).unwrap();
        assert_eq!(json, r#"{"type":"PAUSE"}"#);
    }

    #[test]
    fn scheduled_action_round_trip() {
        let client_id = Uuid::new_v4();
        let mut gains = HashMap::new();
        gains.insert(client_id, GainAssignment { gain: 0.4, ramp_time: 0.5 });
        let msg = ServerMessage::ScheduledAction {
            server_time_to_execute: 5200.0,
            scheduled_action: ScheduledAction::SpatialConfig {
                listening_source: Position::new(50.0, 50.0),
                gains,
            },
        };

        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""serverTimeToExecute":5200.0"#), "{json}");
        assert!(json.contains(r#""type":"SPATIAL_CONFIG""#), "{json}");
        assert!(json.contains(r#""listeningSource""#), "{json}");

        let restored: ServerMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, msg);
    }

    #[test]
    fn new_audio_source_event_flattens_fields() {
        let event = RoomEvent::NewAudioSource {
            source: AudioSource {
                id: "room-1/a.mp3".into(),
                title: "a".into(),
                duration: 180.0,
                added_at: 1000.0,
                added_by: "ada".into(),
            },
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"NEW_AUDIO_SOURCE""#), "{json}");
        assert!(json.contains(r#""addedBy":"ada""#), "{json}");
        assert!(json.contains(r#""duration":180.0"#), "{json}");

        let restored: RoomEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, event);
    }

    #[test]
    fn malformed_payload_is_a_parse_error_not_a_panic() {
        let result: Result<ClientMessage, _> =
            serde_json::from_str(r#"{"type":"PLAY","trackTimeSeconds":"not a number"}"#);
        assert!(result.is_err());
    }
}
