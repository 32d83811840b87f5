//! Action scheduler — absolute-deadline broadcast of playback commands.
//!
//! DESIGN
//! ======
//! A play or pause intent from any member becomes a `SCHEDULED_ACTION`
//! stamped `now + schedule_lead_ms` in coordinator-clock terms, so even
//! the slowest member receives it before the deadline. Clients translate
//! the deadline through their own offset estimate; no ordering between
//! broadcasts is relied on beyond each client's own in-order channel.
//!
//! Spatial configuration rides the same wrapper but with a "now" deadline:
//! gain ramps already smooth the transition, so it needs no lead.

use tracing::warn;

use crate::clock;
use crate::message::{ScheduledAction, ServerMessage};
use crate::state::AppState;

use super::presence;

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    #[error("unknown room: {0}")]
    UnknownRoom(String),
    #[error("unknown audio source: {0}")]
    UnknownAudio(String),
}

// =============================================================================
// SCHEDULING
// =============================================================================

/// Schedule playback of `audio_id` from `track_time_seconds` for everyone
/// in the room. Returns the stamped execution time.
///
/// # Errors
///
/// `UnknownRoom` if the room does not exist; `UnknownAudio` if the id is
/// not in the room's library.
pub async fn schedule_play(
    state: &AppState,
    room_id: &str,
    audio_id: &str,
    track_time_seconds: f64,
) -> Result<f64, ScheduleError> {
    {
        let rooms = state.rooms.read().await;
        let room = rooms
            .get(room_id)
            .ok_or_else(|| ScheduleError::UnknownRoom(room_id.to_string()))?;
        if room.track(audio_id).is_none() {
            return Err(ScheduleError::UnknownAudio(audio_id.to_string()));
        }
    }

    let action = ScheduledAction::Play {
        track_time_seconds,
        audio_id: audio_id.to_string(),
    };
    schedule(state, room_id, action).await
}

/// Schedule a synchronized pause.
///
/// # Errors
///
/// `UnknownRoom` if the room does not exist.
pub async fn schedule_pause(state: &AppState, room_id: &str) -> Result<f64, ScheduleError> {
    schedule(state, room_id, ScheduledAction::Pause).await
}

/// Stamp `action` with `now + lead` and broadcast it to the room.
async fn schedule(
    state: &AppState,
    room_id: &str,
    action: ScheduledAction,
) -> Result<f64, ScheduleError> {
    {
        let rooms = state.rooms.read().await;
        if !rooms.contains_key(room_id) {
            warn!(%room_id, "scheduled action for unknown room dropped");
            return Err(ScheduleError::UnknownRoom(room_id.to_string()));
        }
    }

    let execute_at = clock::now_ms() + state.config.schedule_lead_ms;
    let msg = ServerMessage::ScheduledAction {
        server_time_to_execute: execute_at,
        scheduled_action: action,
    };
    presence::broadcast(state, room_id, &msg, None).await;
    Ok(execute_at)
}

/// Broadcast an action with an immediate deadline. Used for spatial
/// configuration, which is smoothed client-side by gain ramps rather than
/// aligned by lead time. Unknown rooms are silently skipped.
pub async fn broadcast_immediate(state: &AppState, room_id: &str, action: ScheduledAction) {
    let msg = ServerMessage::ScheduledAction {
        server_time_to_execute: clock::now_ms(),
        scheduled_action: action,
    };
    presence::broadcast(state, room_id, &msg, None).await;
}

#[cfg(test)]
#[path = "scheduler_test.rs"]
mod tests;
