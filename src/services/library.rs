//! Room audio library — announced sources and re-announcement.
//!
//! DESIGN
//! ======
//! The upload pipeline itself is external; once it has stored bytes in the
//! asset store it calls [`announce`] to register the source with the room
//! and notify members. [`reannounce`] is the recovery half: a client whose
//! local copy is missing asks for the announcement again and re-fetches
//! from the blob store.

use tracing::warn;

use crate::message::{AudioSource, RoomEvent, ServerMessage};
use crate::state::AppState;

use super::presence;

/// Register a source with the room's library (replacing any previous entry
/// with the same id) and broadcast `NEW_AUDIO_SOURCE` to all members.
/// Dropped with a warning if the room does not exist.
pub async fn announce(state: &AppState, room_id: &str, source: AudioSource) {
    {
        let mut rooms = state.rooms.write().await;
        let Some(room) = rooms.get_mut(room_id) else {
            warn!(%room_id, audio_id = %source.id, "announce for unknown room dropped");
            return;
        };
        room.tracks.retain(|t| t.id != source.id);
        room.tracks.push(source.clone());
    }

    let event = ServerMessage::RoomEvent { event: RoomEvent::NewAudioSource { source } };
    presence::broadcast(state, room_id, &event, None).await;
}

/// Look up a previously announced source so it can be re-sent to one
/// client. Returns `None` when the room or the source is unknown.
pub async fn reannounce(state: &AppState, room_id: &str, audio_id: &str) -> Option<AudioSource> {
    let rooms = state.rooms.read().await;
    rooms.get(room_id)?.track(audio_id).cloned()
}

#[cfg(test)]
#[path = "library_test.rs"]
mod tests;
