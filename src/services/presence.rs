//! Presence registry — room membership, layout, and teardown.
//!
//! DESIGN
//! ======
//! A room moves EMPTY → ACTIVE on first join and back on last leave. Every
//! membership change recomputes the full circular layout (never a partial
//! update — there is no incremental path to drift out of) and triggers one
//! gain recomputation broadcast. Teardown cancels the spatial tick exactly
//! once, then releases the room's directory entry and stored assets.
//!
//! ERROR HANDLING
//! ==============
//! Leaving an unknown room, or reordering an unknown client, is a no-op.
//! Directory and asset-store cleanup is best-effort: failures are logged
//! and never surface to remaining clients.

use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::message::{AudioSource, MemberInfo, RoomEvent, ServerMessage};
use crate::spatial::{Position, circular_layout};
use crate::state::{AppState, Room, RoomMember};

// =============================================================================
// TYPES
// =============================================================================

/// Room snapshot returned to a freshly joined client.
#[derive(Debug, Clone)]
pub struct JoinSnapshot {
    pub members: Vec<MemberInfo>,
    pub listening_source: Position,
    pub tracks: Vec<AudioSource>,
}

// =============================================================================
// JOIN / LEAVE
// =============================================================================

/// Add a client to a room, creating the room on first join. Recomputes the
/// circular layout, then broadcasts the membership change and a fresh gain
/// configuration to everyone (including the joiner).
pub async fn join(
    state: &AppState,
    room_id: &str,
    user_id: &str,
    username: &str,
    client_id: Uuid,
    tx: mpsc::Sender<ServerMessage>,
) -> JoinSnapshot {
    let origin = state.config.origin();
    let (snapshot, members, created) = {
        let mut rooms = state.rooms.write().await;
        let created = !rooms.contains_key(room_id);
        let room = rooms.entry(room_id.to_string()).or_insert_with(|| Room::new(origin));

        // Placeholder position; the layout pass below assigns the real one.
        room.members.push(RoomMember {
            client_id,
            user_id: user_id.to_string(),
            username: username.to_string(),
            sender: tx,
            position: origin,
            last_known_rtt: None,
        });
        apply_layout(room, origin, state.config.layout_radius);

        info!(%room_id, %client_id, members = room.members.len(), "client joined room");
        let snapshot = JoinSnapshot {
            members: room.member_infos(),
            listening_source: room.listening_source,
            tracks: room.tracks.clone(),
        };
        let members = snapshot.members.clone();
        (snapshot, members, created)
    };

    if created {
        if let Err(e) = state.directory.create(room_id).await {
            warn!(%room_id, error = %e, "room directory create failed");
        }
        if let Err(e) = state.directory.activate(room_id).await {
            warn!(%room_id, error = %e, "room directory activate failed");
        }
    }

    broadcast(state, room_id, &client_change(members), None).await;
    super::spatial::broadcast_config(state, room_id).await;

    snapshot
}

/// Remove a client from a room. The last leave tears the room down; any
/// other leave re-lays-out the survivors and rebroadcasts membership and
/// gains. Leaving an unknown room or an already-left room is a no-op.
pub async fn leave(state: &AppState, room_id: &str, client_id: Uuid) {
    let origin = state.config.origin();
    let remaining = {
        let mut rooms = state.rooms.write().await;
        let Some(room) = rooms.get_mut(room_id) else {
            return;
        };
        let before = room.members.len();
        room.members.retain(|m| m.client_id != client_id);
        if room.members.len() == before {
            return;
        }

        info!(%room_id, %client_id, remaining = room.members.len(), "client left room");
        if room.members.is_empty() {
            // ACTIVE -> EMPTY. Dropping the record also aborts the tick,
            // but stop it explicitly so the transition is visible here.
            if let Some(mut room) = rooms.remove(room_id) {
                room.stop_spatial();
            }
            None
        } else {
            apply_layout(room, origin, state.config.layout_radius);
            Some(room.member_infos())
        }
    };

    match remaining {
        Some(members) => {
            broadcast(state, room_id, &client_change(members), None).await;
            super::spatial::broadcast_config(state, room_id).await;
        }
        None => teardown(state, room_id).await,
    }
}

/// Release room-scoped external resources after the last member left.
async fn teardown(state: &AppState, room_id: &str) {
    info!(%room_id, "room empty, tearing down");
    if let Err(e) = state.directory.deactivate(room_id).await {
        warn!(%room_id, error = %e, "room directory deactivate failed");
    }
    if let Err(e) = state.assets.purge_room(room_id).await {
        warn!(%room_id, error = %e, "asset purge failed");
    }
    if let Err(e) = state.directory.delete(room_id).await {
        warn!(%room_id, error = %e, "room directory delete failed");
    }
}

// =============================================================================
// REORDER
// =============================================================================

/// Move `client_id` to the front of the room's iteration order, making it
/// the layout anchor. Unknown clients leave the order untouched. Returns
/// the (possibly unchanged) member list.
pub async fn reorder(state: &AppState, room_id: &str, client_id: Uuid) -> Vec<MemberInfo> {
    let origin = state.config.origin();
    let members = {
        let mut rooms = state.rooms.write().await;
        let Some(room) = rooms.get_mut(room_id) else {
            return Vec::new();
        };
        let Some(index) = room.members.iter().position(|m| m.client_id == client_id) else {
            return room.member_infos();
        };

        let member = room.members.remove(index);
        room.members.insert(0, member);
        apply_layout(room, origin, state.config.layout_radius);
        room.member_infos()
    };

    broadcast(state, room_id, &client_change(members.clone()), None).await;
    super::spatial::broadcast_config(state, room_id).await;
    members
}

// =============================================================================
// RTT BOOKKEEPING
// =============================================================================

/// Record the round-trip estimate a client reported with its last NTP
/// request.
pub async fn record_rtt(state: &AppState, room_id: &str, client_id: Uuid, rtt: f64) {
    let mut rooms = state.rooms.write().await;
    let Some(member) = rooms.get_mut(room_id).and_then(|r| r.member_mut(client_id)) else {
        return;
    };
    member.last_known_rtt = Some(rtt);
}

// =============================================================================
// BROADCAST
// =============================================================================

/// Send a message to all members of a room, optionally excluding one.
/// Best-effort: a member whose channel is full misses this message.
pub async fn broadcast(state: &AppState, room_id: &str, msg: &ServerMessage, exclude: Option<Uuid>) {
    let rooms = state.rooms.read().await;
    let Some(room) = rooms.get(room_id) else {
        return;
    };

    for member in &room.members {
        if exclude == Some(member.client_id) {
            continue;
        }
        let _ = member.sender.try_send(msg.clone());
    }
}

// =============================================================================
// HELPERS
// =============================================================================

/// Reassign every member its evenly spaced position on the layout circle.
fn apply_layout(room: &mut Room, origin: Position, radius: f64) {
    let layout = circular_layout(room.members.len(), origin, radius);
    for (member, position) in room.members.iter_mut().zip(layout) {
        member.position = position;
    }
}

fn client_change(clients: Vec<MemberInfo>) -> ServerMessage {
    ServerMessage::RoomEvent { event: RoomEvent::ClientChange { clients } }
}

#[cfg(test)]
#[path = "presence_test.rs"]
mod tests;
