//! Spatial gain engine — per-member gain recomputation and the orbit tick.
//!
//! DESIGN
//! ======
//! Gains are recomputed for the whole room and broadcast as one
//! `SPATIAL_CONFIG` on three triggers: a membership or position change, an
//! explicit listening-source move, and the periodic orbit tick that moves
//! the source along a circle while spatial mode is on. The tick is a
//! `JoinHandle` owned by the room record; both stop paths (explicit stop,
//! last leave) funnel through `Room::stop_spatial`, so cancellation is
//! exactly-once and the tick never outlives the room.
//!
//! Tick and message handlers mutate the same room record under the rooms
//! write lock, one critical section at a time, so a tick never observes a
//! half-updated member list.

use std::collections::HashMap;

use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::message::{GainAssignment, ScheduledAction};
use crate::spatial::orbit_position;
use crate::state::{AppState, Room};

use super::scheduler;

// =============================================================================
// GAIN RECOMPUTATION
// =============================================================================

/// Gains for every current member against the room's listening source.
/// Pure; always clamped by the falloff policy.
#[must_use]
pub fn gains_for(room: &Room, config: &Config) -> HashMap<Uuid, GainAssignment> {
    room.members
        .iter()
        .map(|member| {
            let gain = config.falloff.gain(
                member.position,
                room.listening_source,
                config.min_gain,
                config.max_gain,
                config.falloff_coefficient,
            );
            (member.client_id, GainAssignment { gain, ramp_time: config.ramp_time_secs })
        })
        .collect()
}

/// Recompute gains for the room and broadcast one `SPATIAL_CONFIG` with an
/// immediate deadline. No-op for unknown rooms.
pub async fn broadcast_config(state: &AppState, room_id: &str) {
    let action = {
        let rooms = state.rooms.read().await;
        let Some(room) = rooms.get(room_id) else {
            return;
        };
        ScheduledAction::SpatialConfig {
            listening_source: room.listening_source,
            gains: gains_for(room, &state.config),
        }
    };
    scheduler::broadcast_immediate(state, room_id, action).await;
}

// =============================================================================
// START / STOP
// =============================================================================

/// Turn spatial mode on: spawn the orbit tick (if not already running) and
/// push an initial configuration. Idempotent.
pub async fn start(state: &AppState, room_id: &str) {
    {
        let mut rooms = state.rooms.write().await;
        let Some(room) = rooms.get_mut(room_id) else {
            warn!(%room_id, "spatial start for unknown room dropped");
            return;
        };
        if room.spatial_active() {
            return;
        }
        room.spatial_tick = Some(spawn_orbit_tick(state.clone(), room_id.to_string()));
        info!(%room_id, "spatial audio started");
    }
    broadcast_config(state, room_id).await;
}

/// Turn spatial mode off: cancel the tick and tell clients to drop any
/// in-flight ramp and return to full gain. Safe to call when already off —
/// a second stop changes nothing and broadcasts nothing.
pub async fn stop(state: &AppState, room_id: &str) {
    let stopped = {
        let mut rooms = state.rooms.write().await;
        let Some(room) = rooms.get_mut(room_id) else {
            return;
        };
        room.stop_spatial()
    };

    if stopped {
        info!(%room_id, "spatial audio stopped");
        scheduler::broadcast_immediate(state, room_id, ScheduledAction::StopSpatialAudio).await;
    }
}

/// Move the listening source to an explicit point (clamped to the grid)
/// and rebroadcast gains.
pub async fn set_listening_source(state: &AppState, room_id: &str, x: f64, y: f64) {
    {
        let mut rooms = state.rooms.write().await;
        let Some(room) = rooms.get_mut(room_id) else {
            warn!(%room_id, "listening source move for unknown room dropped");
            return;
        };
        room.listening_source =
            crate::spatial::Position::new(x, y).clamped(state.config.grid_size);
    }
    broadcast_config(state, room_id).await;
}

// =============================================================================
// ORBIT TICK
// =============================================================================

/// Periodic loop that advances the listening source along its circular
/// path and rebroadcasts gains. Owned by the room record; aborted through
/// `Room::stop_spatial`. Exits on its own if the room disappears first.
fn spawn_orbit_tick(state: AppState, room_id: String) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(state.config.spatial_tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick completes immediately; `start` already pushed the
        // initial configuration, so skip it.
        interval.tick().await;
        loop {
            interval.tick().await;

            {
                let mut rooms = state.rooms.write().await;
                let Some(room) = rooms.get_mut(&room_id) else {
                    return;
                };
                room.orbit_angle += state.config.orbit_step;
                room.listening_source = orbit_position(
                    state.config.origin(),
                    state.config.orbit_radius,
                    room.orbit_angle,
                );
            }

            broadcast_config(&state, &room_id).await;
        }
    })
}

#[cfg(test)]
#[path = "spatial_test.rs"]
mod tests;
