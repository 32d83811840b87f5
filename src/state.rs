//! Shared coordinator state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into axum handlers via the `State` extractor. It
//! owns the live room table behind one `RwLock`; every read-then-write
//! room operation (join, leave, reorder, source move, orbit tick) takes the
//! write lock for its whole critical section, so per-room mutations are
//! serialized in arrival order and the member list never tears.
//!
//! Members are kept in a `Vec` because iteration order is protocol-visible:
//! layout index follows join order, and a reorder moves a member to the
//! front. Rooms are small, so linear lookup by client ID is fine.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::Config;
use crate::message::{AudioSource, MemberInfo, ServerMessage};
use crate::spatial::Position;
use crate::store::{AudioAssetStore, MemoryAssetStore, MemoryRoomDirectory, RoomDirectory};

// =============================================================================
// ROOM MEMBER
// =============================================================================

/// One connected client in a room.
pub struct RoomMember {
    pub client_id: Uuid,
    pub user_id: String,
    pub username: String,
    /// Sender for outgoing pushes; the ws task drains the other end.
    pub sender: mpsc::Sender<ServerMessage>,
    pub position: Position,
    /// Round-trip estimate the client last reported with an NTP request.
    pub last_known_rtt: Option<f64>,
}

impl RoomMember {
    #[must_use]
    pub fn info(&self) -> MemberInfo {
        MemberInfo {
            client_id: self.client_id,
            user_id: self.user_id.clone(),
            username: self.username.clone(),
            position: self.position,
            last_known_rtt: self.last_known_rtt,
        }
    }
}

// =============================================================================
// ROOM
// =============================================================================

/// Per-room live state. Exists from first join to last leave.
pub struct Room {
    /// Members in iteration order: join order, except a reorder moves one
    /// to the front. Layout index follows this order.
    pub members: Vec<RoomMember>,
    pub listening_source: Position,
    /// Orbit angle of the listening source, advanced by the spatial tick.
    pub orbit_angle: f64,
    /// Periodic spatial recomputation loop; present only while spatial
    /// mode is on. Cancelled exactly once through `stop_spatial`.
    pub spatial_tick: Option<JoinHandle<()>>,
    /// Audio sources announced to this room, in announcement order.
    pub tracks: Vec<AudioSource>,
}

impl Room {
    #[must_use]
    pub fn new(listening_source: Position) -> Self {
        Self {
            members: Vec::new(),
            listening_source,
            orbit_angle: 0.0,
            spatial_tick: None,
            tracks: Vec::new(),
        }
    }

    #[must_use]
    pub fn member(&self, client_id: Uuid) -> Option<&RoomMember> {
        self.members.iter().find(|m| m.client_id == client_id)
    }

    #[must_use]
    pub fn member_mut(&mut self, client_id: Uuid) -> Option<&mut RoomMember> {
        self.members.iter_mut().find(|m| m.client_id == client_id)
    }

    #[must_use]
    pub fn member_infos(&self) -> Vec<MemberInfo> {
        self.members.iter().map(RoomMember::info).collect()
    }

    #[must_use]
    pub fn track(&self, audio_id: &str) -> Option<&AudioSource> {
        self.tracks.iter().find(|t| t.id == audio_id)
    }

    /// Cancel the spatial tick if one is running. Taking the handle makes
    /// a second call a no-op, so cancellation is exactly-once. Returns
    /// whether a tick was actually stopped.
    pub fn stop_spatial(&mut self) -> bool {
        let Some(handle) = self.spatial_tick.take() else {
            return false;
        };
        handle.abort();
        true
    }

    #[must_use]
    pub fn spatial_active(&self) -> bool {
        self.spatial_tick.is_some()
    }
}

impl Drop for Room {
    fn drop(&mut self) {
        // A room record never outlives its tick.
        self.stop_spatial();
    }
}

// =============================================================================
// APP STATE
// =============================================================================

/// Shared application state. Clone is required by axum — all inner fields
/// are Arc-wrapped.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub rooms: Arc<RwLock<HashMap<String, Room>>>,
    pub assets: Arc<dyn AudioAssetStore>,
    pub directory: Arc<dyn RoomDirectory>,
}

impl AppState {
    #[must_use]
    pub fn new(
        config: Config,
        assets: Arc<dyn AudioAssetStore>,
        directory: Arc<dyn RoomDirectory>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            rooms: Arc::new(RwLock::new(HashMap::new())),
            assets,
            directory,
        }
    }

    /// State backed by the in-memory stores.
    #[must_use]
    pub fn in_memory(config: Config) -> Self {
        Self::new(config, Arc::new(MemoryAssetStore::new()), Arc::new(MemoryRoomDirectory::new()))
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================


// =============================================================================
// TESTS
// =============================================================================
