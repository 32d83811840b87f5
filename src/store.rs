//! External collaborator contracts — the blob store and room directory.
//!
//! DESIGN
//! ======
//! The coordinator treats uploaded audio and room metadata as services it
//! talks to through traits, not as things it owns. The in-memory
//! implementations below back the binary and the tests; a deployment can
//! swap in real storage without touching the protocol core.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

// =============================================================================
// AUDIO ASSETS
// =============================================================================

/// Byte content of a stored audio asset.
#[derive(Debug, Clone)]
pub struct AudioBlob {
    pub bytes: Vec<u8>,
}

impl AudioBlob {
    #[must_use]
    pub fn size(&self) -> usize {
        self.bytes.len()
    }
}

/// Blob store keyed by opaque string IDs. By convention a room's assets
/// share the `"{room_id}/"` prefix, which is what `purge_room` removes.
#[async_trait]
pub trait AudioAssetStore: Send + Sync {
    async fn fetch(&self, audio_id: &str) -> Result<Option<AudioBlob>, StoreError>;

    async fn store(&self, audio_id: &str, bytes: Vec<u8>) -> Result<(), StoreError>;

    /// Drop every asset belonging to `room_id`. Called on room teardown;
    /// best-effort, failures are logged by the caller.
    async fn purge_room(&self, room_id: &str) -> Result<(), StoreError>;
}

/// In-memory asset store.
#[derive(Default)]
pub struct MemoryAssetStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryAssetStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AudioAssetStore for MemoryAssetStore {
    async fn fetch(&self, audio_id: &str) -> Result<Option<AudioBlob>, StoreError> {
        let blobs = self.blobs.lock().map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(blobs.get(audio_id).map(|bytes| AudioBlob { bytes: bytes.clone() }))
    }

    async fn store(&self, audio_id: &str, bytes: Vec<u8>) -> Result<(), StoreError> {
        let mut blobs = self.blobs.lock().map_err(|e| StoreError::Unavailable(e.to_string()))?;
        blobs.insert(audio_id.to_string(), bytes);
        Ok(())
    }

    async fn purge_room(&self, room_id: &str) -> Result<(), StoreError> {
        let prefix = format!("{room_id}/");
        let mut blobs = self.blobs.lock().map_err(|e| StoreError::Unavailable(e.to_string()))?;
        blobs.retain(|id, _| !id.starts_with(&prefix));
        Ok(())
    }
}

// =============================================================================
// ROOM DIRECTORY
// =============================================================================

/// Room-metadata service keyed by room ID.
#[async_trait]
pub trait RoomDirectory: Send + Sync {
    async fn create(&self, room_id: &str) -> Result<(), StoreError>;
    async fn activate(&self, room_id: &str) -> Result<(), StoreError>;
    async fn deactivate(&self, room_id: &str) -> Result<(), StoreError>;
    async fn delete(&self, room_id: &str) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomStatus {
    Active,
    Inactive,
}

/// In-memory room directory.
#[derive(Default)]
pub struct MemoryRoomDirectory {
    rooms: Mutex<HashMap<String, RoomStatus>>,
}

impl MemoryRoomDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current status, for tests and diagnostics.
    #[must_use]
    pub fn status(&self, room_id: &str) -> Option<RoomStatus> {
        self.rooms.lock().ok()?.get(room_id).copied()
    }
}

#[async_trait]
impl RoomDirectory for MemoryRoomDirectory {
    async fn create(&self, room_id: &str) -> Result<(), StoreError> {
        let mut rooms = self.rooms.lock().map_err(|e| StoreError::Unavailable(e.to_string()))?;
        rooms.entry(room_id.to_string()).or_insert(RoomStatus::Inactive);
        Ok(())
    }

    async fn activate(&self, room_id: &str) -> Result<(), StoreError> {
        let mut rooms = self.rooms.lock().map_err(|e| StoreError::Unavailable(e.to_string()))?;
        rooms.insert(room_id.to_string(), RoomStatus::Active);
        Ok(())
    }

    async fn deactivate(&self, room_id: &str) -> Result<(), StoreError> {
        let mut rooms = self.rooms.lock().map_err(|e| StoreError::Unavailable(e.to_string()))?;
        rooms.insert(room_id.to_string(), RoomStatus::Inactive);
        Ok(())
    }

    async fn delete(&self, room_id: &str) -> Result<(), StoreError> {
        let mut rooms = self.rooms.lock().map_err(|e| StoreError::Unavailable(e.to_string()))?;
        rooms.remove(room_id);
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================
