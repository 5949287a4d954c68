//! Persister trait definitions

use crate::types::StoreSnapshot;
use thiserror::Error;

/// Errors that can occur while loading or saving a snapshot
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unsupported snapshot version: {0}")]
    UnsupportedVersion(u32),
}

/// Durable home for store snapshots.
///
/// The store never knows the encoding. It calls `save` with the backing-file
/// lock held and never while holding a map lock, and calls `load` only
/// during startup.
pub trait Persister: Send + Sync {
    /// Read the last saved snapshot. `Ok(None)` when nothing was ever saved.
    fn load(&self) -> Result<Option<StoreSnapshot>, PersistError>;

    /// Durably replace the saved snapshot.
    fn save(&self, snapshot: &StoreSnapshot) -> Result<(), PersistError>;
}
