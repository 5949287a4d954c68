//! In-memory persister, for embedding without a state file and for tests

use super::traits::{PersistError, Persister};
use crate::types::StoreSnapshot;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Keeps the last saved snapshot in memory.
#[derive(Debug, Default)]
pub struct MemoryPersister {
    saved: Mutex<Option<StoreSnapshot>>,
    saves: AtomicUsize,
}

impl MemoryPersister {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a previously saved snapshot.
    pub fn with_snapshot(snapshot: StoreSnapshot) -> Self {
        Self {
            saved: Mutex::new(Some(snapshot)),
            saves: AtomicUsize::new(0),
        }
    }

    /// Number of completed `save` calls.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn last_saved(&self) -> Option<StoreSnapshot> {
        self.saved.lock().clone()
    }
}

impl Persister for MemoryPersister {
    fn load(&self) -> Result<Option<StoreSnapshot>, PersistError> {
        Ok(self.saved.lock().clone())
    }

    fn save(&self, snapshot: &StoreSnapshot) -> Result<(), PersistError> {
        *self.saved.lock() = Some(snapshot.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
