//! Snapshot, restore, and flush to the backing persister

use super::AuthStore;
use crate::error::StoreError;
use crate::types::{StoreSnapshot, SNAPSHOT_VERSION};
use chrono::Utc;
use tracing::{debug, info, warn};

impl AuthStore {
    /// Consistent copy of both maps.
    ///
    /// Takes the user and session read locks (in that order), clones, and
    /// releases them before returning.
    pub fn snapshot(&self) -> StoreSnapshot {
        self.snapshot_with_seq().1
    }

    fn snapshot_with_seq(&self) -> (u64, StoreSnapshot) {
        let (users, sessions) = self.read_both();
        // Taken under the read locks: a higher sequence number never
        // reflects older state than a lower one.
        let seq = self.next_snapshot_seq();
        let snapshot = StoreSnapshot {
            version: SNAPSHOT_VERSION,
            taken_at: Utc::now(),
            users: users.values().cloned().collect(),
            sessions: sessions.values().cloned().collect(),
        };
        (seq, snapshot)
    }

    /// Replace both maps with the contents of `snapshot`.
    ///
    /// `&mut self` guarantees nothing else can reach the store, so this is
    /// only usable during startup, before the store is shared. Sessions that
    /// expired while the state was at rest are dropped.
    pub fn restore(&mut self, snapshot: StoreSnapshot) {
        let now = Utc::now();

        let users = self.users.get_mut();
        users.clear();
        users.extend(
            snapshot
                .users
                .into_iter()
                .map(|u| (u.username.clone(), u)),
        );

        let sessions = self.sessions.get_mut();
        sessions.clear();
        let mut dropped = 0;
        for record in snapshot.sessions {
            if record.is_expired_at(now) {
                dropped += 1;
                continue;
            }
            sessions.insert(record.digest, record);
        }

        self.metrics.users.set(users.len() as i64);
        self.metrics.sessions.set(sessions.len() as i64);
        info!(
            "Restored {} users and {} sessions ({} expired sessions dropped)",
            users.len(),
            sessions.len(),
            dropped
        );
    }

    /// Whether a persister is attached.
    pub fn is_persistent(&self) -> bool {
        self.backing_lock().persister.is_some()
    }

    /// Mirror the current state to the persister. No-op without one.
    ///
    /// The snapshot is taken and the map locks released before the backing
    /// lock is acquired, so no map lock is ever held across the write. A
    /// snapshot older than the one already saved is skipped, so racing
    /// flushes never leave stale state on disk.
    pub fn flush(&self) -> Result<(), StoreError> {
        if !self.is_persistent() {
            return Ok(());
        }

        let (seq, snapshot) = self.snapshot_with_seq();
        self.save_snapshot(seq, &snapshot)
    }

    /// Hand `snapshot` to the persister unless a newer one was already saved.
    fn save_snapshot(&self, seq: u64, snapshot: &StoreSnapshot) -> Result<(), StoreError> {
        let mut backing = self.backing_lock();
        if backing.last_saved_seq.is_some_and(|last| last >= seq) {
            debug!("Skipping flush of snapshot {}, newer state already saved", seq);
            return Ok(());
        }
        let Some(persister) = backing.persister.clone() else {
            return Ok(());
        };

        match persister.save(snapshot) {
            Ok(()) => {
                backing.last_saved_seq = Some(seq);
                self.metrics.flushes_total.with_label_values(&["ok"]).inc();
                debug!(
                    "Flushed snapshot {} ({} users, {} sessions)",
                    seq,
                    snapshot.users.len(),
                    snapshot.sessions.len()
                );
                Ok(())
            }
            Err(e) => {
                self.metrics
                    .flushes_total
                    .with_label_values(&["error"])
                    .inc();
                warn!("Flush of snapshot {} failed: {}", seq, e);
                Err(e.into())
            }
        }
    }
}
