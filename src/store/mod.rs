//! Credential & session store
//!
//! [`AuthStore`] owns the user map, the session map, and the handle to the
//! backing persister, each behind its own lock:
//!
//! | Resource    | Lock                       | Rank |
//! |-------------|----------------------------|------|
//! | user map    | `RwLock<UserMap>`          | 0    |
//! | session map | `RwLock<SessionMap>`       | 1    |
//! | backing     | `Mutex<Backing>`           | 2    |
//!
//! Any operation holding more than one lock acquires them in rank order.
//! All acquisitions go through the helpers at the bottom of this file, which
//! tag guards with their rank (see [`lock_order`]). No disk I/O happens while
//! a map lock is held: `flush` copies both maps, releases them, then takes
//! the backing lock.

mod credentials;
mod lock_order;
mod sessions;
mod snapshot;

use crate::config::{Config, ExpirationPolicy};
use crate::error::StoreError;
use crate::metrics::Metrics;
use crate::persist::Persister;
use crate::token::TokenDigest;
use crate::types::{SessionRecord, UserRecord};
use chrono::{DateTime, Utc};
use lock_order::{LockRank, Ranked};
use parking_lot::{
    Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockUpgradableReadGuard, RwLockWriteGuard,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

type UserMap = HashMap<String, UserRecord>;
type SessionMap = HashMap<TokenDigest, SessionRecord>;

/// Persister handle plus the sequence number of the last snapshot it saved.
struct Backing {
    persister: Option<Arc<dyn Persister>>,
    last_saved_seq: Option<u64>,
}

/// Store policies resolved from [`Config`] at construction.
#[derive(Debug, Clone)]
struct Settings {
    session_ttl: chrono::Duration,
    max_lifetime: chrono::Duration,
    expiration: ExpirationPolicy,
    cascade_on_remove: bool,
    revoke_on_password_change: bool,
    sweep_batch_size: usize,
}

impl Settings {
    fn from_config(config: &Config) -> Self {
        Self {
            session_ttl: to_chrono(config.session_ttl),
            max_lifetime: to_chrono(config.max_lifetime),
            expiration: config.expiration,
            cascade_on_remove: config.cascade_on_remove,
            revoke_on_password_change: config.revoke_on_password_change,
            sweep_batch_size: config.sweep_batch_size.max(1),
        }
    }
}

/// Thread-safe credential and session store.
///
/// Construct once and share as `Arc<AuthStore>`.
pub struct AuthStore {
    users: RwLock<UserMap>,
    sessions: RwLock<SessionMap>,
    backing: Mutex<Backing>,
    snapshot_seq: AtomicU64,
    settings: Settings,
    metrics: Metrics,
}

impl Default for AuthStore {
    fn default() -> Self {
        Self::new(&Config::default())
    }
}

impl AuthStore {
    /// Create an empty, memory-only store.
    pub fn new(config: &Config) -> Self {
        Self {
            users: RwLock::new(HashMap::with_capacity(config.initial_capacity)),
            sessions: RwLock::new(HashMap::with_capacity(config.initial_capacity)),
            backing: Mutex::new(Backing {
                persister: None,
                last_saved_seq: None,
            }),
            snapshot_seq: AtomicU64::new(0),
            settings: Settings::from_config(config),
            metrics: Metrics::new(),
        }
    }

    /// Create an empty store mirrored to `persister` by [`flush`](Self::flush).
    /// Nothing is loaded; use [`open`](Self::open) to resume saved state.
    pub fn with_persister(config: &Config, persister: Arc<dyn Persister>) -> Self {
        let mut store = Self::new(config);
        store.backing.get_mut().persister = Some(persister);
        store
    }

    /// Create a store and restore the persister's saved state.
    ///
    /// Any load failure is returned as an error: callers should abort startup
    /// rather than run with partial state.
    pub fn open(config: &Config, persister: Arc<dyn Persister>) -> Result<Self, StoreError> {
        let saved = persister.load()?;
        let mut store = Self::with_persister(config, persister);
        match saved {
            Some(snapshot) => store.restore(snapshot),
            None => info!("No saved state, starting with an empty store"),
        }
        Ok(store)
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn expiration_policy(&self) -> ExpirationPolicy {
        self.settings.expiration
    }

    fn next_snapshot_seq(&self) -> u64 {
        self.snapshot_seq.fetch_add(1, Ordering::SeqCst)
    }

    // === Lock acquisition, always in rank order ===

    fn users_read(&self) -> Ranked<RwLockReadGuard<'_, UserMap>> {
        Ranked::acquire(LockRank::Users, || self.users.read())
    }

    fn users_write(&self) -> Ranked<RwLockWriteGuard<'_, UserMap>> {
        Ranked::acquire(LockRank::Users, || self.users.write())
    }

    fn sessions_read(&self) -> Ranked<RwLockReadGuard<'_, SessionMap>> {
        Ranked::acquire(LockRank::Sessions, || self.sessions.read())
    }

    fn sessions_write(&self) -> Ranked<RwLockWriteGuard<'_, SessionMap>> {
        Ranked::acquire(LockRank::Sessions, || self.sessions.write())
    }

    /// Shared with plain readers, exclusive among upgradable readers.
    fn sessions_upgradable(&self) -> Ranked<RwLockUpgradableReadGuard<'_, SessionMap>> {
        Ranked::acquire(LockRank::Sessions, || self.sessions.upgradable_read())
    }

    fn backing_lock(&self) -> Ranked<MutexGuard<'_, Backing>> {
        Ranked::acquire(LockRank::Backing, || self.backing.lock())
    }

    /// users (read) → sessions (read)
    fn read_both(
        &self,
    ) -> (
        Ranked<RwLockReadGuard<'_, UserMap>>,
        Ranked<RwLockReadGuard<'_, SessionMap>>,
    ) {
        let users = self.users_read();
        let sessions = self.sessions_read();
        (users, sessions)
    }

    /// users (read) → sessions (write)
    fn users_read_sessions_write(
        &self,
    ) -> (
        Ranked<RwLockReadGuard<'_, UserMap>>,
        Ranked<RwLockWriteGuard<'_, SessionMap>>,
    ) {
        let users = self.users_read();
        let sessions = self.sessions_write();
        (users, sessions)
    }

    /// users (write) → sessions (write)
    fn write_both(
        &self,
    ) -> (
        Ranked<RwLockWriteGuard<'_, UserMap>>,
        Ranked<RwLockWriteGuard<'_, SessionMap>>,
    ) {
        let users = self.users_write();
        let sessions = self.sessions_write();
        (users, sessions)
    }
}

fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or(chrono::Duration::MAX)
}

/// `now + d`, saturating at the largest representable instant.
fn add_saturating(now: DateTime<Utc>, d: chrono::Duration) -> DateTime<Utc> {
    now.checked_add_signed(d).unwrap_or(DateTime::<Utc>::MAX_UTC)
}
