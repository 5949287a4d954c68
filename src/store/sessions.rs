//! Session operations: the token → session map

use super::{add_saturating, to_chrono, AuthStore};
use crate::config::ExpirationPolicy;
use crate::error::StoreError;
use crate::token::{self, TokenDigest};
use crate::types::{SessionInfo, SessionRecord};
use chrono::Utc;
use parking_lot::RwLockUpgradableReadGuard;
use std::collections::hash_map::Entry;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

impl AuthStore {
    /// Start a session for an existing user and return its token.
    ///
    /// The token is the only bearer credential for the session. The store
    /// keeps just its digest; the caller must not log it.
    pub fn create_session(&self, username: &str) -> Result<String, StoreError> {
        let lifetime = match self.settings.expiration {
            ExpirationPolicy::Fixed => self.settings.session_ttl,
            ExpirationPolicy::Sliding { idle_timeout } => to_chrono(idle_timeout),
        };
        self.insert_session(username, lifetime)
    }

    /// Like [`create_session`](Self::create_session) with an explicit
    /// initial lifetime, capped at `max_lifetime`.
    pub fn create_session_with_ttl(
        &self,
        username: &str,
        ttl: Duration,
    ) -> Result<String, StoreError> {
        self.insert_session(username, to_chrono(ttl))
    }

    fn insert_session(
        &self,
        username: &str,
        lifetime: chrono::Duration,
    ) -> Result<String, StoreError> {
        let lifetime = lifetime.min(self.settings.max_lifetime);

        // Keep the user map read-locked until the insert lands, so the user
        // cannot be removed between the check and the insert.
        let (users, mut sessions) = self.users_read_sessions_write();
        if !users.contains_key(username) {
            debug!("Refusing session for unknown user {}", username);
            return Err(StoreError::UnknownUser(username.to_string()));
        }

        let now = Utc::now();
        let token = loop {
            let token = token::generate();
            let digest = TokenDigest::of(&token);
            match sessions.entry(digest) {
                Entry::Occupied(_) => {
                    warn!("Session token collision, regenerating");
                    continue;
                }
                Entry::Vacant(slot) => {
                    slot.insert(SessionRecord {
                        digest,
                        username: username.to_string(),
                        created_at: now,
                        expires_at: add_saturating(now, lifetime),
                        last_accessed_at: now,
                    });
                    debug!(
                        "Created session {} for {}",
                        digest.fingerprint(),
                        username
                    );
                    break token;
                }
            }
        };

        self.metrics.sessions.set(sessions.len() as i64);
        self.metrics.sessions_created_total.inc();
        Ok(token)
    }

    /// Look up a session. `None` when the token is unknown or expired; the
    /// two cases are deliberately indistinguishable.
    ///
    /// Under the sliding policy a hit also renews the session. The lookup and
    /// the renewal happen under one upgradable read lock that is upgraded in
    /// place, so no writer can slip in between and two concurrent renewals of
    /// the same token cannot lose an update. Plain readers are not blocked
    /// until the upgrade.
    pub fn validate_session(&self, token: &str) -> Option<SessionInfo> {
        let digest = TokenDigest::of(token);
        let now = Utc::now();

        match self.settings.expiration {
            ExpirationPolicy::Fixed => {
                let sessions = self.sessions_read();
                sessions
                    .get(&digest)
                    .filter(|s| !s.is_expired_at(now))
                    .map(SessionRecord::info)
            }
            ExpirationPolicy::Sliding { idle_timeout } => {
                let sessions = self.sessions_upgradable();
                match sessions.get(&digest) {
                    Some(s) if !s.is_expired_at(now) => {}
                    _ => return None,
                }

                let mut sessions = sessions.map(RwLockUpgradableReadGuard::upgrade);
                let record = sessions.get_mut(&digest)?;
                let cap = add_saturating(record.created_at, self.settings.max_lifetime);
                let renewed = add_saturating(now, to_chrono(idle_timeout)).min(cap);
                // Never move backwards if a later renewal already landed.
                record.expires_at = record.expires_at.max(renewed);
                record.last_accessed_at = record.last_accessed_at.max(now);
                Some(record.info())
            }
        }
    }

    /// End a session. Idempotent.
    pub fn destroy_session(&self, token: &str) {
        let digest = TokenDigest::of(token);
        let mut sessions = self.sessions_write();
        if sessions.remove(&digest).is_some() {
            self.metrics.sessions.set(sessions.len() as i64);
            self.metrics.sessions_destroyed_total.inc();
            debug!("Destroyed session {}", digest.fingerprint());
        }
    }

    /// End every session belonging to `username` ("log out everywhere").
    /// Returns the number of sessions removed.
    pub fn destroy_user_sessions(&self, username: &str) -> usize {
        let mut sessions = self.sessions_write();
        let before = sessions.len();
        sessions.retain(|_, s| s.username != username);
        let removed = before - sessions.len();

        self.metrics.sessions.set(sessions.len() as i64);
        self.metrics.sessions_destroyed_total.inc_by(removed as u64);
        if removed > 0 {
            info!("Destroyed {} sessions for {}", removed, username);
        }
        removed
    }

    /// Remove every session with `now >= expires_at`. Returns the count removed.
    pub fn sweep_expired(&self) -> usize {
        self.sweep(None)
    }

    /// Abortable [`sweep_expired`](Self::sweep_expired): `cancel` is checked
    /// before each batch, and sessions already removed stay removed.
    pub fn sweep_expired_until(&self, cancel: &CancellationToken) -> usize {
        self.sweep(Some(cancel))
    }

    // Candidates are collected under the read lock so validators keep running
    // during the full scan. Removal happens in batches of `sweep_batch_size`,
    // releasing the write lock between batches; each candidate is re-checked
    // under the write lock before removal.
    fn sweep(&self, cancel: Option<&CancellationToken>) -> usize {
        let now = Utc::now();
        let candidates: Vec<TokenDigest> = {
            let sessions = self.sessions_read();
            sessions
                .iter()
                .filter(|(_, s)| s.is_expired_at(now))
                .map(|(digest, _)| *digest)
                .collect()
        };

        let mut removed = 0;
        for batch in candidates.chunks(self.settings.sweep_batch_size) {
            if cancel.is_some_and(CancellationToken::is_cancelled) {
                info!(
                    "Sweep cancelled after removing {} of {} expired sessions",
                    removed,
                    candidates.len()
                );
                break;
            }

            let mut sessions = self.sessions_write();
            for digest in batch {
                if sessions.get(digest).is_some_and(|s| s.is_expired_at(now)) {
                    sessions.remove(digest);
                    removed += 1;
                }
            }
            self.metrics.sessions.set(sessions.len() as i64);
            drop(sessions);
            std::thread::yield_now();
        }

        self.metrics.sessions_expired_total.inc_by(removed as u64);
        if removed > 0 {
            debug!("Swept {} expired sessions", removed);
        }
        removed
    }

    pub fn session_count(&self) -> usize {
        self.sessions_read().len()
    }
}
