//! Credential operations: the username → password-hash map

use super::AuthStore;
use crate::error::StoreError;
use crate::types::{validate_username, PasswordHash, UserRecord};
use chrono::Utc;
use std::collections::hash_map::Entry;
use tracing::{debug, info};

impl AuthStore {
    /// Register a new user. Insert-only: an existing username is rejected
    /// with `DuplicateUser`; use [`set_password`](Self::set_password) to
    /// change a password.
    pub fn add_user(&self, username: &str, password_hash: PasswordHash) -> Result<(), StoreError> {
        validate_username(username)?;

        let mut users = self.users_write();
        match users.entry(username.to_string()) {
            Entry::Occupied(_) => Err(StoreError::DuplicateUser(username.to_string())),
            Entry::Vacant(slot) => {
                let now = Utc::now();
                slot.insert(UserRecord {
                    username: username.to_string(),
                    password_hash,
                    created_at: now,
                    updated_at: now,
                });
                self.metrics.users.set(users.len() as i64);
                info!("Added user {}", username);
                Ok(())
            }
        }
    }

    /// Replace an existing user's password hash.
    ///
    /// With `revoke_on_password_change` the user's live sessions are destroyed
    /// in the same critical section.
    pub fn set_password(
        &self,
        username: &str,
        password_hash: PasswordHash,
    ) -> Result<(), StoreError> {
        if self.settings.revoke_on_password_change {
            let (mut users, mut sessions) = self.write_both();
            let user = users
                .get_mut(username)
                .ok_or_else(|| StoreError::UnknownUser(username.to_string()))?;
            user.password_hash = password_hash;
            user.updated_at = Utc::now();

            let before = sessions.len();
            sessions.retain(|_, s| s.username != username);
            let revoked = before - sessions.len();
            self.metrics.sessions.set(sessions.len() as i64);
            self.metrics.sessions_destroyed_total.inc_by(revoked as u64);
            info!(
                "Password changed for {}, revoked {} sessions",
                username, revoked
            );
        } else {
            let mut users = self.users_write();
            let user = users
                .get_mut(username)
                .ok_or_else(|| StoreError::UnknownUser(username.to_string()))?;
            user.password_hash = password_hash;
            user.updated_at = Utc::now();
            info!("Password changed for {}", username);
        }
        Ok(())
    }

    /// Check a password hash against the stored one in constant time.
    ///
    /// Unknown users report `false`, indistinguishable from a wrong hash.
    pub fn verify_credentials(&self, username: &str, password_hash: &[u8]) -> bool {
        let matched = {
            let users = self.users_read();
            match users.get(username) {
                Some(user) => user.password_hash.matches(password_hash),
                None => {
                    // Burn a comparable amount of work on the miss path.
                    let _ = PasswordHash::new(vec![0u8; password_hash.len()])
                        .matches(password_hash);
                    false
                }
            }
        };

        let result = if matched { "match" } else { "mismatch" };
        self.metrics
            .credential_checks_total
            .with_label_values(&[result])
            .inc();
        debug!("Credential check for {}: {}", username, result);
        matched
    }

    /// Delete a user. Idempotent; returns whether the user existed.
    ///
    /// With `cascade_on_remove` (the default) the user's sessions are removed
    /// under the same pair of write locks, so no session can outlive its user.
    pub fn remove_user(&self, username: &str) -> bool {
        if self.settings.cascade_on_remove {
            let (mut users, mut sessions) = self.write_both();
            if users.remove(username).is_none() {
                return false;
            }
            let before = sessions.len();
            sessions.retain(|_, s| s.username != username);
            let revoked = before - sessions.len();

            self.metrics.users.set(users.len() as i64);
            self.metrics.sessions.set(sessions.len() as i64);
            self.metrics.sessions_destroyed_total.inc_by(revoked as u64);
            info!("Removed user {} and {} sessions", username, revoked);
            true
        } else {
            let mut users = self.users_write();
            let existed = users.remove(username).is_some();
            self.metrics.users.set(users.len() as i64);
            if existed {
                info!("Removed user {}", username);
            }
            existed
        }
    }

    pub fn has_user(&self, username: &str) -> bool {
        self.users_read().contains_key(username)
    }

    pub fn user_count(&self) -> usize {
        self.users_read().len()
    }

    /// Sorted copy of all usernames.
    pub fn usernames(&self) -> Vec<String> {
        let mut names: Vec<String> = self.users_read().keys().cloned().collect();
        names.sort();
        names
    }
}
