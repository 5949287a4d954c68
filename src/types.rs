//! Core record types held by the store and exchanged with persisters

use crate::error::StoreError;
use crate::token::TokenDigest;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

/// On-disk snapshot format version
pub const SNAPSHOT_VERSION: u32 = 1;

/// Longest accepted username, in bytes
pub const MAX_USERNAME_LEN: usize = 256;

/// Opaque password digest.
///
/// The hashing scheme belongs to the caller; the store only compares these
/// bytes (in constant time) and never hands them back out of a verification.
#[derive(Clone)]
pub struct PasswordHash(Zeroizing<Vec<u8>>);

impl PasswordHash {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(Zeroizing::new(bytes.into()))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Constant-time comparison against a caller-supplied digest.
    /// Only the length comparison is not constant-time.
    pub fn matches(&self, candidate: &[u8]) -> bool {
        bool::from(self.0.as_slice().ct_eq(candidate))
    }
}

impl PartialEq for PasswordHash {
    fn eq(&self, other: &Self) -> bool {
        self.matches(other.as_bytes())
    }
}

impl Eq for PasswordHash {}

impl From<Vec<u8>> for PasswordHash {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(bytes)
    }
}

impl From<&[u8]> for PasswordHash {
    fn from(bytes: &[u8]) -> Self {
        Self::new(bytes.to_vec())
    }
}

impl fmt::Debug for PasswordHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PasswordHash(<redacted, {} bytes>)", self.0.len())
    }
}

impl Serialize for PasswordHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.as_bytes()))
    }
}

impl<'de> Deserialize<'de> for PasswordHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = Zeroizing::new(String::deserialize(deserializer)?);
        let bytes = hex::decode(s.as_str()).map_err(serde::de::Error::custom)?;
        Ok(Self::new(bytes))
    }
}

/// A registered user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub username: String,
    pub password_hash: PasswordHash,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A live session, keyed in the store by the digest of its token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub digest: TokenDigest,
    pub username: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
}

impl SessionRecord {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            username: self.username.clone(),
            created_at: self.created_at,
            expires_at: self.expires_at,
            last_accessed_at: self.last_accessed_at,
        }
    }
}

/// Copy of a valid session returned to callers of `validate_session`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub username: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
}

/// Consistent copy of both maps, produced by `snapshot()` and consumed by
/// `restore()`. Contains token digests only, never tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub version: u32,
    pub taken_at: DateTime<Utc>,
    pub users: Vec<UserRecord>,
    pub sessions: Vec<SessionRecord>,
}

impl Default for StoreSnapshot {
    fn default() -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            taken_at: Utc::now(),
            users: Vec::new(),
            sessions: Vec::new(),
        }
    }
}

/// Reject empty, oversized, or control-character usernames.
pub fn validate_username(username: &str) -> Result<(), StoreError> {
    if username.is_empty() {
        return Err(StoreError::InvalidUsername(
            "username must not be empty".to_string(),
        ));
    }
    if username.len() > MAX_USERNAME_LEN {
        return Err(StoreError::InvalidUsername(format!(
            "username exceeds {} bytes",
            MAX_USERNAME_LEN
        )));
    }
    if username.chars().any(char::is_control) {
        return Err(StoreError::InvalidUsername(
            "username must not contain control characters".to_string(),
        ));
    }
    Ok(())
}
