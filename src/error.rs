//! Store error types

use crate::persist::PersistError;
use thiserror::Error;

/// Errors surfaced by [`AuthStore`](crate::AuthStore) operations.
///
/// Invalid or expired tokens and failed credential checks are not errors:
/// they are reported as `None` / `false` so callers cannot tell an unknown
/// user or a never-issued token apart from a wrong password or an expired one.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("user already exists: {0}")]
    DuplicateUser(String),

    #[error("unknown user: {0}")]
    UnknownUser(String),

    #[error("invalid username: {0}")]
    InvalidUsername(String),

    #[error("persistence error: {0}")]
    Persistence(#[from] PersistError),
}

impl StoreError {
    /// Short machine-readable code, logged as the `code` field by the CLI.
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::DuplicateUser(_) => "DuplicateUser",
            StoreError::UnknownUser(_) => "UnknownUser",
            StoreError::InvalidUsername(_) => "InvalidUsername",
            StoreError::Persistence(_) => "Persistence",
        }
    }
}
