//! sessionguard - concurrent in-process credential and session store
//!
//! This library provides the [`AuthStore`] (username → password hash and
//! session token → session record, each behind its own lock, plus a lock on
//! the backing persister), the persistence interface, and a background
//! expiry sweeper.

pub mod config;
pub mod digest;
pub mod error;
pub mod metrics;
pub mod persist;
pub mod store;
pub mod sweeper;
pub mod token;
pub mod types;

pub use config::{Config, ExpirationPolicy};
pub use error::StoreError;
pub use persist::{JsonFilePersister, MemoryPersister, PersistError, Persister};
pub use store::AuthStore;
pub use sweeper::Sweeper;
pub use types::{PasswordHash, SessionInfo, StoreSnapshot};
