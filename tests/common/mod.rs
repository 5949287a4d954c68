//! Shared helpers for integration tests

#![allow(dead_code)]

use sessionguard::{AuthStore, Config, PasswordHash};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

/// Deterministic per-user digest for tests.
pub fn hash_for(username: &str) -> PasswordHash {
    PasswordHash::new(format!("digest:{}", username).into_bytes())
}

/// Store pre-populated with `n` users named `user-0` .. `user-{n-1}`.
pub fn store_with_users(config: &Config, n: usize) -> AuthStore {
    let store = AuthStore::new(config);
    for i in 0..n {
        let name = format!("user-{}", i);
        store
            .add_user(&name, hash_for(&name))
            .expect("fresh usernames");
    }
    store
}

/// Run `f` on a helper thread and panic if it does not finish in `limit`.
/// Turns a deadlock into a test failure instead of a hang.
pub fn within<T, F>(limit: Duration, f: F) -> T
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = tx.send(f());
    });
    match rx.recv_timeout(limit) {
        Ok(value) => value,
        Err(mpsc::RecvTimeoutError::Timeout) => {
            panic!("did not complete within {:?} (deadlock?)", limit)
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => panic!("worker thread panicked"),
    }
}
