//! Snapshot / restore and state-file round trips

mod common;

use common::{hash_for, store_with_users};
use sessionguard::{AuthStore, Config, JsonFilePersister, Persister, StoreError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[test]
fn test_snapshot_restore_preserves_results() {
    let store = store_with_users(&Config::default(), 10);
    let tokens: Vec<(String, String)> = (0..10)
        .map(|i| {
            let user = format!("user-{}", i);
            let token = store.create_session(&user).unwrap();
            (user, token)
        })
        .collect();
    let destroyed = store.create_session("user-0").unwrap();
    store.destroy_session(&destroyed);

    let mut fresh = AuthStore::new(&Config::default());
    fresh.restore(store.snapshot());

    for (user, token) in &tokens {
        assert_eq!(
            fresh.verify_credentials(user, hash_for(user).as_bytes()),
            store.verify_credentials(user, hash_for(user).as_bytes())
        );
        assert!(!fresh.verify_credentials(user, b"wrong"));
        assert_eq!(fresh.validate_session(token), store.validate_session(token));
    }
    assert!(fresh.validate_session(&destroyed).is_none());
    assert_eq!(fresh.user_count(), 10);
    assert_eq!(fresh.session_count(), 10);
}

#[test]
fn test_state_file_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    let config = Config::default();

    let token = {
        let store = AuthStore::open(&config, Arc::new(JsonFilePersister::new(&path))).unwrap();
        store.add_user("alice", hash_for("alice")).unwrap();
        let token = store.create_session("alice").unwrap();
        store.flush().unwrap();
        token
    };

    let raw = std::fs::read_to_string(&path).unwrap();
    assert!(!raw.contains(&token), "state file must not contain raw tokens");

    let reopened = AuthStore::open(&config, Arc::new(JsonFilePersister::new(&path))).unwrap();
    assert!(reopened.verify_credentials("alice", hash_for("alice").as_bytes()));
    assert_eq!(reopened.validate_session(&token).unwrap().username, "alice");
}

#[test]
fn test_open_with_corrupt_state_aborts() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    std::fs::write(&path, "garbage").unwrap();

    let result = AuthStore::open(&Config::default(), Arc::new(JsonFilePersister::new(&path)));
    assert!(matches!(result, Err(StoreError::Persistence(_))));
}

#[test]
fn test_concurrent_flushes_keep_newest_state() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    let persister = Arc::new(JsonFilePersister::new(&path));
    let store = Arc::new(AuthStore::with_persister(&Config::default(), persister.clone()));

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let store = store.clone();
            thread::spawn(move || {
                for j in 0..10 {
                    let name = format!("u{}-{}", i, j);
                    store.add_user(&name, hash_for(&name)).unwrap();
                    store.flush().unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    // Each writer's last flush snapshots after its last insert, so whichever
    // flush saved last must carry every user.
    let saved = persister.load().unwrap().unwrap();
    assert_eq!(saved.users.len(), 80);
}

#[test]
fn test_expired_sessions_not_revived_by_reload() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    let config = Config::default();

    let store = AuthStore::open(&config, Arc::new(JsonFilePersister::new(&path))).unwrap();
    store.add_user("alice", hash_for("alice")).unwrap();
    let short = store
        .create_session_with_ttl("alice", Duration::from_millis(20))
        .unwrap();
    store.flush().unwrap();
    drop(store);

    thread::sleep(Duration::from_millis(50));
    let reopened = AuthStore::open(&config, Arc::new(JsonFilePersister::new(&path))).unwrap();
    assert!(reopened.validate_session(&short).is_none());
    assert_eq!(reopened.session_count(), 0);
}
