//! Parallel access safety tests
//!
//! Verifies that concurrent operations on one store don't lose records,
//! hand out colliding tokens, expose torn records, or deadlock.

mod common;

use common::{hash_for, store_with_users, within};
use sessionguard::{AuthStore, Config, ExpirationPolicy};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

const THREADS: usize = 64;

#[test]
fn test_parallel_create_sessions_distinct_users() {
    let store = Arc::new(store_with_users(&Config::default(), THREADS));
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|i| {
            let store = store.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                let user = format!("user-{}", i);
                let token = store.create_session(&user).expect("user exists");
                (user, token)
            })
        })
        .collect();

    let results: Vec<(String, String)> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let tokens: HashSet<&String> = results.iter().map(|(_, t)| t).collect();
    assert_eq!(tokens.len(), THREADS, "every token must be distinct");
    assert_eq!(store.session_count(), THREADS, "no session may be lost");

    for (user, token) in &results {
        let info = store.validate_session(token).expect("fresh session is valid");
        assert_eq!(&info.username, user);
    }
}

#[test]
fn test_parallel_create_many_per_thread() {
    let store = Arc::new(store_with_users(&Config::default(), 8));
    let per_thread = 500;

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let store = store.clone();
            thread::spawn(move || {
                (0..per_thread)
                    .map(|_| store.create_session(&format!("user-{}", i)).unwrap())
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut all = HashSet::new();
    for h in handles {
        all.extend(h.join().unwrap());
    }
    assert_eq!(all.len(), 8 * per_thread);
    assert_eq!(store.session_count(), 8 * per_thread);
}

#[test]
fn test_validate_races_destroy_without_torn_reads() {
    let store = Arc::new(store_with_users(&Config::default(), 1));
    let token = store.create_session("user-0").unwrap();
    let done = Arc::new(AtomicBool::new(false));

    let reader = {
        let store = store.clone();
        let token = token.clone();
        let done = done.clone();
        thread::spawn(move || {
            let mut seen_invalid = false;
            while !done.load(Ordering::SeqCst) {
                match store.validate_session(&token) {
                    Some(info) => {
                        assert!(!seen_invalid, "session came back after being destroyed");
                        assert_eq!(info.username, "user-0");
                        assert!(info.expires_at > info.created_at);
                    }
                    None => seen_invalid = true,
                }
            }
            assert!(store.validate_session(&token).is_none());
        })
    };

    thread::sleep(Duration::from_millis(20));
    store.destroy_session(&token);
    thread::sleep(Duration::from_millis(20));
    done.store(true, Ordering::SeqCst);
    reader.join().unwrap();
}

#[test]
fn test_sliding_validations_never_lose_renewals() {
    let config = Config {
        expiration: ExpirationPolicy::Sliding {
            idle_timeout: Duration::from_secs(60),
        },
        ..Config::default()
    };
    let store = Arc::new(store_with_users(&config, 1));
    let token = store.create_session("user-0").unwrap();
    let start = store.validate_session(&token).unwrap();

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let store = store.clone();
            let token = token.clone();
            thread::spawn(move || {
                let mut last = None;
                for _ in 0..200 {
                    let info = store.validate_session(&token).expect("still valid");
                    if let Some(prev) = last {
                        assert!(info.expires_at >= prev, "expiry moved backwards");
                    }
                    last = Some(info.expires_at);
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let end = store.validate_session(&token).unwrap();
    assert!(end.expires_at >= start.expires_at);
    assert_eq!(store.session_count(), 1);
}

#[test]
fn test_lock_order_stress_no_deadlock() {
    let store = Arc::new(store_with_users(&Config::default(), 16));

    within(Duration::from_secs(30), move || {
        let stop = Arc::new(AtomicBool::new(false));
        let mut handles = Vec::new();

        // create: users read -> sessions write
        for i in 0..8 {
            let store = store.clone();
            let stop = stop.clone();
            handles.push(thread::spawn(move || {
                let user = format!("user-{}", i);
                while !stop.load(Ordering::SeqCst) {
                    let token = store.create_session(&user).unwrap();
                    assert!(store.validate_session(&token).is_some());
                    store.destroy_session(&token);
                }
            }));
        }

        // snapshot: users read -> sessions read
        for _ in 0..4 {
            let store = store.clone();
            let stop = stop.clone();
            handles.push(thread::spawn(move || {
                while !stop.load(Ordering::SeqCst) {
                    let snap = store.snapshot();
                    assert!(snap.users.len() >= 16);
                }
            }));
        }

        // user churn with cascade: users write -> sessions write
        {
            let store = store.clone();
            let stop = stop.clone();
            handles.push(thread::spawn(move || {
                while !stop.load(Ordering::SeqCst) {
                    let _ = store.add_user("churn", hash_for("churn"));
                    let _ = store.create_session("churn");
                    store.remove_user("churn");
                }
            }));
        }

        // sweeps and credential checks
        {
            let store = store.clone();
            let stop = stop.clone();
            handles.push(thread::spawn(move || {
                while !stop.load(Ordering::SeqCst) {
                    store.sweep_expired();
                    assert!(store.verify_credentials("user-3", hash_for("user-3").as_bytes()));
                }
            }));
        }

        thread::sleep(Duration::from_millis(500));
        stop.store(true, Ordering::SeqCst);
        for h in handles {
            h.join().unwrap();
        }
    });
}

#[test]
fn test_cascade_leaves_no_orphans_under_concurrency() {
    let store = Arc::new(AuthStore::default());

    within(Duration::from_secs(30), move || {
        for round in 0..50 {
            let name = format!("victim-{}", round);
            store.add_user(&name, hash_for(&name)).unwrap();

            let creators: Vec<_> = (0..4)
                .map(|_| {
                    let store = store.clone();
                    let name = name.clone();
                    thread::spawn(move || {
                        let mut tokens = Vec::new();
                        for _ in 0..50 {
                            if let Ok(t) = store.create_session(&name) {
                                tokens.push(t);
                            }
                        }
                        tokens
                    })
                })
                .collect();

            thread::sleep(Duration::from_micros(200));
            store.remove_user(&name);

            for c in creators {
                for token in c.join().unwrap() {
                    assert!(
                        store.validate_session(&token).is_none(),
                        "session outlived its removed user"
                    );
                }
            }
        }
        assert_eq!(store.session_count(), 0);
    });
}
