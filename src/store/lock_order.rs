//! Lock ranks for the store's three locks.
//!
//! Crate-wide acquisition order: `Users` → `Sessions` → `Backing`.
//! Every guard the store takes is wrapped in [`Ranked`]. In debug builds each
//! thread records which ranks it currently holds, and acquiring a lock while
//! already holding one of equal or higher rank panics *before* blocking, so an
//! inverted call site fails loudly in tests instead of deadlocking in
//! production. Release order is unconstrained.

use std::ops::{Deref, DerefMut};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub(crate) enum LockRank {
    Users = 0,
    Sessions = 1,
    Backing = 2,
}

#[cfg(debug_assertions)]
thread_local! {
    static HELD: std::cell::Cell<u8> = const { std::cell::Cell::new(0) };
}

/// Marks one rank as held by the current thread until dropped.
struct RankToken {
    #[cfg_attr(not(debug_assertions), allow(dead_code))]
    rank: LockRank,
}

impl RankToken {
    fn enter(rank: LockRank) -> Self {
        #[cfg(debug_assertions)]
        HELD.with(|held| {
            let mask = held.get();
            let bit = 1u8 << rank as u8;
            // bits for this rank and every rank above it
            let at_or_above = !(bit - 1);
            assert!(
                mask & at_or_above == 0,
                "lock order violation: acquiring {:?} while holding ranks {:#05b}",
                rank,
                mask
            );
            held.set(mask | bit);
        });
        Self { rank }
    }
}

impl Drop for RankToken {
    fn drop(&mut self) {
        #[cfg(debug_assertions)]
        HELD.with(|held| held.set(held.get() & !(1u8 << self.rank as u8)));
    }
}

/// A lock guard tagged with its rank.
pub(crate) struct Ranked<G> {
    guard: G,
    token: RankToken,
}

impl<G> Ranked<G> {
    /// Check the rank, then run `lock` to block on the underlying lock.
    pub(crate) fn acquire(rank: LockRank, lock: impl FnOnce() -> G) -> Self {
        let token = RankToken::enter(rank);
        Self {
            guard: lock(),
            token,
        }
    }

    /// Convert the guard without releasing the rank, e.g. an upgradable
    /// read guard into a write guard.
    pub(crate) fn map<H>(self, f: impl FnOnce(G) -> H) -> Ranked<H> {
        let Ranked { guard, token } = self;
        Ranked {
            guard: f(guard),
            token,
        }
    }
}

impl<G: Deref> Deref for Ranked<G> {
    type Target = G::Target;

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl<G: DerefMut> DerefMut for Ranked<G> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::{Mutex, RwLock};

    #[test]
    fn test_rank_values_follow_acquisition_order() {
        assert_eq!(LockRank::Users as u8, 0);
        assert_eq!(LockRank::Sessions as u8, 1);
        assert_eq!(LockRank::Backing as u8, 2);
    }

    #[test]
    fn test_ordered_acquisition_is_allowed() {
        let users = RwLock::new(1);
        let sessions = RwLock::new(2);
        let backing = Mutex::new(3);

        let u = Ranked::acquire(LockRank::Users, || users.read());
        let s = Ranked::acquire(LockRank::Sessions, || sessions.write());
        let b = Ranked::acquire(LockRank::Backing, || backing.lock());
        assert_eq!(*u + *s + *b, 6);
    }

    #[test]
    fn test_release_order_is_unconstrained() {
        let users = RwLock::new(());
        let sessions = RwLock::new(());

        let u = Ranked::acquire(LockRank::Users, || users.read());
        let s = Ranked::acquire(LockRank::Sessions, || sessions.read());
        drop(u);
        drop(s);

        // Both ranks released, so starting over from the top is fine.
        let _u = Ranked::acquire(LockRank::Users, || users.write());
    }

    #[test]
    fn test_map_keeps_rank() {
        let sessions = RwLock::new(0);
        let guard = Ranked::acquire(LockRank::Sessions, || sessions.upgradable_read());
        let mut guard = guard.map(parking_lot::RwLockUpgradableReadGuard::upgrade);
        *guard += 1;
        drop(guard);
        assert_eq!(*sessions.read(), 1);
    }

    #[cfg(debug_assertions)]
    #[test]
    fn test_inverted_order_panics() {
        let users = RwLock::new(());
        let sessions = RwLock::new(());

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _s = Ranked::acquire(LockRank::Sessions, || sessions.read());
            let _u = Ranked::acquire(LockRank::Users, || users.read());
        }));
        assert!(result.is_err());

        // The unwind released the sessions rank.
        let _u = Ranked::acquire(LockRank::Users, || users.read());
    }

    #[cfg(debug_assertions)]
    #[test]
    fn test_reentrant_acquisition_panics() {
        let sessions = RwLock::new(());
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _a = Ranked::acquire(LockRank::Sessions, || sessions.read());
            let _b = Ranked::acquire(LockRank::Sessions, || sessions.read());
        }));
        assert!(result.is_err());
    }
}
