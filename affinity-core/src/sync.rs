//! Per-user write serialization.
//!
//! Every state-mutating operation of every component runs inside its
//! user's slot for the whole read-modify-write. Slots live in a sharded
//! map, so two different users never wait on each other. A slot is dropped
//! once nobody holds or waits on it, so the map only grows with the number
//! of users active at the same time.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::types::UserId;

/// Sharded registry of per-user mutexes.
#[derive(Debug, Default)]
pub struct UserLocks {
    slots: DashMap<UserId, Arc<Mutex<()>>>,
}

impl UserLocks {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` while holding `user_id`'s slot.
    ///
    /// Not re-entrant: calling `with_user` for the same user from inside `f`
    /// deadlocks.
    pub fn with_user<T>(&self, user_id: UserId, f: impl FnOnce() -> T) -> T {
        let out = {
            let slot = self.slot(user_id);
            let _guard = slot.lock();
            f()
        };
        // Slot clones are taken under the shard lock, so a count of one means
        // no other caller holds or waits on this slot.
        self.slots.remove_if(&user_id, |_, slot| Arc::strong_count(slot) == 1);
        out
    }

    fn slot(&self, user_id: UserId) -> Arc<Mutex<()>> {
        // Clone out of the map so the shard lock is released before we block
        // on the user's own mutex.
        Arc::clone(self.slots.entry(user_id).or_default().value())
    }

    /// Number of users with a live slot.
    #[must_use]
    pub fn tracked_users(&self) -> usize {
        self.slots.len()
    }
}
