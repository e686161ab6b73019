use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// One async lock per key, created on demand and dropped when unused
pub struct KeyedLocks<K> {
    locks: Mutex<HashMap<K, Slot>>,
}

/// A key's lock and the number of callers holding or waiting on it
#[derive(Default)]
struct Slot {
    mutex: Arc<AsyncMutex<()>>,
    users: usize,
}

impl<K: Eq + Hash + Copy> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash + Copy> KeyedLocks<K> {
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Waits until no other holder of `key` remains, in arrival order
    ///
    /// Dropping the returned future before it resolves gives up the wait
    /// and releases the key if nobody else uses it.
    pub async fn lock(&self, key: K) -> KeyGuard<'_, K> {
        let (mutex, registration) = self.register(key);
        let guard = mutex.lock_owned().await;
        KeyGuard {
            _guard: guard,
            _registration: registration,
        }
    }

    fn register(&self, key: K) -> (Arc<AsyncMutex<()>>, Registration<'_, K>) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        let slot = locks.entry(key).or_default();
        slot.users += 1;
        let mutex = Arc::clone(&slot.mutex);
        (mutex, Registration { owner: self, key })
    }

    fn release(&self, key: K) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(slot) = locks.get_mut(&key) {
            slot.users -= 1;
            if slot.users == 0 {
                locks.remove(&key);
            }
        }
    }

    /// Number of keys with a live lock
    pub fn active_keys(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Counts one caller against a key until dropped
struct Registration<'a, K: Eq + Hash + Copy> {
    owner: &'a KeyedLocks<K>,
    key: K,
}

impl<K: Eq + Hash + Copy> Drop for Registration<'_, K> {
    fn drop(&mut self) {
        self.owner.release(self.key);
    }
}

/// Exclusive hold on one key; fields drop in order, unlocking before release
pub struct KeyGuard<'a, K: Eq + Hash + Copy> {
    _guard: OwnedMutexGuard<()>,
    _registration: Registration<'a, K>,
}
