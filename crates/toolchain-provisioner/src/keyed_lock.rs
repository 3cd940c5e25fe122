//! Async mutual exclusion scoped to a single key.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// One independent async mutex per key, created on first use.
///
/// Holding the lock for one key never blocks callers of another key.
/// Entries are kept for the lifetime of the `KeyedLock`.
#[derive(Debug)]
pub struct KeyedLock<K> {
    locks: Mutex<HashMap<K, Arc<AsyncMutex<()>>>>,
}

impl<K> Default for KeyedLock<K> {
    fn default() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash + Clone> KeyedLock<K> {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, key: &K) -> Arc<AsyncMutex<()>> {
        // The map mutex is only held to look up or insert a slot, never across an await.
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Wait for exclusive access to `key`.
    pub async fn lock(&self, key: &K) -> OwnedMutexGuard<()> {
        self.slot(key).lock_owned().await
    }

    /// Whether some caller currently holds the lock for `key`.
    pub fn is_locked(&self, key: &K) -> bool {
        let locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.get(key).is_some_and(|slot| slot.try_lock().is_err())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_key_is_exclusive() {
        let locks = Arc::new(KeyedLock::new());
        let guard = locks.lock(&"a").await;
        assert!(locks.is_locked(&"a"));

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.lock(&"a").await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        contender.await.unwrap();
        assert!(!locks.is_locked(&"a"));
    }

    #[tokio::test]
    async fn test_different_keys_are_independent() {
        let locks = KeyedLock::new();
        let _a = locks.lock(&"a").await;

        let b = tokio::time::timeout(Duration::from_millis(100), locks.lock(&"b")).await;
        assert!(b.is_ok(), "lock on another key must not wait");
    }

    #[test]
    fn test_unknown_key_is_unlocked() {
        let locks: KeyedLock<u8> = KeyedLock::new();
        assert!(!locks.is_locked(&7));
    }
}
