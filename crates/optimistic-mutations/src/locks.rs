//! Per-key async locks.
//!
//! Each key gets its own `tokio::sync::Mutex`, created on first use and
//! dropped from the registry when the last holder releases it with nobody
//! waiting. An entry whose only waiter was cancelled is pruned on the next
//! [`KeyedLocks::lock`].

use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::trace;

type Registry<K> = Arc<Mutex<HashMap<K, Arc<AsyncMutex<()>>>>>;

pub struct KeyedLocks<K> {
    entries: Registry<K>,
}

impl<K> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<K> KeyedLocks<K>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`. Waiters are served in FIFO order.
    pub async fn lock(&self, key: K) -> KeyedGuard<K> {
        let mutex = {
            let mut entries = self.entries.lock();
            // Only the registry holds an idle entry.
            entries.retain(|_, mutex| Arc::strong_count(mutex) > 1);
            Arc::clone(entries.entry(key.clone()).or_default())
        };
        let guard = mutex.lock_owned().await;
        trace!(key = ?key, "Keyed lock acquired");
        KeyedGuard {
            key,
            entries: Arc::clone(&self.entries),
            guard: Some(guard),
        }
    }

    /// Number of keys currently held or waited on.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

/// Exclusive access to one key, released on drop.
pub struct KeyedGuard<K>
where
    K: Eq + Hash,
{
    key: K,
    entries: Registry<K>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl<K> KeyedGuard<K>
where
    K: Eq + Hash,
{
    pub fn key(&self) -> &K {
        &self.key
    }
}

impl<K> Drop for KeyedGuard<K>
where
    K: Eq + Hash,
{
    fn drop(&mut self) {
        // Registry lock first, so nobody can clone the entry between the
        // release and the count check.
        let mut entries = self.entries.lock();
        drop(self.guard.take());
        let idle = entries
            .get(&self.key)
            .is_some_and(|mutex| Arc::strong_count(mutex) == 1);
        if idle {
            entries.remove(&self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::sleep;

    #[tokio::test]
    async fn same_key_is_exclusive() {
        let locks = Arc::new(KeyedLocks::new());
        let order = Arc::new(Mutex::new(Vec::new()));

        let first = locks.lock("task-1").await;

        let waiter = {
            let locks = Arc::clone(&locks);
            let order = Arc::clone(&order);
            tokio::spawn(async move {
                let _guard = locks.lock("task-1").await;
                order.lock().push("second");
            })
        };

        sleep(Duration::from_millis(50)).await;
        order.lock().push("first");
        drop(first);

        waiter.await.unwrap();
        assert_eq!(*order.lock(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn distinct_keys_do_not_block() {
        let locks = KeyedLocks::new();
        let _a = locks.lock(1u64).await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.lock(2u64)).await;
        assert!(b.is_ok());
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn entries_are_removed_when_idle() {
        let locks = Arc::new(KeyedLocks::new());

        let guard = locks.lock("x".to_string()).await;
        let waiter = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                let guard = locks.lock("x".to_string()).await;
                assert_eq!(guard.key(), "x");
            })
        };
        sleep(Duration::from_millis(20)).await;

        drop(guard);
        assert_eq!(locks.len(), 1);

        waiter.await.unwrap();
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn cancelled_waiter_entry_is_pruned() {
        let locks = KeyedLocks::new();

        let holder = locks.lock("a").await;
        let mut waiter = Box::pin(locks.lock("a"));
        assert!(tokio::time::timeout(Duration::from_millis(20), &mut waiter)
            .await
            .is_err());

        // The holder leaves while the waiter still counts, then the waiter
        // gives up before it is polled again.
        drop(holder);
        drop(waiter);
        assert_eq!(locks.len(), 1);

        let other = locks.lock("b").await;
        assert_eq!(locks.len(), 1);
        assert_eq!(other.key(), &"b");
    }
}
