//! Keyed async locks.
//!
//! SQLite offers no per-row pessimistic locks, so the kernel serializes its
//! critical sections in the application layer: one async mutex per key
//! (parent run for spawns, group for joins, subtree root for cancellation).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

#[derive(Clone, Default)]
pub struct KeyedLocks {
    inner: Arc<Mutex<HashMap<Uuid, Arc<AsyncMutex<()>>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for `key`, creating it on first use. The guard is
    /// owned so it can be held across await points.
    pub async fn acquire(&self, key: Uuid) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().expect("lock table poisoned");
            Arc::clone(map.entry(key).or_default())
        };
        lock.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_same_key_serializes() {
        let locks = KeyedLocks::new();
        let key = Uuid::new_v4();
        let inside = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let locks = locks.clone();
            let inside = Arc::clone(&inside);
            handles.push(tokio::spawn(async move {
                let _guard = locks.acquire(key).await;
                // While the guard is held, nobody else may be inside.
                assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                tokio::task::yield_now().await;
                assert_eq!(inside.fetch_sub(1, Ordering::SeqCst), 1);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_different_keys_do_not_block() {
        let locks = KeyedLocks::new();
        let a = locks.acquire(Uuid::new_v4()).await;
        // A second key must be acquirable while the first guard is held.
        let b = locks.acquire(Uuid::new_v4()).await;
        drop(a);
        drop(b);
    }
}
