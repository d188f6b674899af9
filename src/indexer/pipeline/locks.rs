use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type LockMap = Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>;

/// One async lock per index key, so updates to the same path never interleave
/// while different paths proceed independently. Entries live only while a
/// guard holds or awaits them.
#[derive(Clone, Default)]
pub struct PathLocks {
    inner: LockMap,
}

/// Held lock for one key. Dropping the last guard for a key removes its entry.
pub struct PathGuard {
    key: String,
    lock: Arc<AsyncMutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
    map: LockMap,
}

impl PathLocks {
    pub async fn lock(&self, key: &str) -> PathGuard {
        let lock = {
            let mut map = self
                .inner
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            map.entry(key.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        let guard = lock.clone().lock_owned().await;
        PathGuard {
            key: key.to_string(),
            lock,
            guard: Some(guard),
            map: self.inner.clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for PathGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut map = self
            .map
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // One reference in the map, one here: nobody else holds or awaits it.
        let idle = Arc::strong_count(&self.lock) == 2
            && map
                .get(&self.key)
                .is_some_and(|entry| Arc::ptr_eq(entry, &self.lock));
        if idle {
            map.remove(&self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn same_key_is_serialized() {
        let locks = PathLocks::default();
        let active = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..4 {
            let locks = locks.clone();
            let active = active.clone();
            let max_seen = max_seen.clone();
            tasks.push(tokio::spawn(async move {
                let _guard = locks.lock("lib/A.pm").await;
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn released_keys_are_evicted() {
        let locks = PathLocks::default();
        {
            let _a = locks.lock("lib/A.pm").await;
            let _b = locks.lock("lib/B.pm").await;
            assert_eq!(locks.len(), 2);
        }
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn entry_survives_while_another_task_waits() {
        let locks = PathLocks::default();
        let first = locks.lock("lib/A.pm").await;

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.lock("lib/A.pm").await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(first);
        assert_eq!(locks.len(), 1);

        waiter.await.unwrap();
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn different_keys_do_not_block() {
        let locks = PathLocks::default();
        let _a = locks.lock("lib/A.pm").await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.lock("lib/B.pm")).await;
        assert!(b.is_ok());
    }
}
