use futures::future::{BoxFuture, FutureExt, Shared, WeakShared};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

type SharedRequest<T> = BoxFuture<'static, Result<T, Arc<anyhow::Error>>>;
type Registry<T> = Mutex<HashMap<String, (u64, WeakShared<SharedRequest<T>>)>>;

/// Callers that submit the same key while a request is running all await that
/// one request. The entry is dropped as soon as the request settles, whether
/// it succeeded or failed, so the next submit starts fresh. A request whose
/// callers all give up is dropped along with its entry.
///
/// The map only holds weak handles; the callers own the request.
pub struct SingleFlight<T: Clone + Send + Sync + 'static> {
    inflight: Arc<Registry<T>>,
    next_id: AtomicU64,
}

/// Lives inside the request future and unregisters it when the future
/// completes or is dropped unfinished.
struct Registration<T: Clone + Send + Sync + 'static> {
    registry: Weak<Registry<T>>,
    key: String,
    id: u64,
}

impl<T: Clone + Send + Sync + 'static> Drop for Registration<T> {
    fn drop(&mut self) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        let mut map = registry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if map.get(&self.key).is_some_and(|(id, _)| *id == self.id) {
            map.remove(&self.key);
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Default for SingleFlight<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + Sync + 'static> SingleFlight<T> {
    pub fn new() -> Self {
        Self {
            inflight: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(0),
        }
    }

    pub async fn submit<F, Fut>(&self, key: &str, factory: F) -> Result<T, Arc<anyhow::Error>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let shared = {
            let mut map = self
                .inflight
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            match map.get(key).and_then(|(_, weak)| weak.upgrade()) {
                Some(existing) => {
                    tracing::debug!(key = %key, "Joining in-flight request");
                    existing
                }
                None => {
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let registration = Registration {
                        registry: Arc::downgrade(&self.inflight),
                        key: key.to_string(),
                        id,
                    };
                    let request = factory();
                    let shared: Shared<SharedRequest<T>> = async move {
                        let _registration = registration;
                        request.await.map_err(Arc::new)
                    }
                    .boxed()
                    .shared();
                    if let Some(weak) = shared.downgrade() {
                        map.insert(key.to_string(), (id, weak));
                    }
                    shared
                }
            }
        };
        shared.await
    }

    /// Number of distinct requests currently running.
    pub fn in_flight(&self) -> usize {
        self.inflight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

/// Key covering every input of a request. Parts are length-prefixed so
/// `["ab", "c"]` and `["a", "bc"]` never collide.
pub fn request_key(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update((part.len() as u64).to_le_bytes());
        hasher.update(part.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;

    #[tokio::test]
    async fn concurrent_submits_share_one_request() {
        let flight = Arc::new(SingleFlight::<usize>::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let release = Arc::new(Notify::new());

        let mut tasks = Vec::new();
        for _ in 0..5 {
            let flight = flight.clone();
            let calls = calls.clone();
            let release = release.clone();
            tasks.push(tokio::spawn(async move {
                flight
                    .submit("same", move || async move {
                        let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                        release.notified().await;
                        Ok(n)
                    })
                    .await
            }));
        }

        while flight.in_flight() == 0 {
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        release.notify_one();

        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap(), 1);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(flight.in_flight(), 0);
    }

    #[tokio::test]
    async fn settled_request_is_not_reused() {
        let flight = SingleFlight::<usize>::new();
        let calls = Arc::new(AtomicUsize::new(0));
        for expected in 1..=2 {
            let calls = calls.clone();
            let got = flight
                .submit("k", move || async move { Ok(calls.fetch_add(1, Ordering::SeqCst) + 1) })
                .await
                .unwrap();
            assert_eq!(got, expected);
        }
        assert_eq!(flight.in_flight(), 0);
    }

    #[tokio::test]
    async fn failures_are_shared_and_cleared() {
        let flight = SingleFlight::<usize>::new();
        let err = flight
            .submit("k", || async { Err(anyhow::anyhow!("backend down")) })
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "backend down");
        assert_eq!(flight.in_flight(), 0);

        let ok = flight.submit("k", || async { Ok(7) }).await.unwrap();
        assert_eq!(ok, 7);
    }

    #[tokio::test]
    async fn different_keys_run_independently() {
        let flight = SingleFlight::<&'static str>::new();
        let (a, b) = tokio::join!(
            flight.submit("a", || async { Ok("a") }),
            flight.submit("b", || async { Ok("b") }),
        );
        assert_eq!((a.unwrap(), b.unwrap()), ("a", "b"));
    }

    #[tokio::test]
    async fn abandoned_requests_release_their_entries() {
        let flight = SingleFlight::<usize>::new();
        for key in ["a", "b", "c"] {
            let waited = tokio::time::timeout(
                Duration::from_millis(5),
                flight.submit(key, || async {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(1)
                }),
            )
            .await;
            assert!(waited.is_err());
        }
        assert_eq!(flight.in_flight(), 0);

        let fresh = flight.submit("a", || async { Ok(2) }).await.unwrap();
        assert_eq!(fresh, 2);
    }

    #[tokio::test]
    async fn request_survives_while_one_caller_remains() {
        let flight = Arc::new(SingleFlight::<usize>::new());
        let release = Arc::new(Notify::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let patient = {
            let flight = flight.clone();
            let release = release.clone();
            let calls = calls.clone();
            tokio::spawn(async move {
                flight
                    .submit("k", move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        release.notified().await;
                        Ok(5)
                    })
                    .await
            })
        };
        while flight.in_flight() == 0 {
            tokio::task::yield_now().await;
        }

        let impatient = tokio::time::timeout(
            Duration::from_millis(5),
            flight.submit("k", || async { Ok(99) }),
        )
        .await;
        assert!(impatient.is_err());
        assert_eq!(flight.in_flight(), 1);

        release.notify_one();
        assert_eq!(patient.await.unwrap().unwrap(), 5);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(flight.in_flight(), 0);
    }

    #[test]
    fn request_keys_are_unambiguous() {
        assert_eq!(request_key(&["a", "b"]), request_key(&["a", "b"]));
        assert_ne!(request_key(&["ab", "c"]), request_key(&["a", "bc"]));
        assert_ne!(request_key(&["a"]), request_key(&["a", ""]));
    }
}
