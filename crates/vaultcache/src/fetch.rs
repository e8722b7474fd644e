//! In-flight fetch deduplication for get-or-fetch / get-and-fetch-latest:
//! instead of deduplicating identical *reads*, this deduplicates identical
//! *fetch functions* keyed by `{type_tag}:{key}`.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::broadcast;
use vaultcache_core::CacheError;

/// Ensures at most one fetch runs per dedup key at a time; concurrent
/// callers for the same key subscribe to the leader's result instead of
/// re-running the fetch function.
#[derive(Clone, Default)]
pub struct FetchCoalescer {
    inflight: Arc<DashMap<String, broadcast::Sender<Result<Vec<u8>, CacheError>>>>,
}

impl FetchCoalescer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `fetch` for `dedup_key` exactly once across any number of
    /// concurrent callers racing on that key. The first caller to arrive
    /// becomes the leader and executes `fetch`; everyone else waits on a
    /// broadcast of the leader's result. The map entry is removed before
    /// the result is published so a later, independent fetch for the same
    /// key is not accidentally coalesced into a stale generation.
    pub async fn run<F, Fut>(&self, dedup_key: &str, fetch: F) -> Result<Vec<u8>, CacheError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<Vec<u8>, CacheError>>,
    {
        let role = match self.inflight.entry(dedup_key.to_string()) {
            Entry::Occupied(o) => Ok(o.get().subscribe()),
            Entry::Vacant(v) => {
                let (tx, _rx) = broadcast::channel(1);
                v.insert(tx.clone());
                Err(tx)
            }
        };

        match role {
            Ok(mut rx) => rx.recv().await.unwrap_or_else(|_| {
                Err(CacheError::Fetch(
                    "in-flight fetch leader dropped without a result".into(),
                ))
            }),
            Err(tx) => {
                let result = fetch().await;
                self.inflight.remove(dedup_key);
                if tx.receiver_count() > 0 {
                    let _ = tx.send(result.clone());
                }
                result
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn concurrent_callers_share_one_fetch() {
        let coalescer = FetchCoalescer::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let coalescer = coalescer.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                coalescer
                    .run("widget:k", || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                        Ok(vec![1, 2, 3])
                    })
                    .await
            }));
        }

        let mut results = Vec::new();
        for h in handles {
            results.push(h.await.unwrap().unwrap());
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|r| r == &vec![1, 2, 3]));
    }

    #[tokio::test]
    async fn followers_see_the_leaders_error() {
        let coalescer = FetchCoalescer::new();
        let mut handles = Vec::new();
        for _ in 0..5 {
            let coalescer = coalescer.clone();
            handles.push(tokio::spawn(async move {
                coalescer
                    .run("widget:k", || async move {
                        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                        Err(CacheError::Fetch("boom".into()))
                    })
                    .await
            }));
        }
        for h in handles {
            let err = h.await.unwrap().unwrap_err();
            assert!(matches!(err, CacheError::Fetch(_)));
        }
    }

    #[tokio::test]
    async fn independent_calls_after_completion_run_again() {
        let coalescer = FetchCoalescer::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let c = calls.clone();
        coalescer
            .run("widget:k", || async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(vec![1])
            })
            .await
            .unwrap();

        let c = calls.clone();
        coalescer
            .run("widget:k", || async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(vec![2])
            })
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
