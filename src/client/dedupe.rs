// In-flight request coalescing
// Author: kelexine (https://github.com/kelexine)

use super::ApiResponse;
use crate::error::Result;
use futures::future::{BoxFuture, FutureExt, Shared, WeakShared};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub(crate) type SharedResponse = Shared<BoxFuture<'static, Result<ApiResponse>>>;

struct Pending {
    generation: u64,
    future: WeakShared<BoxFuture<'static, Result<ApiResponse>>>,
}

/// Registry of dispatched requests that later identical requests can join.
///
/// Entries are weak: once every waiter has gone (finished, timed out or
/// cancelled) the transfer is dropped and the next request starts fresh.
#[derive(Clone, Default)]
pub(crate) struct InflightRequests {
    pending: Arc<Mutex<HashMap<String, Pending>>>,
    generations: Arc<AtomicU64>,
}

impl InflightRequests {
    /// Join the in-flight request for `key`, or start one with `start`.
    /// The flag is true when an existing request was joined.
    pub(crate) fn join_or_start<F>(&self, key: String, start: F) -> (SharedResponse, bool)
    where
        F: FnOnce() -> BoxFuture<'static, Result<ApiResponse>>,
    {
        let mut pending = self.pending.lock();
        if let Some(existing) = pending.get(&key).and_then(|p| p.future.upgrade()) {
            return (existing, true);
        }

        let generation = self.generations.fetch_add(1, Ordering::Relaxed);
        let registry = Arc::clone(&self.pending);
        let cleanup_key = key.clone();
        let transfer = start();
        let shared = async move {
            let result = transfer.await;
            let mut pending = registry.lock();
            if pending
                .get(&cleanup_key)
                .is_some_and(|p| p.generation == generation)
            {
                pending.remove(&cleanup_key);
            }
            result
        }
        .boxed()
        .shared();

        if let Some(future) = shared.downgrade() {
            pending.insert(key, Pending { generation, future });
        }
        (shared, false)
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use reqwest::header::HeaderMap;
    use reqwest::StatusCode;
    use std::sync::atomic::AtomicUsize;

    fn ok_response() -> ApiResponse {
        ApiResponse {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: Bytes::from_static(b"[]"),
            url: "http://api/estates".to_string(),
        }
    }

    #[tokio::test]
    async fn test_identical_requests_share_one_transfer() {
        let inflight = InflightRequests::default();
        let started = Arc::new(AtomicUsize::new(0));

        let start = || {
            let started = started.clone();
            async move {
                started.fetch_add(1, Ordering::SeqCst);
                tokio::task::yield_now().await;
                Ok(ok_response())
            }
            .boxed()
        };

        let (first, joined_first) = inflight.join_or_start("GET /estates".into(), start);
        let (second, joined_second) = inflight.join_or_start("GET /estates".into(), start);
        assert!(!joined_first);
        assert!(joined_second);

        let (a, b) = tokio::join!(first, second);
        assert_eq!(a.unwrap().body, b.unwrap().body);
        assert_eq!(started.load(Ordering::SeqCst), 1);
        assert_eq!(inflight.len(), 0);
    }

    #[tokio::test]
    async fn test_abandoned_request_is_restarted() {
        let inflight = InflightRequests::default();
        let (first, _) = inflight.join_or_start("k".into(), || {
            futures::future::pending::<Result<ApiResponse>>().boxed()
        });
        drop(first);

        let (second, joined) = inflight.join_or_start("k".into(), || async { Ok(ok_response()) }.boxed());
        assert!(!joined);
        assert!(second.await.is_ok());
    }
}
