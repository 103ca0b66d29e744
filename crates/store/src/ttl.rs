//! Key-addressed cache with time-based staleness, independent of cluster
//! connectivity. Page-local queries (e.g. one view's HPA list) use this
//! instead of the epoch-gated caches.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use deck_client::ClientResult;
use metrics::counter;
use rustc_hash::FxHashMap;
use tokio::time::Instant;
use tracing::{debug, warn};

struct TtlEntry<T> {
    value: T,
    fetched_at: Instant,
}

struct TtlInner<T> {
    ttl: Duration,
    entries: Mutex<FxHashMap<String, TtlEntry<T>>>,
}

/// Clones share the same entry table.
pub struct TtlCache<T> {
    inner: Arc<TtlInner<T>>,
}

impl<T> Clone for TtlCache<T> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

enum Hit<T> {
    Fresh(T),
    Stale(T),
    Miss,
}

impl<T: Clone + Send + Sync + 'static> TtlCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self { inner: Arc::new(TtlInner { ttl, entries: Mutex::new(FxHashMap::default()) }) }
    }

    /// Fresh hit: returns without I/O. Stale hit: returns the stale value
    /// and refreshes in the background. Miss: awaits the fetch.
    pub async fn get_or_fetch<F, Fut>(&self, key: &str, fetch: F) -> ClientResult<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ClientResult<T>> + Send + 'static,
    {
        let hit = {
            let entries = self.inner.entries.lock().unwrap();
            match entries.get(key) {
                Some(e) if e.fetched_at.elapsed() < self.inner.ttl => Hit::Fresh(e.value.clone()),
                Some(e) => Hit::Stale(e.value.clone()),
                None => Hit::Miss,
            }
        };
        match hit {
            Hit::Fresh(v) => {
                counter!("deck_ttl_cache_hit_total", 1u64);
                Ok(v)
            }
            Hit::Stale(v) => {
                counter!("deck_ttl_cache_stale_total", 1u64);
                self.spawn_refresh(key.to_string(), fetch);
                Ok(v)
            }
            Hit::Miss => {
                counter!("deck_ttl_cache_miss_total", 1u64);
                self.refetch(key, fetch).await
            }
        }
    }

    /// Force an immediate fetch, superseding whatever is stored. Call sites
    /// use this right after a mutation (delete/apply) rather than waiting
    /// out the TTL.
    pub async fn refetch<F, Fut>(&self, key: &str, fetch: F) -> ClientResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ClientResult<T>>,
    {
        let value = fetch().await?;
        self.store(key.to_string(), value.clone());
        Ok(value)
    }

    pub fn invalidate(&self, key: &str) {
        if self.inner.entries.lock().unwrap().remove(key).is_some() {
            debug!(key, "ttl cache entry invalidated");
        }
    }

    pub fn invalidate_all(&self) {
        self.inner.entries.lock().unwrap().clear();
    }

    /// Stored value regardless of age, if any.
    pub fn peek(&self, key: &str) -> Option<T> {
        self.inner.entries.lock().unwrap().get(key).map(|e| e.value.clone())
    }

    fn store(&self, key: String, value: T) {
        self.inner
            .entries
            .lock()
            .unwrap()
            .insert(key, TtlEntry { value, fetched_at: Instant::now() });
    }

    fn spawn_refresh<F, Fut>(&self, key: String, fetch: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ClientResult<T>> + Send + 'static,
    {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(h) => h,
            Err(_) => return,
        };
        let cache = self.clone();
        handle.spawn(async move {
            match fetch().await {
                Ok(value) => cache.store(key, value),
                Err(e) => warn!(key = %key, error = %e, "background ttl refresh failed"),
            }
        });
    }
}
