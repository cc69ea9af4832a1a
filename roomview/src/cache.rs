//! Keyed cache for downloaded blobs (media, PDFs).
//!
//! Presence-check-then-populate: the first request for a key performs the
//! fetch, concurrent requests for the same key wait on that fetch, and later
//! requests are served from memory. A failed fetch leaves the key empty so
//! the next request tries again. There is no eviction.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::OnceCell;

use crate::service::MediaUri;

/// Cache of media bytes keyed by URI.
pub type MediaCache = KeyedCache<MediaUri, Vec<u8>>;

/// A map from keys to lazily fetched, shared values.
#[derive(Debug)]
pub struct KeyedCache<K, V> {
    entries: Mutex<HashMap<K, Arc<OnceCell<Arc<V>>>>>,
}

impl<K, V> Default for KeyedCache<K, V> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, V> KeyedCache<K, V>
where
    K: Eq + Hash + Clone + std::fmt::Display,
{
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a value for `key` has been fetched successfully.
    #[must_use]
    pub fn contains(&self, key: &K) -> bool {
        self.entries
            .lock()
            .get(key)
            .is_some_and(|cell| cell.initialized())
    }

    /// Number of keys holding a value.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .values()
            .filter(|cell| cell.initialized())
            .count()
    }

    /// Whether no value has been cached yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the cached value for `key`, running `fetch` if there is none.
    ///
    /// # Errors
    ///
    /// Returns the error of `fetch` when the fetch fails; nothing is cached
    /// in that case.
    pub async fn get_or_fetch<F, Fut, E>(&self, key: &K, fetch: F) -> Result<Arc<V>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let cell = {
            let mut entries = self.entries.lock();
            Arc::clone(entries.entry(key.clone()).or_default())
        };
        if cell.initialized() {
            tracing::trace!(key = %key, "found in cache");
        } else {
            tracing::debug!(key = %key, "fetching");
        }
        cell.get_or_try_init(|| async move { fetch().await.map(Arc::new) })
            .await
            .cloned()
    }
}
