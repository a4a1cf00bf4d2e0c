//! Config document cache with per-key fetch coalescing.
//!
//! # Responsibilities
//! - Hold the last successfully fetched document per [`ConfigKey`]
//! - Collapse concurrent fetches for one key into a single upstream call
//! - Invalidate entries selected by a [`KeyPattern`]
//!
//! # Design Decisions
//! - The fetch runs in a spawned task, detached from whichever caller started
//!   it: dropping that caller never cancels the fetch for other waiters
//! - Waiters share the task's result (or failure) through a `Shared` future
//! - Each in-flight entry carries a generation number so a finished fetch only
//!   removes its own entry, never a newer one
//! - A forced fetch never joins a fetch that started before it was requested;
//!   that fetch may predate the change being refreshed

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::future::{BoxFuture, FutureExt, Shared};

use crate::model::{ConfigDocument, ConfigKey, KeyPattern};
use crate::observability::metrics;
use crate::store::StoreError;

/// Result of one (possibly shared) store fetch.
pub type FetchOutcome = Result<Arc<ConfigDocument>, StoreError>;

type SharedFetch = Shared<BoxFuture<'static, FetchOutcome>>;

/// A thread-safe document cache.
#[derive(Clone, Default)]
pub struct ConfigCache {
    entries: Arc<DashMap<ConfigKey, Arc<ConfigDocument>>>,
    inflight: Arc<DashMap<ConfigKey, (u64, SharedFetch)>>,
    generation: Arc<AtomicU64>,
}

impl ConfigCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &ConfigKey) -> Option<Arc<ConfigDocument>> {
        self.entries.get(key).map(|r| r.value().clone())
    }

    pub fn insert(&self, document: Arc<ConfigDocument>) {
        self.entries.insert(document.key.clone(), document);
        metrics::record_cache_size(self.entries.len());
    }

    pub fn remove(&self, key: &ConfigKey) -> Option<Arc<ConfigDocument>> {
        let removed = self.entries.remove(key).map(|(_, doc)| doc);
        metrics::record_cache_size(self.entries.len());
        removed
    }

    /// Drop every cached document selected by `pattern`. Returns how many were dropped.
    pub fn invalidate(&self, pattern: &KeyPattern) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| !pattern.matches(key));
        let after = self.entries.len();
        metrics::record_cache_size(after);
        before.saturating_sub(after)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of fetches currently in flight.
    pub fn inflight(&self) -> usize {
        self.inflight.len()
    }

    /// Cached keys, sorted.
    pub fn keys(&self) -> Vec<ConfigKey> {
        let mut keys: Vec<_> = self.entries.iter().map(|r| r.key().clone()).collect();
        keys.sort();
        keys
    }

    /// Snapshot of cached documents, sorted by key.
    pub fn documents(&self) -> Vec<Arc<ConfigDocument>> {
        let mut docs: Vec<_> = self.entries.iter().map(|r| r.value().clone()).collect();
        docs.sort_by(|a, b| a.key.cmp(&b.key));
        docs
    }

    /// Cached document for `key`, or the result of a coalesced fetch.
    pub async fn get_or_fetch<F, Fut>(&self, key: &ConfigKey, fetch: F) -> FetchOutcome
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<ConfigDocument, StoreError>> + Send + 'static,
    {
        match self.get(key) {
            Some(document) => Ok(document),
            None => self.fetch_coalesced(key, fetch).await,
        }
    }

    /// Join the in-flight fetch for `key`, or start one with `fetch`.
    ///
    /// `fetch` is only invoked when no fetch for `key` is running. A successful
    /// result replaces the cached document; `NotFound` evicts it; transient
    /// failures leave it in place for stale serving.
    pub async fn fetch_coalesced<F, Fut>(&self, key: &ConfigKey, fetch: F) -> FetchOutcome
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<ConfigDocument, StoreError>> + Send + 'static,
    {
        let shared = match self.inflight.entry(key.clone()) {
            Entry::Occupied(entry) => {
                tracing::debug!(key = %key, "Joining in-flight fetch");
                metrics::record_coalesced();
                entry.get().1.clone()
            }
            Entry::Vacant(entry) => {
                let id = self.generation.fetch_add(1, Ordering::SeqCst);
                let task = self.spawn_fetch(key.clone(), id, fetch());
                let shared = async move {
                    match task.await {
                        Ok(outcome) => outcome,
                        Err(e) => Err(StoreError::Unavailable(format!("fetch task failed: {}", e))),
                    }
                }
                .boxed()
                .shared();
                entry.insert((id, shared.clone()));
                shared
            }
        };
        shared.await
    }

    /// Like [`fetch_coalesced`](Self::fetch_coalesced), but only joins a fetch
    /// started after this call. An older in-flight fetch is waited out first.
    pub async fn fetch_fresh<F, Fut>(&self, key: &ConfigKey, fetch: F) -> FetchOutcome
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<ConfigDocument, StoreError>> + Send + 'static,
    {
        let since = self.generation.load(Ordering::SeqCst);
        loop {
            let older = match self.inflight.get(key) {
                Some(entry) if entry.0 < since => entry.1.clone(),
                _ => break,
            };
            tracing::debug!(key = %key, "Waiting out fetch started before refresh");
            let _ = older.await;
        }
        self.fetch_coalesced(key, fetch).await
    }

    fn spawn_fetch<Fut>(&self, key: ConfigKey, id: u64, fut: Fut) -> tokio::task::JoinHandle<FetchOutcome>
    where
        Fut: Future<Output = Result<ConfigDocument, StoreError>> + Send + 'static,
    {
        let cache = self.clone();
        tokio::spawn(async move {
            let outcome = fut.await.map(Arc::new);
            match &outcome {
                Ok(doc) => cache.insert(doc.clone()),
                Err(StoreError::NotFound(_)) => {
                    cache.remove(&key);
                }
                Err(_) => {}
            }
            cache.inflight.remove_if(&key, |_, (generation, _)| *generation == id);
            outcome
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn doc(key: &ConfigKey, rev: &str) -> ConfigDocument {
        ConfigDocument::new(key.clone(), rev, Default::default(), vec![])
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_fetches_coalesce() {
        let cache = ConfigCache::new();
        let key = ConfigKey::new("app", "prod", "master");
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..32 {
            let cache = cache.clone();
            let key = key.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                let fetched_key = key.clone();
                cache
                    .fetch_coalesced(&key, move || {
                        let key = fetched_key;
                        async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(100)).await;
                            Ok::<_, StoreError>(doc(&key, "r1"))
                        }
                    })
                    .await
            }));
        }
        for h in handles {
            let result = h.await.unwrap().unwrap();
            assert_eq!(result.source_revision, "r1");
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.get(&key).unwrap().source_revision, "r1");
        assert_eq!(cache.inflight(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_leader_does_not_cancel_waiters() {
        let cache = ConfigCache::new();
        let key = ConfigKey::new("app", "prod", "master");

        let leader = {
            let cache = cache.clone();
            let key = key.clone();
            tokio::spawn(async move {
                cache
                    .fetch_coalesced(&key, || {
                        let key = key.clone();
                        async move {
                            tokio::time::sleep(Duration::from_millis(100)).await;
                            Ok::<_, StoreError>(doc(&key, "r2"))
                        }
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let follower = {
            let cache = cache.clone();
            let key = key.clone();
            tokio::spawn(async move {
                cache
                    .fetch_coalesced(&key, || async {
                        Err::<ConfigDocument, _>(StoreError::Unavailable("second fetch started".into()))
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        leader.abort();

        let result = follower.await.unwrap().unwrap();
        assert_eq!(result.source_revision, "r2");
    }

    #[tokio::test]
    async fn test_failures_keep_and_not_found_evicts() {
        let cache = ConfigCache::new();
        let key = ConfigKey::new("app", "prod", "master");
        cache.insert(Arc::new(doc(&key, "r1")));

        let outcome = cache
            .fetch_coalesced(&key, || async { Err::<ConfigDocument, _>(StoreError::Unavailable("down".into())) })
            .await;
        assert!(outcome.is_err());
        assert!(cache.get(&key).is_some());

        let k = key.clone();
        let outcome = cache
            .fetch_coalesced(&key, move || async move { Err::<ConfigDocument, _>(StoreError::NotFound(k)) })
            .await;
        assert!(matches!(outcome, Err(StoreError::NotFound(_))));
        assert!(cache.get(&key).is_none());
    }

    #[test]
    fn test_invalidate_by_pattern() {
        let cache = ConfigCache::new();
        for (app, profile) in [("a", "prod"), ("a", "dev"), ("b", "prod")] {
            let key = ConfigKey::new(app, profile, "master");
            cache.insert(Arc::new(doc(&key, "r")));
        }
        assert_eq!(cache.invalidate(&"a:prod".parse().unwrap()), 1);
        assert_eq!(cache.invalidate(&KeyPattern::application("a")), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.documents()[0].key.application, "b");
        assert_eq!(cache.keys(), vec![ConfigKey::new("b", "prod", "master")]);
    }

    #[tokio::test]
    async fn test_get_or_fetch_prefers_cache() {
        let cache = ConfigCache::new();
        let key = ConfigKey::new("app", "prod", "master");
        cache.insert(Arc::new(doc(&key, "cached")));
        let result = cache
            .get_or_fetch(&key, || async { Err::<ConfigDocument, _>(StoreError::Unavailable("unused".into())) })
            .await
            .unwrap();
        assert_eq!(result.source_revision, "cached");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_fresh_fetch_skips_older_inflight_fetch() {
        let cache = ConfigCache::new();
        let key = ConfigKey::new("app", "prod", "master");

        let early = {
            let cache = cache.clone();
            let key = key.clone();
            tokio::spawn(async move {
                let fetched_key = key.clone();
                cache
                    .fetch_coalesced(&key, move || async move {
                        tokio::time::sleep(Duration::from_millis(150)).await;
                        Ok::<_, StoreError>(doc(&fetched_key, "old"))
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(cache.inflight(), 1);

        let fetched_key = key.clone();
        let fresh = cache
            .fetch_fresh(&key, move || async move { Ok::<_, StoreError>(doc(&fetched_key, "new")) })
            .await
            .unwrap();
        assert_eq!(fresh.source_revision, "new");
        assert_eq!(early.await.unwrap().unwrap().source_revision, "old");
        assert_eq!(cache.get(&key).unwrap().source_revision, "new");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_fresh_fetches_coalesce_with_each_other() {
        let cache = ConfigCache::new();
        let key = ConfigKey::new("app", "prod", "master");
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let key = key.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                let fetched_key = key.clone();
                cache
                    .fetch_fresh(&key, move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        Ok::<_, StoreError>(doc(&fetched_key, "r1"))
                    })
                    .await
            }));
        }
        for h in handles {
            assert_eq!(h.await.unwrap().unwrap().source_revision, "r1");
        }
        // Late callers wait out the first fetch, then share a single second one.
        assert!(calls.load(Ordering::SeqCst) <= 2);
    }
}
