//! Config server: resolves configuration documents through the cache.
//!
//! # Data Flow
//! ```text
//! resolve(key, force_refresh)
//!     → cache hit (not forced)                      → document
//!     → miss / forced → cache.fetch_coalesced
//!           → deadline(retry(store.fetch))
//!           → Ok                                     → document (cached)
//!           → NotFound                               → NotFound
//!           → Unavailable, cached copy exists        → stale document
//!           → Unavailable, nothing cached            → ConfigUnavailable
//! ```
//!
//! # Design Decisions
//! - The store is injected; the server owns no global state
//! - Retries happen inside the fetch deadline, so a resolve never waits past it
//! - An invalid source file is reported like an outage: stale copy or 503
//! - On a refresh event the server re-fetches the cached keys it selects, so
//!   plain `GET`s see the change too and the stale fallback is kept

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::agent::ConfigResolver;
use crate::bus::EventHandler;
use crate::cache::ConfigCache;
use crate::config::RetryConfig;
use crate::model::{ConfigDocument, ConfigKey, KeyPattern, RefreshEvent};
use crate::observability::metrics;
use crate::resilience::retries::retry_transient;
use crate::resilience::timeouts::with_deadline;
use crate::store::{ConfigStore, StoreError};

/// A resolved document and whether it is a stale fallback.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub document: Arc<ConfigDocument>,
    pub stale: bool,
}

/// Failure resolving a configuration key.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("invalid configuration key: {0}")]
    InvalidKey(String),

    #[error("no configuration found for {0}")]
    NotFound(ConfigKey),

    #[error("configuration for {key} is unavailable: {reason}")]
    ConfigUnavailable { key: ConfigKey, reason: String },
}

/// Resolves configuration keys against an injected store and cache.
pub struct ConfigServer {
    store: Arc<dyn ConfigStore>,
    cache: ConfigCache,
    default_label: String,
    fetch_timeout: Duration,
    retry: RetryConfig,
}

impl ConfigServer {
    pub fn new(
        store: Arc<dyn ConfigStore>,
        cache: ConfigCache,
        default_label: impl Into<String>,
        fetch_timeout: Duration,
        retry: RetryConfig,
    ) -> Self {
        Self {
            store,
            cache,
            default_label: default_label.into(),
            fetch_timeout,
            retry,
        }
    }

    /// Build a key, substituting the default label when none is given.
    pub fn key(&self, application: &str, profile: &str, label: Option<&str>) -> ConfigKey {
        let label = match label {
            Some(l) if !l.is_empty() => l,
            _ => self.default_label.as_str(),
        };
        ConfigKey::new(application, profile, label)
    }

    pub fn default_label(&self) -> &str {
        &self.default_label
    }

    pub fn cache(&self) -> &ConfigCache {
        &self.cache
    }

    pub fn store_name(&self) -> &str {
        self.store.name()
    }

    /// Resolve `key`, re-fetching from the store on a miss or when forced.
    pub async fn resolve(&self, key: &ConfigKey, force_refresh: bool) -> Result<Resolved, ResolveError> {
        let start = Instant::now();
        key.validate().map_err(ResolveError::InvalidKey)?;

        if !force_refresh {
            if let Some(document) = self.cache.get(key) {
                metrics::record_resolve("hit", start);
                return Ok(Resolved { document, stale: false });
            }
        }

        let store = self.store.clone();
        let retry = self.retry.clone();
        let deadline = self.fetch_timeout;
        let fetch_key = key.clone();
        let fetch = move || async move {
            with_deadline(
                deadline,
                retry_transient(&retry, StoreError::is_transient, || store.fetch(&fetch_key)),
                || StoreError::Unavailable(format!("fetch exceeded {:?}", deadline)),
            )
            .await
        };
        let outcome = if force_refresh {
            self.cache.fetch_fresh(key, fetch).await
        } else {
            self.cache.fetch_coalesced(key, fetch).await
        };

        match outcome {
            Ok(document) => {
                tracing::debug!(key = %key, revision = %document.source_revision, "Resolved from store");
                metrics::record_resolve("fetched", start);
                Ok(Resolved { document, stale: false })
            }
            Err(StoreError::NotFound(_)) => {
                metrics::record_resolve("not_found", start);
                Err(ResolveError::NotFound(key.clone()))
            }
            Err(e) => match self.cache.get(key) {
                Some(document) => {
                    tracing::warn!(
                        key = %key,
                        revision = %document.source_revision,
                        error = %e,
                        "Store unavailable, serving stale document"
                    );
                    metrics::record_resolve("stale", start);
                    Ok(Resolved { document, stale: true })
                }
                None => {
                    tracing::error!(key = %key, error = %e, "Store unavailable and nothing cached");
                    metrics::record_resolve("unavailable", start);
                    Err(ResolveError::ConfigUnavailable {
                        key: key.clone(),
                        reason: e.to_string(),
                    })
                }
            },
        }
    }

    /// Drop cached documents selected by `pattern`.
    pub fn invalidate(&self, pattern: &KeyPattern) -> usize {
        self.cache.invalidate(pattern)
    }

    /// Re-fetch every cached key `select` accepts. Returns how many were refreshed.
    pub async fn refresh_cached(&self, select: impl Fn(&ConfigKey) -> bool) -> usize {
        let keys: Vec<ConfigKey> = self
            .cache
            .keys()
            .into_iter()
            .filter(|key| select(key))
            .collect();
        let refreshes = keys.iter().map(|key| self.resolve(key, true));
        let results = futures_util::future::join_all(refreshes).await;
        results.iter().filter(|r| matches!(r, Ok(Resolved { stale: false, .. }))).count()
    }
}

#[async_trait]
impl EventHandler for ConfigServer {
    async fn on_event(&self, event: &RefreshEvent) {
        let refreshed = self.refresh_cached(|key| event.matches(key)).await;
        tracing::debug!(event_id = %event.event_id, refreshed, "Cache refreshed for event");
    }

    async fn on_resync(&self) {
        self.refresh_cached(|_| true).await;
    }
}

#[async_trait]
impl ConfigResolver for ConfigServer {
    async fn resolve(&self, key: &ConfigKey, force_refresh: bool) -> Result<Resolved, ResolveError> {
        ConfigServer::resolve(self, key, force_refresh).await
    }
}
