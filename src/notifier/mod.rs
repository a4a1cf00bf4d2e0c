//! Change notifier: turns repository changes into refresh events.
//!
//! # Data Flow
//! ```text
//! POST /monitor (headers, body)
//!     → webhook.rs (provider, signature, push payload)
//!     → paths.rs (changed paths → key patterns)
//!     → event id = sha256(revision, sorted paths)
//!     → dedup window (redelivery → Duplicate)
//!     → EventPublisher::publish
//! ```
//!
//! The directory watcher enters at [`ChangeNotifier::on_paths_changed`] with
//! the same mapping and dedup rules.

pub mod paths;
pub mod webhook;

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::http::HeaderMap;
use sha2::{Digest, Sha256};

use crate::bus::{EventPublisher, PublishError};
use crate::model::{EventOrigin, RefreshEvent};
use crate::observability::metrics;

pub use paths::PathMapper;
pub use webhook::{EventKind, Provider};

/// Why a notification was rejected.
#[derive(Debug, thiserror::Error)]
pub enum NotifierError {
    #[error("invalid webhook payload: {0}")]
    Validation(String),

    #[error("webhook authentication failed: {0}")]
    Unauthorized(String),

    #[error("failed to publish refresh event: {0}")]
    Publish(#[from] PublishError),
}

/// Result of handling one notification.
#[derive(Debug, Clone, PartialEq)]
pub enum WebhookOutcome {
    Published(RefreshEvent),
    /// Same logical change seen within the dedup window; nothing published.
    Duplicate(RefreshEvent),
    Ignored(String),
}

impl WebhookOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookOutcome::Published(_) => "published",
            WebhookOutcome::Duplicate(_) => "duplicate",
            WebhookOutcome::Ignored(_) => "ignored",
        }
    }

    pub fn event(&self) -> Option<&RefreshEvent> {
        match self {
            WebhookOutcome::Published(e) | WebhookOutcome::Duplicate(e) => Some(e),
            WebhookOutcome::Ignored(_) => None,
        }
    }
}

/// Deterministic id of a change: same revision and paths, same id.
pub fn derive_event_id(revision: &str, paths: &[String]) -> String {
    let unique: BTreeSet<&str> = paths.iter().map(String::as_str).collect();
    let mut hasher = Sha256::new();
    hasher.update(revision.as_bytes());
    for path in unique {
        hasher.update([0u8]);
        hasher.update(path.as_bytes());
    }
    hex::encode(hasher.finalize())
}

pub struct ChangeNotifier {
    mapper: PathMapper,
    secret: Option<String>,
    publisher: Arc<dyn EventPublisher>,
    dedup_window: Duration,
    recent: Mutex<HashMap<String, Instant>>,
}

impl ChangeNotifier {
    pub fn new(
        mapper: PathMapper,
        secret: Option<String>,
        publisher: Arc<dyn EventPublisher>,
        dedup_window: Duration,
    ) -> Self {
        Self {
            mapper,
            secret: secret.filter(|s| !s.is_empty()),
            publisher,
            dedup_window,
            recent: Mutex::new(HashMap::new()),
        }
    }

    /// Handle an SCM webhook delivery.
    pub fn on_webhook_payload(&self, headers: &HeaderMap, body: &[u8]) -> Result<WebhookOutcome, NotifierError> {
        let provider = Provider::detect(headers);
        let result = self.handle_webhook(provider, headers, body);
        match &result {
            Ok(outcome) => metrics::record_webhook(provider.as_str(), outcome.as_str()),
            Err(NotifierError::Unauthorized(reason)) => {
                tracing::warn!(provider = provider.as_str(), reason = %reason, "Rejected unauthenticated webhook");
                metrics::record_webhook(provider.as_str(), "unauthorized");
            }
            Err(NotifierError::Validation(reason)) => {
                tracing::warn!(provider = provider.as_str(), reason = %reason, "Rejected malformed webhook");
                metrics::record_webhook(provider.as_str(), "invalid");
            }
            Err(e) => {
                tracing::error!(provider = provider.as_str(), error = %e, "Webhook not published");
                metrics::record_webhook(provider.as_str(), "error");
            }
        }
        result
    }

    fn handle_webhook(
        &self,
        provider: Provider,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<WebhookOutcome, NotifierError> {
        if let Some(secret) = &self.secret {
            provider
                .verify(headers, body, secret)
                .map_err(NotifierError::Unauthorized)?;
        }

        match provider.event_kind(headers) {
            EventKind::Push => {}
            EventKind::Ping => return Ok(WebhookOutcome::Ignored("ping".to_string())),
            EventKind::Other(kind) => {
                return Ok(WebhookOutcome::Ignored(format!("unsupported event '{}'", kind)));
            }
        }

        let push = webhook::parse_push(body).map_err(NotifierError::Validation)?;
        tracing::debug!(
            provider = provider.as_str(),
            revision = %push.revision,
            git_ref = ?push.git_ref,
            paths = push.paths.len(),
            "Received push"
        );
        self.on_paths_changed(
            Some(push.revision),
            push.paths,
            EventOrigin::Webhook {
                provider: provider.as_str().to_string(),
            },
        )
    }

    /// Publish a refresh for a set of changed repository paths.
    pub fn on_paths_changed(
        &self,
        revision: Option<String>,
        paths: Vec<String>,
        origin: EventOrigin,
    ) -> Result<WebhookOutcome, NotifierError> {
        let affected = self.mapper.map_all(&paths);
        if affected.is_empty() {
            return Ok(WebhookOutcome::Ignored("no configuration files changed".to_string()));
        }

        let event_id = derive_event_id(revision.as_deref().unwrap_or_default(), &paths);
        let event = RefreshEvent::new(event_id, affected, revision, origin);

        if !self.remember(&event.event_id) {
            tracing::info!(event_id = %event.event_id, "Duplicate change notification");
            return Ok(WebhookOutcome::Duplicate(event));
        }

        if let Err(e) = self.publisher.publish(event.clone()) {
            // Forget the id so a redelivery can try again.
            self.forget(&event.event_id);
            return Err(e.into());
        }

        tracing::info!(
            event_id = %event.event_id,
            revision = ?event.origin_revision,
            affected = event.affected.len(),
            "Published refresh event"
        );
        Ok(WebhookOutcome::Published(event))
    }

    /// Record `event_id`; false if it was already seen within the window.
    fn remember(&self, event_id: &str) -> bool {
        let now = Instant::now();
        let mut recent = self.recent.lock().unwrap_or_else(|e| e.into_inner());
        let window = self.dedup_window;
        recent.retain(|_, seen| now.duration_since(*seen) < window);
        if recent.contains_key(event_id) {
            return false;
        }
        recent.insert(event_id.to_string(), now);
        true
    }

    fn forget(&self, event_id: &str) {
        self.recent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(event_id);
    }
}
