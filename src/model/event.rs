//! Refresh events broadcast over the bus.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::key::{any_matches, ConfigKey, KeyPattern};

/// What triggered a refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum EventOrigin {
    /// SCM push webhook from the named provider.
    Webhook { provider: String },
    /// Administrative refresh endpoint.
    Admin,
    /// Local repository directory watcher.
    Watcher,
}

/// Notification that the configuration selected by `affected` changed.
///
/// Consumers must treat a repeated `event_id` as the same logical change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshEvent {
    pub event_id: String,
    pub affected: BTreeSet<KeyPattern>,
    pub origin_revision: Option<String>,
    pub published_at: DateTime<Utc>,
    pub origin: EventOrigin,
}

impl RefreshEvent {
    pub fn new(
        event_id: impl Into<String>,
        affected: BTreeSet<KeyPattern>,
        origin_revision: Option<String>,
        origin: EventOrigin,
    ) -> Self {
        Self {
            event_id: event_id.into(),
            affected,
            origin_revision,
            published_at: Utc::now(),
            origin,
        }
    }

    /// Administrative refresh of the given patterns with a fresh random id.
    pub fn manual(affected: BTreeSet<KeyPattern>) -> Self {
        Self::new(
            uuid::Uuid::new_v4().to_string(),
            affected,
            None,
            EventOrigin::Admin,
        )
    }

    pub fn matches(&self, key: &ConfigKey) -> bool {
        any_matches(&self.affected, key)
    }

    pub fn is_broadcast(&self) -> bool {
        self.affected.iter().any(KeyPattern::is_any)
    }
}
