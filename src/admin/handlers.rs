use std::collections::BTreeSet;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;

use crate::http::response::{ApiError, RefreshAccepted};
use crate::http::server::AppState;
use crate::model::{KeyPattern, RefreshEvent};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub uptime_secs: u64,
    pub store: String,
    pub default_label: String,
    pub cached_documents: usize,
    pub inflight_fetches: usize,
    pub bus_subscribers: usize,
    pub bus_latest_seq: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub application: String,
    pub profile: String,
    pub label: String,
    pub version: String,
    pub fetched_at: chrono::DateTime<chrono::Utc>,
    pub properties: usize,
}

pub async fn get_status(State(state): State<AppState>) -> Json<SystemStatus> {
    let cache = state.server.cache();
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: if state.bus.is_closed() { "stopping" } else { "operational" },
        uptime_secs: state.started_at.elapsed().as_secs(),
        store: state.server.store_name().to_string(),
        default_label: state.server.default_label().to_string(),
        cached_documents: cache.len(),
        inflight_fetches: cache.inflight(),
        bus_subscribers: state.bus.subscriber_count(),
        bus_latest_seq: state.bus.latest_seq(),
    })
}

pub async fn get_cache(State(state): State<AppState>) -> Json<Vec<CacheEntry>> {
    let entries = state
        .server
        .cache()
        .documents()
        .into_iter()
        .map(|doc| CacheEntry {
            application: doc.key.application.clone(),
            profile: doc.key.profile.clone(),
            label: doc.key.label.clone(),
            version: doc.source_revision.clone(),
            fetched_at: doc.fetched_at,
            properties: doc.len(),
        })
        .collect();
    Json(entries)
}

/// `POST /actuator/busrefresh`: refresh every consumer.
pub async fn bus_refresh_all(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<RefreshAccepted>), ApiError> {
    publish_refresh(&state, KeyPattern::any())
}

/// `POST /actuator/busrefresh/{destination}` with `app[:profile[:label]]`.
pub async fn bus_refresh_destination(
    State(state): State<AppState>,
    Path(destination): Path<String>,
) -> Result<(StatusCode, Json<RefreshAccepted>), ApiError> {
    let pattern: KeyPattern = destination
        .parse()
        .map_err(|e| ApiError::BadRequest(format!("invalid destination '{}': {}", destination, e)))?;
    publish_refresh(&state, pattern)
}

fn publish_refresh(
    state: &AppState,
    pattern: KeyPattern,
) -> Result<(StatusCode, Json<RefreshAccepted>), ApiError> {
    let event = RefreshEvent::manual(BTreeSet::from([pattern]));
    state
        .publisher
        .publish(event.clone())
        .map_err(|e| ApiError::Unavailable(e.to_string()))?;
    tracing::info!(event_id = %event.event_id, affected = ?event.affected, "Administrative refresh published");
    Ok((StatusCode::ACCEPTED, Json(RefreshAccepted::from(&event))))
}
