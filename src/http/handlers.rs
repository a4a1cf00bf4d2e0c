//! Public HTTP handlers: documents, webhook intake, bus subscription.

use axum::body::Bytes;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::bus::remote::serve_socket;
use crate::http::request::{decode_label, DocumentQuery, SubscribeQuery};
use crate::http::response::{ApiError, MonitorBody};
use crate::http::server::AppState;

pub async fn health() -> impl IntoResponse {
    Json(json!({ "status": "UP" }))
}

pub async fn get_document(
    State(state): State<AppState>,
    Path((application, profile)): Path<(String, String)>,
    Query(query): Query<DocumentQuery>,
) -> Result<Response, ApiError> {
    resolve(&state, &application, &profile, None, query.refresh).await
}

pub async fn get_labelled_document(
    State(state): State<AppState>,
    Path((application, profile, label)): Path<(String, String, String)>,
    Query(query): Query<DocumentQuery>,
) -> Result<Response, ApiError> {
    let label = decode_label(&label);
    resolve(&state, &application, &profile, Some(&label), query.refresh).await
}

async fn resolve(
    state: &AppState,
    application: &str,
    profile: &str,
    label: Option<&str>,
    refresh: bool,
) -> Result<Response, ApiError> {
    let key = state.server.key(application, profile, label);
    match state.server.resolve(&key, refresh).await {
        Ok(resolved) => Ok(resolved.into_response()),
        Err(e) => {
            tracing::debug!(key = %key, error = %e, "Resolve failed");
            Err(e.into())
        }
    }
}

/// SCM webhook intake.
pub async fn monitor(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<MonitorBody>, ApiError> {
    let outcome = state.notifier.on_webhook_payload(&headers, &body)?;
    Ok(Json(MonitorBody::from(&outcome)))
}

/// WebSocket stream of bus frames, optionally resuming after `since`.
pub async fn bus_subscribe(
    State(state): State<AppState>,
    Query(query): Query<SubscribeQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    // Subscribe before the upgrade completes so nothing published in between is lost.
    let subscription = match query.since {
        Some(since) => state.bus.subscribe_from(since),
        None => state.bus.subscribe(),
    };
    let shutdown = state.shutdown.subscribe();
    ws.on_upgrade(move |socket| serve_socket(socket, subscription, shutdown))
}
