//! Response bodies and error mapping.
//!
//! | error                                   | status |
//! |-----------------------------------------|--------|
//! | invalid key, malformed webhook          | 400    |
//! | webhook or admin authentication failure | 401    |
//! | no configuration for key                | 404    |
//! | store unavailable with nothing cached   | 503    |
//! | bus closed                              | 503    |

use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::agent::client::STALE_HEADER;
use crate::model::{ConfigDocument, RefreshEvent};
use crate::notifier::{NotifierError, WebhookOutcome};
use crate::server::{ResolveError, Resolved};

/// JSON form of a resolved document.
#[derive(Debug, Serialize)]
pub struct DocumentBody<'a> {
    #[serde(flatten)]
    pub document: &'a ConfigDocument,
    pub stale: bool,
}

impl IntoResponse for Resolved {
    fn into_response(self) -> Response {
        let body = DocumentBody {
            document: &self.document,
            stale: self.stale,
        };
        let mut response = Json(body).into_response();
        if self.stale {
            response
                .headers_mut()
                .insert(STALE_HEADER, HeaderValue::from_static("true"));
        }
        response
    }
}

/// Body of `POST /monitor`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorBody {
    pub outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub affected: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl From<&WebhookOutcome> for MonitorBody {
    fn from(outcome: &WebhookOutcome) -> Self {
        let event = outcome.event();
        Self {
            outcome: outcome.as_str(),
            event_id: event.map(|e| e.event_id.clone()),
            affected: event
                .map(|e| e.affected.iter().map(ToString::to_string).collect())
                .unwrap_or_default(),
            reason: match outcome {
                WebhookOutcome::Ignored(reason) => Some(reason.clone()),
                _ => None,
            },
        }
    }
}

/// Body of an accepted administrative refresh.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshAccepted {
    pub event_id: String,
    pub affected: Vec<String>,
}

impl From<&RefreshEvent> for RefreshAccepted {
    fn from(event: &RefreshEvent) -> Self {
        Self {
            event_id: event.event_id.clone(),
            affected: event.affected.iter().map(ToString::to_string).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    message: &'a str,
}

/// An error rendered as a JSON response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized(String),
    NotFound(String),
    Unavailable(String),
}

impl ApiError {
    fn parts(&self) -> (StatusCode, &'static str, &str) {
        match self {
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, "bad_request", m.as_str()),
            ApiError::Unauthorized(m) => (StatusCode::UNAUTHORIZED, "unauthorized", m.as_str()),
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, "not_found", m.as_str()),
            ApiError::Unavailable(m) => (StatusCode::SERVICE_UNAVAILABLE, "unavailable", m.as_str()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, message) = self.parts();
        (status, Json(ErrorBody { error, message })).into_response()
    }
}

impl From<ResolveError> for ApiError {
    fn from(e: ResolveError) -> Self {
        match e {
            ResolveError::InvalidKey(_) => ApiError::BadRequest(e.to_string()),
            ResolveError::NotFound(_) => ApiError::NotFound(e.to_string()),
            ResolveError::ConfigUnavailable { .. } => ApiError::Unavailable(e.to_string()),
        }
    }
}

impl From<NotifierError> for ApiError {
    fn from(e: NotifierError) -> Self {
        match e {
            NotifierError::Validation(_) => ApiError::BadRequest(e.to_string()),
            NotifierError::Unauthorized(_) => ApiError::Unauthorized(e.to_string()),
            NotifierError::Publish(_) => ApiError::Unavailable(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ConfigKey;

    #[test]
    fn test_error_status_mapping() {
        let key = ConfigKey::new("a", "b", "c");
        let cases = [
            (ApiError::from(ResolveError::InvalidKey("x".into())), StatusCode::BAD_REQUEST),
            (ApiError::from(ResolveError::NotFound(key.clone())), StatusCode::NOT_FOUND),
            (
                ApiError::from(ResolveError::ConfigUnavailable { key, reason: "down".into() }),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (ApiError::from(NotifierError::Unauthorized("x".into())), StatusCode::UNAUTHORIZED),
            (ApiError::from(NotifierError::Validation("x".into())), StatusCode::BAD_REQUEST),
        ];
        for (err, status) in cases {
            assert_eq!(err.into_response().status(), status);
        }
    }

    #[test]
    fn test_document_body_shape() {
        let doc = ConfigDocument::new(ConfigKey::new("app", "prod", "master"), "abc123", Default::default(), vec![]);
        let json = serde_json::to_value(DocumentBody { document: &doc, stale: true }).unwrap();
        assert_eq!(json["application"], "app");
        assert_eq!(json["version"], "abc123");
        assert_eq!(json["stale"], true);
        assert!(json.get("fetchedAt").is_some());
    }

    #[test]
    fn test_stale_header() {
        let doc = ConfigDocument::new(ConfigKey::new("app", "prod", "master"), "abc123", Default::default(), vec![]);
        let response = Resolved { document: std::sync::Arc::new(doc), stale: true }.into_response();
        assert_eq!(response.headers().get(STALE_HEADER).unwrap(), "true");
    }
}
