//! Request-side helpers: request ids, query parameters, path decoding.
//!
//! # Design Decisions
//! - Request ID added as early as possible for tracing; a client-supplied
//!   `X-Request-ID` is kept, otherwise a UUID v4 is generated
//! - The id is echoed on the response and recorded on the request span

use axum::body::Body;
use axum::http::Request;
use serde::Deserialize;
use tracing::Span;

use crate::agent::client::LABEL_SLASH;

pub const X_REQUEST_ID: &str = "x-request-id";

/// Query of `GET /{application}/{profile}[/{label}]`.
#[derive(Debug, Default, Deserialize)]
pub struct DocumentQuery {
    /// Bypass the cache and re-fetch from the store.
    #[serde(default)]
    pub refresh: bool,
}

/// Query of `GET /bus/subscribe`.
#[derive(Debug, Default, Deserialize)]
pub struct SubscribeQuery {
    /// Resume after this sequence number.
    pub since: Option<u64>,
}

/// Labels travel with `/` encoded as `(_)`, e.g. `feature(_)login`.
pub fn decode_label(raw: &str) -> String {
    raw.replace(LABEL_SLASH, "/")
}

/// Span for one HTTP request, tagged with its request id.
pub fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-");
    tracing::info_span!(
        "request",
        method = %request.method(),
        path = %request.uri().path(),
        request_id = %request_id,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_label() {
        assert_eq!(decode_label("master"), "master");
        assert_eq!(decode_label("feature(_)login(_)v2"), "feature/login/v2");
    }

    #[test]
    fn test_decoded_absolute_label_is_rejected() {
        let label = decode_label("(_)tmp(_).cfg");
        assert_eq!(label, "/tmp/.cfg");
        let key = crate::model::ConfigKey::new("app", "prod", label);
        assert!(key.validate().is_err());
    }

    #[test]
    fn test_span_uses_request_id() {
        let request = Request::builder()
            .uri("/app/prod")
            .header(X_REQUEST_ID, "abc")
            .body(Body::empty())
            .unwrap();
        let _span = make_span(&request);
    }
}
