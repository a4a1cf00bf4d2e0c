//! HTTP client for a remote config server.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use url::Url;

use crate::agent::ConfigResolver;
use crate::model::{ConfigDocument, ConfigKey};
use crate::server::{ResolveError, Resolved};

/// Response header set when the server answered from a stale cache entry.
pub const STALE_HEADER: &str = "x-config-stale";

/// Labels cannot contain `/` in a path segment; the server decodes this back.
pub const LABEL_SLASH: &str = "(_)";

/// Failure to construct an [`HttpConfigClient`].
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("invalid server url: {0}")]
    Url(#[from] url::ParseError),

    #[error("cannot build http client: {0}")]
    Http(#[from] reqwest::Error),
}

/// Resolves keys against a config server over HTTP.
#[derive(Clone)]
pub struct HttpConfigClient {
    base: Url,
    client: reqwest::Client,
}

impl HttpConfigClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ClientError> {
        let base = Url::parse(base_url)?;
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { base, client })
    }

    /// URL of the document for `key`. An empty label is left to the server's default.
    pub fn document_url(&self, key: &ConfigKey, force_refresh: bool) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(&key.application).push(&key.profile);
            if !key.label.is_empty() {
                segments.push(&key.label.replace('/', LABEL_SLASH));
            }
        }
        if force_refresh {
            url.query_pairs_mut().append_pair("refresh", "true");
        }
        url
    }

    fn unavailable(key: &ConfigKey, reason: impl ToString) -> ResolveError {
        ResolveError::ConfigUnavailable {
            key: key.clone(),
            reason: reason.to_string(),
        }
    }
}

#[async_trait]
impl ConfigResolver for HttpConfigClient {
    async fn resolve(&self, key: &ConfigKey, force_refresh: bool) -> Result<Resolved, ResolveError> {
        let url = self.document_url(key, force_refresh);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Self::unavailable(key, e))?;

        match response.status() {
            StatusCode::OK => {}
            StatusCode::NOT_FOUND => return Err(ResolveError::NotFound(key.clone())),
            StatusCode::BAD_REQUEST => {
                let body = response.text().await.unwrap_or_default();
                return Err(ResolveError::InvalidKey(body));
            }
            status => return Err(Self::unavailable(key, format!("server returned {}", status))),
        }

        let stale = response
            .headers()
            .get(STALE_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        let document: ConfigDocument = response
            .json()
            .await
            .map_err(|e| Self::unavailable(key, format!("invalid document: {}", e)))?;

        Ok(Resolved {
            document: Arc::new(document),
            stale,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_url() {
        let client = HttpConfigClient::new("http://config:8888/", Duration::from_secs(1)).unwrap();
        let key = ConfigKey::new("dataCatalog", "prod", "feature/x");
        assert_eq!(
            client.document_url(&key, false).as_str(),
            "http://config:8888/dataCatalog/prod/feature(_)x"
        );
        assert_eq!(
            client.document_url(&key, true).as_str(),
            "http://config:8888/dataCatalog/prod/feature(_)x?refresh=true"
        );
        let unlabelled = ConfigKey::new("dataCatalog", "prod", "");
        assert_eq!(client.document_url(&unlabelled, false).as_str(), "http://config:8888/dataCatalog/prod");
    }

    #[test]
    fn test_rejects_bad_url() {
        assert!(matches!(
            HttpConfigClient::new("not a url", Duration::from_secs(1)),
            Err(ClientError::Url(_))
        ));
    }
}
