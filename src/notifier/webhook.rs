//! SCM webhook parsing and authentication.
//!
//! GitHub, Gitea and GitLab all send push events with the same JSON shape
//! (`after`, `ref`, `commits[].added/modified/removed`); anything else that
//! carries that shape is accepted as a generic push.

use axum::http::HeaderMap;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

pub const GITHUB_EVENT: &str = "x-github-event";
pub const GITEA_EVENT: &str = "x-gitea-event";
pub const GITLAB_EVENT: &str = "x-gitlab-event";
pub const HUB_SIGNATURE: &str = "x-hub-signature-256";
pub const GITEA_SIGNATURE: &str = "x-gitea-signature";
pub const GITLAB_TOKEN: &str = "x-gitlab-token";

/// Source of a webhook delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    GitHub,
    Gitea,
    GitLab,
    Generic,
}

impl Provider {
    /// Identify the provider from its event header.
    ///
    /// Gitea also sends `X-GitHub-Event` for compatibility, so it is checked first.
    pub fn detect(headers: &HeaderMap) -> Self {
        if headers.contains_key(GITEA_EVENT) {
            Provider::Gitea
        } else if headers.contains_key(GITHUB_EVENT) {
            Provider::GitHub
        } else if headers.contains_key(GITLAB_EVENT) {
            Provider::GitLab
        } else {
            Provider::Generic
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::GitHub => "github",
            Provider::Gitea => "gitea",
            Provider::GitLab => "gitlab",
            Provider::Generic => "generic",
        }
    }

    /// The event kind announced in the provider's header, if any.
    pub fn event_kind(&self, headers: &HeaderMap) -> EventKind {
        let header = match self {
            Provider::GitHub => GITHUB_EVENT,
            Provider::Gitea => GITEA_EVENT,
            Provider::GitLab => GITLAB_EVENT,
            Provider::Generic => return EventKind::Push,
        };
        let value = headers
            .get(header)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();
        match value.as_str() {
            "push" | "push hook" | "tag push hook" => EventKind::Push,
            "ping" => EventKind::Ping,
            _ => EventKind::Other(value),
        }
    }

    /// Check the delivery against the shared secret.
    pub fn verify(&self, headers: &HeaderMap, body: &[u8], secret: &str) -> Result<(), String> {
        match self {
            Provider::GitLab => {
                let token = header_str(headers, GITLAB_TOKEN).ok_or("missing X-Gitlab-Token header")?;
                if bool::from(token.as_bytes().ct_eq(secret.as_bytes())) {
                    Ok(())
                } else {
                    Err("X-Gitlab-Token does not match".to_string())
                }
            }
            _ => {
                if let Some(sig) = header_str(headers, HUB_SIGNATURE) {
                    let hex_sig = sig
                        .strip_prefix("sha256=")
                        .ok_or("X-Hub-Signature-256 must start with sha256=")?;
                    verify_signature(secret, body, hex_sig)
                } else if let Some(sig) = header_str(headers, GITEA_SIGNATURE) {
                    verify_signature(secret, body, sig)
                } else {
                    Err("missing X-Hub-Signature-256 header".to_string())
                }
            }
        }
    }
}

/// Kind of event announced by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    Push,
    Ping,
    Other(String),
}

/// The parts of a push event the notifier needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushEvent {
    pub revision: String,
    pub git_ref: Option<String>,
    pub paths: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawPush {
    after: Option<String>,
    #[serde(rename = "ref")]
    git_ref: Option<String>,
    #[serde(default)]
    commits: Option<Vec<RawCommit>>,
    head_commit: Option<RawCommit>,
}

#[derive(Debug, Default, Deserialize)]
struct RawCommit {
    #[serde(default)]
    added: Vec<String>,
    #[serde(default)]
    modified: Vec<String>,
    #[serde(default)]
    removed: Vec<String>,
}

/// Parse a push payload. Errors describe why the body is not a usable push.
pub fn parse_push(body: &[u8]) -> Result<PushEvent, String> {
    let raw: RawPush = serde_json::from_slice(body).map_err(|e| format!("malformed JSON payload: {}", e))?;

    let revision = raw
        .after
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or("payload has no 'after' revision")?;

    if raw.commits.is_none() && raw.head_commit.is_none() {
        return Err("payload has no commits".to_string());
    }

    let mut paths = Vec::new();
    for commit in raw.commits.iter().flatten().chain(raw.head_commit.iter()) {
        paths.extend(commit.added.iter().cloned());
        paths.extend(commit.modified.iter().cloned());
        paths.extend(commit.removed.iter().cloned());
    }
    paths.sort();
    paths.dedup();

    Ok(PushEvent {
        revision,
        git_ref: raw.git_ref,
        paths,
    })
}

/// Constant-time check of a hex HMAC-SHA256 signature over `body`.
pub fn verify_signature(secret: &str, body: &[u8], hex_signature: &str) -> Result<(), String> {
    let expected = hex::decode(hex_signature.trim()).map_err(|_| "signature is not valid hex".to_string())?;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|e| e.to_string())?;
    mac.update(body);
    mac.verify_slice(&expected)
        .map_err(|_| "signature does not match payload".to_string())
}

/// Hex HMAC-SHA256 of `body`, as sent in `X-Hub-Signature-256` after `sha256=`.
pub fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(*k, HeaderValue::from_str(v).unwrap());
        }
        map
    }

    #[test]
    fn test_detect_provider() {
        assert_eq!(Provider::detect(&headers(&[(GITHUB_EVENT, "push")])), Provider::GitHub);
        assert_eq!(
            Provider::detect(&headers(&[(GITHUB_EVENT, "push"), (GITEA_EVENT, "push")])),
            Provider::Gitea
        );
        assert_eq!(Provider::detect(&headers(&[(GITLAB_EVENT, "Push Hook")])), Provider::GitLab);
        assert_eq!(Provider::detect(&HeaderMap::new()), Provider::Generic);
    }

    #[test]
    fn test_event_kind() {
        let h = headers(&[(GITHUB_EVENT, "ping")]);
        assert_eq!(Provider::GitHub.event_kind(&h), EventKind::Ping);
        let h = headers(&[(GITLAB_EVENT, "Push Hook")]);
        assert_eq!(Provider::GitLab.event_kind(&h), EventKind::Push);
        let h = headers(&[(GITHUB_EVENT, "issues")]);
        assert_eq!(Provider::GitHub.event_kind(&h), EventKind::Other("issues".into()));
    }

    #[test]
    fn test_parse_push_collects_paths() {
        let body = br#"{
            "ref": "refs/heads/master",
            "after": "abc123",
            "commits": [
                {"added": ["dataCatalog/prod.yml"], "modified": [], "removed": []},
                {"added": [], "modified": ["application.yml", "dataCatalog/prod.yml"], "removed": ["old.yml"]}
            ]
        }"#;
        let push = parse_push(body).unwrap();
        assert_eq!(push.revision, "abc123");
        assert_eq!(push.git_ref.as_deref(), Some("refs/heads/master"));
        assert_eq!(push.paths, vec!["application.yml", "dataCatalog/prod.yml", "old.yml"]);
    }

    #[test]
    fn test_parse_push_rejects_bad_payloads() {
        assert!(parse_push(b"not json").is_err());
        assert!(parse_push(br#"{"commits": []}"#).is_err());
        assert!(parse_push(br#"{"after": "abc"}"#).is_err());
        assert!(parse_push(br#"{"after": "", "commits": []}"#).is_err());
    }

    #[test]
    fn test_signature_verification() {
        let body = br#"{"after":"abc123"}"#;
        let sig = sign("s3cret", body);

        let good = headers(&[(HUB_SIGNATURE, &format!("sha256={}", sig))]);
        assert!(Provider::GitHub.verify(&good, body, "s3cret").is_ok());
        assert!(Provider::GitHub.verify(&good, b"tampered", "s3cret").is_err());
        assert!(Provider::GitHub.verify(&good, body, "other").is_err());
        assert!(Provider::GitHub.verify(&HeaderMap::new(), body, "s3cret").is_err());

        let gitea = headers(&[(GITEA_SIGNATURE, &sig)]);
        assert!(Provider::Gitea.verify(&gitea, body, "s3cret").is_ok());
    }

    #[test]
    fn test_gitlab_token() {
        let ok = headers(&[(GITLAB_TOKEN, "s3cret")]);
        assert!(Provider::GitLab.verify(&ok, b"{}", "s3cret").is_ok());
        let bad = headers(&[(GITLAB_TOKEN, "s3cre")]);
        assert!(Provider::GitLab.verify(&bad, b"{}", "s3cret").is_err());
    }
}
