//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, capacities > 0)
//! - Check that repository, webhook and admin settings are usable together
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: RelayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::{RelayConfig, RepositoryKind};
use crate::notifier::paths::PathMapper;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a parsed configuration, collecting every error.
pub fn validate_config(config: &RelayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("not a socket address: {}", config.listener.bind_address),
        ));
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::new("listener.max_connections", "must be > 0"));
    }
    if config.listener.max_body_bytes == 0 {
        errors.push(ValidationError::new("listener.max_body_bytes", "must be > 0"));
    }

    let repo = &config.repository;
    if repo.uri.trim().is_empty() {
        errors.push(ValidationError::new("repository.uri", "must be set"));
    } else if repo.kind == RepositoryKind::Git
        && url::Url::parse(&repo.uri).is_err()
        && !repo.uri.contains('@')
        && !std::path::Path::new(&repo.uri).is_absolute()
    {
        errors.push(ValidationError::new(
            "repository.uri",
            format!("not a git URL, scp-style address or absolute path: {}", repo.uri),
        ));
    }
    if repo.kind == RepositoryKind::Git && repo.basedir.trim().is_empty() {
        errors.push(ValidationError::new("repository.basedir", "must be set for git repositories"));
    }
    if repo.watch && repo.kind != RepositoryKind::Native {
        errors.push(ValidationError::new("repository.watch", "only supported for native repositories"));
    }
    if repo.default_label.trim().is_empty() {
        errors.push(ValidationError::new("repository.default_label", "must not be empty"));
    }
    if repo.fetch_timeout_ms == 0 {
        errors.push(ValidationError::new("repository.fetch_timeout_ms", "must be > 0"));
    }
    if repo.search_paths.is_empty() {
        errors.push(ValidationError::new("repository.search_paths", "at least one path is required"));
    }
    for path in &repo.search_paths {
        if !path.contains("{application}") && !path.starts_with("application") {
            errors.push(ValidationError::new(
                "repository.search_paths",
                format!("'{}' must reference {{application}} or the shared 'application' file", path),
            ));
        }
    }

    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be > 0"));
    }
    if config.retries.max_attempts == 0 {
        errors.push(ValidationError::new("retries.max_attempts", "must be >= 1"));
    }
    if config.retries.base_delay_ms > config.retries.max_delay_ms {
        errors.push(ValidationError::new("retries.base_delay_ms", "must not exceed retries.max_delay_ms"));
    }
    if config.bus.replay_capacity == 0 {
        errors.push(ValidationError::new("bus.replay_capacity", "must be > 0"));
    }

    if let Err(e) = PathMapper::from_templates(&config.webhook.path_templates) {
        errors.push(ValidationError::new("webhook.path_templates", e));
    }
    if matches!(&config.webhook.secret, Some(s) if s.is_empty()) {
        errors.push(ValidationError::new("webhook.secret", "must not be empty when set"));
    }

    if config.admin.enabled && config.admin.api_key.len() < 16 {
        errors.push(ValidationError::new("admin.api_key", "must be at least 16 characters"));
    }
    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("not a socket address: {}", config.observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> RelayConfig {
        let mut config = RelayConfig::default();
        config.repository.uri = "https://github.com/acme/config-repo.git".into();
        config
    }

    #[test]
    fn test_default_with_uri_is_valid() {
        assert_eq!(validate_config(&valid()), Ok(()));
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = valid();
        config.repository.uri = String::new();
        config.repository.fetch_timeout_ms = 0;
        config.bus.replay_capacity = 0;
        config.admin.enabled = true;
        config.admin.api_key = "short".into();

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert!(fields.contains(&"repository.uri"));
        assert!(fields.contains(&"repository.fetch_timeout_ms"));
        assert!(fields.contains(&"bus.replay_capacity"));
        assert!(fields.contains(&"admin.api_key"));
    }

    #[test]
    fn test_rejects_bad_path_templates() {
        let mut config = valid();
        config.webhook.path_templates = vec!["{profile}/{unknown}".into()];
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_watch_requires_native() {
        let mut config = valid();
        config.repository.watch = true;
        assert!(validate_config(&config).is_err());

        config.repository.kind = RepositoryKind::Native;
        config.repository.uri = "/srv/config".into();
        assert!(validate_config(&config).is_ok());
    }
}
