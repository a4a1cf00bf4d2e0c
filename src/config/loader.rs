//! Configuration loading from disk and the environment.

use std::fs;
use std::path::Path;

use crate::config::schema::{RelayConfig, RepositoryKind};
use crate::config::validation::{validate_config, ValidationError};

/// Prefix for environment overrides (`CONFIG_RELAY_REPOSITORY_URI`, ...).
pub const ENV_PREFIX: &str = "CONFIG_RELAY_";

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid environment override {name}: {reason}")]
    Env { name: String, reason: String },
    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load and validate configuration from a TOML file, then apply environment overrides.
pub fn load_config(path: &Path) -> Result<RelayConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let mut config: RelayConfig = toml::from_str(&content)?;
    apply_env_overrides(&mut config, std::env::vars())?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Build a configuration from defaults plus environment overrides only.
pub fn load_from_env() -> Result<RelayConfig, ConfigError> {
    let mut config = RelayConfig::default();
    apply_env_overrides(&mut config, std::env::vars())?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Apply `CONFIG_RELAY_*` variables on top of `config`.
///
/// Takes the variables as an iterator so tests need not touch the process environment.
pub fn apply_env_overrides<I>(config: &mut RelayConfig, vars: I) -> Result<(), ConfigError>
where
    I: IntoIterator<Item = (String, String)>,
{
    for (name, value) in vars {
        let Some(field) = name.strip_prefix(ENV_PREFIX) else {
            continue;
        };
        match field {
            "BIND_ADDRESS" => config.listener.bind_address = value,
            "REPOSITORY_KIND" => {
                config.repository.kind = match value.to_ascii_lowercase().as_str() {
                    "git" => RepositoryKind::Git,
                    "native" => RepositoryKind::Native,
                    _ => return Err(env_error(&name, "expected 'git' or 'native'")),
                }
            }
            "REPOSITORY_URI" => config.repository.uri = value,
            "REPOSITORY_BASEDIR" => config.repository.basedir = value,
            "DEFAULT_LABEL" => config.repository.default_label = value,
            "FORCE_PULL" => config.repository.force_pull = parse_env(&name, &value)?,
            "FETCH_TIMEOUT_MS" => config.repository.fetch_timeout_ms = parse_env(&name, &value)?,
            "WEBHOOK_SECRET" => config.webhook.secret = Some(value),
            "ADMIN_ENABLED" => config.admin.enabled = parse_env(&name, &value)?,
            "ADMIN_API_KEY" => config.admin.api_key = value,
            "LOG_LEVEL" => config.observability.log_level = value,
            "METRICS_ENABLED" => config.observability.metrics_enabled = parse_env(&name, &value)?,
            other => tracing::debug!(variable = %other, "Ignoring unknown environment override"),
        }
    }
    Ok(())
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e: T::Err| env_error(name, &e.to_string()))
}

fn env_error(name: &str, reason: &str) -> ConfigError {
    ConfigError::Env {
        name: name.to_string(),
        reason: reason.to_string(),
    }
}
