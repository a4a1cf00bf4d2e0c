//! Configuration management subsystem (the relay's own settings).
//!
//! # Data Flow
//! ```text
//! config file (TOML) + CONFIG_RELAY_* environment
//!     → loader.rs (parse, deserialize, apply overrides)
//!     → validation.rs (semantic checks)
//!     → RelayConfig (validated, immutable)
//!     → shared via Arc to all subsystems
//!
//! Native repositories with `watch = true`:
//!     watcher.rs detects changed files under the repository
//!     → ChangeNotifier publishes a refresh for the mapped keys
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, ConfigError};
pub use schema::{
    AdminConfig, BusConfig, ListenerConfig, ObservabilityConfig, RelayConfig, RepositoryConfig,
    RepositoryKind, RetryConfig, TimeoutConfig, WebhookConfig,
};
