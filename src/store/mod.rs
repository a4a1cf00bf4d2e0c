//! Config store adapters.
//!
//! # Data Flow
//! ```text
//! ConfigKey
//!     → resolve.rs (expand search paths into candidate files)
//!     → git.rs / native.rs (read candidates at the label's revision)
//!     → format.rs (parse YAML / properties / JSON / TOML, flatten)
//!     → resolve.rs (merge layers, highest precedence wins)
//!     → ConfigDocument
//! ```
//!
//! # Design Decisions
//! - Adapters only read; caching and coalescing live in the config server
//! - Every external call is bounded by the configured fetch timeout
//! - A missing document is `NotFound`; anything transient is `Unavailable`

pub mod format;
pub mod git;
pub mod native;
pub mod resolve;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::{RepositoryConfig, RepositoryKind};
use crate::model::{ConfigDocument, ConfigKey};

pub use git::GitStore;
pub use native::NativeStore;
pub use resolve::SearchPaths;

/// Failure fetching from a config store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The source has no document for the key.
    #[error("no configuration found for {0}")]
    NotFound(ConfigKey),

    /// The source could not be reached or did not answer in time.
    #[error("configuration source unavailable: {0}")]
    Unavailable(String),

    /// A source file exists but could not be parsed.
    #[error("invalid configuration file {path}: {reason}")]
    Invalid { path: String, reason: String },
}

impl StoreError {
    /// Transient failures are worth retrying and may be served stale.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

/// A versioned source of configuration documents.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Fetch the merged document for `key` at the revision named by its label.
    async fn fetch(&self, key: &ConfigKey) -> Result<ConfigDocument, StoreError>;

    /// Short name for logs and metrics.
    fn name(&self) -> &str;
}

/// Build the store described by the repository configuration.
pub fn from_config(config: &RepositoryConfig) -> Arc<dyn ConfigStore> {
    let search = SearchPaths::new(config.search_paths.clone());
    match config.kind {
        RepositoryKind::Git => Arc::new(GitStore::new(
            config.uri.clone(),
            PathBuf::from(&config.basedir),
            search,
            config.force_pull,
            Duration::from_millis(config.fetch_timeout_ms),
        )),
        RepositoryKind::Native => Arc::new(NativeStore::new(PathBuf::from(&config.uri), search)),
    }
}
