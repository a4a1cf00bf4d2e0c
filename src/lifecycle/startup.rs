//! Startup orchestration.
//!
//! # Responsibilities
//! - Validate configuration
//! - Wire store, cache, server, bus and notifier in dependency order
//! - Start background tasks (cache refresh on events, repository watcher)
//! - Serve until the shutdown signal, then close the bus
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - The store is injectable so tests and embedders can supply their own

use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::TcpListener;

use crate::bus::{EventBus, EventPublisher, RetryingPublisher};
use crate::cache::ConfigCache;
use crate::config::validation::validate_config;
use crate::config::watcher::{DirectoryWatcher, DEFAULT_DEBOUNCE};
use crate::config::{ConfigError, RelayConfig, RepositoryKind};
use crate::http::{AppState, HttpServer};
use crate::lifecycle::Shutdown;
use crate::net::tls::load_tls_config;
use crate::notifier::{ChangeNotifier, PathMapper};
use crate::server::ConfigServer;
use crate::store::{self, ConfigStore};

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("invalid webhook path templates: {0}")]
    PathTemplates(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("repository watcher failed: {0}")]
    Watch(#[from] notify::Error),

    #[error("TLS is not configured")]
    TlsNotConfigured,
}

/// A fully wired relay, ready to serve.
pub struct App {
    state: AppState,
}

impl App {
    /// Wire the relay with the store named by the configuration.
    pub fn build(config: RelayConfig) -> Result<Self, StartupError> {
        let store = store::from_config(&config.repository);
        Self::with_store(config, store)
    }

    /// Wire the relay around an existing store.
    pub fn with_store(config: RelayConfig, store: Arc<dyn ConfigStore>) -> Result<Self, StartupError> {
        validate_config(&config).map_err(ConfigError::Validation)?;
        let config = Arc::new(config);

        let server = Arc::new(ConfigServer::new(
            store,
            ConfigCache::new(),
            config.repository.default_label.clone(),
            Duration::from_millis(config.repository.fetch_timeout_ms),
            config.retries.clone(),
        ));

        let bus = EventBus::new(config.bus.replay_capacity);
        let publisher: Arc<dyn EventPublisher> =
            Arc::new(RetryingPublisher::new(Arc::new(bus.clone()), config.retries.clone()));

        let mapper =
            PathMapper::from_templates(&config.webhook.path_templates).map_err(StartupError::PathTemplates)?;
        let notifier = Arc::new(ChangeNotifier::new(
            mapper,
            config.webhook.secret.clone(),
            publisher.clone(),
            Duration::from_secs(config.webhook.dedup_window_secs),
        ));

        tracing::info!(
            store = server.store_name(),
            uri = %config.repository.uri,
            default_label = %config.repository.default_label,
            webhook_secret = config.webhook.secret.is_some(),
            admin = config.admin.enabled,
            "Relay wired"
        );

        Ok(Self {
            state: AppState {
                config,
                server,
                notifier,
                publisher,
                bus,
                shutdown: Arc::new(Shutdown::new()),
                started_at: Instant::now(),
            },
        })
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn server(&self) -> &Arc<ConfigServer> {
        &self.state.server
    }

    pub fn bus(&self) -> &EventBus {
        &self.state.bus
    }

    pub fn notifier(&self) -> &Arc<ChangeNotifier> {
        &self.state.notifier
    }

    pub fn shutdown(&self) -> &Arc<Shutdown> {
        &self.state.shutdown
    }

    /// Start tasks that live as long as the server. The returned guard keeps
    /// the repository watcher alive.
    fn start_background(&self) -> Result<Option<notify::RecommendedWatcher>, StartupError> {
        self.state.bus.subscribe_with(self.state.server.clone());

        let repo = &self.state.config.repository;
        if repo.kind == RepositoryKind::Native && repo.watch {
            let watcher = DirectoryWatcher::new(&PathBuf::from(&repo.uri), DEFAULT_DEBOUNCE)
                .run(self.state.notifier.clone(), self.state.shutdown.subscribe())?;
            return Ok(Some(watcher));
        }
        Ok(None)
    }

    /// Serve plain HTTP on `listener` until `signal` resolves.
    pub async fn run<F>(self, listener: TcpListener, signal: F) -> Result<(), StartupError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let _watcher = self.start_background()?;
        let bus = self.state.bus.clone();
        HttpServer::new(self.state).run(listener, signal).await?;
        bus.close();
        Ok(())
    }

    /// Serve HTTPS using the configured certificate until `signal` resolves.
    pub async fn run_tls<F>(self, signal: F) -> Result<(), StartupError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = &self.state.config.listener;
        let tls = listener.tls.as_ref().ok_or(StartupError::TlsNotConfigured)?;
        let addr: SocketAddr = listener.bind_address.parse().map_err(|e| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, format!("bad bind address: {}", e))
        })?;
        let rustls = load_tls_config(&PathBuf::from(&tls.cert_path), &PathBuf::from(&tls.key_path)).await?;

        let _watcher = self.start_background()?;
        let bus = self.state.bus.clone();
        HttpServer::new(self.state).run_tls(addr, rustls, signal).await?;
        bus.close();
        Ok(())
    }
}
