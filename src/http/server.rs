//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router with all handlers
//! - Wire up middleware (request id, tracing, timeout, limits)
//! - Serve on a plain listener or over TLS with graceful shutdown

use std::future::{Future, IntoFuture};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::routing::{get, post};
use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use tokio::net::TcpListener;
use tower::limit::GlobalConcurrencyLimitLayer;
use tower::util::MapResponseLayer;
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::admin;
use crate::bus::{EventBus, EventPublisher};
use crate::config::RelayConfig;
use crate::http::handlers;
use crate::http::request::make_span;
use crate::lifecycle::Shutdown;
use crate::notifier::ChangeNotifier;
use crate::server::ConfigServer;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RelayConfig>,
    pub server: Arc<ConfigServer>,
    pub notifier: Arc<ChangeNotifier>,
    /// Publisher used by the admin refresh endpoint.
    pub publisher: Arc<dyn EventPublisher>,
    pub bus: EventBus,
    pub shutdown: Arc<Shutdown>,
    pub started_at: Instant,
}

/// HTTP front end of the relay.
pub struct HttpServer {
    router: Router,
    shutdown: Arc<Shutdown>,
    grace: Duration,
}

impl HttpServer {
    pub fn new(state: AppState) -> Self {
        let grace = Duration::from_secs(state.config.timeouts.shutdown_grace_secs);
        let shutdown = state.shutdown.clone();
        let router = Self::build_router(state);
        Self {
            router,
            shutdown,
            grace,
        }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(state: AppState) -> Router {
        let config = state.config.clone();
        let mut router = Router::new()
            .route("/health", get(handlers::health))
            .route("/monitor", post(handlers::monitor))
            .route("/bus/subscribe", get(handlers::bus_subscribe))
            .route("/{application}/{profile}", get(handlers::get_document))
            .route("/{application}/{profile}/{label}", get(handlers::get_labelled_document))
            .with_state(state.clone());

        if config.admin.enabled {
            router = router.merge(admin::router(state));
        }

        router.layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
                .layer(MapResponseLayer::new(|res: axum::response::Response<_>| {
                    res.map(axum::body::Body::new)
                }))
                .layer(RequestBodyLimitLayer::new(config.listener.max_body_bytes))
                .layer(GlobalConcurrencyLimitLayer::new(config.listener.max_connections)),
        )
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Serve on `listener` until `signal` resolves, then drain for at most
    /// the configured grace period.
    pub async fn run<F>(self, listener: TcpListener, signal: F) -> Result<(), std::io::Error>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let shutdown = self.shutdown.clone();
        let (fired_tx, fired_rx) = tokio::sync::oneshot::channel::<()>();
        let graceful = async move {
            signal.await;
            tracing::info!("Shutdown signal received, draining connections");
            shutdown.trigger();
            let _ = fired_tx.send(());
        };

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        let serve = axum::serve(listener, app)
            .with_graceful_shutdown(graceful)
            .into_future();
        tokio::pin!(serve);

        let grace = self.grace;
        tokio::select! {
            result = &mut serve => result?,
            _ = async {
                if fired_rx.await.is_ok() {
                    tokio::time::sleep(grace).await;
                } else {
                    std::future::pending::<()>().await;
                }
            } => {
                tracing::warn!(grace = ?grace, "Grace period elapsed, closing remaining connections");
            }
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Serve HTTPS on `addr` until `signal` resolves.
    pub async fn run_tls<F>(self, addr: SocketAddr, tls: RustlsConfig, signal: F) -> Result<(), std::io::Error>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        tracing::info!(address = %addr, "HTTPS server starting");
        let handle = axum_server::Handle::new();
        let shutdown = self.shutdown.clone();
        let grace = self.grace;
        let watcher = handle.clone();
        tokio::spawn(async move {
            signal.await;
            tracing::info!("Shutdown signal received, draining connections");
            shutdown.trigger();
            watcher.graceful_shutdown(Some(grace));
        });

        axum_server::bind_rustls(addr, tls)
            .handle(handle)
            .serve(self.router.into_make_service())
            .await?;

        tracing::info!("HTTPS server stopped");
        Ok(())
    }
}
