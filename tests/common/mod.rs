//! Shared utilities for integration and load testing.
#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

use config_relay::config::RelayConfig;
use config_relay::model::{ConfigDocument, ConfigKey, Properties, PropertyValue};
use config_relay::store::{ConfigStore, StoreError};
use config_relay::App;

/// In-memory store keyed by `application/profile`, with a switchable outage
/// and an optional per-fetch delay.
#[derive(Default)]
pub struct MemoryStore {
    pub revision: Mutex<String>,
    pub documents: Mutex<HashMap<(String, String), Properties>>,
    pub calls: AtomicUsize,
    pub down: AtomicBool,
    pub delay: Mutex<Duration>,
}

impl MemoryStore {
    pub fn new(revision: &str) -> Arc<Self> {
        let store = Self::default();
        *store.revision.lock().unwrap() = revision.to_string();
        Arc::new(store)
    }

    pub fn put(&self, application: &str, profile: &str, pairs: &[(&str, &str)]) {
        let props = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), PropertyValue::from(*v)))
            .collect();
        self.documents
            .lock()
            .unwrap()
            .insert((application.to_string(), profile.to_string()), props);
    }

    pub fn set_revision(&self, revision: &str) {
        *self.revision.lock().unwrap() = revision.to_string();
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConfigStore for MemoryStore {
    async fn fetch(&self, key: &ConfigKey) -> Result<ConfigDocument, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        tokio::time::sleep(delay).await;
        if self.down.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("repository unreachable".into()));
        }
        let props = self
            .documents
            .lock()
            .unwrap()
            .get(&(key.application.clone(), key.profile.clone()))
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.clone()))?;
        let revision = self.revision.lock().unwrap().clone();
        let source = format!("{}/{}.yml", key.application, key.profile);
        Ok(ConfigDocument::new(key.clone(), revision, props, vec![source]))
    }

    fn name(&self) -> &str {
        "memory"
    }
}

/// A relay serving on an ephemeral port.
pub struct Relay {
    pub addr: SocketAddr,
    pub app_state: config_relay::http::AppState,
    stop: Option<oneshot::Sender<()>>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl Relay {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn ws_url(&self, path: &str) -> String {
        format!("ws://{}{}", self.addr, path)
    }

    pub async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = tokio::time::timeout(Duration::from_secs(5), task).await;
        }
    }
}

/// Test defaults: fast retries, short timeouts, admin enabled.
pub fn test_config() -> RelayConfig {
    let mut config = RelayConfig::default();
    config.listener.bind_address = "127.0.0.1:0".into();
    config.repository.fetch_timeout_ms = 2_000;
    config.retries.max_attempts = 2;
    config.retries.base_delay_ms = 10;
    config.retries.max_delay_ms = 50;
    config.timeouts.shutdown_grace_secs = 1;
    config.admin.enabled = true;
    config.admin.api_key = "test-admin-key".into();
    config
}

/// Start a relay around `store` on 127.0.0.1 with an OS-assigned port.
pub async fn spawn_relay(config: RelayConfig, store: Arc<dyn ConfigStore>) -> Relay {
    let app = App::with_store(config, store).expect("valid test config");
    let app_state = app.state().clone();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let task = tokio::spawn(async move {
        let signal = async move {
            let _ = stop_rx.await;
        };
        app.run(listener, signal).await.unwrap();
    });

    Relay {
        addr,
        app_state,
        stop: Some(stop_tx),
        task: Some(task),
    }
}

/// Poll `check` until it holds or `timeout` elapses.
pub async fn eventually<F: Fn() -> bool>(timeout: Duration, check: F) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}
