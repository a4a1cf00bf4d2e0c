//! Client refresh agent, embedded in configuration consumers.
//!
//! # Data Flow
//! ```text
//! bus frame ─▶ handle_frame
//!     → seen event id?          → ignore
//!     → no pattern matches key  → ignore
//!     → refresh()
//!         Idle → Refreshing → resolver.resolve(key, force)
//!         → fresh document  → swap snapshot
//!         → failure / stale → keep snapshot, arm retry timer
//!         → Idle
//! ```
//!
//! # Design Decisions
//! - The snapshot lives in an `ArcSwap`: readers never lock and never observe
//!   a half-applied document
//! - Refreshes are serialized; an event arriving mid-refresh waits and then
//!   re-resolves, so the last applied document is never older than the event
//! - A stale fallback from the server counts as a failed refresh

pub mod client;

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::bus::{BusFrame, EventHandler, FrameStream};
use crate::config::RetryConfig;
use crate::model::{ConfigDocument, ConfigKey, RefreshEvent};
use crate::observability::metrics;
use crate::resilience::backoff::backoff_for;
use crate::server::{ResolveError, Resolved};

pub use client::{ClientError, HttpConfigClient};

/// How many recent event ids an agent remembers.
const SEEN_CAPACITY: usize = 1024;

/// Anything that can resolve a configuration key.
#[async_trait]
pub trait ConfigResolver: Send + Sync {
    async fn resolve(&self, key: &ConfigKey, force_refresh: bool) -> Result<Resolved, ResolveError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AgentState {
    Idle = 0,
    Refreshing = 1,
}

impl AgentState {
    fn from_u8(v: u8) -> Self {
        if v == AgentState::Refreshing as u8 {
            AgentState::Refreshing
        } else {
            AgentState::Idle
        }
    }
}

/// The configuration an application is currently running with.
#[derive(Debug, Clone)]
pub struct ClientSnapshot {
    pub document: Arc<ConfigDocument>,
    pub revision: String,
    pub applied_at: DateTime<Utc>,
    /// Event that caused this snapshot, `None` for the initial fetch or a retry.
    pub event_id: Option<String>,
}

impl ClientSnapshot {
    fn new(document: Arc<ConfigDocument>, event_id: Option<String>) -> Self {
        Self {
            revision: document.source_revision.clone(),
            document,
            applied_at: Utc::now(),
            event_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AgentError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error("server returned stale configuration (revision {revision})")]
    Stale { revision: String },
}

/// What the agent did with a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    Duplicate,
    NotApplicable,
    Refreshed,
    Failed,
}

/// Bounded set of recently seen event ids.
#[derive(Default)]
struct SeenIds {
    order: VecDeque<String>,
    ids: HashSet<String>,
}

impl SeenIds {
    /// Record `id`; false if it was already present.
    fn insert(&mut self, id: &str) -> bool {
        if self.ids.contains(id) {
            return false;
        }
        if self.order.len() == SEEN_CAPACITY {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
        self.order.push_back(id.to_string());
        self.ids.insert(id.to_string());
        true
    }
}

/// Resets the agent to Idle when a refresh ends, however it ends.
struct RefreshingGuard<'a>(&'a AtomicU8);

impl Drop for RefreshingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(AgentState::Idle as u8, Ordering::Release);
    }
}

pub struct ClientRefreshAgent {
    key: ConfigKey,
    resolver: Arc<dyn ConfigResolver>,
    retry: RetryConfig,
    snapshot: ArcSwap<ClientSnapshot>,
    state: AtomicU8,
    seen: Mutex<SeenIds>,
    last_error: Mutex<Option<AgentError>>,
    failures: AtomicU32,
    retry_at: Mutex<Option<Instant>>,
    refresh_lock: tokio::sync::Mutex<()>,
}

impl ClientRefreshAgent {
    /// Fetch the initial configuration for `key` and build the agent around it.
    pub async fn start(
        resolver: Arc<dyn ConfigResolver>,
        key: ConfigKey,
        retry: RetryConfig,
    ) -> Result<Arc<Self>, AgentError> {
        let resolved = resolver.resolve(&key, false).await?;
        if resolved.stale {
            tracing::warn!(key = %key, revision = %resolved.document.source_revision, "Starting with stale configuration");
        }
        tracing::info!(key = %key, revision = %resolved.document.source_revision, "Initial configuration loaded");

        Ok(Arc::new(Self {
            snapshot: ArcSwap::from_pointee(ClientSnapshot::new(resolved.document, None)),
            key,
            resolver,
            retry,
            state: AtomicU8::new(AgentState::Idle as u8),
            seen: Mutex::new(SeenIds::default()),
            last_error: Mutex::new(None),
            failures: AtomicU32::new(0),
            retry_at: Mutex::new(None),
            refresh_lock: tokio::sync::Mutex::new(()),
        }))
    }

    pub fn key(&self) -> &ConfigKey {
        &self.key
    }

    /// The active snapshot. Lock-free.
    pub fn snapshot(&self) -> Arc<ClientSnapshot> {
        self.snapshot.load_full()
    }

    pub fn state(&self) -> AgentState {
        AgentState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn last_error(&self) -> Option<AgentError> {
        self.last_error.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Consecutive failed refreshes.
    pub fn failures(&self) -> u32 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Re-resolve the key and swap the snapshot on success.
    pub async fn refresh(&self, event_id: Option<String>) -> Result<Arc<ClientSnapshot>, AgentError> {
        let _serial = self.refresh_lock.lock().await;
        self.state.store(AgentState::Refreshing as u8, Ordering::Release);
        let _idle = RefreshingGuard(&self.state);

        let result = match self.resolver.resolve(&self.key, true).await {
            Ok(Resolved { document, stale: false }) => Ok(document),
            Ok(Resolved { document, stale: true }) => Err(AgentError::Stale {
                revision: document.source_revision.clone(),
            }),
            Err(e) => Err(AgentError::Resolve(e)),
        };

        match result {
            Ok(document) => {
                let previous = self.snapshot.load().revision.clone();
                let snapshot = Arc::new(ClientSnapshot::new(document, event_id));
                self.snapshot.store(snapshot.clone());
                *self.last_error.lock().unwrap_or_else(|e| e.into_inner()) = None;
                *self.retry_at.lock().unwrap_or_else(|e| e.into_inner()) = None;
                self.failures.store(0, Ordering::Relaxed);
                tracing::info!(
                    key = %self.key,
                    from = %previous,
                    to = %snapshot.revision,
                    event_id = ?snapshot.event_id,
                    "Configuration refreshed"
                );
                metrics::record_agent_refresh("success");
                Ok(snapshot)
            }
            Err(e) => {
                let failures = self.failures.fetch_add(1, Ordering::Relaxed).saturating_add(1);
                let delay = backoff_for(&self.retry, failures);
                *self.retry_at.lock().unwrap_or_else(|e| e.into_inner()) = Some(Instant::now() + delay);
                *self.last_error.lock().unwrap_or_else(|e| e.into_inner()) = Some(e.clone());
                tracing::warn!(
                    key = %self.key,
                    error = %e,
                    failures,
                    retry_in = ?delay,
                    "Refresh failed, keeping current configuration"
                );
                metrics::record_agent_refresh("failure");
                Err(e)
            }
        }
    }

    /// Apply a refresh event.
    pub async fn handle_event(&self, event: &RefreshEvent) -> Disposition {
        let first_time = self
            .seen
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(&event.event_id);
        if !first_time {
            tracing::debug!(event_id = %event.event_id, "Ignoring duplicate event");
            return Disposition::Duplicate;
        }
        if !event.matches(&self.key) {
            return Disposition::NotApplicable;
        }
        match self.refresh(Some(event.event_id.clone())).await {
            Ok(_) => Disposition::Refreshed,
            Err(_) => Disposition::Failed,
        }
    }

    pub async fn handle_frame(&self, frame: BusFrame) -> Disposition {
        match frame {
            BusFrame::Event(envelope) => self.handle_event(&envelope.event).await,
            BusFrame::Resync { latest_seq } => {
                tracing::info!(key = %self.key, latest_seq, "Bus resync, refreshing");
                match self.refresh(None).await {
                    Ok(_) => Disposition::Refreshed,
                    Err(_) => Disposition::Failed,
                }
            }
        }
    }

    fn retry_deadline(&self) -> Option<Instant> {
        *self.retry_at.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Process frames until the stream ends or `shutdown` fires, retrying
    /// failed refreshes on their backoff timer.
    pub async fn run<S: FrameStream>(self: Arc<Self>, mut frames: S, mut shutdown: broadcast::Receiver<()>) {
        loop {
            let retry_at = self.retry_deadline();
            let retry_timer = async move {
                match retry_at {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                frame = frames.next_frame() => match frame {
                    Some(frame) => {
                        self.handle_frame(frame).await;
                    }
                    None => {
                        tracing::info!(key = %self.key, "Event stream closed");
                        break;
                    }
                },
                _ = retry_timer => {
                    tracing::debug!(key = %self.key, "Retrying failed refresh");
                    let _ = self.refresh(None).await;
                }
                _ = shutdown.recv() => break,
            }
        }
    }
}

#[async_trait]
impl EventHandler for ClientRefreshAgent {
    async fn on_event(&self, event: &RefreshEvent) {
        self.handle_event(event).await;
    }

    async fn on_resync(&self) {
        let _ = self.refresh(None).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{BusEnvelope, EventBus};
    use crate::model::{EventOrigin, KeyPattern};
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::time::Duration;

    struct FakeResolver {
        revision: AtomicUsize,
        calls: AtomicUsize,
        down: AtomicBool,
    }

    impl FakeResolver {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                revision: AtomicUsize::new(1),
                calls: AtomicUsize::new(0),
                down: AtomicBool::new(false),
            })
        }
    }

    #[async_trait]
    impl ConfigResolver for FakeResolver {
        async fn resolve(&self, key: &ConfigKey, _force: bool) -> Result<Resolved, ResolveError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.down.load(Ordering::SeqCst) {
                return Err(ResolveError::ConfigUnavailable {
                    key: key.clone(),
                    reason: "down".into(),
                });
            }
            let rev = format!("r{}", self.revision.load(Ordering::SeqCst));
            let mut props = crate::model::Properties::new();
            props.insert("revision".into(), rev.as_str().into());
            Ok(Resolved {
                document: Arc::new(ConfigDocument::new(key.clone(), rev, props, vec![])),
                stale: false,
            })
        }
    }

    fn key() -> ConfigKey {
        ConfigKey::new("dataCatalog", "prod", "master")
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            enabled: true,
            max_attempts: 3,
            base_delay_ms: 10,
            max_delay_ms: 50,
        }
    }

    fn event(id: &str, pattern: &str) -> RefreshEvent {
        RefreshEvent::new(id, [pattern.parse::<KeyPattern>().unwrap()].into(), None, EventOrigin::Admin)
    }

    #[tokio::test]
    async fn test_matching_event_swaps_snapshot() {
        let resolver = FakeResolver::new();
        let agent = ClientRefreshAgent::start(resolver.clone(), key(), fast_retry()).await.unwrap();
        assert_eq!(agent.snapshot().revision, "r1");

        resolver.revision.store(2, Ordering::SeqCst);
        assert_eq!(agent.handle_event(&event("e1", "dataCatalog:prod")).await, Disposition::Refreshed);
        let snap = agent.snapshot();
        assert_eq!(snap.revision, "r2");
        assert_eq!(snap.event_id.as_deref(), Some("e1"));
        assert_eq!(agent.state(), AgentState::Idle);
    }

    #[tokio::test]
    async fn test_duplicate_and_unrelated_events_are_ignored() {
        let resolver = FakeResolver::new();
        let agent = ClientRefreshAgent::start(resolver.clone(), key(), fast_retry()).await.unwrap();

        assert_eq!(agent.handle_event(&event("e1", "*")).await, Disposition::Refreshed);
        assert_eq!(agent.handle_event(&event("e1", "*")).await, Disposition::Duplicate);
        assert_eq!(agent.handle_event(&event("e2", "billing")).await, Disposition::NotApplicable);
        // One initial resolve plus one refresh.
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_snapshot() {
        let resolver = FakeResolver::new();
        let agent = ClientRefreshAgent::start(resolver.clone(), key(), fast_retry()).await.unwrap();

        resolver.down.store(true, Ordering::SeqCst);
        resolver.revision.store(2, Ordering::SeqCst);
        assert_eq!(agent.handle_event(&event("e1", "*")).await, Disposition::Failed);
        assert_eq!(agent.snapshot().revision, "r1");
        assert!(matches!(agent.last_error(), Some(AgentError::Resolve(_))));
        assert_eq!(agent.failures(), 1);
        assert_eq!(agent.state(), AgentState::Idle);
    }

    #[tokio::test]
    async fn test_run_retries_after_failure() {
        let resolver = FakeResolver::new();
        let agent = ClientRefreshAgent::start(resolver.clone(), key(), fast_retry()).await.unwrap();
        let bus = EventBus::new(8);
        let shutdown = crate::lifecycle::Shutdown::new();
        let task = tokio::spawn(agent.clone().run(bus.subscribe(), shutdown.subscribe()));

        resolver.down.store(true, Ordering::SeqCst);
        resolver.revision.store(2, Ordering::SeqCst);
        bus.publish(event("e1", "dataCatalog")).unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        resolver.down.store(false, Ordering::SeqCst);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(agent.snapshot().revision, "r2");
        assert!(agent.last_error().is_none());

        shutdown.trigger();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_resync_frame_forces_refresh() {
        let resolver = FakeResolver::new();
        let agent = ClientRefreshAgent::start(resolver.clone(), key(), fast_retry()).await.unwrap();
        resolver.revision.store(5, Ordering::SeqCst);
        let disposition = agent.handle_frame(BusFrame::Resync { latest_seq: 9 }).await;
        assert_eq!(disposition, Disposition::Refreshed);
        assert_eq!(agent.snapshot().revision, "r5");

        let envelope = BusEnvelope { seq: 10, event: event("e10", "*") };
        assert_eq!(agent.handle_frame(BusFrame::Event(envelope)).await, Disposition::Refreshed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_readers_never_see_torn_snapshot() {
        let resolver = FakeResolver::new();
        let agent = ClientRefreshAgent::start(resolver.clone(), key(), fast_retry()).await.unwrap();
        let stop = Arc::new(AtomicBool::new(false));

        let mut readers = Vec::new();
        for _ in 0..4 {
            let agent = agent.clone();
            let stop = stop.clone();
            readers.push(tokio::spawn(async move {
                let mut reads = 0u64;
                loop {
                    let snap = agent.snapshot();
                    let inner = snap.document.get("revision").and_then(|v| v.as_str()).unwrap();
                    assert_eq!(inner, snap.revision);
                    assert_eq!(snap.document.source_revision, snap.revision);
                    reads += 1;
                    if stop.load(Ordering::Relaxed) {
                        break reads;
                    }
                    tokio::task::yield_now().await;
                }
            }));
        }

        for rev in 2..50 {
            resolver.revision.store(rev, Ordering::SeqCst);
            agent.refresh(None).await.unwrap();
        }
        stop.store(true, Ordering::Relaxed);
        for r in readers {
            assert!(r.await.unwrap() > 0);
        }
        assert_eq!(agent.snapshot().revision, "r49");
    }

    #[tokio::test]
    async fn test_subscribe_with_drives_agent() {
        let resolver = FakeResolver::new();
        let agent = ClientRefreshAgent::start(resolver.clone(), key(), fast_retry()).await.unwrap();
        let bus = EventBus::new(8);
        let task = bus.subscribe_with(agent.clone());

        resolver.revision.store(3, Ordering::SeqCst);
        bus.publish(event("e1", "dataCatalog:prod:master")).unwrap();
        bus.close();
        task.await.unwrap();
        assert_eq!(agent.snapshot().revision, "r3");
    }
}
