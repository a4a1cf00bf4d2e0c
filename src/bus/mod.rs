//! Event bus: fans refresh events out to every subscriber.
//!
//! # Responsibilities
//! - Assign each published event a monotonically increasing sequence number
//! - Deliver to every subscriber in publish order (per-subscriber FIFO)
//! - Retain a bounded replay log so reconnecting subscribers catch up
//!
//! # Design Decisions
//! - Publish never blocks: each subscriber owns an unbounded queue, so a slow
//!   consumer cannot stall the publisher or its siblings
//! - Replay and registration happen under the same lock as publish, so a
//!   subscriber never misses an event between catch-up and live delivery
//! - Delivery is at-least-once; consumers dedupe by `event_id`
//! - A subscriber whose position fell out of the replay log receives
//!   [`BusFrame::Resync`] and must refresh unconditionally

pub mod remote;

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::config::RetryConfig;
use crate::model::RefreshEvent;
use crate::observability::metrics;
use crate::resilience::backoff::backoff_for;

pub use remote::RemoteSubscriber;

/// Failure publishing an event.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PublishError {
    #[error("event bus is closed")]
    Closed,

    #[error("transport error: {0}")]
    Transport(String),
}

impl PublishError {
    pub fn is_transient(&self) -> bool {
        matches!(self, PublishError::Transport(_))
    }
}

/// An event with its bus sequence number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusEnvelope {
    pub seq: u64,
    pub event: RefreshEvent,
}

/// What a subscriber receives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BusFrame {
    Event(BusEnvelope),
    /// Events were lost; everything up to `latest_seq` should be considered changed.
    #[serde(rename_all = "camelCase")]
    Resync { latest_seq: u64 },
}

impl BusFrame {
    pub fn seq(&self) -> u64 {
        match self {
            BusFrame::Event(envelope) => envelope.seq,
            BusFrame::Resync { latest_seq } => *latest_seq,
        }
    }
}

/// Anything events can be handed to.
pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: RefreshEvent) -> Result<(), PublishError>;
}

/// Callback-style consumer driven by [`EventBus::subscribe_with`].
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn on_event(&self, event: &RefreshEvent);

    /// Called when events may have been lost.
    async fn on_resync(&self) {}
}

/// A source of bus frames: a local subscription or a remote connection.
#[async_trait]
pub trait FrameStream: Send {
    /// Next frame, or `None` once the source is closed.
    async fn next_frame(&mut self) -> Option<BusFrame>;
}

#[async_trait]
impl FrameStream for mpsc::UnboundedReceiver<BusFrame> {
    async fn next_frame(&mut self) -> Option<BusFrame> {
        self.recv().await
    }
}

struct Inner {
    latest_seq: u64,
    log: VecDeque<BusEnvelope>,
    subscribers: HashMap<u64, mpsc::UnboundedSender<BusFrame>>,
    next_subscriber: u64,
    closed: bool,
}

/// In-process event bus. Cloning yields another handle to the same bus.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Mutex<Inner>>,
    capacity: usize,
}

impl EventBus {
    pub fn new(replay_capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                latest_seq: 0,
                log: VecDeque::with_capacity(replay_capacity.min(4096)),
                subscribers: HashMap::new(),
                next_subscriber: 0,
                closed: false,
            })),
            capacity: replay_capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Publish `event` to every current subscriber. Returns its sequence number.
    pub fn publish(&self, event: RefreshEvent) -> Result<u64, PublishError> {
        let mut inner = self.lock();
        if inner.closed {
            return Err(PublishError::Closed);
        }

        inner.latest_seq += 1;
        let envelope = BusEnvelope {
            seq: inner.latest_seq,
            event,
        };

        if self.capacity > 0 {
            if inner.log.len() == self.capacity {
                inner.log.pop_front();
            }
            inner.log.push_back(envelope.clone());
        }

        // Receivers that went away are pruned here.
        inner
            .subscribers
            .retain(|_, tx| tx.send(BusFrame::Event(envelope.clone())).is_ok());

        tracing::debug!(
            seq = envelope.seq,
            event_id = %envelope.event.event_id,
            subscribers = inner.subscribers.len(),
            "Event published"
        );
        metrics::record_bus_published();
        metrics::record_bus_subscribers(inner.subscribers.len());
        Ok(envelope.seq)
    }

    /// Subscribe to events published from now on.
    pub fn subscribe(&self) -> Subscription {
        self.register(None)
    }

    /// Subscribe, first replaying retained events with `seq > since`.
    pub fn subscribe_from(&self, since: u64) -> Subscription {
        self.register(Some(since))
    }

    fn register(&self, since: Option<u64>) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.lock();

        if let Some(since) = since {
            let oldest = inner.log.front().map(|e| e.seq).unwrap_or(inner.latest_seq + 1);
            // Either events after `since` were evicted, or `since` comes from
            // a bus with a different history (e.g. before a restart).
            let lost = since + 1 < oldest && since < inner.latest_seq;
            if lost || since > inner.latest_seq {
                tracing::info!(since, latest_seq = inner.latest_seq, "Subscriber must resync");
                let _ = tx.send(BusFrame::Resync {
                    latest_seq: inner.latest_seq,
                });
            }
            for envelope in inner.log.iter().filter(|e| e.seq > since) {
                let _ = tx.send(BusFrame::Event(envelope.clone()));
            }
        }

        let id = inner.next_subscriber;
        inner.next_subscriber += 1;
        if !inner.closed {
            inner.subscribers.insert(id, tx);
        }
        metrics::record_bus_subscribers(inner.subscribers.len());

        Subscription {
            id,
            rx,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Drive `handler` from a new subscription until the bus closes.
    pub fn subscribe_with(&self, handler: Arc<dyn EventHandler>) -> tokio::task::JoinHandle<()> {
        let mut subscription = self.subscribe();
        tokio::spawn(async move {
            while let Some(frame) = subscription.recv().await {
                match frame {
                    BusFrame::Event(envelope) => handler.on_event(&envelope.event).await,
                    BusFrame::Resync { .. } => handler.on_resync().await,
                }
            }
        })
    }

    /// Stop accepting events and end every subscription.
    pub fn close(&self) {
        let mut inner = self.lock();
        inner.closed = true;
        inner.subscribers.clear();
        metrics::record_bus_subscribers(0);
        tracing::info!("Event bus closed");
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    pub fn latest_seq(&self) -> u64 {
        self.lock().latest_seq
    }
}

impl EventPublisher for EventBus {
    fn publish(&self, event: RefreshEvent) -> Result<(), PublishError> {
        EventBus::publish(self, event).map(|_| ())
    }
}

/// A FIFO stream of frames from one [`EventBus`]. Unsubscribes on drop.
pub struct Subscription {
    id: u64,
    rx: mpsc::UnboundedReceiver<BusFrame>,
    bus: std::sync::Weak<Mutex<Inner>>,
}

impl Subscription {
    /// Next frame, or `None` once the bus is closed.
    pub async fn recv(&mut self) -> Option<BusFrame> {
        self.rx.recv().await
    }
}

#[async_trait]
impl FrameStream for Subscription {
    async fn next_frame(&mut self) -> Option<BusFrame> {
        self.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.bus.upgrade() {
            let mut inner = inner.lock().unwrap_or_else(|e| e.into_inner());
            inner.subscribers.remove(&self.id);
            metrics::record_bus_subscribers(inner.subscribers.len());
        }
    }
}

/// Publisher that never makes its caller wait on a transient failure.
///
/// Transient errors are retried in the background with bounded backoff;
/// permanent errors are returned immediately.
pub struct RetryingPublisher {
    inner: Arc<dyn EventPublisher>,
    retry: RetryConfig,
}

impl RetryingPublisher {
    pub fn new(inner: Arc<dyn EventPublisher>, retry: RetryConfig) -> Self {
        Self { inner, retry }
    }
}

impl EventPublisher for RetryingPublisher {
    fn publish(&self, event: RefreshEvent) -> Result<(), PublishError> {
        let err = match self.inner.publish(event.clone()) {
            Ok(()) => return Ok(()),
            Err(e) if e.is_transient() && self.retry.enabled && self.retry.max_attempts > 1 => e,
            Err(e) => return Err(e),
        };

        let runtime = tokio::runtime::Handle::try_current().map_err(|_| err.clone())?;
        tracing::warn!(event_id = %event.event_id, error = %err, "Publish failed, retrying in background");

        let inner = self.inner.clone();
        let retry = self.retry.clone();
        runtime.spawn(async move {
            for attempt in 1..retry.max_attempts {
                tokio::time::sleep(backoff_for(&retry, attempt)).await;
                match inner.publish(event.clone()) {
                    Ok(()) => {
                        tracing::info!(event_id = %event.event_id, attempt, "Publish succeeded after retry");
                        return;
                    }
                    Err(e) if e.is_transient() => {
                        tracing::warn!(event_id = %event.event_id, attempt, error = %e, "Publish retry failed");
                    }
                    Err(e) => {
                        tracing::error!(event_id = %event.event_id, error = %e, "Publish abandoned");
                        return;
                    }
                }
            }
            tracing::error!(event_id = %event.event_id, "Publish retries exhausted, event dropped");
        });
        Ok(())
    }
}
