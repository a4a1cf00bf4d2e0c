//! WebSocket transport for the event bus.
//!
//! # Data Flow
//! ```text
//! EventBus ── Subscription ──▶ serve_socket ══ JSON text frames ══▶ RemoteSubscriber ──▶ mpsc ──▶ agent
//! ```
//!
//! Each text frame is one serialized [`BusFrame`]. The subscriber remembers
//! the last sequence number it saw and reconnects with `?since=<seq>`, so
//! events published while it was away are replayed.

use axum::extract::ws::{Message, WebSocket};
use futures_util::StreamExt;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use url::Url;

use crate::bus::{BusFrame, Subscription};
use crate::config::RetryConfig;
use crate::resilience::backoff::backoff_for;

/// Stream `subscription` to a connected client until either side goes away.
pub async fn serve_socket(
    mut socket: WebSocket,
    mut subscription: Subscription,
    mut shutdown: broadcast::Receiver<()>,
) {
    tracing::debug!("Bus subscriber connected");
    loop {
        tokio::select! {
            frame = subscription.recv() => {
                let Some(frame) = frame else {
                    let _ = socket.send(Message::Close(None)).await;
                    break;
                };
                let text = match serde_json::to_string(&frame) {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to encode bus frame");
                        continue;
                    }
                };
                if socket.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            msg = socket.next() => {
                match msg {
                    Some(Ok(Message::Ping(payload))) => {
                        let _ = socket.send(Message::Pong(payload)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!(error = %e, "Bus subscriber socket error");
                        break;
                    }
                }
            }
            _ = shutdown.recv() => {
                let _ = socket.send(Message::Close(None)).await;
                break;
            }
        }
    }
    tracing::debug!("Bus subscriber disconnected");
}

/// Client side of the bus transport with automatic reconnect.
pub struct RemoteSubscriber {
    url: Url,
    retry: RetryConfig,
}

impl RemoteSubscriber {
    /// `url` is the full `ws://host:port/bus/subscribe` endpoint.
    pub fn new(url: &str, retry: RetryConfig) -> Result<Self, url::ParseError> {
        Ok(Self {
            url: Url::parse(url)?,
            retry,
        })
    }

    fn url_since(&self, since: Option<u64>) -> Url {
        let mut url = self.url.clone();
        if let Some(seq) = since {
            url.query_pairs_mut().append_pair("since", &seq.to_string());
        }
        url
    }

    /// Connect in the background. Frames arrive on the returned receiver,
    /// which closes after `shutdown` fires.
    pub fn spawn(
        self,
        shutdown: broadcast::Receiver<()>,
    ) -> (mpsc::UnboundedReceiver<BusFrame>, tokio::task::JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(self.run(tx, shutdown));
        (rx, handle)
    }

    async fn run(self, tx: mpsc::UnboundedSender<BusFrame>, mut shutdown: broadcast::Receiver<()>) {
        let mut last_seq: Option<u64> = None;
        let mut failures: u32 = 0;

        loop {
            let url = self.url_since(last_seq);
            let connected = tokio::select! {
                result = tokio_tungstenite::connect_async(url.as_str()) => result,
                _ = shutdown.recv() => return,
            };

            match connected {
                Ok((mut stream, _)) => {
                    tracing::info!(url = %url, "Connected to event bus");
                    failures = 0;
                    loop {
                        tokio::select! {
                            msg = stream.next() => match msg {
                                Some(Ok(WsMessage::Text(text))) => {
                                    match serde_json::from_str::<BusFrame>(text.as_str()) {
                                        Ok(frame) => {
                                            last_seq = Some(frame.seq());
                                            if tx.send(frame).is_err() {
                                                return;
                                            }
                                        }
                                        Err(e) => tracing::warn!(error = %e, "Ignoring malformed bus frame"),
                                    }
                                }
                                Some(Ok(WsMessage::Close(_))) | None => break,
                                Some(Ok(_)) => {}
                                Some(Err(e)) => {
                                    tracing::warn!(error = %e, "Event bus connection lost");
                                    break;
                                }
                            },
                            _ = shutdown.recv() => {
                                let _ = stream.close(None).await;
                                return;
                            }
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(url = %url, error = %e, "Failed to connect to event bus");
                }
            }

            if tx.is_closed() {
                return;
            }
            failures = failures.saturating_add(1);
            let delay = backoff_for(&self.retry, failures);
            tracing::debug!(delay = ?delay, last_seq = ?last_seq, "Reconnecting to event bus");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.recv() => return,
            }
        }
    }
}
