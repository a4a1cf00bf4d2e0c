//! Failure injection: store outages, slow stores, and broken bus connections.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::StatusCode;
use config_relay::agent::{AgentError, ClientRefreshAgent, HttpConfigClient};
use config_relay::bus::{BusFrame, RemoteSubscriber};
use config_relay::config::RetryConfig;
use config_relay::model::{EventOrigin, KeyPattern};
use config_relay::{ConfigKey, RefreshEvent, Shutdown};
use futures_util::StreamExt;
use tokio_tungstenite::tungstenite::Message;

mod common;

use common::{eventually, spawn_relay, test_config, MemoryStore};

fn fast_retry() -> RetryConfig {
    RetryConfig {
        enabled: true,
        max_attempts: 3,
        base_delay_ms: 20,
        max_delay_ms: 100,
    }
}

fn refresh(id: &str, pattern: &str) -> RefreshEvent {
    RefreshEvent::new(
        id,
        [pattern.parse::<KeyPattern>().unwrap()].into(),
        None,
        EventOrigin::Admin,
    )
}

#[tokio::test]
async fn test_slow_store_times_out() {
    let store = MemoryStore::new("abc123");
    store.put("dataCatalog", "prod", &[("a", "1")]);
    store.set_delay(Duration::from_secs(10));
    let mut config = test_config();
    config.repository.fetch_timeout_ms = 200;
    let relay = spawn_relay(config, store).await;

    let start = Instant::now();
    let res = reqwest::get(relay.url("/dataCatalog/prod")).await.unwrap();
    assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert!(start.elapsed() < Duration::from_secs(3));

    relay.stop().await;
}

#[tokio::test]
async fn test_transient_store_failure_is_retried() {
    let store = MemoryStore::new("abc123");
    store.put("dataCatalog", "prod", &[("a", "1")]);
    store.set_down(true);
    let relay = spawn_relay(test_config(), store.clone()).await;

    let res = reqwest::get(relay.url("/dataCatalog/prod")).await.unwrap();
    assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "unavailable");
    // test_config allows two attempts per resolve.
    assert_eq!(store.calls(), 2);

    store.set_down(false);
    let res = reqwest::get(relay.url("/dataCatalog/prod")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    relay.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_agent_keeps_snapshot_through_outage() {
    let store = MemoryStore::new("abc123");
    store.put("dataCatalog", "prod", &[("a", "1")]);
    let relay = spawn_relay(test_config(), store.clone()).await;

    let resolver = Arc::new(HttpConfigClient::new(&relay.url(""), Duration::from_secs(5)).unwrap());
    let agent = ClientRefreshAgent::start(resolver, ConfigKey::new("dataCatalog", "prod", "master"), fast_retry())
        .await
        .unwrap();

    store.set_down(true);
    store.set_revision("abc124");
    let shutdown = Shutdown::new();
    let (frames, _conn) = RemoteSubscriber::new(&relay.ws_url("/bus/subscribe"), fast_retry())
        .unwrap()
        .spawn(shutdown.subscribe());
    tokio::spawn(agent.clone().run(frames, shutdown.subscribe()));
    let bus = relay.app_state.bus.clone();
    assert!(eventually(Duration::from_secs(5), || bus.subscriber_count() == 2).await);

    bus.publish(refresh("outage-1", "dataCatalog")).unwrap();

    assert!(eventually(Duration::from_secs(5), || agent.failures() > 0).await);
    assert_eq!(agent.snapshot().revision, "abc123");
    assert!(matches!(agent.last_error(), Some(AgentError::Stale { .. })));

    // The agent retries on its own once the store recovers.
    store.set_down(false);
    assert!(eventually(Duration::from_secs(5), || agent.snapshot().revision == "abc124").await);
    assert_eq!(agent.failures(), 0);

    shutdown.trigger();
    relay.stop().await;
}

#[tokio::test]
async fn test_reconnecting_subscriber_replays_missed_events() {
    let relay = spawn_relay(test_config(), MemoryStore::new("abc123")).await;
    let bus = relay.app_state.bus.clone();
    for i in 1..=3 {
        bus.publish(refresh(&format!("evt-{}", i), "dataCatalog")).unwrap();
    }

    let (mut socket, _) = tokio_tungstenite::connect_async(relay.ws_url("/bus/subscribe?since=1"))
        .await
        .unwrap();
    let mut seqs = Vec::new();
    while seqs.len() < 2 {
        let msg = tokio::time::timeout(Duration::from_secs(2), socket.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        if let Message::Text(text) = msg {
            let frame: BusFrame = serde_json::from_str(text.as_str()).unwrap();
            let BusFrame::Event(envelope) = frame else {
                panic!("unexpected resync");
            };
            seqs.push((envelope.seq, envelope.event.event_id));
        }
    }
    assert_eq!(
        seqs,
        vec![(2, "evt-2".to_string()), (3, "evt-3".to_string())]
    );

    relay.stop().await;
}

#[tokio::test]
async fn test_subscriber_ahead_of_bus_gets_resync() {
    let relay = spawn_relay(test_config(), MemoryStore::new("abc123")).await;
    relay.app_state.bus.publish(refresh("evt-1", "*")).unwrap();

    let (mut socket, _) = tokio_tungstenite::connect_async(relay.ws_url("/bus/subscribe?since=99"))
        .await
        .unwrap();
    let msg = tokio::time::timeout(Duration::from_secs(2), socket.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let Message::Text(text) = msg else {
        panic!("expected text frame");
    };
    let frame: BusFrame = serde_json::from_str(text.as_str()).unwrap();
    assert_eq!(frame, BusFrame::Resync { latest_seq: 1 });

    relay.stop().await;
}

#[tokio::test]
async fn test_shutdown_closes_bus_sockets() {
    let relay = spawn_relay(test_config(), MemoryStore::new("abc123")).await;
    let (mut socket, _) = tokio_tungstenite::connect_async(relay.ws_url("/bus/subscribe"))
        .await
        .unwrap();
    let bus = relay.app_state.bus.clone();
    assert!(eventually(Duration::from_secs(2), || bus.subscriber_count() == 2).await);

    relay.stop().await;

    let closed = tokio::time::timeout(Duration::from_secs(3), async {
        loop {
            match socket.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            }
        }
    })
    .await;
    assert!(closed.is_ok());
}
