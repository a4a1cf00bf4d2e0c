//! Load tests: concurrent reads against the relay.

use std::time::{Duration, Instant};

use axum::http::StatusCode;

mod common;

use common::{spawn_relay, test_config, MemoryStore};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cold_miss_coalesces_concurrent_reads() {
    let store = MemoryStore::new("abc123");
    store.put("dataCatalog", "prod", &[("db.url", "postgres://prod")]);
    store.set_delay(Duration::from_millis(300));
    let relay = spawn_relay(test_config(), store.clone()).await;

    let client = reqwest::Client::new();
    let mut tasks = Vec::new();
    for _ in 0..50 {
        let client = client.clone();
        let url = relay.url("/dataCatalog/prod");
        tasks.push(tokio::spawn(async move {
            let res = client.get(url).send().await.unwrap();
            assert_eq!(res.status(), StatusCode::OK);
            let body: serde_json::Value = res.json().await.unwrap();
            body["version"].as_str().unwrap().to_string()
        }));
    }
    for task in tasks {
        assert_eq!(task.await.unwrap(), "abc123");
    }

    assert_eq!(store.calls(), 1, "concurrent misses must share one store fetch");
    relay.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cached_read_throughput() {
    let store = MemoryStore::new("abc123");
    store.put("dataCatalog", "prod", &[("db.url", "postgres://prod")]);
    let relay = spawn_relay(test_config(), store.clone()).await;

    let concurrency = 20;
    let requests_per_task = 50;
    let total_requests = concurrency * requests_per_task;

    let client = reqwest::Client::new();
    let start = Instant::now();
    let mut tasks = Vec::new();
    for _ in 0..concurrency {
        let client = client.clone();
        let url = relay.url("/dataCatalog/prod");
        tasks.push(tokio::spawn(async move {
            let mut ok = 0;
            for _ in 0..requests_per_task {
                if let Ok(res) = client.get(&url).send().await {
                    if res.status() == StatusCode::OK {
                        ok += 1;
                    }
                }
            }
            ok
        }));
    }

    let mut ok = 0;
    for task in tasks {
        ok += task.await.unwrap();
    }
    let elapsed = start.elapsed();
    println!(
        "{} requests in {:?} ({:.0} req/s)",
        total_requests,
        elapsed,
        total_requests as f64 / elapsed.as_secs_f64()
    );

    assert_eq!(ok, total_requests);
    assert_eq!(store.calls(), 1);
    relay.stop().await;
}
