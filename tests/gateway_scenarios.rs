//! End-to-end behavior of the mediation pipeline over real sockets.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mock_gateway::config::CircuitBreakerConfig;

mod common;

#[tokio::test]
async fn test_second_get_served_from_cache() {
    let gateway = common::start_gateway(common::config_with(vec![common::service("pets", "fresh")])).await;
    let client = common::client();

    let first = client.get(gateway.url("/pets/x")).send().await.unwrap();
    assert_eq!(first.status(), 200);
    assert_eq!(first.headers()["x-cxs-source"], "generated");
    assert_eq!(first.text().await.unwrap(), "fresh");

    let second = client.get(gateway.url("/pets/x")).send().await.unwrap();
    assert_eq!(second.status(), 200);
    assert_eq!(second.headers()["x-cxs-source"], "cache");
    let duration = second.headers()["x-cxs-duration"].to_str().unwrap().to_string();
    assert!(duration.ends_with("ms"), "duration header was {duration}");
    assert_eq!(second.text().await.unwrap(), "fresh");
}

#[tokio::test]
async fn test_failing_upstream_falls_back_to_generated_response() {
    let upstream = common::start_mock_backend(500, r#"{"error":"boom"}"#).await;
    let mut pets = common::with_upstream(common::service("pets", "local"), upstream);
    pets.cache.requests = false;
    let gateway = common::start_gateway(common::config_with(vec![pets])).await;
    let client = common::client();

    let res = client.get(gateway.url("/pets/x")).send().await.unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.headers()["x-cxs-source"], "generated");
    assert_eq!(res.text().await.unwrap(), "local");

    let history: serde_json::Value = client
        .get(gateway.url("/.services/pets/history"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let response = &history["GET:/pets/x"]["response"];
    assert_eq!(response["is_from_upstream"], false);
    assert_eq!(response["status_code"], 200);
}

#[tokio::test]
async fn test_successful_upstream_answer_is_returned() {
    let upstream = common::start_mock_backend(200, r#"{"from":"upstream"}"#).await;
    let pets = common::with_upstream(common::service("pets", "local"), upstream);
    let gateway = common::start_gateway(common::config_with(vec![pets])).await;

    let res = common::client().get(gateway.url("/pets/x")).send().await.unwrap();
    assert_eq!(res.headers()["x-cxs-source"], "upstream");
    assert_eq!(res.headers()["content-type"], "application/json");
    assert_eq!(res.text().await.unwrap(), r#"{"from":"upstream"}"#);
}

#[tokio::test]
async fn test_breaker_opens_after_repeated_failures() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let upstream = common::start_programmable_backend(move || {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            (503, "unavailable".to_string())
        }
    })
    .await;

    let mut pets = common::with_upstream(common::service("pets", "local"), upstream);
    pets.cache.requests = false;
    if let Some(upstream) = pets.upstream.as_mut() {
        upstream.circuit_breaker = Some(CircuitBreakerConfig {
            min_requests: 3,
            failure_ratio: 0.6,
            timeout: Duration::from_secs(60),
            ..CircuitBreakerConfig::default()
        });
    }
    let gateway = common::start_gateway(common::config_with(vec![pets])).await;
    let client = common::client();

    for _ in 0..4 {
        let res = client.get(gateway.url("/pets/x")).send().await.unwrap();
        assert_eq!(res.text().await.unwrap(), "local");
    }
    assert_eq!(calls.load(Ordering::SeqCst), 3, "fourth call must not reach the upstream");
}

#[tokio::test]
async fn test_override_applies_to_one_request_only() {
    let mut pets = common::service("pets", "fresh");
    pets.cache.requests = false;
    let gateway = common::start_gateway(common::config_with(vec![pets])).await;
    let client = common::client();

    client.get(gateway.url("/pets/x")).send().await.unwrap();

    let cached = client
        .get(gateway.url("/pets/x"))
        .header("X-Cxs-Cache-Requests", "true")
        .send()
        .await
        .unwrap();
    assert_eq!(cached.headers()["x-cxs-source"], "cache");

    let after = client.get(gateway.url("/pets/x")).send().await.unwrap();
    assert_eq!(after.headers()["x-cxs-source"], "generated");
}

#[tokio::test]
async fn test_latency_override_delays_one_request() {
    let mut pets = common::service("pets", "fresh");
    pets.cache.requests = false;
    let gateway = common::start_gateway(common::config_with(vec![pets])).await;
    let client = common::client();

    let started = std::time::Instant::now();
    let slow = client
        .get(gateway.url("/pets/x"))
        .header("X-Cxs-Latency", "500ms")
        .send()
        .await
        .unwrap();
    assert_eq!(slow.status(), 200);
    assert_eq!(slow.text().await.unwrap(), "fresh");
    assert!(started.elapsed() >= Duration::from_millis(500));

    let started = std::time::Instant::now();
    let fast = client.get(gateway.url("/pets/x")).send().await.unwrap();
    assert_eq!(fast.status(), 200);
    assert!(started.elapsed() < Duration::from_millis(400), "latency leaked into the stored config");

    let services: serde_json::Value = client
        .get(gateway.url("/.services"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(services[0]["name"], "pets");
    assert_eq!(services[0]["cache_requests"], false);
}

#[tokio::test]
async fn test_simulated_error_short_circuits() {
    let mut pets = common::service("pets", "fresh");
    pets.errors.insert("p100".into(), 503);
    let gateway = common::start_gateway(common::config_with(vec![pets])).await;

    let res = common::client().get(gateway.url("/pets/x")).send().await.unwrap();
    assert_eq!(res.status(), 503);
    assert_eq!(res.headers()["x-cxs-source"], "generated");
    assert_eq!(res.text().await.unwrap(), "Simulated error");
}

#[tokio::test]
async fn test_reload_mounts_new_service() {
    let gateway = common::start_gateway(common::config_with(vec![common::service("pets", "a")])).await;
    let client = common::client();

    let missing = client.get(gateway.url("/owners/x")).send().await.unwrap();
    assert_eq!(missing.status(), 404);

    gateway
        .reload
        .send(common::config_with(vec![
            common::service("pets", "a"),
            common::service("owners", "b"),
        ]))
        .unwrap();

    let mut status = 0;
    for _ in 0..50 {
        status = client.get(gateway.url("/owners/x")).send().await.unwrap().status().as_u16();
        if status == 200 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(status, 200);
}

#[tokio::test]
async fn test_history_clear_through_admin_api() {
    let gateway = common::start_gateway(common::config_with(vec![common::service("pets", "fresh")])).await;
    let client = common::client();

    client.post(gateway.url("/pets/orders")).body("pizza").send().await.unwrap();

    let history: serde_json::Value = client
        .get(gateway.url("/.services/pets/history"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    // "pizza" in base64.
    assert_eq!(history["POST:/pets/orders"]["body"], "cGl6emE=");

    let cleared = client.delete(gateway.url("/.services/pets/history")).send().await.unwrap();
    assert_eq!(cleared.status(), 204);

    let history: serde_json::Value = client
        .get(gateway.url("/.services/pets/history"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(history.as_object().unwrap().is_empty());
}
