//! Failover behaviour of the JSON-RPC front-end.

use std::time::Duration;

use link_proxy::config::LinkConfig;
use link_proxy::health::state::{FailureReason, Source};
use link_proxy::health::HealthState;
use link_proxy::http::X_LINK_PROXY_ERROR;
use serde_json::Value;

mod common;

#[tokio::test]
async fn prefers_lowest_priority_tier() {
    let a = common::start_mock_backend("a").await;
    let b = common::start_mock_backend("b").await;
    let proxy = common::start_proxy(common::test_config(vec![
        LinkConfig::new("b", b.url()).with_priority(20),
        LinkConfig::new("a", a.url()).with_priority(10),
    ]))
    .await;
    let shared = proxy.shared.clone();

    for _ in 0..3 {
        let res = common::call(proxy.addr).await;
        assert_eq!(res.status(), 200);
        let body: Value = res.json().await.unwrap();
        assert_eq!(body["result"], "a");
    }

    assert_eq!(a.calls(), 3);
    assert_eq!(b.calls(), 0);
    assert_eq!(shared.activity.last_served().as_deref(), Some("a"));
    assert_eq!(shared.activity.summary().success_on_first_attempt, 3);
}

#[tokio::test]
async fn fails_over_when_preferred_backend_is_down() {
    let a = common::start_mock_backend("a").await;
    let b = common::start_mock_backend("b").await;
    let proxy = common::start_proxy(common::test_config(vec![
        LinkConfig::new("a", a.url()).with_priority(10),
        LinkConfig::new("b", b.url()).with_priority(20),
    ]))
    .await;
    let shared = proxy.shared.clone();

    {
        let mut health = shared.health.write().await;
        for _ in 0..3 {
            health.record_failure("a", FailureReason::Timeout, Source::Probe);
        }
        assert_eq!(health.state("a"), HealthState::Down);
    }

    let body: Value = common::call(proxy.addr).await.json().await.unwrap();
    assert_eq!(body["result"], "b");
    assert_eq!(a.calls(), 0);
}

#[tokio::test]
async fn no_backend_available_when_all_down() {
    let a = common::start_mock_backend("a").await;
    let proxy = common::start_proxy(common::test_config(vec![LinkConfig::new("a", a.url())])).await;
    let shared = proxy.shared.clone();

    {
        let mut health = shared.health.write().await;
        for _ in 0..3 {
            health.record_failure("a", FailureReason::Timeout, Source::Probe);
        }
    }

    let res = common::call(proxy.addr).await;
    assert_eq!(res.status(), 503);
    assert_eq!(res.headers().get(X_LINK_PROXY_ERROR).unwrap(), "no-backend-available");
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["id"], 1);
    assert_eq!(body["error"]["code"], -32090);
    assert_eq!(body["error"]["data"]["source"], "proxy");
    assert_eq!(shared.activity.summary().fail_no_backend, 1);
}

#[tokio::test]
async fn timed_out_attempt_is_retried_on_next_backend() {
    let slow = common::start_programmable_backend(|_| async {
        tokio::time::sleep(Duration::from_secs(2)).await;
        (200, common::rpc_result("slow"))
    })
    .await;
    let b = common::start_mock_backend("b").await;
    let proxy = common::start_proxy(common::test_config(vec![
        LinkConfig::new("slow", slow.url()).with_priority(1),
        LinkConfig::new("b", b.url()).with_priority(2),
    ]))
    .await;
    let shared = proxy.shared.clone();

    let res = common::call(proxy.addr).await;
    assert_eq!(res.status(), 200);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["result"], "b");

    let health = shared.health.read().await;
    let record = health.get("slow").unwrap();
    assert_eq!(record.consecutive_failures, 1);
    assert_eq!(record.requests.failed, 1);
    assert_eq!(record.last_error, Some(FailureReason::Timeout));
    assert_eq!(health.get("b").unwrap().requests.ok, 1);
    assert_eq!(shared.activity.summary().success_on_retry, 1);
}

#[tokio::test]
async fn retries_exhausted_after_max_attempts() {
    let a = common::start_programmable_backend(|_| async { (503, "busy".to_string()) }).await;
    let b = common::start_programmable_backend(|_| async { (500, "boom".to_string()) }).await;
    let c = common::start_mock_backend("c").await;
    let proxy = common::start_proxy(common::test_config(vec![
        LinkConfig::new("a", a.url()).with_priority(1),
        LinkConfig::new("b", b.url()).with_priority(2),
        LinkConfig::new("c", c.url()).with_priority(3),
    ]))
    .await;
    let shared = proxy.shared.clone();

    let res = common::call(proxy.addr).await;
    assert_eq!(res.status(), 502);
    assert_eq!(res.headers().get(X_LINK_PROXY_ERROR).unwrap(), "retries-exhausted");
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"]["code"], -32091);
    assert_eq!(body["error"]["data"]["retryable"], true);

    // Two attempts by default, each on a different backend.
    assert_eq!(a.calls(), 1);
    assert_eq!(b.calls(), 1);
    assert_eq!(c.calls(), 0);
    assert_eq!(shared.activity.summary().fail_retries_exhausted, 1);
}

#[tokio::test]
async fn unreachable_backend_counts_as_failure() {
    let dead = common::dead_address().await;
    let b = common::start_mock_backend("b").await;
    let proxy = common::start_proxy(common::test_config(vec![
        LinkConfig::new("dead", format!("http://{}", dead)).with_priority(1),
        LinkConfig::new("b", b.url()).with_priority(2),
    ]))
    .await;
    let shared = proxy.shared.clone();

    let body: Value = common::call(proxy.addr).await.json().await.unwrap();
    assert_eq!(body["result"], "b");

    let health = shared.health.read().await;
    assert!(matches!(
        health.get("dead").unwrap().last_error,
        Some(FailureReason::Connection(_))
    ));
}

#[tokio::test]
async fn client_errors_pass_through_without_health_penalty() {
    let a = common::start_programmable_backend(|_| async { (400, r#"{"error":"bad params"}"#.to_string()) }).await;
    let b = common::start_mock_backend("b").await;
    let proxy = common::start_proxy(common::test_config(vec![
        LinkConfig::new("a", a.url()).with_priority(1),
        LinkConfig::new("b", b.url()).with_priority(2),
    ]))
    .await;
    let shared = proxy.shared.clone();

    let res = common::call(proxy.addr).await;
    assert_eq!(res.status(), 400);
    assert!(res.headers().get(X_LINK_PROXY_ERROR).is_none());
    assert_eq!(res.text().await.unwrap(), r#"{"error":"bad params"}"#);
    assert_eq!(b.calls(), 0);

    let health = shared.health.read().await;
    assert_eq!(health.get("a").unwrap().consecutive_failures, 0);
    assert_eq!(shared.activity.summary().fail_bad_request, 1);
}

#[tokio::test]
async fn disabled_proxy_rejects_calls() {
    let a = common::start_mock_backend("a").await;
    let mut config = common::test_config(vec![LinkConfig::new("a", a.url())]);
    config.listener.enabled = false;
    let proxy = common::start_proxy(config).await;
    let shared = proxy.shared.clone();

    let res = common::call(proxy.addr).await;
    assert_eq!(res.status(), 503);
    assert_eq!(res.headers().get(X_LINK_PROXY_ERROR).unwrap(), "proxy-disabled");
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"]["code"], -32093);
    assert_eq!(body["error"]["data"]["retryable"], false);
    assert_eq!(a.calls(), 0);
    assert_eq!(shared.activity.summary().fail_proxy_disabled, 1);
}

#[tokio::test]
async fn unprobed_backend_recovers_through_traffic() {
    // Probes are off: failures alone must not lock the only backend out.
    let a = common::start_programmable_backend(|n| async move {
        if n < 3 {
            (503, "busy".to_string())
        } else {
            (200, common::rpc_result("a"))
        }
    })
    .await;
    let proxy = common::start_proxy(common::test_config(vec![LinkConfig::new("a", a.url())])).await;
    let shared = proxy.shared.clone();

    for _ in 0..3 {
        let res = common::call(proxy.addr).await;
        assert_eq!(res.headers().get(X_LINK_PROXY_ERROR).unwrap(), "retries-exhausted");
    }
    {
        let health = shared.health.read().await;
        let record = health.get("a").unwrap();
        assert_eq!(record.consecutive_failures, 3);
        assert_eq!(record.state, HealthState::Degraded);
    }

    for _ in 0..2 {
        let body: Value = common::call(proxy.addr).await.json().await.unwrap();
        assert_eq!(body["result"], "a");
    }
    assert_eq!(shared.health.read().await.state("a"), HealthState::Healthy);
    assert_eq!(a.calls(), 5);
    proxy.stop().await;
}
