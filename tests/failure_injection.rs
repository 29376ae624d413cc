//! Failure injection tests for the proxy channel.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use api_gateway::config::{GatewayConfig, RouteConfig};
use reqwest::StatusCode;
use serde_json::Value;

mod common;

fn config_for(base_url: String) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.routes.push(RouteConfig::proxy("events", base_url));
    config
}

#[tokio::test]
async fn test_backend_status_is_relayed() {
    let backend = common::start_mock_backend(404, r#"{"message":"Event not found","error":"Not Found"}"#).await;
    let gateway = common::start_gateway(config_for(format!("http://{backend}"))).await;

    let res = common::client().get(gateway.url("/events/99")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let body: Value = res.json().await.unwrap();
    assert_eq!(body["message"], "Event not found");
}

#[tokio::test]
async fn test_backend_errors_are_not_retried() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let backend = common::start_programmable_backend(move |_| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            (503, r#"{"message":"maintenance"}"#.to_string())
        }
    })
    .await;
    let gateway = common::start_gateway(config_for(format!("http://{backend}"))).await;

    let res = common::client().get(gateway.url("/events")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_normalized_error_body() {
    let backend = common::start_mock_backend(
        409,
        r#"{"message":["name must be unique","starts is required"],"error":"Conflict"}"#,
    )
    .await;
    let mut config = config_for(format!("http://{backend}"));
    config.proxy.normalize_error_bodies = true;
    let gateway = common::start_gateway(config).await;

    let res = common::client().post(gateway.url("/events")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);

    let body: Value = res.json().await.unwrap();
    assert_eq!(body["statusCode"], 409);
    assert_eq!(body["message"], "name must be unique, starts is required");
    assert_eq!(body["error"], "Conflict");
}

#[tokio::test]
async fn test_connection_refused_is_503() {
    let dead = common::closed_port().await;
    let gateway = common::start_gateway(config_for(format!("http://{dead}"))).await;

    let res = common::client().get(gateway.url("/events")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);

    let body: Value = res.json().await.unwrap();
    assert_eq!(body["statusCode"], 503);
    assert!(body["message"].as_str().unwrap().contains("ECONNREFUSED"));
}

#[tokio::test]
async fn test_slow_backend_is_504() {
    let backend = common::start_programmable_backend(|_| async move {
        tokio::time::sleep(Duration::from_secs(2)).await;
        (200, "late".to_string())
    })
    .await;
    let mut config = config_for(format!("http://{backend}"));
    config.timeouts.backend_ms = 200;
    let gateway = common::start_gateway(config).await;

    let started = std::time::Instant::now();
    let res = common::client().get(gateway.url("/events")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::GATEWAY_TIMEOUT);
    assert!(started.elapsed() < Duration::from_secs(2));

    let body: Value = res.json().await.unwrap();
    assert_eq!(body["message"], "Request timed out while connecting to the service");
}

#[tokio::test]
async fn test_created_response_passes_through() {
    let backend = common::start_mock_backend(201, r#"{"id":"evt-1"}"#).await;
    let gateway = common::start_gateway(config_for(format!("http://{backend}"))).await;

    let res = common::client()
        .post(gateway.url("/events"))
        .json(&serde_json::json!({"name": "launch"}))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::CREATED);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["id"], "evt-1");
}
