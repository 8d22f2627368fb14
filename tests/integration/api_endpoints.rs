//! Integration tests for the HTTP control surface
//!
//! These tests verify that:
//! - /health answers without side effects
//! - /check runs a pass through the scheduler
//! - /test runs a pass and reports delivery failures
//! - /events/:kind ingests pushes and rejects bad input
//! - /stats exposes alert state

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::StatusCode;
use kube_sentinel::api::{ApiState, spawn_api_server};
use kube_sentinel::engine::Monitor;
use kube_sentinel::event::ResourceKind;
use kube_sentinel::scheduler::SchedulerHandle;
use pretty_assertions::assert_eq;
use serde_json::{Value, json};

use crate::helpers::*;

async fn spawn_test_api(monitor: Arc<Monitor>, with_scheduler: bool) -> SocketAddr {
    let scheduler = with_scheduler.then(|| SchedulerHandle::spawn(monitor.clone(), None));
    let state = ApiState::new(monitor, scheduler);
    spawn_api_server("127.0.0.1:0".parse().unwrap(), state)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_health() {
    let server = ntfy_server(200).await;
    let monitor = build_monitor(test_config(&server.uri(), &[ResourceKind::Pod]), None).await;
    let addr = spawn_test_api(monitor.clone(), false).await;

    let response = reqwest::get(format!("http://{addr}/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["cluster"], CLUSTER);
    assert_eq!(monitor.stats().passes, 0);
}

#[tokio::test]
async fn test_check_runs_a_pass() {
    let server = ntfy_server(200).await;
    let source = StaticSource::new();
    source.set(
        ResourceKind::Pod,
        vec![pod("shop", "api", 5, Some("CrashLoopBackOff"))],
    );
    let monitor = build_monitor(
        test_config(&server.uri(), &[ResourceKind::Pod]),
        Some(source.clone()),
    )
    .await;
    let addr = spawn_test_api(monitor, true).await;

    let client = reqwest::Client::new();
    let response = client
        .post(format!("http://{addr}/check"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "success");
    assert_eq!(body["totals"]["observed"], 1);
    assert_eq!(body["totals"]["notified"], 1);
    assert_eq!(body["domains"]["pod"]["notified"], 1);
    assert_eq!(body["aborted"], Value::Null);
}

#[tokio::test]
async fn test_check_reports_partial_pass() {
    let server = ntfy_server(200).await;
    let source = StaticSource::new();
    source.fail(true);
    let monitor = build_monitor(
        test_config(&server.uri(), &[ResourceKind::Pod]),
        Some(source.clone()),
    )
    .await;
    let addr = spawn_test_api(monitor, false).await;

    let body: Value = reqwest::Client::new()
        .post(format!("http://{addr}/check"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "partial");
    assert!(body["aborted"].as_str().unwrap().contains("refused"));
}

#[tokio::test]
async fn test_send_test_notification() {
    let server = ntfy_server(200).await;
    let source = StaticSource::new();
    source.set(ResourceKind::Pod, vec![pod("shop", "api", 0, None)]);
    let monitor = build_monitor(
        test_config(&server.uri(), &[ResourceKind::Pod]),
        Some(source.clone()),
    )
    .await;
    let addr = spawn_test_api(monitor, true).await;

    let body: Value = reqwest::Client::new()
        .post(format!("http://{addr}/test"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "success");
    assert_eq!(body["delivered"], true);
    assert_eq!(body["totals"]["observed"], 1);

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(
        requests[0].headers.get("title").unwrap(),
        "INFO: Test Notification - test-cluster"
    );
    assert_eq!(requests[0].headers.get("priority").unwrap(), "low");
    assert_eq!(requests[0].headers.get("tags").unwrap(), "test_tube");
    let message = String::from_utf8(requests[0].body.clone()).unwrap();
    assert!(message.contains("Tracked resources: 1"));
}

#[tokio::test]
async fn test_send_test_reports_failure() {
    let server = ntfy_server(401).await;
    let monitor = build_monitor(test_config(&server.uri(), &[ResourceKind::Pod]), None).await;
    let addr = spawn_test_api(monitor, false).await;

    let body: Value = reqwest::Client::new()
        .post(format!("http://{addr}/test"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "error");
    assert_eq!(body["delivered"], false);
    assert!(body["error"].as_str().unwrap().contains("401"));
}

#[tokio::test]
async fn test_push_event_is_processed() {
    let server = ntfy_server(200).await;
    let monitor = build_monitor(test_config(&server.uri(), &[ResourceKind::Pod]), None).await;
    let addr = spawn_test_api(monitor, false).await;

    let response = reqwest::Client::new()
        .post(format!("http://{addr}/events/pods"))
        .json(&pod("shop", "api", 2, Some("CrashLoopBackOff")))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "processed");
    assert_eq!(body["notified"], 1);
    assert_eq!(titles(&server).await.len(), 1);
}

#[tokio::test]
async fn test_push_deleted_envelope() {
    let server = ntfy_server(200).await;
    let monitor = build_monitor(test_config(&server.uri(), &[ResourceKind::Node]), None).await;
    let addr = spawn_test_api(monitor, false).await;

    let body: Value = reqwest::Client::new()
        .post(format!("http://{addr}/events/nodes"))
        .json(&json!({"type": "DELETED", "data": node("n1", true)}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["deleted"], 1);
}

#[tokio::test]
async fn test_push_unknown_kind_is_not_found() {
    let server = ntfy_server(200).await;
    let monitor = build_monitor(test_config(&server.uri(), &[ResourceKind::Pod]), None).await;
    let addr = spawn_test_api(monitor, false).await;

    let response = reqwest::Client::new()
        .post(format!("http://{addr}/events/widgets"))
        .json(&json!({"metadata": {"name": "w"}}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let body: Value = response.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("widgets"));
}

#[tokio::test]
async fn test_push_malformed_resource_is_bad_request() {
    let server = ntfy_server(200).await;
    let monitor = build_monitor(test_config(&server.uri(), &[ResourceKind::Node]), None).await;
    let addr = spawn_test_api(monitor.clone(), false).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("http://{addr}/events/nodes"))
        .json(&json!([1, 2, 3]))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("node"));

    let response = client
        .post(format!("http://{addr}/events/nodes"))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert!(body["error"].is_string());

    // no JSON content type at all
    let response = client
        .post(format!("http://{addr}/events/nodes"))
        .body(r#"{"metadata": {"name": "n1"}}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("Content-Type"));

    assert_eq!(monitor.stats().pushed, 0);
}

#[tokio::test]
async fn test_stats_lists_active_alerts_first() {
    let server = ntfy_server(200).await;
    let monitor = build_monitor(test_config(&server.uri(), &[ResourceKind::Node]), None).await;
    let addr = spawn_test_api(monitor, false).await;
    let client = reqwest::Client::new();

    for (name, ready) in [("a-node", false), ("b-node", false)] {
        client
            .post(format!("http://{addr}/events/nodes"))
            .json(&node(name, ready))
            .send()
            .await
            .unwrap();
    }
    // a-node recovers
    client
        .post(format!("http://{addr}/events/nodes"))
        .json(&node("a-node", true))
        .send()
        .await
        .unwrap();

    let body: Value = reqwest::get(format!("http://{addr}/stats"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["backend"], "memory");
    assert_eq!(body["tracked_resources"], 2);
    assert_eq!(body["active_alerts"], 1);
    assert_eq!(body["alerts"][0]["resource"]["key"], "b-node");
    assert_eq!(body["alerts"][0]["rule"], "node-health");
    assert_eq!(body["alerts"][1]["active"], false);
    assert_eq!(body["engine"]["pushed"], 3);
}
