//! Failure handling of the pull path
//!
//! These tests verify that:
//! - An unavailable source aborts the pass without touching alert state
//! - The pass deadline bounds a hanging source
//! - Notifications in flight at the deadline still record their alert state
//! - The Kubernetes API source authenticates and skips unreachable kubelets
//! - Pod restart notifications carry a throttled log tail

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use kube_sentinel::MonitorError;
use kube_sentinel::config::SourceConfig;
use kube_sentinel::event::ResourceKind;
use kube_sentinel::source::{KubeApiSource, ResourceSource};
use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::*;

#[tokio::test]
async fn test_unavailable_source_aborts_pass() {
    let server = ntfy_server(200).await;
    let source = StaticSource::new();
    source.set(ResourceKind::Node, vec![node("n1", false)]);
    let monitor = build_monitor(
        test_config(&server.uri(), &[ResourceKind::Node]),
        Some(source.clone()),
    )
    .await;

    monitor.run_pass().await;
    let before = monitor.store().snapshot().await.unwrap();

    source.fail(true);
    let summary = monitor.run_pass().await;
    assert!(!summary.is_complete());
    assert!(summary.aborted.as_deref().unwrap().contains("refused"));
    assert!(summary.domains.is_empty());

    // nothing was tombstoned or resolved because of the failed listing
    assert_eq!(monitor.store().snapshot().await.unwrap(), before);
}

#[tokio::test]
async fn test_abort_keeps_completed_domains() {
    let server = ntfy_server(200).await;
    let source = StaticSource::new();
    source.set(ResourceKind::Pod, vec![pod("shop", "api", 0, None)]);
    let monitor = build_monitor(
        test_config(&server.uri(), &[ResourceKind::Pod, ResourceKind::Node]),
        Some(source.clone()),
    )
    .await;

    let summary = monitor.run_pass().await;
    assert!(summary.is_complete());

    source.fail(true);
    let summary = monitor.run_pass().await;
    assert!(summary.aborted.is_some());
    assert!(!summary.domains.contains_key(&ResourceKind::Node));
}

#[tokio::test]
async fn test_pass_without_source_is_aborted() {
    let server = ntfy_server(200).await;
    let monitor = build_monitor(test_config(&server.uri(), &[ResourceKind::Pod]), None).await;

    let summary = monitor.run_pass().await;
    assert_eq!(
        summary.aborted.as_deref(),
        Some("no resource source configured")
    );
}

#[tokio::test]
async fn test_deadline_bounds_hanging_source() {
    let server = ntfy_server(200).await;
    let source = StaticSource::slow(Duration::from_secs(30));
    let mut config = test_config(&server.uri(), &[ResourceKind::Pod]);
    config.pass.deadline_secs = 1;
    let monitor = build_monitor(config, Some(source)).await;

    let started = std::time::Instant::now();
    let summary = monitor.run_pass().await;
    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(!summary.is_complete());
    assert!(summary.aborted.as_deref().unwrap().contains("deadline"));
}

#[tokio::test]
async fn test_deadline_lets_in_flight_notifications_finish() {
    let server = slow_ntfy_server(Duration::from_millis(1_500)).await;
    let source = StaticSource::new();
    source.set(ResourceKind::Node, vec![node("n1", false), node("n2", false)]);
    let mut config = test_config(&server.uri(), &[ResourceKind::Node]);
    config.pass.deadline_secs = 1;
    config.pass.workers = 1;
    let monitor = build_monitor(config, Some(source.clone())).await;

    // n1 is delivered after the deadline, n2 never starts
    let first = monitor.run_pass().await;
    let nodes = first.domains[&ResourceKind::Node];
    assert!(first.deadline_exceeded);
    assert_eq!(nodes.notified, 1);
    assert_eq!(nodes.deferred, 1);

    let states = monitor.store().snapshot().await.unwrap();
    assert_eq!(states.len(), 1);
    assert_eq!(states[0].resource.key, "n1");
    assert!(states[0].last_notified.is_some());

    // n1 is a duplicate now, n2 gets its turn
    let second = monitor.run_pass().await;
    let nodes = second.domains[&ResourceKind::Node];
    assert_eq!(nodes.suppressed, 1);
    assert_eq!(nodes.notified, 1);
    assert_eq!(nodes.deferred, 0);

    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

fn kube_source(server: &MockServer, token_file: Option<std::path::PathBuf>) -> KubeApiSource {
    KubeApiSource::new(&SourceConfig {
        api_url: server.uri(),
        token_file,
        ca_file: None,
        timeout_secs: 2,
        ..SourceConfig::default()
    })
    .unwrap()
}

#[tokio::test]
async fn test_kube_source_sends_bearer_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/pods"))
        .and(header("Authorization", "Bearer sekrit"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [pod("shop", "api", 0, None)]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let token = dir.path().join("token");
    std::fs::write(&token, "sekrit\n").unwrap();

    let listing = kube_source(&server, Some(token))
        .list(ResourceKind::Pod)
        .await
        .unwrap();
    assert_eq!(listing.items.len(), 1);
    assert!(listing.complete);
}

#[tokio::test]
async fn test_kube_source_error_status_is_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/apis/apps/v1/deployments"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let result = kube_source(&server, None).list(ResourceKind::Deployment).await;
    assert_matches!(result, Err(MonitorError::SourceUnavailable(ref msg)) if msg.contains("403"));
}

#[tokio::test]
async fn test_kube_source_skips_unreachable_kubelet() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/nodes"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [node("n1", true), node("n2", true)]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/nodes/n1/proxy/stats/summary"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "node": {"nodeName": "n1", "fs": {"usedBytes": 50, "capacityBytes": 100}},
            "pods": [{
                "podRef": {"name": "pg-0", "namespace": "db"},
                "volume": [
                    {"name": "tmp", "usedBytes": 1, "capacityBytes": 10},
                    {"name": "data", "pvcRef": {"name": "pg-data", "namespace": "db"}, "usedBytes": 90, "capacityBytes": 100}
                ]
            }]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/nodes/n2/proxy/stats/summary"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let source = kube_source(&server, None);

    let disks = source.list(ResourceKind::DiskVolume).await.unwrap();
    assert_eq!(
        disks.items,
        vec![json!({"nodeName": "n1", "fs": {"usedBytes": 50, "capacityBytes": 100}})]
    );
    assert!(!disks.complete);

    let pvcs = source.list(ResourceKind::Pvc).await.unwrap();
    assert_eq!(pvcs.items.len(), 1);
    assert_eq!(pvcs.items[0]["podName"], "pg-0");
    assert!(!pvcs.complete);
}

#[tokio::test]
async fn test_pull_pass_against_kube_api() {
    let ntfy = ntfy_server(200).await;
    let api = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/pods"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [pod("shop", "api", 3, Some("CrashLoopBackOff"))]
        })))
        .mount(&api)
        .await;

    let source: Arc<dyn ResourceSource> = Arc::new(kube_source(&api, None));
    let monitor = build_monitor(test_config(&ntfy.uri(), &[ResourceKind::Pod]), Some(source)).await;

    let summary = monitor.run_pass().await;
    assert!(summary.is_complete());
    assert_eq!(summary.domains[&ResourceKind::Pod].notified, 1);
}

#[tokio::test]
async fn test_restart_notification_carries_log_tail_once() {
    let ntfy = ntfy_server(200).await;
    let api = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/pods"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [pod("shop", "api", 3, Some("CrashLoopBackOff"))]
        })))
        .mount(&api)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/namespaces/shop/pods/api/log"))
        .and(query_param("container", "app"))
        .and(query_param("tailLines", "50"))
        .respond_with(ResponseTemplate::new(200).set_body_string("starting\npanic: out of memory\n"))
        .expect(1)
        .mount(&api)
        .await;

    let source: Arc<dyn ResourceSource> = Arc::new(kube_source(&api, None));
    let monitor = build_monitor(test_config(&ntfy.uri(), &[ResourceKind::Pod]), Some(source)).await;

    // second pass escalates to sustained; logs were collected moments ago
    monitor.run_pass().await;
    monitor.run_pass().await;

    let requests = ntfy.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
    let first = String::from_utf8(requests[0].body.clone()).unwrap();
    assert!(first.contains("Last log lines of app:"));
    assert!(first.contains("panic: out of memory"));
    let second = String::from_utf8(requests[1].body.clone()).unwrap();
    assert!(!second.contains("Last log lines"));
}

#[tokio::test]
async fn test_missing_logs_do_not_block_notification() {
    let ntfy = ntfy_server(200).await;
    let api = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/namespaces/shop/pods/api/log"))
        .respond_with(ResponseTemplate::new(400))
        .mount(&api)
        .await;

    let source = kube_source(&api, None);
    assert_matches!(
        source.container_logs("shop", "api", "app", 50).await,
        Err(MonitorError::SourceUnavailable(_))
    );

    let source: Arc<dyn ResourceSource> = Arc::new(source);
    let monitor = build_monitor(test_config(&ntfy.uri(), &[ResourceKind::Pod]), Some(source)).await;
    let outcome = monitor
        .ingest(kube_sentinel::normalize::RawResource::from_push(
            ResourceKind::Pod,
            chrono::Utc::now(),
            pod("shop", "api", 3, Some("CrashLoopBackOff")),
        ))
        .await
        .unwrap();
    assert_eq!(outcome.notified, 1);
}
