//! Notification delivery against a mock ntfy server
//!
//! These tests verify that:
//! - Transient failures are retried and permanent ones are not
//! - The rate limiter drops excess notifications and they are retried next pass
//! - Headers carry title, priority and tags

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use kube_sentinel::MonitorError;
use kube_sentinel::event::ResourceKind;
use kube_sentinel::notify::{
    Dispatcher, Notification, NotificationTransport, NtfyTransport, Priority, TopicLimiter,
    dispatcher::RetryPolicy,
};
use pretty_assertions::assert_eq;
use wiremock::matchers::{body_string, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::*;

fn dispatcher(server: &MockServer, attempts: u32) -> Dispatcher {
    let transport = Arc::new(NtfyTransport::new(server.uri(), Duration::from_secs(2)).unwrap());
    Dispatcher::new(
        transport,
        TopicLimiter::new(100, 60),
        Duration::ZERO,
        RetryPolicy {
            attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        },
    )
}

fn notification() -> Notification {
    Notification::new(
        TOPIC,
        "WARNING: Node Disk - test-cluster",
        "Node n1 filesystem at 85.0%",
        Priority::Default,
        vec!["warning".to_string(), "disk".to_string()],
    )
}

#[tokio::test]
async fn test_transport_sends_ntfy_headers() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/alerts"))
        .and(header("Title", "WARNING: Node Disk - test-cluster"))
        .and(header("Priority", "default"))
        .and(body_string("Node n1 filesystem at 85.0%"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let transport = NtfyTransport::new(server.uri(), Duration::from_secs(2)).unwrap();
    transport.send(&notification()).await.unwrap();

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests[0].headers.get("tags").unwrap(), "warning,disk");
}

#[tokio::test]
async fn test_server_error_is_retried_until_success() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/alerts"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/alerts"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let result = dispatcher(&server, 3).dispatch(&notification()).await;
    assert!(result.delivered);
    assert_eq!(result.retries, 1);
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_client_error_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/alerts"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad topic"))
        .expect(1)
        .mount(&server)
        .await;

    let result = dispatcher(&server, 3).dispatch(&notification()).await;
    assert!(!result.delivered);
    assert_eq!(result.retries, 0);
    assert_matches!(
        result.error,
        Some(MonitorError::TransportFailure { transient: false, ref message }) if message.contains("bad topic")
    );
}

#[tokio::test]
async fn test_retries_are_bounded() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/alerts"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let result = dispatcher(&server, 3).dispatch(&notification()).await;
    assert!(!result.delivered);
    assert_eq!(result.retries, 2);
    assert_matches!(
        result.error,
        Some(MonitorError::TransportFailure { transient: true, .. })
    );
}

#[tokio::test]
async fn test_too_many_requests_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/alerts"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/alerts"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let result = dispatcher(&server, 3).dispatch(&notification()).await;
    assert!(result.delivered);
    assert_eq!(result.retries, 2);
}

#[tokio::test]
async fn test_unreachable_server_is_transient() {
    // nothing listens on the discard port
    let transport = NtfyTransport::new("http://127.0.0.1:9", Duration::from_secs(1)).unwrap();
    let result = transport.send(&notification()).await;
    assert_matches!(
        result,
        Err(MonitorError::TransportFailure { transient: true, .. })
    );
}

#[tokio::test]
async fn test_rate_limited_notifications_are_retried_next_pass() {
    let server = ntfy_server(200).await;
    let source = StaticSource::new();
    source.set(
        ResourceKind::Node,
        (0..4).map(|i| node(&format!("n{i}"), false)).collect(),
    );
    let mut config = test_config(&server.uri(), &[ResourceKind::Node]);
    config.rate_limit.burst = 2;
    config.rate_limit.refill_per_minute = 1;
    let monitor = build_monitor(config, Some(source.clone())).await;

    let first = monitor.run_pass().await;
    let nodes = first.domains[&ResourceKind::Node];
    assert_eq!(nodes.notified, 2);
    assert_eq!(nodes.rate_limited, 2);

    // the two delivered alerts are duplicates now, the two dropped ones try again
    let second = monitor.run_pass().await;
    let nodes = second.domains[&ResourceKind::Node];
    assert_eq!(nodes.suppressed, 2);
    assert_eq!(nodes.rate_limited, 2);
    assert_eq!(nodes.notified, 0);

    assert_eq!(titles(&server).await.len(), 2);
}

#[tokio::test]
async fn test_failed_delivery_is_counted() {
    let server = ntfy_server(403).await;
    let source = StaticSource::new();
    source.set(ResourceKind::Node, vec![node("n1", false)]);
    let monitor = build_monitor(
        test_config(&server.uri(), &[ResourceKind::Node]),
        Some(source.clone()),
    )
    .await;

    let summary = monitor.run_pass().await;
    let nodes = summary.domains[&ResourceKind::Node];
    assert_eq!(nodes.failed, 1);
    assert_eq!(nodes.notified, 0);

    let states = monitor.store().snapshot().await.unwrap();
    assert!(states[0].active);
    assert_eq!(states[0].last_notified, None);
}
