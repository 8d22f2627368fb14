//! Test helpers: a scripted resource source, a mock ntfy server and payload builders

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use kube_sentinel::{
    MonitorError, MonitorResult,
    config::{Config, StorageConfig},
    engine::Monitor,
    event::ResourceKind,
    notify::{Dispatcher, NtfyTransport},
    source::{Listing, ResourceSource},
    storage,
};
use serde_json::{Value, json};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const TOPIC: &str = "alerts";
pub const CLUSTER: &str = "test-cluster";

/// Source returning whatever listing the test last set for a kind
#[derive(Default)]
pub struct StaticSource {
    listings: Mutex<HashMap<ResourceKind, Vec<Value>>>,
    failing: AtomicBool,
    partial: AtomicBool,
    delay: Option<Duration>,
}

impl StaticSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay: Some(delay),
            ..Self::default()
        })
    }

    pub fn set(&self, kind: ResourceKind, items: Vec<Value>) {
        self.listings.lock().unwrap().insert(kind, items);
    }

    pub fn fail(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Report listings as incomplete, like a source that could not reach every node
    pub fn partial(&self, partial: bool) {
        self.partial.store(partial, Ordering::SeqCst);
    }
}

#[async_trait]
impl ResourceSource for StaticSource {
    async fn list(&self, kind: ResourceKind) -> MonitorResult<Listing> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(MonitorError::SourceUnavailable(format!(
                "listing {kind} refused"
            )));
        }
        let items = self
            .listings
            .lock()
            .unwrap()
            .get(&kind)
            .cloned()
            .unwrap_or_default();
        Ok(Listing {
            items,
            complete: !self.partial.load(Ordering::SeqCst),
        })
    }
}

/// Configuration pointing at a mock ntfy server with fast retries
pub fn test_config(notify_base_url: &str, kinds: &[ResourceKind]) -> Config {
    let mut config = Config::default();
    config.cluster_name = CLUSTER.to_string();
    config.notify_base_url = notify_base_url.to_string();
    config.notify_topic = TOPIC.to_string();
    config.retry.base_delay_ms = 1;
    config.retry.max_delay_ms = 5;
    config.retry.timeout_secs = 2;
    config.rate_limit.queue_wait_ms = 0;
    config.source.kinds = kinds.to_vec();
    config.storage = StorageConfig::None;
    config.pass.interval_secs = None;
    config
}

pub async fn build_monitor(config: Config, source: Option<Arc<dyn ResourceSource>>) -> Arc<Monitor> {
    let config = Arc::new(config);
    let store = storage::open(&config).await.unwrap();
    let transport = Arc::new(
        NtfyTransport::new(
            config.notify_base_url.clone(),
            Duration::from_secs(config.retry.timeout_secs),
        )
        .unwrap(),
    );
    let dispatcher = Arc::new(Dispatcher::from_config(&config, transport));
    Arc::new(Monitor::new(config, store, source, dispatcher))
}

/// Start a mock ntfy server answering every publish with `status`
pub async fn ntfy_server(status: u16) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("/{TOPIC}")))
        .respond_with(ResponseTemplate::new(status))
        .mount(&server)
        .await;
    server
}

/// Start a mock ntfy server that accepts every publish only after `delay`
pub async fn slow_ntfy_server(delay: Duration) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("/{TOPIC}")))
        .respond_with(ResponseTemplate::new(200).set_delay(delay))
        .mount(&server)
        .await;
    server
}

/// Title headers of every notification the mock server received, in order
pub async fn titles(server: &MockServer) -> Vec<String> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter_map(|request| {
            request
                .headers
                .get("title")
                .and_then(|value| value.to_str().ok())
                .map(String::from)
        })
        .collect()
}

pub fn pod(namespace: &str, name: &str, restarts: u64, waiting: Option<&str>) -> Value {
    let state = match waiting {
        Some(reason) => json!({"waiting": {"reason": reason}}),
        None => json!({"running": {}}),
    };
    json!({
        "metadata": {"name": name, "namespace": namespace},
        "status": {
            "phase": "Running",
            "containerStatuses": [
                {"name": "app", "restartCount": restarts, "state": state}
            ]
        }
    })
}

pub fn node(name: &str, ready: bool) -> Value {
    json!({
        "metadata": {"name": name},
        "status": {
            "conditions": [
                {"type": "Ready", "status": if ready { "True" } else { "False" }, "reason": "KubeletNotReady"},
                {"type": "MemoryPressure", "status": "False"}
            ]
        }
    })
}

pub fn deployment(namespace: &str, name: &str, desired: u32, available: u32) -> Value {
    json!({
        "metadata": {"name": name, "namespace": namespace},
        "spec": {"replicas": desired},
        "status": {"availableReplicas": available}
    })
}

pub fn disk(node: &str, used: u64, capacity: u64) -> Value {
    json!({
        "nodeName": node,
        "fs": {"usedBytes": used, "capacityBytes": capacity}
    })
}

pub fn pvc(namespace: &str, name: &str, used: u64, capacity: u64) -> Value {
    json!({
        "name": "data",
        "pvcRef": {"name": name, "namespace": namespace},
        "usedBytes": used,
        "capacityBytes": capacity,
        "podName": format!("{name}-0")
    })
}
