//! Resource sources for pull mode
//!
//! A source returns the current listing of one resource kind as raw JSON
//! objects. Completeness matters: resources tracked in history but missing
//! from a complete listing are treated as deleted, so a listing that skipped
//! part of the cluster says so.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use futures::{StreamExt, stream};
use reqwest::{Certificate, Client};
use serde_json::{Value, json};
use tracing::{debug, instrument, warn};

use crate::config::SourceConfig;
use crate::error::{MonitorError, MonitorResult};
use crate::event::ResourceKind;

/// Raw objects of one kind
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Listing {
    pub items: Vec<Value>,
    /// `false` when part of the cluster could not be read (an unreachable kubelet)
    pub complete: bool,
}

impl Listing {
    pub fn complete(items: Vec<Value>) -> Self {
        Self {
            items,
            complete: true,
        }
    }

    pub fn partial(items: Vec<Value>) -> Self {
        Self {
            items,
            complete: false,
        }
    }
}

#[async_trait]
pub trait ResourceSource: Send + Sync {
    async fn list(&self, kind: ResourceKind) -> MonitorResult<Listing>;

    /// The last `lines` log lines of one container, `None` when the source has no logs
    async fn container_logs(
        &self,
        _namespace: &str,
        _pod: &str,
        _container: &str,
        _lines: u32,
    ) -> MonitorResult<Option<String>> {
        Ok(None)
    }
}

/// Concurrent kubelet summary requests
const SUMMARY_CONCURRENCY: usize = 4;

/// Reads the Kubernetes API server (and the kubelet summaries it proxies)
#[derive(Debug, Clone)]
pub struct KubeApiSource {
    client: Client,
    api_url: String,
    token_file: Option<PathBuf>,
    argocd_namespace: String,
}

impl KubeApiSource {
    pub fn new(config: &SourceConfig) -> MonitorResult<Self> {
        let mut builder = Client::builder().timeout(Duration::from_secs(config.timeout_secs));

        if let Some(ca_file) = config.ca_file.as_deref().filter(|path| path.exists()) {
            let pem = std::fs::read(ca_file).map_err(|e| {
                MonitorError::ConfigInvalid(format!("cannot read {}: {e}", ca_file.display()))
            })?;
            let certificate = Certificate::from_pem(&pem).map_err(|e| {
                MonitorError::ConfigInvalid(format!("invalid CA bundle {}: {e}", ca_file.display()))
            })?;
            builder = builder.add_root_certificate(certificate);
        }

        let client = builder
            .build()
            .map_err(|e| MonitorError::ConfigInvalid(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            token_file: config.token_file.clone(),
            argocd_namespace: config.argocd_namespace.clone(),
        })
    }

    /// Projected service account tokens rotate, so the file is read per request
    async fn token(&self) -> Option<String> {
        let path = self.token_file.as_deref()?;
        read_token(path).await
    }

    async fn send(&self, path: &str) -> MonitorResult<reqwest::Response> {
        let mut request = self.client.get(format!("{}{path}", self.api_url));
        if let Some(token) = self.token().await {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| MonitorError::SourceUnavailable(format!("GET {path}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(MonitorError::SourceUnavailable(format!(
                "GET {path}: {status}"
            )));
        }
        Ok(response)
    }

    async fn get(&self, path: &str) -> MonitorResult<Value> {
        self.send(path)
            .await?
            .json()
            .await
            .map_err(|e| MonitorError::SourceUnavailable(format!("GET {path}: invalid JSON: {e}")))
    }

    async fn items(&self, path: &str) -> MonitorResult<Vec<Value>> {
        let mut body = self.get(path).await?;
        match body.get_mut("items").map(Value::take) {
            Some(Value::Array(items)) => Ok(items),
            Some(Value::Null) => Ok(Vec::new()),
            _ => Err(MonitorError::SourceUnavailable(format!(
                "GET {path}: response has no items list"
            ))),
        }
    }

    /// Kubelet summaries of every node that answered, and whether all of them did
    ///
    /// A node that cannot be reached is skipped; node health reports it.
    async fn summaries(&self) -> MonitorResult<(Vec<Value>, bool)> {
        let names: Vec<String> = self
            .items("/api/v1/nodes")
            .await?
            .iter()
            .filter_map(|node| node.pointer("/metadata/name")?.as_str().map(String::from))
            .collect();
        let expected = names.len();

        let summaries: Vec<Value> = stream::iter(names)
            .map(|name| async move {
                let path = format!("/api/v1/nodes/{name}/proxy/stats/summary");
                match self.get(&path).await {
                    Ok(summary) => Some(summary),
                    Err(e) => {
                        warn!("skipping node {name}: {e}");
                        None
                    }
                }
            })
            .buffer_unordered(SUMMARY_CONCURRENCY)
            .filter_map(|summary| async move { summary })
            .collect()
            .await;

        let complete = summaries.len() == expected;
        Ok((summaries, complete))
    }
}

async fn read_token(path: &Path) -> Option<String> {
    match tokio::fs::read_to_string(path).await {
        Ok(token) => Some(token.trim().to_string()).filter(|t| !t.is_empty()),
        Err(e) => {
            debug!("no bearer token from {}: {e}", path.display());
            None
        }
    }
}

/// PVC usage fragments (`pvcRef`, byte counters, reporting pod) from kubelet summaries
fn pvc_fragments(summaries: &[Value]) -> Vec<Value> {
    summaries
        .iter()
        .filter_map(|summary| summary.get("pods")?.as_array())
        .flatten()
        .flat_map(|pod| {
            let pod_name = pod.pointer("/podRef/name").cloned().unwrap_or(Value::Null);
            pod.get("volume")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
                .filter(|volume| volume.get("pvcRef").is_some())
                .map(move |volume| {
                    json!({
                        "pvcRef": volume["pvcRef"],
                        "usedBytes": volume["usedBytes"],
                        "capacityBytes": volume["capacityBytes"],
                        "podName": pod_name,
                    })
                })
        })
        .collect()
}

/// Node filesystem fragments (`nodeName`, `fs`) from kubelet summaries
fn node_fragments(summaries: &[Value]) -> Vec<Value> {
    summaries
        .iter()
        .filter_map(|summary| summary.get("node").cloned())
        .collect()
}

#[async_trait]
impl ResourceSource for KubeApiSource {
    #[instrument(skip(self))]
    async fn list(&self, kind: ResourceKind) -> MonitorResult<Listing> {
        let listing = match kind {
            ResourceKind::Pod => Listing::complete(self.items("/api/v1/pods").await?),
            ResourceKind::Node => Listing::complete(self.items("/api/v1/nodes").await?),
            ResourceKind::Deployment => {
                Listing::complete(self.items("/apis/apps/v1/deployments").await?)
            }
            ResourceKind::SyncStatus => Listing::complete(
                self.items(&format!(
                    "/apis/argoproj.io/v1alpha1/namespaces/{}/applications",
                    self.argocd_namespace
                ))
                .await?,
            ),
            ResourceKind::Pvc | ResourceKind::DiskVolume => {
                let (summaries, complete) = self.summaries().await?;
                let items = if kind == ResourceKind::Pvc {
                    pvc_fragments(&summaries)
                } else {
                    node_fragments(&summaries)
                };
                Listing { items, complete }
            }
        };
        debug!(
            complete = listing.complete,
            "listed {} {kind} objects",
            listing.items.len()
        );
        Ok(listing)
    }

    #[instrument(skip(self))]
    async fn container_logs(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        lines: u32,
    ) -> MonitorResult<Option<String>> {
        let path = format!(
            "/api/v1/namespaces/{namespace}/pods/{pod}/log?container={container}&tailLines={lines}"
        );
        let logs = self
            .send(&path)
            .await?
            .text()
            .await
            .map_err(|e| MonitorError::SourceUnavailable(format!("GET {path}: {e}")))?;
        Ok(Some(logs).filter(|logs| !logs.trim().is_empty()))
    }
}
