//! Normalized observations of cluster resources
//!
//! Whatever the source hands us (a pod object from the API server, a kubelet
//! volume summary, an Argo CD application) ends up as an [`ObservedEvent`]
//! before anything else looks at it.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The closed set of monitored resource kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Pod,
    Node,
    Deployment,
    Pvc,
    DiskVolume,
    SyncStatus,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 6] = [
        ResourceKind::Pod,
        ResourceKind::Node,
        ResourceKind::Deployment,
        ResourceKind::Pvc,
        ResourceKind::DiskVolume,
        ResourceKind::SyncStatus,
    ];

    /// Get the string representation (lowercase)
    ///
    /// This matches the serde serialization format.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Pod => "pod",
            ResourceKind::Node => "node",
            ResourceKind::Deployment => "deployment",
            ResourceKind::Pvc => "pvc",
            ResourceKind::DiskVolume => "disk_volume",
            ResourceKind::SyncStatus => "sync_status",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = String;

    /// Accepts both the canonical names and the plural route segments used by
    /// the push endpoints (`pods`, `nodes`, `pvcs`, `volumes`, `applications`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pod" | "pods" => Ok(ResourceKind::Pod),
            "node" | "nodes" => Ok(ResourceKind::Node),
            "deployment" | "deployments" => Ok(ResourceKind::Deployment),
            "pvc" | "pvcs" => Ok(ResourceKind::Pvc),
            "disk_volume" | "volume" | "volumes" => Ok(ResourceKind::DiskVolume),
            "sync_status" | "application" | "applications" => Ok(ResourceKind::SyncStatus),
            other => Err(format!("unknown resource kind: {other}")),
        }
    }
}

/// Identity of one resource: kind plus a key unique within that kind
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceId {
    pub kind: ResourceKind,
    pub key: String,
}

impl ResourceId {
    pub fn new(kind: ResourceKind, key: impl Into<String>) -> Self {
        Self {
            kind,
            key: key.into(),
        }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.key)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
}

/// Normalized fact about one resource at one instant
///
/// Events are never mutated after normalization; the history store keeps
/// clones of them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservedEvent {
    pub resource: ResourceId,

    /// Observation time on the source clock
    pub timestamp: DateTime<Utc>,

    pub change: ChangeKind,

    pub attributes: Attributes,
}

impl ObservedEvent {
    pub fn kind(&self) -> ResourceKind {
        self.resource.kind
    }

    pub fn key(&self) -> &str {
        &self.resource.key
    }

    pub fn is_tombstone(&self) -> bool {
        self.change == ChangeKind::Deleted
    }
}

/// Kind-specific snapshot carried by an event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Attributes {
    Pod(PodAttributes),
    Node(NodeAttributes),
    Deployment(DeploymentAttributes),
    Volume(VolumeAttributes),
    Sync(SyncAttributes),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodAttributes {
    pub namespace: String,
    pub name: String,
    pub phase: String,
    pub containers: Vec<ContainerStatus>,
}

impl PodAttributes {
    /// Sum of restart counts over all containers
    pub fn total_restarts(&self) -> u64 {
        self.containers
            .iter()
            .fold(0u64, |total, c| total.saturating_add(c.restart_count))
    }

    /// First container stuck in a back-off state, if any
    pub fn backoff_reason(&self) -> Option<(&str, &str)> {
        self.containers.iter().find_map(|c| {
            c.waiting_reason
                .as_deref()
                .filter(|reason| BACKOFF_REASONS.contains(reason))
                .map(|reason| (c.name.as_str(), reason))
        })
    }
}

impl PodAttributes {
    /// Container whose logs explain a restart alert: the one backing off,
    /// otherwise the one with the most restarts
    pub fn restarting_container(&self) -> Option<&str> {
        if let Some((container, _)) = self.backoff_reason() {
            return Some(container);
        }
        self.containers
            .iter()
            .filter(|c| c.restart_count > 0)
            .max_by_key(|c| c.restart_count)
            .map(|c| c.name.as_str())
    }
}

/// Waiting reasons that count as an immediate pod failure
pub const BACKOFF_REASONS: [&str; 3] = ["CrashLoopBackOff", "ImagePullBackOff", "ErrImagePull"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerStatus {
    pub name: String,
    pub restart_count: u64,
    pub waiting_reason: Option<String>,
    pub last_termination_reason: Option<String>,
    pub last_exit_code: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeAttributes {
    pub name: String,
    pub conditions: Vec<NodeCondition>,
}

impl NodeAttributes {
    /// Conditions that indicate an unhealthy node, in a stable order
    pub fn problems(&self) -> Vec<NodeProblem> {
        let mut problems = Vec::new();
        let status_of = |kind: &str| {
            self.conditions
                .iter()
                .find(|c| c.kind == kind)
                .map(|c| c.status.as_str())
        };

        // a node that does not report Ready at all is treated as not ready
        if status_of("Ready") != Some("True") {
            problems.push(NodeProblem::NotReady);
        }
        if status_of("MemoryPressure") == Some("True") {
            problems.push(NodeProblem::MemoryPressure);
        }
        if status_of("DiskPressure") == Some("True") {
            problems.push(NodeProblem::DiskPressure);
        }
        if status_of("PIDPressure") == Some("True") {
            problems.push(NodeProblem::PidPressure);
        }
        problems
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeCondition {
    pub kind: String,
    pub status: String,
    pub reason: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeProblem {
    NotReady,
    MemoryPressure,
    DiskPressure,
    PidPressure,
}

impl fmt::Display for NodeProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeProblem::NotReady => "NotReady",
            NodeProblem::MemoryPressure => "MemoryPressure",
            NodeProblem::DiskPressure => "DiskPressure",
            NodeProblem::PidPressure => "PIDPressure",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentAttributes {
    pub namespace: String,
    pub name: String,
    pub desired_replicas: u32,
    pub available_replicas: u32,
    pub labels: std::collections::BTreeMap<String, String>,
}

impl DeploymentAttributes {
    pub fn is_degraded(&self) -> bool {
        self.available_replicas < self.desired_replicas
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeAttributes {
    pub used_bytes: u64,
    pub capacity_bytes: u64,
    /// Pod or node the measurement was taken from
    pub reported_by: Option<String>,
}

impl VolumeAttributes {
    /// Usage as a fraction of capacity, `None` when capacity is unknown
    pub fn usage_ratio(&self) -> Option<f64> {
        (self.capacity_bytes > 0).then(|| self.used_bytes as f64 / self.capacity_bytes as f64)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncAttributes {
    pub application: String,
    pub sync_status: String,
    pub health_status: String,
}

impl SyncAttributes {
    pub fn is_drifted(&self) -> bool {
        self.sync_status == "OutOfSync" || self.health_status == "Degraded"
    }

    pub fn is_converged(&self) -> bool {
        self.sync_status == "Synced" && self.health_status != "Degraded"
    }
}
