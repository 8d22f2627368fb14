//! Normalizer - raw source payloads to [`ObservedEvent`]
//!
//! The source hands us Kubernetes-shaped JSON (pods, nodes, deployments),
//! kubelet summary fragments (PVC and node filesystem usage) and Argo CD
//! applications. Normalization is total over well-formed objects:
//!
//! | missing field              | default      |
//! |----------------------------|--------------|
//! | `metadata.namespace`       | `"default"`  |
//! | pod `status.phase`         | `"Unknown"`  |
//! | container `restartCount`   | `0`          |
//! | deployment `spec.replicas` | `1`          |
//! | `status.availableReplicas` | `0`          |
//! | volume byte counters       | `0`          |
//! | sync / health status       | `"Unknown"`  |
//!
//! A payload that is not an object, has no name, or carries a core field of
//! the wrong type is rejected with [`MonitorError::MalformedInput`].

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::error::{MonitorError, MonitorResult};
use crate::event::{
    Attributes, ChangeKind, ContainerStatus, DeploymentAttributes, NodeAttributes, NodeCondition,
    ObservedEvent, PodAttributes, ResourceId, ResourceKind, SyncAttributes, VolumeAttributes,
};

/// One raw snapshot or change notification, as delivered by a source
#[derive(Debug, Clone)]
pub struct RawResource {
    pub kind: ResourceKind,
    pub change: ChangeKind,
    pub observed_at: DateTime<Utc>,
    pub payload: Value,
}

impl RawResource {
    pub fn snapshot(kind: ResourceKind, observed_at: DateTime<Utc>, payload: Value) -> Self {
        Self {
            kind,
            change: ChangeKind::Updated,
            observed_at,
            payload,
        }
    }

    /// Build a raw resource from a push delivery
    ///
    /// The body is either the bare object or an envelope `{"type", "data",
    /// "time"}` as emitted by event routers. An envelope type ending in
    /// `deleted` / `delete` marks a tombstone; `added` / `create` marks a
    /// creation.
    pub fn from_push(kind: ResourceKind, received_at: DateTime<Utc>, body: Value) -> Self {
        let is_envelope = body.get("data").is_some_and(Value::is_object)
            && (body.get("type").is_some() || body.get("specversion").is_some());

        if !is_envelope {
            return Self::snapshot(kind, received_at, body);
        }

        let event_type = body
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_ascii_lowercase();
        let change = if event_type.ends_with("deleted") || event_type.ends_with("delete") {
            ChangeKind::Deleted
        } else if event_type.ends_with("added") || event_type.ends_with("create") {
            ChangeKind::Created
        } else {
            ChangeKind::Updated
        };
        let observed_at = body
            .get("time")
            .and_then(Value::as_str)
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or(received_at);

        let payload = body.get("data").cloned().unwrap_or(Value::Null);

        Self {
            kind,
            change,
            observed_at,
            payload,
        }
    }
}

/// Convert a raw resource into a normalized event
pub fn normalize(raw: &RawResource) -> MonitorResult<ObservedEvent> {
    let kind = raw.kind;
    let object = raw
        .payload
        .as_object()
        .ok_or_else(|| MonitorError::malformed(kind, "payload is not a JSON object"))?;
    let fields = Fields { kind, object };

    let (key, attributes) = match kind {
        ResourceKind::Pod => normalize_pod(&fields)?,
        ResourceKind::Node => normalize_node(&fields)?,
        ResourceKind::Deployment => normalize_deployment(&fields)?,
        ResourceKind::Pvc => normalize_pvc(&fields)?,
        ResourceKind::DiskVolume => normalize_disk(&fields)?,
        ResourceKind::SyncStatus => normalize_sync(&fields)?,
    };

    Ok(ObservedEvent {
        resource: ResourceId::new(kind, key),
        timestamp: raw.observed_at,
        change: raw.change,
        attributes,
    })
}

/// Typed accessors over a JSON object that report malformed input with context
struct Fields<'a> {
    kind: ResourceKind,
    object: &'a Map<String, Value>,
}

impl<'a> Fields<'a> {
    fn lookup(&self, path: &[&str]) -> Option<&'a Value> {
        let (first, rest) = path.split_first()?;
        let mut current = self.object.get(*first)?;
        for segment in rest {
            current = current.get(*segment)?;
        }
        (!current.is_null()).then_some(current)
    }

    fn opt_str(&self, path: &[&str]) -> MonitorResult<Option<&'a str>> {
        match self.lookup(path) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.as_str())),
            Some(_) => Err(self.wrong_type(path, "a string")),
        }
    }

    fn str_or(&self, path: &[&str], default: &'a str) -> MonitorResult<&'a str> {
        Ok(self.opt_str(path)?.unwrap_or(default))
    }

    fn required_str(&self, path: &[&str]) -> MonitorResult<&'a str> {
        self.opt_str(path)?
            .filter(|s| !s.is_empty())
            .ok_or_else(|| MonitorError::malformed(self.kind, format!("missing {}", path.join("."))))
    }

    fn u64_or(&self, path: &[&str], default: u64) -> MonitorResult<u64> {
        match self.lookup(path) {
            None => Ok(default),
            Some(value) => value
                .as_u64()
                .ok_or_else(|| self.wrong_type(path, "a non-negative integer")),
        }
    }

    fn array(&self, path: &[&str]) -> MonitorResult<&'a [Value]> {
        match self.lookup(path) {
            None => Ok(&[]),
            Some(Value::Array(items)) => Ok(items.as_slice()),
            Some(_) => Err(self.wrong_type(path, "an array")),
        }
    }

    fn nested(&self, value: &'a Value, path: &[&str]) -> MonitorResult<Fields<'a>> {
        value
            .as_object()
            .map(|object| Fields {
                kind: self.kind,
                object,
            })
            .ok_or_else(|| self.wrong_type(path, "an object"))
    }

    fn wrong_type(&self, path: &[&str], expected: &str) -> MonitorError {
        MonitorError::malformed(self.kind, format!("{} is not {expected}", path.join(".")))
    }
}

fn namespaced_key(fields: &Fields<'_>) -> MonitorResult<(String, String, String)> {
    let name = fields.required_str(&["metadata", "name"])?;
    let namespace = fields.str_or(&["metadata", "namespace"], "default")?;
    Ok((
        format!("{namespace}/{name}"),
        namespace.to_string(),
        name.to_string(),
    ))
}

fn normalize_pod(fields: &Fields<'_>) -> MonitorResult<(String, Attributes)> {
    let (key, namespace, name) = namespaced_key(fields)?;
    let phase = fields.str_or(&["status", "phase"], "Unknown")?;

    let mut containers = Vec::new();
    let path = ["status", "containerStatuses"];
    for item in fields.array(&path)? {
        let container = fields.nested(item, &path)?;
        containers.push(ContainerStatus {
            name: container.str_or(&["name"], "unknown")?.to_string(),
            restart_count: container.u64_or(&["restartCount"], 0)?,
            waiting_reason: container
                .opt_str(&["state", "waiting", "reason"])?
                .map(String::from),
            last_termination_reason: container
                .opt_str(&["lastState", "terminated", "reason"])?
                .map(String::from),
            last_exit_code: container
                .lookup(&["lastState", "terminated", "exitCode"])
                .and_then(Value::as_i64),
        });
    }

    Ok((
        key,
        Attributes::Pod(PodAttributes {
            namespace,
            name,
            phase: phase.to_string(),
            containers,
        }),
    ))
}

fn normalize_node(fields: &Fields<'_>) -> MonitorResult<(String, Attributes)> {
    let name = fields.required_str(&["metadata", "name"])?.to_string();

    let mut conditions = Vec::new();
    let path = ["status", "conditions"];
    for item in fields.array(&path)? {
        let condition = fields.nested(item, &path)?;
        conditions.push(NodeCondition {
            kind: condition.required_str(&["type"])?.to_string(),
            status: condition.str_or(&["status"], "Unknown")?.to_string(),
            reason: condition.opt_str(&["reason"])?.map(String::from),
            message: condition.opt_str(&["message"])?.map(String::from),
        });
    }

    Ok((name.clone(), Attributes::Node(NodeAttributes { name, conditions })))
}

fn normalize_deployment(fields: &Fields<'_>) -> MonitorResult<(String, Attributes)> {
    let (key, namespace, name) = namespaced_key(fields)?;

    let labels = match fields.lookup(&["metadata", "labels"]) {
        None => BTreeMap::new(),
        Some(Value::Object(labels)) => labels
            .iter()
            .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
            .collect(),
        Some(_) => return Err(fields.wrong_type(&["metadata", "labels"], "an object")),
    };

    let desired = fields.u64_or(&["spec", "replicas"], 1)?;
    let available = fields.u64_or(&["status", "availableReplicas"], 0)?;

    Ok((
        key,
        Attributes::Deployment(DeploymentAttributes {
            namespace,
            name,
            desired_replicas: u32::try_from(desired).unwrap_or(u32::MAX),
            available_replicas: u32::try_from(available).unwrap_or(u32::MAX),
            labels,
        }),
    ))
}

fn normalize_pvc(fields: &Fields<'_>) -> MonitorResult<(String, Attributes)> {
    // kubelet volume stats carry `pvcRef`; pushed PVC objects carry metadata
    let key = match fields.lookup(&["pvcRef"]) {
        Some(_) => {
            let name = fields.required_str(&["pvcRef", "name"])?;
            let namespace = fields.str_or(&["pvcRef", "namespace"], "default")?;
            format!("{namespace}/{name}")
        }
        None => namespaced_key(fields)?.0,
    };

    Ok((
        key,
        Attributes::Volume(VolumeAttributes {
            used_bytes: fields.u64_or(&["usedBytes"], 0)?,
            capacity_bytes: fields.u64_or(&["capacityBytes"], 0)?,
            reported_by: fields.opt_str(&["podName"])?.map(String::from),
        }),
    ))
}

fn normalize_disk(fields: &Fields<'_>) -> MonitorResult<(String, Attributes)> {
    // accept both the bare `{nodeName, fs}` fragment and a full summary `{node: {...}}`
    let root = match fields.lookup(&["node"]) {
        Some(node) => fields.nested(node, &["node"])?,
        None => Fields {
            kind: fields.kind,
            object: fields.object,
        },
    };

    let node = root.required_str(&["nodeName"])?.to_string();

    Ok((
        node.clone(),
        Attributes::Volume(VolumeAttributes {
            used_bytes: root.u64_or(&["fs", "usedBytes"], 0)?,
            capacity_bytes: root.u64_or(&["fs", "capacityBytes"], 0)?,
            reported_by: Some(node),
        }),
    ))
}

fn normalize_sync(fields: &Fields<'_>) -> MonitorResult<(String, Attributes)> {
    let (key, _, name) = namespaced_key(fields)?;

    Ok((
        key,
        Attributes::Sync(SyncAttributes {
            application: name,
            sync_status: fields
                .str_or(&["status", "sync", "status"], "Unknown")?
                .to_string(),
            health_status: fields
                .str_or(&["status", "health", "status"], "Unknown")?
                .to_string(),
        }),
    ))
}
