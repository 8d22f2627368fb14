//! Rule evaluation
//!
//! Every monitored domain has one or more [`Rule`]s. A rule is a pure function
//! over the current observation and the resource's history window:
//!
//! ```text
//! (ObservedEvent, &[HistoryEntry]) → Vec<AlertCandidate>
//! ```
//!
//! Rules never touch the stores. The engine appends the observation first and
//! hands the resulting window in, so evaluation of distinct resources can run
//! concurrently.
//!
//! A rule answers in one of three ways:
//!
//! - a **firing** candidate (warning/critical) while the condition holds
//! - a **recovery** candidate (info) once the condition is definitively clear
//! - nothing, when the situation is ambiguous (inside a hysteresis band, or
//!   not enough history yet)
//!
//! Whether a candidate turns into a notification is up to the deduplicator.

mod deployments;
mod drift;
mod nodes;
mod pods;
mod volumes;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::event::{ObservedEvent, ResourceId, ResourceKind};
use crate::storage::HistoryEntry;

pub use volumes::UsageLevel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The closed set of rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Rule {
    PodRestarts,
    NodeHealth,
    DeploymentAvailability,
    PvcUsage,
    DiskUsage,
    SyncDrift,
    OwnershipDrift,
}

impl Rule {
    pub fn as_str(&self) -> &'static str {
        match self {
            Rule::PodRestarts => "pod-restarts",
            Rule::NodeHealth => "node-health",
            Rule::DeploymentAvailability => "deployment-availability",
            Rule::PvcUsage => "pvc-usage",
            Rule::DiskUsage => "disk-usage",
            Rule::SyncDrift => "sync-drift",
            Rule::OwnershipDrift => "ownership-drift",
        }
    }

    /// Human readable name used in notification titles
    pub fn summary(&self) -> &'static str {
        match self {
            Rule::PodRestarts => "Pod Restarts",
            Rule::NodeHealth => "Node Health",
            Rule::DeploymentAvailability => "Deployment Degraded",
            Rule::PvcUsage => "PVC Storage",
            Rule::DiskUsage => "Node Disk",
            Rule::SyncDrift => "GitOps Out of Sync",
            Rule::OwnershipDrift => "Unmanaged Resource",
        }
    }

    /// Static dispatch table: the rules that apply to a resource kind
    pub fn for_kind(kind: ResourceKind) -> &'static [Rule] {
        match kind {
            ResourceKind::Pod => &[Rule::PodRestarts],
            ResourceKind::Node => &[Rule::NodeHealth],
            ResourceKind::Deployment => &[Rule::DeploymentAvailability, Rule::OwnershipDrift],
            ResourceKind::Pvc => &[Rule::PvcUsage],
            ResourceKind::DiskVolume => &[Rule::DiskUsage],
            ResourceKind::SyncStatus => &[Rule::SyncDrift],
        }
    }

    pub fn evaluate(
        &self,
        config: &Config,
        event: &ObservedEvent,
        window: &[HistoryEntry],
    ) -> Option<AlertCandidate> {
        let series = series(event, window);
        match self {
            Rule::PodRestarts => pods::evaluate(config, &series),
            Rule::NodeHealth => nodes::evaluate(&series),
            Rule::DeploymentAvailability => deployments::evaluate(&series),
            Rule::PvcUsage => volumes::evaluate(*self, config, event),
            Rule::DiskUsage => volumes::evaluate(*self, config, event),
            Rule::SyncDrift => drift::evaluate_sync(event),
            Rule::OwnershipDrift => drift::evaluate_ownership(config, event),
        }
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Evaluate every rule registered for the event's kind
pub fn evaluate(
    config: &Config,
    event: &ObservedEvent,
    window: &[HistoryEntry],
) -> Vec<AlertCandidate> {
    Rule::for_kind(event.kind())
        .iter()
        .filter_map(|rule| rule.evaluate(config, event, window))
        .collect()
}

/// Output of a rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertCandidate {
    pub rule: Rule,
    pub resource: ResourceId,
    pub severity: Severity,
    pub message: String,
    /// Identity tags (resource, namespace, ...); severity tags are added at dispatch
    pub tags: Vec<String>,
    /// Whole node down or a crash loop seen on consecutive observations
    pub sustained: bool,
    pub recovery: bool,
}

impl AlertCandidate {
    pub fn firing(
        rule: Rule,
        resource: &ResourceId,
        severity: Severity,
        message: impl Into<String>,
        tags: Vec<String>,
    ) -> Self {
        Self {
            rule,
            resource: resource.clone(),
            severity,
            message: message.into(),
            tags,
            sustained: false,
            recovery: false,
        }
    }

    pub fn recovered(
        rule: Rule,
        resource: &ResourceId,
        message: impl Into<String>,
        tags: Vec<String>,
    ) -> Self {
        Self {
            rule,
            resource: resource.clone(),
            severity: Severity::Info,
            message: message.into(),
            tags,
            sustained: false,
            recovery: true,
        }
    }

    pub fn sustained(mut self, sustained: bool) -> Self {
        self.sustained = sustained;
        self
    }
}

/// The observations a rule looks at, oldest first, ending with the current one
///
/// The window may or may not already contain the current event; anything at or
/// after its timestamp is replaced by it.
fn series<'a>(event: &'a ObservedEvent, window: &'a [HistoryEntry]) -> Vec<&'a ObservedEvent> {
    window
        .iter()
        .map(|entry| &entry.event)
        .filter(|past| past.timestamp < event.timestamp)
        .chain(std::iter::once(event))
        .collect()
}
