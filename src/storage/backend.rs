//! Storage trait definitions

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration as TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use super::error::StorageResult;
use crate::config::{Config, WindowPolicy};
use crate::dedup::AlertState;
use crate::event::{ObservedEvent, ResourceId, ResourceKind};
use crate::rules::Rule;

/// One retained observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub event: ObservedEvent,
}

impl HistoryEntry {
    pub fn new(event: ObservedEvent) -> Self {
        Self {
            timestamp: event.timestamp,
            event,
        }
    }
}

/// Per-kind window and capacity, plus the idle TTL after which a key is forgotten
#[derive(Debug, Clone)]
pub struct Retention {
    policies: HashMap<ResourceKind, WindowPolicy>,
    pub ttl: TimeDelta,
}

impl Retention {
    pub fn from_config(config: &Config) -> Self {
        Self {
            policies: ResourceKind::ALL
                .into_iter()
                .map(|kind| (kind, config.window_policy(kind)))
                .collect(),
            ttl: config.history_ttl(),
        }
    }

    /// Same window and capacity for every kind
    pub fn uniform(window_minutes: u32, capacity: usize, ttl: TimeDelta) -> Self {
        let policy = WindowPolicy {
            window_minutes,
            capacity,
        };
        Self {
            policies: ResourceKind::ALL
                .into_iter()
                .map(|kind| (kind, policy))
                .collect(),
            ttl,
        }
    }

    pub fn policy(&self, kind: ResourceKind) -> WindowPolicy {
        self.policies.get(&kind).copied().unwrap_or(WindowPolicy {
            window_minutes: 60,
            capacity: 120,
        })
    }
}

/// Time-ordered observations per resource
///
/// ## Invariants
///
/// - entries of one resource are ordered by timestamp, oldest first
/// - at most one entry per timestamp (last write wins)
/// - never more entries than the kind's capacity
/// - entries older than the kind's window, measured from the newest entry,
///   are evicted on append
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Insert an observation at its timestamp position and enforce retention
    async fn append(&self, event: &ObservedEvent) -> StorageResult<()>;

    /// Entries with `as_of - duration <= timestamp <= as_of`, oldest first
    async fn window(
        &self,
        resource: &ResourceId,
        duration: TimeDelta,
        as_of: DateTime<Utc>,
    ) -> StorageResult<Vec<HistoryEntry>>;

    /// Forget resources whose newest entry is older than the TTL
    ///
    /// Returns the number of resources removed.
    async fn purge_stale(&self, now: DateTime<Utc>) -> StorageResult<usize>;

    /// Resources of one kind with retained history
    async fn keys(&self, kind: ResourceKind) -> StorageResult<Vec<ResourceId>>;

    /// Number of resources with retained history
    async fn tracked(&self) -> StorageResult<usize>;
}

/// Deduplication state keyed by `(resource, rule)`
#[async_trait]
pub trait AlertStateStore: Send + Sync {
    async fn get(&self, resource: &ResourceId, rule: Rule) -> StorageResult<Option<AlertState>>;

    async fn put(&self, state: &AlertState) -> StorageResult<()>;

    async fn snapshot(&self) -> StorageResult<Vec<AlertState>>;

    /// Stamp every state of a deleted resource; already tombstoned states keep their stamp
    ///
    /// Returns the number of states newly tombstoned.
    async fn mark_tombstoned(&self, resource: &ResourceId, at: DateTime<Utc>)
    -> StorageResult<usize>;

    /// Drop states tombstoned longer than `grace` ago
    async fn purge_tombstoned(&self, now: DateTime<Utc>, grace: TimeDelta) -> StorageResult<usize>;
}

/// A backend holding both history and alert state
pub trait Store: HistoryStore + AlertStateStore {
    fn backend_name(&self) -> &'static str;
}
