//! In-memory storage backend (no persistence)
//!
//! History lives in one `VecDeque` per resource inside a sharded map, so
//! appends for different resources never contend on the same lock.
//!
//! ## Limitations
//!
//! - **No persistence**: history and alert state are lost on restart
//! - **Cold start**: every alert that is still firing notifies again after a restart

use std::collections::VecDeque;

use async_trait::async_trait;
use chrono::{DateTime, Duration as TimeDelta, Utc};
use dashmap::DashMap;
use tracing::{debug, trace};

use super::backend::{AlertStateStore, HistoryEntry, HistoryStore, Retention, Store};
use super::error::StorageResult;
use crate::dedup::AlertState;
use crate::event::{ObservedEvent, ResourceId, ResourceKind};
use crate::rules::Rule;

pub struct MemoryStore {
    retention: Retention,
    history: DashMap<ResourceId, VecDeque<HistoryEntry>>,
    alerts: DashMap<(ResourceId, Rule), AlertState>,
}

impl MemoryStore {
    pub fn new(retention: Retention) -> Self {
        Self {
            retention,
            history: DashMap::new(),
            alerts: DashMap::new(),
        }
    }
}

/// Insert in timestamp order (replacing an entry with the same timestamp),
/// then trim to the window and the capacity
fn insert_bounded(
    entries: &mut VecDeque<HistoryEntry>,
    entry: HistoryEntry,
    window: TimeDelta,
    capacity: usize,
) {
    let position = entries.partition_point(|e| e.timestamp < entry.timestamp);
    match entries.get_mut(position) {
        Some(existing) if existing.timestamp == entry.timestamp => *existing = entry,
        _ => entries.insert(position, entry),
    }

    if let Some(newest) = entries.back().map(|e| e.timestamp) {
        let cutoff = newest - window;
        while entries.front().is_some_and(|e| e.timestamp < cutoff) {
            entries.pop_front();
        }
    }
    while entries.len() > capacity {
        entries.pop_front();
    }
}

#[async_trait]
impl HistoryStore for MemoryStore {
    async fn append(&self, event: &ObservedEvent) -> StorageResult<()> {
        let policy = self.retention.policy(event.kind());
        let mut entries = self.history.entry(event.resource.clone()).or_default();
        insert_bounded(
            &mut entries,
            HistoryEntry::new(event.clone()),
            policy.window(),
            policy.capacity,
        );
        trace!("{}: {} entries retained", event.resource, entries.len());
        Ok(())
    }

    async fn window(
        &self,
        resource: &ResourceId,
        duration: TimeDelta,
        as_of: DateTime<Utc>,
    ) -> StorageResult<Vec<HistoryEntry>> {
        let start = as_of - duration;
        Ok(self
            .history
            .get(resource)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|e| e.timestamp >= start && e.timestamp <= as_of)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn purge_stale(&self, now: DateTime<Utc>) -> StorageResult<usize> {
        let cutoff = now - self.retention.ttl;
        let before = self.history.len();
        self.history
            .retain(|_, entries| entries.back().is_some_and(|e| e.timestamp >= cutoff));
        let purged = before.saturating_sub(self.history.len());
        if purged > 0 {
            debug!("purged history of {purged} idle resources");
        }
        Ok(purged)
    }

    async fn keys(&self, kind: ResourceKind) -> StorageResult<Vec<ResourceId>> {
        Ok(self
            .history
            .iter()
            .filter(|entry| entry.key().kind == kind)
            .map(|entry| entry.key().clone())
            .collect())
    }

    async fn tracked(&self) -> StorageResult<usize> {
        Ok(self.history.len())
    }
}

#[async_trait]
impl AlertStateStore for MemoryStore {
    async fn get(&self, resource: &ResourceId, rule: Rule) -> StorageResult<Option<AlertState>> {
        Ok(self
            .alerts
            .get(&(resource.clone(), rule))
            .map(|state| state.clone()))
    }

    async fn put(&self, state: &AlertState) -> StorageResult<()> {
        self.alerts
            .insert((state.resource.clone(), state.rule), state.clone());
        Ok(())
    }

    async fn snapshot(&self) -> StorageResult<Vec<AlertState>> {
        Ok(self.alerts.iter().map(|state| state.clone()).collect())
    }

    async fn mark_tombstoned(
        &self,
        resource: &ResourceId,
        at: DateTime<Utc>,
    ) -> StorageResult<usize> {
        let mut marked = 0;
        for rule in Rule::for_kind(resource.kind) {
            if let Some(mut state) = self.alerts.get_mut(&(resource.clone(), *rule)) {
                if state.tombstoned_at.is_none() {
                    state.tombstoned_at = Some(at);
                    marked += 1;
                }
            }
        }
        Ok(marked)
    }

    async fn purge_tombstoned(
        &self,
        now: DateTime<Utc>,
        grace: TimeDelta,
    ) -> StorageResult<usize> {
        let before = self.alerts.len();
        self.alerts.retain(|_, state| {
            state
                .tombstoned_at
                .is_none_or(|tombstoned| now - tombstoned < grace)
        });
        Ok(before.saturating_sub(self.alerts.len()))
    }
}

impl Store for MemoryStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
