//! Evaluation engine
//!
//! The [`Monitor`] owns the pipeline:
//!
//! ```text
//! source listing / push ─▶ normalize ─▶ history.append ─▶ rules ─▶ dedup ─▶ dispatch
//!                                             │                      │
//!                                        history.window        alert state store
//! ```
//!
//! Per resource the pipeline runs under a keyed lock, so a push delivery and a
//! pass touching the same resource never interleave their read-modify-write of
//! alert state. Distinct resources are processed concurrently by a bounded
//! worker pool. Passes themselves are serialized.
//!
//! Dedup and history use the observation timestamp as "now". Re-notify cadence
//! therefore follows the source clock.
//!
//! Once the pass deadline has passed, observations that have not started yet
//! are deferred to the next pass. Observations already in flight run to the
//! end, so a notification that went out always has its alert state stored.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::{StreamExt, stream};
use serde::Serialize;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, error, info, instrument, warn};

use crate::config::Config;
use crate::dedup::{self, AlertState, Reason};
use crate::error::MonitorResult;
use crate::event::{Attributes, ObservedEvent, ResourceId, ResourceKind};
use crate::normalize::{RawResource, normalize};
use crate::notify::{DispatchResult, Dispatcher, Notification, Priority};
use crate::rules::{self, Rule};
use crate::source::ResourceSource;
use crate::storage::{StorageError, Store};

/// Characters of container log kept in a restart notification
const LOG_SNIPPET_CHARS: usize = 500;

/// Counters for one resource kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DomainSummary {
    pub observed: usize,
    pub malformed: usize,
    /// Resources that disappeared from the listing or were pushed as deleted
    pub deleted: usize,
    pub candidates: usize,
    pub notified: usize,
    pub recoveries: usize,
    pub suppressed: usize,
    pub rate_limited: usize,
    pub failed: usize,
    /// Observations not processed before the pass deadline
    pub deferred: usize,
}

impl DomainSummary {
    fn merge(&mut self, other: &DomainSummary) {
        self.observed += other.observed;
        self.malformed += other.malformed;
        self.deleted += other.deleted;
        self.candidates += other.candidates;
        self.notified += other.notified;
        self.recoveries += other.recoveries;
        self.suppressed += other.suppressed;
        self.rate_limited += other.rate_limited;
        self.failed += other.failed;
        self.deferred += other.deferred;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PassSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub domains: BTreeMap<ResourceKind, DomainSummary>,
    /// Why the pass stopped early (source unavailable, storage failure)
    pub aborted: Option<String>,
    pub deadline_exceeded: bool,
    pub purged_history: usize,
    pub purged_alerts: usize,
}

impl PassSummary {
    fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            finished_at: started_at,
            domains: BTreeMap::new(),
            aborted: None,
            deadline_exceeded: false,
            purged_history: 0,
            purged_alerts: 0,
        }
    }

    pub fn total(&self) -> DomainSummary {
        let mut total = DomainSummary::default();
        for domain in self.domains.values() {
            total.merge(domain);
        }
        total
    }

    pub fn is_complete(&self) -> bool {
        self.aborted.is_none() && !self.deadline_exceeded
    }
}

/// Counters kept across passes and push deliveries
#[derive(Debug, Clone, Default, Serialize)]
pub struct EngineStats {
    pub passes: u64,
    pub pushed: u64,
    pub totals: BTreeMap<ResourceKind, DomainSummary>,
    pub last_pass: Option<PassSummary>,
}

pub struct Monitor {
    config: Arc<Config>,
    store: Arc<dyn Store>,
    source: Option<Arc<dyn ResourceSource>>,
    dispatcher: Arc<Dispatcher>,
    key_locks: DashMap<ResourceId, Arc<tokio::sync::Mutex<()>>>,
    pass_lock: tokio::sync::Mutex<()>,
    stats: Mutex<EngineStats>,
    last_housekeeping: Mutex<Instant>,
    /// Last log collection per `(pod, container)`
    logs_collected: DashMap<(ResourceId, String), DateTime<Utc>>,
}

impl Monitor {
    pub fn new(
        config: Arc<Config>,
        store: Arc<dyn Store>,
        source: Option<Arc<dyn ResourceSource>>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        Self {
            config,
            store,
            source,
            dispatcher,
            key_locks: DashMap::new(),
            pass_lock: tokio::sync::Mutex::new(()),
            stats: Mutex::new(EngineStats::default()),
            last_housekeeping: Mutex::new(Instant::now()),
            logs_collected: DashMap::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn stats(&self) -> EngineStats {
        self.stats
            .lock()
            .map(|stats| stats.clone())
            .unwrap_or_default()
    }

    fn record(&self, kind: ResourceKind, outcome: &DomainSummary, pushed: bool) {
        if let Ok(mut stats) = self.stats.lock() {
            stats.totals.entry(kind).or_default().merge(outcome);
            if pushed {
                stats.pushed += 1;
            }
        }
    }

    fn key_lock(&self, resource: &ResourceId) -> Arc<tokio::sync::Mutex<()>> {
        self.key_locks
            .entry(resource.clone())
            .or_default()
            .value()
            .clone()
    }

    /// Push mode: normalize and evaluate a single delivery
    ///
    /// Without scheduled passes nothing else purges stale state, so pushes
    /// run the housekeeping themselves, at most once per housekeeping interval.
    #[instrument(skip_all, fields(kind = %raw.kind))]
    pub async fn ingest(&self, raw: RawResource) -> MonitorResult<DomainSummary> {
        let event = normalize(&raw).inspect_err(|e| warn!("rejected push: {e}"))?;
        let mut outcome = self
            .process_event(event, None)
            .await
            .inspect_err(|e| error!("storage failure: {e}"))?;
        outcome.observed = 1;
        self.record(raw.kind, &outcome, true);

        if self.housekeeping_due() {
            self.housekeeping().await;
        }
        Ok(outcome)
    }

    /// Run one evaluation of every evaluated kind against the source
    #[instrument(skip(self))]
    pub async fn run_pass(&self) -> PassSummary {
        let _pass = self.pass_lock.lock().await;

        let mut summary = PassSummary::new(Utc::now());
        let deadline = Instant::now() + self.config.pass_deadline();

        match &self.source {
            Some(source) => {
                for kind in &self.config.source.kinds {
                    if Instant::now() >= deadline {
                        warn!("pass deadline exceeded before {kind}");
                        summary.deadline_exceeded = true;
                        break;
                    }
                    let domain = match self.run_kind(source.as_ref(), *kind, deadline).await {
                        Ok(domain) => domain,
                        Err(reason) => {
                            warn!("pass aborted at {kind}: {reason}");
                            summary.aborted = Some(reason);
                            break;
                        }
                    };
                    summary.domains.insert(*kind, domain);
                    if domain.deferred > 0 {
                        warn!("pass deadline exceeded during {kind}");
                        summary.deadline_exceeded = true;
                        break;
                    }
                }
            }
            None => summary.aborted = Some("no resource source configured".to_string()),
        }

        (summary.purged_history, summary.purged_alerts) = self.housekeeping().await;
        summary.finished_at = Utc::now();

        let total = summary.total();
        info!(
            observed = total.observed,
            notified = total.notified,
            recoveries = total.recoveries,
            failed = total.failed,
            "pass finished"
        );

        if let Ok(mut stats) = self.stats.lock() {
            stats.passes += 1;
            for (kind, domain) in &summary.domains {
                stats.totals.entry(*kind).or_default().merge(domain);
            }
            stats.last_pass = Some(summary.clone());
        }

        summary
    }

    async fn run_kind(
        &self,
        source: &dyn ResourceSource,
        kind: ResourceKind,
        deadline: Instant,
    ) -> Result<DomainSummary, String> {
        let mut domain = DomainSummary::default();

        let listing = match timeout_at(deadline, source.list(kind)).await {
            Ok(Ok(listing)) => listing,
            Ok(Err(e)) => return Err(e.to_string()),
            Err(_) => return Err(format!("deadline exceeded while listing {kind}")),
        };
        let observed_at = Utc::now();

        let mut events = Vec::with_capacity(listing.items.len());
        for payload in listing.items {
            match normalize(&RawResource::snapshot(kind, observed_at, payload)) {
                Ok(event) => events.push(event),
                Err(e) => {
                    debug!("{e}");
                    domain.malformed += 1;
                }
            }
        }
        domain.observed = events.len();

        if listing.complete {
            // resources with history that are gone from a complete listing
            let present: HashSet<&ResourceId> = events.iter().map(|e| &e.resource).collect();
            let tracked = self.store.keys(kind).await.map_err(|e| e.to_string())?;
            for resource in tracked.iter().filter(|id| !present.contains(id)) {
                let marked = self
                    .store
                    .mark_tombstoned(resource, observed_at)
                    .await
                    .map_err(|e| e.to_string())?;
                if marked > 0 {
                    debug!("{resource} disappeared");
                    domain.deleted += 1;
                }
            }
        } else {
            warn!("{kind} listing is partial, skipping deletion detection");
        }

        let mut outcomes = stream::iter(events)
            .map(|event| self.process_event(event, Some(deadline)))
            .buffer_unordered(self.config.pass.workers);

        while let Some(outcome) = outcomes.next().await {
            let outcome = outcome.map_err(|e| format!("storage failure: {e}"))?;
            domain.merge(&outcome);
        }

        Ok(domain)
    }

    fn housekeeping_due(&self) -> bool {
        let Ok(mut last) = self.last_housekeeping.lock() else {
            return false;
        };
        let now = Instant::now();
        if now.duration_since(*last) < self.config.housekeeping_interval() {
            return false;
        }
        *last = now;
        true
    }

    /// Purge stale history and expired tombstones; returns both counts
    pub async fn housekeeping(&self) -> (usize, usize) {
        if let Ok(mut last) = self.last_housekeeping.lock() {
            *last = Instant::now();
        }

        let now = Utc::now();
        let purged_history = self.store.purge_stale(now).await.unwrap_or_else(|e| {
            error!("failed to purge stale history: {e}");
            0
        });
        let purged_alerts = self
            .store
            .purge_tombstoned(now, self.config.tombstone_grace())
            .await
            .unwrap_or_else(|e| {
                error!("failed to purge tombstoned alerts: {e}");
                0
            });

        self.key_locks
            .retain(|_, lock| Arc::strong_count(lock) > 1);
        let log_interval = self.config.log_interval();
        self.logs_collected
            .retain(|_, collected| now - *collected < log_interval);

        (purged_history, purged_alerts)
    }

    /// Alert states of a resource that was just observed
    ///
    /// An observation proves the resource exists, so any tombstone left by an
    /// earlier listing is cleared.
    async fn live_states(
        &self,
        resource: &ResourceId,
    ) -> Result<HashMap<Rule, AlertState>, StorageError> {
        let mut states = HashMap::new();
        for rule in Rule::for_kind(resource.kind) {
            let Some(mut state) = self.store.get(resource, *rule).await? else {
                continue;
            };
            if state.tombstoned_at.take().is_some() {
                debug!("{resource} is back, keeping its {rule} state");
                self.store.put(&state).await?;
            }
            states.insert(*rule, state);
        }
        Ok(states)
    }

    /// Recent logs of the restarting container, at most once per container and interval
    async fn log_tail(&self, event: &ObservedEvent) -> Option<String> {
        let lines = self.config.source.log_tail_lines;
        let source = self.source.as_ref().filter(|_| lines > 0)?;
        let Attributes::Pod(pod) = &event.attributes else {
            return None;
        };
        let container = pod.restarting_container()?;

        let key = (event.resource.clone(), container.to_string());
        if self
            .logs_collected
            .get(&key)
            .is_some_and(|collected| event.timestamp - *collected < self.config.log_interval())
        {
            return None;
        }

        match source
            .container_logs(&pod.namespace, &pod.name, container, lines)
            .await
        {
            Ok(Some(logs)) => {
                self.logs_collected.insert(key, event.timestamp);
                Some(format!(
                    "\n\nLast log lines of {container}:\n{}",
                    tail_chars(&logs, LOG_SNIPPET_CHARS)
                ))
            }
            Ok(None) => None,
            Err(e) => {
                debug!("no logs for {}: {e}", event.resource);
                None
            }
        }
    }

    /// Append, evaluate, deduplicate and notify for one observation
    ///
    /// With a deadline, an observation that has not started by then is only
    /// counted as deferred.
    async fn process_event(
        &self,
        event: ObservedEvent,
        deadline: Option<Instant>,
    ) -> Result<DomainSummary, StorageError> {
        let lock = self.key_lock(&event.resource);
        let _guard = lock.lock().await;

        let mut outcome = DomainSummary::default();

        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            outcome.deferred = 1;
            return Ok(outcome);
        }

        if event.is_tombstone() {
            if self
                .store
                .mark_tombstoned(&event.resource, event.timestamp)
                .await?
                > 0
            {
                debug!("{} deleted", event.resource);
            }
            outcome.deleted = 1;
            return Ok(outcome);
        }

        let now = event.timestamp;
        let policy = self.config.window_policy(event.kind());

        let previous = self.live_states(&event.resource).await?;
        self.store.append(&event).await?;
        let window = self
            .store
            .window(&event.resource, policy.window(), now)
            .await?;

        for candidate in rules::evaluate(&self.config, &event, &window) {
            outcome.candidates += 1;

            let verdict = dedup::should_notify(
                &candidate,
                previous.get(&candidate.rule),
                now,
                self.config.renotify_interval(),
            );

            let Some(mut state) = verdict.state else {
                continue;
            };

            if !verdict.notify {
                outcome.suppressed += 1;
                self.store.put(&state).await?;
                continue;
            }

            let mut notification = Notification::from_candidate(
                &candidate,
                &self.config.cluster_name,
                &self.config.notify_topic,
            );
            if candidate.rule == Rule::PodRestarts && !candidate.recovery {
                if let Some(logs) = self.log_tail(&event).await {
                    notification.message.push_str(&logs);
                }
            }
            let result = self.dispatcher.dispatch(&notification).await;

            if result.delivered {
                if verdict.reason == Reason::Recovered {
                    outcome.recoveries += 1;
                } else {
                    outcome.notified += 1;
                }
                debug!(
                    "{} {}: {:?} ({})",
                    candidate.resource, candidate.rule, verdict.reason, candidate.severity
                );
            } else if result.is_rate_limited() {
                state.mark_undelivered();
                outcome.rate_limited += 1;
            } else {
                state.mark_undelivered();
                outcome.failed += 1;
            }

            self.store.put(&state).await?;
        }

        Ok(outcome)
    }

    /// Deliver a fixed low-priority message to check the notification path
    pub async fn send_test(&self) -> DispatchResult {
        let tracked = self.store.tracked().await.unwrap_or_default();
        let notification = Notification::new(
            &self.config.notify_topic,
            &format!("INFO: Test Notification - {}", self.config.cluster_name),
            format!(
                "kube-sentinel on {} is able to deliver notifications.\nTracked resources: {tracked}\nRestart threshold: {} in {} minutes\nDisk thresholds: {}% / {}%",
                self.config.cluster_name,
                self.config.restart_threshold,
                self.config.time_window_minutes,
                self.config.disk_warn_pct,
                self.config.disk_critical_pct
            ),
            Priority::Low,
            vec!["test_tube".to_string()],
        );
        self.dispatcher.dispatch(&notification).await
    }

    pub async fn send_startup(&self) -> DispatchResult {
        let kinds = self
            .config
            .source
            .kinds
            .iter()
            .map(ResourceKind::as_str)
            .collect::<Vec<_>>()
            .join(", ");
        let notification = Notification::new(
            &self.config.notify_topic,
            &format!("INFO: Monitoring Started - {}", self.config.cluster_name),
            format!(
                "kube-sentinel started.\nWatching: {kinds}\nRestart threshold: {} in {} minutes\nDisk thresholds: {}% / {}%",
                self.config.restart_threshold,
                self.config.time_window_minutes,
                self.config.disk_warn_pct,
                self.config.disk_critical_pct
            ),
            Priority::Low,
            vec!["rocket".to_string()],
        );
        self.dispatcher.dispatch(&notification).await
    }
}

/// The last `max_chars` characters of `text`
fn tail_chars(text: &str, max_chars: usize) -> &str {
    let text = text.trim_end();
    let skip = text.chars().count().saturating_sub(max_chars);
    match text.char_indices().nth(skip) {
        Some((start, _)) => &text[start..],
        None => "",
    }
}
