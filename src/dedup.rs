//! Alert deduplication
//!
//! One [`AlertState`] exists per `(resource, rule)` pair. [`should_notify`]
//! folds a new candidate into that state and decides whether it is worth a
//! notification. It is pure and records its own decision: a state returned
//! with `notify = true` already carries `last_notified = now`, so feeding it
//! back with the same candidate is a duplicate. When the delivery then fails
//! the caller reverts the stamp with [`AlertState::mark_undelivered`].

use chrono::{DateTime, Duration as TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::event::ResourceId;
use crate::rules::{AlertCandidate, Rule, Severity};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertState {
    pub resource: ResourceId,
    pub rule: Rule,
    pub active: bool,
    /// Severity of the last firing candidate
    pub severity: Severity,
    /// Whether the last firing candidate was sustained (whole node down, repeated crash loop)
    #[serde(default)]
    pub sustained: bool,
    pub first_activated: DateTime<Utc>,
    /// Last notification decision; `None` while the current activation has not been delivered
    pub last_notified: Option<DateTime<Utc>>,
    pub last_seen: DateTime<Utc>,
    /// Firing candidates seen during the current activation
    pub occurrence_count: u64,
    /// Set once the resource has been deleted; the state is purged after a grace period
    pub tombstoned_at: Option<DateTime<Utc>>,
}

impl AlertState {
    /// The notification was not delivered; the next firing observation sends a reminder
    pub fn mark_undelivered(&mut self) {
        self.last_notified = None;
    }

    /// Severity and sustained flag, ordered so that a rise means escalation
    fn level(&self) -> (Severity, bool) {
        (self.severity, self.sustained)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Reason {
    /// First firing candidate after inactivity
    Activated,
    /// Severity went up, or the condition became sustained, while active
    Escalated,
    /// Re-notify interval elapsed, or the previous delivery never happened
    Reminder,
    Recovered,
    /// Active and already notified within the interval
    Duplicate,
    /// Recovery for something that was never (or is no longer) active
    NotActive,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub notify: bool,
    pub reason: Reason,
    /// State to persist; `None` when nothing changed
    pub state: Option<AlertState>,
}

impl Verdict {
    fn send(reason: Reason, mut state: AlertState, now: DateTime<Utc>) -> Self {
        state.last_notified = Some(now);
        Self {
            notify: true,
            reason,
            state: Some(state),
        }
    }

    fn hold(reason: Reason, state: Option<AlertState>) -> Self {
        Self {
            notify: false,
            reason,
            state,
        }
    }
}

pub fn should_notify(
    candidate: &AlertCandidate,
    previous: Option<&AlertState>,
    now: DateTime<Utc>,
    renotify_interval: TimeDelta,
) -> Verdict {
    let active = previous.filter(|state| state.active);

    if candidate.recovery {
        return match active {
            Some(state) => {
                let mut state = state.clone();
                state.active = false;
                state.sustained = false;
                state.last_seen = now;
                Verdict::send(Reason::Recovered, state, now)
            }
            None => Verdict::hold(Reason::NotActive, None),
        };
    }

    let Some(state) = active else {
        let state = AlertState {
            resource: candidate.resource.clone(),
            rule: candidate.rule,
            active: true,
            severity: candidate.severity,
            sustained: candidate.sustained,
            first_activated: now,
            last_notified: None,
            last_seen: now,
            occurrence_count: 1,
            tombstoned_at: None,
        };
        return Verdict::send(Reason::Activated, state, now);
    };

    let mut state = state.clone();
    let escalated = (candidate.severity, candidate.sustained) > state.level();
    state.severity = candidate.severity;
    state.sustained = candidate.sustained;
    state.last_seen = now;
    state.occurrence_count += 1;
    state.tombstoned_at = None;

    if escalated {
        return Verdict::send(Reason::Escalated, state, now);
    }

    match state.last_notified {
        Some(at) if now - at < renotify_interval => Verdict::hold(Reason::Duplicate, Some(state)),
        _ => Verdict::send(Reason::Reminder, state, now),
    }
}
