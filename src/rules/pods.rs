//! Pod restart tracking
//!
//! Back-off states are checked first and win over restart counting. Restart
//! counting sums the positive deltas of the pod's total restart count across
//! the window, so a recreated pod (counter reset) does not produce negative
//! restarts.

use crate::config::Config;
use crate::event::{Attributes, ObservedEvent, PodAttributes};

use super::{AlertCandidate, Rule, Severity};

pub(super) fn evaluate(config: &Config, series: &[&ObservedEvent]) -> Option<AlertCandidate> {
    let current = *series.last()?;
    let Attributes::Pod(pod) = &current.attributes else {
        return None;
    };

    let pods: Vec<(&ObservedEvent, &PodAttributes)> = series
        .iter()
        .filter_map(|event| match &event.attributes {
            Attributes::Pod(pod) => Some((*event, pod)),
            _ => None,
        })
        .collect();

    let tags = vec![
        "pod".to_string(),
        format!("{}/{}", pod.namespace, pod.name),
        format!("ns:{}", pod.namespace),
    ];

    if let Some((container, reason)) = pod.backoff_reason() {
        let previously_backing_off = pods
            .len()
            .checked_sub(2)
            .and_then(|i| pods.get(i))
            .is_some_and(|(_, previous)| previous.backoff_reason().is_some());

        let message = format!(
            "Pod {}/{} container {container} is in {reason}\nPhase: {}\nTotal restarts: {}",
            pod.namespace,
            pod.name,
            pod.phase,
            pod.total_restarts()
        );
        return Some(
            AlertCandidate::firing(
                Rule::PodRestarts,
                &current.resource,
                Severity::Critical,
                message,
                tags,
            )
            .sustained(previously_backing_off),
        );
    }

    let restarts = restart_delta(&pods);
    if restarts < config.restart_threshold as u64 {
        return Some(AlertCandidate::recovered(
            Rule::PodRestarts,
            &current.resource,
            format!(
                "Pod {}/{} restarted {restarts} time(s) in the last {} minutes",
                pod.namespace, pod.name, config.time_window_minutes
            ),
            tags,
        ));
    }

    let first = pods.first().map(|(event, _)| event.timestamp)?;
    let span_minutes = ((current.timestamp - first).num_seconds() as f64 / 60.0).max(1.0);
    let rate = restarts as f64 / span_minutes;

    let severity = if rate > config.restart_rate_critical {
        Severity::Critical
    } else {
        Severity::Warning
    };

    let mut message = format!(
        "Pod {}/{} restarted {restarts} time(s) in the last {} minutes\nRate: {rate:.2}/min\nTotal restarts: {}",
        pod.namespace,
        pod.name,
        config.time_window_minutes,
        pod.total_restarts()
    );
    for container in &pod.containers {
        if let Some(reason) = &container.last_termination_reason {
            message.push_str(&format!(
                "\nLast termination of {}: {reason} (exit code {})",
                container.name,
                container
                    .last_exit_code
                    .map(|code| code.to_string())
                    .unwrap_or_else(|| "N/A".to_string())
            ));
        }
    }

    Some(AlertCandidate::firing(
        Rule::PodRestarts,
        &current.resource,
        severity,
        message,
        tags,
    ))
}

/// Sum of positive increments of the total restart count between consecutive observations
fn restart_delta(pods: &[(&ObservedEvent, &PodAttributes)]) -> u64 {
    pods.windows(2)
        .map(|pair| {
            pair[1]
                .1
                .total_restarts()
                .saturating_sub(pair[0].1.total_restarts())
        })
        .fold(0, u64::saturating_add)
}
