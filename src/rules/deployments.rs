//! Deployment availability
//!
//! A single degraded observation is normal during a rollout. Only a deployment
//! degraded on two consecutive observations alerts.

use crate::event::{Attributes, DeploymentAttributes, ObservedEvent};

use super::{AlertCandidate, Rule, Severity};

pub(super) fn evaluate(series: &[&ObservedEvent]) -> Option<AlertCandidate> {
    let current = *series.last()?;
    let Attributes::Deployment(deployment) = &current.attributes else {
        return None;
    };

    let tags = vec![
        "deployment".to_string(),
        format!("{}/{}", deployment.namespace, deployment.name),
        format!("ns:{}", deployment.namespace),
    ];

    if !deployment.is_degraded() {
        return Some(AlertCandidate::recovered(
            Rule::DeploymentAvailability,
            &current.resource,
            format!(
                "Deployment {}/{} has {}/{} replicas available",
                deployment.namespace,
                deployment.name,
                deployment.available_replicas,
                deployment.desired_replicas
            ),
            tags,
        ));
    }

    let previous = series
        .len()
        .checked_sub(2)
        .and_then(|i| series.get(i))
        .and_then(|event| match &event.attributes {
            Attributes::Deployment(previous) => Some(previous),
            _ => None,
        });
    if !previous.is_some_and(DeploymentAttributes::is_degraded) {
        return None;
    }

    let desired = u64::from(deployment.desired_replicas);
    let missing = desired.saturating_sub(u64::from(deployment.available_replicas));
    // at least half of the replicas gone
    let severity = if missing * 2 >= desired {
        Severity::Critical
    } else {
        Severity::Warning
    };

    Some(AlertCandidate::firing(
        Rule::DeploymentAvailability,
        &current.resource,
        severity,
        format!(
            "Deployment {}/{} has only {}/{} replicas available",
            deployment.namespace,
            deployment.name,
            deployment.available_replicas,
            deployment.desired_replicas
        ),
        tags,
    ))
}
