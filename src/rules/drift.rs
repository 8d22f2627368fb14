//! GitOps drift: applications out of sync, and deployments in managed
//! namespaces that nothing in Git owns.

use crate::config::Config;
use crate::event::{Attributes, ObservedEvent};

use super::{AlertCandidate, Rule, Severity};

pub(super) fn evaluate_sync(event: &ObservedEvent) -> Option<AlertCandidate> {
    let Attributes::Sync(sync) = &event.attributes else {
        return None;
    };

    let tags = vec!["argocd".to_string(), sync.application.clone()];
    let message = format!(
        "Application {} is {} (health: {})",
        sync.application, sync.sync_status, sync.health_status
    );

    if sync.is_drifted() {
        return Some(AlertCandidate::firing(
            Rule::SyncDrift,
            &event.resource,
            Severity::Warning,
            message,
            tags,
        ));
    }
    if sync.is_converged() {
        return Some(AlertCandidate::recovered(
            Rule::SyncDrift,
            &event.resource,
            message,
            tags,
        ));
    }
    // Unknown, Progressing, ...
    None
}

pub(super) fn evaluate_ownership(config: &Config, event: &ObservedEvent) -> Option<AlertCandidate> {
    let Attributes::Deployment(deployment) = &event.attributes else {
        return None;
    };
    if !config
        .drift
        .managed_namespaces
        .iter()
        .any(|ns| ns == &deployment.namespace)
    {
        return None;
    }

    let label = &config.drift.ownership_label;
    let tags = vec![
        "drift".to_string(),
        format!("{}/{}", deployment.namespace, deployment.name),
    ];

    if deployment.labels.contains_key(label) {
        return Some(AlertCandidate::recovered(
            Rule::OwnershipDrift,
            &event.resource,
            format!(
                "Deployment {}/{} is managed by {}",
                deployment.namespace, deployment.name, deployment.labels[label]
            ),
            tags,
        ));
    }

    Some(AlertCandidate::firing(
        Rule::OwnershipDrift,
        &event.resource,
        Severity::Warning,
        format!(
            "Deployment {}/{} is missing the {label} label (created outside GitOps?)",
            deployment.namespace, deployment.name
        ),
        tags,
    ))
}
