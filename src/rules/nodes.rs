use crate::event::{Attributes, NodeProblem, ObservedEvent};

use super::{AlertCandidate, Rule, Severity};

pub(super) fn evaluate(series: &[&ObservedEvent]) -> Option<AlertCandidate> {
    let current = *series.last()?;
    let Attributes::Node(node) = &current.attributes else {
        return None;
    };

    let tags = vec!["node".to_string(), node.name.clone()];
    let problems = node.problems();

    if problems.is_empty() {
        return Some(AlertCandidate::recovered(
            Rule::NodeHealth,
            &current.resource,
            format!("Node {} is Ready", node.name),
            tags,
        ));
    }

    let problem_names = problems
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ");
    let mut message = format!("Node {} reports: {problem_names}", node.name);
    for condition in node.conditions.iter().filter(|c| {
        (c.kind == "Ready" && c.status != "True") || (c.kind != "Ready" && c.status == "True")
    }) {
        if let Some(detail) = condition.message.as_ref().or(condition.reason.as_ref()) {
            message.push_str(&format!("\n{}: {detail}", condition.kind));
        }
    }

    Some(
        AlertCandidate::firing(
            Rule::NodeHealth,
            &current.resource,
            Severity::Critical,
            message,
            tags,
        )
        .sustained(problems.contains(&NodeProblem::NotReady)),
    )
}
