//! Storage usage (PVCs and node filesystems)
//!
//! Both domains share the same three thresholds: warn, critical and a lower
//! recovery ratio. Between the recovery ratio and the warn ratio nothing is
//! emitted, so a volume hovering around the warn threshold does not flap.

use crate::config::Config;
use crate::event::{Attributes, ObservedEvent, ResourceKind};

use super::{AlertCandidate, Rule, Severity};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageLevel {
    Clear,
    /// Between the recovery and the warn ratio
    Band,
    Warning,
    Critical,
}

impl UsageLevel {
    pub fn evaluate(ratio: f64, warn: f64, critical: f64, recovery: f64) -> UsageLevel {
        if ratio >= critical {
            return UsageLevel::Critical;
        }
        if ratio >= warn {
            return UsageLevel::Warning;
        }
        if ratio < recovery {
            return UsageLevel::Clear;
        }
        UsageLevel::Band
    }
}

pub(super) fn evaluate(rule: Rule, config: &Config, event: &ObservedEvent) -> Option<AlertCandidate> {
    let Attributes::Volume(volume) = &event.attributes else {
        return None;
    };
    let ratio = volume.usage_ratio()?;

    let level = UsageLevel::evaluate(
        ratio,
        config.warn_ratio(),
        config.critical_ratio(),
        config.recovery_ratio(),
    );

    let (label, tags) = match event.kind() {
        ResourceKind::DiskVolume => (
            format!("Node {} filesystem", event.key()),
            vec!["disk".to_string(), format!("node:{}", event.key())],
        ),
        _ => (
            format!("PVC {}", event.key()),
            vec!["pvc".to_string(), event.key().to_string()],
        ),
    };

    let mut message = format!(
        "{label} at {:.1}% ({} of {})",
        ratio * 100.0,
        format_bytes(volume.used_bytes),
        format_bytes(volume.capacity_bytes)
    );
    if let Some(reporter) = &volume.reported_by {
        message.push_str(&format!("\nReported by: {reporter}"));
    }

    match level {
        UsageLevel::Band => None,
        UsageLevel::Clear => Some(AlertCandidate::recovered(
            rule,
            &event.resource,
            message,
            tags,
        )),
        UsageLevel::Warning => Some(AlertCandidate::firing(
            rule,
            &event.resource,
            Severity::Warning,
            message,
            tags,
        )),
        UsageLevel::Critical => Some(AlertCandidate::firing(
            rule,
            &event.resource,
            Severity::Critical,
            message,
            tags,
        )),
    }
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
