//! Severity to delivery priority and tags
//!
//! | candidate              | priority  | tags                         | title prefix |
//! |------------------------|-----------|------------------------------|--------------|
//! | recovery               | `low`     | `white_check_mark`           | `RESOLVED`   |
//! | info                   | `low`     | `information_source`         | `INFO`       |
//! | warning                | `default` | `warning`                    | `WARNING`    |
//! | critical               | `high`    | `rotating_light`             | `CRITICAL`   |
//! | critical, sustained    | `max`     | `rotating_light`, `skull`    | `CRITICAL`   |

use std::fmt;

use serde::Serialize;

use crate::rules::{AlertCandidate, Severity};
use crate::util::ascii_only;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Default,
    High,
    Max,
}

impl Priority {
    /// Value of the ntfy `Priority` header
    pub fn as_header(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Default => "default",
            Priority::High => "high",
            Priority::Max => "max",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_header())
    }
}

struct Style {
    priority: Priority,
    tags: &'static [&'static str],
    label: &'static str,
}

const RECOVERED: Style = Style {
    priority: Priority::Low,
    tags: &["white_check_mark"],
    label: "RESOLVED",
};

const INFO: Style = Style {
    priority: Priority::Low,
    tags: &["information_source"],
    label: "INFO",
};

const WARNING: Style = Style {
    priority: Priority::Default,
    tags: &["warning"],
    label: "WARNING",
};

const CRITICAL: Style = Style {
    priority: Priority::High,
    tags: &["rotating_light"],
    label: "CRITICAL",
};

const CRITICAL_SUSTAINED: Style = Style {
    priority: Priority::Max,
    tags: &["rotating_light", "skull"],
    label: "CRITICAL",
};

fn style(candidate: &AlertCandidate) -> &'static Style {
    if candidate.recovery {
        return &RECOVERED;
    }
    match (candidate.severity, candidate.sustained) {
        (Severity::Info, _) => &INFO,
        (Severity::Warning, _) => &WARNING,
        (Severity::Critical, false) => &CRITICAL,
        (Severity::Critical, true) => &CRITICAL_SUSTAINED,
    }
}

/// One message ready for the transport
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub topic: String,
    /// ASCII only; it travels in an HTTP header
    pub title: String,
    pub message: String,
    pub priority: Priority,
    pub tags: Vec<String>,
}

impl Notification {
    pub fn new(
        topic: impl Into<String>,
        title: &str,
        message: impl Into<String>,
        priority: Priority,
        tags: Vec<String>,
    ) -> Self {
        Self {
            topic: topic.into(),
            title: ascii_only(title),
            message: message.into(),
            priority,
            tags,
        }
    }

    pub fn from_candidate(candidate: &AlertCandidate, cluster: &str, topic: &str) -> Self {
        let style = style(candidate);
        let tags = style
            .tags
            .iter()
            .map(|tag| tag.to_string())
            .chain(candidate.tags.iter().cloned())
            .collect();
        Self::new(
            topic,
            &format!("{}: {} - {cluster}", style.label, candidate.rule.summary()),
            candidate.message.clone(),
            style.priority,
            tags,
        )
    }
}
