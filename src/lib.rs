//! kube-sentinel: event monitoring and alerting for a Kubernetes cluster
//!
//! Pod restarts, node health, deployment availability, PVC and node disk
//! usage, and GitOps drift are evaluated against a bounded history per
//! resource. Findings are deduplicated and published to an ntfy topic.

#[cfg(feature = "api")]
pub mod api;
pub mod config;
pub mod dedup;
pub mod engine;
pub mod error;
pub mod event;
pub mod normalize;
pub mod notify;
pub mod rules;
pub mod scheduler;
pub mod source;
pub mod storage;
pub mod util;

pub use error::{MonitorError, MonitorResult};
