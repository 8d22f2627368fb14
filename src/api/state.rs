//! API shared state

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::engine::Monitor;
use crate::scheduler::SchedulerHandle;

/// Shared state passed to all API handlers
#[derive(Clone)]
pub struct ApiState {
    pub monitor: Arc<Monitor>,

    /// Manual passes go through the scheduler so they queue behind scheduled ones
    pub scheduler: Option<SchedulerHandle>,

    pub started_at: DateTime<Utc>,
}

impl ApiState {
    pub fn new(monitor: Arc<Monitor>, scheduler: Option<SchedulerHandle>) -> Self {
        Self {
            monitor,
            scheduler,
            started_at: Utc::now(),
        }
    }
}
