//! API response types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dedup::AlertState;
use crate::engine::{DomainSummary, EngineStats, PassSummary};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub cluster: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckResponse {
    pub status: String,
    #[serde(flatten)]
    pub summary: PassSummary,
    pub totals: DomainSummary,
}

#[derive(Debug, Clone, Serialize)]
pub struct TestResponse {
    pub status: String,
    pub delivered: bool,
    pub retries: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub summary: PassSummary,
    pub totals: DomainSummary,
}

#[derive(Debug, Clone, Serialize)]
pub struct EventResponse {
    pub status: String,
    #[serde(flatten)]
    pub outcome: DomainSummary,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    pub cluster: String,
    pub backend: String,
    pub started_at: DateTime<Utc>,
    pub tracked_resources: usize,
    pub active_alerts: usize,
    pub alerts: Vec<AlertState>,
    pub engine: EngineStats,
}
