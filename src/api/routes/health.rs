//! Health check endpoint

use axum::{Json, extract::State};

use crate::api::{state::ApiState, types::HealthResponse};

/// GET /health
///
/// Liveness only; does not touch the source or the stores
pub async fn health_check(State(state): State<ApiState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        cluster: state.monitor.config().cluster_name.clone(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}
