//! Alert state introspection

use axum::{Json, extract::State};

use crate::api::{error::ApiResult, state::ApiState, types::StatsResponse};

/// GET /stats
///
/// Returns the alert state table (active first) and the engine counters
pub async fn get_stats(State(state): State<ApiState>) -> ApiResult<Json<StatsResponse>> {
    let store = state.monitor.store();

    let mut alerts = store.snapshot().await?;
    alerts.sort_by(|a, b| {
        b.active
            .cmp(&a.active)
            .then_with(|| a.resource.cmp(&b.resource))
            .then_with(|| a.rule.cmp(&b.rule))
    });

    Ok(Json(StatsResponse {
        cluster: state.monitor.config().cluster_name.clone(),
        backend: store.backend_name().to_string(),
        started_at: state.started_at,
        tracked_resources: store.tracked().await?,
        active_alerts: alerts.iter().filter(|a| a.active).count(),
        alerts,
        engine: state.monitor.stats(),
    }))
}
