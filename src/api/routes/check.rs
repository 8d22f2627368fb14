//! Manual triggers

use axum::{Json, extract::State};

use crate::api::{
    error::{ApiError, ApiResult},
    state::ApiState,
    types::{CheckResponse, TestResponse},
};
use crate::engine::PassSummary;

/// POST /check
///
/// Runs one evaluation pass synchronously and returns its summary
pub async fn run_check(State(state): State<ApiState>) -> ApiResult<Json<CheckResponse>> {
    let summary = pass(&state).await?;

    let status = if summary.is_complete() {
        "success"
    } else {
        "partial"
    };

    Ok(Json(CheckResponse {
        status: status.to_string(),
        totals: summary.total(),
        summary,
    }))
}

/// POST /test
///
/// Runs one pass like `/check`, then sends a low-priority test notification
/// through the regular dispatcher
pub async fn send_test(State(state): State<ApiState>) -> ApiResult<Json<TestResponse>> {
    let summary = pass(&state).await?;
    let result = state.monitor.send_test().await;

    let status = match (result.delivered, summary.is_complete()) {
        (false, _) => "error",
        (true, false) => "partial",
        (true, true) => "success",
    };

    Ok(Json(TestResponse {
        status: status.to_string(),
        delivered: result.delivered,
        retries: result.retries,
        error: result.error.map(|e| e.to_string()),
        totals: summary.total(),
        summary,
    }))
}

/// Manual passes queue behind scheduled ones when a scheduler runs
///
/// Either way the pass runs in its own task, so a client that hangs up does
/// not cancel notifications in flight.
async fn pass(state: &ApiState) -> ApiResult<PassSummary> {
    Ok(match &state.scheduler {
        Some(scheduler) => scheduler.run_now().await?,
        None => {
            let monitor = state.monitor.clone();
            tokio::spawn(async move { monitor.run_pass().await })
                .await
                .map_err(|e| ApiError::Internal(format!("pass task failed: {e}")))?
        }
    })
}
