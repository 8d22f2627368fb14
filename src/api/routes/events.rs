//! Push delivery of resource events

use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
};
use serde_json::Value;

use crate::api::{
    error::{ApiError, ApiResult},
    state::ApiState,
    types::EventResponse,
};
use crate::event::ResourceKind;
use crate::normalize::RawResource;

/// POST /events/:kind
///
/// `kind` accepts the route names `pods`, `nodes`, `deployments`, `pvcs`,
/// `volumes` and `applications`. The body is the resource object itself or
/// a `{"type", "data"}` change envelope.
pub async fn push_event(
    State(state): State<ApiState>,
    Path(kind): Path<String>,
    body: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Json<EventResponse>> {
    let kind: ResourceKind = kind.parse().map_err(ApiError::UnknownKind)?;
    let Json(body) = body?;

    let outcome = state
        .monitor
        .ingest(RawResource::from_push(kind, chrono::Utc::now(), body))
        .await?;

    Ok(Json(EventResponse {
        status: "processed".to_string(),
        outcome,
    }))
}
