//! HTTP control surface
//!
//! ## Endpoints
//!
//! - `GET /health` - Liveness, no side effects
//! - `POST /check` - Run one evaluation pass and return its summary
//! - `POST /test` - Send a test notification
//! - `GET /stats` - Alert state snapshot and pass counters
//! - `POST /events/:kind` - Push one resource object or change envelope

pub mod error;
pub mod routes;
pub mod state;
pub mod types;

pub use error::{ApiError, ApiResult};
pub use state::ApiState;
pub use types::{CheckResponse, EventResponse, HealthResponse, StatsResponse, TestResponse};

use std::net::SocketAddr;

use axum::{
    Router,
    routing::{get, post},
};
use tracing::info;

pub fn router(state: ApiState) -> Router {
    use tower_http::trace::TraceLayer;

    Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/check", post(routes::check::run_check))
        .route("/test", post(routes::check::send_test))
        .route("/stats", get(routes::stats::get_stats))
        .route("/events/:kind", post(routes::events::push_event))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Spawn the API server
///
/// This starts an Axum HTTP server in a background task.
/// Returns the server's local address.
pub async fn spawn_api_server(bind_addr: SocketAddr, state: ApiState) -> anyhow::Result<SocketAddr> {
    info!("starting API server on {}", bind_addr);

    let app = router(state);

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    let addr = listener.local_addr()?;

    info!("API server listening on {}", addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("API server error: {}", e);
        }
    });

    Ok(addr)
}
