use axum::{extract::State, Json};

use crate::models::HealthResponse;
use crate::AppState;

pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: "spaces-gateway",
        version: env!("CARGO_PKG_VERSION"),
        running_conversions: state.pool.running_jobs(),
        max_concurrent_conversions: state.pool.max_concurrent(),
        conversion_queue_capacity: state.pool.queue_capacity(),
        conversion_capacity: state.pool.available_capacity(),
    })
}
