use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use std::sync::Arc;

use crate::app::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub services: ServiceHealth,
}

#[derive(Serialize)]
pub struct ServiceHealth {
    pub database: String,
    pub notification_queue: String,
    pub notification_delivery: &'static str,
}

/// Health check endpoint - public
pub async fn health_check(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<HealthResponse>) {
    let (db_result, queue_result) = tokio::join!(
        state.store.health_check(),
        state.delivery.health_check(),
    );

    let db_status = if db_result.is_ok() { "ok" } else { "error" };
    let queue_status = if queue_result.is_ok() { "ok" } else { "error" };

    // The queue only carries out-of-band delivery, so losing it degrades the service
    let status = match (db_result.is_ok(), queue_result.is_ok()) {
        (true, true) => "healthy",
        (true, false) => "degraded",
        _ => "unhealthy",
    };

    let status_code = if status == "unhealthy" {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    (
        status_code,
        Json(HealthResponse {
            status: status.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            services: ServiceHealth {
                database: db_status.to_string(),
                notification_queue: queue_status.to_string(),
                notification_delivery: state.delivery.name(),
            },
        }),
    )
}
