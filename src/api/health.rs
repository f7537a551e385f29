use axum::{extract::State, http::StatusCode, Json};
use tracing::{error, info};

use crate::api::AppState;
use crate::health::{HealthState, HealthStatus};

pub async fn root() -> &'static str {
    info!("📍 Root endpoint accessed");
    "Makazi payments gateway"
}

/// 503 only when the store is down; missing credentials report `Degraded`.
pub async fn health(
    State(state): State<AppState>,
) -> Result<Json<HealthStatus>, (StatusCode, Json<HealthStatus>)> {
    info!("🏥 Health check requested");
    let health_status = state.health.check_health().await;

    if health_status.status == HealthState::Unhealthy {
        error!("❌ Health check failed - service unhealthy");
        Err((StatusCode::SERVICE_UNAVAILABLE, Json(health_status)))
    } else {
        Ok(Json(health_status))
    }
}

/// Ready once the store answers and the provider can be called.
pub async fn readiness(
    State(state): State<AppState>,
) -> Result<Json<HealthStatus>, (StatusCode, Json<HealthStatus>)> {
    let health_status = state.health.check_health().await;
    if health_status.is_healthy() {
        info!("✅ Readiness check passed");
        Ok(Json(health_status))
    } else {
        error!(status = ?health_status.status, "⚠️  Readiness check failed");
        Err((StatusCode::SERVICE_UNAVAILABLE, Json(health_status)))
    }
}

pub async fn liveness() -> &'static str {
    "OK"
}
