use axum::{extract::State, http::StatusCode, Json};
use shared_types::{HealthResponse, HealthStatus};

use crate::AppState;

/// Liveness plus a store ping. Reports 503 when the store is unreachable.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let ping = tokio::time::timeout(state.store_timeout, state.store.ping()).await;

    let db_status = match ping {
        Ok(Ok(())) => HealthStatus::Up,
        Ok(Err(e)) => {
            tracing::warn!("Health check store ping failed: {}", e);
            HealthStatus::Down
        }
        Err(_) => {
            tracing::warn!("Health check store ping timed out");
            HealthStatus::Down
        }
    };

    let status = match db_status {
        HealthStatus::Up => StatusCode::OK,
        HealthStatus::Down => StatusCode::SERVICE_UNAVAILABLE,
    };

    (
        status,
        Json(HealthResponse {
            status: db_status,
            db_status,
        }),
    )
}
