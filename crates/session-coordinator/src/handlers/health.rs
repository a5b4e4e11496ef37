//! Health check handlers.
//!
//! - `/health`: Liveness probe - returns OK if the process is running
//! - `/ready`: Readiness probe - checks storage and that the meeting registry
//!   still accepts work

use crate::models::ReadinessResponse;
use crate::routes::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use std::sync::Arc;

/// Liveness probe handler. Checks no dependencies.
pub async fn health_check() -> &'static str {
    "OK"
}

/// Readiness probe handler.
///
/// Returns 200 when storage answers and the registry accepts new meetings,
/// 503 otherwise. Failure detail is logged, not returned.
#[tracing::instrument(skip_all, name = "sc.health.readiness")]
pub async fn readiness_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let storage_ok = match state.store.ping().await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(
                target: "sc.health",
                error = %e,
                "Readiness check failed: storage error"
            );
            false
        }
    };

    let registry = match state.registry.status().await {
        Ok(status) => Some(status),
        Err(e) => {
            tracing::warn!(
                target: "sc.health",
                error = %e,
                "Readiness check failed: registry unavailable"
            );
            None
        }
    };

    let accepting = registry.as_ref().is_some_and(|s| s.accepting_new);
    let ready = storage_ok && accepting;

    let response = ReadinessResponse {
        status: if ready { "ready" } else { "not_ready" }.to_string(),
        storage: if storage_ok { "healthy" } else { "unhealthy" }.to_string(),
        active_meetings: registry.map_or(0, |s| s.active_meetings),
    };

    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status, Json(response))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_health_check() {
        assert_eq!(health_check().await, "OK");
    }
}
