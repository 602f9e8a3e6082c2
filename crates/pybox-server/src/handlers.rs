//! Route handlers.

use crate::error::{Result, ServerError};
use crate::AppState;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use pybox_core::ExecutionRequest;
use pybox_types::{ExecuteRequest, ExecuteResponse, HealthResponse, HealthStatus};
use serde_json::json;

/// Handler for the POST /execute endpoint.
pub async fn execute_handler(
    State(state): State<AppState>,
    payload: std::result::Result<Json<ExecuteRequest>, JsonRejection>,
) -> Result<Json<ExecuteResponse>> {
    let Json(request) = payload.map_err(|e| ServerError::invalid_request(e.body_text()))?;
    let request = ExecutionRequest::validate(&request, state.orchestrator.request_policy())?;

    let report = state.orchestrator.execute(&request).await?;
    Ok(Json(report.into()))
}

/// Handler for the GET /health endpoint. Unhealthy answers 503.
pub async fn health_handler(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let docker_connected = state.runtime.is_available().await;
    let executor_image_ready = if docker_connected {
        match state.runtime.image_exists(&state.image).await {
            Ok(ready) => ready,
            Err(e) => {
                log::warn!("Could not inspect executor image '{}': {}", state.image, e);
                false
            }
        }
    } else {
        false
    };

    let status = HealthStatus::from_probe(docker_connected, executor_image_ready);
    let code = match status {
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
    };
    if status != HealthStatus::Healthy {
        log::debug!(
            "Health probe: {:?} (docker_connected={}, executor_image_ready={})",
            status,
            docker_connected,
            executor_image_ready
        );
    }

    (
        code,
        Json(HealthResponse {
            status,
            docker_connected,
            executor_image_ready,
            image: state.image.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: chrono::Utc::now(),
        }),
    )
}

pub async fn root_handler() -> Json<serde_json::Value> {
    Json(json!({
        "message": "pybox sandboxed code execution service",
        "status": "running"
    }))
}
