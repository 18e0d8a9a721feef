// HTTP route handlers for the Runbox API

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use runbox_common::types::{supported_languages, ExecutionRequest, Language};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::metrics;
use crate::AppState;

fn failure(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(json!({
            "success": false,
            "message": message.into(),
        })),
    )
        .into_response()
}

/// POST /api/code/execute - Run code and wait for its result
pub async fn execute_code(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ExecutionRequest>, JsonRejection>,
) -> Response {
    let Some(service) = state.service.as_ref() else {
        return failure(StatusCode::SERVICE_UNAVAILABLE, "Code execution is disabled");
    };
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            warn!(error = %rejection, "Rejected malformed execute request");
            return failure(StatusCode::BAD_REQUEST, "Code and language are required");
        }
    };

    let request_id = Uuid::new_v4();
    let started = Instant::now();
    match service.coordinator().run(&request).await {
        Ok(result) => {
            let outcome = metrics::outcome_of(&result);
            metrics::record(&request.language, outcome, started.elapsed());
            info!(
                request_id = %request_id,
                language = %request.language,
                outcome,
                execution_time = %result.execution_time,
                "Execution finished"
            );
            (
                StatusCode::OK,
                Json(json!({
                    "success": true,
                    "data": result,
                })),
            )
                .into_response()
        }
        Err(e) if e.is_validation() => {
            // unvalidated language strings would blow up label cardinality
            metrics::record("invalid", "rejected", started.elapsed());
            info!(request_id = %request_id, error = %e, "Execute request rejected");
            failure(StatusCode::BAD_REQUEST, e.to_string())
        }
        Err(e) => {
            metrics::record(&request.language, "unavailable", started.elapsed());
            error!(request_id = %request_id, language = %request.language, error = %e, "Code execution failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "success": false,
                    "message": "Code execution failed",
                    "error": e.to_string(),
                })),
            )
                .into_response()
        }
    }
}

/// GET /api/code/languages - Static language metadata
pub async fn get_languages() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "success": true,
            "data": supported_languages(),
        })),
    )
}

/// GET /status - Health check with per-worker liveness
pub async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let uptime_secs = (chrono::Utc::now() - state.started_at).num_seconds();
    let Some(service) = state.service.as_ref() else {
        return Json(json!({
            "status": "ok",
            "executors_enabled": false,
            "started_at": state.started_at,
            "uptime_secs": uptime_secs,
        }));
    };

    let mut workers = serde_json::Map::new();
    if let Some(pool) = service.pool() {
        for lang in Language::ALL {
            workers.insert(lang.id().to_string(), json!(pool.is_container_running(lang).await));
        }
    }
    Json(json!({
        "status": "ok",
        "executors_enabled": true,
        "strategy": service.coordinator().strategy(),
        "workers": workers,
        "started_at": state.started_at,
        "uptime_secs": uptime_secs,
    }))
}

/// GET /metrics - Prometheus text exposition
pub async fn metrics() -> Response {
    match metrics::render() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}
