use crate::handlers::AppState;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde_json::json;

/// Health check endpoint
/// Returns 200 OK if the service is running
pub async fn health_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "logql-gateway",
            "version": env!("CARGO_PKG_VERSION"),
        })),
    )
}

/// Readiness check endpoint
/// Ready once a schema snapshot can be obtained from the log store
pub async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.orchestrator.metadata().get_snapshot().await {
        Ok(snapshot) => (
            StatusCode::OK,
            Json(json!({
                "status": "ready",
                "service": "logql-gateway",
                "schema_generation": snapshot.generation(),
                "labels": snapshot.labels().len(),
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "not_ready",
                "service": "logql-gateway",
                "error": e.to_string(),
            })),
        ),
    }
}
