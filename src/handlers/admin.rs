use crate::{error::AppError, handlers::AppState};
use axum::{extract::State, Json};
use serde_json::{json, Value};

/// Handle POST /admin/schema/refresh
///
/// Expires the current snapshot and waits for the refresh. When the store is
/// down the last good snapshot may be returned, which shows up as a
/// non-zero `age_seconds`.
pub async fn refresh_schema(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let metadata = state.orchestrator.metadata();
    metadata.invalidate();
    let snapshot = metadata.get_snapshot().await?;

    tracing::info!(
        generation = snapshot.generation(),
        labels = snapshot.labels().len(),
        "Schema refresh requested via admin API"
    );

    Ok(Json(json!({
        "generation": snapshot.generation(),
        "labels": snapshot.labels().len(),
        "streams": snapshot.streams().len(),
        "age_seconds": snapshot.age().as_secs(),
    })))
}
