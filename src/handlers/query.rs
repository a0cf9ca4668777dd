use crate::{
    error::AppError,
    handlers::AppState,
    pipeline::{PipelineOutput, QueryRequest},
};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::{HeaderName, HeaderValue},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};

/// `model` or `fallback`
pub const TRANSLATION_SOURCE_HEADER: &str = "x-translation-source";
/// The LogQL that was (or would be) executed
pub const LOGQL_QUERY_HEADER: &str = "x-logql-query";
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Handle POST /query
///
/// Returns the store's response body unmodified, or the translation alone
/// when `dry_run` is set.
pub async fn handle_query(
    State(state): State<AppState>,
    payload: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(request) = payload.map_err(|e| AppError::InvalidRequest(e.body_text()))?;

    tracing::info!(
        model = request.model.as_deref().unwrap_or("default"),
        dry_run = request.dry_run,
        "Handling query request"
    );

    if request.dry_run {
        let output = state.orchestrator.translate(&request).await?;
        let body = json!({
            "query": output.query.expr(),
            "label": output.label,
            "source": output.query.source(),
        });
        return Ok(with_translation_headers(Json(body).into_response(), &output));
    }

    let output = state.orchestrator.run(&request).await?;
    let body = output.result.clone().unwrap_or(Value::Null);
    Ok(with_translation_headers(Json(body).into_response(), &output))
}

fn with_translation_headers(mut response: Response, output: &PipelineOutput) -> Response {
    let headers = response.headers_mut();
    headers.insert(
        HeaderName::from_static(TRANSLATION_SOURCE_HEADER),
        HeaderValue::from_static(output.query.source().as_str()),
    );
    if let Ok(value) = HeaderValue::from_str(&output.request_id.to_string()) {
        headers.insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
    }
    // Queries with non-ASCII text cannot be sent as a header value
    match HeaderValue::from_str(output.query.expr()) {
        Ok(value) => {
            headers.insert(HeaderName::from_static(LOGQL_QUERY_HEADER), value);
        }
        Err(_) => tracing::debug!("Query is not a valid header value, omitting {}", LOGQL_QUERY_HEADER),
    }
    response
}
