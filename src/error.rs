use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Application error types
///
/// Every variant is cheap to clone so a single failed schema refresh can be
/// handed to all requests waiting on it.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AppError {
    /// Bad inbound request, rejected before any pipeline stage runs
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Authentication error
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The completion service could not commit to a label from the known set
    #[error("Could not resolve a label: {0}")]
    AmbiguousOrUnresolvable(String),

    /// The validator rejected the synthesized query on every attempt
    #[error("Query synthesis failed: {0}")]
    QuerySynthesisFailed(String),

    /// Completion output did not decode into the requested result shape
    #[error("Completion output violated schema '{schema}': {detail}")]
    SchemaViolation { schema: String, detail: String },

    /// Store or completion service unreachable after retry
    #[error("{backend} unavailable: {detail}")]
    BackendUnavailable { backend: String, detail: String },

    /// The store rejected a structurally valid query
    #[error("Log store rejected query ({status}): {body}")]
    BackendQueryError { status: u16, body: String },

    /// Upstream returned a non-success status that has not been classified yet
    #[error("Upstream error from {backend} ({status}): {message}")]
    Upstream {
        backend: String,
        status: u16,
        message: String,
    },

    /// Connection, DNS or timeout failure talking to a collaborator
    #[error("Transport error talking to {backend}: {detail}")]
    Transport {
        backend: String,
        detail: String,
        timed_out: bool,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl AppError {
    /// Stable machine-readable kind surfaced to API callers
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::Unauthorized(_) => "unauthorized",
            Self::AmbiguousOrUnresolvable(_) => "ambiguous_or_unresolvable",
            Self::QuerySynthesisFailed(_) => "query_synthesis_failed",
            Self::SchemaViolation { .. } => "schema_violation",
            Self::BackendUnavailable { .. } => "backend_unavailable",
            Self::BackendQueryError { .. } => "backend_query_error",
            Self::Upstream { .. } => "upstream_error",
            Self::Transport { .. } => "transport_error",
            Self::ConfigError(_) => "config_error",
            Self::InternalError(_) => "internal_error",
        }
    }

    /// Raw backend detail, preserved for diagnosis
    pub fn detail(&self) -> Option<&str> {
        match self {
            Self::SchemaViolation { detail, .. }
            | Self::BackendUnavailable { detail, .. }
            | Self::Transport { detail, .. } => Some(detail),
            Self::BackendQueryError { body, .. } => Some(body),
            Self::Upstream { message, .. } => Some(message),
            _ => None,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::AmbiguousOrUnresolvable(_) | Self::QuerySynthesisFailed(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            Self::SchemaViolation { .. }
            | Self::BackendQueryError { .. }
            | Self::Upstream { .. }
            | Self::Transport { .. } => StatusCode::BAD_GATEWAY,
            Self::BackendUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::ConfigError(_) | Self::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Build a transport error from a reqwest failure
    pub fn transport(backend: &str, err: reqwest::Error) -> Self {
        Self::Transport {
            backend: backend.to_string(),
            timed_out: err.is_timeout(),
            detail: err.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let mut error = json!({
            "kind": self.kind(),
            "message": self.to_string(),
        });
        if let Some(detail) = self.detail() {
            error["detail"] = json!(detail);
        }
        if let Self::BackendQueryError { status, .. } = &self {
            error["backend_status"] = json!(status);
        }

        (status, Json(json!({ "error": error }))).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::InternalError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = AppError::InvalidRequest("Query is required".to_string());
        assert_eq!(error.to_string(), "Invalid request: Query is required");
    }

    #[test]
    fn test_error_kind() {
        assert_eq!(
            AppError::AmbiguousOrUnresolvable("x".to_string()).kind(),
            "ambiguous_or_unresolvable"
        );
        assert_eq!(
            AppError::BackendQueryError {
                status: 400,
                body: "parse error".to_string()
            }
            .kind(),
            "backend_query_error"
        );
    }

    #[test]
    fn test_backend_detail_is_preserved() {
        let error = AppError::BackendQueryError {
            status: 400,
            body: "parse error at line 1, col 5".to_string(),
        };
        assert_eq!(error.detail(), Some("parse error at line 1, col 5"));
        assert_eq!(AppError::InvalidRequest("x".to_string()).detail(), None);
    }

    #[tokio::test]
    async fn test_error_response_status() {
        let response = AppError::InvalidRequest("empty".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = AppError::BackendUnavailable {
            backend: "loki".to_string(),
            detail: "503".to_string(),
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_error_response_body_carries_kind_and_detail() {
        let response = AppError::BackendQueryError {
            status: 400,
            body: "unexpected IDENTIFIER".to_string(),
        }
        .into_response();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"]["kind"], "backend_query_error");
        assert_eq!(body["error"]["detail"], "unexpected IDENTIFIER");
        assert_eq!(body["error"]["backend_status"], 400);
    }
}
