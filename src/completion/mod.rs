//! Completion service collaborator
//!
//! A completion call asks an external model for a value conforming to a
//! fixed result shape. Output is decoded and checked at this boundary; a
//! decode failure is reported as [`AppError::SchemaViolation`].

pub mod models;
pub mod openai;

use crate::{
    error::AppError,
    retry::{with_single_retry, RetryPolicy},
};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;

pub use openai::OpenAiCompletionClient;

/// Backend name used in logs, metrics and error details
pub const BACKEND_NAME: &str = "completion";

/// Target shape of a completion: a flat JSON object of required string fields
#[derive(Debug, Clone, PartialEq)]
pub struct ResultSchema {
    pub name: String,
    pub schema: Value,
    pub required: Vec<String>,
}

impl ResultSchema {
    /// Object with a single required string field, optionally restricted to `allowed`
    pub fn single_string_field(name: &str, field: &str, allowed: Option<&[String]>) -> Self {
        let mut property = serde_json::json!({ "type": "string" });
        if let Some(values) = allowed {
            property["enum"] = serde_json::json!(values);
        }

        Self {
            name: name.to_string(),
            schema: serde_json::json!({
                "type": "object",
                "properties": { field: property },
                "required": [field],
                "additionalProperties": false,
            }),
            required: vec![field.to_string()],
        }
    }

    /// Decode raw completion text into `T`, checking required fields first
    pub fn decode<T: DeserializeOwned>(&self, raw: &str) -> Result<T, AppError> {
        let value: Value = serde_json::from_str(strip_code_fence(raw)).map_err(|e| {
            self.violation(format!("output is not JSON ({}): {}", e, truncate(raw, 200)))
        })?;

        let object = value
            .as_object()
            .ok_or_else(|| self.violation(format!("expected a JSON object, got {}", value)))?;

        for field in &self.required {
            match object.get(field) {
                Some(Value::String(s)) if !s.trim().is_empty() => {}
                Some(other) => {
                    return Err(self.violation(format!(
                        "field '{}' must be a non-empty string, got {}",
                        field, other
                    )))
                }
                None => return Err(self.violation(format!("missing field '{}'", field))),
            }
        }

        serde_json::from_value(value).map_err(|e| self.violation(e.to_string()))
    }

    fn violation(&self, detail: String) -> AppError {
        AppError::SchemaViolation {
            schema: self.name.clone(),
            detail,
        }
    }
}

/// One schema-constrained completion call
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub system: String,
    pub user: String,
    pub schema: ResultSchema,
    pub temperature: f32,
}

/// Generate a value conforming to a result shape given a prompt.
///
/// Implementations make one attempt and return the raw message text; shape
/// checking happens in [`generate`].
#[async_trait]
pub trait CompletionService: Send + Sync + 'static {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, AppError>;

    /// Upper bound for one call against `model`
    fn call_timeout(&self, _model: &str) -> Duration {
        Duration::from_secs(60)
    }
}

/// Run a completion with one transport retry and decode the result.
///
/// Client errors left after the retry (bad credentials, unknown model on the
/// backend side) mean the service cannot be used, so they are reported as
/// [`AppError::BackendUnavailable`].
pub async fn generate<T: DeserializeOwned>(
    service: &dyn CompletionService,
    policy: &RetryPolicy,
    request: &CompletionRequest,
) -> Result<T, AppError> {
    let raw = with_single_retry(
        policy,
        BACKEND_NAME,
        service.call_timeout(&request.model),
        move || service.complete(request),
    )
    .await
    .map_err(|e| match e {
        AppError::Upstream {
            status, message, ..
        } => AppError::BackendUnavailable {
            backend: BACKEND_NAME.to_string(),
            detail: format!("HTTP {}: {}", status, message),
        },
        other => other,
    })?;

    request.schema.decode(&raw)
}

/// Models wrapped in "```json ... ```" despite structured output
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
