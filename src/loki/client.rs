use crate::{
    config::{LokiConfig, QueryMode, SchemaConfig},
    error::AppError,
    loki::{models::MetadataResponse, LogStore, StreamDescriptor, BACKEND_NAME},
};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Header carrying the tenant identity on every Loki call
pub const TENANT_HEADER: &str = "X-Scope-OrgID";

/// HTTP client for the Loki API
pub struct LokiClient {
    client: Client,
    config: LokiConfig,
    schema_lookback_seconds: u64,
    series_selector: String,
}

impl LokiClient {
    pub fn new(client: Client, config: LokiConfig, schema: &SchemaConfig) -> Self {
        Self {
            client,
            config,
            schema_lookback_seconds: schema.lookback_seconds,
            series_selector: schema.series_selector.clone(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn discovery_window(&self) -> Result<[(&'static str, String); 2], AppError> {
        let (start, end) = lookback_window(self.schema_lookback_seconds)?;
        Ok([("start", start.to_rfc3339()), ("end", end.to_rfc3339())])
    }

    /// Attach tenant identity and timeout, send, and reject non-2xx statuses
    async fn send(&self, request: RequestBuilder) -> Result<Response, AppError> {
        let response = request
            .header(TENANT_HEADER, &self.config.tenant_id)
            .timeout(Duration::from_secs(self.config.timeout_seconds))
            .send()
            .await
            .map_err(|e| AppError::transport(BACKEND_NAME, e))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            tracing::debug!(status, body = %error_text, "Loki returned an error");
            return Err(AppError::Upstream {
                backend: BACKEND_NAME.to_string(),
                status,
                message: error_text,
            });
        }

        Ok(response)
    }

    async fn get_metadata<T: DeserializeOwned>(
        &self,
        path: &str,
        extra: &[(&str, &str)],
    ) -> Result<Vec<T>, AppError> {
        let request = self
            .client
            .get(self.url(path))
            .query(&self.discovery_window()?)
            .query(extra);
        let response = self.send(request).await?;
        let status = response.status().as_u16();

        let body: MetadataResponse<T> = response.json().await.map_err(|e| AppError::Upstream {
            backend: BACKEND_NAME.to_string(),
            status,
            message: format!("Malformed metadata response from {}: {}", path, e),
        })?;

        if !body.is_success() {
            return Err(AppError::Upstream {
                backend: BACKEND_NAME.to_string(),
                status,
                message: format!("Metadata request {} returned status '{}'", path, body.status),
            });
        }

        Ok(body.data)
    }
}

#[async_trait]
impl LogStore for LokiClient {
    async fn list_labels(&self) -> Result<Vec<String>, AppError> {
        self.get_metadata("/loki/api/v1/labels", &[]).await
    }

    async fn list_streams(&self) -> Result<Vec<StreamDescriptor>, AppError> {
        self.get_metadata("/loki/api/v1/series", &[("match[]", self.series_selector.as_str())])
            .await
    }

    async fn list_label_values(&self, label: &str) -> Result<Vec<String>, AppError> {
        if !is_valid_label_name(label) {
            return Err(AppError::InvalidRequest(format!(
                "Invalid label name '{}'",
                label
            )));
        }
        let path = format!("/loki/api/v1/label/{}/values", label);
        self.get_metadata(&path, &[]).await
    }

    async fn query(&self, expr: &str) -> Result<serde_json::Value, AppError> {
        let limit = self.config.query_limit.to_string();
        let request = match self.config.query_mode {
            QueryMode::Instant => self
                .client
                .get(self.url("/loki/api/v1/query"))
                .query(&[("query", expr), ("limit", limit.as_str())]),
            QueryMode::Range => {
                let (start, end) = lookback_window(self.config.range_lookback_seconds)?;
                self.client
                    .get(self.url("/loki/api/v1/query_range"))
                    .query(&[
                        ("query", expr),
                        ("limit", limit.as_str()),
                        ("start", start.to_rfc3339().as_str()),
                        ("end", end.to_rfc3339().as_str()),
                    ])
            }
        };

        let response = self.send(request).await?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| AppError::transport(BACKEND_NAME, e))?;

        serde_json::from_str(&body).map_err(|_| AppError::Upstream {
            backend: BACKEND_NAME.to_string(),
            status,
            message: body,
        })
    }
}

/// Prometheus-style label name: `[a-zA-Z_][a-zA-Z0-9_]*`
pub fn is_valid_label_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// `[now - lookback, now]`, or a config error when the lookback overflows the calendar
fn lookback_window(lookback_seconds: u64) -> Result<(DateTime<Utc>, DateTime<Utc>), AppError> {
    let end = Utc::now();
    i64::try_from(lookback_seconds)
        .ok()
        .and_then(ChronoDuration::try_seconds)
        .and_then(|lookback| end.checked_sub_signed(lookback))
        .map(|start| (start, end))
        .ok_or_else(|| {
            AppError::ConfigError(format!("Lookback of {}s is out of range", lookback_seconds))
        })
}
