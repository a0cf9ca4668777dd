use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub loki: LokiConfig,
    #[serde(default)]
    pub schema: SchemaConfig,
    #[serde(default)]
    pub completion: CompletionConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub translation: TranslationConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// "text" or "json"
    #[serde(default = "default_log_format")]
    pub log_format: String,
    /// Empty means any origin
    #[serde(default)]
    pub cors_allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            cors_allowed_origins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub api_keys: Vec<ApiKeyConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiKeyConfig {
    pub key: String,
    pub name: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryMode {
    /// `/loki/api/v1/query`
    Instant,
    /// `/loki/api/v1/query_range`
    Range,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LokiConfig {
    #[serde(default = "default_loki_url")]
    pub base_url: String,
    /// Sent as `X-Scope-OrgID`
    #[serde(default = "default_tenant")]
    pub tenant_id: String,
    #[serde(default = "default_loki_timeout")]
    pub timeout_seconds: u64,
    #[serde(default = "default_query_mode")]
    pub query_mode: QueryMode,
    #[serde(default = "default_query_limit")]
    pub query_limit: u32,
    #[serde(default = "default_range_lookback")]
    pub range_lookback_seconds: u64,
}

impl Default for LokiConfig {
    fn default() -> Self {
        Self {
            base_url: default_loki_url(),
            tenant_id: default_tenant(),
            timeout_seconds: default_loki_timeout(),
            query_mode: default_query_mode(),
            query_limit: default_query_limit(),
            range_lookback_seconds: default_range_lookback(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SchemaConfig {
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_seconds: u64,
    /// Hard ceiling on how old a snapshot may be when served during an outage
    #[serde(default = "default_max_staleness")]
    pub max_staleness_seconds: u64,
    /// Time window for label and series discovery
    #[serde(default = "default_schema_lookback")]
    pub lookback_seconds: u64,
    #[serde(default = "default_series_selector")]
    pub series_selector: String,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            refresh_interval_seconds: default_refresh_interval(),
            max_staleness_seconds: default_max_staleness(),
            lookback_seconds: default_schema_lookback(),
            series_selector: default_series_selector(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CompletionConfig {
    #[serde(default)]
    pub default_model: String,
    #[serde(default)]
    pub backends: Vec<CompletionBackendConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CompletionBackendConfig {
    pub name: String,
    /// OpenAI-compatible base URL, e.g. `https://host/v1`
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_completion_timeout")]
    pub timeout_seconds: u64,
    /// Model ids served by this backend
    pub models: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    #[serde(default = "default_max_synthesis_attempts")]
    pub max_synthesis_attempts: u32,
    #[serde(default = "default_max_label_values")]
    pub max_label_values: usize,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_synthesis_attempts: default_max_synthesis_attempts(),
            max_label_values: default_max_label_values(),
            temperature: default_temperature(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            backoff_ms: default_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TranslationMode {
    /// Completion-based translation
    Model,
    /// Fixed templates only
    Fallback,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TranslationConfig {
    #[serde(default = "default_translation_mode")]
    pub mode: TranslationMode,
    #[serde(default)]
    pub fallback_on_unavailable: bool,
    #[serde(default = "default_selector")]
    pub default_selector: String,
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            mode: default_translation_mode(),
            fallback_on_unavailable: false,
            default_selector: default_selector(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetricsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_loki_url() -> String {
    "http://localhost:3100".to_string()
}

fn default_tenant() -> String {
    "tenant1".to_string()
}

fn default_loki_timeout() -> u64 {
    30
}

fn default_query_mode() -> QueryMode {
    QueryMode::Range
}

fn default_query_limit() -> u32 {
    100
}

fn default_range_lookback() -> u64 {
    3600
}

fn default_refresh_interval() -> u64 {
    300
}

fn default_max_staleness() -> u64 {
    3600
}

fn default_schema_lookback() -> u64 {
    6 * 3600
}

fn default_series_selector() -> String {
    r#"{job=~".+"}"#.to_string()
}

fn default_completion_timeout() -> u64 {
    60
}

fn default_max_synthesis_attempts() -> u32 {
    2
}

fn default_max_label_values() -> usize {
    100
}

fn default_temperature() -> f32 {
    0.0
}

fn default_backoff_ms() -> u64 {
    250
}

fn default_max_backoff_ms() -> u64 {
    2000
}

fn default_translation_mode() -> TranslationMode {
    TranslationMode::Model
}

fn default_selector() -> String {
    r#"{container="run_loki-flog-1"}"#.to_string()
}

fn default_true() -> bool {
    true
}

/// Load configuration from `config.toml` in the working directory
pub fn load_config() -> anyhow::Result<Config> {
    load_config_from(Path::new("config.toml"))
}

/// Load configuration from a file, overridden by `LOGQL_GATEWAY__*` environment variables
pub fn load_config_from(path: &Path) -> anyhow::Result<Config> {
    let config = config::Config::builder()
        .add_source(config::File::from(path).required(false))
        .add_source(
            config::Environment::with_prefix("LOGQL_GATEWAY")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    let cfg: Config = config.try_deserialize()?;
    validate_config(&cfg)?;

    Ok(cfg)
}

/// Longest lookback window accepted for discovery and range queries
pub const MAX_LOOKBACK_SECONDS: u64 = 30 * 24 * 3600;

pub fn validate_config(cfg: &Config) -> anyhow::Result<()> {
    if !matches!(cfg.server.log_format.as_str(), "text" | "json") {
        anyhow::bail!(
            "Invalid log format '{}': expected 'text' or 'json'",
            cfg.server.log_format
        );
    }

    if cfg.auth.enabled {
        if !cfg.auth.api_keys.iter().any(|k| k.enabled) {
            anyhow::bail!("Auth is enabled but no enabled API key is configured");
        }
        for key in &cfg.auth.api_keys {
            if key.name.is_empty() {
                anyhow::bail!("API key name cannot be empty");
            }
        }
    }

    if cfg.loki.base_url.is_empty() {
        anyhow::bail!("Loki base URL cannot be empty");
    }
    if cfg.loki.timeout_seconds == 0 {
        anyhow::bail!("Loki timeout must be greater than zero");
    }
    for (key, seconds) in [
        ("loki.range_lookback_seconds", cfg.loki.range_lookback_seconds),
        ("schema.lookback_seconds", cfg.schema.lookback_seconds),
    ] {
        if seconds == 0 || seconds > MAX_LOOKBACK_SECONDS {
            anyhow::bail!(
                "{} must be between 1 and {}, got {}",
                key,
                MAX_LOOKBACK_SECONDS,
                seconds
            );
        }
    }

    if cfg.schema.max_staleness_seconds < cfg.schema.refresh_interval_seconds {
        anyhow::bail!(
            "schema.max_staleness_seconds ({}) must not be below schema.refresh_interval_seconds ({})",
            cfg.schema.max_staleness_seconds,
            cfg.schema.refresh_interval_seconds
        );
    }

    if !(1..=2).contains(&cfg.pipeline.max_synthesis_attempts) {
        anyhow::bail!(
            "pipeline.max_synthesis_attempts must be 1 or 2, got {}",
            cfg.pipeline.max_synthesis_attempts
        );
    }
    if cfg.pipeline.max_label_values == 0 {
        anyhow::bail!("pipeline.max_label_values must be greater than zero");
    }

    if cfg.retry.backoff_ms > cfg.retry.max_backoff_ms {
        anyhow::bail!("retry.backoff_ms cannot exceed retry.max_backoff_ms");
    }

    if cfg.translation.mode == TranslationMode::Model {
        if cfg.completion.backends.is_empty() {
            anyhow::bail!("At least one completion backend must be configured");
        }
        for backend in &cfg.completion.backends {
            if backend.name.is_empty() {
                anyhow::bail!("Completion backend name cannot be empty");
            }
            if backend.models.is_empty() {
                anyhow::bail!("Completion backend '{}' serves no models", backend.name);
            }
            if backend.timeout_seconds == 0 {
                anyhow::bail!("Completion backend '{}' has a zero timeout", backend.name);
            }
        }
        let default_served = cfg
            .completion
            .backends
            .iter()
            .any(|b| b.models.iter().any(|m| m == &cfg.completion.default_model));
        if !default_served {
            anyhow::bail!(
                "Default model '{}' is not served by any completion backend",
                cfg.completion.default_model
            );
        }
    }

    Ok(())
}

#[cfg(test)]
pub(crate) fn test_config() -> Config {
    Config {
        server: ServerConfig::default(),
        auth: AuthConfig::default(),
        loki: LokiConfig::default(),
        schema: SchemaConfig::default(),
        completion: CompletionConfig {
            default_model: "m1".to_string(),
            backends: vec![CompletionBackendConfig {
                name: "local-vllm".to_string(),
                base_url: "http://localhost:8001/v1".to_string(),
                api_key: "super-secret-token".to_string(),
                timeout_seconds: 30,
                models: vec!["m1".to_string(), "m2".to_string()],
            }],
        },
        pipeline: PipelineConfig::default(),
        retry: RetryConfig::default(),
        translation: TranslationConfig::default(),
        metrics: MetricsConfig::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&test_config()).is_ok());
    }

    #[test]
    fn test_validate_config_requires_backend_in_model_mode() {
        let mut cfg = test_config();
        cfg.completion.backends.clear();

        let result = validate_config(&cfg);
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("At least one completion backend"));
    }

    #[test]
    fn test_fallback_mode_needs_no_backend() {
        let mut cfg = test_config();
        cfg.completion.backends.clear();
        cfg.translation.mode = TranslationMode::Fallback;
        assert!(validate_config(&cfg).is_ok());
    }

    #[test]
    fn test_validate_config_rejects_unserved_default_model() {
        let mut cfg = test_config();
        cfg.completion.default_model = "m9".to_string();
        let err = validate_config(&cfg).unwrap_err().to_string();
        assert!(err.contains("m9"));
    }

    #[test]
    fn test_validate_config_caps_synthesis_attempts() {
        let mut cfg = test_config();
        cfg.pipeline.max_synthesis_attempts = 3;
        assert!(validate_config(&cfg).is_err());
        cfg.pipeline.max_synthesis_attempts = 0;
        assert!(validate_config(&cfg).is_err());
    }

    #[test]
    fn test_validate_config_staleness_ceiling() {
        let mut cfg = test_config();
        cfg.schema.refresh_interval_seconds = 600;
        cfg.schema.max_staleness_seconds = 60;
        assert!(validate_config(&cfg).is_err());
    }

    #[test]
    fn test_validate_config_bounds_lookbacks() {
        let mut cfg = test_config();
        cfg.loki.range_lookback_seconds = u64::MAX;
        assert!(validate_config(&cfg).is_err());

        cfg.loki.range_lookback_seconds = MAX_LOOKBACK_SECONDS;
        assert!(validate_config(&cfg).is_ok());

        cfg.schema.lookback_seconds = 0;
        assert!(validate_config(&cfg).is_err());
        cfg.schema.lookback_seconds = MAX_LOOKBACK_SECONDS + 1;
        assert!(validate_config(&cfg).is_err());
    }

    #[test]
    fn test_validate_config_auth_requires_key() {
        let mut cfg = test_config();
        cfg.auth.enabled = true;
        assert!(validate_config(&cfg).is_err());

        cfg.auth.api_keys.push(ApiKeyConfig {
            key: "sk-gw-001".to_string(),
            name: "ops".to_string(),
            enabled: true,
        });
        assert!(validate_config(&cfg).is_ok());
    }

    #[test]
    fn test_load_config_from_file_applies_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[loki]
base_url = "http://loki:3100"
tenant_id = "team-a"

[completion]
default_model = "llama-3.1-8b"

[[completion.backends]]
name = "modal"
base_url = "https://example.modal.run/v1"
api_key = "token"
models = ["llama-3.1-8b"]
"#
        )
        .unwrap();

        let cfg = load_config_from(file.path()).unwrap();
        assert_eq!(cfg.loki.base_url, "http://loki:3100");
        assert_eq!(cfg.loki.tenant_id, "team-a");
        assert_eq!(cfg.loki.query_mode, QueryMode::Range);
        assert_eq!(cfg.server.port, 8000);
        assert_eq!(cfg.pipeline.max_synthesis_attempts, 2);
        assert_eq!(cfg.completion.backends[0].timeout_seconds, 60);
        assert_eq!(cfg.translation.mode, TranslationMode::Model);
    }
}
