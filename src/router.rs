use crate::{
    config::{CompletionBackendConfig, CompletionConfig},
    error::AppError,
};

/// Maps model ids to the completion backend that serves them
#[derive(Debug, Clone)]
pub struct ModelRouter {
    config: CompletionConfig,
}

impl ModelRouter {
    pub fn new(config: CompletionConfig) -> Self {
        Self { config }
    }

    /// The model used when a request does not name one
    pub fn default_model(&self) -> &str {
        &self.config.default_model
    }

    /// Route a model id to its backend
    pub fn route(&self, model: &str) -> Result<&CompletionBackendConfig, AppError> {
        validate_model_name(model)?;

        self.config
            .backends
            .iter()
            .find(|b| b.models.iter().any(|m| m == model))
            .ok_or_else(|| {
                AppError::InvalidRequest(format!(
                    "Model '{}' is not served by any completion backend. Available models: {}",
                    model,
                    self.available_models().join(", ")
                ))
            })
    }

    /// Get list of available models
    pub fn available_models(&self) -> Vec<String> {
        self.config
            .backends
            .iter()
            .flat_map(|b| b.models.iter().cloned())
            .collect()
    }
}

/// Reject model ids that could not be a real identifier
pub fn validate_model_name(model: &str) -> Result<(), AppError> {
    if model.is_empty() || model.len() > 256 {
        return Err(AppError::InvalidRequest(
            "Invalid model name: must be between 1 and 256 characters".to_string(),
        ));
    }

    // Model ids like "meta-llama/Meta-Llama-3.1-8B-Instruct" contain a slash
    let is_valid = model
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, '-' | '.' | '_' | '/' | ':'));
    if !is_valid {
        return Err(AppError::InvalidRequest(format!(
            "Invalid model name '{}': only alphanumeric characters, '-', '.', '_', '/' and ':' are allowed",
            model
        )));
    }

    Ok(())
}
