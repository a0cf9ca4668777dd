use crate::{
    completion::{
        models::{ChatCompletionRequest, ChatCompletionResponse, ChatMessage, JsonSchemaSpec, ResponseFormat},
        CompletionRequest, CompletionService, BACKEND_NAME,
    },
    error::AppError,
    router::ModelRouter,
};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

const MAX_COMPLETION_TOKENS: u32 = 512;

/// Completion client for OpenAI-compatible `/chat/completions` endpoints
/// (vLLM, hosted inference, OpenAI itself), selected per model by [`ModelRouter`]
pub struct OpenAiCompletionClient {
    client: Client,
    router: ModelRouter,
}

impl OpenAiCompletionClient {
    pub fn new(client: Client, router: ModelRouter) -> Self {
        Self { client, router }
    }
}

/// Build the wire request for a schema-constrained completion
pub fn build_chat_request(request: &CompletionRequest) -> ChatCompletionRequest {
    ChatCompletionRequest {
        model: request.model.clone(),
        messages: vec![
            ChatMessage::system(request.system.clone()),
            ChatMessage::user(request.user.clone()),
        ],
        max_tokens: Some(MAX_COMPLETION_TOKENS),
        temperature: Some(request.temperature),
        stream: Some(false),
        response_format: Some(ResponseFormat::JsonSchema {
            json_schema: JsonSchemaSpec {
                name: request.schema.name.clone(),
                schema: request.schema.schema.clone(),
                strict: Some(true),
            },
        }),
    }
}

#[async_trait]
impl CompletionService for OpenAiCompletionClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, AppError> {
        let backend = self.router.route(&request.model)?;
        let url = format!("{}/chat/completions", backend.base_url.trim_end_matches('/'));

        let mut http_request = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .timeout(Duration::from_secs(backend.timeout_seconds))
            .json(&build_chat_request(request));
        if !backend.api_key.is_empty() {
            http_request = http_request.header("Authorization", format!("Bearer {}", backend.api_key));
        }

        let response = http_request
            .send()
            .await
            .map_err(|e| AppError::transport(BACKEND_NAME, e))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AppError::Upstream {
                backend: format!("{}:{}", BACKEND_NAME, backend.name),
                status,
                message: error_text,
            });
        }

        let body: ChatCompletionResponse = response.json().await.map_err(|e| AppError::SchemaViolation {
            schema: request.schema.name.clone(),
            detail: format!("malformed chat completion envelope: {}", e),
        })?;

        if let Some(usage) = &body.usage {
            tracing::debug!(
                backend = %backend.name,
                model = %request.model,
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                "Completion finished"
            );
        }

        body.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| AppError::SchemaViolation {
                schema: request.schema.name.clone(),
                detail: "completion returned no message content".to_string(),
            })
    }

    fn call_timeout(&self, model: &str) -> Duration {
        let seconds = self
            .router
            .route(model)
            .map(|b| b.timeout_seconds)
            .unwrap_or(60);
        // Leave room for the client-side timeout to fire first
        Duration::from_secs(seconds + 1)
    }
}
