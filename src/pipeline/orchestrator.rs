//! Per-request driver for the translation pipeline
//!
//! Walks `Start → MetadataFetched → LabelResolved → QuerySynthesized →
//! QueryValidated → Executed → Done`. The only backward edge is the bounded
//! re-synthesis loop back to `LabelResolved`.

use crate::{
    completion::{self, CompletionService},
    config::{Config, TranslationConfig, TranslationMode},
    error::AppError,
    loki::LogStore,
    metrics,
    pipeline::{
        executor::QueryExecutor,
        fallback::FallbackTranslator,
        metadata::MetadataProvider,
        resolver::LabelResolver,
        synthesizer::{QuerySynthesizer, SynthesisContext},
        validator::{validate, ValidatedQuery},
        QueryRequest,
    },
    retry::RetryPolicy,
    router::ModelRouter,
};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Longest accepted question, in characters
const MAX_QUESTION_CHARS: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Start,
    MetadataFetched,
    LabelResolved,
    QuerySynthesized,
    QueryValidated,
    Executed,
    Done,
    Failed(&'static str),
}

impl PipelineState {
    fn rank(&self) -> u8 {
        match self {
            PipelineState::Start => 0,
            PipelineState::MetadataFetched => 1,
            PipelineState::LabelResolved => 2,
            PipelineState::QuerySynthesized => 3,
            PipelineState::QueryValidated => 4,
            PipelineState::Executed => 5,
            PipelineState::Done => 6,
            PipelineState::Failed(_) => 7,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Done | PipelineState::Failed(_))
    }

    /// Forward moves only, plus the re-synthesis edge back to `LabelResolved`
    pub fn can_transition(&self, next: PipelineState) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            PipelineState::Failed(_) => true,
            PipelineState::LabelResolved
                if matches!(
                    self,
                    PipelineState::QuerySynthesized | PipelineState::QueryValidated
                ) =>
            {
                true
            }
            next => next.rank() > self.rank(),
        }
    }
}

/// Current state of one request, logged on every move
struct StateTracker {
    request_id: Uuid,
    state: PipelineState,
}

impl StateTracker {
    fn new(request_id: Uuid) -> Self {
        Self {
            request_id,
            state: PipelineState::Start,
        }
    }

    fn advance(&mut self, next: PipelineState) {
        debug_assert!(
            self.state.can_transition(next),
            "illegal pipeline transition {:?} -> {:?}",
            self.state,
            next
        );
        debug!(
            request_id = %self.request_id,
            from = ?self.state,
            to = ?next,
            "Pipeline transition"
        );
        self.state = next;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Execute,
    TranslateOnly,
}

/// Result of one pipeline run
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub request_id: Uuid,
    pub query: ValidatedQuery,
    /// Absent for template translations
    pub label: Option<String>,
    /// Absent for dry runs
    pub result: Option<Value>,
}

pub struct Orchestrator {
    metadata: MetadataProvider,
    resolver: LabelResolver,
    synthesizer: QuerySynthesizer,
    executor: QueryExecutor,
    fallback: FallbackTranslator,
    router: ModelRouter,
    translation: TranslationConfig,
    max_synthesis_attempts: u32,
}

impl Orchestrator {
    pub fn new(
        config: &Config,
        store: Arc<dyn LogStore>,
        completion: Arc<dyn CompletionService>,
    ) -> Self {
        let retry = RetryPolicy::from_config(&config.retry);
        // One second of headroom so the HTTP client's own timeout fires first
        let store_timeout = Duration::from_secs(config.loki.timeout_seconds + 1);

        Self {
            metadata: MetadataProvider::new(store.clone(), &config.schema, store_timeout, retry),
            resolver: LabelResolver::new(completion.clone(), retry, config.pipeline.temperature),
            synthesizer: QuerySynthesizer::new(
                completion,
                retry,
                config.pipeline.temperature,
                config.pipeline.max_label_values,
            ),
            executor: QueryExecutor::new(store, retry, store_timeout),
            fallback: FallbackTranslator::new(config.translation.default_selector.clone()),
            router: ModelRouter::new(config.completion.clone()),
            translation: config.translation.clone(),
            max_synthesis_attempts: config.pipeline.max_synthesis_attempts,
        }
    }

    pub fn metadata(&self) -> &MetadataProvider {
        &self.metadata
    }

    /// Translate and execute a question
    pub async fn run(&self, request: &QueryRequest) -> Result<PipelineOutput, AppError> {
        self.process(request, Mode::Execute).await
    }

    /// Translate a question without executing it
    pub async fn translate(&self, request: &QueryRequest) -> Result<PipelineOutput, AppError> {
        self.process(request, Mode::TranslateOnly).await
    }

    async fn process(&self, request: &QueryRequest, mode: Mode) -> Result<PipelineOutput, AppError> {
        let request_id = Uuid::new_v4();
        let started = Instant::now();
        let model = request
            .model
            .clone()
            .unwrap_or_else(|| self.router.default_model().to_string());
        let dry_run = mode == Mode::TranslateOnly;
        let span = info_span!("nl_query", %request_id, model = %model, dry_run);

        let mut tracker = StateTracker::new(request_id);
        let result = self
            .drive(request, &model, mode, &mut tracker)
            .instrument(span)
            .await;

        match &result {
            Ok(output) => {
                tracker.advance(PipelineState::Done);
                info!(
                    request_id = %request_id,
                    model = %model,
                    source = %output.query.source(),
                    attempt = output.query.attempt(),
                    query = output.query.expr(),
                    duration_ms = started.elapsed().as_millis() as u64,
                    "Request completed"
                );
                metrics::record_request(self.metric_model_label(&model), "success");
            }
            Err(e) => {
                tracker.advance(PipelineState::Failed(e.kind()));
                warn!(
                    request_id = %request_id,
                    model = %model,
                    kind = e.kind(),
                    error = %e,
                    duration_ms = started.elapsed().as_millis() as u64,
                    "Request failed"
                );
                metrics::record_request(self.metric_model_label(&model), e.kind());
            }
        }

        result.map(|mut output| {
            output.request_id = request_id;
            output
        })
    }

    /// Client-supplied names only become metric labels once they route to a backend
    fn metric_model_label<'a>(&self, model: &'a str) -> &'a str {
        if self.router.route(model).is_ok() {
            model
        } else {
            "unknown"
        }
    }

    async fn drive(
        &self,
        request: &QueryRequest,
        model: &str,
        mode: Mode,
        tracker: &mut StateTracker,
    ) -> Result<PipelineOutput, AppError> {
        let question = validate_question(request)?;

        if self.translation.mode == TranslationMode::Fallback {
            return self.run_fallback(question, "disabled", mode, tracker).await;
        }
        self.router.route(model)?;

        let snapshot = timed("metadata", self.metadata.get_snapshot()).await?;
        tracker.advance(PipelineState::MetadataFetched);

        let label = match timed("resolve_label", self.resolver.resolve(question, model, &snapshot)).await
        {
            Ok(label) => label,
            Err(e) if self.should_fall_back(&e) => {
                return self
                    .run_fallback(question, "completion_unavailable", mode, tracker)
                    .await
            }
            Err(e) => return Err(e),
        };
        tracker.advance(PipelineState::LabelResolved);

        let values = self.metadata.get_label_values(&snapshot, &label.name).await?;
        if values.is_empty() {
            warn!(label = %label.name, "Resolved label has no known values");
        }

        let ctx = SynthesisContext {
            question,
            model,
            snapshot: &snapshot,
            label: &label,
            values: &values,
        };

        let mut feedback: Option<String> = None;
        for attempt in 1..=self.max_synthesis_attempts {
            let candidate = match timed(
                "synthesize",
                self.synthesizer.synthesize(&ctx, attempt, feedback.as_deref()),
            )
            .await
            {
                Ok(candidate) => candidate,
                Err(AppError::SchemaViolation { detail, .. }) => {
                    metrics::record_synthesis_attempt("schema_violation");
                    warn!(attempt, detail = %detail, "Synthesis output did not match its schema");
                    feedback = Some(detail);
                    continue;
                }
                Err(e) if self.should_fall_back(&e) => {
                    return self
                        .run_fallback(question, "completion_unavailable", mode, tracker)
                        .await
                }
                Err(e) => return Err(e),
            };
            tracker.advance(PipelineState::QuerySynthesized);

            let validated = match validate(candidate, Some(snapshot.labels())) {
                Ok(validated) => validated,
                Err(e) => {
                    metrics::record_synthesis_attempt("invalid");
                    warn!(attempt, reason = %e, "Synthesized query rejected");
                    feedback = Some(e.to_string());
                    tracker.advance(PipelineState::LabelResolved);
                    continue;
                }
            };
            metrics::record_synthesis_attempt("valid");
            tracker.advance(PipelineState::QueryValidated);

            if mode == Mode::TranslateOnly {
                return Ok(output(validated, Some(label.name.clone()), None));
            }

            match timed("execute", self.executor.execute(&validated)).await {
                Ok(result) => {
                    tracker.advance(PipelineState::Executed);
                    return Ok(output(validated, Some(label.name.clone()), Some(result)));
                }
                Err(AppError::BackendQueryError { status, body })
                    if attempt < self.max_synthesis_attempts =>
                {
                    metrics::record_synthesis_attempt("store_rejected");
                    warn!(attempt, status, query = validated.expr(), "Store rejected query, re-synthesizing");
                    feedback = Some(format!(
                        "the log store rejected `{}` with HTTP {}: {}",
                        validated.expr(),
                        status,
                        body
                    ));
                    tracker.advance(PipelineState::LabelResolved);
                }
                Err(e) => return Err(e),
            }
        }

        Err(AppError::QuerySynthesisFailed(format!(
            "No valid query after {} attempts: {}",
            self.max_synthesis_attempts,
            feedback.unwrap_or_default()
        )))
    }

    fn should_fall_back(&self, error: &AppError) -> bool {
        self.translation.fallback_on_unavailable
            && matches!(
                error,
                AppError::BackendUnavailable { backend, .. } if backend == completion::BACKEND_NAME
            )
    }

    async fn run_fallback(
        &self,
        question: &str,
        reason: &'static str,
        mode: Mode,
        tracker: &mut StateTracker,
    ) -> Result<PipelineOutput, AppError> {
        warn!(reason, "Serving degraded template translation");
        metrics::record_fallback(reason);

        let candidate = self.fallback.translate(question);
        tracker.advance(PipelineState::QuerySynthesized);

        let validated = validate(candidate, None).map_err(|e| {
            AppError::QuerySynthesisFailed(format!("Fallback template is not valid LogQL: {}", e))
        })?;
        tracker.advance(PipelineState::QueryValidated);

        if mode == Mode::TranslateOnly {
            return Ok(output(validated, None, None));
        }

        let result = timed("execute", self.executor.execute(&validated)).await?;
        tracker.advance(PipelineState::Executed);
        Ok(output(validated, None, Some(result)))
    }
}

fn output(query: ValidatedQuery, label: Option<String>, result: Option<Value>) -> PipelineOutput {
    PipelineOutput {
        request_id: Uuid::nil(),
        query,
        label,
        result,
    }
}

fn validate_question(request: &QueryRequest) -> Result<&str, AppError> {
    let question = request.query.as_deref().map(str::trim).unwrap_or_default();
    if question.is_empty() {
        return Err(AppError::InvalidRequest("Query is required".to_string()));
    }
    if question.chars().count() > MAX_QUESTION_CHARS {
        return Err(AppError::InvalidRequest(format!(
            "Query is too long (max {} characters)",
            MAX_QUESTION_CHARS
        )));
    }
    Ok(question)
}

async fn timed<T>(stage: &'static str, fut: impl Future<Output = T>) -> T {
    let started = Instant::now();
    let out = fut.await;
    metrics::record_stage_duration(stage, started.elapsed());
    out
}
