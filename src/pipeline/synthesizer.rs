use crate::{
    completion::{self, CompletionRequest, CompletionService, ResultSchema},
    error::AppError,
    pipeline::{
        metadata::SchemaSnapshot,
        prompts::{self, SynthesisPrompt},
        CandidateQuery, QuerySource, ResolvedLabel,
    },
    retry::RetryPolicy,
};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::sync::Arc;

pub const QUERY_SCHEMA: &str = "query_synthesis";

#[derive(Debug, Deserialize)]
struct SynthesizedQuery {
    query: String,
}

/// Everything one synthesis attempt needs to see
#[derive(Debug, Clone, Copy)]
pub struct SynthesisContext<'a> {
    pub question: &'a str,
    pub model: &'a str,
    pub snapshot: &'a SchemaSnapshot,
    pub label: &'a ResolvedLabel,
    pub values: &'a BTreeSet<String>,
}

/// Produces candidate LogQL from a question and a resolved label
pub struct QuerySynthesizer {
    completion: Arc<dyn CompletionService>,
    retry: RetryPolicy,
    temperature: f32,
    max_label_values: usize,
}

impl QuerySynthesizer {
    pub fn new(
        completion: Arc<dyn CompletionService>,
        retry: RetryPolicy,
        temperature: f32,
        max_label_values: usize,
    ) -> Self {
        Self {
            completion,
            retry,
            temperature,
            max_label_values,
        }
    }

    /// One synthesis attempt; `feedback` explains why the previous one failed
    pub async fn synthesize(
        &self,
        ctx: &SynthesisContext<'_>,
        attempt: u32,
        feedback: Option<&str>,
    ) -> Result<CandidateQuery, AppError> {
        let prompt = prompts::query_synthesis(&SynthesisPrompt {
            question: ctx.question,
            labels: ctx.snapshot.labels(),
            streams: ctx.snapshot.streams(),
            label: &ctx.label.name,
            values: ctx.values,
            max_values: self.max_label_values,
            feedback,
        });

        let request = CompletionRequest {
            model: ctx.model.to_string(),
            system: prompt.system,
            user: prompt.user,
            schema: ResultSchema::single_string_field(QUERY_SCHEMA, "query", None),
            temperature: self.temperature,
        };

        let output: SynthesizedQuery =
            completion::generate(self.completion.as_ref(), &self.retry, &request).await?;

        Ok(CandidateQuery {
            expr: output.query,
            attempt,
            source: QuerySource::Model,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::testing::{query, ScriptedCompletion};
    use crate::pipeline::metadata::tests::fast_retry;

    #[tokio::test]
    async fn test_synthesize_returns_candidate() {
        let completion = Arc::new(
            ScriptedCompletion::default().with(QUERY_SCHEMA, vec![query(r#"{status=~"5.."}"#)]),
        );
        let synthesizer = QuerySynthesizer::new(completion.clone(), fast_retry(), 0.0, 2);
        let snapshot = SchemaSnapshot::new(
            3,
            Vec::new(),
            ["status", "method"].iter().map(|s| s.to_string()).collect(),
        );
        let label = ResolvedLabel {
            name: "status".to_string(),
            generation: 3,
        };
        let values: BTreeSet<String> = ["200", "404", "500"].iter().map(|s| s.to_string()).collect();

        let candidate = synthesizer
            .synthesize(
                &SynthesisContext {
                    question: "show me all errors",
                    model: "m1",
                    snapshot: &snapshot,
                    label: &label,
                    values: &values,
                },
                2,
                Some("unknown pipeline stage 'jsonify'"),
            )
            .await
            .unwrap();

        assert_eq!(candidate.expr, r#"{status=~"5.."}"#);
        assert_eq!(candidate.attempt, 2);
        assert_eq!(candidate.source, QuerySource::Model);

        let requests = completion.requests.lock().unwrap();
        assert!(requests[0].user.contains("200, 404 (truncated: showing 2 of 3 values)"));
        assert!(requests[0].user.contains("jsonify"));
    }

    #[tokio::test]
    async fn test_malformed_output_is_schema_violation() {
        let completion = Arc::new(
            ScriptedCompletion::default()
                .with(QUERY_SCHEMA, vec![Ok(r#"{"logql": "{status=\"500\"}"}"#.to_string())]),
        );
        let synthesizer = QuerySynthesizer::new(completion, fast_retry(), 0.0, 100);
        let snapshot = SchemaSnapshot::new(1, Vec::new(), BTreeSet::new());
        let label = ResolvedLabel {
            name: "status".to_string(),
            generation: 1,
        };

        let err = synthesizer
            .synthesize(
                &SynthesisContext {
                    question: "q",
                    model: "m1",
                    snapshot: &snapshot,
                    label: &label,
                    values: &BTreeSet::new(),
                },
                1,
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::SchemaViolation { .. }));
    }
}
