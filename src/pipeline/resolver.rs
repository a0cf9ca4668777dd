use crate::{
    completion::{self, CompletionRequest, CompletionService, ResultSchema},
    error::AppError,
    pipeline::{metadata::SchemaSnapshot, prompts, ResolvedLabel},
    retry::RetryPolicy,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};

/// Result shape name, also used to tell completion calls apart in logs
pub const LABEL_SCHEMA: &str = "label_selection";

/// First answer plus one reminder
const MAX_CALLS: u32 = 2;

#[derive(Debug, Deserialize)]
struct LabelChoice {
    label: String,
}

/// Picks the one snapshot label that best narrows a question
pub struct LabelResolver {
    completion: Arc<dyn CompletionService>,
    retry: RetryPolicy,
    temperature: f32,
}

impl LabelResolver {
    pub fn new(completion: Arc<dyn CompletionService>, retry: RetryPolicy, temperature: f32) -> Self {
        Self {
            completion,
            retry,
            temperature,
        }
    }

    /// Resolve `question` to a label of `snapshot`.
    ///
    /// Returns a label from the snapshot's set or
    /// [`AppError::AmbiguousOrUnresolvable`]; completion outages propagate as
    /// [`AppError::BackendUnavailable`].
    pub async fn resolve(
        &self,
        question: &str,
        model: &str,
        snapshot: &SchemaSnapshot,
    ) -> Result<ResolvedLabel, AppError> {
        let labels = snapshot.labels();
        if labels.is_empty() {
            return Err(AppError::AmbiguousOrUnresolvable(
                "The log store reports no labels to search by".to_string(),
            ));
        }

        let allowed: Vec<String> = labels.iter().cloned().collect();
        let schema = ResultSchema::single_string_field(LABEL_SCHEMA, "label", Some(allowed.as_slice()));

        let mut rejection: Option<String> = None;
        for attempt in 1..=MAX_CALLS {
            let prompt = prompts::label_selection(question, labels, rejection.as_deref());
            let request = CompletionRequest {
                model: model.to_string(),
                system: prompt.system,
                user: prompt.user,
                schema: schema.clone(),
                temperature: self.temperature,
            };

            let reason = match completion::generate::<LabelChoice>(
                self.completion.as_ref(),
                &self.retry,
                &request,
            )
            .await
            {
                Ok(choice) => {
                    let name = choice.label.trim();
                    if snapshot.contains_label(name) {
                        debug!(label = name, attempt, generation = snapshot.generation(), "Label resolved");
                        return Ok(ResolvedLabel {
                            name: name.to_string(),
                            generation: snapshot.generation(),
                        });
                    }
                    format!("'{}' is not one of the known labels", name)
                }
                Err(AppError::SchemaViolation { detail, .. }) => detail,
                Err(e) => return Err(e),
            };

            warn!(attempt, reason = %reason, "Label resolution rejected");
            rejection = Some(reason);
        }

        Err(AppError::AmbiguousOrUnresolvable(format!(
            "Could not map the question to a known label: {}",
            rejection.unwrap_or_default()
        )))
    }
}
