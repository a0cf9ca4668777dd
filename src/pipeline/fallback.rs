//! Template translation used when the completion path is disabled or down
//!
//! Questions are matched case-insensitively against a fixed table; anything
//! else maps to the bare default selector.

use crate::pipeline::{CandidateQuery, QuerySource};

/// Known questions and their LogQL, with `{selector}` standing for the
/// configured default stream selector
const TEMPLATES: &[(&str, &str)] = &[
    (
        "show me all errors",
        r#"{selector} | json status | line_format "{{.status}}" |~ "500""#,
    ),
    ("list recent logs", "{selector}"),
    (
        "count get requests in the last hour",
        r#"sum(count_over_time({selector} | json method | method="GET" [1h]))"#,
    ),
    (
        "show all logs for a specific request",
        r#"{selector} | json request | line_format "{{.request}}" |~ "/proactive/architectures/revolutionary/24%2f365""#,
    ),
];

#[derive(Debug, Clone)]
pub struct FallbackTranslator {
    default_selector: String,
}

impl FallbackTranslator {
    pub fn new(default_selector: impl Into<String>) -> Self {
        Self {
            default_selector: default_selector.into(),
        }
    }

    pub fn default_selector(&self) -> &str {
        &self.default_selector
    }

    /// Template query for `question`; never fails
    pub fn translate(&self, question: &str) -> CandidateQuery {
        let key = question.trim().to_lowercase();
        let expr = TEMPLATES
            .iter()
            .find(|(known, _)| *known == key)
            .map(|(_, template)| template.replace("{selector}", &self.default_selector))
            .unwrap_or_else(|| self.default_selector.clone());

        CandidateQuery {
            expr,
            attempt: 1,
            source: QuerySource::Fallback,
        }
    }
}
