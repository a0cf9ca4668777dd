//! Candidate query repair and validation
//!
//! [`ValidatedQuery`] can only be built by [`validate`], so the executor
//! never sees text that skipped this check.

use crate::pipeline::{
    logql::{self, ExprKind, LogqlExpr},
    CandidateQuery, QuerySource,
};
use std::collections::BTreeSet;
use thiserror::Error;

/// Longest candidate accepted, in bytes, before any parsing
pub const MAX_QUERY_BYTES: usize = 16 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Query is empty after normalization")]
    Empty,

    #[error("Query is {len} bytes, limit is {max}")]
    TooLong { len: usize, max: usize },

    #[error("Query is not valid LogQL: {0}")]
    Syntax(String),

    #[error("Stream selector uses unknown label '{label}'; known labels: {known}")]
    UnknownLabel { label: String, known: String },
}

/// A candidate that passed normalization, parsing and the label check
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedQuery {
    expr: String,
    attempt: u32,
    source: QuerySource,
    kind: ExprKind,
}

impl ValidatedQuery {
    pub fn expr(&self) -> &str {
        &self.expr
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn source(&self) -> QuerySource {
        self.source
    }

    pub fn is_metric(&self) -> bool {
        self.kind == ExprKind::Metric
    }
}

/// Validate a candidate against LogQL grammar and, when given, the snapshot's
/// label set. Only stream-selector labels are checked against `known_labels`;
/// labels produced by parser stages are not.
pub fn validate(
    candidate: CandidateQuery,
    known_labels: Option<&BTreeSet<String>>,
) -> Result<ValidatedQuery, ValidationError> {
    if candidate.expr.len() > MAX_QUERY_BYTES {
        return Err(ValidationError::TooLong {
            len: candidate.expr.len(),
            max: MAX_QUERY_BYTES,
        });
    }

    let expr = normalize(&candidate.expr);
    if expr.is_empty() {
        return Err(ValidationError::Empty);
    }

    let parsed = logql::parse(&expr).map_err(|e| ValidationError::Syntax(e.to_string()))?;
    if let Some(known) = known_labels {
        check_labels(&parsed, known)?;
    }

    Ok(ValidatedQuery {
        expr,
        attempt: candidate.attempt,
        source: candidate.source,
        kind: parsed.kind,
    })
}

fn check_labels(parsed: &LogqlExpr, known: &BTreeSet<String>) -> Result<(), ValidationError> {
    match parsed.selector_labels().find(|label| !known.contains(*label)) {
        Some(label) => Err(ValidationError::UnknownLabel {
            label: label.to_string(),
            known: known.iter().cloned().collect::<Vec<_>>().join(", "),
        }),
        None => Ok(()),
    }
}

/// Repair common formatting noise around model output
///
/// Trims whitespace, strips a markdown code fence, then wrapping backticks or
/// quotes, and joins lines with single spaces.
pub fn normalize(raw: &str) -> String {
    let mut text = raw.trim();

    if let Some(rest) = text.strip_prefix("```") {
        // Drop an info string such as "logql" on the opening fence line
        let rest = match rest.find('\n') {
            Some(newline) if !rest[..newline].contains('{') => &rest[newline + 1..],
            _ => rest,
        };
        text = rest.strip_suffix("```").unwrap_or(rest).trim();
    }

    loop {
        let stripped = ['`', '"', '\'']
            .iter()
            .find_map(|q| text.strip_prefix(*q).and_then(|t| t.strip_suffix(*q)));
        match stripped {
            Some(inner) => text = inner.trim(),
            None => break,
        }
    }

    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
