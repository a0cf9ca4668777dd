//! Natural-language to LogQL pipeline
//!
//! Stages run in a fixed order per request: schema snapshot, label
//! resolution, query synthesis, validation, execution. The
//! [`orchestrator::Orchestrator`] owns the retry and fallback policy between
//! them.

pub mod executor;
pub mod fallback;
pub mod logql;
pub mod metadata;
pub mod orchestrator;
pub mod prompts;
pub mod resolver;
pub mod synthesizer;
pub mod validator;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use executor::QueryExecutor;
pub use fallback::FallbackTranslator;
pub use metadata::{MetadataProvider, SchemaSnapshot};
pub use orchestrator::{Orchestrator, PipelineOutput};
pub use resolver::LabelResolver;
pub use synthesizer::QuerySynthesizer;
pub use validator::ValidatedQuery;

/// Inbound natural-language question
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryRequest {
    /// Missing and empty are both rejected as invalid requests
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default)]
    pub dry_run: bool,
}

impl QueryRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: Some(query.into()),
            ..Self::default()
        }
    }
}

/// Label chosen for one request, tied to the snapshot it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedLabel {
    pub name: String,
    pub generation: u64,
}

/// Where a candidate query came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuerySource {
    Model,
    Fallback,
}

impl QuerySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuerySource::Model => "model",
            QuerySource::Fallback => "fallback",
        }
    }
}

impl fmt::Display for QuerySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unvalidated LogQL text plus provenance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateQuery {
    pub expr: String,
    /// 1-based synthesis attempt
    pub attempt: u32,
    pub source: QuerySource,
}
