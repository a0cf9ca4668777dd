//! Log store collaborator
//!
//! The pipeline only talks to the store through [`LogStore`], so tests can
//! swap in an in-process fake.

pub mod client;
pub mod models;

use crate::error::AppError;
use async_trait::async_trait;

pub use client::LokiClient;
pub use models::StreamDescriptor;

/// Backend name used in logs, metrics and error details
pub const BACKEND_NAME: &str = "loki";

/// Read and query operations against the log store.
///
/// Implementations make exactly one attempt per call; retry policy belongs to
/// the pipeline component that owns the call.
#[async_trait]
pub trait LogStore: Send + Sync + 'static {
    /// Label names known to the store
    async fn list_labels(&self) -> Result<Vec<String>, AppError>;

    /// Active streams, each as its label set
    async fn list_streams(&self) -> Result<Vec<StreamDescriptor>, AppError>;

    /// Known values for one label
    async fn list_label_values(&self, label: &str) -> Result<Vec<String>, AppError>;

    /// Run a LogQL expression and return the raw response body
    async fn query(&self, expr: &str) -> Result<serde_json::Value, AppError>;
}
