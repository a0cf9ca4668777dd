use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One stream, identified by its label set
pub type StreamDescriptor = BTreeMap<String, String>;

/// Envelope shared by Loki's metadata endpoints
///
/// `/labels` and `/label/{name}/values` return `data: [string]`,
/// `/series` returns `data: [{label: value}]`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetadataResponse<T> {
    pub status: String,
    #[serde(default = "Vec::new")]
    pub data: Vec<T>,
}

impl<T> MetadataResponse<T> {
    pub fn is_success(&self) -> bool {
        self.status == "success"
    }
}
