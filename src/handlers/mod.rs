pub mod admin;
pub mod health;
pub mod metrics_handler;
pub mod query;

use crate::pipeline::Orchestrator;
use std::sync::Arc;

/// Application state
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}
