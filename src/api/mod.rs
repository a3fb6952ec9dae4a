//! HTTP API layer.

pub mod search;
pub mod tools;

use std::sync::Arc;

use crate::runtime::engine::WorkflowEngine;
use crate::tool::registry::ToolRegistry;

/// Shared application state for the HTTP routes.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<WorkflowEngine>,
    pub registry: Arc<ToolRegistry>,
}
