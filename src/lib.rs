//! fareflow: flight-search orchestration service.
//!
//! A fixed-plan workflow engine coordinates independent tool capabilities
//! (supplier search, quote aggregation, screenshot capture, price analytics,
//! answer building) behind one orchestration layer. Tools are declared by
//! manifest and invoked uniformly whether they run in-process or behind HTTP;
//! the blocking capture step is offloaded to an async task queue so the
//! request path never waits on it longer than it must.

// Core configuration and setup
pub mod config;

// Tool layer - manifests, registry, and the uniform invocation client
pub mod tool;

// Tool implementations - supplier search, aggregation, analytics, answer building
pub mod tools;

// Orchestration runtime - run state, engine, schema-guarded router, offload bridge
pub mod runtime;

// Chat-completion client shared by the router and the concierge
pub mod llm;

// HTTP API layer - search endpoint and tool management
pub mod api;

// Server setup and initialization
pub mod server;

// Re-export commonly used types for external consumers
pub use config::Config;
pub use runtime::{RunState, RunStatus, SearchRequest, WorkflowEngine};
pub use server::start_server;
pub use tool::{ToolManifest, ToolRegistry};
