//! Orchestration runtime: run state, the fixed-plan engine, the
//! schema-guarded router, and the async offload bridge.

pub mod engine;
pub mod offload;
pub mod router;
pub mod state;

pub use engine::WorkflowEngine;
pub use offload::{OffloadBridge, OffloadTicket, TaskQueue, TokioTaskQueue};
pub use router::{RouterDecision, SchemaRouter};
pub use state::{RunState, RunStatus, SearchRequest};
