//! Tool layer: declarative manifests, the hot-swappable registry, and the
//! uniform invocation client.

pub mod client;
pub mod manifest;
pub mod registry;

pub use client::{FailureKind, ToolClient, ToolFailure};
pub use manifest::{FailurePolicy, ManifestError, SchemaId, ToolManifest};
pub use registry::{ToolHandle, ToolHandler, ToolRegistry, UnknownToolError};
