//! Hot-swappable tool registry.
//!
//! Manifests are validated and resolved into callable handles at
//! registration time; resolution afterwards is a lock-free snapshot read.
//! Re-registering a name atomically replaces its entry, so a tool can
//! graduate from in-process to remote execution while the service runs and
//! every later `resolve` sees the new target.

use arc_swap::ArcSwap;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::tool::client::ToolFailure;
use crate::tool::manifest::{FailurePolicy, ManifestError, SchemaId, ToolManifest, ToolTarget};

/// An in-process tool implementation.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, input: Value) -> Result<Value, ToolFailure>;
}

/// The calling convention behind a handle: either a direct handler call or a
/// remote HTTP round trip. Selected once at registration; callers hold only
/// the capability.
#[async_trait]
trait Invoker: Send + Sync {
    async fn invoke(&self, input: Value) -> Result<Value, ToolFailure>;
}

struct LocalInvoker {
    handler: Arc<dyn ToolHandler>,
}

#[async_trait]
impl Invoker for LocalInvoker {
    async fn invoke(&self, input: Value) -> Result<Value, ToolFailure> {
        self.handler.call(input).await
    }
}

struct RemoteInvoker {
    http: reqwest::Client,
    endpoint: String,
}

#[async_trait]
impl Invoker for RemoteInvoker {
    async fn invoke(&self, input: Value) -> Result<Value, ToolFailure> {
        let response = self
            .http
            .post(&self.endpoint)
            .json(&input)
            .send()
            .await
            .map_err(ToolFailure::from_transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(ToolFailure::handler_error(format!(
                "endpoint {} returned {}",
                self.endpoint, status
            )));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| ToolFailure::schema_mismatch(format!("undecodable response: {}", e)))
    }
}

struct ResolvedTool {
    manifest: ToolManifest,
    input_schema: SchemaId,
    output_schema: SchemaId,
    timeout: Option<Duration>,
    invoker: Box<dyn Invoker>,
}

/// Resolved, callable form of a manifest. Cheap to clone; rebuilt (and thereby
/// invalidated) whenever its manifest is re-registered.
#[derive(Clone)]
pub struct ToolHandle {
    inner: Arc<ResolvedTool>,
}

impl std::fmt::Debug for ToolHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolHandle")
            .field("name", &self.inner.manifest.name)
            .field("target", &self.inner.manifest.target)
            .finish()
    }
}

impl ToolHandle {
    pub fn name(&self) -> &str {
        &self.inner.manifest.name
    }

    pub fn target(&self) -> &str {
        &self.inner.manifest.target
    }

    pub fn input_schema(&self) -> SchemaId {
        self.inner.input_schema
    }

    pub fn output_schema(&self) -> SchemaId {
        self.inner.output_schema
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.inner.timeout
    }

    pub fn on_failure(&self) -> Option<FailurePolicy> {
        self.inner.manifest.on_failure
    }

    pub(crate) async fn invoke(&self, input: Value) -> Result<Value, ToolFailure> {
        self.inner.invoker.invoke(input).await
    }
}

/// Error for a lookup of a name nobody registered. A programming error, not a
/// runtime condition: the fixed plan only names tools installed at bootstrap.
#[derive(Debug, thiserror::Error)]
#[error("no tool registered under '{0}'")]
pub struct UnknownToolError(pub String);

/// Registry of resolved tools behind an atomic snapshot map.
pub struct ToolRegistry {
    /// In-process handler table, fixed at construction
    handlers: HashMap<String, Arc<dyn ToolHandler>>,
    /// Snapshot of resolved tools; replaced wholesale on every registration
    tools: ArcSwap<HashMap<String, ToolHandle>>,
    /// Shared HTTP client cloned into remote invokers
    http: reqwest::Client,
}

impl ToolRegistry {
    pub fn new(handlers: HashMap<String, Arc<dyn ToolHandler>>) -> Self {
        Self {
            handlers,
            tools: ArcSwap::new(Arc::new(HashMap::new())),
            http: reqwest::Client::new(),
        }
    }

    /// Validate and (re-)register a manifest.
    ///
    /// Registering an existing name replaces its entry; the previously
    /// resolved handle stays valid for calls already holding it but every
    /// later `resolve` returns the new target.
    pub fn register(&self, manifest: ToolManifest) -> Result<(), ManifestError> {
        let handle = self.build_handle(manifest)?;

        let current = self.tools.load();
        let mut next = (**current).clone();
        let replaced = next
            .insert(handle.name().to_string(), handle.clone())
            .is_some();
        self.tools.store(Arc::new(next));

        if replaced {
            tracing::info!("re-registered tool '{}' -> {}", handle.name(), handle.target());
        } else {
            tracing::info!("registered tool '{}' -> {}", handle.name(), handle.target());
        }
        Ok(())
    }

    /// Register a batch of manifests, stopping at the first bad one.
    pub fn register_all(&self, manifests: Vec<ToolManifest>) -> Result<(), ManifestError> {
        for manifest in manifests {
            self.register(manifest)?;
        }
        Ok(())
    }

    /// Resolve a tool name to its callable handle (lock-free snapshot read).
    pub fn resolve(&self, name: &str) -> Result<ToolHandle, UnknownToolError> {
        self.tools
            .load()
            .get(name)
            .cloned()
            .ok_or_else(|| UnknownToolError(name.to_string()))
    }

    /// All registered manifests, sorted by name.
    pub fn list(&self) -> Vec<ToolManifest> {
        let mut manifests: Vec<ToolManifest> = self
            .tools
            .load()
            .values()
            .map(|handle| handle.inner.manifest.clone())
            .collect();
        manifests.sort_by(|a, b| a.name.cmp(&b.name));
        manifests
    }

    fn build_handle(&self, manifest: ToolManifest) -> Result<ToolHandle, ManifestError> {
        let target = manifest.parse_target()?;

        let input_schema: SchemaId = manifest.input_schema.parse().map_err(|_| {
            ManifestError::UnknownSchema {
                name: manifest.name.clone(),
                schema: manifest.input_schema.clone(),
            }
        })?;
        let output_schema: SchemaId = manifest.output_schema.parse().map_err(|_| {
            ManifestError::UnknownSchema {
                name: manifest.name.clone(),
                schema: manifest.output_schema.clone(),
            }
        })?;

        let invoker: Box<dyn Invoker> = match target {
            ToolTarget::Local(reference) => {
                let handler = self.handlers.get(&reference).cloned().ok_or_else(|| {
                    ManifestError::UnknownHandler {
                        name: manifest.name.clone(),
                        handler: reference.clone(),
                    }
                })?;
                Box::new(LocalInvoker { handler })
            }
            ToolTarget::Remote(endpoint) => Box::new(RemoteInvoker {
                http: self.http.clone(),
                endpoint,
            }),
        };

        let timeout = manifest.timeout_ms.map(Duration::from_millis);
        Ok(ToolHandle {
            inner: Arc::new(ResolvedTool {
                manifest,
                input_schema,
                output_schema,
                timeout,
                invoker,
            }),
        })
    }
}
