//! Uniform tool invocation.
//!
//! The client takes a resolved [`ToolHandle`] and a structured input, checks
//! the input against the manifest-declared schema, runs the handle's invoker
//! under a bounded timeout, and checks the output schema on the way back.
//! Whether the invoker crosses the network is the handle's business; callers
//! never branch on it. The client makes no retry decision; only the engine
//! knows whether a step is idempotent.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::{Duration, Instant};

use crate::tool::registry::ToolHandle;

/// Why a tool invocation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The invocation exceeded its time budget
    Timeout,
    /// The endpoint could not be reached at all
    Unreachable,
    /// Input or output violated the declared schema
    SchemaMismatch,
    /// The handler ran and reported an error
    HandlerError,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::Timeout => "timeout",
            FailureKind::Unreachable => "unreachable",
            FailureKind::SchemaMismatch => "schema_mismatch",
            FailureKind::HandlerError => "handler_error",
        };
        write!(f, "{}", s)
    }
}

/// Typed failure returned by every tool invocation path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ToolFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl ToolFailure {
    pub fn timeout(message: impl Into<String>) -> Self {
        Self { kind: FailureKind::Timeout, message: message.into() }
    }

    pub fn unreachable(message: impl Into<String>) -> Self {
        Self { kind: FailureKind::Unreachable, message: message.into() }
    }

    pub fn schema_mismatch(message: impl Into<String>) -> Self {
        Self { kind: FailureKind::SchemaMismatch, message: message.into() }
    }

    pub fn handler_error(message: impl Into<String>) -> Self {
        Self { kind: FailureKind::HandlerError, message: message.into() }
    }

    /// Classify a reqwest transport error.
    pub fn from_transport(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::timeout(err.to_string())
        } else if err.is_connect() {
            Self::unreachable(err.to_string())
        } else if err.is_decode() {
            Self::schema_mismatch(err.to_string())
        } else {
            Self::unreachable(err.to_string())
        }
    }
}

/// Uniform invocation interface over resolved tool handles.
pub struct ToolClient {
    default_timeout: Duration,
}

impl ToolClient {
    pub fn new(default_timeout: Duration) -> Self {
        Self { default_timeout }
    }

    /// Invoke a tool with a structured input.
    ///
    /// Both the input and the output are validated against the schemas the
    /// tool's manifest declared, for in-process and remote targets alike.
    pub async fn invoke(&self, handle: &ToolHandle, input: Value) -> Result<Value, ToolFailure> {
        handle.input_schema().validate(&input).map_err(|e| {
            ToolFailure::schema_mismatch(format!(
                "input for '{}' rejected by {}: {}",
                handle.name(),
                handle.input_schema(),
                e
            ))
        })?;

        let budget = handle.timeout().unwrap_or(self.default_timeout);
        let started = Instant::now();
        tracing::debug!("invoking tool '{}' ({})", handle.name(), handle.target());

        let outcome = match tokio::time::timeout(budget, handle.invoke(input)).await {
            Ok(result) => result,
            Err(_) => Err(ToolFailure::timeout(format!(
                "tool '{}' exceeded its {}ms budget",
                handle.name(),
                budget.as_millis()
            ))),
        };

        let output = match outcome {
            Ok(output) => output,
            Err(failure) => {
                tracing::warn!(
                    "tool '{}' failed after {:?}: {}",
                    handle.name(),
                    started.elapsed(),
                    failure
                );
                return Err(failure);
            }
        };

        handle.output_schema().validate(&output).map_err(|e| {
            ToolFailure::schema_mismatch(format!(
                "output of '{}' rejected by {}: {}",
                handle.name(),
                handle.output_schema(),
                e
            ))
        })?;

        tracing::info!("tool '{}' completed in {:?}", handle.name(), started.elapsed());
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::manifest::ToolManifest;
    use crate::tool::registry::{ToolHandler, ToolRegistry};
    use async_trait::async_trait;
    use axum::{routing::post, Json, Router};
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Arc;

    struct StaticTool(Value);

    #[async_trait]
    impl ToolHandler for StaticTool {
        async fn call(&self, _input: Value) -> Result<Value, ToolFailure> {
            Ok(self.0.clone())
        }
    }

    struct SleepyTool;

    #[async_trait]
    impl ToolHandler for SleepyTool {
        async fn call(&self, _input: Value) -> Result<Value, ToolFailure> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(json!([]))
        }
    }

    fn quotes_value() -> Value {
        json!([{
            "price": 120,
            "departure": "2024-08-10T06:30:00",
            "arrival": "2024-08-10T09:45:00",
            "carriers": ["BA"],
            "stops": 0,
            "deep_link": "https://example.test/book/1"
        }])
    }

    fn echo_manifest(name: &str, target: &str) -> ToolManifest {
        ToolManifest {
            name: name.to_string(),
            target: target.to_string(),
            input_schema: "flight.quotes".to_string(),
            output_schema: "flight.quotes".to_string(),
            timeout_ms: None,
            on_failure: None,
        }
    }

    fn registry_with(handlers: Vec<(&str, Arc<dyn ToolHandler>)>) -> ToolRegistry {
        let handlers: HashMap<String, Arc<dyn ToolHandler>> = handlers
            .into_iter()
            .map(|(name, handler)| (name.to_string(), handler))
            .collect();
        ToolRegistry::new(handlers)
    }

    #[tokio::test]
    async fn local_invocation_returns_handler_output() {
        let registry = registry_with(vec![("echo", Arc::new(StaticTool(quotes_value())))]);
        registry.register(echo_manifest("echo", "local://echo")).unwrap();

        let client = ToolClient::new(Duration::from_secs(5));
        let handle = registry.resolve("echo").unwrap();
        let output = client.invoke(&handle, quotes_value()).await.unwrap();
        assert_eq!(output, quotes_value());
    }

    #[tokio::test]
    async fn schema_violating_output_is_a_mismatch() {
        let registry = registry_with(vec![("bad", Arc::new(StaticTool(json!({"quotes": 1}))))]);
        registry.register(echo_manifest("bad", "local://bad")).unwrap();

        let client = ToolClient::new(Duration::from_secs(5));
        let handle = registry.resolve("bad").unwrap();
        let failure = client.invoke(&handle, quotes_value()).await.unwrap_err();
        assert_eq!(failure.kind, FailureKind::SchemaMismatch);
    }

    #[tokio::test]
    async fn schema_violating_input_is_rejected_before_invocation() {
        let registry = registry_with(vec![("echo", Arc::new(StaticTool(quotes_value())))]);
        registry.register(echo_manifest("echo", "local://echo")).unwrap();

        let client = ToolClient::new(Duration::from_secs(5));
        let handle = registry.resolve("echo").unwrap();
        let failure = client.invoke(&handle, json!("not quotes")).await.unwrap_err();
        assert_eq!(failure.kind, FailureKind::SchemaMismatch);
    }

    #[tokio::test]
    async fn slow_handler_times_out() {
        let registry = registry_with(vec![("slow", Arc::new(SleepyTool))]);
        registry.register(echo_manifest("slow", "local://slow")).unwrap();

        let client = ToolClient::new(Duration::from_millis(50));
        let handle = registry.resolve("slow").unwrap();
        let failure = client.invoke(&handle, quotes_value()).await.unwrap_err();
        assert_eq!(failure.kind, FailureKind::Timeout);
    }

    #[tokio::test]
    async fn remote_invocation_round_trips_json() {
        let app = Router::new().route(
            "/tool",
            post(|Json(input): Json<Value>| async move { Json(input) }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let registry = registry_with(vec![]);
        registry
            .register(echo_manifest("remote", &format!("http://{}/tool", addr)))
            .unwrap();

        let client = ToolClient::new(Duration::from_secs(5));
        let handle = registry.resolve("remote").unwrap();
        let output = client.invoke(&handle, quotes_value()).await.unwrap();
        assert_eq!(output, quotes_value());
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_classified() {
        let registry = registry_with(vec![]);
        registry
            .register(echo_manifest("down", "http://127.0.0.1:1/tool"))
            .unwrap();

        let client = ToolClient::new(Duration::from_secs(5));
        let handle = registry.resolve("down").unwrap();
        let failure = client.invoke(&handle, quotes_value()).await.unwrap_err();
        assert_eq!(failure.kind, FailureKind::Unreachable);
    }

    #[tokio::test]
    async fn remote_schema_mismatch_is_classified() {
        let app = Router::new().route(
            "/tool",
            post(|| async { Json(json!({"unexpected": true})) }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let registry = registry_with(vec![]);
        registry
            .register(echo_manifest("remote", &format!("http://{}/tool", addr)))
            .unwrap();

        let client = ToolClient::new(Duration::from_secs(5));
        let handle = registry.resolve("remote").unwrap();
        let failure = client.invoke(&handle, quotes_value()).await.unwrap_err();
        assert_eq!(failure.kind, FailureKind::SchemaMismatch);
    }
}
