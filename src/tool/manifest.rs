//! Declarative tool manifests.
//!
//! A manifest describes one tool: its unique name, where calls to it go
//! (an in-process handler or a remote HTTP endpoint), and which schemas its
//! input and output must satisfy. Changing only the `target` field moves a
//! tool between in-process and remote execution with no caller change.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::config::ToolsConfig;
use crate::runtime::state::SearchRequest;
use crate::tools::models::{Aggregation, Analytics, Quote, ResponseAnswer, ScreenshotRequest, ScreenshotResult};
use crate::tools::response::AnswerContext;

/// Scheme prefix for in-process handler references.
pub const LOCAL_SCHEME: &str = "local://";

/// Declarative description of one tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolManifest {
    /// Unique tool name; re-registering a name replaces the earlier entry
    pub name: String,
    /// `local://<handler>` or `http(s)://<host>/<path>`
    pub target: String,
    /// Schema identifier the input must satisfy
    pub input_schema: String,
    /// Schema identifier the output must satisfy
    pub output_schema: String,
    /// Per-invocation timeout; the client default applies when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Overrides the engine's default failure policy for the step backed by
    /// this tool
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_failure: Option<FailurePolicy>,
}

/// What the engine does when a step backed by this tool fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// The failure ends the run
    Abort,
    /// The failure is logged and the run continues without this output
    Degrade,
}

/// Parsed invocation target of a manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolTarget {
    /// In-process handler reference
    Local(String),
    /// Remote HTTP endpoint
    Remote(String),
}

impl ToolManifest {
    /// Parse and validate the `target` field.
    pub fn parse_target(&self) -> Result<ToolTarget, ManifestError> {
        if let Some(reference) = self.target.strip_prefix(LOCAL_SCHEME) {
            if reference.is_empty() || reference.contains('/') {
                return Err(ManifestError::MalformedTarget {
                    name: self.name.clone(),
                    target: self.target.clone(),
                });
            }
            return Ok(ToolTarget::Local(reference.to_string()));
        }
        if self.target.starts_with("http://") || self.target.starts_with("https://") {
            return match reqwest::Url::parse(&self.target) {
                Ok(_) => Ok(ToolTarget::Remote(self.target.clone())),
                Err(_) => Err(ManifestError::MalformedTarget {
                    name: self.name.clone(),
                    target: self.target.clone(),
                }),
            };
        }
        Err(ManifestError::MalformedTarget {
            name: self.name.clone(),
            target: self.target.clone(),
        })
    }
}

/// The closed set of schema identifiers a manifest may reference.
///
/// Each identifier is backed by a typed wire model; validation deserializes
/// the value against that model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchemaId {
    /// A validated flight-search request
    #[serde(rename = "flight.query")]
    FlightQuery,
    /// A list of supplier quotes
    #[serde(rename = "flight.quotes")]
    QuoteList,
    /// Aggregated quote statistics
    #[serde(rename = "quotes.aggregation")]
    Aggregation,
    /// Price analytics with histogram buckets
    #[serde(rename = "quotes.analytics")]
    AnalyticsReport,
    /// A batch of screenshot capture requests
    #[serde(rename = "capture.requests")]
    CaptureRequests,
    /// A batch of screenshot capture results
    #[serde(rename = "capture.results")]
    CaptureResults,
    /// The full context handed to the answer builder
    #[serde(rename = "answer.context")]
    AnswerContext,
    /// The concierge's markdown answer
    #[serde(rename = "answer.markdown")]
    AnswerMarkdown,
}

impl SchemaId {
    /// Check a value against the schema.
    pub fn validate(&self, value: &Value) -> Result<(), String> {
        match self {
            SchemaId::FlightQuery => check::<SearchRequest>(value),
            SchemaId::QuoteList => check::<Vec<Quote>>(value),
            SchemaId::Aggregation => check::<Aggregation>(value),
            SchemaId::AnalyticsReport => check::<Analytics>(value),
            SchemaId::CaptureRequests => check::<Vec<ScreenshotRequest>>(value),
            SchemaId::CaptureResults => check::<Vec<ScreenshotResult>>(value),
            SchemaId::AnswerContext => check::<AnswerContext>(value),
            SchemaId::AnswerMarkdown => check::<ResponseAnswer>(value),
        }
    }
}

fn check<T: serde::de::DeserializeOwned>(value: &Value) -> Result<(), String> {
    serde_json::from_value::<T>(value.clone())
        .map(|_| ())
        .map_err(|e| e.to_string())
}

impl FromStr for SchemaId {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(Value::String(s.to_string())).map_err(|_| ())
    }
}

impl fmt::Display for SchemaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_value(self) {
            Ok(Value::String(s)) => write!(f, "{}", s),
            _ => write!(f, "{:?}", self),
        }
    }
}

/// A manifest that cannot be registered. Fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("duplicate tool name in manifest document: {0}")]
    DuplicateName(String),
    #[error("malformed target for tool '{name}': {target}")]
    MalformedTarget { name: String, target: String },
    #[error("tool '{name}' references local handler '{handler}' but no such handler is installed")]
    UnknownHandler { name: String, handler: String },
    #[error("tool '{name}' references unknown schema '{schema}'")]
    UnknownSchema { name: String, schema: String },
    #[error("failed to read manifest file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse manifest file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Built-in manifests for the search workflow.
///
/// The capture service is the one tool that starts remote; everything else
/// begins in-process and can graduate by re-registering with an HTTP target.
pub fn default_manifests(tools: &ToolsConfig) -> Vec<ToolManifest> {
    vec![
        ToolManifest {
            name: "flight_search".to_string(),
            target: "local://flight_search".to_string(),
            input_schema: "flight.query".to_string(),
            output_schema: "flight.quotes".to_string(),
            timeout_ms: Some(20_000),
            on_failure: None,
        },
        ToolManifest {
            name: "aggregator".to_string(),
            target: "local://aggregator".to_string(),
            input_schema: "flight.quotes".to_string(),
            output_schema: "quotes.aggregation".to_string(),
            timeout_ms: None,
            on_failure: None,
        },
        ToolManifest {
            name: "analytics".to_string(),
            target: "local://analytics".to_string(),
            input_schema: "flight.quotes".to_string(),
            output_schema: "quotes.analytics".to_string(),
            timeout_ms: None,
            on_failure: None,
        },
        ToolManifest {
            name: "screenshot".to_string(),
            target: tools.capture_url.clone(),
            input_schema: "capture.requests".to_string(),
            output_schema: "capture.results".to_string(),
            timeout_ms: Some(60_000),
            on_failure: None,
        },
        ToolManifest {
            name: "build_response".to_string(),
            target: "local://build_response".to_string(),
            input_schema: "answer.context".to_string(),
            output_schema: "answer.markdown".to_string(),
            timeout_ms: Some(30_000),
            on_failure: None,
        },
    ]
}

/// Load a manifest document (a JSON array of manifests) from disk.
///
/// Names must be unique within one document; replacing an already-registered
/// tool is done by registering again, not by listing it twice.
pub fn load_manifest_file(path: impl AsRef<Path>) -> Result<Vec<ToolManifest>, ManifestError> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path).map_err(|source| ManifestError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let manifests: Vec<ToolManifest> =
        serde_json::from_str(&raw).map_err(|source| ManifestError::Parse {
            path: path.display().to_string(),
            source,
        })?;

    let mut seen = HashSet::new();
    for manifest in &manifests {
        if !seen.insert(manifest.name.clone()) {
            return Err(ManifestError::DuplicateName(manifest.name.clone()));
        }
    }

    Ok(manifests)
}
