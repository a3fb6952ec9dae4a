//! Schema-guarded routing step.
//!
//! The router asks a chat model how the run should finish and refuses to act
//! on anything that does not parse into the closed [`RouterDecision`] layout.
//! Parse failures re-issue the model call with the failure quoted back, up to
//! a bound; exhaustion is a critical failure at the route position. The model
//! behind the loop is the [`ChatModel`] seam, so the retry logic itself is
//! deterministic under test.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

use crate::llm::ChatModel;
use crate::runtime::state::RunState;
use crate::tools::models::{Quote, ScreenshotResult};

/// Structured arguments for the `build_response` action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseDirectives {
    /// How many of the cheapest quotes the answer table should show
    #[serde(default = "default_top_quotes")]
    pub top_quotes: usize,
    /// Whether to embed screenshot references in the answer
    #[serde(default = "default_include_screenshots")]
    pub include_screenshots: bool,
}

fn default_top_quotes() -> usize {
    5
}

fn default_include_screenshots() -> bool {
    true
}

impl Default for ResponseDirectives {
    fn default() -> Self {
        Self {
            top_quotes: default_top_quotes(),
            include_screenshots: default_include_screenshots(),
        }
    }
}

/// The closed set of actions the router may choose at the route position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouterAction {
    BuildResponse,
    Finish,
}

/// Parsed, schema-validated router output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouterDecision {
    pub action: RouterAction,
    #[serde(default)]
    pub args: ResponseDirectives,
}

#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("router exhausted after {attempts} attempts: {last_error}")]
    Exhausted { attempts: usize, last_error: String },
}

const SYSTEM_PROMPT: &str = "\
You are the fareflow route planner.
Given `state_json`, decide how the run should finish.

Return exactly one JSON object, nothing else:
  {\"action\": \"build_response\", \"args\": {\"top_quotes\": 5, \"include_screenshots\": true}}
or
  {\"action\": \"finish\"}

Decision rules:
  - if quotes were found, choose build_response
  - top_quotes is how many of the cheapest quotes the answer shows (1-10, default 5)
  - set include_screenshots to false when the state recorded a screenshot failure
  - choose finish only when there is nothing worth presenting";

/// The router step: a bounded retry loop around one model decision.
pub struct SchemaRouter {
    model: Arc<dyn ChatModel>,
    max_attempts: usize,
}

impl SchemaRouter {
    pub fn new(model: Arc<dyn ChatModel>, max_attempts: usize) -> Self {
        Self {
            model,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Ask the model for a decision, retrying on schema violation.
    pub async fn decide(&self, state: &RunState) -> Result<RouterDecision, RouterError> {
        let snapshot = state_snapshot(state);
        let mut last_error = String::new();

        for attempt in 1..=self.max_attempts {
            let user = if attempt == 1 {
                snapshot.clone()
            } else {
                format!(
                    "{}\n\nYour previous reply was rejected: {}\nReturn exactly one JSON object matching the required layout.",
                    snapshot, last_error
                )
            };

            let raw = match self.model.complete(SYSTEM_PROMPT, &user).await {
                Ok(raw) => raw,
                Err(e) => {
                    last_error = e.to_string();
                    tracing::warn!(
                        "router model call failed (attempt {}/{}): {}",
                        attempt,
                        self.max_attempts,
                        last_error
                    );
                    continue;
                }
            };

            match parse_decision(&raw) {
                Ok(decision) => {
                    tracing::info!("router chose {:?} on attempt {}", decision.action, attempt);
                    return Ok(decision);
                }
                Err(e) => {
                    last_error = e;
                    tracing::warn!(
                        "router output rejected (attempt {}/{}): {}",
                        attempt,
                        self.max_attempts,
                        last_error
                    );
                }
            }
        }

        Err(RouterError::Exhausted {
            attempts: self.max_attempts,
            last_error,
        })
    }
}

/// Parse a raw model completion into a decision.
///
/// Tolerates markdown code fences and prose around the JSON object; the
/// object itself must match the decision layout.
pub fn parse_decision(raw: &str) -> Result<RouterDecision, String> {
    let start = raw.find('{').ok_or_else(|| "no JSON object in reply".to_string())?;
    let end = raw.rfind('}').ok_or_else(|| "unterminated JSON object".to_string())?;
    if end < start {
        return Err("unterminated JSON object".to_string());
    }
    serde_json::from_str(&raw[start..=end]).map_err(|e| e.to_string())
}

fn state_snapshot(state: &RunState) -> String {
    let quotes: Vec<Quote> = state.typed_output("search").unwrap_or_default();
    let captured = state
        .typed_output::<Vec<ScreenshotResult>>("screenshot")
        .map(|shots| shots.iter().filter(|s| s.is_usable()).count())
        .unwrap_or(0);
    let errors: Vec<String> = state
        .errors()
        .iter()
        .map(|e| format!("{}: {}", e.step, e.kind))
        .collect();

    let snapshot = json!({
        "origin": state.request().origin,
        "destination": state.request().destination,
        "departure_date": state.request().departure_date,
        "quotes_found": quotes.len(),
        "aggregated": state.output("aggregate").is_some(),
        "analytics": state.output("analytics").is_some(),
        "screenshots_captured": captured,
        "screenshot_pending": state.offload_pending("screenshot"),
        "errors": errors,
    });

    format!("state_json:\n{}", snapshot)
}
