//! Per-run state threaded through the workflow.
//!
//! One `RunState` exists per inbound request and is owned exclusively by the
//! engine for the duration of the run. Step outputs are written at most once
//! and never mutated afterwards, so the trace stays unambiguous about which
//! step produced what.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

use crate::runtime::offload::OffloadTicket;
use crate::tool::client::ToolFailure;
use crate::tool::FailureKind;

/// Validated flight-search request, seeded into the run by the API boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    /// Origin IATA code, uppercase
    pub origin: String,
    /// Destination IATA code, uppercase
    pub destination: String,
    pub num_adults: u32,
    pub departure_date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_date: Option<NaiveDate>,
}

/// Outcome of one step, recorded in the trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    Succeeded,
    Failed,
    Skipped,
}

/// One trace entry. The trace is append-only; the engine never rewrites it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepTrace {
    pub step: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: StepOutcome,
}

/// A non-fatal step failure accumulated during the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepError {
    pub step: String,
    pub kind: FailureKind,
    pub message: String,
}

/// Where the run currently stands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running { step: String },
    Completed,
    Aborted { step: String, error: String },
}

/// The mutable record threaded through one workflow run.
#[derive(Debug, Clone, Serialize)]
pub struct RunState {
    run_id: Uuid,
    started_at: DateTime<Utc>,
    request: SearchRequest,
    /// Step name -> that step's structured output, present once the step ran
    outputs: HashMap<String, Value>,
    /// Offloaded steps submitted but not yet settled
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pending_offloads: HashMap<String, OffloadTicket>,
    errors: Vec<StepError>,
    trace: Vec<StepTrace>,
    status: RunStatus,
}

impl RunState {
    pub fn new(request: SearchRequest) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            request,
            outputs: HashMap::new(),
            pending_offloads: HashMap::new(),
            errors: Vec::new(),
            trace: Vec::new(),
            status: RunStatus::Pending,
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn request(&self) -> &SearchRequest {
        &self.request
    }

    pub fn status(&self) -> &RunStatus {
        &self.status
    }

    pub fn errors(&self) -> &[StepError] {
        &self.errors
    }

    pub fn trace(&self) -> &[StepTrace] {
        &self.trace
    }

    /// A step's structured output, if the step has produced one.
    pub fn output(&self, step: &str) -> Option<&Value> {
        self.outputs.get(step)
    }

    /// A step's output decoded into its wire model. `None` when absent.
    pub fn typed_output<T: serde::de::DeserializeOwned>(&self, step: &str) -> Option<T> {
        let value = self.outputs.get(step)?;
        serde_json::from_value(value.clone()).ok()
    }

    /// Record a step output. Returns `false` (and leaves the existing entry
    /// untouched) when the step already has one.
    pub fn record_output(&mut self, step: &str, output: Value) -> bool {
        if self.outputs.contains_key(step) {
            return false;
        }
        self.outputs.insert(step.to_string(), output);
        true
    }

    /// Park the ticket of an offloaded step until it settles.
    pub fn record_ticket(&mut self, step: &str, ticket: OffloadTicket) {
        self.pending_offloads.insert(step.to_string(), ticket);
    }

    /// Take back the ticket of an offloaded step, if one is pending.
    pub fn take_ticket(&mut self, step: &str) -> Option<OffloadTicket> {
        self.pending_offloads.remove(step)
    }

    /// Whether an offloaded step was submitted but has not settled yet.
    pub fn offload_pending(&self, step: &str) -> bool {
        self.pending_offloads.contains_key(step)
    }

    pub fn push_error(&mut self, step: &str, failure: &ToolFailure) {
        self.errors.push(StepError {
            step: step.to_string(),
            kind: failure.kind,
            message: failure.message.clone(),
        });
    }

    pub fn push_trace(&mut self, step: &str, started_at: DateTime<Utc>, outcome: StepOutcome) {
        self.trace.push(StepTrace {
            step: step.to_string(),
            started_at,
            finished_at: Utc::now(),
            outcome,
        });
    }

    pub fn set_running(&mut self, step: &str) {
        self.status = RunStatus::Running {
            step: step.to_string(),
        };
    }

    /// Mark the run finished. A run that already aborted stays aborted.
    pub fn complete(&mut self) {
        if !self.is_aborted() {
            self.status = RunStatus::Completed;
        }
    }

    pub fn abort(&mut self, step: &str, error: impl Into<String>) {
        self.status = RunStatus::Aborted {
            step: step.to_string(),
            error: error.into(),
        };
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self.status, RunStatus::Aborted { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request() -> SearchRequest {
        SearchRequest {
            origin: "LHR".to_string(),
            destination: "JFK".to_string(),
            num_adults: 1,
            departure_date: NaiveDate::from_ymd_opt(2024, 8, 10).unwrap(),
            return_date: None,
        }
    }

    #[test]
    fn outputs_are_write_once() {
        let mut state = RunState::new(request());
        assert!(state.record_output("search", json!([1])));
        assert!(!state.record_output("search", json!([2])));
        assert_eq!(state.output("search"), Some(&json!([1])));
    }

    #[test]
    fn completing_an_aborted_run_keeps_the_abort() {
        let mut state = RunState::new(request());
        state.abort("search", "unreachable: supplier down");
        state.complete();
        assert!(state.is_aborted());
    }

    #[test]
    fn errors_and_trace_accumulate_in_order() {
        let mut state = RunState::new(request());
        let started = Utc::now();
        state.push_trace("search", started, StepOutcome::Succeeded);
        state.push_trace("screenshot", started, StepOutcome::Failed);
        state.push_error("screenshot", &ToolFailure::timeout("no capture"));

        let steps: Vec<&str> = state.trace().iter().map(|t| t.step.as_str()).collect();
        assert_eq!(steps, vec!["search", "screenshot"]);
        assert_eq!(state.errors().len(), 1);
        assert_eq!(state.errors()[0].kind, FailureKind::Timeout);
    }
}
