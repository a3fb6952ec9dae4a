//! Fixed-plan workflow engine.
//!
//! One search run walks an ordered step list: search → aggregate →
//! screenshot (offloaded) → analytics → route (schema-guarded) →
//! build_response. Each step resolves its tool through the registry and
//! invokes it through the client; the engine merges outputs into the run
//! state and is the sole place that decides abort vs. degrade. The
//! screenshot step is submitted to the task queue as soon as its inputs
//! exist and settled only when a later step needs the result, so capture
//! latency overlaps with the steps in between.

use chrono::Utc;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::runtime::offload::OffloadBridge;
use crate::runtime::router::{RouterAction, RouterDecision, SchemaRouter};
use crate::runtime::state::{RunState, SearchRequest, StepOutcome};
use crate::tool::client::{ToolClient, ToolFailure};
use crate::tool::manifest::FailurePolicy;
use crate::tool::registry::{ToolHandle, ToolRegistry};
use crate::tools::models::{Quote, ScreenshotRequest};
use crate::tools::response::AnswerContext;

/// How a step is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    /// Synchronous tool invocation through the client
    Tool,
    /// Submitted to the task queue, settled when a dependent step needs it
    Offload,
    /// The schema-guarded router decision
    Router,
}

/// What a step failure does to the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepPolicy {
    /// Failure aborts the run
    Critical,
    /// Failure is recorded and the run continues without this output
    Optional,
}

/// One position in the fixed plan.
pub struct StepDef {
    pub name: &'static str,
    /// Tool backing this step; `None` for the router position
    pub tool: Option<&'static str>,
    pub kind: StepKind,
    /// Engine default, overridable by the tool manifest's `on_failure`
    pub policy: StepPolicy,
    /// Offloaded steps that must be settled before this step's input is built
    pub needs: &'static [&'static str],
    /// Builds the step input from prior state; absent optional outputs
    /// degrade to empty sections
    pub input: fn(&RunState) -> Value,
    /// When present and false, the step is skipped
    pub gate: Option<fn(&RunState) -> bool>,
}

fn search_input(state: &RunState) -> Value {
    serde_json::to_value(state.request()).unwrap_or(Value::Null)
}

fn quotes_input(state: &RunState) -> Value {
    state.output("search").cloned().unwrap_or_else(|| json!([]))
}

fn screenshot_input(state: &RunState) -> Value {
    let quotes: Vec<Quote> = state.typed_output("search").unwrap_or_default();
    let requests: Vec<ScreenshotRequest> = quotes
        .into_iter()
        .map(|q| ScreenshotRequest { url: q.deep_link })
        .collect();
    serde_json::to_value(requests).unwrap_or_else(|_| json!([]))
}

fn null_input(_state: &RunState) -> Value {
    Value::Null
}

fn response_input(state: &RunState) -> Value {
    let directives = state
        .typed_output::<RouterDecision>("route")
        .map(|d| d.args)
        .unwrap_or_default();
    let context = AnswerContext {
        request: state.request().clone(),
        quotes: state.typed_output("search").unwrap_or_default(),
        aggregation: state.typed_output("aggregate"),
        analytics: state.typed_output("analytics"),
        screenshots: state.typed_output("screenshot").unwrap_or_default(),
        directives,
    };
    serde_json::to_value(context).unwrap_or(Value::Null)
}

fn response_gate(state: &RunState) -> bool {
    match state.typed_output::<RouterDecision>("route") {
        Some(decision) => decision.action == RouterAction::BuildResponse,
        None => false,
    }
}

/// The fixed plan for a flight-search run.
pub fn search_plan() -> Vec<StepDef> {
    vec![
        StepDef {
            name: "search",
            tool: Some("flight_search"),
            kind: StepKind::Tool,
            policy: StepPolicy::Critical,
            needs: &[],
            input: search_input,
            gate: None,
        },
        StepDef {
            name: "aggregate",
            tool: Some("aggregator"),
            kind: StepKind::Tool,
            policy: StepPolicy::Critical,
            needs: &[],
            input: quotes_input,
            gate: None,
        },
        StepDef {
            name: "screenshot",
            tool: Some("screenshot"),
            kind: StepKind::Offload,
            policy: StepPolicy::Optional,
            needs: &[],
            input: screenshot_input,
            gate: None,
        },
        StepDef {
            name: "analytics",
            tool: Some("analytics"),
            kind: StepKind::Tool,
            policy: StepPolicy::Optional,
            needs: &[],
            input: quotes_input,
            gate: None,
        },
        StepDef {
            name: "route",
            tool: None,
            kind: StepKind::Router,
            policy: StepPolicy::Critical,
            needs: &[],
            input: null_input,
            gate: None,
        },
        StepDef {
            name: "build_response",
            tool: Some("build_response"),
            kind: StepKind::Tool,
            policy: StepPolicy::Optional,
            needs: &["screenshot"],
            input: response_input,
            gate: Some(response_gate),
        },
    ]
}

/// Drives one run through the fixed plan.
pub struct WorkflowEngine {
    registry: Arc<ToolRegistry>,
    client: Arc<ToolClient>,
    router: Arc<SchemaRouter>,
    bridge: Arc<OffloadBridge>,
    /// Bound on settling an offloaded step when a dependent step needs it
    offload_timeout: Duration,
    plan: Vec<StepDef>,
}

impl WorkflowEngine {
    pub fn new(
        registry: Arc<ToolRegistry>,
        client: Arc<ToolClient>,
        router: Arc<SchemaRouter>,
        bridge: Arc<OffloadBridge>,
        offload_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            client,
            router,
            bridge,
            offload_timeout,
            plan: search_plan(),
        }
    }

    /// Execute one run to its terminal state.
    ///
    /// Always returns the run state: an abort is reported inside it, not as
    /// an `Err`, so the caller can serialize whatever was accumulated.
    pub async fn run(&self, request: SearchRequest) -> RunState {
        let mut state = RunState::new(request);
        let run_started = Instant::now();
        tracing::info!(
            "run {} started: {} -> {} on {}",
            state.run_id(),
            state.request().origin,
            state.request().destination,
            state.request().departure_date
        );

        // Effective policy of each offloaded step, captured at submit time.
        let mut offload_policies: HashMap<&'static str, StepPolicy> = HashMap::new();

        for step in &self.plan {
            for dep in step.needs {
                let policy = offload_policies
                    .remove(dep)
                    .unwrap_or(StepPolicy::Optional);
                if !self.settle(dep, policy, &mut state).await {
                    return state;
                }
            }

            if let Some(gate) = step.gate {
                if !gate(&state) {
                    tracing::info!("step '{}' skipped by gate", step.name);
                    state.push_trace(step.name, Utc::now(), StepOutcome::Skipped);
                    continue;
                }
            }

            state.set_running(step.name);
            let started_at = Utc::now();

            match step.kind {
                StepKind::Router => match self.router.decide(&state).await {
                    Ok(decision) => {
                        let output = serde_json::to_value(&decision).unwrap_or(Value::Null);
                        self.merge_output(step.name, output, &mut state);
                        state.push_trace(step.name, started_at, StepOutcome::Succeeded);
                    }
                    Err(e) => {
                        state.push_trace(step.name, started_at, StepOutcome::Failed);
                        let failure = ToolFailure::handler_error(e.to_string());
                        if !self.apply_failure(step.name, step.policy, failure, &mut state) {
                            return state;
                        }
                    }
                },
                StepKind::Offload => {
                    let Some(tool) = step.tool else { continue };
                    let handle = match self.resolve(tool, step.name, started_at, &mut state) {
                        Some(handle) => handle,
                        None => return state,
                    };
                    let policy = effective_policy(step, &handle);
                    let input = (step.input)(&state);
                    match self.bridge.submit(&handle, input).await {
                        Ok(ticket) => {
                            state.record_ticket(step.name, ticket);
                            offload_policies.insert(step.name, policy);
                        }
                        Err(failure) => {
                            state.push_trace(step.name, started_at, StepOutcome::Failed);
                            if !self.apply_failure(step.name, policy, failure, &mut state) {
                                return state;
                            }
                        }
                    }
                }
                StepKind::Tool => {
                    let Some(tool) = step.tool else { continue };
                    let handle = match self.resolve(tool, step.name, started_at, &mut state) {
                        Some(handle) => handle,
                        None => return state,
                    };
                    let policy = effective_policy(step, &handle);
                    let input = (step.input)(&state);
                    match self.client.invoke(&handle, input).await {
                        Ok(output) => {
                            self.merge_output(step.name, output, &mut state);
                            state.push_trace(step.name, started_at, StepOutcome::Succeeded);
                        }
                        Err(failure) => {
                            state.push_trace(step.name, started_at, StepOutcome::Failed);
                            if !self.apply_failure(step.name, policy, failure, &mut state) {
                                return state;
                            }
                        }
                    }
                }
            }
        }

        // Settle anything still in flight so the terminal state never holds a
        // dangling ticket.
        for step in &self.plan {
            if state.offload_pending(step.name) {
                let policy = offload_policies
                    .remove(step.name)
                    .unwrap_or(StepPolicy::Optional);
                if !self.settle(step.name, policy, &mut state).await {
                    return state;
                }
            }
        }

        state.complete();
        tracing::info!(
            "run {} completed in {:?} with {} error(s)",
            state.run_id(),
            run_started.elapsed(),
            state.errors().len()
        );
        state
    }

    /// Settle a pending offload ticket. Returns `false` when the failure was
    /// critical and the run aborted.
    async fn settle(&self, step: &str, policy: StepPolicy, state: &mut RunState) -> bool {
        let Some(ticket) = state.take_ticket(step) else {
            return true;
        };
        let started_at = ticket.submitted_at;
        match self.bridge.await_result(&ticket, self.offload_timeout).await {
            Ok(output) => {
                self.merge_output(step, output, state);
                state.push_trace(step, started_at, StepOutcome::Succeeded);
                true
            }
            Err(failure) => {
                state.push_trace(step, started_at, StepOutcome::Failed);
                self.apply_failure(step, policy, failure, state)
            }
        }
    }

    /// Apply a step failure per policy. Returns `false` when the run aborted.
    fn apply_failure(
        &self,
        step: &str,
        policy: StepPolicy,
        failure: ToolFailure,
        state: &mut RunState,
    ) -> bool {
        match policy {
            StepPolicy::Optional => {
                tracing::warn!("optional step '{}' degraded: {}", step, failure);
                state.push_error(step, &failure);
                true
            }
            StepPolicy::Critical => {
                tracing::error!("critical step '{}' failed, aborting run: {}", step, failure);
                state.abort(step, failure.to_string());
                false
            }
        }
    }

    fn merge_output(&self, step: &str, output: Value, state: &mut RunState) {
        if !state.record_output(step, output) {
            tracing::error!("step '{}' produced a second output; keeping the first", step);
        }
    }

    /// Resolve a tool or abort the run: the plan naming an unregistered tool
    /// is a programming error, not a recoverable condition.
    fn resolve(
        &self,
        tool: &str,
        step: &str,
        started_at: chrono::DateTime<Utc>,
        state: &mut RunState,
    ) -> Option<ToolHandle> {
        match self.registry.resolve(tool) {
            Ok(handle) => Some(handle),
            Err(e) => {
                tracing::error!("aborting run: {}", e);
                state.push_trace(step, started_at, StepOutcome::Failed);
                state.abort(step, e.to_string());
                None
            }
        }
    }
}

fn effective_policy(step: &StepDef, handle: &ToolHandle) -> StepPolicy {
    match handle.on_failure() {
        Some(FailurePolicy::Abort) => StepPolicy::Critical,
        Some(FailurePolicy::Degrade) => StepPolicy::Optional,
        None => step.policy,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ChatModel, LlmError};
    use crate::runtime::state::{RunStatus, StepOutcome};
    use crate::tool::client::FailureKind;
    use crate::tool::manifest::ToolManifest;
    use crate::tool::registry::ToolHandler;
    use crate::tools::aggregator::AggregatorTool;
    use crate::tools::analytics::AnalyticsTool;
    use async_trait::async_trait;
    use chrono::NaiveDate;

    struct StaticTool(Value);

    #[async_trait]
    impl ToolHandler for StaticTool {
        async fn call(&self, _input: Value) -> Result<Value, ToolFailure> {
            Ok(self.0.clone())
        }
    }

    struct FailingTool(ToolFailure);

    #[async_trait]
    impl ToolHandler for FailingTool {
        async fn call(&self, _input: Value) -> Result<Value, ToolFailure> {
            Err(self.0.clone())
        }
    }

    struct StallingTool;

    #[async_trait]
    impl ToolHandler for StallingTool {
        async fn call(&self, _input: Value) -> Result<Value, ToolFailure> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(json!([]))
        }
    }

    struct FixedModel(&'static str);

    #[async_trait]
    impl ChatModel for FixedModel {
        async fn complete(&self, _system: &str, _user: &str) -> Result<String, LlmError> {
            Ok(self.0.to_string())
        }
    }

    fn request() -> SearchRequest {
        SearchRequest {
            origin: "LHR".to_string(),
            destination: "JFK".to_string(),
            num_adults: 1,
            departure_date: NaiveDate::from_ymd_opt(2024, 8, 10).unwrap(),
            return_date: None,
        }
    }

    fn quotes_value() -> Value {
        json!([
            {
                "price": 320,
                "departure": "2024-08-10T06:30:00",
                "arrival": "2024-08-10T09:45:00",
                "carriers": ["BA"],
                "stops": 0,
                "deep_link": "https://example.test/book/1"
            },
            {
                "price": 410,
                "departure": "2024-08-10T11:00:00",
                "arrival": "2024-08-10T16:10:00",
                "carriers": ["VS", "DL"],
                "stops": 1,
                "deep_link": "https://example.test/book/2"
            }
        ])
    }

    fn captures_value() -> Value {
        json!([{
            "original_url": "https://example.test/book/1",
            "screenshot_url": "https://shots.test/1.png"
        }])
    }

    fn answer_value() -> Value {
        json!({"markdown": "# Flights\nAll good."})
    }

    fn manifest(name: &str, handler: &str, input: &str, output: &str) -> ToolManifest {
        ToolManifest {
            name: name.to_string(),
            target: format!("local://{}", handler),
            input_schema: input.to_string(),
            output_schema: output.to_string(),
            timeout_ms: None,
            on_failure: None,
        }
    }

    struct Harness {
        search: Arc<dyn ToolHandler>,
        screenshot: Arc<dyn ToolHandler>,
        router_reply: &'static str,
        offload_timeout: Duration,
    }

    impl Default for Harness {
        fn default() -> Self {
            Self {
                search: Arc::new(StaticTool(quotes_value())),
                screenshot: Arc::new(StaticTool(captures_value())),
                router_reply: "{\"action\": \"build_response\"}",
                offload_timeout: Duration::from_secs(2),
            }
        }
    }

    impl Harness {
        fn engine(self) -> WorkflowEngine {
            let mut handlers: HashMap<String, Arc<dyn ToolHandler>> = HashMap::new();
            handlers.insert("flight_search".to_string(), self.search);
            handlers.insert("aggregator".to_string(), Arc::new(AggregatorTool));
            handlers.insert("analytics".to_string(), Arc::new(AnalyticsTool));
            handlers.insert("screenshot".to_string(), self.screenshot);
            handlers.insert(
                "build_response".to_string(),
                Arc::new(StaticTool(answer_value())),
            );

            let registry = Arc::new(ToolRegistry::new(handlers));
            registry
                .register_all(vec![
                    manifest("flight_search", "flight_search", "flight.query", "flight.quotes"),
                    manifest("aggregator", "aggregator", "flight.quotes", "quotes.aggregation"),
                    manifest("analytics", "analytics", "flight.quotes", "quotes.analytics"),
                    manifest("screenshot", "screenshot", "capture.requests", "capture.results"),
                    manifest("build_response", "build_response", "answer.context", "answer.markdown"),
                ])
                .unwrap();

            let client = Arc::new(ToolClient::new(Duration::from_secs(5)));
            let queue = Arc::new(crate::runtime::offload::TokioTaskQueue::new(
                Arc::clone(&registry),
                Arc::clone(&client),
            ));
            let bridge = Arc::new(OffloadBridge::new(queue, Duration::from_millis(10)));
            let router = Arc::new(SchemaRouter::new(Arc::new(FixedModel(self.router_reply)), 3));

            WorkflowEngine::new(registry, client, router, bridge, self.offload_timeout)
        }
    }

    #[tokio::test]
    async fn successful_run_fills_every_output() {
        let engine = Harness::default().engine();
        let state = engine.run(request()).await;

        assert_eq!(state.status(), &RunStatus::Completed);
        assert!(state.errors().is_empty());
        for step in ["search", "aggregate", "screenshot", "analytics", "route", "build_response"] {
            assert!(state.output(step).is_some(), "missing output for {}", step);
        }
    }

    #[tokio::test]
    async fn critical_search_failure_aborts_before_later_steps() {
        let engine = Harness {
            search: Arc::new(FailingTool(ToolFailure::unreachable("supplier down"))),
            ..Harness::default()
        }
        .engine();
        let state = engine.run(request()).await;

        match state.status() {
            RunStatus::Aborted { step, error } => {
                assert_eq!(step, "search");
                assert!(error.contains("unreachable"));
            }
            other => panic!("expected abort, got {:?}", other),
        }
        for step in ["search", "aggregate", "screenshot", "analytics", "route", "build_response"] {
            assert!(state.output(step).is_none());
        }
    }

    #[tokio::test]
    async fn failing_screenshot_degrades_and_the_run_completes() {
        let engine = Harness {
            screenshot: Arc::new(FailingTool(ToolFailure::handler_error("render crashed"))),
            ..Harness::default()
        }
        .engine();
        let state = engine.run(request()).await;

        assert_eq!(state.status(), &RunStatus::Completed);
        assert!(state.output("screenshot").is_none());
        assert_eq!(state.errors().len(), 1);
        assert_eq!(state.errors()[0].step, "screenshot");
        assert!(state.output("build_response").is_some());
    }

    #[tokio::test]
    async fn stalled_screenshot_times_out_and_degrades() {
        let engine = Harness {
            screenshot: Arc::new(StallingTool),
            offload_timeout: Duration::from_millis(100),
            ..Harness::default()
        }
        .engine();
        let state = engine.run(request()).await;

        assert_eq!(state.status(), &RunStatus::Completed);
        assert!(state.output("screenshot").is_none());
        assert_eq!(state.errors().len(), 1);
        assert_eq!(state.errors()[0].kind, FailureKind::Timeout);
        for step in ["search", "aggregate", "analytics", "route", "build_response"] {
            assert!(state.output(step).is_some(), "missing output for {}", step);
        }
    }

    #[tokio::test]
    async fn finish_decision_skips_the_answer_builder() {
        let engine = Harness {
            router_reply: "{\"action\": \"finish\"}",
            ..Harness::default()
        }
        .engine();
        let state = engine.run(request()).await;

        assert_eq!(state.status(), &RunStatus::Completed);
        assert!(state.output("build_response").is_none());
        let skipped = state
            .trace()
            .iter()
            .find(|t| t.step == "build_response")
            .unwrap();
        assert_eq!(skipped.outcome, StepOutcome::Skipped);
    }

    #[tokio::test]
    async fn exhausted_router_aborts_at_the_route_position() {
        let engine = Harness {
            router_reply: "cannot answer in JSON, sorry",
            ..Harness::default()
        }
        .engine();
        let state = engine.run(request()).await;

        match state.status() {
            RunStatus::Aborted { step, .. } => assert_eq!(step, "route"),
            other => panic!("expected abort at route, got {:?}", other),
        }
        // outputs produced before the route position survive for diagnosis
        assert!(state.output("search").is_some());
        assert!(state.output("aggregate").is_some());
        assert!(state.output("build_response").is_none());
    }

    #[tokio::test]
    async fn manifest_policy_override_turns_screenshot_critical() {
        let engine = Harness {
            screenshot: Arc::new(FailingTool(ToolFailure::handler_error("render crashed"))),
            ..Harness::default()
        }
        .engine();
        engine
            .registry
            .register(ToolManifest {
                name: "screenshot".to_string(),
                target: "local://screenshot".to_string(),
                input_schema: "capture.requests".to_string(),
                output_schema: "capture.results".to_string(),
                timeout_ms: None,
                on_failure: Some(FailurePolicy::Abort),
            })
            .unwrap();

        let state = engine.run(request()).await;
        match state.status() {
            RunStatus::Aborted { step, .. } => assert_eq!(step, "screenshot"),
            other => panic!("expected abort at screenshot, got {:?}", other),
        }
        assert!(state.output("build_response").is_none());
    }
}
