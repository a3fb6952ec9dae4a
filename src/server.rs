//! Server setup and initialization.
//!
//! Wires together all components (handlers, registry, client, task queue,
//! offload bridge, router, engine) and exposes the HTTP routes.

use anyhow::Result;
use axum::{routing::get, Router};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

use crate::{
    api::{
        search::create_search_routes,
        tools::create_tool_routes,
        AppState,
    },
    config::Config,
    llm::OpenAiChat,
    runtime::{
        engine::WorkflowEngine,
        offload::{OffloadBridge, TokioTaskQueue},
        router::SchemaRouter,
    },
    tool::{
        client::ToolClient,
        manifest::{default_manifests, load_manifest_file},
        registry::{ToolHandler, ToolRegistry},
    },
    tools::{AggregatorTool, AnalyticsTool, FlightSearchTool, ResponseBuilderTool},
};

/// Router decisions want determinism; the concierge wants a little colour.
const ROUTER_TEMPERATURE: f32 = 0.0;
const CONCIERGE_TEMPERATURE: f32 = 0.7;

/// Create the main Axum application with all routes.
pub async fn create_app(config: Config) -> Result<Router> {
    tracing::info!("initializing tool handlers");
    let answer_model = Arc::new(OpenAiChat::new(&config.llm, CONCIERGE_TEMPERATURE));
    let mut handlers: HashMap<String, Arc<dyn ToolHandler>> = HashMap::new();
    handlers.insert(
        "flight_search".to_string(),
        Arc::new(FlightSearchTool::new(&config.supplier)),
    );
    handlers.insert("aggregator".to_string(), Arc::new(AggregatorTool));
    handlers.insert("analytics".to_string(), Arc::new(AnalyticsTool));
    handlers.insert(
        "build_response".to_string(),
        Arc::new(ResponseBuilderTool::new(answer_model)),
    );

    tracing::info!("registering tool manifests");
    let registry = Arc::new(ToolRegistry::new(handlers));
    registry.register_all(default_manifests(&config.tools))?;
    if let Some(path) = &config.tools.manifest_path {
        let overrides = load_manifest_file(path)?;
        tracing::info!("applying {} manifest override(s) from {}", overrides.len(), path);
        registry.register_all(overrides)?;
    }

    tracing::info!("initializing workflow engine");
    let client = Arc::new(ToolClient::new(Duration::from_millis(
        config.tools.invoke_timeout_ms,
    )));
    let queue = Arc::new(TokioTaskQueue::new(
        Arc::clone(&registry),
        Arc::clone(&client),
    ));
    let bridge = Arc::new(OffloadBridge::new(
        queue,
        Duration::from_millis(config.offload.poll_interval_ms),
    ));
    let router_model = Arc::new(OpenAiChat::new(&config.llm, ROUTER_TEMPERATURE));
    let router = Arc::new(SchemaRouter::new(
        router_model,
        config.llm.router_max_attempts,
    ));
    let engine = Arc::new(WorkflowEngine::new(
        registry.clone(),
        client,
        router,
        bridge,
        Duration::from_millis(config.offload.await_timeout_ms),
    ));

    let app_state = AppState { engine, registry };

    let app = Router::new()
        .route("/healthz", get(health_check))
        .merge(create_search_routes().with_state(app_state.clone()))
        .merge(create_tool_routes().with_state(app_state));

    tracing::info!("application initialized");
    Ok(app)
}

/// Start the HTTP server with the given configuration.
pub async fn start_server(config: Config) -> Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .init();

    tracing::info!("starting fareflow server");

    let app = create_app(config.clone()).await?;

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&bind_addr).await?;
    tracing::info!("server listening on http://{}", bind_addr);

    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

/// Health check endpoint handler.
async fn health_check() -> &'static str {
    "ok"
}
