//! Tool-manifest management endpoints.
//!
//! `PUT` re-registers a manifest at runtime, the graduation path that moves
//! a tool between in-process and remote execution with zero downtime.

use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
    routing::{get, put},
    Router,
};
use serde_json::{json, Value};

use crate::api::AppState;
use crate::tool::manifest::ToolManifest;

/// Create the tool management routes.
pub fn create_tool_routes() -> Router<AppState> {
    Router::new()
        .route("/api/v1/tools", get(list_tools))
        .route("/api/v1/tools", put(register_tool))
}

/// List all registered tool manifests.
///
/// GET /api/v1/tools
async fn list_tools(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "tools": state.registry.list() }))
}

/// Register or replace one tool manifest.
///
/// PUT /api/v1/tools
/// Body: { "name": "...", "target": "...", "input_schema": "...",
///         "output_schema": "..." }
async fn register_tool(
    State(state): State<AppState>,
    Json(manifest): Json<ToolManifest>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let name = manifest.name.clone();
    match state.registry.register(manifest) {
        Ok(()) => Ok(Json(json!({
            "name": name,
            "message": "tool registered"
        }))),
        Err(e) => {
            tracing::warn!("rejected manifest for '{}': {}", name, e);
            Err((
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({ "error": e.to_string() })),
            ))
        }
    }
}
