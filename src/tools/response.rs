//! Concierge answer builder.
//!
//! Turns the accumulated run outputs into a traveller-facing markdown answer
//! via a chat-model call. The step is optional: screenshots and analytics may
//! be absent and the builder degrades to whatever the run collected.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::llm::ChatModel;
use crate::runtime::router::ResponseDirectives;
use crate::runtime::state::SearchRequest;
use crate::tool::client::ToolFailure;
use crate::tool::registry::ToolHandler;
use crate::tools::models::{Aggregation, Analytics, Quote, ResponseAnswer, ScreenshotResult};

/// Everything the concierge sees when drafting the final answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerContext {
    pub request: SearchRequest,
    #[serde(default)]
    pub quotes: Vec<Quote>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregation: Option<Aggregation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analytics: Option<Analytics>,
    #[serde(default)]
    pub screenshots: Vec<ScreenshotResult>,
    #[serde(default)]
    pub directives: ResponseDirectives,
}

const CONCIERGE_PROMPT: &str = "\
You are a friendly travel concierge.
Return markdown with:
- a short summary paragraph
- a table of the cheapest quotes (price, carriers, stops, departure)
- an image reference for every screenshot URL you are given
Do not invent quotes or screenshots that are not in the brief.";

pub struct ResponseBuilderTool {
    model: Arc<dyn ChatModel>,
}

impl ResponseBuilderTool {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self { model }
    }
}

#[async_trait]
impl ToolHandler for ResponseBuilderTool {
    async fn call(&self, input: Value) -> Result<Value, ToolFailure> {
        let context: AnswerContext = serde_json::from_value(input)
            .map_err(|e| ToolFailure::schema_mismatch(format!("expected answer context: {}", e)))?;

        let brief = render_brief(&context);
        let markdown = self
            .model
            .complete(CONCIERGE_PROMPT, &brief)
            .await
            .map_err(|e| ToolFailure::handler_error(format!("concierge model: {}", e)))?;

        serde_json::to_value(ResponseAnswer { markdown })
            .map_err(|e| ToolFailure::handler_error(format!("unserializable answer: {}", e)))
    }
}

/// Render the model brief: the cheapest quotes per the directives, plus
/// whatever aggregation, analytics and usable screenshots the run collected.
fn render_brief(context: &AnswerContext) -> String {
    let mut quotes = context.quotes.clone();
    quotes.sort_by_key(|q| q.price);
    quotes.truncate(context.directives.top_quotes.clamp(1, 10));

    let screenshots: Vec<&str> = if context.directives.include_screenshots {
        context
            .screenshots
            .iter()
            .filter(|shot| shot.is_usable())
            .map(|shot| shot.screenshot_url.as_str())
            .collect()
    } else {
        Vec::new()
    };

    let brief = json!({
        "request": context.request,
        "quotes": quotes,
        "aggregation": context.aggregation,
        "analytics": context.analytics,
        "screenshots": screenshots,
    });

    format!(
        "Draft the traveller answer from this search state:\n{}",
        serde_json::to_string_pretty(&brief).unwrap_or_else(|_| brief.to_string())
    )
}
