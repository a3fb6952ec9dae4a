//! Configuration for the fareflow service.
//!
//! All knobs come from `FAREFLOW_*` environment variables with defaults
//! suitable for local development. The config object is built once in `main`
//! and passed down explicitly; core logic never reads the environment itself.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub supplier: SupplierConfig,
    pub llm: LlmConfig,
    pub offload: OffloadConfig,
    pub tools: ToolsConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Server port number
    pub port: u16,
}

/// Flight-quote supplier API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupplierConfig {
    /// Search endpoint of the supplier API
    pub base_url: String,
    /// Supplier API key, sent as the `apikey` header
    pub api_key: String,
    /// Quote currency
    pub currency: String,
    /// How many quotes to request per search
    pub limit: u32,
}

/// Chat-model configuration, shared by the router and the concierge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// OpenAI-compatible API base (without the `/chat/completions` suffix)
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    /// Bound on schema-guarded router attempts per decision
    pub router_max_attempts: usize,
}

/// Async offload tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OffloadConfig {
    /// Bound on waiting for an offloaded step when a dependent step needs it
    pub await_timeout_ms: u64,
    /// Queue polling interval while awaiting
    pub poll_interval_ms: u64,
}

/// Tool registration configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Optional JSON manifest document applied on top of the built-in set
    pub manifest_path: Option<String>,
    /// Default per-invocation timeout when a manifest declares none
    pub invoke_timeout_ms: u64,
    /// Remote endpoint of the screenshot capture service
    pub capture_url: String,
}

impl Default for Config {
    /// Default configuration with env-var support for container deployment.
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: env_or("FAREFLOW_HOST", "0.0.0.0"),
                port: env_parse("FAREFLOW_PORT", 8080),
            },
            supplier: SupplierConfig {
                base_url: env_or(
                    "FAREFLOW_SUPPLIER_URL",
                    "https://api.tequila.kiwi.com/v2/search",
                ),
                api_key: env_or("FAREFLOW_SUPPLIER_KEY", ""),
                currency: env_or("FAREFLOW_CURRENCY", "GBP"),
                limit: env_parse("FAREFLOW_SUPPLIER_LIMIT", 3),
            },
            llm: LlmConfig {
                base_url: env_or("FAREFLOW_LLM_URL", "https://api.openai.com/v1"),
                api_key: env_or("FAREFLOW_LLM_KEY", ""),
                model: env_or("FAREFLOW_LLM_MODEL", "gpt-4o-mini"),
                router_max_attempts: env_parse("FAREFLOW_ROUTER_ATTEMPTS", 3),
            },
            offload: OffloadConfig {
                await_timeout_ms: env_parse("FAREFLOW_OFFLOAD_TIMEOUT_MS", 30_000),
                poll_interval_ms: env_parse("FAREFLOW_OFFLOAD_POLL_MS", 50),
            },
            tools: ToolsConfig {
                manifest_path: std::env::var("FAREFLOW_MANIFESTS").ok(),
                invoke_timeout_ms: env_parse("FAREFLOW_INVOKE_TIMEOUT_MS", 20_000),
                capture_url: env_or("FAREFLOW_CAPTURE_URL", "http://capture:7000/screenshots"),
            },
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: FromStr + Copy>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(default)
}
