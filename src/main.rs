//! fareflow: flight-search orchestration service.
//!
//! Main entry point. Loads configuration from the environment and starts the
//! HTTP server with the search workflow and tool management endpoints.

use fareflow::{config::Config, server::start_server};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::default();
    start_server(config).await?;
    Ok(())
}
