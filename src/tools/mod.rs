//! Tool implementations for the flight-search workflow.
//!
//! The screenshot capture service has no in-process implementation; its
//! manifest targets the remote renderer and its wire models live in
//! [`models`].

pub mod aggregator;
pub mod analytics;
pub mod flight_search;
pub mod models;
pub mod response;

pub use aggregator::AggregatorTool;
pub use analytics::AnalyticsTool;
pub use flight_search::FlightSearchTool;
pub use response::ResponseBuilderTool;
