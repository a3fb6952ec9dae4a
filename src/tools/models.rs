//! Wire models shared by the flight tools.
//!
//! These are the structured payloads that cross tool boundaries: supplier
//! quotes, aggregation stats, price analytics, and screenshot capture
//! requests/results. All prices are whole GBP.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One bookable flight option returned by the supplier search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    /// Total price in GBP
    pub price: i64,
    /// Local departure timestamp of the first segment
    pub departure: String,
    /// Local arrival timestamp of the last segment
    pub arrival: String,
    /// Distinct operating carriers across all segments
    pub carriers: Vec<String>,
    /// Number of stops (segment count minus one)
    pub stops: usize,
    /// Supplier booking link, also the screenshot capture target
    pub deep_link: String,
}

/// Per-carrier price summary inside an [`Aggregation`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CarrierStats {
    pub count: u32,
    pub min: i64,
    pub max: i64,
}

/// Price stats across all quotes, presented by the concierge as a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aggregation {
    pub cheapest: i64,
    pub average: f64,
    pub most_expensive: i64,
    /// Sorted list of all carriers seen across the quotes
    pub carriers: Vec<String>,
    pub by_carrier: BTreeMap<String, CarrierStats>,
}

/// One histogram bar of a price distribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceBucket {
    /// Inclusive GBP price bracket
    pub range: (i64, i64),
    pub count: usize,
    /// Deep link of one quote in the bracket
    pub sample: String,
}

/// Histogram and spread of quote prices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analytics {
    pub min_price: i64,
    pub max_price: i64,
    pub median_price: f64,
    pub buckets: Vec<PriceBucket>,
}

/// A page the capture service should screenshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreenshotRequest {
    pub url: String,
}

/// Outcome of one capture. `screenshot_url` is empty when the capture failed;
/// `error` carries the reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreenshotResult {
    pub original_url: String,
    #[serde(default)]
    pub screenshot_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ScreenshotResult {
    /// A capture usable in the final answer.
    pub fn is_usable(&self) -> bool {
        self.error.is_none() && !self.screenshot_url.is_empty()
    }
}

/// The concierge's finished answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseAnswer {
    pub markdown: String,
}
