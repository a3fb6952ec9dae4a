//! Price analytics tool.
//!
//! Builds a crude £50-bucket histogram plus min/max/median so the concierge
//! can talk about price bands.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;

use crate::tool::client::ToolFailure;
use crate::tool::registry::ToolHandler;
use crate::tools::models::{Analytics, PriceBucket, Quote};

const BUCKET_SIZE: i64 = 50;

pub struct AnalyticsTool;

#[async_trait]
impl ToolHandler for AnalyticsTool {
    async fn call(&self, input: Value) -> Result<Value, ToolFailure> {
        let quotes: Vec<Quote> = serde_json::from_value(input)
            .map_err(|e| ToolFailure::schema_mismatch(format!("expected quotes: {}", e)))?;

        let analytics = analyse_quotes(&quotes)
            .ok_or_else(|| ToolFailure::handler_error("no quotes supplied for analysis"))?;

        serde_json::to_value(analytics)
            .map_err(|e| ToolFailure::handler_error(format!("unserializable analytics: {}", e)))
    }
}

/// Analyse quote prices. `None` when there is nothing to analyse.
pub fn analyse_quotes(quotes: &[Quote]) -> Option<Analytics> {
    if quotes.is_empty() {
        return None;
    }

    let mut prices: Vec<i64> = quotes.iter().map(|q| q.price).collect();
    prices.sort_unstable();
    let min_price = *prices.first()?;
    let max_price = *prices.last()?;
    let median_price = median(&prices);

    let mut bucket_map: BTreeMap<(i64, i64), (usize, String)> = BTreeMap::new();
    for quote in quotes {
        let lo = quote.price.div_euclid(BUCKET_SIZE) * BUCKET_SIZE;
        let hi = lo + BUCKET_SIZE - 1;
        let entry = bucket_map
            .entry((lo, hi))
            .or_insert((0, quote.deep_link.clone()));
        entry.0 += 1;
    }

    let buckets = bucket_map
        .into_iter()
        .map(|((lo, hi), (count, sample))| PriceBucket {
            range: (lo, hi),
            count,
            sample,
        })
        .collect();

    Some(Analytics {
        min_price,
        max_price,
        median_price,
        buckets,
    })
}

/// Median of an already-sorted price list.
fn median(sorted: &[i64]) -> f64 {
    let n = sorted.len();
    if n % 2 == 1 {
        sorted[n / 2] as f64
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) as f64 / 2.0
    }
}
