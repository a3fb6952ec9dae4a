//! Quote aggregation tool.
//!
//! Crunches the basic stats the concierge presents as a table: cheapest,
//! average and most expensive price, plus per-carrier min/max/count.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;

use crate::tool::client::ToolFailure;
use crate::tool::registry::ToolHandler;
use crate::tools::models::{Aggregation, CarrierStats, Quote};

pub struct AggregatorTool;

#[async_trait]
impl ToolHandler for AggregatorTool {
    async fn call(&self, input: Value) -> Result<Value, ToolFailure> {
        let quotes: Vec<Quote> = serde_json::from_value(input)
            .map_err(|e| ToolFailure::schema_mismatch(format!("expected quotes: {}", e)))?;

        let aggregation = aggregate_quotes(&quotes)
            .ok_or_else(|| ToolFailure::handler_error("no quotes supplied"))?;

        serde_json::to_value(aggregation)
            .map_err(|e| ToolFailure::handler_error(format!("unserializable aggregation: {}", e)))
    }
}

/// Aggregate quote prices. `None` when there is nothing to aggregate.
pub fn aggregate_quotes(quotes: &[Quote]) -> Option<Aggregation> {
    if quotes.is_empty() {
        return None;
    }

    let prices: Vec<i64> = quotes.iter().map(|q| q.price).collect();
    let cheapest = *prices.iter().min()?;
    let most_expensive = *prices.iter().max()?;
    let average = round2(prices.iter().sum::<i64>() as f64 / prices.len() as f64);

    let mut by_carrier: BTreeMap<String, CarrierStats> = BTreeMap::new();
    for quote in quotes {
        for carrier in &quote.carriers {
            let stats = by_carrier.entry(carrier.clone()).or_insert(CarrierStats {
                count: 0,
                min: quote.price,
                max: quote.price,
            });
            stats.count += 1;
            stats.min = stats.min.min(quote.price);
            stats.max = stats.max.max(quote.price);
        }
    }

    let carriers = by_carrier.keys().cloned().collect();
    Some(Aggregation {
        cheapest,
        average,
        most_expensive,
        carriers,
        by_carrier,
    })
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
