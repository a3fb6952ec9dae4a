//! Flight supplier search tool.
//!
//! Queries a Tequila-style supplier API and maps its payload into [`Quote`]
//! values. Partial flights (missing price, route or deep link) are skipped
//! rather than failing the whole search.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeSet;

use crate::config::SupplierConfig;
use crate::runtime::state::SearchRequest;
use crate::tool::client::ToolFailure;
use crate::tool::registry::ToolHandler;
use crate::tools::models::Quote;

pub struct FlightSearchTool {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    currency: String,
    limit: u32,
}

impl FlightSearchTool {
    pub fn new(config: &SupplierConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
            currency: config.currency.clone(),
            limit: config.limit,
        }
    }
}

#[async_trait]
impl ToolHandler for FlightSearchTool {
    async fn call(&self, input: Value) -> Result<Value, ToolFailure> {
        let request: SearchRequest = serde_json::from_value(input)
            .map_err(|e| ToolFailure::schema_mismatch(format!("expected search request: {}", e)))?;

        let date = request.departure_date.format("%Y-%m-%d").to_string();
        let mut params = vec![
            ("fly_from".to_string(), request.origin.clone()),
            ("fly_to".to_string(), request.destination.clone()),
            ("date_from".to_string(), date.clone()),
            ("date_to".to_string(), date),
            ("adults".to_string(), request.num_adults.to_string()),
            ("children".to_string(), "0".to_string()),
            ("curr".to_string(), self.currency.clone()),
            ("selected_cabins".to_string(), "M".to_string()),
            ("limit".to_string(), self.limit.to_string()),
            ("sort".to_string(), "price".to_string()),
        ];
        match request.return_date {
            Some(return_date) => {
                let back = return_date.format("%Y-%m-%d").to_string();
                params.push(("flight_type".to_string(), "round".to_string()));
                params.push(("return_from".to_string(), back.clone()));
                params.push(("return_to".to_string(), back));
            }
            None => params.push(("flight_type".to_string(), "oneway".to_string())),
        }

        let response = self
            .http
            .get(&self.base_url)
            .query(&params)
            .header("apikey", &self.api_key)
            .send()
            .await
            .map_err(ToolFailure::from_transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(ToolFailure::handler_error(format!(
                "supplier returned {}",
                status
            )));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| ToolFailure::schema_mismatch(format!("supplier payload: {}", e)))?;

        let quotes = parse_supplier_payload(&payload);
        tracing::info!(
            "supplier returned {} quote(s) for {} -> {}",
            quotes.len(),
            request.origin,
            request.destination
        );

        serde_json::to_value(quotes)
            .map_err(|e| ToolFailure::handler_error(format!("unserializable quotes: {}", e)))
    }
}

/// Map a supplier response payload into quotes.
///
/// An absent or empty `data` array is a valid zero-result search.
pub fn parse_supplier_payload(payload: &Value) -> Vec<Quote> {
    let Some(data) = payload.get("data").and_then(Value::as_array) else {
        return Vec::new();
    };
    data.iter().filter_map(parse_flight).collect()
}

fn parse_flight(flight: &Value) -> Option<Quote> {
    let price = flight.get("price")?.as_f64()?.round() as i64;
    let deep_link = flight.get("deep_link")?.as_str()?.to_string();
    let route = flight.get("route")?.as_array()?;
    if route.is_empty() {
        return None;
    }

    let departure = route
        .first()?
        .get("local_departure")?
        .as_str()?
        .to_string();
    let arrival = route.last()?.get("local_arrival")?.as_str()?.to_string();

    let carriers: BTreeSet<String> = route
        .iter()
        .filter_map(|segment| segment.get("airline").and_then(Value::as_str))
        .map(str::to_string)
        .collect();
    if carriers.is_empty() {
        return None;
    }

    Some(Quote {
        price,
        departure,
        arrival,
        carriers: carriers.into_iter().collect(),
        stops: route.len() - 1,
        deep_link,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn supplier_payload() -> Value {
        json!({
            "currency": "GBP",
            "data": [
                {
                    "price": 320.0,
                    "deep_link": "https://supplier.test/book/1",
                    "route": [
                        {
                            "airline": "BA",
                            "local_departure": "2024-08-10T06:30:00",
                            "local_arrival": "2024-08-10T09:45:00"
                        }
                    ]
                },
                {
                    "price": 410.4,
                    "deep_link": "https://supplier.test/book/2",
                    "route": [
                        {
                            "airline": "VS",
                            "local_departure": "2024-08-10T11:00:00",
                            "local_arrival": "2024-08-10T13:05:00"
                        },
                        {
                            "airline": "DL",
                            "local_departure": "2024-08-10T14:20:00",
                            "local_arrival": "2024-08-10T16:10:00"
                        }
                    ]
                },
                { "price": 999.0 }
            ]
        })
    }

    #[test]
    fn payload_maps_routes_to_quotes() {
        let quotes = parse_supplier_payload(&supplier_payload());
        assert_eq!(quotes.len(), 2);

        let direct = &quotes[0];
        assert_eq!(direct.price, 320);
        assert_eq!(direct.stops, 0);
        assert_eq!(direct.carriers, vec!["BA"]);
        assert_eq!(direct.departure, "2024-08-10T06:30:00");
        assert_eq!(direct.arrival, "2024-08-10T09:45:00");

        let connecting = &quotes[1];
        assert_eq!(connecting.price, 410);
        assert_eq!(connecting.stops, 1);
        assert_eq!(connecting.carriers, vec!["DL", "VS"]);
        assert_eq!(connecting.departure, "2024-08-10T11:00:00");
        assert_eq!(connecting.arrival, "2024-08-10T16:10:00");
    }

    #[test]
    fn missing_data_is_a_zero_result_search() {
        assert!(parse_supplier_payload(&json!({"search_id": "x"})).is_empty());
        assert!(parse_supplier_payload(&json!({"data": []})).is_empty());
    }
}
