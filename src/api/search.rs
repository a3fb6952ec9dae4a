//! Flight-search endpoint.
//!
//! The boundary validates the request (IATA codes, passenger count, ISO
//! dates) and hands the engine an already well-formed [`SearchRequest`]; the
//! response is the serialized terminal run state.

use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
    routing::post,
    Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::api::AppState;
use crate::runtime::state::{RunState, SearchRequest};

/// Raw request body before boundary validation.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchPayload {
    pub origin: String,
    pub destination: String,
    #[serde(default = "default_adults")]
    pub num_adults: u32,
    pub departure_date: String,
    #[serde(default)]
    pub return_date: Option<String>,
}

fn default_adults() -> u32 {
    1
}

/// A rejected field, surfaced as 422.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl SearchPayload {
    /// Boundary validation; the engine only ever sees the validated form.
    pub fn validate(self) -> Result<SearchRequest, ValidationError> {
        let origin = normalize_iata(&self.origin, "origin")?;
        let destination = normalize_iata(&self.destination, "destination")?;

        if self.num_adults < 1 {
            return Err(ValidationError {
                field: "num_adults",
                message: "at least one adult passenger is required".to_string(),
            });
        }

        let departure_date = parse_date(&self.departure_date, "departure_date")?;
        let return_date = self
            .return_date
            .as_deref()
            .map(|raw| parse_date(raw, "return_date"))
            .transpose()?;
        if let Some(return_date) = return_date {
            if return_date < departure_date {
                return Err(ValidationError {
                    field: "return_date",
                    message: "return date is before the departure date".to_string(),
                });
            }
        }

        Ok(SearchRequest {
            origin,
            destination,
            num_adults: self.num_adults,
            departure_date,
            return_date,
        })
    }
}

fn normalize_iata(raw: &str, field: &'static str) -> Result<String, ValidationError> {
    let code = raw.trim();
    if code.len() == 3 && code.chars().all(|c| c.is_ascii_alphabetic()) {
        Ok(code.to_ascii_uppercase())
    } else {
        Err(ValidationError {
            field,
            message: format!("'{}' is not a 3-letter IATA code", raw),
        })
    }
}

fn parse_date(raw: &str, field: &'static str) -> Result<NaiveDate, ValidationError> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| ValidationError {
        field,
        message: format!("'{}' is not an ISO date (YYYY-MM-DD)", raw),
    })
}

/// Create the search route.
pub fn create_search_routes() -> Router<AppState> {
    Router::new().route("/api/v1/flights/search", post(search_flights))
}

/// Run one search workflow.
///
/// POST /api/v1/flights/search
/// Body: { "origin": "LHR", "destination": "JFK", "num_adults": 1,
///         "departure_date": "2024-08-10" }
async fn search_flights(
    State(state): State<AppState>,
    Json(payload): Json<SearchPayload>,
) -> Result<Json<RunState>, (StatusCode, Json<ValidationError>)> {
    let request = payload
        .validate()
        .map_err(|e| (StatusCode::UNPROCESSABLE_ENTITY, Json(e)))?;

    let run = state.engine.run(request).await;
    Ok(Json(run))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload() -> SearchPayload {
        SearchPayload {
            origin: "lhr".to_string(),
            destination: "JFK".to_string(),
            num_adults: 1,
            departure_date: "2024-08-10".to_string(),
            return_date: None,
        }
    }

    #[test]
    fn valid_payload_normalizes_iata_codes() {
        let request = payload().validate().unwrap();
        assert_eq!(request.origin, "LHR");
        assert_eq!(request.destination, "JFK");
        assert_eq!(
            request.departure_date,
            NaiveDate::from_ymd_opt(2024, 8, 10).unwrap()
        );
    }

    #[test]
    fn malformed_iata_codes_are_rejected() {
        let mut bad = payload();
        bad.origin = "LHRX".to_string();
        assert_eq!(bad.validate().unwrap_err().field, "origin");

        let mut bad = payload();
        bad.destination = "J1K".to_string();
        assert_eq!(bad.validate().unwrap_err().field, "destination");
    }

    #[test]
    fn zero_adults_are_rejected() {
        let mut bad = payload();
        bad.num_adults = 0;
        assert_eq!(bad.validate().unwrap_err().field, "num_adults");
    }

    #[test]
    fn malformed_dates_are_rejected() {
        let mut bad = payload();
        bad.departure_date = "10/08/2024".to_string();
        assert_eq!(bad.validate().unwrap_err().field, "departure_date");
    }

    #[test]
    fn return_before_departure_is_rejected() {
        let mut bad = payload();
        bad.return_date = Some("2024-08-01".to_string());
        assert_eq!(bad.validate().unwrap_err().field, "return_date");
    }

    #[test]
    fn round_trips_keep_the_return_date() {
        let mut round = payload();
        round.return_date = Some("2024-08-20".to_string());
        let request = round.validate().unwrap();
        assert_eq!(
            request.return_date,
            Some(NaiveDate::from_ymd_opt(2024, 8, 20).unwrap())
        );
    }
}
