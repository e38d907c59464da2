//! Matching Request Builder.
//!
//! Validates a provider search before it is sent, normalizes whatever shape
//! the server answers with, and turns a chosen match into a booking draft.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::api::error::{ActionError, Operation};
use crate::api::ApiClient;
use crate::booking::NewBooking;
use crate::config::Config;
use crate::validation::{validate_coordinates, validate_radius};

pub use crate::validation::{MAX_RADIUS_KM, MIN_RADIUS_KM};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchQuery {
    /// Global (category) service id.
    pub service_id: i64,
    pub lat: f64,
    pub lon: f64,
    pub radius_km: f64,
}

impl MatchQuery {
    pub fn validate(&self) -> Result<(), ActionError> {
        if self.service_id <= 0 {
            return Err(ActionError::validation("Choose a service to search for."));
        }
        validate_coordinates(self.lat, self.lon).map_err(ActionError::Validation)?;
        validate_radius(self.radius_km).map_err(ActionError::Validation)?;
        Ok(())
    }
}

/// One ranked provider. Order is the server's; it is never re-sorted here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub provider_id: i64,
    #[serde(default)]
    pub distance_km: Option<f64>,
    #[serde(default)]
    pub rating: Option<f64>,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub service_id: Option<i64>,
    #[serde(default)]
    pub active_bookings: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchOutcome {
    pub results: Vec<MatchResult>,
    /// Drives the "no providers nearby" message; an empty result is not an error.
    pub has_results: bool,
}

impl MatchOutcome {
    fn from_results(results: Vec<MatchResult>) -> Self {
        let has_results = !results.is_empty();
        Self {
            results,
            has_results,
        }
    }
}

pub struct Matcher {
    api: ApiClient,
    default_radius_km: f64,
}

impl Matcher {
    pub fn new(api: ApiClient) -> Self {
        Self {
            api,
            default_radius_km: 5.0,
        }
    }

    pub fn with_config(mut self, config: &Config) -> Self {
        self.default_radius_km = config.matching.default_radius_km;
        self
    }

    pub fn default_radius_km(&self) -> f64 {
        self.default_radius_km
    }

    /// Build a query using the configured radius when none is given.
    pub fn query(&self, service_id: i64, lat: f64, lon: f64, radius_km: Option<f64>) -> MatchQuery {
        MatchQuery {
            service_id,
            lat,
            lon,
            radius_km: radius_km.unwrap_or(self.default_radius_km),
        }
    }

    pub async fn search(&self, query: &MatchQuery) -> Result<MatchOutcome, ActionError> {
        query.validate()?;

        let body = self
            .api
            .match_providers(query)
            .await
            .map_err(|e| ActionError::classify(e, Operation::Submit, "Could not search for providers."))?;

        let outcome = MatchOutcome::from_results(normalize_results(&body));
        tracing::debug!(
            service_id = query.service_id,
            radius_km = query.radius_km,
            results = outcome.results.len(),
            "Provider search finished"
        );
        Ok(outcome)
    }
}

/// Accepts a bare array or `{ "items": [...] }`; anything else reads as no
/// results. Items without a usable provider id are dropped.
pub fn normalize_results(body: &Value) -> Vec<MatchResult> {
    let items = match body {
        Value::Array(items) => items,
        Value::Object(map) => match map.get("items") {
            Some(Value::Array(items)) => items,
            _ => return Vec::new(),
        },
        _ => return Vec::new(),
    };

    items
        .iter()
        .filter_map(|item| serde_json::from_value::<MatchResult>(item.clone()).ok())
        .collect()
}

/// Prefilled draft for booking a matched provider. The location and time are
/// left for the booking form.
pub fn build_booking_from_match(provider_id: i64, service_id: i64) -> NewBooking {
    NewBooking::for_service(service_id).with_provider(provider_id)
}
