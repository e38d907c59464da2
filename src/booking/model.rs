use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;

use crate::api::error::ActionError;
use crate::validation::{validate_address, validate_coordinates, validate_notes};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    #[default]
    Pending,
    Accepted,
    InProgress,
    Completed,
    Cancelled,
    Rejected,
}

impl BookingStatus {
    /// Unknown values read as `Pending` so a new server status never hides a row.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().replace(['-', ' '], "_").as_str() {
            "accepted" => BookingStatus::Accepted,
            "in_progress" => BookingStatus::InProgress,
            "completed" => BookingStatus::Completed,
            "cancelled" | "canceled" => BookingStatus::Cancelled,
            "rejected" => BookingStatus::Rejected,
            _ => BookingStatus::Pending,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Accepted => "accepted",
            BookingStatus::InProgress => "in_progress",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Rejected => "rejected",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, BookingStatus::Accepted | BookingStatus::InProgress)
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, BookingStatus::Cancelled | BookingStatus::Rejected)
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for BookingStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Option::<Value>::deserialize(deserializer)?;
        Ok(raw
            .as_ref()
            .and_then(Value::as_str)
            .map(BookingStatus::parse)
            .unwrap_or_default())
    }
}

/// Which service a booking is for: a provider's concrete listing, or a global
/// category that the server assigns a provider for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceRef {
    Service(i64),
    Global(i64),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Location {
    pub coordinates: Option<Coordinates>,
    pub address: Option<String>,
}

impl Location {
    pub fn at(lat: f64, lon: f64) -> Self {
        Self {
            coordinates: Some(Coordinates { lat, lon }),
            address: None,
        }
    }

    pub fn address(address: impl Into<String>) -> Self {
        Self {
            coordinates: None,
            address: Some(address.into()),
        }
    }

    fn has_address(&self) -> bool {
        self.address.as_deref().is_some_and(|a| !a.trim().is_empty())
    }
}

/// A booking as the server reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    pub id: i64,
    #[serde(default)]
    pub service_id: Option<i64>,
    #[serde(default)]
    pub global_service_id: Option<i64>,
    #[serde(default)]
    pub provider_id: Option<i64>,
    #[serde(default, rename = "user_id")]
    pub requester_id: Option<i64>,
    #[serde(default, deserialize_with = "lenient_datetime")]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub status: BookingStatus,
    #[serde(default)]
    pub user_address: Option<String>,
    #[serde(default)]
    pub user_lat: Option<f64>,
    #[serde(default)]
    pub user_lon: Option<f64>,
    #[serde(default)]
    pub service_title: Option<String>,
    #[serde(default)]
    pub user_name: Option<String>,
    #[serde(default)]
    pub cancelled_by: Option<String>,
    #[serde(default)]
    pub cancel_reason: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    /// Free-text label the server derives from the address or coordinates.
    #[serde(default, rename = "location")]
    pub location_label: Option<String>,
}

impl Booking {
    pub fn service_ref(&self) -> Option<ServiceRef> {
        match (self.service_id, self.global_service_id) {
            (Some(id), _) => Some(ServiceRef::Service(id)),
            (None, Some(id)) => Some(ServiceRef::Global(id)),
            (None, None) => None,
        }
    }

    pub fn location(&self) -> Location {
        Location {
            coordinates: match (self.user_lat, self.user_lon) {
                (Some(lat), Some(lon)) => Some(Coordinates { lat, lon }),
                _ => None,
            },
            address: self.user_address.clone(),
        }
    }

    pub fn is_unassigned(&self) -> bool {
        self.provider_id.is_none()
    }
}

/// Timestamps come as RFC 3339 or as naive `YYYY-MM-DDTHH:MM:SS[.f]`, which
/// the server means as UTC. Anything else reads as missing.
fn lenient_datetime<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<DateTime<Utc>>, D::Error> {
    let raw = Option::<Value>::deserialize(deserializer)?;
    let Some(s) = raw.as_ref().and_then(Value::as_str) else {
        return Ok(None);
    };
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(Some(dt.with_timezone(&Utc)));
    }
    Ok(NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .map(|naive| naive.and_utc()))
}

/// Draft of a booking, as a form or a quick-book flow fills it in.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewBooking {
    pub service_id: Option<i64>,
    pub global_service_id: Option<i64>,
    pub provider_id: Option<i64>,
    /// `None` means "as soon as possible": now plus the quick-book lead.
    pub scheduled_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub location: Location,
}

impl NewBooking {
    pub fn for_service(service_id: i64) -> Self {
        Self {
            service_id: Some(service_id),
            ..Default::default()
        }
    }

    pub fn for_global_service(global_service_id: i64) -> Self {
        Self {
            global_service_id: Some(global_service_id),
            ..Default::default()
        }
    }

    pub fn with_provider(mut self, provider_id: i64) -> Self {
        self.provider_id = Some(provider_id);
        self
    }

    pub fn scheduled(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(at);
        self
    }

    pub fn at(mut self, lat: f64, lon: f64) -> Self {
        self.location.coordinates = Some(Coordinates { lat, lon });
        self
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.location.address = Some(address.into());
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    /// Check the draft and produce the wire payload. Nothing is sent when
    /// this fails.
    pub fn validate(&self, now: DateTime<Utc>, lead: Duration) -> Result<CreateBookingRequest, ActionError> {
        match (self.service_id, self.global_service_id) {
            (None, None) => return Err(ActionError::validation("Choose a service to book.")),
            (Some(_), Some(_)) => {
                return Err(ActionError::validation(
                    "Choose either a specific service or a service category, not both.",
                ))
            }
            _ => {}
        }

        let scheduled_at = self.scheduled_at.unwrap_or(now + lead);
        if scheduled_at <= now {
            return Err(ActionError::validation("Scheduled time must be in the future."));
        }

        if let Some(c) = self.location.coordinates {
            validate_coordinates(c.lat, c.lon).map_err(ActionError::Validation)?;
        }
        let address = match &self.location.address {
            Some(a) if !a.trim().is_empty() => {
                validate_address(a).map_err(ActionError::Validation)?;
                Some(a.trim().to_string())
            }
            _ => None,
        };
        if self.location.coordinates.is_none() && !self.location.has_address() {
            return Err(ActionError::validation(
                "Add a map location or an address for the visit.",
            ));
        }

        let notes = self
            .notes
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string);
        validate_notes(&notes).map_err(ActionError::Validation)?;

        Ok(CreateBookingRequest {
            service_id: self.service_id,
            global_service_id: self.global_service_id,
            provider_id: self.provider_id,
            scheduled_at,
            notes,
            user_address: address,
            user_lat: self.location.coordinates.map(|c| c.lat),
            user_lon: self.location.coordinates.map(|c| c.lon),
        })
    }
}

/// `POST /bookings` body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateBookingRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub global_service_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<i64>,
    pub scheduled_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_lat: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_lon: Option<f64>,
}
