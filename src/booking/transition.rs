//! Booking lifecycle transitions as the client sees them.
//!
//! ```text
//! pending  --accept-->   accepted
//! pending  --reject-->   rejected
//! pending  --cancel-->   cancelled
//! accepted --complete--> completed
//! accepted --cancel-->   cancelled
//! ```
//!
//! `in_progress` is treated like `accepted`. The server remains the authority;
//! this table only stops requests that cannot succeed.

use serde_json::{json, Value};

use super::model::BookingStatus;

/// Which side of the booking is acting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Party {
    Requester,
    Provider,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Accept,
    Reject,
    Complete,
    Cancel { by: Party, reason: Option<String> },
}

impl Transition {
    pub fn name(&self) -> &'static str {
        match self {
            Transition::Accept => "accept",
            Transition::Reject => "reject",
            Transition::Complete => "complete",
            Transition::Cancel { .. } => "cancel",
        }
    }

    pub fn target(&self) -> BookingStatus {
        match self {
            Transition::Accept => BookingStatus::Accepted,
            Transition::Reject => BookingStatus::Rejected,
            Transition::Complete => BookingStatus::Completed,
            Transition::Cancel { .. } => BookingStatus::Cancelled,
        }
    }

    pub fn is_allowed_from(&self, from: BookingStatus) -> bool {
        use BookingStatus::*;
        match self {
            Transition::Accept | Transition::Reject => from == Pending,
            Transition::Complete => from.is_active(),
            Transition::Cancel { .. } => from == Pending || from.is_active(),
        }
    }

    pub fn path(&self, id: i64) -> String {
        match self {
            Transition::Cancel {
                by: Party::Provider,
                ..
            } => format!("/bookings/{}/cancel/provider", id),
            other => format!("/bookings/{}/{}", id, other.name()),
        }
    }

    pub fn body(&self) -> Option<Value> {
        match self {
            Transition::Cancel { reason, .. } => {
                let reason = reason.as_deref().map(str::trim).filter(|r| !r.is_empty());
                Some(json!({ "reason": reason }))
            }
            _ => None,
        }
    }

    /// Shown when the server gives no reason.
    pub fn fallback_message(&self) -> &'static str {
        match self {
            Transition::Accept => "Could not accept booking.",
            Transition::Reject => "Could not reject booking.",
            Transition::Complete => "Could not complete booking.",
            Transition::Cancel { .. } => "Could not cancel booking.",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use BookingStatus::*;

    fn cancel(by: Party) -> Transition {
        Transition::Cancel { by, reason: None }
    }

    #[test]
    fn test_transition_table() {
        assert!(Transition::Accept.is_allowed_from(Pending));
        assert!(!Transition::Accept.is_allowed_from(Accepted));
        assert!(Transition::Reject.is_allowed_from(Pending));
        assert!(!Transition::Reject.is_allowed_from(Cancelled));
        assert!(Transition::Complete.is_allowed_from(Accepted));
        assert!(Transition::Complete.is_allowed_from(InProgress));
        assert!(!Transition::Complete.is_allowed_from(Pending));
        assert!(cancel(Party::Requester).is_allowed_from(Pending));
        assert!(cancel(Party::Provider).is_allowed_from(Accepted));
        assert!(!cancel(Party::Requester).is_allowed_from(Completed));
        assert!(!cancel(Party::Requester).is_allowed_from(Rejected));
    }

    #[test]
    fn test_endpoints() {
        assert_eq!(Transition::Accept.path(42), "/bookings/42/accept");
        assert_eq!(Transition::Reject.path(42), "/bookings/42/reject");
        assert_eq!(Transition::Complete.path(42), "/bookings/42/complete");
        assert_eq!(cancel(Party::Requester).path(42), "/bookings/42/cancel");
        assert_eq!(cancel(Party::Provider).path(42), "/bookings/42/cancel/provider");
    }

    #[test]
    fn test_cancel_body() {
        assert_eq!(Transition::Accept.body(), None);
        assert_eq!(cancel(Party::Requester).body(), Some(json!({"reason": null})));

        let t = Transition::Cancel {
            by: Party::Requester,
            reason: Some(" running late ".to_string()),
        };
        assert_eq!(t.body(), Some(json!({"reason": "running late"})));
        assert_eq!(t.target(), Cancelled);
    }
}
