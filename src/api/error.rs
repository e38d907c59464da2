//! Client-side error handling for ServiceHub.
//!
//! Two layers live here. `ClientError` describes what went wrong on the wire
//! (status codes, timeouts, undecodable bodies). `ActionError` is the taxonomy
//! the screens render: every failed user action is classified into exactly one
//! kind, and only `AuthRequired` is handled globally instead of inline.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Error codes for action failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    AuthRequired,
    Validation,
    Conflict,
    Network,
    Unknown,
}

impl ErrorKind {
    /// Get the string representation of the error kind
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::AuthRequired => "auth_required",
            ErrorKind::Validation => "validation",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Network => "network",
            ErrorKind::Unknown => "unknown",
        }
    }
}

/// Failure of a single HTTP exchange with the marketplace API.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The server answered 401. The session has already been cleared.
    #[error("authentication required")]
    Unauthorized,

    /// Any other non-success status.
    #[error("server returned {status}: {}", .detail.as_deref().unwrap_or("no detail"))]
    Status { status: u16, detail: Option<String> },

    #[error("request timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("unexpected response body: {0}")]
    Decode(String),

    /// The response arrived after the session that issued the request ended.
    #[error("response arrived after the session ended")]
    Superseded,
}

impl ClientError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Unauthorized => Some(401),
            ClientError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn detail(&self) -> Option<&str> {
        match self {
            ClientError::Status { detail, .. } => detail.as_deref(),
            _ => None,
        }
    }
}

/// Which kind of call produced a `ClientError`; 4xx answers mean different
/// things for a form submission than for a state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Form submission (create booking, login, search)
    Submit,
    /// State transition on an existing booking
    Transition,
    /// Plain read
    Read,
}

/// Failure taxonomy surfaced to the UI.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActionError {
    /// Redirect to login; never rendered inline.
    #[error("authentication required")]
    AuthRequired,

    #[error("{0}")]
    Validation(String),

    /// Lost a race or attempted an invalid transition.
    #[error("{0}")]
    Conflict(String),

    /// Timeout or connection failure.
    #[error("{0}")]
    Network(String),

    #[error("{0}")]
    Unknown(String),
}

impl ActionError {
    pub fn validation(message: impl Into<String>) -> Self {
        ActionError::Validation(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        ActionError::Conflict(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ActionError::AuthRequired => ErrorKind::AuthRequired,
            ActionError::Validation(_) => ErrorKind::Validation,
            ActionError::Conflict(_) => ErrorKind::Conflict,
            ActionError::Network(_) => ErrorKind::Network,
            ActionError::Unknown(_) => ErrorKind::Unknown,
        }
    }

    /// Whether the error belongs next to the control that triggered it.
    pub fn is_inline(&self) -> bool {
        !matches!(self, ActionError::AuthRequired)
    }

    /// Classify a wire-level failure. `fallback` is shown when the server
    /// gave no usable reason.
    pub fn classify(err: ClientError, op: Operation, fallback: &str) -> Self {
        let reason = |detail: Option<String>| detail.unwrap_or_else(|| fallback.to_string());

        match err {
            ClientError::Unauthorized | ClientError::Superseded => ActionError::AuthRequired,
            ClientError::Timeout(_) => {
                ActionError::Network(format!("{} The request timed out.", fallback))
            }
            ClientError::Transport(_) => {
                ActionError::Network(format!("{} The server could not be reached.", fallback))
            }
            ClientError::Decode(_) => ActionError::Unknown(fallback.to_string()),
            ClientError::Status { status, detail } => match (status, op) {
                (409, _) => ActionError::Conflict(reason(detail)),
                (400..=499, Operation::Transition) => ActionError::Conflict(reason(detail)),
                (400..=499, Operation::Submit) => ActionError::Validation(reason(detail)),
                _ => ActionError::Unknown(reason(detail)),
            },
        }
    }
}

/// Pull a human-readable reason out of an error body.
///
/// Understands `{"detail": "text"}`, `{"detail": [{"msg": "..."}]}` and
/// `{"error": {"message": "..."}}`.
pub fn extract_detail(body: &Value) -> Option<String> {
    match body.get("detail") {
        Some(Value::String(s)) if !s.trim().is_empty() => return Some(s.trim().to_string()),
        Some(Value::Array(items)) => {
            let messages: Vec<&str> = items
                .iter()
                .filter_map(|item| item.get("msg").and_then(Value::as_str))
                .collect();
            if !messages.is_empty() {
                return Some(messages.join("; "));
            }
        }
        _ => {}
    }

    body.get("error")
        .and_then(|e| e.get("message"))
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .map(|s| s.trim().to_string())
}
