//! Session handling: who the client is acting as, and whether it can trust it.
//!
//! This module provides:
//! - `Role` normalization (`customer`/`user` collapse into one value)
//! - credential decoding for a provisional identity
//! - the Credential Store (best-effort persistence)
//! - the session-event bus
//! - the Session Manager, the only writer of the credential

pub mod events;
pub mod manager;
pub mod role;
pub mod store;
pub mod token;

pub use events::{SessionBus, SessionEvent};
pub use manager::SessionManager;
pub use role::Role;
pub use store::{CredentialStore, FileStorage, MemoryStorage, Storage};

use serde::{Deserialize, Serialize};

/// The acting account, as derived from the credential or reported by `/auth/me`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: i64,
    #[serde(default)]
    pub email: String,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Unauthenticated,
    Resolving,
    Authenticated,
}

/// Read-only view of the session handed to guards and screens.
///
/// The credential itself is never part of a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub status: SessionStatus,
    pub identity: Option<Identity>,
}

impl SessionSnapshot {
    pub fn unauthenticated() -> Self {
        Self {
            status: SessionStatus::Unauthenticated,
            identity: None,
        }
    }

    pub fn resolving() -> Self {
        Self {
            status: SessionStatus::Resolving,
            identity: None,
        }
    }

    pub fn authenticated(identity: Identity) -> Self {
        Self {
            status: SessionStatus::Authenticated,
            identity: Some(identity),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.status == SessionStatus::Authenticated && self.identity.is_some()
    }

    pub fn role(&self) -> Option<Role> {
        self.identity.as_ref().map(|i| i.role)
    }

    pub fn is_provider(&self) -> bool {
        self.role().is_some_and(|r| r.can_provide())
    }

    pub fn is_admin(&self) -> bool {
        self.role() == Some(Role::Admin)
    }
}
