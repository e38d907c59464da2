//! Marketplace roles.
//!
//! The server hands out role strings in several spellings (`customer`, `user`,
//! `Customer`, ...). Every boundary that sees a raw role string (token decode,
//! `/auth/me`, route requirements) goes through [`Role::parse`], so the rest of
//! the crate only ever compares enum values.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Requests services. Spelled `customer` or `user` by the server.
    Customer,
    Provider,
    Admin,
}

impl Role {
    /// Normalize a raw role string. Unknown or empty values yield `None`.
    pub fn parse(raw: &str) -> Option<Role> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "customer" | "user" => Some(Role::Customer),
            "provider" => Some(Role::Provider),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Customer => "customer",
            Role::Provider => "provider",
            Role::Admin => "admin",
        }
    }

    /// Providers and admins may act on provider screens.
    pub fn can_provide(&self) -> bool {
        matches!(self, Role::Provider | Role::Admin)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Role {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Role {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Role::parse(&raw).ok_or_else(|| serde::de::Error::custom(format!("unknown role: {raw}")))
    }
}

/// Normalize a whole list of role requirements, dropping unknown entries.
pub fn normalize_all<R: AsRef<str>>(roles: &[R]) -> Vec<Role> {
    let mut normalized: Vec<Role> = roles.iter().filter_map(|r| Role::parse(r.as_ref())).collect();
    normalized.dedup();
    normalized
}
