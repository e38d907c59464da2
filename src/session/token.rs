//! Credential decoding.
//!
//! The bearer credential is a JWT signed by the server. The client cannot and
//! does not verify the signature; it only reads the claims to derive a
//! provisional identity (`sub`, `role`, `email`, `exp`) until `/auth/me`
//! confirms it. Nothing outside the session module reads the token.

use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::{decode, decode_header, DecodingKey, Validation};
use serde::Deserialize;
use serde_json::Value;

use super::role::Role;

/// Raw claims as the server encodes them. `sub` is a string in practice but
/// numbers are tolerated.
#[derive(Debug, Deserialize)]
struct RawClaims {
    #[serde(default)]
    sub: Option<Value>,
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    exp: Option<i64>,
}

/// What the client can learn from a credential without the server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedCredential {
    pub user_id: Option<i64>,
    pub role: Option<Role>,
    pub email: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl DecodedCredential {
    /// A credential is usable only when both subject and role decode.
    pub fn is_well_formed(&self) -> bool {
        self.user_id.is_some() && self.role.is_some()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| exp <= now)
    }
}

/// Decode a credential's claims. Malformed or truncated input yields an
/// empty [`DecodedCredential`]; this never fails.
pub fn decode_credential(token: &str) -> DecodedCredential {
    let token = token.trim();
    if token.is_empty() || token.split('.').count() != 3 {
        return DecodedCredential::default();
    }

    let header = match decode_header(token) {
        Ok(h) => h,
        Err(e) => {
            tracing::debug!(error = %e, "Credential header did not decode");
            return DecodedCredential::default();
        }
    };

    let mut validation = Validation::new(header.alg);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    let claims = match decode::<RawClaims>(token, &DecodingKey::from_secret(&[]), &validation) {
        Ok(data) => data.claims,
        Err(e) => {
            tracing::debug!(error = %e, "Credential claims did not decode");
            return DecodedCredential::default();
        }
    };

    DecodedCredential {
        user_id: claims.sub.as_ref().and_then(subject_id),
        role: claims.role.as_deref().and_then(Role::parse),
        email: claims.email.filter(|e| !e.trim().is_empty()),
        expires_at: claims.exp.and_then(|exp| Utc.timestamp_opt(exp, 0).single()),
    }
}

fn subject_id(sub: &Value) -> Option<i64> {
    match sub {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
