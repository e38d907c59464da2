//! Typed client for the marketplace REST API.
//!
//! Every request goes through [`ApiClient::execute`], which attaches the
//! session's bearer credential and a request id, bounds the call with a
//! timeout, and applies the process-wide 401 rule: the session that issued the
//! request is cleared and the caller gets `ClientError::Unauthorized`.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use super::error::{extract_detail, ClientError};
use super::transport::{ApiRequest, HttpTransport, Transport};
use crate::booking::{Booking, CreateBookingRequest, Transition};
use crate::config::Config;
use crate::matching::MatchQuery;
use crate::session::{Identity, Role, SessionManager};

/// `POST /auth/login` answer.
#[derive(Debug, Clone)]
pub struct LoginResponse {
    pub access_token: String,
    /// Present when the server includes the account in the login answer.
    pub user: Option<Identity>,
}

/// `POST /auth/register` payload.
#[derive(Debug, Clone, Serialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub role: Role,
}

#[derive(Deserialize)]
struct RawLoginResponse {
    access_token: String,
    #[serde(default)]
    user: Option<Value>,
}

#[derive(Clone)]
pub struct ApiClient {
    transport: Arc<dyn Transport>,
    session: SessionManager,
    timeout: Duration,
}

impl ApiClient {
    pub fn new(transport: Arc<dyn Transport>, session: SessionManager, timeout: Duration) -> Self {
        Self {
            transport,
            session,
            timeout,
        }
    }

    /// Build a client talking HTTP to `[api] base_url`.
    pub fn from_config(config: &Config, session: SessionManager) -> Result<Self, ClientError> {
        let timeout = config.api.timeout();
        let transport = HttpTransport::new(&config.api.base_url, timeout)?;
        Ok(Self::new(Arc::new(transport), session, timeout))
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<LoginResponse, ClientError> {
        let request = ApiRequest::post("/auth/login")
            .json(json!({ "email": email, "password": password }))
            .without_auth();
        let raw: RawLoginResponse = decode(self.execute(request).await?)?;

        // A partial user object is not worth failing the login over; the
        // session fetches /auth/me instead.
        let user = raw
            .user
            .and_then(|u| serde_json::from_value::<Identity>(u).ok());

        Ok(LoginResponse {
            access_token: raw.access_token,
            user,
        })
    }

    /// Create an account. Sent without a credential; the answer is the new
    /// account, not a session.
    pub async fn register(&self, account: &RegisterRequest) -> Result<Identity, ClientError> {
        let body = serde_json::to_value(account).map_err(|e| ClientError::Decode(e.to_string()))?;
        let request = ApiRequest::post("/auth/register").json(body).without_auth();
        decode(self.execute(request).await?)
    }

    pub async fn me(&self) -> Result<Identity, ClientError> {
        decode(self.execute(ApiRequest::get("/auth/me")).await?)
    }

    pub async fn create_booking(&self, payload: &CreateBookingRequest) -> Result<Booking, ClientError> {
        let body = serde_json::to_value(payload).map_err(|e| ClientError::Decode(e.to_string()))?;
        decode(self.execute(ApiRequest::post("/bookings").json(body)).await?)
    }

    /// Bookings the signed-in account requested.
    pub async fn list_bookings(&self) -> Result<Vec<Booking>, ClientError> {
        decode_list(self.execute(ApiRequest::get("/bookings")).await?)
    }

    /// Bookings assigned to, or open to, the signed-in provider.
    pub async fn list_provider_bookings(&self) -> Result<Vec<Booking>, ClientError> {
        decode_list(self.execute(ApiRequest::get("/bookings/provider")).await?)
    }

    pub async fn transition(&self, id: i64, transition: &Transition) -> Result<Booking, ClientError> {
        let mut request = ApiRequest::put(transition.path(id));
        if let Some(body) = transition.body() {
            request = request.json(body);
        }
        decode(self.execute(request).await?)
    }

    /// Raw match answer; shape normalization is the matcher's job.
    pub async fn match_providers(&self, query: &MatchQuery) -> Result<Value, ClientError> {
        let request = ApiRequest::get("/match/providers")
            .query("global_service_id", query.service_id)
            .query("user_lat", query.lat)
            .query("user_lon", query.lon)
            .query("radius_km", query.radius_km);
        self.execute(request).await
    }

    /// Send one request and return the body of a 2xx answer.
    pub async fn execute(&self, mut request: ApiRequest) -> Result<Value, ClientError> {
        let (bearer, epoch) = self.session.bearer();
        if !request.skip_auth {
            request.bearer = bearer;
        }
        request.request_id = Uuid::new_v4().to_string();

        let request_id = request.request_id.clone();
        let method = request.method;
        let path = request.path.clone();
        let skip_auth = request.skip_auth;

        debug!(
            request_id = %request_id,
            method = method.as_str(),
            path = %path,
            "Sending API request"
        );

        let outcome = tokio::time::timeout(self.timeout, self.transport.send(request)).await;

        // Whatever happened, an answer for a session that no longer exists
        // must not touch the current one.
        if !skip_auth && self.session.epoch() != epoch {
            debug!(request_id = %request_id, path = %path, "Discarding response from a previous session");
            return Err(ClientError::Superseded);
        }

        let response = match outcome {
            Ok(result) => result?,
            Err(_) => {
                warn!(request_id = %request_id, path = %path, "API request timed out");
                return Err(ClientError::Timeout(self.timeout));
            }
        };

        debug!(
            request_id = %request_id,
            status = response.status,
            path = %path,
            "API response"
        );

        if response.status == 401 && !skip_auth {
            self.session.handle_unauthorized(epoch);
            return Err(ClientError::Unauthorized);
        }

        if !response.is_success() {
            return Err(ClientError::Status {
                status: response.status,
                detail: extract_detail(&response.body),
            });
        }

        Ok(response.body)
    }
}

fn decode<T: DeserializeOwned>(body: Value) -> Result<T, ClientError> {
    serde_json::from_value(body).map_err(|e| ClientError::Decode(e.to_string()))
}

/// Lists arrive as a bare array; `{items: [...]}` is accepted as well.
fn decode_list<T: DeserializeOwned>(body: Value) -> Result<Vec<T>, ClientError> {
    match body {
        Value::Array(_) => decode(body),
        Value::Object(mut map) => match map.remove("items") {
            Some(items @ Value::Array(_)) => decode(items),
            _ => Err(ClientError::Decode("expected a list".to_string())),
        },
        Value::Null => Ok(Vec::new()),
        _ => Err(ClientError::Decode("expected a list".to_string())),
    }
}
