//! Test support: an in-process marketplace server and storage doubles.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use crate::api::error::ClientError;
use crate::api::transport::{ApiRequest, ApiResponse, Method, Transport};
use crate::api::ApiClient;
use crate::booking::{Booking, BookingStatus, CreateBookingRequest};
use crate::session::store::StoredSession;
use crate::session::{CredentialStore, Identity, MemoryStorage, Role, SessionManager, Storage};

/// Sign a credential the way the server does.
pub(crate) fn issue_token(sub: i64, role: &str, email: Option<&str>, ttl_secs: i64) -> String {
    let claims = json!({
        "sub": sub.to_string(),
        "role": role,
        "email": email,
        "exp": Utc::now().timestamp() + ttl_secs,
    });
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(b"test-secret"),
    )
    .unwrap()
}

/// Storage whose every operation fails, like a disabled or full medium.
pub(crate) struct FlakyStorage;

impl FlakyStorage {
    pub(crate) fn failing() -> Self {
        FlakyStorage
    }
}

impl Storage for FlakyStorage {
    fn read(&self) -> io::Result<Option<String>> {
        Err(io::Error::new(io::ErrorKind::PermissionDenied, "storage disabled"))
    }

    fn write(&self, _contents: &str) -> io::Result<()> {
        Err(io::Error::other("quota exceeded"))
    }

    fn remove(&self) -> io::Result<()> {
        Err(io::Error::new(io::ErrorKind::PermissionDenied, "storage disabled"))
    }
}

/// Lets several session managers, or a test, see the same memory storage.
struct SharedStorage(Arc<MemoryStorage>);

impl Storage for SharedStorage {
    fn read(&self) -> io::Result<Option<String>> {
        self.0.read()
    }

    fn write(&self, contents: &str) -> io::Result<()> {
        self.0.write(contents)
    }

    fn remove(&self) -> io::Result<()> {
        self.0.remove()
    }
}

#[derive(Debug, Clone)]
pub(crate) struct TestUser {
    pub token: String,
    pub identity: Identity,
    pub provider_profile: Option<i64>,
}

#[derive(Default)]
struct MarketState {
    users: HashMap<String, TestUser>,
    /// Passwords of accounts created through `/auth/register`, by email.
    passwords: HashMap<String, String>,
    next_user_id: i64,
    bookings: Vec<Booking>,
    next_id: i64,
    requests: Vec<ApiRequest>,
    fail_next: Option<(u16, Option<String>)>,
    delay: Duration,
    match_response: Value,
}

/// In-memory marketplace API.
///
/// Follows the server's rules where the client can observe them: the first
/// provider to accept a booking gets it, transitions follow the lifecycle
/// table, and unknown or revoked credentials get a 401.
#[derive(Clone)]
pub(crate) struct FakeMarketplace {
    state: Arc<Mutex<MarketState>>,
}

impl FakeMarketplace {
    pub const PASSWORD: &'static str = "secret";

    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MarketState {
                next_id: 1000,
                next_user_id: 500,
                match_response: json!([]),
                ..Default::default()
            })),
        }
    }

    pub fn register(&self, id: i64, email: &str, role: Role, provider_profile: Option<i64>) -> TestUser {
        let user = TestUser {
            token: issue_token(id, role.as_str(), Some(email), 3600),
            identity: Identity {
                id,
                email: email.to_string(),
                role,
                name: Some(format!("User {}", id)),
            },
            provider_profile,
        };
        self.state.lock().users.insert(user.token.clone(), user.clone());
        user
    }

    pub fn revoke(&self, token: &str) {
        self.state.lock().users.remove(token);
    }

    /// Answer the next request with this status instead of handling it.
    pub fn fail_next(&self, status: u16, detail: Option<&str>) {
        self.state.lock().fail_next = Some((status, detail.map(str::to_string)));
    }

    pub fn set_delay(&self, delay: Duration) {
        self.state.lock().delay = delay;
    }

    pub fn set_match_response(&self, body: Value) {
        self.state.lock().match_response = body;
    }

    pub fn seed_pending(&self, id: i64, requester_id: i64, provider_id: Option<i64>) {
        let booking = Booking {
            id,
            service_id: None,
            global_service_id: Some(7),
            provider_id,
            requester_id: Some(requester_id),
            scheduled_at: Some(Utc::now() + ChronoDuration::days(1)),
            notes: None,
            status: BookingStatus::Pending,
            user_address: None,
            user_lat: Some(12.9),
            user_lon: Some(77.5),
            service_title: Some("Plumbing".to_string()),
            user_name: None,
            cancelled_by: None,
            cancel_reason: None,
            created_at: Some(Utc::now().to_rfc3339()),
            location_label: None,
        };
        self.state.lock().bookings.push(booking);
    }

    pub fn booking(&self, id: i64) -> Option<Booking> {
        self.state.lock().bookings.iter().find(|b| b.id == id).cloned()
    }

    pub fn request_count(&self) -> usize {
        self.state.lock().requests.len()
    }

    pub fn last_request(&self) -> Option<ApiRequest> {
        self.state.lock().requests.last().cloned()
    }

    fn handle(&self, request: &ApiRequest) -> ApiResponse {
        let mut state = self.state.lock();

        if let Some((status, detail)) = state.fail_next.take() {
            return error(status, detail.as_deref().unwrap_or(""));
        }

        if request.method == Method::Post && request.path == "/auth/login" {
            return login(&state, request.body.as_ref());
        }
        if request.method == Method::Post && request.path == "/auth/register" {
            return register_account(&mut state, request.body.as_ref());
        }

        let Some(user) = request
            .bearer
            .as_ref()
            .and_then(|t| state.users.get(t))
            .cloned()
        else {
            return error(401, "Could not validate credentials");
        };

        let segments: Vec<&str> = request.path.split('/').filter(|s| !s.is_empty()).collect();
        match (request.method, segments.as_slice()) {
            (Method::Get, ["auth", "me"]) => ok(json!(user.identity)),
            (Method::Get, ["match", "providers"]) => ok(state.match_response.clone()),
            (Method::Post, ["bookings"]) => create_booking(&mut state, &user, request.body.as_ref()),
            (Method::Get, ["bookings"]) => {
                let mine: Vec<&Booking> = state
                    .bookings
                    .iter()
                    .filter(|b| b.requester_id == Some(user.identity.id))
                    .collect();
                ok(json!(mine))
            }
            (Method::Get, ["bookings", "provider"]) => {
                let Some(profile) = user.provider_profile else {
                    return error(403, "Provider profile required");
                };
                let assigned: Vec<&Booking> = state
                    .bookings
                    .iter()
                    .filter(|b| {
                        b.provider_id == Some(profile)
                            || (b.provider_id.is_none() && b.status == BookingStatus::Pending)
                    })
                    .collect();
                ok(json!(assigned))
            }
            (Method::Put, ["bookings", id, action @ ..]) => match id.parse::<i64>() {
                Ok(id) => transition(&mut state, &user, id, &action.join("/"), request.body.as_ref()),
                Err(_) => error(422, "booking id must be an integer"),
            },
            _ => error(404, "Not Found"),
        }
    }
}

#[async_trait]
impl Transport for FakeMarketplace {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ClientError> {
        let delay = {
            let mut state = self.state.lock();
            state.requests.push(request.clone());
            state.delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(self.handle(&request))
    }
}

fn ok(body: Value) -> ApiResponse {
    ApiResponse::new(200, body)
}

fn error(status: u16, detail: &str) -> ApiResponse {
    if detail.is_empty() {
        ApiResponse::new(status, Value::Null)
    } else {
        ApiResponse::new(status, json!({ "detail": detail }))
    }
}

fn login(state: &MarketState, body: Option<&Value>) -> ApiResponse {
    let field = |name: &str| body.and_then(|b| b.get(name)).and_then(Value::as_str).unwrap_or("");
    let (email, password) = (field("email"), field("password"));

    let expected = state
        .passwords
        .get(email)
        .map(String::as_str)
        .unwrap_or(FakeMarketplace::PASSWORD);

    match state.users.values().find(|u| u.identity.email == email) {
        Some(user) if password == expected => {
            ok(json!({ "access_token": user.token, "token_type": "bearer" }))
        }
        _ => error(401, "Invalid credentials"),
    }
}

fn register_account(state: &mut MarketState, body: Option<&Value>) -> ApiResponse {
    let field = |name: &str| body.and_then(|b| b.get(name)).and_then(Value::as_str);
    let (Some(email), Some(password)) = (field("email"), field("password")) else {
        return error(422, "email and password are required");
    };

    if state.users.values().any(|u| u.identity.email == email) {
        return error(400, "Email already registered");
    }
    let role = match field("role").unwrap_or("customer") {
        "customer" => Role::Customer,
        "provider" => Role::Provider,
        _ => return error(400, "Invalid role. Must be 'customer' or 'provider'"),
    };

    state.next_user_id += 1;
    let id = state.next_user_id;
    let identity = Identity {
        id,
        email: email.to_string(),
        role,
        name: field("name").map(str::to_string),
    };
    let user = TestUser {
        token: issue_token(id, role.as_str(), Some(email), 3600),
        identity: identity.clone(),
        provider_profile: (role == Role::Provider).then_some(id),
    };
    state.users.insert(user.token.clone(), user);
    state.passwords.insert(email.to_string(), password.to_string());
    ok(json!(identity))
}

fn create_booking(state: &mut MarketState, user: &TestUser, body: Option<&Value>) -> ApiResponse {
    let Some(payload) = body
        .cloned()
        .and_then(|b| serde_json::from_value::<CreateBookingRequest>(b).ok())
    else {
        return error(422, "Invalid booking payload");
    };
    if payload.service_id.is_none() && payload.global_service_id.is_none() {
        return error(400, "Either service_id or global_service_id is required");
    }

    state.next_id += 1;
    let booking = Booking {
        id: state.next_id,
        service_id: payload.service_id,
        global_service_id: payload.global_service_id,
        provider_id: payload.provider_id,
        requester_id: Some(user.identity.id),
        scheduled_at: Some(payload.scheduled_at),
        notes: payload.notes,
        status: BookingStatus::Pending,
        user_address: payload.user_address,
        user_lat: payload.user_lat,
        user_lon: payload.user_lon,
        service_title: None,
        user_name: user.identity.name.clone(),
        cancelled_by: None,
        cancel_reason: None,
        created_at: Some(Utc::now().to_rfc3339()),
        location_label: None,
    };
    state.bookings.push(booking.clone());
    ApiResponse::new(201, json!(booking))
}

fn transition(
    state: &mut MarketState,
    user: &TestUser,
    id: i64,
    action: &str,
    body: Option<&Value>,
) -> ApiResponse {
    let Some(booking) = state.bookings.iter_mut().find(|b| b.id == id) else {
        return error(404, "Booking not found");
    };

    let reason = body
        .and_then(|b| b.get("reason"))
        .and_then(Value::as_str)
        .map(str::to_string);

    if action == "cancel" {
        if booking.requester_id != Some(user.identity.id) {
            return error(404, "Booking not found");
        }
        if booking.status != BookingStatus::Pending {
            return error(400, "Only pending bookings can be cancelled by user");
        }
        booking.status = BookingStatus::Cancelled;
        booking.cancelled_by = Some("user".to_string());
        booking.cancel_reason = reason;
        return ok(json!(booking));
    }

    let Some(profile) = user.provider_profile else {
        return error(403, "Provider profile required");
    };
    let assigned = booking.provider_id.map_or(true, |p| p == profile);

    match action {
        "accept" | "reject" => {
            if !assigned {
                return error(403, &format!("Only the assigned provider can {} this booking", action));
            }
            if booking.status != BookingStatus::Pending {
                return error(400, &format!("Only pending bookings can be {}ed", action));
            }
            booking.provider_id = Some(profile);
            booking.status = if action == "accept" {
                BookingStatus::Accepted
            } else {
                BookingStatus::Rejected
            };
        }
        "complete" => {
            if booking.provider_id != Some(profile) {
                return error(403, "Only the assigned provider can complete this booking");
            }
            if !booking.status.is_active() {
                return error(400, "Only accepted bookings can be completed");
            }
            booking.status = BookingStatus::Completed;
        }
        "cancel/provider" => {
            if booking.provider_id != Some(profile) {
                return error(403, "Only the assigned provider can cancel this booking");
            }
            if !booking.status.is_active() {
                return error(400, "Only accepted bookings can be cancelled by provider");
            }
            booking.status = BookingStatus::Cancelled;
            booking.cancelled_by = Some("provider".to_string());
            booking.cancel_reason = reason;
        }
        _ => return error(404, "Not Found"),
    }
    ok(json!(booking))
}

pub(crate) fn customer(fake: &FakeMarketplace, id: i64, email: &str) -> TestUser {
    fake.register(id, email, Role::Customer, None)
}

pub(crate) fn provider(fake: &FakeMarketplace, id: i64, profile: i64, email: &str) -> TestUser {
    fake.register(id, email, Role::Provider, Some(profile))
}

/// One client process: storage, session and API client wired to a fake server.
pub(crate) struct Harness {
    pub fake: FakeMarketplace,
    pub storage: Arc<MemoryStorage>,
    pub session: SessionManager,
    pub api: ApiClient,
}

impl Harness {
    const TIMEOUT: Duration = Duration::from_secs(2);

    pub fn new() -> Self {
        Self::build(FakeMarketplace::new(), Arc::new(MemoryStorage::default()), Self::TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::build(FakeMarketplace::new(), Arc::new(MemoryStorage::default()), timeout)
    }

    pub fn with_shared(fake: FakeMarketplace, storage: Arc<MemoryStorage>) -> Self {
        Self::build(fake, storage, Self::TIMEOUT)
    }

    /// A process that starts with `token` already in storage.
    pub fn with_stored_token(token: &str) -> Self {
        let storage = Arc::new(MemoryStorage::default());
        write_session(&storage, token);
        Self::build(FakeMarketplace::new(), storage, Self::TIMEOUT)
    }

    /// A second client process talking to the same server.
    pub fn sharing_server(&self) -> Self {
        Self::build(self.fake.clone(), Arc::new(MemoryStorage::default()), Self::TIMEOUT)
    }

    fn build(fake: FakeMarketplace, storage: Arc<MemoryStorage>, timeout: Duration) -> Self {
        let store = CredentialStore::new(Box::new(SharedStorage(storage.clone())));
        let session = SessionManager::new(store);
        let api = ApiClient::new(Arc::new(fake.clone()), session.clone(), timeout);
        Self {
            fake,
            storage,
            session,
            api,
        }
    }

    pub async fn sign_in(&self, user: &TestUser) {
        self.session
            .login(&self.api, &user.token, Some(user.identity.clone()))
            .await
            .unwrap();
    }

    pub fn store_token(&self, token: &str) {
        write_session(&self.storage, token);
    }

    pub fn store_is_empty(&self) -> bool {
        self.storage.read().unwrap().is_none()
    }
}

fn write_session(storage: &MemoryStorage, token: &str) {
    let stored = StoredSession {
        token: token.to_string(),
        identity: None,
    };
    storage.write(&serde_json::to_string(&stored).unwrap()).unwrap();
}
