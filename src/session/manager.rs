//! Session Manager.
//!
//! Owns the credential and the derived identity. Every write to the Credential
//! Store goes through here so the bearer header the API client attaches and
//! the persisted copy never disagree.
//!
//! Each credential change bumps an epoch. The API client captures the epoch
//! when it sends a request and checks it again when the response arrives; a
//! response that outlived its session is discarded, and a 401 only clears the
//! session that issued the request.

use chrono::Utc;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};

use super::events::{SessionBus, SessionEvent};
use super::store::CredentialStore;
use super::token::decode_credential;
use super::{Identity, Role, SessionSnapshot, SessionStatus};
use crate::api::error::{ActionError, ClientError, Operation};
use crate::api::{ApiClient, RegisterRequest};
use crate::validation::{validate_email, validate_name, validate_password};

#[derive(Debug)]
struct SessionState {
    credential: Option<String>,
    identity: Option<Identity>,
    status: SessionStatus,
}

struct Inner {
    store: CredentialStore,
    state: RwLock<SessionState>,
    epoch: AtomicU64,
    bus: SessionBus,
    snapshots: watch::Sender<SessionSnapshot>,
}

/// Cheap to clone; all clones share one session.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    /// Create a manager over a store. The session starts `resolving` when the
    /// store holds a credential and `unauthenticated` otherwise; call
    /// [`SessionManager::bootstrap`] to settle it.
    pub fn new(store: CredentialStore) -> Self {
        let initial = if store.load().is_some() {
            SessionSnapshot::resolving()
        } else {
            SessionSnapshot::unauthenticated()
        };
        let (snapshots, _) = watch::channel(initial.clone());

        Self {
            inner: Arc::new(Inner {
                store,
                state: RwLock::new(SessionState {
                    credential: None,
                    identity: None,
                    status: initial.status,
                }),
                epoch: AtomicU64::new(0),
                bus: SessionBus::default(),
                snapshots,
            }),
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.inner.state.read();
        SessionSnapshot {
            status: state.status,
            identity: state.identity.clone(),
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.snapshot().status
    }

    pub fn identity(&self) -> Option<Identity> {
        self.inner.state.read().identity.clone()
    }

    pub fn role(&self) -> Option<Role> {
        self.inner.state.read().identity.as_ref().map(|i| i.role)
    }

    /// Reactive view: the receiver always holds the latest snapshot.
    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.inner.snapshots.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.bus.subscribe()
    }

    pub fn bus(&self) -> &SessionBus {
        &self.inner.bus
    }

    pub fn epoch(&self) -> u64 {
        self.inner.epoch.load(Ordering::SeqCst)
    }

    /// Bearer credential plus the epoch it belongs to. Crate-private: the
    /// credential never leaves the session and API layers.
    pub(crate) fn bearer(&self) -> (Option<String>, u64) {
        let state = self.inner.state.read();
        (state.credential.clone(), self.epoch())
    }

    /// Startup: restore the stored credential, then confirm it with the server.
    pub async fn bootstrap(&self, api: &ApiClient) -> SessionStatus {
        match self.restore() {
            SessionStatus::Unauthenticated => SessionStatus::Unauthenticated,
            _ => self.confirm(api).await,
        }
    }

    /// Synchronous half of [`SessionManager::bootstrap`]: load the stored
    /// credential and derive a provisional identity from it without any
    /// network call. Malformed or expired credentials are cleared.
    pub fn restore(&self) -> SessionStatus {
        let Some(stored) = self.inner.store.load_session() else {
            self.settle(None, None);
            return SessionStatus::Unauthenticated;
        };

        let decoded = decode_credential(&stored.token);
        let (Some(user_id), Some(role)) = (decoded.user_id, decoded.role) else {
            tracing::warn!("Stored credential is malformed, clearing session");
            self.inner.store.clear();
            self.settle(None, None);
            return SessionStatus::Unauthenticated;
        };

        if decoded.is_expired(Utc::now()) {
            tracing::info!(user_id, "Stored credential has expired, clearing session");
            self.inner.store.clear();
            self.settle(None, None);
            return SessionStatus::Unauthenticated;
        }

        let identity = stored
            .identity
            .filter(|cached| cached.id == user_id)
            .unwrap_or(Identity {
                id: user_id,
                email: decoded.email.unwrap_or_default(),
                role,
                name: None,
            });

        tracing::debug!(user_id, role = %identity.role, "Restored session from storage");
        self.settle(Some(stored.token), Some(identity));
        SessionStatus::Authenticated
    }

    /// Fetch the authoritative identity for the current credential.
    ///
    /// A 401 clears the session (through the API client's global hook). Other
    /// failures keep the provisional identity.
    pub async fn confirm(&self, api: &ApiClient) -> SessionStatus {
        let (credential, epoch) = self.bearer();
        if credential.is_none() {
            return self.status();
        }

        match api.me().await {
            Ok(identity) => {
                let mut state = self.inner.state.write();
                // A logout between the answer and this lock wins.
                if self.epoch() == epoch {
                    state.identity = Some(identity.clone());
                    state.status = SessionStatus::Authenticated;
                    drop(state);
                    self.inner.store.save_identity(&identity);
                    self.broadcast_snapshot();
                }
            }
            Err(ClientError::Unauthorized) => {
                tracing::info!("Stored credential was rejected by the server");
            }
            Err(ClientError::Superseded) => {}
            Err(e) => {
                tracing::warn!(error = %e, "Could not confirm session, keeping provisional identity");
            }
        }

        self.status()
    }

    /// Create an account (`POST /auth/register`). The current session is left
    /// alone; the new account signs in through
    /// [`SessionManager::login_with_password`].
    pub async fn register(
        &self,
        api: &ApiClient,
        email: &str,
        password: &str,
        name: Option<&str>,
        role: Role,
    ) -> Result<Identity, ActionError> {
        validate_email(email).map_err(ActionError::Validation)?;
        validate_password(password).map_err(ActionError::Validation)?;
        if role == Role::Admin {
            return Err(ActionError::validation("Sign up as a customer or a provider."));
        }
        let name = name.map(str::trim).filter(|n| !n.is_empty());
        if let Some(name) = name {
            validate_name(name).map_err(ActionError::Validation)?;
        }

        let request = RegisterRequest {
            email: email.trim().to_string(),
            password: password.to_string(),
            name: name.map(str::to_string),
            role,
        };
        let identity = api
            .register(&request)
            .await
            .map_err(|e| ActionError::classify(e, Operation::Submit, "Registration failed."))?;

        tracing::info!(user_id = identity.id, role = %identity.role, "Account registered");
        Ok(identity)
    }

    /// Sign in with email and password (`POST /auth/login`).
    pub async fn login_with_password(
        &self,
        api: &ApiClient,
        email: &str,
        password: &str,
    ) -> Result<Identity, ActionError> {
        validate_email(email).map_err(ActionError::Validation)?;
        validate_password(password).map_err(ActionError::Validation)?;

        let response = api
            .login(email.trim(), password)
            .await
            .map_err(|e| ActionError::classify(e, Operation::Submit, "Could not sign in."))?;

        self.login(api, &response.access_token, response.user).await
    }

    /// Install a credential and an optional already-known identity.
    ///
    /// The credential is stored first. Without an identity it is fetched from
    /// `/auth/me`; if that fails the credential is rolled back and the session
    /// ends up exactly as if login had never been attempted.
    pub async fn login(
        &self,
        api: &ApiClient,
        token: &str,
        identity: Option<Identity>,
    ) -> Result<Identity, ActionError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(ActionError::validation("The server did not return a credential."));
        }

        let epoch = self.install_credential(token);

        let identity = match identity {
            Some(identity) => identity,
            None => match api.me().await {
                Ok(identity) => identity,
                Err(e) => {
                    self.rollback_login(epoch);
                    return Err(ActionError::classify(
                        e,
                        Operation::Submit,
                        "Could not load your profile.",
                    ));
                }
            },
        };

        {
            let mut state = self.inner.state.write();
            if self.epoch() != epoch {
                return Err(ActionError::AuthRequired);
            }
            state.identity = Some(identity.clone());
            state.status = SessionStatus::Authenticated;
        }
        self.inner.store.save_identity(&identity);
        self.broadcast_snapshot();

        tracing::info!(user_id = identity.id, role = %identity.role, "Signed in");
        self.inner.bus.publish(SessionEvent::LoggedIn(identity.clone()));
        Ok(identity)
    }

    /// Clear credential, identity and storage. Idempotent.
    pub fn logout(&self) {
        if self.clear_session() {
            tracing::info!("Signed out");
            self.inner.bus.publish(SessionEvent::LoggedOut);
        }
    }

    /// Global 401 hook. Only acts when the rejected request belonged to the
    /// current session.
    pub(crate) fn handle_unauthorized(&self, request_epoch: u64) {
        if self.epoch() != request_epoch {
            tracing::debug!(request_epoch, "Ignoring 401 from a previous session");
            return;
        }
        if self.clear_session() {
            tracing::warn!("Session expired, credential rejected by the server");
            self.inner.bus.publish(SessionEvent::Expired);
        }
    }

    fn install_credential(&self, token: &str) -> u64 {
        self.inner.store.save(token);
        let epoch = {
            let mut state = self.inner.state.write();
            state.credential = Some(token.to_string());
            state.identity = None;
            state.status = SessionStatus::Resolving;
            self.inner.epoch.fetch_add(1, Ordering::SeqCst) + 1
        };
        self.broadcast_snapshot();
        epoch
    }

    fn rollback_login(&self, epoch: u64) {
        if self.epoch() == epoch {
            tracing::warn!("Login failed before identity was known, rolling back credential");
            self.clear_session();
        }
    }

    /// Returns whether anything was cleared.
    fn clear_session(&self) -> bool {
        let changed = {
            let mut state = self.inner.state.write();
            let changed = state.credential.is_some()
                || state.identity.is_some()
                || state.status != SessionStatus::Unauthenticated;
            state.credential = None;
            state.identity = None;
            state.status = SessionStatus::Unauthenticated;
            if changed {
                self.inner.epoch.fetch_add(1, Ordering::SeqCst);
            }
            changed
        };
        self.inner.store.clear();
        if changed {
            self.broadcast_snapshot();
        }
        changed
    }

    fn settle(&self, credential: Option<String>, identity: Option<Identity>) {
        {
            let mut state = self.inner.state.write();
            state.status = match (&credential, &identity) {
                (Some(_), Some(_)) => SessionStatus::Authenticated,
                _ => SessionStatus::Unauthenticated,
            };
            if credential.is_none() {
                state.identity = None;
            } else {
                state.identity = identity;
            }
            state.credential = credential;
            self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        }
        self.broadcast_snapshot();
    }

    fn broadcast_snapshot(&self) {
        self.inner.snapshots.send_replace(self.snapshot());
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("status", &self.status())
            .field("epoch", &self.epoch())
            .finish_non_exhaustive()
    }
}
