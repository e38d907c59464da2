//! Access Guard and navigation.
//!
//! `decide` is the whole access policy: a pure function of the session
//! snapshot and a route's requirements. `Navigator` keeps track of the current
//! route and reacts to session events, sending the user to the login screen at
//! most once per navigation when the session expires.

use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::session::role::normalize_all;
use crate::session::{Role, SessionEvent, SessionSnapshot, SessionStatus};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Access {
    /// The session is still resolving; show a loading affordance.
    ShowLoading,
    RedirectTo(Route),
    Render,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Route {
    Home,
    Login,
    Register,
    Match,
    Book,
    Bookings,
    BookingDetail(i64),
    ServiceDetail(i64),
    ProviderBookings,
    /// `/admin` or `/admin/<section>`.
    Admin(Option<String>),
}

/// What a route demands of the session. Public routes have none.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Requirement {
    pub roles: &'static [&'static str],
    pub require_admin: bool,
}

const ANY_ROLE: &[&str] = &["customer", "user", "provider", "admin"];
const PROVIDER_ONLY: &[&str] = &["provider"];

impl Route {
    pub fn path(&self) -> String {
        match self {
            Route::Home => "/".to_string(),
            Route::Login => "/login".to_string(),
            Route::Register => "/register".to_string(),
            Route::Match => "/match".to_string(),
            Route::Book => "/book".to_string(),
            Route::Bookings => "/bookings".to_string(),
            Route::BookingDetail(id) => format!("/bookings/{}", id),
            Route::ServiceDetail(id) => format!("/service/{}", id),
            Route::ProviderBookings => "/provider/bookings".to_string(),
            Route::Admin(None) => "/admin".to_string(),
            Route::Admin(Some(section)) => format!("/admin/{}", section),
        }
    }

    /// Parse a path. Unknown paths yield `None`.
    pub fn parse(path: &str) -> Option<Route> {
        let path = path.split(['?', '#']).next().unwrap_or("");
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

        let route = match segments.as_slice() {
            [] => Route::Home,
            ["login"] => Route::Login,
            ["register"] => Route::Register,
            ["match"] => Route::Match,
            ["book"] => Route::Book,
            ["bookings"] => Route::Bookings,
            ["bookings", id] | ["booking", id] => Route::BookingDetail(id.parse().ok()?),
            ["service", id] => Route::ServiceDetail(id.parse().ok()?),
            ["provider", "bookings"] => Route::ProviderBookings,
            ["admin"] => Route::Admin(None),
            ["admin", section] => Route::Admin(Some(section.to_string())),
            _ => return None,
        };
        Some(route)
    }

    pub fn requirement(&self) -> Option<Requirement> {
        match self {
            Route::Home | Route::Login | Route::Register | Route::ServiceDetail(_) => None,
            Route::Match | Route::Book | Route::Bookings | Route::BookingDetail(_) => Some(Requirement {
                roles: ANY_ROLE,
                require_admin: false,
            }),
            Route::ProviderBookings => Some(Requirement {
                roles: PROVIDER_ONLY,
                require_admin: false,
            }),
            Route::Admin(_) => Some(Requirement {
                roles: &[],
                require_admin: true,
            }),
        }
    }

    pub fn is_public(&self) -> bool {
        self.requirement().is_none()
    }
}

impl std::fmt::Display for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.path())
    }
}

/// Decide what to show for a protected screen.
///
/// `customer` and `user` are the same role on both sides of the comparison.
pub fn decide<R: AsRef<str>>(
    session: &SessionSnapshot,
    required_roles: &[R],
    require_admin: bool,
) -> Access {
    if session.status == SessionStatus::Resolving {
        return Access::ShowLoading;
    }

    let role = match (&session.status, session.role()) {
        (SessionStatus::Authenticated, Some(role)) => role,
        _ => return Access::RedirectTo(Route::Login),
    };

    if require_admin && role != Role::Admin {
        return Access::RedirectTo(Route::Login);
    }

    if !required_roles.is_empty() && !normalize_all(required_roles).contains(&role) {
        return Access::RedirectTo(Route::Home);
    }

    Access::Render
}

/// Access decision for a route, using its entry in the route table.
pub fn decide_route(session: &SessionSnapshot, route: &Route) -> Access {
    match route.requirement() {
        None => Access::Render,
        Some(req) => decide(session, req.roles, req.require_admin),
    }
}

#[derive(Debug, Clone)]
pub struct Navigator {
    current: Route,
    expiry_redirected: bool,
}

impl Navigator {
    pub fn new(start: Route) -> Self {
        Self {
            current: start,
            expiry_redirected: false,
        }
    }

    pub fn current(&self) -> &Route {
        &self.current
    }

    /// Navigate to `route`, following a redirect if the guard asks for one.
    /// Starts a new navigation, so a later expiry may redirect again.
    pub fn navigate(&mut self, route: Route, session: &SessionSnapshot) -> Access {
        self.expiry_redirected = false;
        let access = decide_route(session, &route);
        match &access {
            Access::RedirectTo(target) => {
                debug!(from = %route, to = %target, "Guard redirected navigation");
                self.current = target.clone();
            }
            _ => self.current = route,
        }
        access
    }

    /// React to a session event. Returns the route to move to, if any.
    pub fn on_session_event(&mut self, event: &SessionEvent) -> Option<Route> {
        match event {
            SessionEvent::LoggedIn(_) => None,
            SessionEvent::Expired | SessionEvent::LoggedOut => {
                if self.current == Route::Login || self.expiry_redirected {
                    return None;
                }
                if matches!(event, SessionEvent::LoggedOut) && self.current.is_public() {
                    return None;
                }
                info!(from = %self.current, "Session ended, redirecting to login");
                self.expiry_redirected = true;
                self.current = Route::Login;
                Some(Route::Login)
            }
        }
    }

    /// Handle every event already waiting on `rx`. Returns the last redirect.
    pub fn drain(&mut self, rx: &mut broadcast::Receiver<SessionEvent>) -> Option<Route> {
        let mut redirect = None;
        loop {
            match rx.try_recv() {
                Ok(event) => {
                    if let Some(route) = self.on_session_event(&event) {
                        redirect = Some(route);
                    }
                }
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    debug!(skipped, "Session events lagged");
                }
                Err(_) => break,
            }
        }
        redirect
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Identity;

    fn signed_in(role: Role) -> SessionSnapshot {
        SessionSnapshot::authenticated(Identity {
            id: 1,
            email: "a@example.com".to_string(),
            role,
            name: None,
        })
    }

    #[test]
    fn test_resolving_shows_loading() {
        let access = decide(&SessionSnapshot::resolving(), &["admin"], true);
        assert_eq!(access, Access::ShowLoading);
    }

    #[test]
    fn test_unauthenticated_redirects_to_login() {
        let none: [&str; 0] = [];
        assert_eq!(
            decide(&SessionSnapshot::unauthenticated(), &none, false),
            Access::RedirectTo(Route::Login)
        );

        // Authenticated without an identity is not signed in.
        let broken = SessionSnapshot {
            status: SessionStatus::Authenticated,
            identity: None,
        };
        assert_eq!(decide(&broken, &none, false), Access::RedirectTo(Route::Login));
    }

    #[test]
    fn test_customer_and_user_are_interchangeable() {
        for session in [signed_in(Role::Customer), signed_in(Role::parse("user").unwrap())] {
            assert_eq!(decide(&session, &["customer"], false), Access::Render);
            assert_eq!(decide(&session, &["user"], false), Access::Render);
            assert_eq!(decide(&session, &[" USER "], false), Access::Render);
        }
    }

    #[test]
    fn test_role_mismatch_redirects_home() {
        assert_eq!(
            decide(&signed_in(Role::Customer), &["provider"], false),
            Access::RedirectTo(Route::Home)
        );
        assert_eq!(
            decide(&signed_in(Role::Provider), &["wizard"], false),
            Access::RedirectTo(Route::Home)
        );
    }

    #[test]
    fn test_admin_requirement() {
        let none: [&str; 0] = [];
        assert_eq!(
            decide(&signed_in(Role::Provider), &none, true),
            Access::RedirectTo(Route::Login)
        );
        assert_eq!(decide(&signed_in(Role::Admin), &none, true), Access::Render);
    }

    #[test]
    fn test_route_table() {
        let customer = signed_in(Role::Customer);
        assert_eq!(decide_route(&customer, &Route::Match), Access::Render);
        assert_eq!(decide_route(&customer, &Route::Bookings), Access::Render);
        assert_eq!(
            decide_route(&customer, &Route::ProviderBookings),
            Access::RedirectTo(Route::Home)
        );
        assert_eq!(
            decide_route(&signed_in(Role::Provider), &Route::ProviderBookings),
            Access::Render
        );
        assert_eq!(
            decide_route(&SessionSnapshot::unauthenticated(), &Route::Home),
            Access::Render
        );
    }

    #[test]
    fn test_route_paths() {
        for path in ["/", "/login", "/match", "/bookings/42", "/provider/bookings", "/admin/users"] {
            assert_eq!(Route::parse(path).unwrap().path(), path);
        }
        assert_eq!(Route::parse("/booking/7"), Some(Route::BookingDetail(7)));
        assert_eq!(Route::parse("/bookings?tab=active"), Some(Route::Bookings));
        assert_eq!(Route::parse("/bookings/abc"), None);
        assert_eq!(Route::parse("/nowhere"), None);
    }

    #[test]
    fn test_expiry_redirects_once_per_navigation() {
        let mut nav = Navigator::new(Route::Home);
        nav.navigate(Route::Bookings, &signed_in(Role::Customer));
        assert_eq!(nav.current(), &Route::Bookings);

        assert_eq!(nav.on_session_event(&SessionEvent::Expired), Some(Route::Login));
        assert_eq!(nav.on_session_event(&SessionEvent::Expired), None);
        assert_eq!(nav.current(), &Route::Login);
    }

    #[test]
    fn test_no_redirect_when_already_on_login() {
        let mut nav = Navigator::new(Route::Login);
        assert_eq!(nav.on_session_event(&SessionEvent::Expired), None);
        assert_eq!(nav.on_session_event(&SessionEvent::LoggedOut), None);
    }

    #[test]
    fn test_logout_on_public_route_stays() {
        let mut nav = Navigator::new(Route::Home);
        assert_eq!(nav.on_session_event(&SessionEvent::LoggedOut), None);
        assert_eq!(nav.current(), &Route::Home);
    }

    #[test]
    fn test_navigate_follows_redirect() {
        let mut nav = Navigator::new(Route::Home);
        let access = nav.navigate(Route::Admin(None), &signed_in(Role::Customer));
        assert_eq!(access, Access::RedirectTo(Route::Login));
        assert_eq!(nav.current(), &Route::Login);
    }

    #[tokio::test]
    async fn test_drain_handles_burst_of_expiries() {
        let bus = crate::session::SessionBus::default();
        let mut rx = bus.subscribe();
        let mut nav = Navigator::new(Route::Match);

        bus.publish(SessionEvent::Expired);
        bus.publish(SessionEvent::Expired);
        bus.publish(SessionEvent::Expired);

        assert_eq!(nav.drain(&mut rx), Some(Route::Login));
        assert_eq!(nav.drain(&mut rx), None);
    }
}
