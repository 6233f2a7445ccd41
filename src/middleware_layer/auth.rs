use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use tower_cookies::Cookies;

use crate::{
    error::AppError,
    models::principal::{Principal, Role},
    models::session::Freshness,
    services::roles::{ResolveError, RoleResolver},
    services::session::{SessionAccess, SessionStore},
    state::AppState,
};

/// Login page used for protected paths that carry no role segment.
pub const DEFAULT_LOGIN_PATH: &str = "/owner/login";

/// The credential endpoint. Always public.
const CREDENTIAL_PATH: &str = "/api/auth/login";

const API_PREFIX: &str = "/api";

/// Path layout of one role's portal.
struct Portal {
    role: Role,
    login: &'static str,
    /// Root of the protected dashboard subtree; also the post-login home.
    home: &'static str,
}

const PORTALS: [Portal; 3] = [
    Portal {
        role: Role::Owner,
        login: "/owner/login",
        home: "/owner/dashboard",
    },
    Portal {
        role: Role::Dispatcher,
        login: "/dispatcher/login",
        home: "/dispatcher/dashboard",
    },
    Portal {
        role: Role::Technician,
        login: "/technician/login",
        home: "/technician/dashboard",
    },
];

fn portal(role: Role) -> &'static Portal {
    match role {
        Role::Owner => &PORTALS[0],
        Role::Dispatcher => &PORTALS[1],
        Role::Technician => &PORTALS[2],
    }
}

pub fn login_path(role: Role) -> &'static str {
    portal(role).login
}

pub fn home_path(role: Role) -> &'static str {
    portal(role).home
}

/// Segment-aware prefix test: `/owner` covers `/owner` and `/owner/x` but
/// not `/owners`.
fn under(path: &str, prefix: &str) -> bool {
    path == prefix
        || path
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('/'))
}

/// Who may enter a protected path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    Role(Role),
    AnyRole,
}

impl Requirement {
    fn admits(self, role: Role) -> bool {
        match self {
            Requirement::Role(required) => required == role,
            Requirement::AnyRole => true,
        }
    }
}

/// What the gateway knows about a path before looking at the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteClass {
    Public,
    LoginPage(Role),
    Protected {
        requirement: Requirement,
        login: &'static str,
    },
}

/// Classifies a request path.
///
/// # Arguments
///
/// * `path` - The request path, without query string.
///
/// # Returns
///
/// The `RouteClass` governing the path.
pub fn classify(path: &str) -> RouteClass {
    let trimmed = path.trim_end_matches('/');
    let path = if trimmed.is_empty() { "/" } else { trimmed };

    if path == CREDENTIAL_PATH {
        return RouteClass::Public;
    }

    for portal in &PORTALS {
        if path == portal.login {
            return RouteClass::LoginPage(portal.role);
        }
        if under(path, portal.home) {
            return RouteClass::Protected {
                requirement: Requirement::Role(portal.role),
                login: portal.login,
            };
        }
    }

    if under(path, API_PREFIX) {
        return RouteClass::Protected {
            requirement: Requirement::AnyRole,
            login: DEFAULT_LOGIN_PATH,
        };
    }

    RouteClass::Public
}

/// Gateway state computed at request entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Anonymous,
    Authenticated(Principal),
}

/// Terminal gateway outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Continue to the handler, with the principal when one was resolved.
    Pass(Option<Principal>),
    RedirectToLogin(&'static str),
    RedirectToHome(&'static str),
}

/// Pure admission decision.
///
/// Login pages never redirect to a login page, and a home redirect always
/// targets a path the same principal passes, so no outcome can loop.
pub fn decide(class: RouteClass, admission: Admission) -> Outcome {
    match class {
        RouteClass::Public => Outcome::Pass(None),
        RouteClass::LoginPage(role) => match admission {
            Admission::Authenticated(principal) if principal.role == role => {
                Outcome::RedirectToHome(home_path(role))
            }
            _ => Outcome::Pass(None),
        },
        RouteClass::Protected { requirement, login } => match admission {
            Admission::Anonymous => Outcome::RedirectToLogin(login),
            Admission::Authenticated(principal) if requirement.admits(principal.role) => {
                Outcome::Pass(Some(principal))
            }
            Admission::Authenticated(principal) => {
                tracing::debug!(
                    "🚫 {} ({}) denied outside its portal",
                    principal.id,
                    principal.role
                );
                Outcome::RedirectToLogin(login)
            }
        },
    }
}

/// Computes the admission state from the session and the role resolver.
///
/// A session inside the refresh window is refreshed at most once. A refresh
/// the identity service rejects clears the cookie; an outage leaves it in
/// place but still admits nobody.
pub async fn admit(session: &dyn SessionAccess, roles: &RoleResolver) -> Admission {
    let Some(mut current) = session.current() else {
        return Admission::Anonymous;
    };

    let freshness = current.freshness();
    if freshness != Freshness::Fresh {
        if current.is_refreshable() {
            match session.refresh().await {
                Ok(rotated) => current = rotated,
                Err(AppError::SessionExpired) => {
                    tracing::debug!("🔒 Refresh rejected for {}, clearing session", current.user_id);
                    session.clear();
                    return Admission::Anonymous;
                }
                Err(e) => {
                    tracing::error!("❌ Session refresh failed for {}: {}", current.user_id, e);
                    return Admission::Anonymous;
                }
            }
        } else if freshness == Freshness::Expired {
            session.clear();
            return Admission::Anonymous;
        }
    }

    match roles.principal(&current).await {
        Ok(principal) => Admission::Authenticated(principal),
        Err(ResolveError::NoProfile) => {
            tracing::warn!("⚠️ No profile for identity {}", current.user_id);
            Admission::Anonymous
        }
        Err(ResolveError::InactiveAccount) => {
            tracing::warn!("⚠️ Inactive account {} tried to sign in", current.user_id);
            Admission::Anonymous
        }
        Err(ResolveError::Upstream(e)) => {
            tracing::error!("❌ Role lookup failed for {}: {}", current.user_id, e);
            Admission::Anonymous
        }
    }
}

/// Runs the whole gateway for one path.
///
/// Public paths are decided without reading the session at all.
pub async fn evaluate(path: &str, session: &dyn SessionAccess, roles: &RoleResolver) -> Outcome {
    let class = classify(path);
    let admission = match class {
        RouteClass::Public => Admission::Anonymous,
        _ => admit(session, roles).await,
    };
    decide(class, admission)
}

fn unauthenticated(login: &'static str) -> Response {
    let body = sonic_rs::to_string(&sonic_rs::json!({
        "error": "Authentication required",
        "code": "unauthenticated",
        "login": login,
    }))
    .unwrap_or_else(|_| r#"{"error":"Authentication required"}"#.to_string());

    (
        StatusCode::UNAUTHORIZED,
        [(header::CONTENT_TYPE, "application/json")],
        body,
    )
        .into_response()
}

/// The access gateway, applied once around the whole router.
///
/// # Arguments
///
/// * `state` - The application state.
/// * `cookies` - The request cookies.
/// * `request` - The incoming request.
/// * `next` - The next middleware in the chain.
///
/// # Returns
///
/// The handler's response, a `303 See Other` for page redirects, or a
/// `401` JSON body for API requests without a usable session.
pub async fn access_gateway(
    State(state): State<AppState>,
    cookies: Cookies,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    let store = SessionStore::new(cookies, &state);

    match evaluate(&path, &store, &state.roles).await {
        Outcome::Pass(principal) => {
            if let Some(principal) = principal {
                tracing::debug!("✅ {} admitted as {} to {}", principal.id, principal.role, path);
                request.extensions_mut().insert(principal);
            }
            next.run(request).await
        }
        Outcome::RedirectToLogin(login) if under(&path, API_PREFIX) => {
            tracing::debug!("🔐 API request to {} without session", path);
            unauthenticated(login)
        }
        Outcome::RedirectToLogin(login) => {
            tracing::debug!("🔐 Redirecting {} to {}", path, login);
            Redirect::to(login).into_response()
        }
        Outcome::RedirectToHome(home) => {
            tracing::debug!("🏠 Redirecting {} to {}", path, home);
            Redirect::to(home).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::models::principal::PrincipalId;
    use crate::models::session::Session;
    use crate::repositories::memory::MemoryProfileDirectory;
    use async_trait::async_trait;
    use chrono::{Duration, Utc};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use uuid::Uuid;

    enum RefreshScript {
        Rotate,
        Reject,
        Outage,
    }

    struct FakeSession {
        held: Mutex<Option<Session>>,
        script: RefreshScript,
        reads: AtomicUsize,
        refreshes: AtomicUsize,
        cleared: AtomicBool,
    }

    impl FakeSession {
        fn new(held: Option<Session>, script: RefreshScript) -> Self {
            Self {
                held: Mutex::new(held),
                script,
                reads: AtomicUsize::new(0),
                refreshes: AtomicUsize::new(0),
                cleared: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl SessionAccess for FakeSession {
        fn current(&self) -> Option<Session> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.held.lock().unwrap().clone()
        }

        async fn refresh(&self) -> Result<Session> {
            self.refreshes.fetch_add(1, Ordering::SeqCst);
            match self.script {
                RefreshScript::Rotate => {
                    let mut held = self.held.lock().unwrap();
                    let mut session = held.clone().ok_or(AppError::SessionExpired)?;
                    session.token = "rotated".into();
                    session.expires_at = Utc::now() + Duration::hours(1);
                    *held = Some(session.clone());
                    Ok(session)
                }
                RefreshScript::Reject => Err(AppError::SessionExpired),
                RefreshScript::Outage => Err(AppError::UpstreamUnavailable("timeout".into())),
            }
        }

        fn clear(&self) {
            self.cleared.store(true, Ordering::SeqCst);
            *self.held.lock().unwrap() = None;
        }
    }

    fn session_for(user_id: PrincipalId, expires_in: Duration) -> Session {
        let now = Utc::now();
        Session {
            token: "access".into(),
            refresh_token: "refresh".into(),
            user_id,
            email: "user@hem.test".into(),
            issued_at: now,
            expires_at: now + expires_in,
        }
    }

    fn resolver() -> (Arc<MemoryProfileDirectory>, RoleResolver) {
        let profiles = Arc::new(MemoryProfileDirectory::default());
        (profiles.clone(), RoleResolver::new(profiles))
    }

    fn fresh(user_id: PrincipalId) -> FakeSession {
        FakeSession::new(Some(session_for(user_id, Duration::hours(1))), RefreshScript::Rotate)
    }

    #[test]
    fn paths_classify_by_segment() {
        assert_eq!(classify("/"), RouteClass::Public);
        assert_eq!(classify("/forgot-password.html"), RouteClass::Public);
        assert_eq!(classify("/api/auth/login"), RouteClass::Public);
        assert_eq!(classify("/owners/dashboard"), RouteClass::Public);
        assert_eq!(classify("/owner/forgot-password"), RouteClass::Public);
        assert_eq!(classify("/owner/reset-password"), RouteClass::Public);
        assert_eq!(classify("/owner"), RouteClass::Public);
        assert_eq!(classify("/dispatcher/dashboards"), RouteClass::Public);
        assert_eq!(
            classify("/dispatcher/dashboard/jobs/42"),
            RouteClass::Protected {
                requirement: Requirement::Role(Role::Dispatcher),
                login: "/dispatcher/login",
            }
        );
        assert_eq!(classify("/owner/login/"), RouteClass::LoginPage(Role::Owner));
        assert_eq!(
            classify("/technician/dashboard"),
            RouteClass::Protected {
                requirement: Requirement::Role(Role::Technician),
                login: "/technician/login",
            }
        );
        assert_eq!(
            classify("/api/jobs"),
            RouteClass::Protected {
                requirement: Requirement::AnyRole,
                login: DEFAULT_LOGIN_PATH,
            }
        );
    }

    #[tokio::test]
    async fn anonymous_requests_go_to_the_portal_login() {
        let (_, roles) = resolver();
        for role in Role::ALL {
            let session = FakeSession::new(None, RefreshScript::Rotate);
            assert_eq!(
                evaluate(home_path(role), &session, &roles).await,
                Outcome::RedirectToLogin(login_path(role))
            );
        }
    }

    #[tokio::test]
    async fn login_redirects_never_loop() {
        let (profiles, roles) = resolver();
        let owner = profiles.add_staff(Role::Owner);

        for role in Role::ALL {
            let anonymous = FakeSession::new(None, RefreshScript::Rotate);
            assert_eq!(
                evaluate(login_path(role), &anonymous, &roles).await,
                Outcome::Pass(None)
            );
        }

        let signed_in = fresh(owner);
        let Outcome::RedirectToHome(home) = evaluate("/owner/login", &signed_in, &roles).await
        else {
            panic!("owner login page should send a signed-in owner home");
        };
        assert!(matches!(
            evaluate(home, &signed_in, &roles).await,
            Outcome::Pass(Some(_))
        ));
    }

    #[tokio::test]
    async fn matching_role_passes_with_its_principal() {
        let (profiles, roles) = resolver();
        let dispatcher = profiles.add_staff(Role::Dispatcher);

        match evaluate("/dispatcher/dashboard", &fresh(dispatcher), &roles).await {
            Outcome::Pass(Some(principal)) => {
                assert_eq!(principal.id, dispatcher);
                assert_eq!(principal.role, Role::Dispatcher);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn cross_role_access_is_denied() {
        let (profiles, roles) = resolver();
        let (technician, _) = profiles.add_technician("Ana Ruiz", true);
        let session = fresh(technician);

        assert_eq!(
            evaluate("/owner/dashboard", &session, &roles).await,
            Outcome::RedirectToLogin("/owner/login")
        );
        assert_eq!(
            evaluate("/owner/login", &session, &roles).await,
            Outcome::Pass(None)
        );
        assert!(matches!(
            evaluate("/api/jobs", &session, &roles).await,
            Outcome::Pass(Some(_))
        ));
    }

    #[tokio::test]
    async fn unresolved_principals_are_treated_as_anonymous() {
        let (profiles, roles) = resolver();
        let (technician, technician_id) = profiles.add_technician("Ana Ruiz", true);
        profiles.set_active(technician_id, false);

        assert_eq!(
            evaluate("/technician/dashboard", &fresh(technician), &roles).await,
            Outcome::RedirectToLogin("/technician/login")
        );
        assert_eq!(
            evaluate(
                "/technician/dashboard",
                &fresh(PrincipalId(Uuid::new_v4())),
                &roles
            )
            .await,
            Outcome::RedirectToLogin("/technician/login")
        );
    }

    #[tokio::test]
    async fn expiring_session_is_refreshed_once() {
        let (profiles, roles) = resolver();
        let owner = profiles.add_staff(Role::Owner);
        let session = FakeSession::new(
            Some(session_for(owner, Duration::seconds(10))),
            RefreshScript::Rotate,
        );

        assert!(matches!(
            evaluate("/owner/dashboard", &session, &roles).await,
            Outcome::Pass(Some(_))
        ));
        assert_eq!(session.refreshes.load(Ordering::SeqCst), 1);
        assert_eq!(session.current().unwrap().token, "rotated");
    }

    #[tokio::test]
    async fn rejected_refresh_clears_the_session() {
        let (profiles, roles) = resolver();
        let owner = profiles.add_staff(Role::Owner);
        let session = FakeSession::new(
            Some(session_for(owner, Duration::seconds(-5))),
            RefreshScript::Reject,
        );

        assert_eq!(
            evaluate("/owner/dashboard", &session, &roles).await,
            Outcome::RedirectToLogin("/owner/login")
        );
        assert!(session.cleared.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn refresh_outage_fails_closed_and_keeps_the_cookie() {
        let (profiles, roles) = resolver();
        let owner = profiles.add_staff(Role::Owner);
        let session = FakeSession::new(
            Some(session_for(owner, Duration::seconds(-5))),
            RefreshScript::Outage,
        );

        assert_eq!(
            evaluate("/owner/dashboard", &session, &roles).await,
            Outcome::RedirectToLogin("/owner/login")
        );
        assert!(!session.cleared.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn expired_session_without_refresh_token_is_absent() {
        let (profiles, roles) = resolver();
        let owner = profiles.add_staff(Role::Owner);
        let mut expired = session_for(owner, Duration::seconds(-5));
        expired.refresh_token.clear();
        let session = FakeSession::new(Some(expired), RefreshScript::Rotate);

        assert_eq!(
            evaluate("/owner/dashboard", &session, &roles).await,
            Outcome::RedirectToLogin("/owner/login")
        );
        assert_eq!(session.refreshes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn public_paths_never_read_the_session() {
        let (_, roles) = resolver();
        let session = FakeSession::new(None, RefreshScript::Rotate);

        for path in ["/", "/api/auth/login", "/reset-password.html"] {
            assert_eq!(evaluate(path, &session, &roles).await, Outcome::Pass(None));
        }
        assert_eq!(session.reads.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn api_redirects_render_as_json() {
        let response = unauthenticated(DEFAULT_LOGIN_PATH);
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
