//! Request-scoped session store over the private cookie jar, and the
//! process-wide coordinator that collapses concurrent token refreshes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use futures::future::{BoxFuture, FutureExt, Shared};
use sha2::{Digest, Sha256};
use tower_cookies::cookie::{SameSite, time::Duration as CookieDuration};
use tower_cookies::{Cookie, Cookies, Key};

use crate::{
    error::{AppError, Result},
    models::session::Session,
    services::identity::{IdentityError, IdentityProvider},
    state::AppState,
};

/// Name of the private session cookie.
pub const SESSION_COOKIE: &str = "hem_session";

/// How long a rotated session is remembered under its old refresh token.
///
/// Requests that left the browser before the new cookie arrived still carry
/// the old refresh token; they get the rotated session instead of a second
/// upstream refresh, which the identity service would reject.
const ROTATION_GRACE: Duration = Duration::from_secs(30);

type Flight = Shared<BoxFuture<'static, std::result::Result<Session, IdentityError>>>;

#[derive(Default)]
struct FlightTable {
    inflight: HashMap<String, Flight>,
    rotated: HashMap<String, (Instant, Session)>,
}

impl FlightTable {
    fn prune(&mut self, now: Instant) {
        self.rotated
            .retain(|_, (rotated_at, _)| now.duration_since(*rotated_at) < ROTATION_GRACE);
    }
}

fn lock(table: &Mutex<FlightTable>) -> MutexGuard<'_, FlightTable> {
    table.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Fingerprint of a refresh token, safe to keep in maps and logs.
fn fingerprint(refresh_token: &str) -> String {
    hex::encode(Sha256::digest(refresh_token.as_bytes()))
}

/// Single-flight token refresh shared by every request in the process.
///
/// All callers presenting the same refresh token while a refresh is running
/// await the same upstream call. The call runs on its own task, so a caller
/// that goes away mid-refresh can not leave a half-rotated pair behind.
pub struct RefreshCoordinator {
    identity: Arc<dyn IdentityProvider>,
    table: Arc<Mutex<FlightTable>>,
}

impl RefreshCoordinator {
    pub fn new(identity: Arc<dyn IdentityProvider>) -> Self {
        Self {
            identity,
            table: Arc::new(Mutex::new(FlightTable::default())),
        }
    }

    pub async fn refresh(&self, refresh_token: &str) -> std::result::Result<Session, IdentityError> {
        let key = fingerprint(refresh_token);

        let flight = {
            let mut table = lock(&self.table);
            table.prune(Instant::now());

            if let Some((_, session)) = table.rotated.get(&key) {
                tracing::debug!("♻️ Reusing rotated session for refresh token {}", &key[..12]);
                return Ok(session.clone());
            }

            match table.inflight.get(&key) {
                Some(flight) => {
                    tracing::debug!("⏳ Joining in-flight refresh {}", &key[..12]);
                    flight.clone()
                }
                None => {
                    let flight = self.launch(key.clone(), refresh_token.to_string());
                    table.inflight.insert(key, flight.clone());
                    flight
                }
            }
        };

        flight.await
    }

    fn launch(&self, key: String, refresh_token: String) -> Flight {
        let identity = self.identity.clone();
        let table = self.table.clone();

        let task = tokio::spawn(async move {
            tracing::debug!("🔄 Refreshing session {}", &key[..12]);
            let result = identity
                .refresh(&refresh_token)
                .await
                .map(|grant| grant.into_session(Utc::now()));

            let mut table = lock(&table);
            table.inflight.remove(&key);
            match &result {
                Ok(session) => {
                    table.rotated.insert(key, (Instant::now(), session.clone()));
                }
                Err(e) => tracing::warn!("❌ Refresh {} failed: {}", &key[..12], e),
            }
            result
        });

        async move {
            task.await.unwrap_or_else(|e| {
                Err(IdentityError::Unavailable(format!("refresh task failed: {}", e)))
            })
        }
        .boxed()
        .shared()
    }
}

/// Cookie attributes shared by the session and CSRF cookies.
#[derive(Debug, Clone, Copy)]
pub struct CookiePolicy {
    pub secure: bool,
    pub max_age_secs: i64,
}

/// Creates a cookie scoped to the whole application.
pub fn create_secure_cookie(
    name: &'static str,
    value: String,
    policy: CookiePolicy,
    http_only: bool,
) -> Cookie<'static> {
    let mut cookie = Cookie::new(name, value);
    cookie.set_http_only(http_only);
    cookie.set_secure(policy.secure);
    cookie.set_same_site(SameSite::Lax);
    cookie.set_max_age(CookieDuration::seconds(policy.max_age_secs));
    cookie.set_path("/");
    cookie
}

/// Session operations the access gateway relies on.
#[async_trait]
pub trait SessionAccess: Send + Sync {
    /// The locally held session, without any network I/O.
    fn current(&self) -> Option<Session>;

    /// Rotates the held session and writes the new pair back.
    async fn refresh(&self) -> Result<Session>;

    fn clear(&self);
}

/// Session store for one request, backed by its cookie jar.
///
/// Cookies written here travel on the response produced for the same
/// request, so a refreshed pair always ships with the decision it fed.
pub struct SessionStore {
    cookies: Cookies,
    key: Key,
    refresher: Arc<RefreshCoordinator>,
    policy: CookiePolicy,
}

impl SessionStore {
    pub fn new(cookies: Cookies, state: &AppState) -> Self {
        Self::with_parts(
            cookies,
            state.cookie_key.clone(),
            state.refresher.clone(),
            state.cookie_policy,
        )
    }

    pub fn with_parts(
        cookies: Cookies,
        key: Key,
        refresher: Arc<RefreshCoordinator>,
        policy: CookiePolicy,
    ) -> Self {
        Self {
            cookies,
            key,
            refresher,
            policy,
        }
    }

    pub fn set(&self, session: &Session) -> Result<()> {
        let value = sonic_rs::to_string(session)
            .map_err(|e| AppError::Internal(format!("Session serialization failed: {}", e)))?;

        self.cookies
            .private(&self.key)
            .add(create_secure_cookie(SESSION_COOKIE, value, self.policy, true));
        Ok(())
    }
}

#[async_trait]
impl SessionAccess for SessionStore {
    fn current(&self) -> Option<Session> {
        let cookie = self.cookies.private(&self.key).get(SESSION_COOKIE)?;
        match sonic_rs::from_str::<Session>(cookie.value()) {
            Ok(session) => Some(session),
            Err(e) => {
                tracing::debug!("Ignoring unreadable session cookie: {}", e);
                None
            }
        }
    }

    async fn refresh(&self) -> Result<Session> {
        let held = self.current().ok_or(AppError::SessionExpired)?;
        if !held.is_refreshable() {
            return Err(AppError::SessionExpired);
        }

        let session = self.refresher.refresh(&held.refresh_token).await?;
        self.set(&session)?;
        tracing::debug!("✅ Session refreshed for {}", session.user_id);
        Ok(session)
    }

    fn clear(&self) {
        let mut cookie = Cookie::new(SESSION_COOKIE, "");
        cookie.set_path("/");
        cookie.set_max_age(CookieDuration::seconds(0));
        self.cookies.private(&self.key).remove(cookie);
    }
}
