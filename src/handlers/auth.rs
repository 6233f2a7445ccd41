use axum::{
    Extension, Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use garde::Validate;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tower_cookies::Cookies;
use tower_cookies::cookie::time::Duration;
use tower_cookies::Cookie;

use crate::{
    crypto::csrf::{CSRF_COOKIE, generate_csrf_token, registry_key},
    error::{AppError, Result},
    middleware_layer::auth::home_path,
    models::principal::{Principal, Role},
    services::auth as auth_service,
    services::session::{SessionAccess, SessionStore, create_secure_cookie},
    state::AppState,
    validation::request::validate,
};

/// The request payload for login.
#[derive(Deserialize, Validate)]
pub struct LoginRequest {
    #[garde(email)]
    pub email: String,
    #[garde(length(min = 1, max = 1024))]
    pub password: String,
}

impl LoginRequest {
    /// Trims and lowercases the email so validation sees what the identity
    /// service will.
    pub fn normalized(mut self) -> Self {
        self.email = auth_service::normalize_email(&self.email);
        self
    }
}

/// The response payload for a successful login.
#[derive(Serialize)]
pub struct LoginResponse {
    pub success: bool,
    pub role: Role,
    pub redirect: &'static str,
}

/// The response payload for logout.
#[derive(Serialize)]
pub struct AuthResponse {
    pub success: bool,
    pub message: String,
}

/// Issues a CSRF token, registers it in Redis and sets the readable cookie.
async fn issue_csrf_token(state: &mut AppState, cookies: &Cookies) -> Result<()> {
    let csrf_token = generate_csrf_token();
    let ttl = state.cookie_policy.max_age_secs as u64;

    let _: () = state
        .redis
        .set_ex(registry_key(&csrf_token), "valid", ttl)
        .await
        .map_err(|e| {
            tracing::error!("❌ Redis set_ex failed for CSRF: {}", e);
            AppError::Redis(e)
        })?;

    cookies.add(create_secure_cookie(
        CSRF_COOKIE,
        csrf_token,
        state.cookie_policy,
        false,
    ));
    Ok(())
}

/// Handles login.
///
/// The session cookie is only written once the identity has a usable role,
/// so an account without a profile never holds a session.
#[axum::debug_handler]
pub async fn login(
    State(mut state): State<AppState>,
    cookies: Cookies,
    Json(payload): Json<LoginRequest>,
) -> Result<Response> {
    let payload = payload.normalized();
    validate(&payload)?;

    let session =
        auth_service::verify_credentials(state.identity.as_ref(), &payload.email, &payload.password)
            .await?;

    let principal = match state.roles.principal(&session).await {
        Ok(principal) => principal,
        Err(e) => {
            tracing::warn!("⚠️ Login for {} refused: {}", session.user_id, e);
            auth_service::sign_out(state.identity.as_ref(), &session).await;
            return Err(auth_service::login_refusal(e));
        }
    };

    SessionStore::new(cookies.clone(), &state).set(&session)?;
    issue_csrf_token(&mut state, &cookies).await?;

    tracing::info!("✅ {} logged in as {}", principal.id, principal.role);

    let response = LoginResponse {
        success: true,
        role: principal.role,
        redirect: home_path(principal.role),
    };

    Ok((StatusCode::OK, Json(response)).into_response())
}

/// Handles logout.
#[axum::debug_handler]
pub async fn logout(
    State(mut state): State<AppState>,
    Extension(principal): Extension<Principal>,
    cookies: Cookies,
) -> Result<Response> {
    let store = SessionStore::new(cookies.clone(), &state);
    if let Some(session) = store.current() {
        auth_service::sign_out(state.identity.as_ref(), &session).await;
    }
    store.clear();

    if let Some(csrf_cookie) = cookies.get(CSRF_COOKIE) {
        let revoked: redis::RedisResult<()> = state.redis.del(registry_key(csrf_cookie.value())).await;
        if let Err(e) = revoked {
            tracing::warn!("⚠️ Could not revoke CSRF token: {}", e);
        }
    }

    let mut csrf_cookie = Cookie::new(CSRF_COOKIE, "");
    csrf_cookie.set_max_age(Duration::seconds(0));
    csrf_cookie.set_path("/");
    cookies.remove(csrf_cookie);

    tracing::info!("👋 {} logged out", principal.id);

    let response = AuthResponse {
        success: true,
        message: "Logout successful".to_string(),
    };

    Ok((StatusCode::OK, Json(response)).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn padded_email_passes_validation_once_normalized() {
        let payload = LoginRequest {
            email: "  Owner@HEM.test ".into(),
            password: "hunter22".into(),
        };
        assert!(matches!(validate(&payload), Err(AppError::Validation { .. })));

        let payload = payload.normalized();
        assert_eq!(payload.email, "owner@hem.test");
        assert!(validate(&payload).is_ok());
    }
}
