use axum::{
    body::Body,
    extract::{Request, State},
    http::Method,
    middleware::Next,
    response::{IntoResponse, Response},
};
use redis::AsyncCommands;
use tower_cookies::Cookies;

use crate::{
    crypto::csrf::{CSRF_COOKIE, CSRF_HEADER, registry_key, tokens_match},
    error::AppError,
    state::AppState,
};

/// Requests that never need a CSRF token.
fn is_exempt(method: &Method, path: &str) -> bool {
    matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS) || path == "/api/auth/login"
}

/// A middleware that verifies the double-submit CSRF token.
///
/// The `csrf_token` cookie must equal the `x-csrf-token` header and still be
/// registered in Redis.
///
/// # Arguments
///
/// * `state` - The application state.
/// * `cookies` - The request cookies.
/// * `req` - The incoming request.
/// * `next` - The next middleware in the chain.
///
/// # Returns
///
/// The handler's response, or a `403` when the token does not check out.
pub async fn verify_csrf(
    State(mut state): State<AppState>,
    cookies: Cookies,
    req: Request<Body>,
    next: Next,
) -> Response {
    if is_exempt(req.method(), req.uri().path()) {
        tracing::debug!("✅ CSRF exemption: {} {}", req.method(), req.uri().path());
        return next.run(req).await;
    }

    let Some(cookie_token) = cookies.get(CSRF_COOKIE).map(|c| c.value().to_string()) else {
        tracing::warn!("❌ CSRF: cookie missing");
        return AppError::Authorization("Missing CSRF token cookie".to_string()).into_response();
    };

    let header_token = match req.headers().get(CSRF_HEADER).map(|v| v.to_str()) {
        Some(Ok(token)) => token.to_string(),
        Some(Err(_)) => {
            tracing::warn!("❌ CSRF: header is not valid text");
            return AppError::Authorization("Invalid CSRF token format".to_string())
                .into_response();
        }
        None => {
            tracing::warn!("❌ CSRF: header missing");
            return AppError::Authorization("Missing CSRF token header".to_string())
                .into_response();
        }
    };

    if !tokens_match(&cookie_token, &header_token) {
        tracing::warn!("❌ CSRF: tokens do not match");
        return AppError::Authorization("CSRF token mismatch".to_string()).into_response();
    }

    match state
        .redis
        .get::<_, Option<String>>(registry_key(&cookie_token))
        .await
    {
        Ok(Some(_)) => next.run(req).await,
        Ok(None) => {
            tracing::warn!("❌ CSRF: token expired or revoked");
            AppError::Authorization("CSRF token expired or invalid".to_string()).into_response()
        }
        Err(e) => {
            tracing::error!("❌ CSRF: Redis lookup failed: {}", e);
            AppError::Redis(e).into_response()
        }
    }
}
