use axum::{
    body::Body,
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use sonic_rs::JsonValueTrait;

use crate::{error::AppError, services::auth::normalize_email, state::AppState};

/// Failed attempts allowed per email inside the window.
const LOGIN_MAX_ATTEMPTS: i64 = 5;
/// Length of the login throttling window in seconds.
const LOGIN_WINDOW_SECS: i64 = 900;
/// Login bodies are tiny; anything bigger is not a login.
const LOGIN_BODY_LIMIT: usize = 16 * 1024;

/// Pulls the normalized email out of a login body.
fn extract_email(body: &[u8]) -> Option<String> {
    let json = sonic_rs::from_slice::<sonic_rs::Value>(body).ok()?;
    json.get("email")
        .and_then(|v| v.as_str())
        .map(normalize_email)
        .filter(|email| !email.is_empty())
}

fn login_key(email: &str) -> String {
    format!("rate_limit:login:{}", email)
}

/// A middleware that rate limits login attempts per email.
///
/// Redis errors let the request through; throttling is not worth locking
/// everyone out.
///
/// # Arguments
///
/// * `state` - The application state.
/// * `req` - The incoming request.
/// * `next` - The next middleware in the chain.
///
/// # Returns
///
/// The handler's response, or a `429` once the email used up its attempts.
pub async fn rate_limit_login(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let (parts, body) = req.into_parts();
    let body_bytes = match axum::body::to_bytes(body, LOGIN_BODY_LIMIT).await {
        Ok(bytes) => bytes,
        Err(_) => {
            return AppError::validation("body", "Login request too large").into_response();
        }
    };

    let key = login_key(&extract_email(&body_bytes).unwrap_or_else(|| "unknown".to_string()));
    let mut redis = state.redis.clone();

    let count: Option<i64> = redis::cmd("GET")
        .arg(&key)
        .query_async(&mut redis)
        .await
        .unwrap_or_else(|e| {
            tracing::warn!("⚠️ Login throttle unavailable: {}", e);
            None
        });

    if count.is_some_and(|attempts| attempts >= LOGIN_MAX_ATTEMPTS) {
        let ttl: Option<i64> = redis::cmd("TTL")
            .arg(&key)
            .query_async(&mut redis)
            .await
            .unwrap_or(None);

        return AppError::RateLimitExceeded(format!(
            "Too many failed login attempts. Try again in {} minutes",
            ttl.unwrap_or(LOGIN_WINDOW_SECS).max(60) / 60
        ))
        .into_response();
    }

    let response = next.run(Request::from_parts(parts, Body::from(body_bytes))).await;

    if response.status().is_client_error() {
        let attempts: Option<i64> = redis::cmd("INCR")
            .arg(&key)
            .query_async(&mut redis)
            .await
            .unwrap_or(None);

        if attempts == Some(1) {
            let _: Option<i64> = redis::cmd("EXPIRE")
                .arg(&key)
                .arg(LOGIN_WINDOW_SECS)
                .query_async(&mut redis)
                .await
                .unwrap_or(None);
        }
    } else if response.status().is_success() {
        let _: Option<i64> = redis::cmd("DEL")
            .arg(&key)
            .query_async(&mut redis)
            .await
            .unwrap_or(None);
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_is_normalized_for_the_throttle_key() {
        let body = br#"{"email":"  Owner@HEM.test ","password":"x"}"#;
        assert_eq!(extract_email(body).as_deref(), Some("owner@hem.test"));
        assert_eq!(login_key("owner@hem.test"), "rate_limit:login:owner@hem.test");
    }

    #[test]
    fn unreadable_bodies_have_no_email() {
        assert_eq!(extract_email(b"not json"), None);
        assert_eq!(extract_email(br#"{"email":""}"#), None);
        assert_eq!(extract_email(br#"{"username":"a"}"#), None);
    }
}
