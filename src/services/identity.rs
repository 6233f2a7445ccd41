use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::{
    config::Config,
    error::AppError,
    models::principal::PrincipalId,
    models::session::Session,
};

/// Failures reported by the identity service.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IdentityError {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("refresh token rejected")]
    RefreshRejected,
    #[error("identity service unavailable: {0}")]
    Unavailable(String),
}

impl From<IdentityError> for AppError {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::InvalidCredentials => {
                AppError::Authentication("Invalid email or password".to_string())
            }
            IdentityError::RefreshRejected => AppError::SessionExpired,
            IdentityError::Unavailable(msg) => AppError::UpstreamUnavailable(msg),
        }
    }
}

/// The user object embedded in a token grant.
#[derive(Debug, Clone, Deserialize)]
pub struct IdentityUser {
    pub id: Uuid,
    #[serde(default)]
    pub email: Option<String>,
}

/// Token pair returned by a password or refresh grant.
#[derive(Clone, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: String,
    /// Lifetime of the access token in seconds.
    pub expires_in: i64,
    /// Absolute expiry as a unix timestamp, when the service reports one.
    #[serde(default)]
    pub expires_at: Option<i64>,
    pub user: IdentityUser,
}

impl TokenGrant {
    pub fn into_session(self, now: DateTime<Utc>) -> Session {
        let expires_at = self
            .expires_at
            .and_then(|ts| Utc.timestamp_opt(ts, 0).single())
            .unwrap_or_else(|| now + Duration::seconds(self.expires_in));

        Session {
            token: self.access_token,
            refresh_token: self.refresh_token,
            user_id: PrincipalId(self.user.id),
            email: self.user.email.unwrap_or_default(),
            issued_at: now,
            expires_at,
        }
    }
}

/// The external identity collaborator.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Exchanges an email/password pair for a token pair.
    async fn sign_in(&self, email: &str, password: &str) -> Result<TokenGrant, IdentityError>;

    /// Rotates a token pair. The old refresh token is single use.
    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, IdentityError>;

    /// Revokes the session behind `access_token`.
    async fn sign_out(&self, access_token: &str) -> Result<(), IdentityError>;
}

#[derive(Serialize)]
struct PasswordGrant<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct RefreshGrant<'a> {
    refresh_token: &'a str,
}

/// HTTP client for a GoTrue-compatible identity service.
pub struct GoTrueClient {
    http: reqwest::Client,
    base_url: String,
    anon_key: Zeroizing<String>,
}

impl GoTrueClient {
    pub fn new(config: &Config) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| AppError::Internal(format!("HTTP client setup failed: {}", e)))?;

        Ok(Self {
            http,
            base_url: config.identity_url.clone(),
            anon_key: config.identity_anon_key.clone(),
        })
    }

    async fn token<B: Serialize + Sync>(
        &self,
        grant_type: &str,
        body: &B,
        rejected: IdentityError,
    ) -> Result<TokenGrant, IdentityError> {
        let response = self
            .http
            .post(format!("{}/auth/v1/token", self.base_url))
            .query(&[("grant_type", grant_type)])
            .header("apikey", self.anon_key.as_str())
            .json(body)
            .send()
            .await
            .map_err(|e| IdentityError::Unavailable(e.to_string()))?;

        match response.status() {
            status if status.is_success() => response
                .json::<TokenGrant>()
                .await
                .map_err(|e| IdentityError::Unavailable(format!("malformed token grant: {}", e))),
            StatusCode::BAD_REQUEST
            | StatusCode::UNAUTHORIZED
            | StatusCode::FORBIDDEN
            | StatusCode::UNPROCESSABLE_ENTITY => Err(rejected),
            status => Err(IdentityError::Unavailable(format!(
                "{} grant returned {}",
                grant_type, status
            ))),
        }
    }
}

#[async_trait]
impl IdentityProvider for GoTrueClient {
    async fn sign_in(&self, email: &str, password: &str) -> Result<TokenGrant, IdentityError> {
        self.token(
            "password",
            &PasswordGrant { email, password },
            IdentityError::InvalidCredentials,
        )
        .await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, IdentityError> {
        self.token(
            "refresh_token",
            &RefreshGrant { refresh_token },
            IdentityError::RefreshRejected,
        )
        .await
    }

    async fn sign_out(&self, access_token: &str) -> Result<(), IdentityError> {
        let response = self
            .http
            .post(format!("{}/auth/v1/logout", self.base_url))
            .header("apikey", self.anon_key.as_str())
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| IdentityError::Unavailable(e.to_string()))?;

        // an already revoked token is as good as a fresh logout
        if response.status().is_success() || response.status() == StatusCode::UNAUTHORIZED {
            Ok(())
        } else {
            Err(IdentityError::Unavailable(format!(
                "logout returned {}",
                response.status()
            )))
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grant_prefers_the_absolute_expiry() {
        let now = Utc::now();
        let grant = TokenGrant {
            access_token: "a".into(),
            refresh_token: "r".into(),
            expires_in: 3600,
            expires_at: Some(now.timestamp() + 120),
            user: IdentityUser {
                id: Uuid::new_v4(),
                email: None,
            },
        };
        let session = grant.into_session(now);
        assert_eq!(session.expires_at.timestamp(), now.timestamp() + 120);
        assert_eq!(session.email, "");
    }

    #[test]
    fn grant_falls_back_to_relative_lifetime() {
        let now = Utc::now();
        let grant = TokenGrant {
            access_token: "a".into(),
            refresh_token: "r".into(),
            expires_in: 60,
            expires_at: None,
            user: IdentityUser {
                id: Uuid::new_v4(),
                email: Some("d@hem.test".into()),
            },
        };
        assert_eq!(grant.into_session(now).expires_at, now + Duration::seconds(60));
    }

    #[test]
    fn rejected_refresh_reads_as_expired_session() {
        assert!(matches!(
            AppError::from(IdentityError::RefreshRejected),
            AppError::SessionExpired
        ));
        assert!(matches!(
            AppError::from(IdentityError::InvalidCredentials),
            AppError::Authentication(_)
        ));
    }
}
