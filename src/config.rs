use std::env;
use std::net::SocketAddr;

use anyhow::{Context, Result};
use zeroize::{Zeroize, Zeroizing};

/// Minimum length of the session cookie key in bytes.
const SESSION_SECRET_MIN_BYTES: usize = 64;

/// The application's configuration.
#[derive(Clone)]
pub struct Config {
    /// Base URL of the identity service (GoTrue-compatible REST API).
    pub identity_url: String,
    /// Public API key sent to the identity service with every call.
    pub identity_anon_key: Zeroizing<String>,
    /// The URL of the PostgreSQL database.
    pub database_url: String,
    /// The URL of the Redis server.
    pub redis_url: String,
    /// Key material for the private session cookie.
    pub session_secret: Zeroizing<Vec<u8>>,
    /// Max age of the session cookie in seconds.
    pub session_max_age_secs: i64,
    /// Whether cookies must be marked `Secure`.
    pub secure_cookies: bool,
    /// Socket address the server binds to.
    pub bind_addr: SocketAddr,
    /// Origins allowed to call the API with credentials.
    pub allowed_origins: Vec<String>,
}

impl Config {
    /// Creates a new `Config` from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable lookup.
    ///
    /// Every required variable is checked up front so a missing value is
    /// reported at startup with its name instead of failing inside a request.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| -> Result<String> {
            lookup(key)
                .filter(|value| !value.trim().is_empty())
                .with_context(|| format!("{key} must be set"))
        };

        let identity_url = required("IDENTITY_URL")?;
        if !identity_url.starts_with("http://") && !identity_url.starts_with("https://") {
            anyhow::bail!("IDENTITY_URL must be an http(s) URL");
        }

        let identity_anon_key = Zeroizing::new(required("IDENTITY_ANON_KEY")?);

        // generate with: openssl rand -hex 64
        let mut secret_hex = required("SESSION_SECRET")?;
        let secret_bytes = hex::decode(secret_hex.trim())
            .context("SESSION_SECRET must be valid hexadecimal");
        secret_hex.zeroize();
        let secret_bytes = secret_bytes?;

        if secret_bytes.len() < SESSION_SECRET_MIN_BYTES {
            anyhow::bail!(
                "SESSION_SECRET must be at least {} bytes ({} hex characters)",
                SESSION_SECRET_MIN_BYTES,
                SESSION_SECRET_MIN_BYTES * 2
            );
        }

        let session_max_age_secs: i64 = lookup("SESSION_MAX_AGE_SECS")
            .unwrap_or_else(|| "86400".to_string())
            .parse()
            .context("Invalid SESSION_MAX_AGE_SECS")?;
        if session_max_age_secs <= 0 {
            anyhow::bail!("SESSION_MAX_AGE_SECS must be positive");
        }

        let app_env = lookup("APP_ENV").unwrap_or_else(|| "development".to_string());

        let bind_addr = lookup("BIND_ADDR")
            .unwrap_or_else(|| "127.0.0.1:3000".to_string())
            .parse()
            .context("Invalid BIND_ADDR")?;

        let allowed_origins = lookup("ALLOWED_ORIGINS")
            .unwrap_or_else(|| "http://localhost:3000".to_string())
            .split(',')
            .map(str::trim)
            .filter(|origin| !origin.is_empty())
            .map(str::to_string)
            .collect();

        Ok(Self {
            identity_url: identity_url.trim_end_matches('/').to_string(),
            identity_anon_key,
            database_url: required("DATABASE_URL")?,
            redis_url: lookup("REDIS_URL")
                .unwrap_or_else(|| "redis://127.0.0.1:6379".to_string()),
            session_secret: Zeroizing::new(secret_bytes),
            session_max_age_secs,
            secure_cookies: app_env == "production",
            bind_addr,
            allowed_origins,
        })
    }
}
