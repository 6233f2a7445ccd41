use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::models::principal::PrincipalId;

/// How close to expiry a session may get before it is refreshed.
///
/// Identity access tokens live for an hour by default; a session inside this
/// window is rotated on the request that notices it.
pub const REFRESH_WINDOW_SECS: i64 = 60;

/// Represents an authenticated session held in the private session cookie.
///
/// The token pair is opaque; only `expires_at` is inspected locally.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Access token issued by the identity service.
    pub token: String,
    /// Single-use token that rotates the pair.
    pub refresh_token: String,
    /// The identity the tokens were issued to.
    pub user_id: PrincipalId,
    /// Email reported by the identity service.
    pub email: String,
    /// The timestamp when the token pair was issued.
    pub issued_at: DateTime<Utc>,
    /// The timestamp when the access token expires.
    pub expires_at: DateTime<Utc>,
}

/// Where a session stands relative to its expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    /// Still valid, but inside the refresh window.
    Expiring,
    Expired,
}

impl Session {
    pub fn freshness_at(&self, now: DateTime<Utc>) -> Freshness {
        if now >= self.expires_at {
            Freshness::Expired
        } else if self.expires_at - now <= Duration::seconds(REFRESH_WINDOW_SECS) {
            Freshness::Expiring
        } else {
            Freshness::Fresh
        }
    }

    pub fn freshness(&self) -> Freshness {
        self.freshness_at(Utc::now())
    }

    /// An expired session without a refresh token is no session at all.
    pub fn is_refreshable(&self) -> bool {
        !self.refresh_token.is_empty()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("user_id", &self.user_id)
            .field("email", &self.email)
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn session_expiring_in(secs: i64, now: DateTime<Utc>) -> Session {
        Session {
            token: "access".into(),
            refresh_token: "refresh".into(),
            user_id: PrincipalId(Uuid::new_v4()),
            email: "owner@hem.test".into(),
            issued_at: now - Duration::minutes(30),
            expires_at: now + Duration::seconds(secs),
        }
    }

    #[test]
    fn freshness_follows_the_refresh_window() {
        let now = Utc::now();
        assert_eq!(session_expiring_in(3600, now).freshness_at(now), Freshness::Fresh);
        assert_eq!(
            session_expiring_in(REFRESH_WINDOW_SECS, now).freshness_at(now),
            Freshness::Expiring
        );
        assert_eq!(session_expiring_in(0, now).freshness_at(now), Freshness::Expired);
        assert_eq!(session_expiring_in(-5, now).freshness_at(now), Freshness::Expired);
    }

    #[test]
    fn debug_output_never_contains_tokens() {
        let rendered = format!("{:?}", session_expiring_in(10, Utc::now()));
        assert!(!rendered.contains("access"));
        assert!(!rendered.contains("\"refresh\""));
    }
}
