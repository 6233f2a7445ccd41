use chrono::Utc;

use crate::{
    error::{AppError, Result},
    models::session::Session,
    services::identity::{IdentityError, IdentityProvider},
    services::roles::ResolveError,
};

/// Normalizes an email the way the identity service stores it.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Exchanges an email/password pair for a session.
///
/// # Arguments
///
/// * `identity` - The identity service.
/// * `email` - The email the user typed, normalized before use.
/// * `password` - The password, passed through untouched.
///
/// # Returns
///
/// A `Result` containing the new `Session`. Unknown email and wrong password
/// fail with the same generic `Authentication` error.
pub async fn verify_credentials(
    identity: &dyn IdentityProvider,
    email: &str,
    password: &str,
) -> Result<Session> {
    let email = normalize_email(email);
    tracing::debug!("🔐 Verifying credentials for {}", email);

    if email.is_empty() || password.is_empty() {
        return Err(AppError::Authentication(
            "Invalid email or password".to_string(),
        ));
    }

    match identity.sign_in(&email, password).await {
        Ok(grant) => {
            let session = grant.into_session(Utc::now());
            tracing::info!("✅ Credentials verified for {}", session.user_id);
            Ok(session)
        }
        Err(IdentityError::InvalidCredentials) => {
            tracing::warn!("❌ Invalid credentials for {}", email);
            Err(IdentityError::InvalidCredentials.into())
        }
        Err(e) => Err(e.into()),
    }
}

/// Maps a failed role lookup during login. A missing or inactive profile gets
/// the same answer as a wrong password so callers learn nothing about which
/// credentials are valid.
pub fn login_refusal(err: ResolveError) -> AppError {
    match err {
        ResolveError::NoProfile | ResolveError::InactiveAccount => {
            IdentityError::InvalidCredentials.into()
        }
        ResolveError::Upstream(e) => e,
    }
}

/// Revokes a session upstream. Failures are logged and swallowed; the local
/// cookie is cleared regardless.
pub async fn sign_out(identity: &dyn IdentityProvider, session: &Session) {
    match identity.sign_out(&session.token).await {
        Ok(()) => tracing::info!("👋 Signed out {}", session.user_id),
        Err(e) => tracing::warn!("⚠️ Upstream sign-out failed for {}: {}", session.user_id, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::principal::PrincipalId;
    use crate::services::identity::fake::FakeIdentity;
    use std::sync::atomic::Ordering;
    use uuid::Uuid;

    fn identity() -> (PrincipalId, FakeIdentity) {
        let id = PrincipalId(Uuid::new_v4());
        (id, FakeIdentity::default().with_user("dispatch@hem.test", "hunter22", id))
    }

    #[tokio::test]
    async fn valid_credentials_yield_a_session() {
        let (id, identity) = identity();

        let session = verify_credentials(&identity, "  Dispatch@HEM.test ", "hunter22")
            .await
            .unwrap();
        assert_eq!(session.user_id, id);
        assert!(session.expires_at > session.issued_at);
    }

    #[tokio::test]
    async fn unknown_email_and_wrong_password_look_the_same() {
        let (_, identity) = identity();

        let wrong_password = verify_credentials(&identity, "dispatch@hem.test", "nope")
            .await
            .unwrap_err();
        let unknown_email = verify_credentials(&identity, "ghost@hem.test", "hunter22")
            .await
            .unwrap_err();

        assert_eq!(wrong_password.to_string(), unknown_email.to_string());
        assert!(matches!(wrong_password, AppError::Authentication(_)));
    }

    #[tokio::test]
    async fn empty_fields_never_reach_upstream() {
        let (_, identity) = identity();
        identity.unavailable.store(true, Ordering::SeqCst);

        assert!(matches!(
            verify_credentials(&identity, " ", "x").await,
            Err(AppError::Authentication(_))
        ));
    }

    #[tokio::test]
    async fn outage_is_not_reported_as_bad_credentials() {
        let (_, identity) = identity();
        identity.unavailable.store(true, Ordering::SeqCst);

        assert!(matches!(
            verify_credentials(&identity, "dispatch@hem.test", "hunter22").await,
            Err(AppError::UpstreamUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn unusable_profile_looks_like_a_wrong_password() {
        let (_, identity) = identity();
        let wrong_password = verify_credentials(&identity, "dispatch@hem.test", "nope")
            .await
            .unwrap_err();

        for refusal in [ResolveError::NoProfile, ResolveError::InactiveAccount] {
            let err = login_refusal(refusal);
            assert!(matches!(err, AppError::Authentication(_)));
            assert_eq!(err.to_string(), wrong_password.to_string());
        }

        assert!(matches!(
            login_refusal(ResolveError::Upstream(AppError::UpstreamUnavailable("down".into()))),
            AppError::UpstreamUnavailable(_)
        ));
    }
}
