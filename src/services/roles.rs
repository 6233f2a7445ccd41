use std::sync::Arc;

use thiserror::Error;

use crate::{
    error::AppError,
    models::principal::{Principal, PrincipalId, Role},
    models::session::Session,
    models::technician::TechnicianId,
    repositories::profile::ProfileDirectory,
};

/// Why an identity could not be given a role.
///
/// The gateway treats both business variants as "not signed in", but they
/// are logged separately.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("no profile for identity")]
    NoProfile,
    #[error("account is inactive")]
    InactiveAccount,
    #[error(transparent)]
    Upstream(#[from] AppError),
}

impl From<ResolveError> for AppError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::NoProfile => AppError::Authorization("no profile".to_string()),
            ResolveError::InactiveAccount => {
                AppError::Authorization("inactive account".to_string())
            }
            ResolveError::Upstream(e) => e,
        }
    }
}

/// The role of an identity and, for technicians, their profile id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolved {
    pub role: Role,
    pub technician_id: Option<TechnicianId>,
}

/// Maps identities to roles. Looks up the profile store on every call so a
/// demoted or deactivated account loses access on its next request.
#[derive(Clone)]
pub struct RoleResolver {
    profiles: Arc<dyn ProfileDirectory>,
}

impl RoleResolver {
    pub fn new(profiles: Arc<dyn ProfileDirectory>) -> Self {
        Self { profiles }
    }

    pub async fn resolve(&self, principal_id: PrincipalId) -> Result<Resolved, ResolveError> {
        let profile = self
            .profiles
            .find_profile(principal_id)
            .await?
            .ok_or(ResolveError::NoProfile)?;

        if profile.role != Role::Technician {
            return Ok(Resolved {
                role: profile.role,
                technician_id: None,
            });
        }

        let technician = self
            .profiles
            .find_technician_for(principal_id)
            .await?
            .ok_or(ResolveError::NoProfile)?;

        if !technician.is_active {
            return Err(ResolveError::InactiveAccount);
        }

        Ok(Resolved {
            role: Role::Technician,
            technician_id: Some(technician.id),
        })
    }

    /// Builds the request principal for an authenticated session.
    pub async fn principal(&self, session: &Session) -> Result<Principal, ResolveError> {
        let resolved = self.resolve(session.user_id).await?;
        Ok(Principal {
            id: session.user_id,
            email: session.email.clone(),
            role: resolved.role,
            active: true,
            technician_id: resolved.technician_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::memory::MemoryProfileDirectory;
    use std::sync::atomic::Ordering;
    use uuid::Uuid;

    fn resolver() -> (Arc<MemoryProfileDirectory>, RoleResolver) {
        let profiles = Arc::new(MemoryProfileDirectory::default());
        (profiles.clone(), RoleResolver::new(profiles))
    }

    #[tokio::test]
    async fn staff_resolve_to_their_profile_role() {
        let (profiles, resolver) = resolver();
        let dispatcher = profiles.add_staff(Role::Dispatcher);

        let resolved = resolver.resolve(dispatcher).await.unwrap();
        assert_eq!(resolved.role, Role::Dispatcher);
        assert_eq!(resolved.technician_id, None);
    }

    #[tokio::test]
    async fn technicians_carry_their_profile_id() {
        let (profiles, resolver) = resolver();
        let (principal, technician) = profiles.add_technician("Ana Ruiz", true);

        let resolved = resolver.resolve(principal).await.unwrap();
        assert_eq!(resolved.role, Role::Technician);
        assert_eq!(resolved.technician_id, Some(technician));
    }

    #[tokio::test]
    async fn inactive_technician_is_distinguishable_from_missing_profile() {
        let (profiles, resolver) = resolver();
        let (principal, technician) = profiles.add_technician("Ana Ruiz", true);
        profiles.set_active(technician, false);

        assert!(matches!(
            resolver.resolve(principal).await,
            Err(ResolveError::InactiveAccount)
        ));
        assert!(matches!(
            resolver.resolve(PrincipalId(Uuid::new_v4())).await,
            Err(ResolveError::NoProfile)
        ));
    }

    #[tokio::test]
    async fn deactivation_applies_on_the_next_lookup() {
        let (profiles, resolver) = resolver();
        let (principal, technician) = profiles.add_technician("Ana Ruiz", true);
        assert!(resolver.resolve(principal).await.is_ok());

        profiles.set_active(technician, false);
        assert!(resolver.resolve(principal).await.is_err());
    }

    #[tokio::test]
    async fn store_outage_surfaces_as_upstream() {
        let (profiles, resolver) = resolver();
        let owner = profiles.add_staff(Role::Owner);
        profiles.unavailable.store(true, Ordering::SeqCst);

        assert!(matches!(
            resolver.resolve(owner).await,
            Err(ResolveError::Upstream(AppError::UpstreamUnavailable(_)))
        ));
    }
}
