use std::sync::Arc;

use deadpool_postgres::Pool;
use redis::aio::ConnectionManager;
use tower_cookies::Key;

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::repositories::{
    job::{JobRepository, PgJobRepository},
    profile::{PgProfileDirectory, ProfileDirectory},
};
use crate::services::{
    assignment::AssignmentService,
    identity::{GoTrueClient, IdentityProvider},
    lifecycle::JobLifecycle,
    roles::RoleResolver,
    session::{CookiePolicy, RefreshCoordinator},
};

/// The application's state.
///
/// Every collaborator handle is built once in [`AppState::new`] and shared
/// by cloning the state.
#[derive(Clone)]
pub struct AppState {
    /// The Redis connection manager (CSRF registry, login throttling).
    pub redis: ConnectionManager,
    /// The application's configuration.
    pub config: Config,
    /// Key for the private session cookie.
    pub cookie_key: Key,
    /// Attributes shared by every cookie the app sets.
    pub cookie_policy: CookiePolicy,
    /// The identity service.
    pub identity: Arc<dyn IdentityProvider>,
    /// Process-wide single-flight refresh.
    pub refresher: Arc<RefreshCoordinator>,
    /// Identity to role mapping.
    pub roles: RoleResolver,
    /// Job status and assignment rules.
    pub lifecycle: JobLifecycle,
    /// Technician picker and assignment.
    pub assignments: AssignmentService,
}

impl AppState {
    /// Creates a new `AppState`.
    ///
    /// # Arguments
    ///
    /// * `config` - The application's configuration.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `AppState`.
    pub async fn new(config: &Config) -> Result<Self> {
        let db: Pool = crate::db::create_pool(&config.database_url)?;
        tracing::info!("✅ PostgreSQL pool initialized");

        let redis_client = redis::Client::open(config.redis_url.as_str())?;
        let redis = ConnectionManager::new(redis_client).await?;
        tracing::info!("✅ Redis connection manager initialized");

        let cookie_key = Key::try_from(config.session_secret.as_slice())
            .map_err(|e| AppError::Internal(format!("Invalid session key: {}", e)))?;
        let cookie_policy = CookiePolicy {
            secure: config.secure_cookies,
            max_age_secs: config.session_max_age_secs,
        };

        let identity: Arc<dyn IdentityProvider> = Arc::new(GoTrueClient::new(config)?);
        let refresher = Arc::new(RefreshCoordinator::new(identity.clone()));
        tracing::info!("✅ Identity client initialized for {}", config.identity_url);

        let jobs: Arc<dyn JobRepository> = Arc::new(PgJobRepository::new(db.clone()));
        let profiles: Arc<dyn ProfileDirectory> = Arc::new(PgProfileDirectory::new(db));

        let roles = RoleResolver::new(profiles.clone());
        let lifecycle = JobLifecycle::new(jobs, profiles.clone());
        let assignments = AssignmentService::new(profiles, lifecycle.clone());

        Ok(AppState {
            redis,
            config: config.clone(),
            cookie_key,
            cookie_policy,
            identity,
            refresher,
            roles,
            lifecycle,
            assignments,
        })
    }
}
