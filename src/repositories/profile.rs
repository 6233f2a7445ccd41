use async_trait::async_trait;
use deadpool_postgres::Pool;
use tokio_postgres::Row;
use uuid::Uuid;

use crate::{
    error::{AppError, Result},
    models::principal::{PrincipalId, Role},
    models::technician::{Profile, TechnicianId, TechnicianProfile},
};

/// Read access to role profiles and technician records.
#[async_trait]
pub trait ProfileDirectory: Send + Sync {
    async fn find_profile(&self, principal_id: PrincipalId) -> Result<Option<Profile>>;

    async fn find_technician(&self, id: TechnicianId) -> Result<Option<TechnicianProfile>>;

    async fn find_technician_for(&self, principal_id: PrincipalId)
    -> Result<Option<TechnicianProfile>>;

    /// Active technicians in no particular order.
    async fn list_active_technicians(&self) -> Result<Vec<TechnicianProfile>>;
}

fn parse_role(raw: Option<String>, column: &str) -> Result<Role> {
    raw.as_deref()
        .unwrap_or_default()
        .parse()
        .map_err(|e: String| AppError::MissingData(format!("{column}: {e}")))
}

/// A helper function to map a `tokio_postgres::Row` to a `TechnicianProfile`.
fn row_to_technician(row: &Row) -> Result<TechnicianProfile> {
    let missing = |column: &str| AppError::MissingData(format!("technicians.{column}"));

    let id: Uuid = row.try_get("id").map_err(|_| missing("id"))?;
    let user_id: Option<Uuid> = row.try_get("user_id").map_err(|_| missing("user_id"))?;
    let full_name: Option<String> = row.try_get("full_name").map_err(|_| missing("full_name"))?;
    let role: Option<String> = row.try_get("role").map_err(|_| missing("role"))?;
    let is_active: Option<bool> = row.try_get("is_active").map_err(|_| missing("is_active"))?;

    Ok(TechnicianProfile {
        id: TechnicianId(id),
        linked_principal_id: user_id.map(PrincipalId),
        full_name: full_name.unwrap_or_default(),
        role: parse_role(role, "technicians.role")?,
        is_active: is_active.unwrap_or(false),
    })
}

const TECHNICIAN_COLUMNS: &str = "id, user_id, full_name, role, is_active";

/// Postgres-backed profile directory.
#[derive(Clone)]
pub struct PgProfileDirectory {
    pool: Pool,
}

impl PgProfileDirectory {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProfileDirectory for PgProfileDirectory {
    async fn find_profile(&self, principal_id: PrincipalId) -> Result<Option<Profile>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt("SELECT id, role FROM profiles WHERE id = $1", &[&principal_id.0])
            .await?;

        row.map(|r| {
            let role: Option<String> = r
                .try_get("role")
                .map_err(|_| AppError::MissingData("profiles.role".to_string()))?;
            Ok(Profile {
                principal_id,
                role: parse_role(role, "profiles.role")?,
            })
        })
        .transpose()
    }

    async fn find_technician(&self, id: TechnicianId) -> Result<Option<TechnicianProfile>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                &format!("SELECT {TECHNICIAN_COLUMNS} FROM technicians WHERE id = $1"),
                &[&id.0],
            )
            .await?;
        row.map(|r| row_to_technician(&r)).transpose()
    }

    async fn find_technician_for(
        &self,
        principal_id: PrincipalId,
    ) -> Result<Option<TechnicianProfile>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                &format!("SELECT {TECHNICIAN_COLUMNS} FROM technicians WHERE user_id = $1"),
                &[&principal_id.0],
            )
            .await?;
        row.map(|r| row_to_technician(&r)).transpose()
    }

    async fn list_active_technicians(&self) -> Result<Vec<TechnicianProfile>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                &format!(
                    "SELECT {TECHNICIAN_COLUMNS} FROM technicians \
                     WHERE is_active = true AND role = 'technician'"
                ),
                &[],
            )
            .await?;
        rows.iter().map(row_to_technician).collect()
    }
}
