use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::Pool;
use tokio_postgres::Row;
use uuid::Uuid;

use crate::{
    error::{AppError, Result},
    models::job::{Job, JobFilter, JobStatus, JobUpdate, NewJob, Stage},
    models::principal::PrincipalId,
    models::technician::TechnicianId,
};

/// Persistence for job records.
///
/// `update` is a compare-and-swap: it succeeds only while the stored row
/// still carries `expected_version`. Row-level authorization is the
/// lifecycle engine's job; implementations may enforce it again but callers
/// never rely on that.
#[async_trait]
pub trait JobRepository: Send + Sync {
    async fn find(&self, id: Uuid) -> Result<Option<Job>>;

    /// Jobs matching `filter`, most recently created first.
    async fn list(&self, filter: &JobFilter) -> Result<Vec<Job>>;

    async fn insert(&self, job: NewJob) -> Result<Job>;

    async fn update(&self, id: Uuid, update: JobUpdate, expected_version: i64) -> Result<Job>;
}

const JOB_COLUMNS: &str = "id, service, notes, status, created_by, assigned_to, created_at, \
                           started_at, completed_at, completed_notes, version";

/// A helper function to map a `tokio_postgres::Row` to a `Job`.
fn row_to_job(row: &Row) -> Result<Job> {
    let missing = |column: &str| AppError::MissingData(format!("jobs.{column}"));

    let id: Uuid = row.try_get("id").map_err(|_| missing("id"))?;
    let status: Option<String> = row.try_get("status").map_err(|_| missing("status"))?;
    let started_at: Option<DateTime<Utc>> =
        row.try_get("started_at").map_err(|_| missing("started_at"))?;
    let completed_at: Option<DateTime<Utc>> =
        row.try_get("completed_at").map_err(|_| missing("completed_at"))?;

    let created_at: DateTime<Utc> = row.try_get("created_at").map_err(|_| missing("created_at"))?;

    let stage = Stage::from_columns(
        JobStatus::normalize(status.as_deref()),
        created_at,
        started_at,
        completed_at,
    )
    .map_err(|detail| AppError::MissingData(format!("job {id}: {detail}")))?;

    let assigned_to: Option<Uuid> = row.try_get("assigned_to").map_err(|_| missing("assigned_to"))?;
    let created_by: Uuid = row.try_get("created_by").map_err(|_| missing("created_by"))?;

    Ok(Job {
        id,
        service: row.try_get("service").map_err(|_| missing("service"))?,
        notes: row.try_get("notes").map_err(|_| missing("notes"))?,
        stage,
        created_by: PrincipalId(created_by),
        assigned_to: assigned_to.map(TechnicianId),
        created_at,
        completed_notes: row
            .try_get("completed_notes")
            .map_err(|_| missing("completed_notes"))?,
        version: row.try_get("version").map_err(|_| missing("version"))?,
    })
}

/// Keeps the jobs matching `status`, skipping rows that failed to decode so
/// one damaged row cannot take a whole listing down.
fn decodable(
    rows: impl Iterator<Item = Result<Job>>,
    status: Option<JobStatus>,
) -> Vec<Job> {
    rows.filter_map(|row| match row {
        Ok(job) => Some(job),
        Err(e) => {
            tracing::warn!("⚠️ Skipping undecodable job row: {}", e);
            None
        }
    })
    .filter(|job| status.is_none_or(|s| job.status() == s))
    .collect()
}

/// Postgres-backed job repository.
#[derive(Clone)]
pub struct PgJobRepository {
    pool: Pool,
}

impl PgJobRepository {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobRepository for PgJobRepository {
    async fn find(&self, id: Uuid) -> Result<Option<Job>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1"),
                &[&id],
            )
            .await?;
        row.map(|r| row_to_job(&r)).transpose()
    }

    async fn list(&self, filter: &JobFilter) -> Result<Vec<Job>> {
        let assigned_to = filter.assigned_to.map(|t| t.0);

        let client = self.pool.get().await?;
        let rows = client
            .query(
                &format!(
                    r#"
                    SELECT {JOB_COLUMNS}
                    FROM jobs
                    WHERE ($1::uuid IS NULL OR assigned_to = $1)
                    ORDER BY created_at DESC
                    "#
                ),
                &[&assigned_to],
            )
            .await?;

        // status is filtered after normalization so legacy spellings match
        Ok(decodable(rows.iter().map(row_to_job), filter.status))
    }

    async fn insert(&self, job: NewJob) -> Result<Job> {
        let client = self.pool.get().await?;
        let row = client
            .query_one(
                &format!(
                    r#"
                    INSERT INTO jobs (id, service, notes, status, created_by)
                    VALUES ($1, $2, $3, 'new', $4)
                    RETURNING {JOB_COLUMNS}
                    "#
                ),
                &[&Uuid::new_v4(), &job.service, &job.notes, &job.created_by.0],
            )
            .await?;
        row_to_job(&row)
    }

    async fn update(&self, id: Uuid, update: JobUpdate, expected_version: i64) -> Result<Job> {
        let set_assignee = update.assigned_to.is_some();
        let assignee = update.assigned_to.flatten().map(|t| t.0);
        let status = update.stage.map(|s| s.status().as_str());
        let set_stage = update.stage.is_some();
        let started_at = update.stage.and_then(|s| s.started_at());
        let completed_at = update.stage.and_then(|s| s.completed_at());

        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                &format!(
                    r#"
                    UPDATE jobs SET
                        assigned_to = CASE WHEN $2 THEN $3 ELSE assigned_to END,
                        status = COALESCE($4, status),
                        started_at = CASE WHEN $5 THEN $6 ELSE started_at END,
                        completed_at = CASE WHEN $5 THEN $7 ELSE completed_at END,
                        completed_notes = COALESCE($8, completed_notes),
                        version = version + 1
                    WHERE id = $1 AND version = $9
                    RETURNING {JOB_COLUMNS}
                    "#
                ),
                &[
                    &id,
                    &set_assignee,
                    &assignee,
                    &status,
                    &set_stage,
                    &started_at,
                    &completed_at,
                    &update.completed_notes,
                    &expected_version,
                ],
            )
            .await?;

        if let Some(row) = row {
            return row_to_job(&row);
        }

        let exists: bool = client
            .query_one("SELECT EXISTS (SELECT 1 FROM jobs WHERE id = $1)", &[&id])
            .await?
            .try_get(0)
            .map_err(|_| AppError::MissingData("exists".to_string()))?;

        if exists {
            tracing::debug!("Version mismatch on job {} (expected {})", id, expected_version);
            Err(AppError::ConcurrentModification)
        } else {
            Err(AppError::NotFound)
        }
    }
}
