use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::Result,
    models::job::{Job, JobStatus},
    models::principal::{Principal, PrincipalId},
    models::technician::TechnicianId,
    state::AppState,
    validation::request::{NOTES_MAX_LEN, SERVICE_MAX_LEN, not_blank, validate},
};

/// A job as returned to clients.
#[derive(Serialize)]
pub struct JobView {
    pub id: Uuid,
    pub service: String,
    pub notes: Option<String>,
    pub status: JobStatus,
    pub status_label: &'static str,
    pub created_by: PrincipalId,
    pub assigned_to: Option<TechnicianId>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub completion_notes: Option<String>,
    pub version: i64,
}

impl From<Job> for JobView {
    fn from(job: Job) -> Self {
        Self {
            id: job.id,
            status: job.status(),
            status_label: job.status().label(),
            started_at: job.started_at(),
            completed_at: job.completed_at(),
            service: job.service,
            notes: job.notes,
            created_by: job.created_by,
            assigned_to: job.assigned_to,
            created_at: job.created_at,
            completion_notes: job.completed_notes,
            version: job.version,
        }
    }
}

/// Query parameters for job listings.
#[derive(Deserialize, Default)]
pub struct ListQuery {
    pub status: Option<String>,
}

impl ListQuery {
    pub fn status(&self) -> Result<Option<JobStatus>> {
        self.status.as_deref().map(str::parse::<JobStatus>).transpose()
    }
}

/// The request payload for creating a job.
#[derive(Deserialize, Validate)]
pub struct CreateJobRequest {
    #[garde(custom(not_blank), length(max = SERVICE_MAX_LEN))]
    pub service: String,
    #[garde(length(max = NOTES_MAX_LEN))]
    pub notes: Option<String>,
}

/// The request payload for assigning a job. `null` clears the assignment.
#[derive(Deserialize)]
pub struct AssignRequest {
    pub technician_id: Option<Uuid>,
}

/// The request payload for moving a job forward.
#[derive(Deserialize, Validate)]
pub struct TransitionRequest {
    #[garde(skip)]
    pub status: String,
    #[garde(length(max = NOTES_MAX_LEN))]
    pub completion_notes: Option<String>,
}

/// Lists the jobs visible to the caller.
pub async fn list_jobs(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Query(query): Query<ListQuery>,
) -> Result<Response> {
    let jobs = state.lifecycle.list_for(&principal, query.status()?).await?;
    let jobs: Vec<JobView> = jobs.into_iter().map(JobView::from).collect();

    Ok((StatusCode::OK, Json(jobs)).into_response())
}

/// Creates a job.
pub async fn create_job(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(payload): Json<CreateJobRequest>,
) -> Result<Response> {
    validate(&payload)?;

    let job = state
        .lifecycle
        .create(&payload.service, payload.notes.as_deref(), &principal)
        .await?;

    Ok((StatusCode::CREATED, Json(JobView::from(job))).into_response())
}

/// Returns one job.
pub async fn get_job(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(job_id): Path<Uuid>,
) -> Result<Response> {
    let job = state.lifecycle.get(job_id, &principal).await?;

    Ok((StatusCode::OK, Json(JobView::from(job))).into_response())
}

/// Assigns or unassigns a technician.
pub async fn assign_job(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(job_id): Path<Uuid>,
    Json(payload): Json<AssignRequest>,
) -> Result<Response> {
    let job = state
        .assignments
        .assign(job_id, payload.technician_id.map(TechnicianId), &principal)
        .await?;

    Ok((StatusCode::OK, Json(JobView::from(job))).into_response())
}

/// Moves a job to a later status.
pub async fn transition_job(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(job_id): Path<Uuid>,
    Json(payload): Json<TransitionRequest>,
) -> Result<Response> {
    validate(&payload)?;
    let target: JobStatus = payload.status.parse()?;

    let job = state
        .lifecycle
        .transition_with_notes(job_id, target, payload.completion_notes.as_deref(), &principal)
        .await?;

    Ok((StatusCode::OK, Json(JobView::from(job))).into_response())
}
