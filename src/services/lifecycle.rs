use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::{
    error::{AppError, Result},
    models::job::{Job, JobFilter, JobStatus, JobUpdate, NewJob},
    models::principal::{Principal, Role},
    models::technician::TechnicianId,
    repositories::{job::JobRepository, profile::ProfileDirectory},
};

/// Trims a free-text field and drops it when nothing is left.
fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Validates and applies job status transitions and assignment changes.
///
/// Every mutation reads the job, decides against that snapshot and writes
/// back with the snapshot's version. A concurrent writer turns the write
/// into `ConcurrentModification`.
#[derive(Clone)]
pub struct JobLifecycle {
    jobs: Arc<dyn JobRepository>,
    profiles: Arc<dyn ProfileDirectory>,
}

impl JobLifecycle {
    pub fn new(jobs: Arc<dyn JobRepository>, profiles: Arc<dyn ProfileDirectory>) -> Self {
        Self { jobs, profiles }
    }

    /// Creates a job in status `new` with no assignment and no timestamps.
    pub async fn create(&self, service: &str, notes: Option<&str>, actor: &Principal) -> Result<Job> {
        if !actor.role.is_staff() {
            return Err(AppError::Authorization(format!(
                "{} may not create jobs",
                actor.role
            )));
        }

        let service = non_blank(Some(service))
            .ok_or_else(|| AppError::validation("service", "Service is required"))?;

        let job = self
            .jobs
            .insert(NewJob {
                service,
                notes: non_blank(notes),
                created_by: actor.id,
            })
            .await?;

        tracing::info!("✅ Job {} created by {}", job.id, actor.id);
        Ok(job)
    }

    /// Loads one job the actor is allowed to see.
    ///
    /// Technicians only see jobs assigned to them; anything else reads as
    /// not found.
    pub async fn get(&self, job_id: Uuid, actor: &Principal) -> Result<Job> {
        let job = self.jobs.find(job_id).await?.ok_or(AppError::NotFound)?;

        if actor.role.is_staff() || actor.is_technician(job.assigned_to) {
            Ok(job)
        } else {
            Err(AppError::NotFound)
        }
    }

    /// Jobs visible on the actor's dashboard, most recently created first.
    pub async fn list_for(&self, actor: &Principal, status: Option<JobStatus>) -> Result<Vec<Job>> {
        let mut filter = JobFilter {
            status,
            ..JobFilter::default()
        };

        match actor.role {
            Role::Owner | Role::Dispatcher => {}
            Role::Technician => match actor.technician_id {
                Some(technician_id) => filter.assigned_to = Some(technician_id),
                None => return Ok(Vec::new()),
            },
        }

        self.jobs.list(&filter).await
    }

    /// Sets or clears the technician assigned to a job.
    pub async fn assign(
        &self,
        job_id: Uuid,
        technician_id: Option<TechnicianId>,
        actor: &Principal,
    ) -> Result<Job> {
        if !actor.role.is_staff() {
            return Err(AppError::Authorization(format!(
                "{} may not assign jobs",
                actor.role
            )));
        }

        let job = self.jobs.find(job_id).await?.ok_or(AppError::NotFound)?;
        if job.is_closed() {
            return Err(AppError::JobClosed);
        }

        if let Some(technician_id) = technician_id {
            let eligible = self
                .profiles
                .find_technician(technician_id)
                .await?
                .is_some_and(|t| t.is_active && t.role == Role::Technician);
            if !eligible {
                return Err(AppError::UnknownTechnician);
            }
        }

        let update = JobUpdate {
            assigned_to: Some(technician_id),
            ..JobUpdate::default()
        };
        let job = self.jobs.update(job.id, update, job.version).await?;

        match technician_id {
            Some(t) => tracing::info!("👷 Job {} assigned to {} by {}", job.id, t, actor.id),
            None => tracing::info!("👷 Job {} unassigned by {}", job.id, actor.id),
        }
        Ok(job)
    }

    /// Moves a job forward to `target`.
    pub async fn transition(&self, job_id: Uuid, target: JobStatus, actor: &Principal) -> Result<Job> {
        self.transition_with_notes(job_id, target, None, actor).await
    }

    /// Moves a job forward, optionally recording completion notes when the
    /// target is `done`.
    pub async fn transition_with_notes(
        &self,
        job_id: Uuid,
        target: JobStatus,
        completion_notes: Option<&str>,
        actor: &Principal,
    ) -> Result<Job> {
        let completion_notes = non_blank(completion_notes);
        if completion_notes.is_some() && target != JobStatus::Done {
            return Err(AppError::validation(
                "completion_notes",
                "Completion notes are only accepted when completing a job",
            ));
        }

        let job = self.jobs.find(job_id).await?.ok_or(AppError::NotFound)?;
        if job.is_closed() {
            return Err(AppError::JobClosed);
        }

        if !actor.role.is_staff() && !actor.is_technician(job.assigned_to) {
            return Err(AppError::Authorization(format!(
                "{} is not assigned to job {}",
                actor.id, job.id
            )));
        }

        let stage = job.stage.advance(target, Utc::now())?;
        let update = JobUpdate {
            stage: Some(stage),
            completed_notes: completion_notes,
            ..JobUpdate::default()
        };
        let updated = self.jobs.update(job.id, update, job.version).await?;

        tracing::info!(
            "🔁 Job {} moved {} → {} by {}",
            updated.id,
            job.status(),
            updated.status(),
            actor.id
        );
        Ok(updated)
    }
}
