use std::sync::Arc;

use uuid::Uuid;

use crate::{
    error::{AppError, Result},
    models::job::Job,
    models::principal::Principal,
    models::technician::{TechnicianId, TechnicianProfile},
    repositories::profile::ProfileDirectory,
    services::lifecycle::JobLifecycle,
};

/// Lists technicians eligible for assignment and assigns them to jobs.
#[derive(Clone)]
pub struct AssignmentService {
    profiles: Arc<dyn ProfileDirectory>,
    lifecycle: JobLifecycle,
}

impl AssignmentService {
    pub fn new(profiles: Arc<dyn ProfileDirectory>, lifecycle: JobLifecycle) -> Self {
        Self {
            profiles,
            lifecycle,
        }
    }

    /// Active technicians ordered by name, case-insensitively.
    ///
    /// Ties fall back to the technician id so the order is stable between
    /// calls.
    pub async fn list_eligible_technicians(&self) -> Result<Vec<TechnicianProfile>> {
        let mut technicians: Vec<TechnicianProfile> = self
            .profiles
            .list_active_technicians()
            .await?
            .into_iter()
            .filter(|t| t.is_active)
            .collect();

        technicians.sort_by(|a, b| {
            a.full_name
                .to_lowercase()
                .cmp(&b.full_name.to_lowercase())
                .then_with(|| a.id.0.cmp(&b.id.0))
        });

        Ok(technicians)
    }

    /// Fails unless `actor` may assign jobs.
    pub fn ensure_can_assign(&self, actor: &Principal) -> Result<()> {
        if actor.role.is_staff() {
            Ok(())
        } else {
            Err(AppError::Authorization(format!(
                "{} may not assign jobs",
                actor.role
            )))
        }
    }

    /// Sets or clears the assignee of a job.
    pub async fn assign(
        &self,
        job_id: Uuid,
        technician_id: Option<TechnicianId>,
        actor: &Principal,
    ) -> Result<Job> {
        self.ensure_can_assign(actor)?;
        self.lifecycle.assign(job_id, technician_id, actor).await
    }
}
