//! In-memory collaborators used by unit tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::{
    error::{AppError, Result},
    models::job::{Job, JobFilter, JobUpdate, NewJob, Stage},
    models::principal::{PrincipalId, Role},
    models::technician::{Profile, TechnicianId, TechnicianProfile},
    repositories::{job::JobRepository, profile::ProfileDirectory},
};

#[derive(Default)]
pub struct MemoryJobRepository {
    jobs: tokio::sync::Mutex<HashMap<Uuid, Job>>,
    /// Yield after every read so concurrent callers interleave between
    /// their read and their write.
    pub yield_after_read: bool,
}

impl MemoryJobRepository {
    pub fn interleaving() -> Self {
        Self {
            yield_after_read: true,
            ..Self::default()
        }
    }
}

#[async_trait]
impl JobRepository for MemoryJobRepository {
    async fn find(&self, id: Uuid) -> Result<Option<Job>> {
        let job = self.jobs.lock().await.get(&id).cloned();
        if self.yield_after_read {
            tokio::task::yield_now().await;
        }
        Ok(job)
    }

    async fn list(&self, filter: &JobFilter) -> Result<Vec<Job>> {
        let mut jobs: Vec<Job> = self
            .jobs
            .lock()
            .await
            .values()
            .filter(|job| filter.assigned_to.is_none_or(|t| job.assigned_to == Some(t)))
            .filter(|job| filter.status.is_none_or(|s| job.status() == s))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(jobs)
    }

    async fn insert(&self, job: NewJob) -> Result<Job> {
        let job = Job {
            id: Uuid::new_v4(),
            service: job.service,
            notes: job.notes,
            stage: Stage::New,
            created_by: job.created_by,
            assigned_to: None,
            created_at: Utc::now(),
            completed_notes: None,
            version: 0,
        };
        self.jobs.lock().await.insert(job.id, job.clone());
        Ok(job)
    }

    async fn update(&self, id: Uuid, update: JobUpdate, expected_version: i64) -> Result<Job> {
        let mut jobs = self.jobs.lock().await;
        let job = jobs.get_mut(&id).ok_or(AppError::NotFound)?;

        if job.version != expected_version {
            return Err(AppError::ConcurrentModification);
        }

        if let Some(assigned_to) = update.assigned_to {
            job.assigned_to = assigned_to;
        }
        if let Some(stage) = update.stage {
            job.stage = stage;
        }
        if update.completed_notes.is_some() {
            job.completed_notes = update.completed_notes;
        }
        job.version += 1;

        Ok(job.clone())
    }
}

#[derive(Default)]
pub struct MemoryProfileDirectory {
    profiles: Mutex<HashMap<PrincipalId, Profile>>,
    technicians: Mutex<Vec<TechnicianProfile>>,
    pub unavailable: AtomicBool,
}

impl MemoryProfileDirectory {
    pub fn add_staff(&self, role: Role) -> PrincipalId {
        let principal_id = PrincipalId(Uuid::new_v4());
        self.profiles.lock().unwrap().insert(
            principal_id,
            Profile { principal_id, role },
        );
        principal_id
    }

    pub fn add_technician(&self, full_name: &str, is_active: bool) -> (PrincipalId, TechnicianId) {
        let principal_id = self.add_staff(Role::Technician);
        let id = TechnicianId(Uuid::new_v4());
        self.technicians.lock().unwrap().push(TechnicianProfile {
            id,
            linked_principal_id: Some(principal_id),
            full_name: full_name.to_string(),
            role: Role::Technician,
            is_active,
        });
        (principal_id, id)
    }

    pub fn set_active(&self, id: TechnicianId, is_active: bool) {
        for technician in self.technicians.lock().unwrap().iter_mut() {
            if technician.id == id {
                technician.is_active = is_active;
            }
        }
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AppError::UpstreamUnavailable("profile store offline".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl ProfileDirectory for MemoryProfileDirectory {
    async fn find_profile(&self, principal_id: PrincipalId) -> Result<Option<Profile>> {
        self.check_available()?;
        Ok(self.profiles.lock().unwrap().get(&principal_id).cloned())
    }

    async fn find_technician(&self, id: TechnicianId) -> Result<Option<TechnicianProfile>> {
        self.check_available()?;
        Ok(self
            .technicians
            .lock()
            .unwrap()
            .iter()
            .find(|t| t.id == id)
            .cloned())
    }

    async fn find_technician_for(
        &self,
        principal_id: PrincipalId,
    ) -> Result<Option<TechnicianProfile>> {
        self.check_available()?;
        Ok(self
            .technicians
            .lock()
            .unwrap()
            .iter()
            .find(|t| t.linked_principal_id == Some(principal_id))
            .cloned())
    }

    async fn list_active_technicians(&self) -> Result<Vec<TechnicianProfile>> {
        self.check_available()?;
        Ok(self
            .technicians
            .lock()
            .unwrap()
            .iter()
            .filter(|t| t.is_active && t.role == Role::Technician)
            .cloned()
            .collect())
    }
}
