use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::principal::PrincipalId;
use crate::models::technician::TechnicianId;

/// Job status, ordered along the lifecycle.
///
/// The derived `Ord` is the lifecycle order and is what monotonicity checks
/// compare against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    New,
    Scheduled,
    InProgress,
    Done,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::New => "new",
            JobStatus::Scheduled => "scheduled",
            JobStatus::InProgress => "in_progress",
            JobStatus::Done => "done",
        }
    }

    /// Human readable label shown on dashboards.
    pub fn label(self) -> &'static str {
        match self {
            JobStatus::New => "new",
            JobStatus::Scheduled => "scheduled",
            JobStatus::InProgress => "in progress",
            JobStatus::Done => "done",
        }
    }

    /// Maps stored status text, including legacy spellings, onto a status.
    ///
    /// Unknown or missing values read as `new`.
    pub fn normalize(raw: Option<&str>) -> Self {
        match raw.unwrap_or_default().trim().to_ascii_lowercase().as_str() {
            "done" | "completed" | "complete" => JobStatus::Done,
            "in_progress" | "in progress" | "progress" => JobStatus::InProgress,
            "scheduled" => JobStatus::Scheduled,
            _ => JobStatus::New,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = AppError;

    /// Strict parse for client input; legacy spellings are rejected here.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(JobStatus::New),
            "scheduled" => Ok(JobStatus::Scheduled),
            "in_progress" => Ok(JobStatus::InProgress),
            "done" => Ok(JobStatus::Done),
            other => Err(AppError::validation(
                "status",
                format!("unknown status `{other}`"),
            )),
        }
    }
}

/// Lifecycle position of a job together with the timestamps it implies.
///
/// `started_at` exists exactly from `InProgress` on and `completed_at`
/// exactly at `Done`, so a job can not hold an inconsistent combination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    New,
    Scheduled,
    InProgress {
        started_at: DateTime<Utc>,
    },
    Done {
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
    },
}

impl Stage {
    pub fn status(&self) -> JobStatus {
        match self {
            Stage::New => JobStatus::New,
            Stage::Scheduled => JobStatus::Scheduled,
            Stage::InProgress { .. } => JobStatus::InProgress,
            Stage::Done { .. } => JobStatus::Done,
        }
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        match *self {
            Stage::InProgress { started_at } | Stage::Done { started_at, .. } => Some(started_at),
            Stage::New | Stage::Scheduled => None,
        }
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        match *self {
            Stage::Done { completed_at, .. } => Some(completed_at),
            _ => None,
        }
    }

    /// Rebuilds a stage from stored columns, rejecting combinations that
    /// break the lifecycle invariants.
    ///
    /// Rows written before status and timestamps were updated together may
    /// lack a timestamp their status implies. A missing `started_at` is
    /// backfilled from `completed_at`, else `created_at`; a missing
    /// `completed_at` on a `done` row from `started_at`, else `created_at`.
    pub fn from_columns(
        status: JobStatus,
        created_at: DateTime<Utc>,
        started_at: Option<DateTime<Utc>>,
        completed_at: Option<DateTime<Utc>>,
    ) -> Result<Self, String> {
        match (status, started_at, completed_at) {
            (JobStatus::New, None, None) => Ok(Stage::New),
            (JobStatus::Scheduled, None, None) => Ok(Stage::Scheduled),
            (JobStatus::InProgress, started_at, None) => Ok(Stage::InProgress {
                started_at: started_at.unwrap_or(created_at),
            }),
            (JobStatus::Done, started_at, completed_at) => {
                let completed_at = completed_at.or(started_at).unwrap_or(created_at);
                Ok(Stage::Done {
                    started_at: started_at.unwrap_or(completed_at),
                    completed_at,
                })
            }
            (status, started_at, completed_at) => Err(format!(
                "status {} with started_at={} completed_at={}",
                status,
                started_at.is_some(),
                completed_at.is_some()
            )),
        }
    }

    /// Computes the stage reached by moving to `target` at `now`.
    ///
    /// Transitions only move forward, `done` is terminal, and `done` is
    /// reachable from `scheduled` or `in_progress` only.
    pub fn advance(&self, target: JobStatus, now: DateTime<Utc>) -> Result<Stage, AppError> {
        let current = self.status();

        if current == JobStatus::Done {
            return Err(AppError::JobClosed);
        }

        if target <= current || (target == JobStatus::Done && current == JobStatus::New) {
            return Err(AppError::InvalidTransition {
                from: current,
                to: target,
            });
        }

        let started_at = self.started_at().unwrap_or(now);

        Ok(match target {
            JobStatus::Scheduled => Stage::Scheduled,
            JobStatus::InProgress => Stage::InProgress { started_at },
            JobStatus::Done => Stage::Done {
                started_at,
                completed_at: now,
            },
            // `new` is never ahead of anything
            JobStatus::New => {
                return Err(AppError::InvalidTransition {
                    from: current,
                    to: target,
                });
            }
        })
    }
}

/// Represents a field-service job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    /// The unique identifier for the job.
    pub id: Uuid,
    /// The service requested, never blank.
    pub service: String,
    /// Free-form notes from whoever created the job.
    pub notes: Option<String>,
    /// Lifecycle stage and its timestamps.
    pub stage: Stage,
    /// The owner or dispatcher who created the job.
    pub created_by: PrincipalId,
    /// The technician profile responsible for the job.
    pub assigned_to: Option<TechnicianId>,
    /// The timestamp when the job was created.
    pub created_at: DateTime<Utc>,
    /// Notes left by the technician on completion.
    pub completed_notes: Option<String>,
    /// Row version used for compare-and-swap updates.
    pub version: i64,
}

impl Job {
    pub fn status(&self) -> JobStatus {
        self.stage.status()
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.stage.started_at()
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.stage.completed_at()
    }

    pub fn is_closed(&self) -> bool {
        self.status() == JobStatus::Done
    }
}

/// A job about to be inserted.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub service: String,
    pub notes: Option<String>,
    pub created_by: PrincipalId,
}

/// A partial update produced by the lifecycle engine.
///
/// `None` leaves the column untouched; `assigned_to: Some(None)` clears the
/// assignment.
#[derive(Debug, Clone, Default)]
pub struct JobUpdate {
    pub assigned_to: Option<Option<TechnicianId>>,
    pub stage: Option<Stage>,
    pub completed_notes: Option<String>,
}

/// Filter for job listings. Empty fields match everything.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub assigned_to: Option<TechnicianId>,
    pub status: Option<JobStatus>,
}
