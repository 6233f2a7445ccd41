use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::principal::{PrincipalId, Role};

/// Id of a row in the `technicians` table.
///
/// Job assignment always references this id, never the technician's
/// identity id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TechnicianId(pub Uuid);

impl fmt::Display for TechnicianId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Represents a technician who can be assigned to jobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TechnicianProfile {
    /// The unique identifier for the technician.
    pub id: TechnicianId,
    /// The identity this technician signs in with.
    pub linked_principal_id: Option<PrincipalId>,
    /// The technician's full name, used for ordering pickers.
    pub full_name: String,
    /// The role column on the technician row.
    pub role: Role,
    /// Whether the technician can receive new assignments.
    pub is_active: bool,
}

/// Represents the role record of an identity (`profiles` table).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    /// The identity this profile belongs to.
    pub principal_id: PrincipalId,
    /// The single role granted to the identity.
    pub role: Role,
}
