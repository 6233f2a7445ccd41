use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::technician::TechnicianId;

/// Identity id assigned by the identity service (`auth.users.id`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrincipalId(pub Uuid);

impl fmt::Display for PrincipalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// The three actor classes of the dispatch tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Owner,
    Dispatcher,
    Technician,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::Owner, Role::Dispatcher, Role::Technician];

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Owner => "owner",
            Role::Dispatcher => "dispatcher",
            Role::Technician => "technician",
        }
    }

    /// Owners and dispatchers manage jobs; technicians only work them.
    pub fn is_staff(self) -> bool {
        matches!(self, Role::Owner | Role::Dispatcher)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "owner" => Ok(Role::Owner),
            "dispatcher" => Ok(Role::Dispatcher),
            "technician" => Ok(Role::Technician),
            other => Err(format!("unknown role `{other}`")),
        }
    }
}

/// The resolved identity of the current request's caller.
///
/// Built by the role resolver once per request and handed to handlers as a
/// request extension. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub id: PrincipalId,
    pub email: String,
    pub role: Role,
    pub active: bool,
    /// The technician profile linked to this identity, for technicians.
    pub technician_id: Option<TechnicianId>,
}

impl Principal {
    /// Whether this principal is the technician behind `assignee`.
    pub fn is_technician(&self, assignee: Option<TechnicianId>) -> bool {
        self.role == Role::Technician
            && self.technician_id.is_some()
            && self.technician_id == assignee
    }
}
