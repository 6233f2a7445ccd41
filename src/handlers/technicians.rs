use axum::{
    Extension, Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::{
    error::Result,
    models::principal::Principal,
    models::technician::{TechnicianId, TechnicianProfile},
    state::AppState,
};

/// A technician as offered in the assignment picker.
#[derive(Serialize)]
pub struct TechnicianView {
    pub id: TechnicianId,
    pub full_name: String,
}

impl From<TechnicianProfile> for TechnicianView {
    fn from(technician: TechnicianProfile) -> Self {
        Self {
            id: technician.id,
            full_name: technician.full_name,
        }
    }
}

/// Lists technicians that can receive assignments.
pub async fn list_technicians(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> Result<Response> {
    state.assignments.ensure_can_assign(&principal)?;

    let technicians: Vec<TechnicianView> = state
        .assignments
        .list_eligible_technicians()
        .await?
        .into_iter()
        .map(TechnicianView::from)
        .collect();

    Ok((StatusCode::OK, Json(technicians)).into_response())
}
