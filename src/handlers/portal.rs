use axum::{
    Extension, Json,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::{
    error::Result,
    handlers::jobs::{JobView, ListQuery},
    handlers::technicians::TechnicianView,
    middleware_layer::auth::home_path,
    models::principal::{Principal, Role},
    state::AppState,
};

/// What a role's login page needs to render.
#[derive(Serialize)]
pub struct LoginPage {
    pub role: Role,
    pub action: &'static str,
    pub redirect: &'static str,
}

/// Dashboard payload for the signed-in principal.
#[derive(Serialize)]
pub struct Dashboard {
    pub role: Role,
    pub email: String,
    pub jobs: Vec<JobView>,
    /// Assignment picker; empty for technicians.
    pub technicians: Vec<TechnicianView>,
}

/// Login page descriptor for `role`.
///
/// Signed-in principals of the same role never get here; the gateway sends
/// them to their dashboard first.
pub async fn login_page(role: Role) -> Response {
    let page = LoginPage {
        role,
        action: "/api/auth/login",
        redirect: home_path(role),
    };
    (StatusCode::OK, Json(page)).into_response()
}

/// Dashboard for the caller's role.
pub async fn dashboard(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Query(query): Query<ListQuery>,
) -> Result<Response> {
    let jobs = state
        .lifecycle
        .list_for(&principal, query.status()?)
        .await?
        .into_iter()
        .map(JobView::from)
        .collect();

    let technicians = if principal.role.is_staff() {
        state
            .assignments
            .list_eligible_technicians()
            .await?
            .into_iter()
            .map(TechnicianView::from)
            .collect()
    } else {
        Vec::new()
    };

    tracing::debug!("📋 Dashboard for {} ({})", principal.id, principal.role);

    let dashboard = Dashboard {
        role: principal.role,
        email: principal.email,
        jobs,
        technicians,
    };
    Ok((StatusCode::OK, Json(dashboard)).into_response())
}
