//! Admin dashboard summary.

use axum::{extract::State, Json};
use keyledger_core::reports::{admin_summary, AdminSummary};

use super::router::AppState;
use crate::auth::AdminSession;
use crate::error::ProblemDetails;

/// GET /admin/dashboard
pub async fn admin_dashboard(
    _admin: AdminSession,
    State(state): State<AppState>,
) -> Result<Json<AdminSummary>, ProblemDetails> {
    Ok(Json(admin_summary(&state.repos).await?))
}
