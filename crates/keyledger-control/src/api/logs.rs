//! Key usage log endpoints.

use axum::{
    extract::{Query, State},
    Json,
};
use keyledger_core::{Identified, KeyLog};
use serde::Deserialize;

use super::router::AppState;
use crate::auth::AdminSession;
use crate::error::ProblemDetails;

/// Entries returned when no limit is given.
pub(crate) const DEFAULT_LOG_LIMIT: usize = 500;

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    #[serde(default)]
    pub limit: Option<usize>,
}

impl LogsQuery {
    pub(crate) fn limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_LOG_LIMIT)
    }
}

/// GET /admin/logs
///
/// Newest entries first.
pub async fn list_logs(
    _admin: AdminSession,
    State(state): State<AppState>,
    Query(query): Query<LogsQuery>,
) -> Result<Json<Vec<Identified<KeyLog>>>, ProblemDetails> {
    let mut logs = state.repos.key_logs.list().await?;
    logs.truncate(query.limit());
    Ok(Json(logs))
}
