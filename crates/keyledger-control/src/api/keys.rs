//! Standalone key endpoints.

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use keyledger_core::{Identified, StandaloneKey};
use serde::Deserialize;

use super::agents::key_status;
use super::router::AppState;
use crate::auth::AdminSession;
use crate::error::ProblemDetails;

#[derive(Debug, Deserialize)]
pub struct KeysQuery {
    #[serde(default)]
    pub platform: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateKeyRequest {
    pub platform_id: String,
    pub tokens: u64,
}

/// GET /admin/keys
pub async fn list_standalone_keys(
    _admin: AdminSession,
    State(state): State<AppState>,
    Query(query): Query<KeysQuery>,
) -> Result<Json<Vec<Identified<StandaloneKey>>>, ProblemDetails> {
    let mut keys = match query.platform.as_deref().filter(|p| !p.is_empty()) {
        Some(platform) => state.repos.standalone_keys.list_for_platform(platform).await?,
        None => state.repos.standalone_keys.list().await?,
    };
    keys.sort_by(|a, b| b.record.key.created_at.cmp(&a.record.key.created_at));
    Ok(Json(keys))
}

/// POST /admin/keys
pub async fn create_standalone_key(
    _admin: AdminSession,
    State(state): State<AppState>,
    Json(input): Json<CreateKeyRequest>,
) -> Result<(StatusCode, Json<Identified<StandaloneKey>>), ProblemDetails> {
    let key = state
        .ledger
        .issue_standalone_key(&input.platform_id, input.tokens)
        .await?;
    Ok((StatusCode::CREATED, Json(key)))
}

/// PUT /admin/keys/{id}
pub async fn set_standalone_key_status(
    _admin: AdminSession,
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<Identified<StandaloneKey>>, ProblemDetails> {
    let status = key_status(&body)?;
    let key = state.ledger.set_standalone_key_status(&id, status).await?;
    Ok(Json(Identified { id, record: key }))
}

/// DELETE /admin/keys/{id}
pub async fn delete_standalone_key(
    _admin: AdminSession,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ProblemDetails> {
    state.ledger.delete_standalone_key(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}
