//! Bot directory endpoints.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use keyledger_core::{new_record_id, Bot, Identified};
use serde::Deserialize;

use super::router::AppState;
use crate::auth::{AdminSession, AgentSession};
use crate::error::ProblemDetails;

#[derive(Debug, Deserialize)]
pub struct CreateBotRequest {
    pub name: String,
    pub url: String,
}

/// GET /admin/bots
pub async fn list_bots(
    _admin: AdminSession,
    State(state): State<AppState>,
) -> Result<Json<Vec<Identified<Bot>>>, ProblemDetails> {
    Ok(Json(state.repos.bots.list().await?))
}

/// GET /agent/bots
pub async fn list_bots_for_agent(
    _agent: AgentSession,
    State(state): State<AppState>,
) -> Result<Json<Vec<Identified<Bot>>>, ProblemDetails> {
    Ok(Json(state.repos.bots.list().await?))
}

/// POST /admin/bots
pub async fn create_bot(
    _admin: AdminSession,
    State(state): State<AppState>,
    Json(input): Json<CreateBotRequest>,
) -> Result<(StatusCode, Json<Identified<Bot>>), ProblemDetails> {
    let name = input.name.trim();
    let url = input.url.trim();
    if name.is_empty() || url.is_empty() {
        return Err(ProblemDetails::bad_request("bot name and url are required"));
    }
    if !(url.starts_with("https://") || url.starts_with("http://")) {
        return Err(ProblemDetails::bad_request("bot url must start with http:// or https://"));
    }

    let bot = Bot {
        name: name.to_string(),
        url: url.to_string(),
        added_at: Some(Utc::now()),
    };
    let id = new_record_id("bot");
    state.repos.bots.put(&id, &bot).await?;
    Ok((StatusCode::CREATED, Json(Identified { id, record: bot })))
}

/// DELETE /admin/bots/{id}
pub async fn delete_bot(
    _admin: AdminSession,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ProblemDetails> {
    if !state.repos.bots.delete(&id).await? {
        return Err(ProblemDetails::not_found(format!("bot '{}' not found", id)));
    }
    Ok(StatusCode::NO_CONTENT)
}
