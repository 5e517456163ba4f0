//! Admin endpoints over agents and their keys.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use keyledger_core::{AgentStatus, AgentView, ApiKey, CreditHistoryEntry, KeyStatus, NewAgent};
use serde::Deserialize;

use super::optional_json;
use super::router::AppState;
use crate::auth::AdminSession;
use crate::error::ProblemDetails;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAgentRequest {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub credits: u64,
    #[serde(default)]
    pub expiration_at: Option<DateTime<Utc>>,
}

impl From<CreateAgentRequest> for NewAgent {
    fn from(input: CreateAgentRequest) -> Self {
        NewAgent {
            username: input.username,
            password: input.password,
            credits: input.credits,
            expiration_at: input.expiration_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AmountRequest {
    pub amount: u64,
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub status: AgentStatus,
}

#[derive(Debug, Deserialize)]
pub struct ToggleRequest {
    pub enabled: bool,
}

/// Optional body of a key status change. Without one the status toggles.
#[derive(Debug, Deserialize)]
pub struct KeyStatusRequest {
    pub status: KeyStatus,
}

/// Parse a key status body; absent means toggle.
pub(crate) fn key_status(body: &Bytes) -> Result<Option<KeyStatus>, ProblemDetails> {
    Ok(optional_json::<KeyStatusRequest>(body)?.map(|r| r.status))
}

/// GET /admin/agents
pub async fn list_agents(
    _admin: AdminSession,
    State(state): State<AppState>,
) -> Result<Json<Vec<AgentView>>, ProblemDetails> {
    let mut agents = state.repos.agents.list().await?;
    agents.sort_by(|a, b| b.record.created_at.cmp(&a.record.created_at));
    Ok(Json(agents.into_iter().map(AgentView::from).collect()))
}

/// POST /admin/agents
pub async fn create_agent(
    _admin: AdminSession,
    State(state): State<AppState>,
    Json(input): Json<CreateAgentRequest>,
) -> Result<(StatusCode, Json<AgentView>), ProblemDetails> {
    let credits = input.credits;
    let created = state.ledger.create_agent(input.into(), None).await?;
    if credits > 0 {
        state.metrics.record_credits_issued(credits);
    }
    Ok((StatusCode::CREATED, Json(created.into())))
}

/// GET /admin/agents/{id}
pub async fn get_agent(
    _admin: AdminSession,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<AgentView>, ProblemDetails> {
    let agent = state
        .repos
        .agents
        .get(&id)
        .await?
        .ok_or_else(|| ProblemDetails::not_found(format!("agent '{}' not found", id)))?;
    Ok(Json(AgentView::new(id, agent)))
}

/// DELETE /admin/agents/{id}
pub async fn delete_agent(
    _admin: AdminSession,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ProblemDetails> {
    state.ledger.delete_agent(&id).await?;
    state.sessions.revoke_agent(&id);
    Ok(StatusCode::NO_CONTENT)
}

/// POST /admin/agents/{id}/credits
pub async fn add_credits(
    _admin: AdminSession,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(input): Json<AmountRequest>,
) -> Result<Json<AgentView>, ProblemDetails> {
    let agent = state.ledger.add_credits(&id, input.amount).await?;
    state.metrics.record_credits_issued(input.amount);
    tracing::info!(agent_id = %id, amount = input.amount, balance = agent.credits, "credits added");
    Ok(Json(AgentView::new(id, agent)))
}

/// GET /admin/agents/{id}/history
///
/// Newest entries first.
pub async fn credit_history(
    _admin: AdminSession,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<CreditHistoryEntry>>, ProblemDetails> {
    let agent = state
        .repos
        .agents
        .get(&id)
        .await?
        .ok_or_else(|| ProblemDetails::not_found(format!("agent '{}' not found", id)))?;
    let mut history = agent.credit_history;
    history.reverse();
    Ok(Json(history))
}

/// POST /admin/agents/{id}/status
pub async fn set_status(
    _admin: AdminSession,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(input): Json<StatusRequest>,
) -> Result<Json<AgentView>, ProblemDetails> {
    let agent = state.ledger.set_agent_status(&id, input.status).await?;
    if input.status == AgentStatus::Banned {
        state.sessions.revoke_agent(&id);
    }
    Ok(Json(AgentView::new(id, agent)))
}

/// POST /admin/agents/{id}/ip-ban
pub async fn set_ip_ban_enabled(
    _admin: AdminSession,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(input): Json<ToggleRequest>,
) -> Result<Json<AgentView>, ProblemDetails> {
    let agent = state.ledger.set_ip_ban_enabled(&id, input.enabled).await?;
    Ok(Json(AgentView::new(id, agent)))
}

/// PUT /admin/agents/{id}/keys/{platform_id}/{key}
pub async fn set_key_status(
    _admin: AdminSession,
    State(state): State<AppState>,
    Path((id, platform_id, key)): Path<(String, String, String)>,
    body: Bytes,
) -> Result<Json<ApiKey>, ProblemDetails> {
    let status = key_status(&body)?;
    let key = state
        .ledger
        .set_agent_key_status(&id, &platform_id, &key, status)
        .await?;
    Ok(Json(key))
}

/// DELETE /admin/agents/{id}/keys/{platform_id}/{key}
pub async fn delete_key(
    _admin: AdminSession,
    State(state): State<AppState>,
    Path((id, platform_id, key)): Path<(String, String, String)>,
) -> Result<StatusCode, ProblemDetails> {
    state
        .ledger
        .delete_agent_key(&id, &platform_id, &key)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
