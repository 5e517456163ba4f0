//! Agent portal: the signed-in agent's own account, keys and sub-agents.

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use keyledger_core::{
    reports::{agent_dashboard, agent_keys, AgentDashboard, AgentKeyView},
    Agent, AgentStatus, AgentView, ApiKey, Identified, KeyLog, Platform,
};
use keyledger_telemetry::log_credits_transferred;
use serde::{Deserialize, Serialize};

use super::agents::{key_status, AmountRequest, CreateAgentRequest, StatusRequest};
use super::logs::LogsQuery;
use super::router::AppState;
use crate::auth::AgentSession;
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

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedKey {
    pub platform_id: String,
    #[serde(flatten)]
    pub key: ApiKey,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferResponse {
    pub amount: u64,
    pub balance: u64,
    pub sub_agent_balance: u64,
}

/// `null` or an omitted field clears the expiration.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpirationRequest {
    #[serde(default)]
    pub expiration_at: Option<DateTime<Utc>>,
}

async fn own_record(state: &AppState, agent_id: &str) -> Result<Agent, ProblemDetails> {
    state
        .repos
        .agents
        .get(agent_id)
        .await?
        .ok_or_else(|| {
            state.sessions.revoke_agent(agent_id);
            ProblemDetails::unauthorized("account no longer exists")
        })
}

/// GET /agent/profile
pub async fn profile(
    agent: AgentSession,
    State(state): State<AppState>,
) -> Result<Json<AgentView>, ProblemDetails> {
    let record = own_record(&state, &agent.agent_id).await?;
    Ok(Json(AgentView::new(agent.agent_id, record)))
}

/// GET /agent/dashboard
pub async fn dashboard(
    agent: AgentSession,
    State(state): State<AppState>,
) -> Result<Json<AgentDashboard>, ProblemDetails> {
    let record = own_record(&state, &agent.agent_id).await?;
    Ok(Json(agent_dashboard(&record)))
}

/// GET /agent/keys
pub async fn list_keys(
    agent: AgentSession,
    State(state): State<AppState>,
    Query(query): Query<KeysQuery>,
) -> Result<Json<Vec<AgentKeyView>>, ProblemDetails> {
    let record = own_record(&state, &agent.agent_id).await?;
    let platform = query.platform.as_deref().filter(|p| !p.is_empty());
    Ok(Json(agent_keys(&record, platform)))
}

/// POST /agent/keys
///
/// Costs one credit per token.
pub async fn create_key(
    agent: AgentSession,
    State(state): State<AppState>,
    Json(input): Json<CreateKeyRequest>,
) -> Result<(StatusCode, Json<IssuedKey>), ProblemDetails> {
    let key = state
        .ledger
        .issue_agent_key(&agent.agent_id, &input.platform_id, input.tokens)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(IssuedKey {
            platform_id: input.platform_id,
            key,
        }),
    ))
}

/// PUT /agent/keys/{platform_id}/{key}
pub async fn set_key_status(
    agent: AgentSession,
    State(state): State<AppState>,
    Path((platform_id, key)): Path<(String, String)>,
    body: Bytes,
) -> Result<Json<ApiKey>, ProblemDetails> {
    let status = key_status(&body)?;
    let key = state
        .ledger
        .set_agent_key_status(&agent.agent_id, &platform_id, &key, status)
        .await?;
    Ok(Json(key))
}

/// DELETE /agent/keys/{platform_id}/{key}
pub async fn delete_key(
    agent: AgentSession,
    State(state): State<AppState>,
    Path((platform_id, key)): Path<(String, String)>,
) -> Result<StatusCode, ProblemDetails> {
    state
        .ledger
        .delete_agent_key(&agent.agent_id, &platform_id, &key)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /agent/agents
pub async fn list_sub_agents(
    agent: AgentSession,
    State(state): State<AppState>,
) -> Result<Json<Vec<AgentView>>, ProblemDetails> {
    let mut children = state.repos.agents.children_of(&agent.agent_id).await?;
    children.sort_by(|a, b| b.record.created_at.cmp(&a.record.created_at));
    Ok(Json(children.into_iter().map(AgentView::from).collect()))
}

/// POST /agent/agents
///
/// The sub-agent's initial credits come out of the caller's balance.
pub async fn create_sub_agent(
    agent: AgentSession,
    State(state): State<AppState>,
    Json(input): Json<CreateAgentRequest>,
) -> Result<(StatusCode, Json<AgentView>), ProblemDetails> {
    let credits = input.credits;
    let created = state
        .ledger
        .create_agent(input.into(), Some(&agent.agent_id))
        .await?;
    if credits > 0 {
        log_credits_transferred!(
            from = %agent.agent_id,
            to = %created.id,
            amount = credits,
            "sub-agent funded"
        );
    }
    Ok((StatusCode::CREATED, Json(created.into())))
}

/// POST /agent/agents/{id}/credits
pub async fn transfer_credits(
    agent: AgentSession,
    State(state): State<AppState>,
    Path(child_id): Path<String>,
    Json(input): Json<AmountRequest>,
) -> Result<Json<TransferResponse>, ProblemDetails> {
    let receipt = state
        .ledger
        .transfer_credits(&agent.agent_id, &child_id, input.amount)
        .await?;
    log_credits_transferred!(
        from = %agent.agent_id,
        to = %child_id,
        amount = receipt.amount,
        "credits transferred"
    );
    Ok(Json(TransferResponse {
        amount: receipt.amount,
        balance: receipt.parent_balance,
        sub_agent_balance: receipt.child_balance,
    }))
}

/// POST /agent/agents/{id}/status
pub async fn set_sub_agent_status(
    agent: AgentSession,
    State(state): State<AppState>,
    Path(child_id): Path<String>,
    Json(input): Json<StatusRequest>,
) -> Result<Json<AgentView>, ProblemDetails> {
    state.ledger.ensure_child(&agent.agent_id, &child_id).await?;
    let child = state.ledger.set_agent_status(&child_id, input.status).await?;
    if input.status == AgentStatus::Banned {
        state.sessions.revoke_agent(&child_id);
    }
    Ok(Json(AgentView::new(child_id, child)))
}

/// PUT /agent/agents/{id}/expiration
pub async fn set_sub_agent_expiration(
    agent: AgentSession,
    State(state): State<AppState>,
    Path(child_id): Path<String>,
    Json(input): Json<ExpirationRequest>,
) -> Result<Json<AgentView>, ProblemDetails> {
    state.ledger.ensure_child(&agent.agent_id, &child_id).await?;
    let child = state
        .ledger
        .set_expiration(&child_id, input.expiration_at)
        .await?;
    Ok(Json(AgentView::new(child_id, child)))
}

/// DELETE /agent/agents/{id}
///
/// Remaining credits of the sub-agent are not refunded.
pub async fn delete_sub_agent(
    agent: AgentSession,
    State(state): State<AppState>,
    Path(child_id): Path<String>,
) -> Result<StatusCode, ProblemDetails> {
    state.ledger.ensure_child(&agent.agent_id, &child_id).await?;
    state.ledger.delete_agent(&child_id).await?;
    state.sessions.revoke_agent(&child_id);
    Ok(StatusCode::NO_CONTENT)
}

/// GET /agent/logs
///
/// Usage of the caller's own keys, newest first.
pub async fn list_logs(
    agent: AgentSession,
    State(state): State<AppState>,
    Query(query): Query<LogsQuery>,
) -> Result<Json<Vec<Identified<KeyLog>>>, ProblemDetails> {
    let mut logs = state.repos.key_logs.list_for_agent(&agent.agent_id).await?;
    logs.truncate(query.limit());
    Ok(Json(logs))
}

/// GET /agent/platforms
pub async fn list_platforms(
    _agent: AgentSession,
    State(state): State<AppState>,
) -> Result<Json<Vec<Identified<Platform>>>, ProblemDetails> {
    Ok(Json(state.repos.platforms.list().await?))
}
