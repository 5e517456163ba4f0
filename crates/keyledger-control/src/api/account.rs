//! Login, logout and password endpoints.

use axum::{extract::State, http::StatusCode, Json};
use chrono::{DateTime, Utc};
use keyledger_core::{AgentView, LedgerError, LoginOutcome, Principal};
use serde::{Deserialize, Serialize};

use super::router::AppState;
use crate::auth::{CurrentSession, Role};
use crate::client_ip::ClientIp;
use crate::error::ProblemDetails;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub token: String,
    pub role: Role,
    pub expires_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<AgentView>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MeResponse {
    pub role: Role,
    pub username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<AgentView>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub current: String,
    pub new: String,
    pub confirm: String,
}

/// POST /auth/login
pub async fn login(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    Json(input): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ProblemDetails> {
    let outcome = state
        .access
        .authenticate(input.username.trim(), &input.password, &ip)
        .await
        .inspect_err(|e| tracing::info!(username = %input.username, ip = %ip, reason = %e, "login refused"))?;

    let response = match outcome {
        LoginOutcome::Admin => {
            let (token, session) = state.sessions.issue(Role::Admin, None, &input.username);
            tracing::info!(ip = %ip, "admin logged in");
            LoginResponse {
                token,
                role: Role::Admin,
                expires_at: session.expires_at,
                agent: None,
            }
        }
        LoginOutcome::Agent { id, agent } => {
            let (token, session) =
                state
                    .sessions
                    .issue(Role::Agent, Some(id.clone()), &agent.username);
            tracing::info!(agent_id = %id, ip = %ip, "agent logged in");
            LoginResponse {
                token,
                role: Role::Agent,
                expires_at: session.expires_at,
                agent: Some(AgentView::new(id, agent)),
            }
        }
    };
    Ok(Json(response))
}

/// POST /auth/logout
pub async fn logout(State(state): State<AppState>, current: CurrentSession) -> StatusCode {
    state.sessions.revoke(&current.token);
    StatusCode::NO_CONTENT
}

/// GET /auth/me
pub async fn me(
    State(state): State<AppState>,
    current: CurrentSession,
) -> Result<Json<MeResponse>, ProblemDetails> {
    let session = current.session;
    let agent = match &session.agent_id {
        Some(id) => {
            let agent = state.repos.agents.get(id).await?.ok_or_else(|| {
                state.sessions.revoke(&current.token);
                ProblemDetails::unauthorized("account no longer exists")
            })?;
            Some(AgentView::new(id.clone(), agent))
        }
        None => None,
    };
    Ok(Json(MeResponse {
        role: session.role,
        username: session.username,
        agent,
        expires_at: session.expires_at,
    }))
}

/// POST /auth/password
pub async fn change_password(
    State(state): State<AppState>,
    current: CurrentSession,
    Json(input): Json<ChangePasswordRequest>,
) -> Result<StatusCode, ProblemDetails> {
    let principal = match (current.session.role, current.session.agent_id.as_deref()) {
        (Role::Admin, _) => Principal::Admin,
        (Role::Agent, Some(id)) => Principal::Agent(id),
        (Role::Agent, None) => {
            return Err(LedgerError::Forbidden("session has no agent".into()).into())
        }
    };
    state
        .access
        .change_password(principal, &input.current, &input.new, &input.confirm)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
