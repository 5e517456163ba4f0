//! IP ban lists of the admin and of agents.
//!
//! The admin list blocks a client on every key. An agent list only blocks
//! the agent's own keys and is available once the admin enabled it.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use keyledger_core::{parse_ip_list, Identified, IpBan, ADMIN_OWNER};
use serde::Deserialize;

use super::router::AppState;
use crate::auth::{AdminSession, AgentSession};
use crate::error::ProblemDetails;

/// Either a single `ip` or a free-form `ips` list (newline, comma or
/// semicolon separated).
#[derive(Debug, Deserialize)]
pub struct AddBansRequest {
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub ips: Option<String>,
}

impl AddBansRequest {
    fn addresses(&self) -> Vec<String> {
        let mut all = Vec::new();
        for input in [&self.ip, &self.ips].into_iter().flatten() {
            for ip in parse_ip_list(input) {
                if !all.contains(&ip) {
                    all.push(ip);
                }
            }
        }
        all
    }
}

async fn add_bans(
    state: &AppState,
    owner: &str,
    input: &AddBansRequest,
) -> Result<Vec<Identified<IpBan>>, ProblemDetails> {
    let addresses = input.addresses();
    if addresses.is_empty() {
        return Err(ProblemDetails::bad_request("at least one IP address is required"));
    }

    let existing = state.repos.ip_bans.list(owner).await?;
    let mut added = Vec::new();
    for ip in addresses {
        if existing.iter().any(|b| b.record.ip == ip) {
            continue;
        }
        let id = state.repos.ip_bans.add(owner, &ip).await?;
        added.push(Identified {
            id,
            record: IpBan {
                ip,
                created_at: Some(chrono::Utc::now()),
            },
        });
    }
    tracing::info!(owner, count = added.len(), "IP bans added");
    Ok(added)
}

async fn delete_ban(state: &AppState, owner: &str, id: &str) -> Result<StatusCode, ProblemDetails> {
    if !state.repos.ip_bans.delete(owner, id).await? {
        return Err(ProblemDetails::not_found(format!("IP ban '{}' not found", id)));
    }
    Ok(StatusCode::NO_CONTENT)
}

/// Refuse agents whose IP ban list has not been enabled.
async fn require_ip_ban_enabled(state: &AppState, agent_id: &str) -> Result<(), ProblemDetails> {
    let agent = state
        .repos
        .agents
        .get(agent_id)
        .await?
        .ok_or_else(|| ProblemDetails::unauthorized("account no longer exists"))?;
    if !agent.ip_ban_enabled {
        return Err(ProblemDetails::forbidden(
            "IP banning is not enabled for this account",
        ));
    }
    Ok(())
}

/// GET /admin/ip-bans
pub async fn list_admin_bans(
    _admin: AdminSession,
    State(state): State<AppState>,
) -> Result<Json<Vec<Identified<IpBan>>>, ProblemDetails> {
    Ok(Json(state.repos.ip_bans.list(ADMIN_OWNER).await?))
}

/// POST /admin/ip-bans
pub async fn add_admin_bans(
    _admin: AdminSession,
    State(state): State<AppState>,
    Json(input): Json<AddBansRequest>,
) -> Result<(StatusCode, Json<Vec<Identified<IpBan>>>), ProblemDetails> {
    let added = add_bans(&state, ADMIN_OWNER, &input).await?;
    Ok((StatusCode::CREATED, Json(added)))
}

/// DELETE /admin/ip-bans/{id}
pub async fn delete_admin_ban(
    _admin: AdminSession,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ProblemDetails> {
    delete_ban(&state, ADMIN_OWNER, &id).await
}

/// GET /agent/ip-bans
pub async fn list_agent_bans(
    agent: AgentSession,
    State(state): State<AppState>,
) -> Result<Json<Vec<Identified<IpBan>>>, ProblemDetails> {
    require_ip_ban_enabled(&state, &agent.agent_id).await?;
    Ok(Json(state.repos.ip_bans.list(&agent.agent_id).await?))
}

/// POST /agent/ip-bans
pub async fn add_agent_bans(
    agent: AgentSession,
    State(state): State<AppState>,
    Json(input): Json<AddBansRequest>,
) -> Result<(StatusCode, Json<Vec<Identified<IpBan>>>), ProblemDetails> {
    require_ip_ban_enabled(&state, &agent.agent_id).await?;
    let added = add_bans(&state, &agent.agent_id, &input).await?;
    Ok((StatusCode::CREATED, Json(added)))
}

/// DELETE /agent/ip-bans/{id}
pub async fn delete_agent_ban(
    agent: AgentSession,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ProblemDetails> {
    require_ip_ban_enabled(&state, &agent.agent_id).await?;
    delete_ban(&state, &agent.agent_id, &id).await
}
