//! Read-only summaries for the admin and agent dashboards.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::StoreError;
use crate::models::{Agent, AgentView, ApiKey, CreditHistoryEntry, Identified, KeyStatus, Platform};
use crate::repo::Repositories;

/// Entries shown in each "recent" list.
const RECENT_LIMIT: usize = 5;

/// Admin overview.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminSummary {
    pub agent_count: usize,
    pub platform_count: usize,
    pub bot_count: usize,
    pub standalone_key_count: usize,
    pub recent_agents: Vec<AgentView>,
    pub recent_platforms: Vec<Identified<Platform>>,
}

/// One key of an agent, flattened with its platform.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentKeyView {
    pub platform_id: String,
    pub key: String,
    #[serde(rename = "tokens_remaining")]
    pub tokens_remaining: u64,
    pub status: KeyStatus,
    pub created_at: Option<DateTime<Utc>>,
}

impl AgentKeyView {
    fn new(platform_id: &str, key: &ApiKey) -> Self {
        Self {
            platform_id: platform_id.to_string(),
            key: key.key.clone(),
            tokens_remaining: key.tokens_remaining,
            status: key.status,
            created_at: key.created_at,
        }
    }
}

/// Agent overview.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentDashboard {
    pub credits: u64,
    pub total_keys: usize,
    pub total_tokens: u64,
    pub platforms_in_use: usize,
    pub credit_history: Vec<CreditHistoryEntry>,
}

/// All keys of an agent, newest first. Keys without a creation time sort last.
pub fn agent_keys(agent: &Agent, platform_id: Option<&str>) -> Vec<AgentKeyView> {
    let mut keys: Vec<AgentKeyView> = agent
        .keys
        .iter()
        .filter(|(pid, _)| platform_id.is_none() || platform_id == Some(pid.as_str()))
        .flat_map(|(pid, keys)| keys.iter().map(move |k| AgentKeyView::new(pid, k)))
        .collect();
    keys.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    keys
}

pub fn agent_dashboard(agent: &Agent) -> AgentDashboard {
    let keys = agent.keys.values().flatten();
    AgentDashboard {
        credits: agent.credits,
        total_keys: keys.clone().count(),
        total_tokens: keys.fold(0u64, |sum, k| sum.saturating_add(k.tokens_remaining)),
        platforms_in_use: agent.keys.len(),
        credit_history: agent.credit_history.clone(),
    }
}

/// Counts plus the most recently created agents and the last platforms by id.
pub async fn admin_summary(repos: &Repositories) -> Result<AdminSummary, StoreError> {
    let mut agents = repos.agents.list().await?;
    let mut platforms = repos.platforms.list().await?;
    let bot_count = repos.bots.list().await?.len();
    let standalone_key_count = repos.standalone_keys.list().await?.len();

    let agent_count = agents.len();
    let platform_count = platforms.len();

    agents.sort_by(|a, b| b.record.created_at.cmp(&a.record.created_at));
    agents.truncate(RECENT_LIMIT);
    platforms.sort_by(|a, b| b.id.cmp(&a.id));
    platforms.truncate(RECENT_LIMIT);

    Ok(AdminSummary {
        agent_count,
        platform_count,
        bot_count,
        standalone_key_count,
        recent_agents: agents.into_iter().map(AgentView::from).collect(),
        recent_platforms: platforms,
    })
}
