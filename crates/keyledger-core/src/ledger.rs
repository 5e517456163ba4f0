//! Credit ledger: agents, credit movements and key issuance.
//!
//! Every balance mutation is a compare-and-swap on the agent record, so two
//! dashboards acting on the same agent cannot lose an update or overdraw it.

use chrono::{DateTime, Utc};

use crate::access::ADMIN_USERNAME;
use crate::error::LedgerError;
use crate::keygen;
use crate::models::{
    new_record_id, Agent, AgentStatus, ApiKey, Identified, KeyStatus, Platform, StandaloneKey,
};
use crate::repo::{AgentsRepository, Repositories};
use crate::store::{CasError, CasPolicy, Db};

/// Input for creating an agent.
#[derive(Debug, Clone)]
pub struct NewAgent {
    pub username: String,
    pub password: String,
    pub credits: u64,
    pub expiration_at: Option<DateTime<Utc>>,
}

/// Balances after a parent-to-child transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferReceipt {
    pub amount: u64,
    pub parent_balance: u64,
    pub child_balance: u64,
}

/// Turn a failed compare-and-swap into a ledger error for record `kind`/`id`.
fn settle(err: CasError<LedgerError>, kind: &'static str, id: &str) -> LedgerError {
    match err {
        CasError::Missing => LedgerError::not_found(kind, id),
        CasError::Rejected(e) => e,
        CasError::Exhausted { attempts } => {
            tracing::warn!(kind, id, attempts, "conditional write retries exhausted");
            LedgerError::Contention(format!("{}/{}", kind, id))
        }
        CasError::Store(e) => LedgerError::Store(e),
    }
}

fn signed(amount: u64) -> Result<i64, LedgerError> {
    i64::try_from(amount).map_err(|_| LedgerError::Validation(format!("amount {} is too large", amount)))
}

fn require_positive(amount: u64, what: &str) -> Result<(), LedgerError> {
    if amount == 0 {
        return Err(LedgerError::Validation(format!("{} must be greater than zero", what)));
    }
    Ok(())
}

/// The credit ledger over one store.
#[derive(Clone)]
pub struct Ledger {
    repos: Repositories,
    policy: CasPolicy,
}

impl Ledger {
    pub fn new(db: Db, policy: CasPolicy) -> Self {
        Self {
            repos: Repositories::new(db),
            policy,
        }
    }

    pub fn repos(&self) -> &Repositories {
        &self.repos
    }

    fn agents(&self) -> &AgentsRepository {
        &self.repos.agents
    }

    async fn platform(&self, platform_id: &str) -> Result<Platform, LedgerError> {
        self.repos
            .platforms
            .get(platform_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("platform", platform_id))
    }

    async fn agent(&self, id: &str) -> Result<Agent, LedgerError> {
        self.agents()
            .get(id)
            .await?
            .ok_or_else(|| LedgerError::not_found("agent", id))
    }

    /// Apply a signed credit change to one agent under CAS.
    async fn move_credits(
        &self,
        agent_id: &str,
        amount: i64,
        action: &str,
    ) -> Result<Agent, LedgerError> {
        let now = Utc::now();
        self.agents()
            .update(agent_id, self.policy, |agent| {
                agent.apply_credit(amount, action, now).map(|_| ())
            })
            .await
            .map(|(agent, ())| agent)
            .map_err(|e| settle(e, "agent", agent_id))
    }

    /// Create an agent, optionally funded by a parent agent.
    ///
    /// With a parent, the initial credits are debited from the parent first;
    /// if the new record cannot be written the parent is refunded.
    pub async fn create_agent(
        &self,
        new: NewAgent,
        parent_id: Option<&str>,
    ) -> Result<Identified<Agent>, LedgerError> {
        let username = new.username.trim().to_string();
        if username.is_empty() {
            return Err(LedgerError::Validation("username is required".into()));
        }
        if new.password.is_empty() {
            return Err(LedgerError::Validation("password is required".into()));
        }
        let now = Utc::now();
        if new.expiration_at.is_some_and(|at| at <= now) {
            return Err(LedgerError::Validation(
                "expiration must be in the future".into(),
            ));
        }
        if username.eq_ignore_ascii_case(ADMIN_USERNAME)
            || self.agents().username_taken(&username).await?
        {
            return Err(LedgerError::AlreadyExists(format!(
                "username '{}' is already taken",
                username
            )));
        }
        let credits = signed(new.credits)?;

        if let Some(parent) = parent_id {
            if credits > 0 {
                self.move_credits(parent, -credits, &format!("transfer to {}", username))
                    .await?;
            } else {
                self.agent(parent).await?;
            }
        }

        let mut agent = Agent {
            username,
            password: Some(new.password),
            credits: 0,
            keys: Default::default(),
            credit_history: Vec::new(),
            created_at: Some(now),
            status: AgentStatus::Active,
            parent_id: parent_id.map(str::to_string),
            expiration_at: new.expiration_at,
            ip_ban_enabled: false,
        };
        agent.apply_credit(credits, "initial credit", now)?;

        let id = new_record_id("agent");
        if let Err(e) = self.agents().put(&id, &agent).await {
            if let Some(parent) = parent_id {
                self.refund(parent, credits).await;
            }
            return Err(e.into());
        }

        tracing::info!(agent_id = %id, username = %agent.username, parent = ?parent_id, credits = new.credits, "agent created");
        Ok(Identified { id, record: agent })
    }

    async fn refund(&self, agent_id: &str, amount: i64) {
        if amount == 0 {
            return;
        }
        if let Err(e) = self.move_credits(agent_id, amount, "transfer refund").await {
            tracing::error!(agent_id, amount, error = %e, "failed to refund credits");
        }
    }

    /// Admin top-up.
    pub async fn add_credits(&self, agent_id: &str, amount: u64) -> Result<Agent, LedgerError> {
        require_positive(amount, "amount")?;
        self.move_credits(agent_id, signed(amount)?, "admin top-up")
            .await
    }

    /// Look up `child_id` and check it is a direct sub-agent of `parent_id`.
    pub async fn ensure_child(&self, parent_id: &str, child_id: &str) -> Result<Agent, LedgerError> {
        let child = self.agent(child_id).await?;
        if !child.is_child_of(parent_id) {
            return Err(LedgerError::Forbidden(format!(
                "agent '{}' is not your sub-agent",
                child_id
            )));
        }
        Ok(child)
    }

    /// Move credits from a parent to one of its direct sub-agents.
    pub async fn transfer_credits(
        &self,
        parent_id: &str,
        child_id: &str,
        amount: u64,
    ) -> Result<TransferReceipt, LedgerError> {
        require_positive(amount, "amount")?;
        let child = self.ensure_child(parent_id, child_id).await?;
        let delta = signed(amount)?;

        let parent = self
            .move_credits(parent_id, -delta, &format!("transfer to {}", child.username))
            .await?;

        let now = Utc::now();
        let received = format!("received from {}", parent.username);
        let credited = self
            .agents()
            .update(child_id, self.policy, |child| {
                if !child.is_child_of(parent_id) {
                    return Err(LedgerError::Forbidden(format!(
                        "agent '{}' is not your sub-agent",
                        child_id
                    )));
                }
                child.apply_credit(delta, received.as_str(), now)
            })
            .await
            .map_err(|e| settle(e, "agent", child_id));

        match credited {
            Ok((_, child_balance)) => {
                tracing::info!(parent_id, child_id, amount, "credits transferred");
                Ok(TransferReceipt {
                    amount,
                    parent_balance: parent.credits,
                    child_balance,
                })
            }
            Err(e) => {
                self.refund(parent_id, delta).await;
                Err(e)
            }
        }
    }

    /// Issue a key to an agent, paid for with one credit per token.
    pub async fn issue_agent_key(
        &self,
        agent_id: &str,
        platform_id: &str,
        tokens: u64,
    ) -> Result<ApiKey, LedgerError> {
        require_positive(tokens, "tokens")?;
        let platform = self.platform(platform_id).await?;
        let cost = signed(tokens)?;
        let now = Utc::now();
        let issued = ApiKey::issue(keygen::generate_for(&platform), tokens, now);
        let action = format!("key issued for {}", platform.title);

        self.agents()
            .update(agent_id, self.policy, |agent| {
                if agent.status == AgentStatus::Banned {
                    return Err(LedgerError::Forbidden("agent is banned".into()));
                }
                agent.apply_credit(-cost, action.as_str(), now)?;
                agent
                    .keys
                    .entry(platform_id.to_string())
                    .or_default()
                    .push(issued.clone());
                Ok(())
            })
            .await
            .map_err(|e| settle(e, "agent", agent_id))?;

        tracing::info!(agent_id, platform_id, tokens, "key issued");
        Ok(issued)
    }

    /// Issue a key owned by nobody. No credits are involved.
    pub async fn issue_standalone_key(
        &self,
        platform_id: &str,
        tokens: u64,
    ) -> Result<Identified<StandaloneKey>, LedgerError> {
        require_positive(tokens, "tokens")?;
        let platform = self.platform(platform_id).await?;
        let key = StandaloneKey {
            key: ApiKey::issue(keygen::generate_for(&platform), tokens, Utc::now()),
            platform_id: platform_id.to_string(),
            platform_title: platform.title,
        };
        let id = new_record_id("key");
        self.repos.standalone_keys.put(&id, &key).await?;
        tracing::info!(key_id = %id, platform_id, tokens, "standalone key issued");
        Ok(Identified { id, record: key })
    }

    /// Set an agent key's status, or toggle it when `status` is `None`.
    pub async fn set_agent_key_status(
        &self,
        agent_id: &str,
        platform_id: &str,
        key: &str,
        status: Option<KeyStatus>,
    ) -> Result<ApiKey, LedgerError> {
        self.agents()
            .update(agent_id, self.policy, |agent| {
                let entry = agent
                    .find_key_mut(platform_id, key)
                    .ok_or_else(|| LedgerError::not_found("key", key))?;
                entry.status = status.unwrap_or(entry.status.toggled());
                Ok(entry.clone())
            })
            .await
            .map(|(_, key)| key)
            .map_err(|e| settle(e, "agent", agent_id))
    }

    /// Remove a key from an agent. The platform entry goes with its last key.
    pub async fn delete_agent_key(
        &self,
        agent_id: &str,
        platform_id: &str,
        key: &str,
    ) -> Result<ApiKey, LedgerError> {
        self.agents()
            .update(agent_id, self.policy, |agent| {
                agent
                    .remove_key(platform_id, key)
                    .ok_or_else(|| LedgerError::not_found("key", key))
            })
            .await
            .map(|(_, key)| key)
            .map_err(|e| settle(e, "agent", agent_id))
    }

    /// Set a standalone key's status, or toggle it when `status` is `None`.
    pub async fn set_standalone_key_status(
        &self,
        id: &str,
        status: Option<KeyStatus>,
    ) -> Result<StandaloneKey, LedgerError> {
        self.repos
            .standalone_keys
            .update(id, self.policy, |key| {
                key.key.status = status.unwrap_or(key.key.status.toggled());
                Ok::<_, LedgerError>(())
            })
            .await
            .map(|(key, ())| key)
            .map_err(|e| settle(e, "key", id))
    }

    pub async fn delete_standalone_key(&self, id: &str) -> Result<(), LedgerError> {
        if self.repos.standalone_keys.get(id).await?.is_none() {
            return Err(LedgerError::not_found("key", id));
        }
        self.repos.standalone_keys.delete(id).await?;
        Ok(())
    }

    /// Ban or unban an agent.
    pub async fn set_agent_status(
        &self,
        agent_id: &str,
        status: AgentStatus,
    ) -> Result<Agent, LedgerError> {
        self.update_agent(agent_id, |agent| {
            agent.status = status;
            Ok(())
        })
        .await
    }

    /// Set a future expiration, or clear it with `None`.
    pub async fn set_expiration(
        &self,
        agent_id: &str,
        expiration_at: Option<DateTime<Utc>>,
    ) -> Result<Agent, LedgerError> {
        if expiration_at.is_some_and(|at| at <= Utc::now()) {
            return Err(LedgerError::Validation(
                "expiration must be in the future".into(),
            ));
        }
        self.update_agent(agent_id, |agent| {
            agent.expiration_at = expiration_at;
            Ok(())
        })
        .await
    }

    /// Let an agent manage its own IP ban list.
    pub async fn set_ip_ban_enabled(&self, agent_id: &str, enabled: bool) -> Result<Agent, LedgerError> {
        self.update_agent(agent_id, |agent| {
            agent.ip_ban_enabled = enabled;
            Ok(())
        })
        .await
    }

    /// Replace an agent's password.
    pub async fn set_password(&self, agent_id: &str, password: &str) -> Result<Agent, LedgerError> {
        if password.is_empty() {
            return Err(LedgerError::Validation("password is required".into()));
        }
        self.update_agent(agent_id, |agent| {
            agent.password = Some(password.to_string());
            Ok(())
        })
        .await
    }

    async fn update_agent<F>(&self, agent_id: &str, mut apply: F) -> Result<Agent, LedgerError>
    where
        F: FnMut(&mut Agent) -> Result<(), LedgerError>,
    {
        self.agents()
            .update(agent_id, self.policy, |agent| apply(agent))
            .await
            .map(|(agent, ())| agent)
            .map_err(|e| settle(e, "agent", agent_id))
    }

    /// Delete an agent along with its IP ban list.
    pub async fn delete_agent(&self, agent_id: &str) -> Result<(), LedgerError> {
        self.agent(agent_id).await?;
        self.agents().delete(agent_id).await?;
        for ban in self.repos.ip_bans.list(agent_id).await? {
            self.repos.ip_bans.delete(agent_id, &ban.id).await?;
        }
        tracing::info!(agent_id, "agent deleted");
        Ok(())
    }

    /// Delete every agent whose expiration has passed. Returns the deleted ids.
    pub async fn sweep_expired_agents(&self, now: DateTime<Utc>) -> Result<Vec<String>, LedgerError> {
        let mut removed = Vec::new();
        for entry in self.agents().list().await? {
            if entry.record.is_expired(now) {
                self.delete_agent(&entry.id).await?;
                removed.push(entry.id);
            }
        }
        Ok(removed)
    }
}
