//! Login, password changes and maintenance-mode checks.

use chrono::Utc;
use thiserror::Error;

use crate::error::{LedgerError, StoreError};
use crate::ledger::Ledger;
use crate::models::{AdminCredentials, Agent, AgentStatus, MaintenanceConfig};
use crate::repo::Repositories;
use crate::store::{CasPolicy, Db};

/// Username reserved for the administrator.
pub const ADMIN_USERNAME: &str = "admin";

/// A successful login.
#[derive(Debug, Clone)]
pub enum LoginOutcome {
    Admin,
    Agent { id: String, agent: Agent },
}

/// Why a login was refused.
#[derive(Debug, Error)]
pub enum LoginRefusal {
    #[error("invalid username or password")]
    Invalid,

    #[error("this account is banned")]
    Banned,

    #[error("this account has expired")]
    Expired,

    #[error("{0}")]
    Maintenance(String),

    #[error("admin login is not allowed from this IP address during maintenance")]
    AdminIpNotAllowed,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Whose password is being changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Principal<'a> {
    Admin,
    Agent(&'a str),
}

/// Default message shown to agents while maintenance is on.
pub const DEFAULT_MAINTENANCE_MESSAGE: &str = "The system is under maintenance. Please try again later.";

/// Split a free-form IP list on newlines, commas and semicolons.
pub fn parse_ip_list(input: &str) -> Vec<String> {
    input
        .split(['\n', ',', ';'])
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .map(str::to_string)
        .collect()
}

/// Authenticates the admin and agents.
#[derive(Clone)]
pub struct AccessControl {
    repos: Repositories,
    ledger: Ledger,
    bootstrap_password: String,
}

impl AccessControl {
    /// `bootstrap_password` applies until the admin sets their own.
    pub fn new(db: Db, policy: CasPolicy, bootstrap_password: impl Into<String>) -> Self {
        Self {
            repos: Repositories::new(db.clone()),
            ledger: Ledger::new(db, policy),
            bootstrap_password: bootstrap_password.into(),
        }
    }

    async fn admin_password(&self) -> Result<String, StoreError> {
        Ok(self
            .repos
            .admin
            .credentials()
            .await?
            .map(|c| c.password)
            .unwrap_or_else(|| self.bootstrap_password.clone()))
    }

    pub async fn maintenance(&self) -> Result<MaintenanceConfig, StoreError> {
        self.repos.maintenance.get().await
    }

    /// Check credentials and the account and maintenance state.
    ///
    /// An agent found expired at login is deleted.
    pub async fn authenticate(
        &self,
        username: &str,
        password: &str,
        ip: &str,
    ) -> Result<LoginOutcome, LoginRefusal> {
        if username == ADMIN_USERNAME && password == self.admin_password().await? {
            let maintenance = self.maintenance().await?;
            if maintenance.enabled && !maintenance.admin_ip_allowed(ip) {
                tracing::warn!(ip, "admin login refused by maintenance allowlist");
                return Err(LoginRefusal::AdminIpNotAllowed);
            }
            return Ok(LoginOutcome::Admin);
        }

        let Some(entry) = self.repos.agents.find_by_username(username).await? else {
            return Err(LoginRefusal::Invalid);
        };
        if entry.record.password.as_deref() != Some(password) {
            return Err(LoginRefusal::Invalid);
        }
        if entry.record.status == AgentStatus::Banned {
            return Err(LoginRefusal::Banned);
        }
        if entry.record.is_expired(Utc::now()) {
            match self.ledger.delete_agent(&entry.id).await {
                Ok(()) => tracing::info!(agent_id = %entry.id, "expired agent removed at login"),
                Err(e) => tracing::warn!(agent_id = %entry.id, error = %e, "failed to remove expired agent"),
            }
            return Err(LoginRefusal::Expired);
        }

        let maintenance = self.maintenance().await?;
        if maintenance.enabled {
            let message = maintenance
                .message
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_MAINTENANCE_MESSAGE.to_string());
            return Err(LoginRefusal::Maintenance(message));
        }

        Ok(LoginOutcome::Agent {
            id: entry.id,
            agent: entry.record,
        })
    }

    /// Change a password after checking the current one.
    pub async fn change_password(
        &self,
        who: Principal<'_>,
        current: &str,
        new: &str,
        confirm: &str,
    ) -> Result<(), LedgerError> {
        if new.is_empty() {
            return Err(LedgerError::Validation("new password is required".into()));
        }
        if new != confirm {
            return Err(LedgerError::Validation("new passwords do not match".into()));
        }
        let incorrect = || LedgerError::Forbidden("current password is incorrect".into());

        match who {
            Principal::Admin => {
                if current != self.admin_password().await? {
                    return Err(incorrect());
                }
                self.repos
                    .admin
                    .set_credentials(&AdminCredentials {
                        password: new.to_string(),
                        updated_at: Some(Utc::now()),
                    })
                    .await?;
            }
            Principal::Agent(id) => {
                let agent = self
                    .repos
                    .agents
                    .get(id)
                    .await?
                    .ok_or_else(|| LedgerError::not_found("agent", id))?;
                if agent.password.as_deref() != Some(current) {
                    return Err(incorrect());
                }
                self.ledger.set_password(id, new).await?;
            }
        }
        Ok(())
    }
}
