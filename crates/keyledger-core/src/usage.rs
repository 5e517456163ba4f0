//! Usage engine behind the public `credit` and `use` endpoints.
//!
//! A request is scoped to one platform. The key is looked up in the
//! platform's flat key store, then among agent-owned keys for that platform,
//! then among standalone keys for that platform. Gates run in a fixed order:
//! platform switch, admin IP bans, key lookup, the owning agent's IP bans,
//! then suspension.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::error::StoreError;
use crate::models::{Agent, AgentStatus, KeyLog, KeyStatus, ADMIN_OWNER};
use crate::repo::Repositories;
use crate::store::{CasError, CasPolicy, Db};

/// Why a public API call was refused.
#[derive(Debug, Error)]
pub enum UsageError {
    #[error("{0}")]
    MissingParams(&'static str),

    #[error("request body is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("tokens must be a positive integer")]
    InvalidTokens,

    #[error("the API is disabled for this platform")]
    PlatformDisabled,

    #[error("requests from this IP address are blocked")]
    IpBanned,

    #[error("the provided key does not exist")]
    KeyNotFound,

    #[error("the key is suspended")]
    KeySuspended,

    #[error("not enough tokens remaining: have {remaining}, need {requested}")]
    InsufficientTokens { remaining: u64, requested: u64 },

    #[error("the key is busy, try again")]
    Contention,

    #[error("store unavailable: {0}")]
    Store(#[from] StoreError),
}

impl UsageError {
    /// Stable error code returned to API consumers.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingParams(_) => "MISSING_PARAMS",
            Self::InvalidJson(_) => "INVALID_JSON",
            Self::InvalidTokens => "INVALID_TOKENS",
            Self::PlatformDisabled => "PLATFORM_DISABLED",
            Self::IpBanned => "IP_BANNED",
            Self::KeyNotFound => "KEY_NOT_FOUND",
            Self::KeySuspended => "KEY_SUSPENDED",
            Self::InsufficientTokens { .. } => "INSUFFICIENT_TOKENS",
            Self::Contention => "CONTENTION",
            Self::Store(_) => "STORE_UNAVAILABLE",
        }
    }
}

impl From<CasError<UsageError>> for UsageError {
    fn from(err: CasError<UsageError>) -> Self {
        match err {
            // The key vanished between lookup and write.
            CasError::Missing => Self::KeyNotFound,
            CasError::Rejected(e) => e,
            CasError::Exhausted { attempts } => {
                tracing::warn!(attempts, "key update retries exhausted");
                Self::Contention
            }
            CasError::Store(e) => Self::Store(e),
        }
    }
}

/// Who a key belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum KeyOwner {
    /// Held in the platform's flat key store.
    Platform,
    /// Owned by the agent with this id.
    Agent(String),
    /// A standalone key stored under this record id.
    Standalone(String),
}

impl KeyOwner {
    /// Value written to `agentId` in the usage log.
    pub fn log_id(&self) -> &str {
        match self {
            Self::Platform => "platform",
            Self::Agent(id) => id,
            Self::Standalone(_) => "standalone",
        }
    }
}

/// Result of a `credit` check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreditReport {
    pub tokens_remaining: u64,
    pub status: KeyStatus,
    pub owner: KeyOwner,
}

/// Result of a successful `use`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UseReport {
    pub tokens_remaining: u64,
    pub tokens_used: u64,
    pub owner: KeyOwner,
}

/// Body of a `use` request, validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UseRequest {
    pub key: String,
    pub tokens: u64,
}

#[derive(Deserialize)]
struct RawUseRequest {
    #[serde(default)]
    key: Option<String>,
    #[serde(default)]
    tokens: Option<Value>,
}

/// Parse a `use` body. `tokens` must be a JSON number; a number that is not
/// a positive integer is refused separately from a missing one.
pub fn parse_use_request(body: &[u8]) -> Result<UseRequest, UsageError> {
    let body: &[u8] = if body.iter().all(u8::is_ascii_whitespace) {
        b"{}"
    } else {
        body
    };
    let raw: RawUseRequest =
        serde_json::from_slice(body).map_err(|e| UsageError::InvalidJson(e.to_string()))?;

    let key = raw.key.filter(|k| !k.trim().is_empty());
    let (Some(key), Some(Value::Number(tokens))) = (key, raw.tokens) else {
        return Err(UsageError::MissingParams("key and tokens are required"));
    };
    let tokens = tokens
        .as_u64()
        .filter(|n| *n > 0)
        .ok_or(UsageError::InvalidTokens)?;
    Ok(UseRequest { key, tokens })
}

enum Located {
    Platform { tokens_remaining: u64, status: KeyStatus },
    Agent { id: String, agent: Agent },
    Standalone { id: String, tokens_remaining: u64, status: KeyStatus },
}

/// Outcome of the gates: where the key lives and its current state.
struct Admitted {
    owner: KeyOwner,
    tokens_remaining: u64,
    status: KeyStatus,
}

/// Validates and debits keys on behalf of the public API.
#[derive(Clone)]
pub struct UsageEngine {
    repos: Repositories,
    policy: CasPolicy,
}

impl UsageEngine {
    pub fn new(db: Db, policy: CasPolicy) -> Self {
        Self {
            repos: Repositories::new(db),
            policy,
        }
    }

    async fn locate(&self, platform_id: &str, key: &str) -> Result<Option<Located>, UsageError> {
        if let Some(record) = self.repos.platform_keys.get(platform_id, key).await? {
            return Ok(Some(Located::Platform {
                tokens_remaining: record.tokens_remaining,
                status: record.status,
            }));
        }

        for entry in self.repos.agents.list().await? {
            if entry.record.find_key(platform_id, key).is_some() {
                return Ok(Some(Located::Agent {
                    id: entry.id,
                    agent: entry.record,
                }));
            }
        }

        let standalone = self
            .repos
            .standalone_keys
            .list_for_platform(platform_id)
            .await?
            .into_iter()
            .find(|k| k.record.key.key == key);
        Ok(standalone.map(|k| Located::Standalone {
            id: k.id,
            tokens_remaining: k.record.key.tokens_remaining,
            status: k.record.key.status,
        }))
    }

    async fn admit(&self, platform_id: &str, key: &str, ip: &str) -> Result<Admitted, UsageError> {
        if let Some(platform) = self.repos.platforms.get(platform_id).await? {
            if !platform.api_enabled() {
                return Err(UsageError::PlatformDisabled);
            }
        }
        if self.repos.ip_bans.contains(ADMIN_OWNER, ip).await? {
            return Err(UsageError::IpBanned);
        }

        let located = self
            .locate(platform_id, key)
            .await?
            .ok_or(UsageError::KeyNotFound)?;

        let admitted = match located {
            Located::Platform {
                tokens_remaining,
                status,
            } => Admitted {
                owner: KeyOwner::Platform,
                tokens_remaining,
                status,
            },
            Located::Agent { id, agent } => {
                if agent.ip_ban_enabled && self.repos.ip_bans.contains(&id, ip).await? {
                    return Err(UsageError::IpBanned);
                }
                if agent.status == AgentStatus::Banned {
                    return Err(UsageError::KeySuspended);
                }
                let found = agent
                    .find_key(platform_id, key)
                    .ok_or(UsageError::KeyNotFound)?;
                Admitted {
                    tokens_remaining: found.tokens_remaining,
                    status: found.status,
                    owner: KeyOwner::Agent(id),
                }
            }
            Located::Standalone {
                id,
                tokens_remaining,
                status,
            } => Admitted {
                owner: KeyOwner::Standalone(id),
                tokens_remaining,
                status,
            },
        };

        if admitted.status == KeyStatus::Inactive {
            return Err(UsageError::KeySuspended);
        }
        Ok(admitted)
    }

    async fn log(&self, key: &str, owner: &KeyOwner, ip: &str, tokens_used: Option<u64>) {
        let entry = KeyLog {
            key: key.to_string(),
            agent_id: owner.log_id().to_string(),
            ip: ip.to_string(),
            used_at: Utc::now(),
            tokens_used,
        };
        if let Err(e) = self.repos.key_logs.record(&entry).await {
            tracing::warn!(key, error = %e, "failed to append key log");
        }
    }

    /// Report a key's remaining tokens and status.
    pub async fn check_credit(
        &self,
        platform_id: &str,
        key: &str,
        ip: &str,
    ) -> Result<CreditReport, UsageError> {
        if key.trim().is_empty() {
            return Err(UsageError::MissingParams("platform and key are required"));
        }
        let admitted = self.admit(platform_id, key, ip).await?;
        self.log(key, &admitted.owner, ip, None).await;
        Ok(CreditReport {
            tokens_remaining: admitted.tokens_remaining,
            status: admitted.status,
            owner: admitted.owner,
        })
    }

    /// Debit `tokens` from a key.
    ///
    /// The decrement is a compare-and-swap on the record holding the key, so
    /// concurrent calls can never take the balance below zero.
    pub async fn use_tokens(
        &self,
        platform_id: &str,
        key: &str,
        tokens: u64,
        ip: &str,
    ) -> Result<UseReport, UsageError> {
        if tokens == 0 {
            return Err(UsageError::InvalidTokens);
        }
        let admitted = self.admit(platform_id, key, ip).await?;

        let debit = |remaining: &mut u64, status: KeyStatus| -> Result<u64, UsageError> {
            if status == KeyStatus::Inactive {
                return Err(UsageError::KeySuspended);
            }
            *remaining = remaining
                .checked_sub(tokens)
                .ok_or(UsageError::InsufficientTokens {
                    remaining: *remaining,
                    requested: tokens,
                })?;
            Ok(*remaining)
        };

        let tokens_remaining = match &admitted.owner {
            KeyOwner::Platform => {
                self.repos
                    .platform_keys
                    .update(platform_id, key, self.policy, |record| {
                        debit(&mut record.tokens_remaining, record.status)
                    })
                    .await?
                    .1
            }
            KeyOwner::Agent(agent_id) => {
                self.repos
                    .agents
                    .update(agent_id, self.policy, |agent| {
                        if agent.status == AgentStatus::Banned {
                            return Err(UsageError::KeySuspended);
                        }
                        let found = agent
                            .find_key_mut(platform_id, key)
                            .ok_or(UsageError::KeyNotFound)?;
                        debit(&mut found.tokens_remaining, found.status)
                    })
                    .await?
                    .1
            }
            KeyOwner::Standalone(id) => {
                self.repos
                    .standalone_keys
                    .update(id, self.policy, |record| {
                        if record.key.key != key || record.platform_id != platform_id {
                            return Err(UsageError::KeyNotFound);
                        }
                        debit(&mut record.key.tokens_remaining, record.key.status)
                    })
                    .await?
                    .1
            }
        };

        self.log(key, &admitted.owner, ip, Some(tokens)).await;
        Ok(UseReport {
            tokens_remaining,
            tokens_used: tokens,
            owner: admitted.owner,
        })
    }
}
