//! Records stored in the realtime-database tree.
//!
//! Field names follow the JSON written by the existing dashboard: camelCase,
//! except `tokens_remaining` which has always been snake_case on the wire.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize};

/// Owner id used for the admin's IP ban list and log attribution.
pub const ADMIN_OWNER: &str = "admin";

/// Whether a key may be used.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyStatus {
    #[default]
    Active,
    Inactive,
}

impl KeyStatus {
    pub fn toggled(self) -> Self {
        match self {
            Self::Active => Self::Inactive,
            Self::Inactive => Self::Active,
        }
    }
}

/// Account status of an agent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    #[default]
    Active,
    Banned,
}

/// An API key with its token allowance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKey {
    pub key: String,
    #[serde(rename = "tokens_remaining", default)]
    pub tokens_remaining: u64,
    #[serde(default)]
    pub status: KeyStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl ApiKey {
    /// A freshly issued, active key.
    pub fn issue(key: String, tokens: u64, now: DateTime<Utc>) -> Self {
        Self {
            key,
            tokens_remaining: tokens,
            status: KeyStatus::Active,
            created_at: Some(now),
        }
    }
}

/// A key created directly by the admin, not owned by any agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StandaloneKey {
    #[serde(flatten)]
    pub key: ApiKey,
    #[serde(default)]
    pub platform_id: String,
    #[serde(default)]
    pub platform_title: String,
}

/// A key held in a platform's flat key store (`<platform>_keys/<key>`).
///
/// The key string itself is the record's path segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformStoreKey {
    #[serde(rename = "tokens_remaining", default)]
    pub tokens_remaining: u64,
    #[serde(default)]
    pub status: KeyStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

/// One line of an agent's credit ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditHistoryEntry {
    pub date: DateTime<Utc>,
    pub action: String,
    /// Positive for additions, negative for deductions.
    pub amount: i64,
    pub balance_after: u64,
}

/// A reseller account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default)]
    pub credits: u64,
    #[serde(
        default,
        deserialize_with = "keys_by_platform",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub keys: BTreeMap<String, Vec<ApiKey>>,
    #[serde(
        default,
        deserialize_with = "sparse_list",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub credit_history: Vec<CreditHistoryEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub status: AgentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ip_ban_enabled: bool,
}

impl Agent {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiration_at.is_some_and(|at| at <= now)
    }

    pub fn is_child_of(&self, parent_id: &str) -> bool {
        self.parent_id.as_deref() == Some(parent_id)
    }

    /// Apply a signed credit change and append the matching history entry.
    ///
    /// The balance never goes below zero: a debit larger than the balance
    /// is rejected without touching the record.
    pub fn apply_credit(
        &mut self,
        amount: i64,
        action: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<u64, crate::LedgerError> {
        let balance = if amount >= 0 {
            self.credits
                .checked_add(amount.unsigned_abs())
                .ok_or_else(|| crate::LedgerError::Validation("credit balance overflow".into()))?
        } else {
            let debit = amount.unsigned_abs();
            self.credits
                .checked_sub(debit)
                .ok_or(crate::LedgerError::InsufficientCredits {
                    available: self.credits,
                    requested: debit,
                })?
        };
        self.credits = balance;
        self.credit_history.push(CreditHistoryEntry {
            date: now,
            action: action.into(),
            amount,
            balance_after: balance,
        });
        Ok(balance)
    }

    pub fn find_key_mut(&mut self, platform_id: &str, key: &str) -> Option<&mut ApiKey> {
        self.keys
            .get_mut(platform_id)
            .and_then(|keys| keys.iter_mut().find(|k| k.key == key))
    }

    pub fn find_key(&self, platform_id: &str, key: &str) -> Option<&ApiKey> {
        self.keys
            .get(platform_id)
            .and_then(|keys| keys.iter().find(|k| k.key == key))
    }

    /// Remove a key, dropping the platform entry when it becomes empty.
    pub fn remove_key(&mut self, platform_id: &str, key: &str) -> Option<ApiKey> {
        let keys = self.keys.get_mut(platform_id)?;
        let idx = keys.iter().position(|k| k.key == key)?;
        let removed = keys.remove(idx);
        if keys.is_empty() {
            self.keys.remove(platform_id);
        }
        Some(removed)
    }
}

/// An agent as exposed over the API: everything except the password.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentView {
    pub id: String,
    pub username: String,
    pub credits: u64,
    pub keys: BTreeMap<String, Vec<ApiKey>>,
    pub credit_history: Vec<CreditHistoryEntry>,
    pub created_at: Option<DateTime<Utc>>,
    pub status: AgentStatus,
    pub parent_id: Option<String>,
    pub expiration_at: Option<DateTime<Utc>>,
    pub ip_ban_enabled: bool,
}

impl AgentView {
    pub fn new(id: impl Into<String>, agent: Agent) -> Self {
        Self {
            id: id.into(),
            username: agent.username,
            credits: agent.credits,
            keys: agent.keys,
            credit_history: agent.credit_history,
            created_at: agent.created_at,
            status: agent.status,
            parent_id: agent.parent_id,
            expiration_at: agent.expiration_at,
            ip_ban_enabled: agent.ip_ban_enabled,
        }
    }
}

impl From<Identified<Agent>> for AgentView {
    fn from(entry: Identified<Agent>) -> Self {
        Self::new(entry.id, entry.record)
    }
}

/// An integration target: defines the key format and whether the public
/// API is open for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Platform {
    pub title: String,
    pub prefix: String,
    #[serde(default, deserialize_with = "sparse_list")]
    pub pattern: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_enabled: Option<bool>,
}

impl Platform {
    /// An absent flag means the API is open.
    pub fn api_enabled(&self) -> bool {
        self.api_enabled != Some(false)
    }
}

/// A bot directory entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bot {
    pub name: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub added_at: Option<DateTime<Utc>>,
}

/// Append-only usage record written by the public endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyLog {
    pub key: String,
    pub agent_id: String,
    pub ip: String,
    pub used_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<u64>,
}

/// A banned client IP in an owner's list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IpBan {
    pub ip: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

/// Global maintenance switch. While enabled, agents cannot log in and the
/// admin can only log in from an allowlisted IP (when the list is non-empty).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, deserialize_with = "sparse_list")]
    pub allowed_admin_ips: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_by: Option<String>,
}

impl MaintenanceConfig {
    pub fn admin_ip_allowed(&self, ip: &str) -> bool {
        self.allowed_admin_ips.is_empty() || self.allowed_admin_ips.iter().any(|a| a == ip)
    }
}

/// Admin password override. Absent means the bootstrap password applies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminCredentials {
    pub password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// A record together with the id it is stored under.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Identified<T> {
    pub id: String,
    #[serde(flatten)]
    pub record: T,
}

/// New record id in the dashboard's `<prefix>_<millis>` style, with a short
/// random suffix so two records created in the same millisecond differ.
pub fn new_record_id(prefix: &str) -> String {
    let suffix: u16 = rand::rng().random();
    format!(
        "{}_{}{:04x}",
        prefix,
        Utc::now().timestamp_millis(),
        suffix
    )
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Sparse<T> {
    List(Vec<Option<T>>),
    Map(BTreeMap<String, Option<T>>),
}

/// Accept a JSON array, or the index-keyed object the database returns for
/// arrays with holes. Nulls are skipped; map entries keep index order.
fn sparse_list<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    let sparse = Option::<Sparse<T>>::deserialize(deserializer)?;
    Ok(match sparse {
        None => Vec::new(),
        Some(Sparse::List(items)) => items.into_iter().flatten().collect(),
        Some(Sparse::Map(entries)) => {
            let mut indexed: Vec<(usize, T)> = entries
                .into_iter()
                .filter_map(|(k, v)| Some((k.parse::<usize>().unwrap_or(usize::MAX), v?)))
                .collect();
            indexed.sort_by_key(|(idx, _)| *idx);
            indexed.into_iter().map(|(_, v)| v).collect()
        }
    })
}

fn keys_by_platform<'de, D>(deserializer: D) -> Result<BTreeMap<String, Vec<ApiKey>>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    struct Keys(#[serde(deserialize_with = "sparse_list")] Vec<ApiKey>);

    let raw = Option::<BTreeMap<String, Keys>>::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .map(|(platform, Keys(keys))| (platform, keys))
        .filter(|(_, keys)| !keys.is_empty())
        .collect())
}
