//! Key usage log (`key_logs/<pushId>`).

use crate::error::StoreError;
use crate::models::{Identified, KeyLog};
use crate::store::{self, Db, DbPath};

const BRANCH: &str = "key_logs";

/// Append-only log of public API calls.
#[derive(Clone)]
pub struct KeyLogsRepository {
    db: Db,
}

impl KeyLogsRepository {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// All entries, newest first.
    pub async fn list(&self) -> Result<Vec<Identified<KeyLog>>, StoreError> {
        let mut logs: Vec<Identified<KeyLog>> =
            store::read_collection(self.db.as_ref(), &DbPath::new([BRANCH])?).await?;
        logs.sort_by(|a, b| b.record.used_at.cmp(&a.record.used_at));
        Ok(logs)
    }

    /// Entries attributed to one agent, newest first.
    pub async fn list_for_agent(
        &self,
        agent_id: &str,
    ) -> Result<Vec<Identified<KeyLog>>, StoreError> {
        let mut logs = self.list().await?;
        logs.retain(|l| l.record.agent_id == agent_id);
        Ok(logs)
    }

    /// Append an entry and return its generated id.
    pub async fn record(&self, log: &KeyLog) -> Result<String, StoreError> {
        let value = serde_json::to_value(log)?;
        self.db.push(&DbPath::new([BRANCH])?, &value).await
    }
}
