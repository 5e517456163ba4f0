//! Agents repository (`agents/<id>`).

use crate::error::StoreError;
use crate::models::{Agent, Identified};
use crate::store::{self, CasError, CasPolicy, Db, DbPath};

const BRANCH: &str = "agents";

/// Repository for agent records.
#[derive(Clone)]
pub struct AgentsRepository {
    db: Db,
}

impl AgentsRepository {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub(crate) fn path(id: &str) -> Result<DbPath, StoreError> {
        DbPath::new([BRANCH, id])
    }

    /// List all agents, ordered by id.
    pub async fn list(&self) -> Result<Vec<Identified<Agent>>, StoreError> {
        store::read_collection(self.db.as_ref(), &DbPath::new([BRANCH])?).await
    }

    pub async fn get(&self, id: &str) -> Result<Option<Agent>, StoreError> {
        store::read(self.db.as_ref(), &Self::path(id)?).await
    }

    /// Create or overwrite an agent.
    pub async fn put(&self, id: &str, agent: &Agent) -> Result<(), StoreError> {
        store::write(self.db.as_ref(), &Self::path(id)?, agent).await
    }

    pub async fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.db.delete(&Self::path(id)?).await
    }

    /// Read-modify-write an agent under its ETag.
    pub async fn update<R, E, F>(
        &self,
        id: &str,
        policy: CasPolicy,
        apply: F,
    ) -> Result<(Agent, R), CasError<E>>
    where
        F: FnMut(&mut Agent) -> Result<R, E>,
    {
        let path = Self::path(id)?;
        store::update_record(self.db.as_ref(), &path, policy, apply).await
    }

    /// Find an agent by exact username.
    pub async fn find_by_username(
        &self,
        username: &str,
    ) -> Result<Option<Identified<Agent>>, StoreError> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .find(|a| a.record.username == username))
    }

    /// Whether a username is in use, ignoring case.
    pub async fn username_taken(&self, username: &str) -> Result<bool, StoreError> {
        Ok(self
            .list()
            .await?
            .iter()
            .any(|a| a.record.username.eq_ignore_ascii_case(username)))
    }

    /// Direct sub-agents of `parent_id`.
    pub async fn children_of(&self, parent_id: &str) -> Result<Vec<Identified<Agent>>, StoreError> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|a| a.record.is_child_of(parent_id))
            .collect())
    }
}
