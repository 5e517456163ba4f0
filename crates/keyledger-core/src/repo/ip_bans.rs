//! Per-owner IP ban lists (`ip_bans/<owner>/<pushId>`).

use chrono::Utc;

use crate::error::StoreError;
use crate::models::{Identified, IpBan};
use crate::store::{self, Db, DbPath};

const BRANCH: &str = "ip_bans";

/// Repository for IP ban lists. The owner is `admin` or an agent id.
#[derive(Clone)]
pub struct IpBansRepository {
    db: Db,
}

impl IpBansRepository {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    fn owner_path(owner: &str) -> Result<DbPath, StoreError> {
        DbPath::new([BRANCH, owner])
    }

    pub async fn list(&self, owner: &str) -> Result<Vec<Identified<IpBan>>, StoreError> {
        store::read_collection(self.db.as_ref(), &Self::owner_path(owner)?).await
    }

    /// Ban an IP and return the entry id.
    pub async fn add(&self, owner: &str, ip: &str) -> Result<String, StoreError> {
        let ban = IpBan {
            ip: ip.to_string(),
            created_at: Some(Utc::now()),
        };
        self.db
            .push(&Self::owner_path(owner)?, &serde_json::to_value(&ban)?)
            .await
    }

    /// Returns false when the entry did not exist.
    pub async fn delete(&self, owner: &str, id: &str) -> Result<bool, StoreError> {
        let path = Self::owner_path(owner)?.child(id)?;
        if self.db.get(&path).await?.is_none() {
            return Ok(false);
        }
        self.db.delete(&path).await?;
        Ok(true)
    }

    pub async fn contains(&self, owner: &str, ip: &str) -> Result<bool, StoreError> {
        Ok(self.list(owner).await?.iter().any(|b| b.record.ip == ip))
    }
}
