//! Platforms repository (`platforms/<id>`).

use serde_json::json;

use crate::error::StoreError;
use crate::models::{Identified, Platform};
use crate::store::{self, Db, DbPath};

const BRANCH: &str = "platforms";

/// Repository for platform definitions.
#[derive(Clone)]
pub struct PlatformsRepository {
    db: Db,
}

impl PlatformsRepository {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    fn path(id: &str) -> Result<DbPath, StoreError> {
        DbPath::new([BRANCH, id])
    }

    /// List all platforms, ordered by id.
    pub async fn list(&self) -> Result<Vec<Identified<Platform>>, StoreError> {
        store::read_collection(self.db.as_ref(), &DbPath::new([BRANCH])?).await
    }

    /// Ids that cannot be path segments are never stored.
    pub async fn get(&self, id: &str) -> Result<Option<Platform>, StoreError> {
        match Self::path(id) {
            Ok(path) => store::read(self.db.as_ref(), &path).await,
            Err(StoreError::InvalidPath(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn put(&self, id: &str, platform: &Platform) -> Result<(), StoreError> {
        store::write(self.db.as_ref(), &Self::path(id)?, platform).await
    }

    /// Delete the definition. Keys issued for the platform are left alone.
    pub async fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.db.delete(&Self::path(id)?).await
    }

    /// Open or close the public API for a platform.
    pub async fn set_api_enabled(&self, id: &str, enabled: bool) -> Result<(), StoreError> {
        self.db
            .patch(&Self::path(id)?, &json!({ "apiEnabled": enabled }))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_crud_and_api_toggle() {
        let repo = PlatformsRepository::new(Arc::new(MemoryStore::new()));
        let platform = Platform {
            title: "Netflix".into(),
            prefix: "NFX".into(),
            pattern: vec![4, 4],
            api_enabled: None,
        };
        repo.put("netflix", &platform).await.unwrap();
        assert!(repo.get("netflix").await.unwrap().unwrap().api_enabled());

        repo.set_api_enabled("netflix", false).await.unwrap();
        let stored = repo.get("netflix").await.unwrap().unwrap();
        assert!(!stored.api_enabled());
        assert_eq!(stored.title, "Netflix");

        assert_eq!(repo.list().await.unwrap().len(), 1);
        repo.delete("netflix").await.unwrap();
        assert!(repo.get("netflix").await.unwrap().is_none());
    }
}
