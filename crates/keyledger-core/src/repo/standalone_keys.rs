//! Standalone keys repository (`standalone_keys/<id>`).

use crate::error::StoreError;
use crate::models::{Identified, StandaloneKey};
use crate::store::{self, CasError, CasPolicy, Db, DbPath};

const BRANCH: &str = "standalone_keys";

/// Repository for keys issued directly by the admin.
#[derive(Clone)]
pub struct StandaloneKeysRepository {
    db: Db,
}

impl StandaloneKeysRepository {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub(crate) fn path(id: &str) -> Result<DbPath, StoreError> {
        DbPath::new([BRANCH, id])
    }

    pub async fn list(&self) -> Result<Vec<Identified<StandaloneKey>>, StoreError> {
        store::read_collection(self.db.as_ref(), &DbPath::new([BRANCH])?).await
    }

    /// Keys belonging to one platform.
    pub async fn list_for_platform(
        &self,
        platform_id: &str,
    ) -> Result<Vec<Identified<StandaloneKey>>, StoreError> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|k| k.record.platform_id == platform_id)
            .collect())
    }

    pub async fn get(&self, id: &str) -> Result<Option<StandaloneKey>, StoreError> {
        store::read(self.db.as_ref(), &Self::path(id)?).await
    }

    pub async fn put(&self, id: &str, key: &StandaloneKey) -> Result<(), StoreError> {
        store::write(self.db.as_ref(), &Self::path(id)?, key).await
    }

    pub async fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.db.delete(&Self::path(id)?).await
    }

    /// Read-modify-write a key under its ETag.
    pub async fn update<R, E, F>(
        &self,
        id: &str,
        policy: CasPolicy,
        apply: F,
    ) -> Result<(StandaloneKey, R), CasError<E>>
    where
        F: FnMut(&mut StandaloneKey) -> Result<R, E>,
    {
        let path = Self::path(id)?;
        store::update_record(self.db.as_ref(), &path, policy, apply).await
    }
}
