//! Flat per-platform key store (`<platformId>_keys/<key>`).
//!
//! Populated by external tooling; the public API consults it before agent
//! and standalone keys.

use crate::error::StoreError;
use crate::models::{Identified, PlatformStoreKey};
use crate::store::{self, CasError, CasPolicy, Db, DbPath};

/// Repository for a platform's flat key store.
#[derive(Clone)]
pub struct PlatformKeysRepository {
    db: Db,
}

impl PlatformKeysRepository {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    fn branch(platform_id: &str) -> String {
        format!("{}_keys", platform_id)
    }

    pub(crate) fn path(platform_id: &str, key: &str) -> Result<DbPath, StoreError> {
        DbPath::new([Self::branch(platform_id).as_str(), key])
    }

    pub async fn list(
        &self,
        platform_id: &str,
    ) -> Result<Vec<Identified<PlatformStoreKey>>, StoreError> {
        let path = DbPath::new([Self::branch(platform_id)])?;
        store::read_collection(self.db.as_ref(), &path).await
    }

    /// Look a key up. Key strings that cannot be path segments are never stored.
    pub async fn get(
        &self,
        platform_id: &str,
        key: &str,
    ) -> Result<Option<PlatformStoreKey>, StoreError> {
        match Self::path(platform_id, key) {
            Ok(path) => store::read(self.db.as_ref(), &path).await,
            Err(StoreError::InvalidPath(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Read-modify-write a key under its ETag.
    pub async fn update<R, E, F>(
        &self,
        platform_id: &str,
        key: &str,
        policy: CasPolicy,
        apply: F,
    ) -> Result<(PlatformStoreKey, R), CasError<E>>
    where
        F: FnMut(&mut PlatformStoreKey) -> Result<R, E>,
    {
        let path = Self::path(platform_id, key)?;
        store::update_record(self.db.as_ref(), &path, policy, apply).await
    }

    pub async fn put(
        &self,
        platform_id: &str,
        key: &str,
        record: &PlatformStoreKey,
    ) -> Result<(), StoreError> {
        store::write(self.db.as_ref(), &Self::path(platform_id, key)?, record).await
    }
}
