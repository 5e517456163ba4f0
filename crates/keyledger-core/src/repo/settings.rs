//! Singleton settings: maintenance switch and admin credentials.

use crate::error::StoreError;
use crate::models::{AdminCredentials, MaintenanceConfig};
use crate::store::{self, Db, DbPath};

/// The `maintenance` node.
#[derive(Clone)]
pub struct MaintenanceRepository {
    db: Db,
}

impl MaintenanceRepository {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Current configuration; disabled when nothing is stored.
    pub async fn get(&self) -> Result<MaintenanceConfig, StoreError> {
        Ok(store::read(self.db.as_ref(), &DbPath::new(["maintenance"])?)
            .await?
            .unwrap_or_default())
    }

    pub async fn put(&self, config: &MaintenanceConfig) -> Result<(), StoreError> {
        store::write(self.db.as_ref(), &DbPath::new(["maintenance"])?, config).await
    }
}

/// The `admin/credentials` node.
#[derive(Clone)]
pub struct AdminRepository {
    db: Db,
}

impl AdminRepository {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    fn path() -> Result<DbPath, StoreError> {
        DbPath::new(["admin", "credentials"])
    }

    pub async fn credentials(&self) -> Result<Option<AdminCredentials>, StoreError> {
        store::read(self.db.as_ref(), &Self::path()?).await
    }

    pub async fn set_credentials(&self, credentials: &AdminCredentials) -> Result<(), StoreError> {
        store::write(self.db.as_ref(), &Self::path()?, credentials).await
    }
}
