//! Bots repository (`bots/<id>`).

use crate::error::StoreError;
use crate::models::{Bot, Identified};
use crate::store::{self, Db, DbPath};

const BRANCH: &str = "bots";

#[derive(Clone)]
pub struct BotsRepository {
    db: Db,
}

impl BotsRepository {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub async fn list(&self) -> Result<Vec<Identified<Bot>>, StoreError> {
        store::read_collection(self.db.as_ref(), &DbPath::new([BRANCH])?).await
    }

    pub async fn put(&self, id: &str, bot: &Bot) -> Result<(), StoreError> {
        store::write(self.db.as_ref(), &DbPath::new([BRANCH, id])?, bot).await
    }

    /// Returns false when no bot had that id.
    pub async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let path = DbPath::new([BRANCH, id])?;
        if self.db.get(&path).await?.is_none() {
            return Ok(false);
        }
        self.db.delete(&path).await?;
        Ok(true)
    }
}
