//! Store wrapper that fails conditional writes under chosen locations.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::{DbPath, Etag, MemoryStore, RealtimeDb};
use crate::error::StoreError;

/// How a matching conditional write fails.
#[derive(Debug, Clone, Copy)]
pub enum WriteFault {
    /// The write always loses the race.
    Conflict,
    /// The database answers 503.
    Unavailable,
}

/// Delegates to a [`MemoryStore`] but fails every `put_if_match` whose
/// path starts with `prefix`.
pub struct FaultyStore {
    inner: Arc<MemoryStore>,
    prefix: String,
    fault: WriteFault,
}

impl FaultyStore {
    pub fn new(inner: Arc<MemoryStore>, prefix: impl Into<String>, fault: WriteFault) -> Self {
        Self {
            inner,
            prefix: prefix.into(),
            fault,
        }
    }
}

#[async_trait]
impl RealtimeDb for FaultyStore {
    async fn get(&self, path: &DbPath) -> Result<Option<Value>, StoreError> {
        self.inner.get(path).await
    }

    async fn get_with_etag(&self, path: &DbPath) -> Result<(Option<Value>, Etag), StoreError> {
        self.inner.get_with_etag(path).await
    }

    async fn put(&self, path: &DbPath, value: &Value) -> Result<(), StoreError> {
        self.inner.put(path, value).await
    }

    async fn put_if_match(
        &self,
        path: &DbPath,
        value: &Value,
        etag: &Etag,
    ) -> Result<(), StoreError> {
        if path.to_string().starts_with(&self.prefix) {
            return Err(match self.fault {
                WriteFault::Conflict => StoreError::PreconditionFailed(path.to_string()),
                WriteFault::Unavailable => StoreError::Status {
                    status: 503,
                    body: "unavailable".into(),
                },
            });
        }
        self.inner.put_if_match(path, value, etag).await
    }

    async fn patch(&self, path: &DbPath, fields: &Value) -> Result<(), StoreError> {
        self.inner.patch(path, fields).await
    }

    async fn push(&self, path: &DbPath, value: &Value) -> Result<String, StoreError> {
        self.inner.push(path, value).await
    }

    async fn delete(&self, path: &DbPath) -> Result<(), StoreError> {
        self.inner.delete(path).await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.inner.ping().await
    }
}
