//! Realtime-database store abstraction.
//!
//! The whole system lives in one JSON tree. Backends expose the REST verbs
//! of a Firebase Realtime Database (`GET/PUT/PATCH/POST/DELETE`) plus
//! ETag-guarded conditional writes, which the ledger uses for every balance
//! mutation.

mod firebase;
mod memory;
#[cfg(test)]
pub(crate) mod testing;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::StoreError;
use crate::models::Identified;

pub use firebase::FirebaseStore;
pub use memory::MemoryStore;

/// Shared handle to a store backend.
pub type Db = Arc<dyn RealtimeDb>;

/// Opaque version tag of a location, as returned by a conditional read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Etag(pub String);

/// A validated location in the tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DbPath {
    segments: Vec<String>,
}

impl DbPath {
    /// Build a path from segments. At least one segment is required and
    /// none may contain `.`, `$`, `#`, `[`, `]`, `/` or control characters.
    pub fn new<I, S>(segments: I) -> Result<Self, StoreError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let segments = segments
            .into_iter()
            .map(|s| validate_segment(s.as_ref()).map(str::to_string))
            .collect::<Result<Vec<_>, _>>()?;
        if segments.is_empty() {
            return Err(StoreError::InvalidPath(String::new()));
        }
        Ok(Self { segments })
    }

    /// Extend the path by one segment.
    pub fn child(&self, segment: impl AsRef<str>) -> Result<Self, StoreError> {
        let segment = validate_segment(segment.as_ref())?;
        let mut segments = self.segments.clone();
        segments.push(segment.to_string());
        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }
}

impl fmt::Display for DbPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("/"))
    }
}

fn validate_segment(segment: &str) -> Result<&str, StoreError> {
    let forbidden = |c: char| matches!(c, '.' | '$' | '#' | '[' | ']' | '/') || c.is_control();
    if segment.is_empty() || segment.contains(forbidden) {
        Err(StoreError::InvalidPath(segment.to_string()))
    } else {
        Ok(segment)
    }
}

/// Operations of a realtime-database backend.
///
/// `None` stands for an absent location (the database answers `null`).
#[async_trait]
pub trait RealtimeDb: Send + Sync {
    /// Read a location.
    async fn get(&self, path: &DbPath) -> Result<Option<Value>, StoreError>;

    /// Read a location together with its ETag.
    async fn get_with_etag(&self, path: &DbPath) -> Result<(Option<Value>, Etag), StoreError>;

    /// Overwrite a location. Writing `null` deletes it.
    async fn put(&self, path: &DbPath, value: &Value) -> Result<(), StoreError>;

    /// Overwrite a location only if its ETag still matches.
    ///
    /// Fails with [`StoreError::PreconditionFailed`] when another writer got there first.
    async fn put_if_match(&self, path: &DbPath, value: &Value, etag: &Etag)
        -> Result<(), StoreError>;

    /// Merge the children of `fields` into a location.
    async fn patch(&self, path: &DbPath, fields: &Value) -> Result<(), StoreError>;

    /// Append a child under a generated, time-ordered id and return that id.
    async fn push(&self, path: &DbPath, value: &Value) -> Result<String, StoreError>;

    /// Delete a location.
    async fn delete(&self, path: &DbPath) -> Result<(), StoreError>;

    /// Check that the backend is reachable.
    async fn ping(&self) -> Result<(), StoreError>;
}

/// Read and decode a record.
pub async fn read<T: DeserializeOwned>(
    db: &dyn RealtimeDb,
    path: &DbPath,
) -> Result<Option<T>, StoreError> {
    db.get(path)
        .await?
        .map(serde_json::from_value)
        .transpose()
        .map_err(StoreError::from)
}

/// Encode and write a record.
pub async fn write<T: Serialize>(
    db: &dyn RealtimeDb,
    path: &DbPath,
    record: &T,
) -> Result<(), StoreError> {
    let value = serde_json::to_value(record)?;
    db.put(path, &value).await
}

/// Read an object-map (or index-keyed array) and flatten it into
/// `(id, record)` pairs. Null children are skipped.
///
/// Children that fail to decode are skipped with a warning so one malformed
/// record cannot take a whole listing down.
pub async fn read_collection<T: DeserializeOwned>(
    db: &dyn RealtimeDb,
    path: &DbPath,
) -> Result<Vec<Identified<T>>, StoreError> {
    let entries: Vec<(String, Value)> = match db.get(path).await? {
        None => return Ok(Vec::new()),
        Some(Value::Object(map)) => map.into_iter().collect(),
        Some(Value::Array(items)) => items
            .into_iter()
            .enumerate()
            .map(|(idx, v)| (idx.to_string(), v))
            .collect(),
        Some(other) => {
            tracing::warn!(path = %path, kind = ?other, "expected a collection");
            return Ok(Vec::new());
        }
    };

    Ok(entries
        .into_iter()
        .filter(|(_, v)| !v.is_null())
        .filter_map(|(id, v)| match serde_json::from_value(v) {
            Ok(record) => Some(Identified { id, record }),
            Err(e) => {
                tracing::warn!(path = %path, id = %id, error = %e, "skipping malformed record");
                None
            }
        })
        .collect())
}

/// Retry policy for conditional writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CasPolicy {
    /// How many times a lost conditional write is retried.
    pub retries: u32,
}

impl Default for CasPolicy {
    fn default() -> Self {
        Self { retries: 5 }
    }
}

/// Why a compare-and-swap update did not happen.
#[derive(Debug)]
pub enum CasError<E> {
    /// Nothing stored at the location.
    Missing,
    /// The update closure refused the change.
    Rejected(E),
    /// Every attempt lost against a concurrent writer.
    Exhausted { attempts: u32 },
    Store(StoreError),
}

impl<E> From<StoreError> for CasError<E> {
    fn from(err: StoreError) -> Self {
        Self::Store(err)
    }
}

/// Read-modify-write a record under its ETag.
///
/// `apply` may run several times and must only depend on the record it is
/// handed. Returns the record as written plus whatever `apply` returned.
pub async fn update_record<T, R, E, F>(
    db: &dyn RealtimeDb,
    path: &DbPath,
    policy: CasPolicy,
    mut apply: F,
) -> Result<(T, R), CasError<E>>
where
    T: DeserializeOwned + Serialize,
    F: FnMut(&mut T) -> Result<R, E>,
{
    let attempts = policy.retries + 1;
    for attempt in 1..=attempts {
        let (value, etag) = db.get_with_etag(path).await?;
        let Some(value) = value else {
            return Err(CasError::Missing);
        };
        let mut record: T = serde_json::from_value(value).map_err(StoreError::from)?;
        let out = apply(&mut record).map_err(CasError::Rejected)?;
        let next = serde_json::to_value(&record).map_err(StoreError::from)?;

        match db.put_if_match(path, &next, &etag).await {
            Ok(()) => return Ok((record, out)),
            Err(StoreError::PreconditionFailed(_)) => {
                tracing::debug!(path = %path, attempt, "conditional write lost, retrying");
            }
            Err(e) => return Err(CasError::Store(e)),
        }
    }
    Err(CasError::Exhausted { attempts })
}
