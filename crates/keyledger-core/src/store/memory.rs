//! In-memory realtime-database tree for development and tests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use super::{DbPath, Etag, RealtimeDb};
use crate::error::StoreError;

/// A JSON tree behind a lock, with the same semantics as the hosted
/// database: writing `null` or an empty container deletes the location, and
/// parents left empty disappear with it.
#[derive(Debug)]
pub struct MemoryStore {
    root: RwLock<Value>,
    push_seq: AtomicU64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            root: RwLock::new(Value::Object(Map::new())),
            push_seq: AtomicU64::new(0),
        }
    }

    /// A new empty store behind a shared handle.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// A store seeded with a whole tree.
    pub fn with_tree(tree: Value) -> Self {
        let store = Self::new();
        *store.root.write() = tree;
        store
    }

    /// A copy of the whole tree.
    pub fn snapshot(&self) -> Value {
        self.root.read().clone()
    }

    fn next_push_id(&self) -> String {
        let seq = self.push_seq.fetch_add(1, Ordering::Relaxed);
        format!("-{:012x}{:08x}", Utc::now().timestamp_millis(), seq)
    }
}

fn etag_of(node: Option<&Value>) -> Etag {
    let encoded = node.map_or_else(|| "null".to_string(), Value::to_string);
    Etag(hex::encode(Sha256::digest(encoded.as_bytes())))
}

fn is_empty_node(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.iter().all(Value::is_null),
        _ => false,
    }
}

fn read_at<'a>(node: &'a Value, segments: &[String]) -> Option<&'a Value> {
    segments
        .iter()
        .try_fold(node, |current, segment| match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
        .filter(|v| !v.is_null())
}

fn array_to_object(items: Vec<Value>) -> Value {
    Value::Object(
        items
            .into_iter()
            .enumerate()
            .filter(|(_, v)| !v.is_null())
            .map(|(i, v)| (i.to_string(), v))
            .collect(),
    )
}

fn write_at(node: &mut Value, segments: &[String], value: Value) {
    let Some((head, rest)) = segments.split_first() else {
        *node = if is_empty_node(&value) { Value::Null } else { value };
        return;
    };

    if !node.is_object() && !node.is_array() {
        if value.is_null() {
            return;
        }
        *node = Value::Object(Map::new());
    }

    if let Value::Array(items) = node {
        match head.parse::<usize>() {
            Ok(i) if i < items.len() => {
                write_at(&mut items[i], rest, value);
                while items.last().is_some_and(Value::is_null) {
                    items.pop();
                }
            }
            Ok(i) if i == items.len() => {
                let mut child = Value::Null;
                write_at(&mut child, rest, value);
                if !child.is_null() {
                    items.push(child);
                }
            }
            _ => {
                let converted = array_to_object(std::mem::take(items));
                *node = converted;
                write_at(node, segments, value);
                return;
            }
        }
    } else if let Value::Object(map) = node {
        let child = map.entry(head.clone()).or_insert(Value::Null);
        write_at(child, rest, value);
        if is_empty_node(child) {
            map.remove(head);
        }
    }

    if is_empty_node(node) {
        *node = Value::Null;
    }
}

#[async_trait]
impl RealtimeDb for MemoryStore {
    async fn get(&self, path: &DbPath) -> Result<Option<Value>, StoreError> {
        Ok(read_at(&self.root.read(), path.segments()).cloned())
    }

    async fn get_with_etag(&self, path: &DbPath) -> Result<(Option<Value>, Etag), StoreError> {
        let root = self.root.read();
        let node = read_at(&root, path.segments());
        Ok((node.cloned(), etag_of(node)))
    }

    async fn put(&self, path: &DbPath, value: &Value) -> Result<(), StoreError> {
        write_at(&mut self.root.write(), path.segments(), value.clone());
        Ok(())
    }

    async fn put_if_match(
        &self,
        path: &DbPath,
        value: &Value,
        etag: &Etag,
    ) -> Result<(), StoreError> {
        let mut root = self.root.write();
        if etag_of(read_at(&root, path.segments())) != *etag {
            return Err(StoreError::PreconditionFailed(path.to_string()));
        }
        write_at(&mut root, path.segments(), value.clone());
        Ok(())
    }

    async fn patch(&self, path: &DbPath, fields: &Value) -> Result<(), StoreError> {
        let Value::Object(fields) = fields else {
            return Err(StoreError::Status {
                status: 400,
                body: "patch body must be an object".into(),
            });
        };
        let mut root = self.root.write();
        for (relative, value) in fields {
            let mut target = path.clone();
            for segment in relative.split('/') {
                target = target.child(segment)?;
            }
            write_at(&mut root, target.segments(), value.clone());
        }
        Ok(())
    }

    async fn push(&self, path: &DbPath, value: &Value) -> Result<String, StoreError> {
        let id = self.next_push_id();
        let target = path.child(&id)?;
        write_at(&mut self.root.write(), target.segments(), value.clone());
        Ok(id)
    }

    async fn delete(&self, path: &DbPath) -> Result<(), StoreError> {
        write_at(&mut self.root.write(), path.segments(), Value::Null);
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
