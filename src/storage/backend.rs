// Storage backend abstraction and in-process document store
// Author: kelexine (https://github.com/kelexine)

use crate::error::{ResilienceError, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

/// A storage operation with its arguments captured as data.
///
/// Writes taken by the fallback during an outage are queued in this form
/// and replayed against the primary later, so the queue can be inspected
/// or serialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum StorageCommand {
    Get {
        collection: String,
        id: String,
    },
    List {
        collection: String,
    },
    Insert {
        collection: String,
        id: String,
        document: Value,
    },
    Update {
        collection: String,
        id: String,
        document: Value,
    },
    Delete {
        collection: String,
        id: String,
    },
}

impl StorageCommand {
    pub fn name(&self) -> &'static str {
        match self {
            StorageCommand::Get { .. } => "get",
            StorageCommand::List { .. } => "list",
            StorageCommand::Insert { .. } => "insert",
            StorageCommand::Update { .. } => "update",
            StorageCommand::Delete { .. } => "delete",
        }
    }

    pub fn is_write(&self) -> bool {
        matches!(
            self,
            StorageCommand::Insert { .. }
                | StorageCommand::Update { .. }
                | StorageCommand::Delete { .. }
        )
    }

    pub fn collection(&self) -> &str {
        match self {
            StorageCommand::Get { collection, .. }
            | StorageCommand::List { collection }
            | StorageCommand::Insert { collection, .. }
            | StorageCommand::Update { collection, .. }
            | StorageCommand::Delete { collection, .. } => collection,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StorageReply {
    Found(Option<Value>),
    Listed(Vec<Value>),
    Stored,
    Removed(bool),
}

/// A document store the gateway can route to.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn apply(&self, command: &StorageCommand) -> Result<StorageReply>;

    /// Trivial round trip used by health probes.
    async fn ping(&self) -> Result<()>;
}

/// Collections of JSON documents keyed by id, held in process memory.
///
/// This is the gateway's fallback. `set_offline(true)` makes every call
/// fail so it can also stand in for an unreachable primary.
#[derive(Debug)]
pub struct InMemoryStorage {
    name: String,
    collections: RwLock<HashMap<String, BTreeMap<String, Value>>>,
    offline: AtomicBool,
}

impl InMemoryStorage {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            collections: RwLock::new(HashMap::new()),
            offline: AtomicBool::new(false),
        }
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of documents in `collection`.
    pub fn count(&self, collection: &str) -> usize {
        self.collections
            .read()
            .get(collection)
            .map(BTreeMap::len)
            .unwrap_or(0)
    }

    fn ensure_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            Err(ResilienceError::Storage {
                backend: self.name.clone(),
                message: "backend is offline".to_string(),
            })
        } else {
            Ok(())
        }
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new("memory")
    }
}

#[async_trait]
impl StorageBackend for InMemoryStorage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn apply(&self, command: &StorageCommand) -> Result<StorageReply> {
        self.ensure_online()?;

        let reply = match command {
            StorageCommand::Get { collection, id } => StorageReply::Found(
                self.collections
                    .read()
                    .get(collection)
                    .and_then(|docs| docs.get(id))
                    .cloned(),
            ),
            StorageCommand::List { collection } => StorageReply::Listed(
                self.collections
                    .read()
                    .get(collection)
                    .map(|docs| docs.values().cloned().collect())
                    .unwrap_or_default(),
            ),
            StorageCommand::Insert {
                collection,
                id,
                document,
            } => {
                self.collections
                    .write()
                    .entry(collection.clone())
                    .or_default()
                    .insert(id.clone(), document.clone());
                StorageReply::Stored
            }
            StorageCommand::Update {
                collection,
                id,
                document,
            } => {
                let mut collections = self.collections.write();
                let existing = collections
                    .get_mut(collection)
                    .and_then(|docs| docs.get_mut(id))
                    .ok_or_else(|| ResilienceError::Storage {
                        backend: self.name.clone(),
                        message: format!("{}/{} not found", collection, id),
                    })?;
                merge_document(existing, document);
                StorageReply::Stored
            }
            StorageCommand::Delete { collection, id } => StorageReply::Removed(
                self.collections
                    .write()
                    .get_mut(collection)
                    .and_then(|docs| docs.remove(id))
                    .is_some(),
            ),
        };
        Ok(reply)
    }

    async fn ping(&self) -> Result<()> {
        self.ensure_online()
    }
}

/// Shallow merge of object fields; any other shape replaces the document.
fn merge_document(existing: &mut Value, patch: &Value) {
    match (existing.as_object_mut(), patch.as_object()) {
        (Some(target), Some(fields)) => {
            for (key, value) in fields {
                target.insert(key.clone(), value.clone());
            }
        }
        _ => *existing = patch.clone(),
    }
}
