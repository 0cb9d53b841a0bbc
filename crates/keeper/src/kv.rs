//! Hierarchical key-value store for service configuration.
//!
//! Keys are `/`-separated paths. A JSON object can be flattened into one
//! leaf per path on write, and any subtree can be read back as a nested
//! object. Every write publishes a [`KvChange`] to subscribers.

use common::{Error, Result};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tokio::sync::{RwLock, broadcast};
use tracing::debug;

/// Default capacity of the change notification channel
pub const DEFAULT_CHANGE_CAPACITY: usize = 256;

/// One stored key and its value
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeyValue {
    pub key: String,
    pub value: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Put,
    Delete,
}

/// Notification of a write to the store
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KvChange {
    pub kind: ChangeKind,
    pub keys: Vec<String>,
}

pub struct KvStore {
    entries: RwLock<BTreeMap<String, Value>>,
    changes: broadcast::Sender<KvChange>,
}

impl Default for KvStore {
    fn default() -> Self {
        Self::new(DEFAULT_CHANGE_CAPACITY)
    }
}

/// Strip surrounding slashes; empty keys are invalid.
fn normalize(key: &str) -> Result<String> {
    let key = key.trim().trim_matches('/');
    if key.is_empty() {
        return Err(Error::contract_invalid("key must not be empty"));
    }
    Ok(key.to_string())
}

fn is_under(candidate: &str, prefix: &str) -> bool {
    candidate == prefix
        || (candidate.starts_with(prefix) && candidate[prefix.len()..].starts_with('/'))
}

fn flatten_into(prefix: &str, value: Value, out: &mut Vec<(String, Value)>) {
    match value {
        Value::Object(map) if !map.is_empty() => {
            for (name, child) in map {
                flatten_into(&format!("{}/{}", prefix, name), child, out);
            }
        }
        leaf => out.push((prefix.to_string(), leaf)),
    }
}

/// Insert `value` at the `/`-separated `path` below `root`.
fn insert_path(root: &mut Map<String, Value>, path: &str, value: Value) {
    let mut segments = path.split('/').filter(|s| !s.is_empty()).peekable();
    let mut node = root;

    while let Some(segment) = segments.next() {
        if segments.peek().is_none() {
            // A subtree already at this path keeps its children.
            if !matches!(node.get(segment), Some(Value::Object(_))) {
                node.insert(segment.to_string(), value);
            }
            return;
        }

        let child = node
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !child.is_object() {
            *child = Value::Object(Map::new());
        }
        node = match child {
            Value::Object(map) => map,
            _ => return,
        };
    }
}

impl KvStore {
    pub fn new(change_capacity: usize) -> Self {
        let (changes, _) = broadcast::channel(change_capacity.max(1));
        Self {
            entries: RwLock::new(BTreeMap::new()),
            changes,
        }
    }

    /// Receive every subsequent change
    pub fn subscribe(&self) -> broadcast::Receiver<KvChange> {
        self.changes.subscribe()
    }

    fn publish(&self, kind: ChangeKind, keys: Vec<String>) {
        // No subscribers is not an error.
        let _ = self.changes.send(KvChange { kind, keys });
    }

    /// Store `value` at `key`, returning the keys written
    ///
    /// With `flatten`, a JSON object is written as one leaf per path.
    pub async fn put(&self, key: &str, value: Value, flatten: bool) -> Result<Vec<String>> {
        let key = normalize(key)?;

        let mut leaves = Vec::new();
        if flatten {
            flatten_into(&key, value, &mut leaves);
        } else {
            leaves.push((key, value));
        }

        let keys: Vec<String> = leaves.iter().map(|(k, _)| k.clone()).collect();
        {
            let mut entries = self.entries.write().await;
            entries.extend(leaves);
        }

        debug!(count = keys.len(), "Stored keys");
        self.publish(ChangeKind::Put, keys.clone());
        Ok(keys)
    }

    /// All pairs at or below `key`, ordered by key
    pub async fn get(&self, key: &str) -> Result<Vec<KeyValue>> {
        let key = normalize(key)?;
        let entries = self.entries.read().await;

        let pairs: Vec<KeyValue> = entries
            .range(key.clone()..)
            .take_while(|(k, _)| k.starts_with(&key))
            .filter(|(k, _)| is_under(k, &key))
            .map(|(k, v)| KeyValue {
                key: k.clone(),
                value: v.clone(),
            })
            .collect();

        if pairs.is_empty() {
            return Err(Error::entity_does_not_exist(format!("key '{}'", key)));
        }
        Ok(pairs)
    }

    /// Keys at or below `key`
    pub async fn keys(&self, key: &str) -> Result<Vec<String>> {
        Ok(self.get(key).await?.into_iter().map(|kv| kv.key).collect())
    }

    /// The subtree at `key` rebuilt as a nested JSON object
    ///
    /// A key with no children yields its own value.
    pub async fn get_tree(&self, key: &str) -> Result<Value> {
        let prefix = normalize(key)?;
        let pairs = self.get(&prefix).await?;

        if let [single] = pairs.as_slice()
            && single.key == prefix
        {
            return Ok(single.value.clone());
        }

        let mut root = Map::new();
        for pair in pairs {
            let relative = pair.key[prefix.len()..].trim_start_matches('/');
            if relative.is_empty() {
                continue;
            }
            insert_path(&mut root, relative, pair.value);
        }
        Ok(Value::Object(root))
    }

    /// Delete `key`, or its whole subtree with `prefix_match`
    pub async fn delete(&self, key: &str, prefix_match: bool) -> Result<Vec<String>> {
        let key = normalize(key)?;

        let removed: Vec<String> = {
            let mut entries = self.entries.write().await;
            if prefix_match {
                let doomed: Vec<String> = entries
                    .keys()
                    .filter(|k| is_under(k, &key))
                    .cloned()
                    .collect();
                for k in &doomed {
                    entries.remove(k);
                }
                doomed
            } else {
                entries.remove(&key).map(|_| vec![key.clone()]).unwrap_or_default()
            }
        };

        if removed.is_empty() {
            return Err(Error::entity_does_not_exist(format!("key '{}'", key)));
        }

        debug!(count = removed.len(), "Deleted keys");
        self.publish(ChangeKind::Delete, removed.clone());
        Ok(removed)
    }
}
