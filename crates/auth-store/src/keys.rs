//! Per-peer session key store.
//!
//! Values are grouped by type (`"pre-key"`, `"session"`, `"sender-key"`, …)
//! and then by id.  Reads come from an in-memory cache seeded at load time;
//! every `set` rewrites the whole map in a single repository write.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::codec::{AuthValue, CodecError};
use crate::error::Result;
use crate::repository::AuthRepository;

/// `type → id → value`.
pub type KeyMap = BTreeMap<String, BTreeMap<String, AuthValue>>;

/// `type → id → Some(value) | None (delete)`.
pub type KeyUpdates = BTreeMap<String, BTreeMap<String, Option<AuthValue>>>;

/// Handle to one organization's key material.  Cheap to clone; clones share
/// the same cache.
#[derive(Clone)]
pub struct KeyStore {
    org_id: String,
    cache: Arc<Mutex<KeyMap>>,
    repo: Arc<dyn AuthRepository>,
}

impl KeyStore {
    pub(crate) fn new(org_id: &str, initial: KeyMap, repo: Arc<dyn AuthRepository>) -> Self {
        Self {
            org_id: org_id.to_owned(),
            cache: Arc::new(Mutex::new(initial)),
            repo,
        }
    }

    pub fn org_id(&self) -> &str {
        &self.org_id
    }

    /// Fetch the values stored under `kind` for each of `ids`.  Ids with no
    /// stored value are absent from the result.
    pub async fn get(&self, kind: &str, ids: &[String]) -> BTreeMap<String, AuthValue> {
        let cache = self.cache.lock().await;
        let Some(bucket) = cache.get(kind) else {
            return BTreeMap::new();
        };
        ids.iter()
            .filter_map(|id| bucket.get(id).map(|v| (id.clone(), v.clone())))
            .collect()
    }

    /// Apply `updates` to the cache (a `None` value deletes the id) and
    /// persist the full map.  The cache lock is held across the write so
    /// concurrent `set` calls reach storage in the order they were applied.
    pub async fn set(&self, updates: KeyUpdates) -> Result<()> {
        let mut cache = self.cache.lock().await;
        let mut touched = 0usize;
        for (kind, entries) in updates {
            let bucket = cache.entry(kind.clone()).or_default();
            for (id, value) in entries {
                touched += 1;
                match value {
                    Some(v) => {
                        bucket.insert(id, v);
                    }
                    None => {
                        bucket.remove(&id);
                    }
                }
            }
            if bucket.is_empty() {
                cache.remove(&kind);
            }
        }

        let encoded = encode_key_map(&cache)?;
        self.repo.save_keys(&self.org_id, &encoded).await?;
        tracing::debug!(org_id = %self.org_id, touched, types = cache.len(), "key store persisted");
        Ok(())
    }

    /// Copy of the whole cache (used to seed a protocol session).
    pub async fn snapshot(&self) -> KeyMap {
        self.cache.lock().await.clone()
    }

    /// Total number of stored ids across all types.
    pub async fn len(&self) -> usize {
        self.cache.lock().await.values().map(BTreeMap::len).sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

pub(crate) fn encode_key_map(map: &KeyMap) -> Result<String> {
    Ok(serde_json::to_string(map)?)
}

pub(crate) fn decode_key_map(raw: &str) -> std::result::Result<KeyMap, CodecError> {
    let value: serde_json::Value =
        serde_json::from_str(raw).map_err(|_| CodecError::InvalidBufferShape)?;
    match AuthValue::from_json(value)? {
        AuthValue::Null => Ok(KeyMap::new()),
        AuthValue::Object(types) => types
            .into_iter()
            .map(|(kind, bucket)| match bucket {
                AuthValue::Object(entries) => Ok((kind, entries)),
                _ => Err(CodecError::InvalidBufferShape),
            })
            .collect(),
        _ => Err(CodecError::InvalidBufferShape),
    }
}

/// Decode a wire-level `type → id → value | null` object into updates.
pub fn decode_key_updates(value: serde_json::Value) -> std::result::Result<KeyUpdates, CodecError> {
    let serde_json::Value::Object(types) = value else {
        return Err(CodecError::InvalidBufferShape);
    };
    let mut updates = KeyUpdates::new();
    for (kind, bucket) in types {
        let serde_json::Value::Object(entries) = bucket else {
            return Err(CodecError::InvalidBufferShape);
        };
        let decoded = updates.entry(kind).or_default();
        for (id, raw) in entries {
            let value = match AuthValue::from_json(raw)? {
                AuthValue::Null => None,
                other => Some(other),
            };
            decoded.insert(id, value);
        }
    }
    Ok(updates)
}
