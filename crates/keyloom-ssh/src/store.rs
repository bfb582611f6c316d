// ABOUTME: Shared parameter store trait with in-memory and JSON-file implementations.
// ABOUTME: Set unions are read-modify-write under a lock so concurrent publishers never lose keys.

use crate::error::{ProvisionError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

/// A value held at a store path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Text(String),
    Set(BTreeSet<String>),
}

impl ParamValue {
    /// View the value as a set; a text value is a one-element set.
    pub fn into_set(self) -> BTreeSet<String> {
        match self {
            ParamValue::Text(text) => BTreeSet::from([text]),
            ParamValue::Set(set) => set,
        }
    }
}

/// Process-wide key/value state shared between provisioning runs.
#[async_trait]
pub trait ParamStore: Send + Sync {
    async fn get(&self, path: &str) -> Result<Option<ParamValue>>;

    /// Assign `value` to `path`, replacing whatever was there.
    async fn set(&self, path: &str, value: ParamValue) -> Result<()>;

    /// Union `items` into the set at `path` and return the stored set.
    ///
    /// Implementations must make the read and the write atomic with respect
    /// to other callers.
    async fn merge_union(&self, path: &str, items: BTreeSet<String>) -> Result<BTreeSet<String>>;
}

type ParamMap = BTreeMap<String, ParamValue>;

fn union_into(map: &mut ParamMap, path: &str, items: BTreeSet<String>) -> BTreeSet<String> {
    let mut merged = map.remove(path).map(ParamValue::into_set).unwrap_or_default();
    merged.extend(items);
    map.insert(path.to_string(), ParamValue::Set(merged.clone()));
    merged
}

/// In-process store. Clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<ParamMap>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything currently stored.
    pub async fn snapshot(&self) -> BTreeMap<String, ParamValue> {
        self.inner.lock().await.clone()
    }
}

#[async_trait]
impl ParamStore for MemoryStore {
    async fn get(&self, path: &str) -> Result<Option<ParamValue>> {
        Ok(self.inner.lock().await.get(path).cloned())
    }

    async fn set(&self, path: &str, value: ParamValue) -> Result<()> {
        self.inner.lock().await.insert(path.to_string(), value);
        Ok(())
    }

    async fn merge_union(&self, path: &str, items: BTreeSet<String>) -> Result<BTreeSet<String>> {
        let mut map = self.inner.lock().await;
        Ok(union_into(&mut map, path, items))
    }
}

/// Store persisted as a JSON object in a single file.
///
/// Writes go through a sibling temp file and a rename. The lock serializes
/// callers within this process only.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
    lock: Arc<Mutex<()>>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn store_err(&self, key: &str, message: impl std::fmt::Display) -> ProvisionError {
        ProvisionError::StateStore {
            path: key.to_string(),
            message: format!("{} ({})", message, self.path.display()),
        }
    }

    async fn load(&self, key: &str) -> Result<ParamMap> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(text) if text.trim().is_empty() => Ok(ParamMap::new()),
            Ok(text) => serde_json::from_str(&text).map_err(|e| self.store_err(key, e)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ParamMap::new()),
            Err(e) => Err(self.store_err(key, e)),
        }
    }

    async fn save(&self, key: &str, map: &ParamMap) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.store_err(key, e))?;
        }
        let text = serde_json::to_string_pretty(map).map_err(|e| self.store_err(key, e))?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, text)
            .await
            .map_err(|e| self.store_err(key, e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| self.store_err(key, e))
    }
}

#[async_trait]
impl ParamStore for FileStore {
    async fn get(&self, path: &str) -> Result<Option<ParamValue>> {
        let _guard = self.lock.lock().await;
        Ok(self.load(path).await?.remove(path))
    }

    async fn set(&self, path: &str, value: ParamValue) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut map = self.load(path).await?;
        map.insert(path.to_string(), value);
        self.save(path, &map).await
    }

    async fn merge_union(&self, path: &str, items: BTreeSet<String>) -> Result<BTreeSet<String>> {
        let _guard = self.lock.lock().await;
        let mut map = self.load(path).await?;
        let merged = union_into(&mut map, path, items);
        self.save(path, &map).await?;
        Ok(merged)
    }
}
