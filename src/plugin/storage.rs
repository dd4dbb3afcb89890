//! Key-value persistence used by the plugin runtime.
//!
//! Every store (settings, permissions, catalog, event history) persists
//! through a [`StorageBackend`] partitioned into namespaces. Writes of a
//! batch are atomic from the caller's perspective: either the whole batch
//! lands or nothing changes.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use indexmap::IndexMap;
use log::{debug, warn};
use parking_lot::RwLock;
use serde_json::Value;

use crate::plugin::error::{PluginError, PluginResult};

/// Ordered key-value map stored in one namespace
pub type Namespace = IndexMap<String, Value>;

/// Host-supplied persistence backend
pub trait StorageBackend: Send + Sync {
    /// Read a single key
    fn get(&self, namespace: &str, key: &str) -> PluginResult<Option<Value>>;

    /// Read every key of a namespace
    fn entries(&self, namespace: &str) -> PluginResult<Namespace>;

    /// Write several keys at once; all or nothing
    fn set_many(&self, namespace: &str, values: Vec<(String, Value)>) -> PluginResult<()>;

    /// Replace the whole namespace; all or nothing
    fn replace(&self, namespace: &str, values: Namespace) -> PluginResult<()>;

    /// Remove a key; absent keys are not an error
    fn remove(&self, namespace: &str, key: &str) -> PluginResult<()>;

    /// Write a single key
    fn set(&self, namespace: &str, key: &str, value: Value) -> PluginResult<()> {
        self.set_many(namespace, vec![(key.to_string(), value)])
    }

    /// Drop every key of a namespace
    fn clear(&self, namespace: &str) -> PluginResult<()> {
        self.replace(namespace, Namespace::new())
    }
}

/// Volatile backend for tests and embedding hosts without persistence
#[derive(Default)]
pub struct MemoryStorage {
    namespaces: RwLock<HashMap<String, Namespace>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageBackend for MemoryStorage {
    fn get(&self, namespace: &str, key: &str) -> PluginResult<Option<Value>> {
        Ok(self.namespaces.read().get(namespace).and_then(|ns| ns.get(key).cloned()))
    }

    fn entries(&self, namespace: &str) -> PluginResult<Namespace> {
        Ok(self.namespaces.read().get(namespace).cloned().unwrap_or_default())
    }

    fn set_many(&self, namespace: &str, values: Vec<(String, Value)>) -> PluginResult<()> {
        let mut namespaces = self.namespaces.write();
        let ns = namespaces.entry(namespace.to_string()).or_default();
        for (key, value) in values {
            ns.insert(key, value);
        }
        Ok(())
    }

    fn replace(&self, namespace: &str, values: Namespace) -> PluginResult<()> {
        let mut namespaces = self.namespaces.write();
        if values.is_empty() {
            namespaces.remove(namespace);
        } else {
            namespaces.insert(namespace.to_string(), values);
        }
        Ok(())
    }

    fn remove(&self, namespace: &str, key: &str) -> PluginResult<()> {
        if let Some(ns) = self.namespaces.write().get_mut(namespace) {
            ns.shift_remove(key);
        }
        Ok(())
    }
}

/// One JSON document per namespace under a root directory.
///
/// Documents are cached after first read and written through on every
/// mutation via a temporary file and rename.
pub struct JsonFileStorage {
    root: PathBuf,
    cache: RwLock<HashMap<String, Namespace>>,
}

impl JsonFileStorage {
    /// Open (and create if needed) a storage directory
    pub fn open<P: AsRef<Path>>(root: P) -> PluginResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(|e| {
            PluginError::storage(format!("Failed to create storage directory {}: {}", root.display(), e))
        })?;
        debug!("Opened plugin storage at {}", root.display());
        Ok(Self {
            root,
            cache: RwLock::new(HashMap::new()),
        })
    }

    /// Storage root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn document_path(&self, namespace: &str) -> PathBuf {
        let file_name: String = namespace
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
            .collect();
        self.root.join(format!("{}.json", file_name))
    }

    fn read_document(&self, namespace: &str) -> PluginResult<Namespace> {
        if let Some(ns) = self.cache.read().get(namespace) {
            return Ok(ns.clone());
        }

        let path = self.document_path(namespace);
        let document = if path.exists() {
            let content = fs::read_to_string(&path)?;
            match serde_json::from_str::<Namespace>(&content) {
                Ok(ns) => ns,
                Err(e) => {
                    warn!("Discarding unreadable storage document {}: {}", path.display(), e);
                    Namespace::new()
                }
            }
        } else {
            Namespace::new()
        };

        self.cache.write().insert(namespace.to_string(), document.clone());
        Ok(document)
    }

    fn write_document(&self, namespace: &str, document: Namespace) -> PluginResult<()> {
        let path = self.document_path(namespace);
        if document.is_empty() {
            if path.exists() {
                fs::remove_file(&path)?;
            }
        } else {
            let content = serde_json::to_string_pretty(&document)?;
            let temp_path = path.with_extension("json.tmp");
            fs::write(&temp_path, content)?;
            fs::rename(&temp_path, &path)?;
        }
        self.cache.write().insert(namespace.to_string(), document);
        Ok(())
    }
}

impl StorageBackend for JsonFileStorage {
    fn get(&self, namespace: &str, key: &str) -> PluginResult<Option<Value>> {
        Ok(self.read_document(namespace)?.get(key).cloned())
    }

    fn entries(&self, namespace: &str) -> PluginResult<Namespace> {
        self.read_document(namespace)
    }

    fn set_many(&self, namespace: &str, values: Vec<(String, Value)>) -> PluginResult<()> {
        let mut document = self.read_document(namespace)?;
        for (key, value) in values {
            document.insert(key, value);
        }
        self.write_document(namespace, document)
    }

    fn replace(&self, namespace: &str, values: Namespace) -> PluginResult<()> {
        self.write_document(namespace, values)
    }

    fn remove(&self, namespace: &str, key: &str) -> PluginResult<()> {
        let mut document = self.read_document(namespace)?;
        if document.shift_remove(key).is_some() {
            self.write_document(namespace, document)?;
        }
        Ok(())
    }
}
