//! Plugin Catalog
//!
//! Owns installed manifests and their install sources. Manifests are
//! fetched through a [`ManifestFetcher`] per source kind (builtin, git,
//! url, npm), validated, and persisted with their enabled flag so a restart
//! can restore the previous activation state.
//!
//! Only `install`, `uninstall` and `set_enabled` mutate the catalog.

use std::path::PathBuf;
use std::sync::Arc;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use log::{debug, info, warn};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::plugin::error::{PluginError, PluginResult};
use crate::plugin::manifest::{InstallSource, PluginManifest, SourceKind};
use crate::plugin::storage::StorageBackend;

const CATALOG_NAMESPACE: &str = "catalog";

/// Manifest file looked up at the root of git checkouts
pub const MANIFEST_FILE: &str = "manifest.json";

/// Field of an npm package document carrying the plugin manifest
pub const NPM_MANIFEST_FIELD: &str = "gitdock";

pub const DEFAULT_NPM_REGISTRY: &str = "https://registry.npmjs.org";

/// Installed plugin as persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEntry {
    pub manifest: PluginManifest,
    pub source: InstallSource,
    #[serde(default)]
    pub enabled: bool,
    pub installed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InstallOptions {
    /// Activate after installing
    pub enable: bool,
    /// Grant every declared permission without asking
    pub skip_approval: bool,
    /// Overwrite an already installed plugin with the same id
    pub replace: bool,
}

/// Result record of an install attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_id: Option<String>,
}

impl InstallOutcome {
    pub fn installed<S: Into<String>>(plugin_id: S) -> Self {
        Self { success: true, error: None, plugin_id: Some(plugin_id.into()) }
    }

    pub fn failed(error: &PluginError) -> Self {
        Self { success: false, error: Some(error.to_string()), plugin_id: None }
    }
}

/// Retrieves the raw manifest document for an install source
#[async_trait]
pub trait ManifestFetcher: Send + Sync {
    fn handles(&self, kind: SourceKind) -> bool;

    async fn fetch(&self, source: &InstallSource) -> PluginResult<Value>;
}

/// Manifests compiled into the host, addressed by plugin id
#[derive(Default)]
pub struct BuiltinFetcher {
    manifests: RwLock<IndexMap<String, Value>>,
}

impl BuiltinFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a manifest installable as `builtin:<id>`
    pub fn register(&self, manifest: Value) -> PluginResult<String> {
        let id = manifest
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| PluginError::invalid_manifest("builtin manifest has no id"))?
            .to_string();
        self.manifests.write().insert(id.clone(), manifest);
        Ok(id)
    }

    pub fn ids(&self) -> Vec<String> {
        self.manifests.read().keys().cloned().collect()
    }
}

#[async_trait]
impl ManifestFetcher for BuiltinFetcher {
    fn handles(&self, kind: SourceKind) -> bool {
        kind == SourceKind::Builtin
    }

    async fn fetch(&self, source: &InstallSource) -> PluginResult<Value> {
        if source.location.is_empty() {
            return Err(PluginError::install_failed("builtin source needs a plugin id"));
        }
        self.manifests
            .read()
            .get(&source.location)
            .cloned()
            .ok_or_else(|| PluginError::install_failed(format!("no builtin plugin named '{}'", source.location)))
    }
}

/// Clones a repository and reads its root manifest
pub struct GitFetcher {
    scratch_dir: PathBuf,
}

impl GitFetcher {
    pub fn new() -> Self {
        Self { scratch_dir: std::env::temp_dir() }
    }

    pub fn with_scratch_dir(scratch_dir: PathBuf) -> Self {
        Self { scratch_dir }
    }
}

impl Default for GitFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ManifestFetcher for GitFetcher {
    fn handles(&self, kind: SourceKind) -> bool {
        kind == SourceKind::Git
    }

    async fn fetch(&self, source: &InstallSource) -> PluginResult<Value> {
        let url = source.location.clone();
        let checkout = self.scratch_dir.join(format!("gitdock-{}", uuid::Uuid::new_v4()));

        tokio::task::spawn_blocking(move || {
            debug!("Cloning {} into {}", url, checkout.display());
            let result = git2::Repository::clone(&url, &checkout)
                .map_err(|e| PluginError::install_failed(format!("cannot clone {}: {}", url, e.message())))
                .and_then(|_| {
                    let text = std::fs::read_to_string(checkout.join(MANIFEST_FILE)).map_err(|e| {
                        PluginError::install_failed(format!("{} has no readable {}: {}", url, MANIFEST_FILE, e))
                    })?;
                    serde_json::from_str::<Value>(&text)
                        .map_err(|e| PluginError::invalid_manifest(format!("{} is not valid JSON: {}", MANIFEST_FILE, e)))
                });
            if let Err(e) = std::fs::remove_dir_all(&checkout) {
                warn!("Could not remove checkout {}: {}", checkout.display(), e);
            }
            result
        })
        .await?
    }
}

/// Downloads a manifest document; `file://` locations are read locally
#[derive(Default)]
pub struct UrlFetcher {
    client: reqwest::Client,
}

impl UrlFetcher {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ManifestFetcher for UrlFetcher {
    fn handles(&self, kind: SourceKind) -> bool {
        kind == SourceKind::Url
    }

    async fn fetch(&self, source: &InstallSource) -> PluginResult<Value> {
        if let Some(path) = source.location.strip_prefix("file://") {
            let text = tokio::fs::read_to_string(path)
                .await
                .map_err(|e| PluginError::install_failed(format!("cannot read {}: {}", path, e)))?;
            return serde_json::from_str::<Value>(&text)
                .map_err(|e| PluginError::invalid_manifest(format!("{} is not valid JSON: {}", path, e)));
        }

        let response = self.client.get(&source.location).send().await?.error_for_status()?;
        Ok(response.json::<Value>().await?)
    }
}

/// Reads the manifest embedded in the latest version of an npm package
pub struct NpmFetcher {
    client: reqwest::Client,
    registry: String,
}

impl NpmFetcher {
    pub fn new() -> Self {
        Self::with_registry(DEFAULT_NPM_REGISTRY)
    }

    pub fn with_registry<S: Into<String>>(registry: S) -> Self {
        Self {
            client: reqwest::Client::new(),
            registry: registry.into().trim_end_matches('/').to_string(),
        }
    }
}

impl Default for NpmFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ManifestFetcher for NpmFetcher {
    fn handles(&self, kind: SourceKind) -> bool {
        kind == SourceKind::Npm
    }

    async fn fetch(&self, source: &InstallSource) -> PluginResult<Value> {
        let package = source.location.replace('/', "%2F");
        let url = format!("{}/{}/latest", self.registry, package);
        let document: Value = self.client.get(&url).send().await?.error_for_status()?.json().await?;

        document
            .get(NPM_MANIFEST_FIELD)
            .cloned()
            .ok_or_else(|| PluginError::install_failed(format!(
                "package '{}' does not declare a '{}' manifest",
                source.location, NPM_MANIFEST_FIELD
            )))
    }
}

/// Persistent registry of installed plugins
pub struct PluginCatalog {
    storage: Arc<dyn StorageBackend>,
    entries: RwLock<IndexMap<String, CatalogEntry>>,
    builtins: Arc<BuiltinFetcher>,
    fetchers: Vec<Arc<dyn ManifestFetcher>>,
}

impl PluginCatalog {
    /// Load installed plugins with the default builtin/git/url/npm fetchers
    pub fn load(storage: Arc<dyn StorageBackend>) -> PluginResult<Self> {
        let builtins = Arc::new(BuiltinFetcher::new());
        let fetchers: Vec<Arc<dyn ManifestFetcher>> = vec![
            builtins.clone(),
            Arc::new(GitFetcher::new()),
            Arc::new(UrlFetcher::new()),
            Arc::new(NpmFetcher::new()),
        ];

        let mut entries = IndexMap::new();
        for (plugin_id, value) in storage.entries(CATALOG_NAMESPACE)? {
            match serde_json::from_value::<CatalogEntry>(value) {
                Ok(entry) => {
                    entries.insert(plugin_id, entry);
                }
                Err(e) => warn!("Skipping unreadable catalog entry '{}': {}", plugin_id, e),
            }
        }
        info!("Loaded plugin catalog with {} entries", entries.len());

        Ok(Self {
            storage,
            entries: RwLock::new(entries),
            builtins,
            fetchers,
        })
    }

    /// Put a fetcher ahead of the defaults
    pub fn with_fetcher(mut self, fetcher: Arc<dyn ManifestFetcher>) -> Self {
        self.fetchers.insert(0, fetcher);
        self
    }

    /// Manifests installable from the builtin source
    pub fn builtins(&self) -> &Arc<BuiltinFetcher> {
        &self.builtins
    }

    /// Fetch and validate the manifest behind a source without installing it
    pub async fn resolve(&self, source: &InstallSource) -> PluginResult<PluginManifest> {
        let fetcher = self
            .fetchers
            .iter()
            .find(|fetcher| fetcher.handles(source.kind))
            .ok_or_else(|| PluginError::install_failed(format!("no fetcher for {} sources", source.kind)))?;

        debug!("Fetching manifest from {}", source);
        let document = fetcher.fetch(source).await?;
        PluginManifest::from_value(&document)
    }

    /// Persist a validated manifest
    pub fn store(&self, manifest: PluginManifest, source: InstallSource, replace: bool) -> PluginResult<CatalogEntry> {
        let mut entries = self.entries.write();
        let enabled = match entries.get(&manifest.id) {
            Some(_) if !replace => return Err(PluginError::plugin_already_registered(&manifest.id)),
            Some(existing) => existing.enabled,
            None => false,
        };

        let entry = CatalogEntry {
            manifest,
            source,
            enabled,
            installed_at: Utc::now(),
        };
        self.storage.set(CATALOG_NAMESPACE, &entry.manifest.id, serde_json::to_value(&entry)?)?;
        entries.insert(entry.manifest.id.clone(), entry.clone());
        info!("Installed plugin '{}' {} from {}", entry.manifest.id, entry.manifest.version, entry.source);
        Ok(entry)
    }

    /// Fetch, validate and persist. Nothing is written when any step fails.
    pub async fn try_install(&self, source: &InstallSource, options: InstallOptions) -> PluginResult<CatalogEntry> {
        let manifest = self.resolve(source).await?;
        self.store(manifest, source.clone(), options.replace)
    }

    /// Install and report as an outcome record
    pub async fn install(&self, source: &InstallSource, options: InstallOptions) -> InstallOutcome {
        match self.try_install(source, options).await {
            Ok(entry) => InstallOutcome::installed(entry.manifest.id),
            Err(e) => {
                warn!("Install from {} failed: {}", source, e);
                InstallOutcome::failed(&e)
            }
        }
    }

    /// Remove an installed plugin; returns false when it was not installed.
    /// Callers deactivate the plugin first.
    pub fn uninstall(&self, plugin_id: &str) -> PluginResult<bool> {
        let mut entries = self.entries.write();
        if entries.shift_remove(plugin_id).is_none() {
            debug!("Uninstall of '{}' ignored; not installed", plugin_id);
            return Ok(false);
        }
        self.storage.remove(CATALOG_NAMESPACE, plugin_id)?;
        info!("Uninstalled plugin '{}'", plugin_id);
        Ok(true)
    }

    pub fn get(&self, plugin_id: &str) -> Option<CatalogEntry> {
        self.entries.read().get(plugin_id).cloned()
    }

    pub fn contains(&self, plugin_id: &str) -> bool {
        self.entries.read().contains_key(plugin_id)
    }

    /// Installed plugins in install order
    pub fn list(&self) -> Vec<CatalogEntry> {
        self.entries.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Persist the enabled flag restored at startup
    pub fn set_enabled(&self, plugin_id: &str, enabled: bool) -> PluginResult<()> {
        let mut entries = self.entries.write();
        let entry = entries
            .get_mut(plugin_id)
            .ok_or_else(|| PluginError::plugin_not_found(plugin_id))?;
        if entry.enabled != enabled {
            entry.enabled = enabled;
            self.storage.set(CATALOG_NAMESPACE, plugin_id, serde_json::to_value(&*entry)?)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::storage::{JsonFileStorage, MemoryStorage};
    use crate::plugin::tests::mocks::manifest_json;
    use serde_json::json;

    fn catalog() -> PluginCatalog {
        let catalog = PluginCatalog::load(Arc::new(MemoryStorage::new())).unwrap();
        catalog.builtins().register(manifest_json("branch-badges", "widget", &["read-repository-data"])).unwrap();
        catalog
    }

    #[tokio::test]
    async fn test_install_builtin() {
        let catalog = catalog();
        let outcome = catalog.install(&InstallSource::builtin("branch-badges"), InstallOptions::default()).await;

        assert_eq!(outcome, InstallOutcome::installed("branch-badges"));
        let entry = catalog.get("branch-badges").unwrap();
        assert_eq!(entry.source.kind, SourceKind::Builtin);
        assert!(!entry.enabled);
    }

    #[tokio::test]
    async fn test_invalid_manifest_persists_nothing() {
        let catalog = catalog();
        let mut broken = manifest_json("broken", "widget", &[]);
        broken.as_object_mut().unwrap().remove("name");
        catalog.builtins().register(broken).unwrap();

        let outcome = catalog.install(&InstallSource::builtin("broken"), InstallOptions::default()).await;
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("name"));
        assert!(catalog.get("broken").is_none());
    }

    #[tokio::test]
    async fn test_unknown_permission_aborts_install() {
        let catalog = catalog();
        catalog.builtins().register(manifest_json("spy", "service", &["keylogger"])).unwrap();

        let err = catalog
            .try_install(&InstallSource::builtin("spy"), InstallOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PluginError::PermissionDeclaration { .. }));
        assert!(catalog.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_install_requires_replace() {
        let catalog = catalog();
        let source = InstallSource::builtin("branch-badges");
        catalog.try_install(&source, InstallOptions::default()).await.unwrap();
        catalog.set_enabled("branch-badges", true).unwrap();

        let again = catalog.try_install(&source, InstallOptions::default()).await;
        assert!(matches!(again, Err(PluginError::PluginAlreadyRegistered { .. })));

        let replaced = catalog
            .try_install(&source, InstallOptions { replace: true, ..Default::default() })
            .await
            .unwrap();
        assert!(replaced.enabled);
    }

    #[tokio::test]
    async fn test_uninstall_absent_is_noop() {
        let catalog = catalog();
        assert!(!catalog.uninstall("never-installed").unwrap());

        catalog.try_install(&InstallSource::builtin("branch-badges"), InstallOptions::default()).await.unwrap();
        assert!(catalog.uninstall("branch-badges").unwrap());
        assert!(catalog.get("branch-badges").is_none());
    }

    #[tokio::test]
    async fn test_catalog_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        {
            let storage = Arc::new(JsonFileStorage::open(dir.path()).unwrap());
            let catalog = PluginCatalog::load(storage).unwrap();
            catalog.builtins().register(manifest_json("notes", "panel", &[])).unwrap();
            catalog.try_install(&InstallSource::builtin("notes"), InstallOptions::default()).await.unwrap();
            catalog.set_enabled("notes", true).unwrap();
        }

        let catalog = PluginCatalog::load(Arc::new(JsonFileStorage::open(dir.path()).unwrap())).unwrap();
        let entry = catalog.get("notes").unwrap();
        assert!(entry.enabled);
        assert_eq!(entry.manifest.name, "Notes");
        assert!(matches!(catalog.set_enabled("missing", true), Err(PluginError::PluginNotFound { .. })));
    }

    #[tokio::test]
    async fn test_install_from_file_url() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.json");
        std::fs::write(&path, manifest_json("pr-dashboard", "app", &["network"]).to_string()).unwrap();

        let catalog = catalog();
        let source = InstallSource::url(format!("file://{}", path.display()));
        let entry = catalog.try_install(&source, InstallOptions::default()).await.unwrap();
        assert_eq!(entry.manifest.id, "pr-dashboard");
    }

    #[tokio::test]
    async fn test_builtin_source_needs_location() {
        let catalog = catalog();
        let outcome = catalog
            .install(&InstallSource::new(SourceKind::Builtin, ""), InstallOptions::default())
            .await;
        assert!(!outcome.success);

        assert!(BuiltinFetcher::new().register(json!({"name": "x"})).is_err());
    }
}
