//! Plugin host
//!
//! Wires the stores, catalog and manager together and runs the install
//! flow: resolve the manifest, ask for its capabilities, store it in the
//! catalog, register it with the manager and optionally activate it.
//!
//! ```no_run
//! # tokio_test::block_on(async {
//! use std::sync::Arc;
//! use gitdock::app::PluginHost;
//! use gitdock::config::RuntimeConfig;
//! use gitdock::plugin::{InstallOptions, InstallSource, UnavailableHost};
//!
//! let host = PluginHost::open(Arc::new(UnavailableHost), RuntimeConfig::default()).unwrap();
//! host.register_builtins().unwrap();
//! let outcome = host.install(&InstallSource::builtin("agent-notifier"), InstallOptions::default()).await;
//! println!("installed: {}", outcome.success);
//! # });
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use indexmap::IndexMap;
use log::{debug, info, warn};
use parking_lot::RwLock;
use serde_json::Value;

use crate::config::RuntimeConfig;
use crate::events::{AgentEvent, EventBus, EventHistory, Subscription};
use crate::plugin::builtin;
use crate::plugin::catalog::{CatalogEntry, InstallOptions, InstallOutcome, PluginCatalog};
use crate::plugin::components::ComponentRegistry;
use crate::plugin::context::ContextFactory;
use crate::plugin::error::{PluginError, PluginResult};
use crate::plugin::host::HostAccessors;
use crate::plugin::manager::{PluginManager, PluginModule};
use crate::plugin::manifest::{InstallSource, PluginManifest};
use crate::plugin::permissions::{Capability, PermissionRequestFlow, PermissionStore};
use crate::plugin::settings::{SettingsEditor, SettingsStore};
use crate::plugin::storage::{JsonFileStorage, StorageBackend};

/// Storage namespace of the agent event history
pub const AGENT_HISTORY_NAMESPACE: &str = "history/agents";

/// What happened while restoring the catalog at startup
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreReport {
    pub registered: Vec<String>,
    pub activated: Vec<String>,
    /// Plugin id and activation error
    pub failed: Vec<(String, String)>,
}

pub struct PluginHost {
    config: RuntimeConfig,
    permissions: Arc<PermissionStore>,
    approvals: Arc<PermissionRequestFlow>,
    settings: Arc<SettingsStore>,
    catalog: Arc<PluginCatalog>,
    manager: Arc<PluginManager>,
    components: ComponentRegistry,
    modules: RwLock<HashMap<String, Arc<dyn PluginModule>>>,
    history: Arc<EventHistory<AgentEvent>>,
    _recording: Subscription,
}

impl PluginHost {
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        host: Arc<dyn HostAccessors>,
        config: RuntimeConfig,
    ) -> PluginResult<Self> {
        let permissions = Arc::new(PermissionStore::load(Arc::clone(&storage))?);
        let approvals = Arc::new(PermissionRequestFlow::with_timeout(
            Arc::clone(&permissions),
            config.permission_timeout,
        ));
        let settings = Arc::new(SettingsStore::new(Arc::clone(&storage)));
        let catalog = Arc::new(PluginCatalog::load(Arc::clone(&storage))?);
        let contexts = Arc::new(ContextFactory::new(
            host,
            Arc::clone(&permissions),
            Arc::clone(&settings),
            EventBus::new("agents"),
        ));
        let manager = Arc::new(
            PluginManager::new(contexts, Arc::clone(&permissions))
                .with_catalog(Arc::clone(&catalog))
                .with_activation_timeout(config.activation_timeout),
        );

        let history = Arc::new(EventHistory::open(storage, AGENT_HISTORY_NAMESPACE, config.history_limit)?);
        let recording = history.record_from(manager.contexts().bus());

        Ok(Self {
            config,
            permissions,
            approvals,
            settings,
            catalog,
            manager,
            components: ComponentRegistry::new(),
            modules: RwLock::new(HashMap::new()),
            history,
            _recording: recording,
        })
    }

    /// Host persisting to JSON files under the configured data directory
    pub fn open(host: Arc<dyn HostAccessors>, config: RuntimeConfig) -> PluginResult<Self> {
        let storage: Arc<dyn StorageBackend> = Arc::new(JsonFileStorage::open(&config.data_dir)?);
        Self::new(storage, host, config)
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn manager(&self) -> &Arc<PluginManager> {
        &self.manager
    }

    pub fn catalog(&self) -> &Arc<PluginCatalog> {
        &self.catalog
    }

    pub fn permissions(&self) -> &Arc<PermissionStore> {
        &self.permissions
    }

    /// Approval channel the UI answers
    pub fn approvals(&self) -> &Arc<PermissionRequestFlow> {
        &self.approvals
    }

    pub fn settings(&self) -> &Arc<SettingsStore> {
        &self.settings
    }

    pub fn components(&self) -> &ComponentRegistry {
        &self.components
    }

    pub fn agent_events(&self) -> &EventBus<AgentEvent> {
        self.manager.contexts().bus()
    }

    pub fn history(&self) -> &Arc<EventHistory<AgentEvent>> {
        &self.history
    }

    /// Point every plugin at a different repository
    pub fn switch_host(&self, host: Arc<dyn HostAccessors>) {
        self.manager.contexts().rebuild(host);
    }

    /// Make a manifest installable from the builtin source, optionally with
    /// the code run on activation. Returns the plugin id.
    pub fn register_builtin(&self, manifest: Value, module: Option<Arc<dyn PluginModule>>) -> PluginResult<String> {
        let plugin_id = self.catalog.builtins().register(manifest)?;
        if let Some(module) = module {
            self.modules.write().insert(plugin_id.clone(), module);
        }
        Ok(plugin_id)
    }

    /// Make the plugins shipped with gitdock installable and register
    /// their components
    pub fn register_builtins(&self) -> PluginResult<Vec<String>> {
        let ids = builtin::builtin_plugins()
            .into_iter()
            .map(|plugin| self.register_builtin(plugin.manifest, plugin.module))
            .collect::<PluginResult<Vec<_>>>()?;
        builtin::register_components(&self.components);
        Ok(ids)
    }

    /// Render an enabled plugin's component
    pub fn render(&self, plugin_id: &str, props: &Value) -> PluginResult<Value> {
        self.manager.render(&self.components, plugin_id, props)
    }

    fn module_for(&self, plugin_id: &str) -> Option<Arc<dyn PluginModule>> {
        self.modules.read().get(plugin_id).cloned()
    }

    /// Register every installed plugin and reactivate those that were
    /// enabled. Activation failures are recorded, not returned.
    pub async fn restore(&self) -> PluginResult<RestoreReport> {
        let mut report = RestoreReport::default();

        for entry in self.catalog.list() {
            let plugin_id = entry.manifest.id.clone();
            if self.manager.is_registered(&plugin_id) {
                continue;
            }
            self.settings.register_schema(&plugin_id, entry.manifest.settings.clone());
            self.manager.register(entry.manifest, self.module_for(&plugin_id), false).await?;
            report.registered.push(plugin_id.clone());

            if entry.enabled {
                match self.manager.activate(&plugin_id).await {
                    Ok(()) => report.activated.push(plugin_id),
                    Err(e) => report.failed.push((plugin_id, e.to_string())),
                }
            }
        }

        info!(
            "Restored {} plugins ({} active, {} failed)",
            report.registered.len(),
            report.activated.len(),
            report.failed.len()
        );
        Ok(report)
    }

    /// Install and report as an outcome record
    pub async fn install(&self, source: &InstallSource, options: InstallOptions) -> InstallOutcome {
        match self.try_install(source, options).await {
            Ok(plugin_id) => InstallOutcome::installed(plugin_id),
            Err(e) => {
                warn!("Install from {} failed: {}", source, e);
                InstallOutcome::failed(&e)
            }
        }
    }

    /// Install a plugin. Nothing is persisted when the manifest is invalid
    /// or the capability request is refused. A failed activation leaves
    /// the plugin installed and disabled.
    pub async fn try_install(&self, source: &InstallSource, options: InstallOptions) -> PluginResult<String> {
        let manifest = self.catalog.resolve(source).await?;
        let plugin_id = manifest.id.clone();
        if !options.replace && self.catalog.contains(&plugin_id) {
            return Err(PluginError::plugin_already_registered(&plugin_id));
        }

        let dropped = self.permissions.retain(&plugin_id, &manifest.permissions)?;
        if !dropped.is_empty() {
            info!("Plugin '{}' no longer declares {:?}; grants withdrawn", plugin_id, dropped);
        }
        let granted = self.approve(&manifest, options.skip_approval).await?;
        debug!("Plugin '{}' granted {:?}", plugin_id, granted);

        let entry = self.catalog.store(manifest, source.clone(), options.replace)?;
        let was_enabled = self.manager.is_enabled(&plugin_id);
        if self.manager.is_registered(&plugin_id) {
            self.manager.unregister(&plugin_id).await?;
        }

        self.settings.register_schema(&plugin_id, entry.manifest.settings.clone());
        let enable = options.enable || self.config.auto_enable || was_enabled;
        self.manager
            .register(entry.manifest, self.module_for(&plugin_id), enable)
            .await?;
        Ok(plugin_id)
    }

    async fn approve(&self, manifest: &PluginManifest, skip_approval: bool) -> PluginResult<Vec<Capability>> {
        if manifest.permissions.is_empty() {
            return Ok(Vec::new());
        }
        if skip_approval {
            self.permissions.grant_permissions(&manifest.id, &manifest.permissions)?;
            return Ok(manifest.permissions.clone());
        }

        let decision = self
            .approvals
            .request_permissions(&manifest.id, &manifest.name, &manifest.permissions)
            .await;
        if !decision.approved {
            return Err(PluginError::install_failed(format!(
                "capabilities requested by '{}' were not approved",
                manifest.id
            )));
        }
        Ok(decision.granted_permissions.unwrap_or_default())
    }

    /// Deactivate, unregister and remove a plugin along with its grants,
    /// settings and data. Returns false when it was not installed.
    pub async fn uninstall(&self, plugin_id: &str) -> PluginResult<bool> {
        if self.manager.is_registered(plugin_id) {
            self.manager.unregister(plugin_id).await?;
        }
        let removed = self.catalog.uninstall(plugin_id)?;
        self.settings.forget(plugin_id)?;
        self.permissions.revoke_permissions(plugin_id)?;
        Ok(removed)
    }

    pub async fn enable(&self, plugin_id: &str) -> PluginResult<()> {
        self.manager.activate(plugin_id).await
    }

    pub async fn disable(&self, plugin_id: &str) -> PluginResult<()> {
        if !self.manager.is_registered(plugin_id) {
            return Err(PluginError::plugin_not_found(plugin_id));
        }
        self.manager.deactivate(plugin_id).await
    }

    fn installed(&self, plugin_id: &str) -> PluginResult<CatalogEntry> {
        self.catalog
            .get(plugin_id)
            .ok_or_else(|| PluginError::plugin_not_found(plugin_id))
    }

    /// Edit buffer over an installed plugin's settings
    pub fn settings_editor(&self, plugin_id: &str) -> PluginResult<SettingsEditor> {
        let entry = self.installed(plugin_id)?;
        SettingsEditor::open(Arc::clone(&self.settings), plugin_id, entry.manifest.settings)
    }

    /// Validate and save several values at once
    pub fn update_settings(&self, plugin_id: &str, values: IndexMap<String, Value>) -> PluginResult<usize> {
        let mut editor = self.settings_editor(plugin_id)?;
        for (key, value) in values {
            let outcome = editor.set(&key, value)?;
            if let Some(message) = outcome.error {
                return Err(PluginError::validation(key, message));
            }
        }
        editor.save()
    }

    pub fn reset_settings(&self, plugin_id: &str) -> PluginResult<()> {
        let entry = self.installed(plugin_id)?;
        self.settings.reset_all(plugin_id, &entry.manifest.settings)
    }
}
