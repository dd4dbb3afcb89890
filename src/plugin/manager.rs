//! Plugin Manager
//!
//! Owns every plugin registration and drives its lifecycle:
//!
//! ```text
//! unregistered -> registered(disabled) <-> registered(enabled) -> unregistered
//! ```
//!
//! Lifecycle changes are announced on a [`LifecycleEvent`] bus. Events are
//! published after internal locks are released, so subscribers may call
//! back into the manager.

use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use indexmap::IndexMap;
use log::{debug, error, info, warn};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::events::{EventBus, LifecycleEvent, Subscription, Topic};
use crate::plugin::catalog::PluginCatalog;
use crate::plugin::components::{ComponentKind, ComponentRegistry};
use crate::plugin::context::{ContextFactory, PluginContext};
use crate::plugin::error::{PluginError, PluginResult};
use crate::plugin::manifest::{PluginManifest, PluginType};
use crate::plugin::panels::{OpenPanel, PanelTracker};
use crate::plugin::permissions::{Capability, PermissionStore};

/// Default bound on a plugin's activation logic
pub const DEFAULT_ACTIVATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Code run when a plugin is enabled or disabled
#[async_trait]
pub trait PluginModule: Send + Sync {
    /// Start the plugin. An error leaves the plugin disabled with the
    /// message recorded on its registration.
    async fn activate(&self, context: Arc<PluginContext>) -> anyhow::Result<()>;

    /// Stop the plugin. Errors are logged; the plugin is disabled anyway.
    async fn deactivate(&self, _context: Arc<PluginContext>) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Live record of a registered plugin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginRegistration {
    pub plugin: PluginManifest,
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PluginRegistration {
    pub fn id(&self) -> &str {
        &self.plugin.id
    }
}

struct RegistrationEntry {
    registration: PluginRegistration,
    module: Option<Arc<dyn PluginModule>>,
    activating: bool,
}

struct AppsCache {
    key: Vec<String>,
    apps: Arc<Vec<PluginManifest>>,
}

/// Registration owner and lifecycle driver
pub struct PluginManager {
    registrations: RwLock<IndexMap<String, RegistrationEntry>>,
    contexts: Arc<ContextFactory>,
    permissions: Arc<PermissionStore>,
    catalog: Option<Arc<PluginCatalog>>,
    lifecycle: EventBus<LifecycleEvent>,
    panels: PanelTracker,
    apps_cache: Mutex<Option<AppsCache>>,
    activation_timeout: Duration,
}

impl PluginManager {
    pub fn new(contexts: Arc<ContextFactory>, permissions: Arc<PermissionStore>) -> Self {
        Self {
            registrations: RwLock::new(IndexMap::new()),
            contexts,
            permissions,
            catalog: None,
            lifecycle: EventBus::new("lifecycle"),
            panels: PanelTracker::new(),
            apps_cache: Mutex::new(None),
            activation_timeout: DEFAULT_ACTIVATION_TIMEOUT,
        }
    }

    /// Persist enabled flags to the catalog on activate/deactivate
    pub fn with_catalog(mut self, catalog: Arc<PluginCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn with_activation_timeout(mut self, timeout: Duration) -> Self {
        self.activation_timeout = timeout;
        self
    }

    pub fn contexts(&self) -> &Arc<ContextFactory> {
        &self.contexts
    }

    /// Bus carrying lifecycle notifications
    pub fn lifecycle(&self) -> &EventBus<LifecycleEvent> {
        &self.lifecycle
    }

    /// Subscribe to lifecycle notifications (`"*"` for all of them)
    pub fn subscribe<T, F>(&self, topic: T, handler: F) -> Subscription
    where
        T: Into<Topic>,
        F: Fn(&LifecycleEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.lifecycle.on(topic, handler)
    }

    /// Register a plugin, disabled unless `auto_enable` is set.
    ///
    /// A failing auto-enable does not fail the registration; the error is
    /// recorded on the registration instead.
    pub async fn register(
        &self,
        manifest: PluginManifest,
        module: Option<Arc<dyn PluginModule>>,
        auto_enable: bool,
    ) -> PluginResult<()> {
        let plugin_id = manifest.id.clone();
        {
            let mut registrations = self.registrations.write();
            if registrations.contains_key(&plugin_id) {
                return Err(PluginError::plugin_already_registered(&plugin_id));
            }
            registrations.insert(plugin_id.clone(), RegistrationEntry {
                registration: PluginRegistration {
                    plugin: manifest,
                    enabled: false,
                    error: None,
                },
                module,
                activating: false,
            });
        }

        info!("Registered plugin '{}'", plugin_id);
        self.lifecycle.emit(&LifecycleEvent::Registered { plugin_id: plugin_id.clone() });

        if auto_enable {
            if let Err(e) = self.activate(&plugin_id).await {
                debug!("Auto-enable of '{}' recorded as failed: {}", plugin_id, e);
            }
        }
        Ok(())
    }

    /// Enable a plugin: build its context and run its activation logic.
    ///
    /// Activating an enabled plugin is a no-op. On failure the plugin stays
    /// disabled, the message is recorded on the registration and an
    /// `ActivationFailed` error is returned. A later call is a fresh attempt;
    /// success clears the recorded error.
    pub async fn activate(&self, plugin_id: &str) -> PluginResult<()> {
        let module = {
            let mut registrations = self.registrations.write();
            let entry = registrations
                .get_mut(plugin_id)
                .ok_or_else(|| PluginError::plugin_not_found(plugin_id))?;
            if entry.registration.enabled {
                debug!("Plugin '{}' is already active", plugin_id);
                return Ok(());
            }
            if entry.activating {
                return Err(PluginError::invalid_state(format!("plugin '{}' is already activating", plugin_id)));
            }
            entry.activating = true;
            entry.module.clone()
        };

        let context = self.contexts.get_or_create(plugin_id);
        let result = match module {
            Some(module) => self.run_activation(plugin_id, module, Arc::clone(&context)).await,
            None => Ok(()),
        };

        {
            let mut registrations = self.registrations.write();
            let entry = registrations
                .get_mut(plugin_id)
                .ok_or_else(|| PluginError::plugin_not_found(plugin_id))?;
            entry.activating = false;
            match &result {
                Ok(()) => {
                    entry.registration.enabled = true;
                    entry.registration.error = None;
                }
                Err(message) => {
                    entry.registration.enabled = false;
                    entry.registration.error = Some(message.clone());
                }
            }
        }

        match result {
            Ok(()) => {
                self.persist_enabled(plugin_id, true);
                info!("Activated plugin '{}'", plugin_id);
                self.lifecycle.emit(&LifecycleEvent::Activated { plugin_id: plugin_id.to_string() });
                Ok(())
            }
            Err(message) => {
                self.contexts.invalidate(plugin_id);
                error!("Activation of plugin '{}' failed: {}", plugin_id, message);
                self.lifecycle.emit(&LifecycleEvent::ActivationFailed {
                    plugin_id: plugin_id.to_string(),
                    message: message.clone(),
                });
                Err(PluginError::activation_failed(plugin_id, message))
            }
        }
    }

    async fn run_activation(
        &self,
        plugin_id: &str,
        module: Arc<dyn PluginModule>,
        context: Arc<PluginContext>,
    ) -> Result<(), String> {
        // A separate task keeps a panicking plugin from unwinding into the host.
        let task = tokio::spawn(async move { module.activate(context).await });
        let abort = task.abort_handle();

        match tokio::time::timeout(self.activation_timeout, task).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(e))) => Err(format!("{:#}", e)),
            Ok(Err(join_error)) if join_error.is_panic() => Err("activation panicked".to_string()),
            Ok(Err(join_error)) => Err(format!("activation was cancelled: {}", join_error)),
            Err(_) => {
                abort.abort();
                warn!("Activation of plugin '{}' exceeded {:?}", plugin_id, self.activation_timeout);
                Err(format!("activation timed out after {}s", self.activation_timeout.as_secs_f64()))
            }
        }
    }

    /// Disable a plugin. Unknown and already disabled plugins are a no-op.
    pub async fn deactivate(&self, plugin_id: &str) -> PluginResult<()> {
        let module = {
            let mut registrations = self.registrations.write();
            let Some(entry) = registrations.get_mut(plugin_id) else {
                debug!("Deactivate of unknown plugin '{}' ignored", plugin_id);
                return Ok(());
            };
            if !entry.registration.enabled {
                return Ok(());
            }
            entry.registration.enabled = false;
            entry.module.clone()
        };

        if let Some(module) = module {
            let context = self.contexts.get_or_create(plugin_id);
            match tokio::time::timeout(self.activation_timeout, module.deactivate(context)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Plugin '{}' failed to deactivate cleanly: {:#}", plugin_id, e),
                Err(_) => warn!("Deactivation of plugin '{}' timed out", plugin_id),
            }
        }

        let closed = self.panels.close_for(plugin_id);
        if closed > 0 {
            debug!("Closed {} panels of plugin '{}'", closed, plugin_id);
        }
        self.contexts.invalidate(plugin_id);
        self.persist_enabled(plugin_id, false);

        info!("Deactivated plugin '{}'", plugin_id);
        self.lifecycle.emit(&LifecycleEvent::Deactivated { plugin_id: plugin_id.to_string() });
        Ok(())
    }

    /// Remove a registration, deactivating it first when enabled
    pub async fn unregister(&self, plugin_id: &str) -> PluginResult<()> {
        if !self.registrations.read().contains_key(plugin_id) {
            return Err(PluginError::plugin_not_found(plugin_id));
        }
        self.deactivate(plugin_id).await?;

        if self.registrations.write().shift_remove(plugin_id).is_none() {
            return Err(PluginError::plugin_not_found(plugin_id));
        }
        self.contexts.invalidate(plugin_id);

        info!("Unregistered plugin '{}'", plugin_id);
        self.lifecycle.emit(&LifecycleEvent::Unregistered { plugin_id: plugin_id.to_string() });
        Ok(())
    }

    fn persist_enabled(&self, plugin_id: &str, enabled: bool) {
        let Some(catalog) = &self.catalog else {
            return;
        };
        if catalog.contains(plugin_id) {
            if let Err(e) = catalog.set_enabled(plugin_id, enabled) {
                warn!("Could not persist enabled={} for plugin '{}': {}", enabled, plugin_id, e);
            }
        }
    }

    pub fn get_registration(&self, plugin_id: &str) -> Option<PluginRegistration> {
        self.registrations
            .read()
            .get(plugin_id)
            .map(|entry| entry.registration.clone())
    }

    /// Snapshot of every registration in registration order
    pub fn get_all_registrations(&self) -> Vec<PluginRegistration> {
        self.registrations
            .read()
            .values()
            .map(|entry| entry.registration.clone())
            .collect()
    }

    pub fn is_registered(&self, plugin_id: &str) -> bool {
        self.registrations.read().contains_key(plugin_id)
    }

    pub fn is_enabled(&self, plugin_id: &str) -> bool {
        self.registrations
            .read()
            .get(plugin_id)
            .is_some_and(|entry| entry.registration.enabled)
    }

    /// Enabled widgets filling a slot, in registration order
    pub fn get_widgets_for_slot(&self, slot: &str) -> Vec<PluginManifest> {
        self.registrations
            .read()
            .values()
            .map(|entry| &entry.registration)
            .filter(|registration| {
                registration.enabled
                    && registration.plugin.plugin_type == PluginType::Widget
                    && registration.plugin.declares_slot(slot)
            })
            .map(|registration| registration.plugin.clone())
            .collect()
    }

    /// Enabled app plugins sorted by name. The returned `Arc` stays the same
    /// until the set of enabled apps changes.
    pub fn enabled_apps(&self) -> Arc<Vec<PluginManifest>> {
        let mut apps: Vec<PluginManifest> = self
            .registrations
            .read()
            .values()
            .filter(|entry| entry.registration.enabled && entry.registration.plugin.plugin_type == PluginType::App)
            .map(|entry| entry.registration.plugin.clone())
            .collect();
        apps.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        let key: Vec<String> = apps.iter().map(|app| app.id.clone()).collect();

        let mut cache = self.apps_cache.lock();
        match cache.as_ref() {
            Some(cached) if cached.key == key && *cached.apps == apps => Arc::clone(&cached.apps),
            _ => {
                let apps = Arc::new(apps);
                *cache = Some(AppsCache { key, apps: Arc::clone(&apps) });
                apps
            }
        }
    }

    /// Declared capabilities the plugin does not currently hold
    pub fn missing_permissions(&self, plugin_id: &str) -> PluginResult<Vec<Capability>> {
        let declared = self
            .get_registration(plugin_id)
            .ok_or_else(|| PluginError::plugin_not_found(plugin_id))?
            .plugin
            .permissions;
        Ok(self.permissions.missing_permissions(plugin_id, &declared))
    }

    /// Open an instance of an enabled panel plugin
    pub fn open_panel(&self, plugin_id: &str, data: Option<Value>) -> PluginResult<OpenPanel> {
        let registration = self
            .get_registration(plugin_id)
            .ok_or_else(|| PluginError::plugin_not_found(plugin_id))?;
        if registration.plugin.plugin_type != PluginType::Panel {
            return Err(PluginError::invalid_state(format!("plugin '{}' is not a panel", plugin_id)));
        }
        if !registration.enabled {
            return Err(PluginError::invalid_state(format!("plugin '{}' is not enabled", plugin_id)));
        }
        Ok(self.panels.open(plugin_id, data))
    }

    pub fn close_panel(&self, instance_id: u64) -> bool {
        self.panels.close(instance_id)
    }

    pub fn close_panels_for(&self, plugin_id: &str) -> usize {
        self.panels.close_for(plugin_id)
    }

    pub fn close_all_panels(&self) -> usize {
        self.panels.close_all()
    }

    pub fn open_panels(&self) -> Vec<OpenPanel> {
        self.panels.list()
    }

    /// Resolve an enabled plugin's component and render it with the
    /// plugin's context
    pub fn render(&self, components: &ComponentRegistry, plugin_id: &str, props: &Value) -> PluginResult<Value> {
        let registration = self
            .get_registration(plugin_id)
            .ok_or_else(|| PluginError::plugin_not_found(plugin_id))?;
        if !registration.enabled {
            return Err(PluginError::invalid_state(format!("plugin '{}' is not enabled", plugin_id)));
        }
        let kind = ComponentKind::for_plugin_type(registration.plugin.plugin_type)
            .ok_or_else(|| PluginError::invalid_state(format!("service plugin '{}' has no component", plugin_id)))?;

        let component = components.resolve(kind, &registration.plugin.component)?;
        let context = self.contexts.get_or_create(plugin_id);
        component.render(&context, props)
    }
}
