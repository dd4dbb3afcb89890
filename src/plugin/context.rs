//! Plugin Context
//!
//! The capability-scoped facade handed to a plugin's running code, and the
//! factory that builds and caches one facade per plugin id.
//!
//! The facade holds no repository logic: every accessor checks the
//! plugin's current grants and passes through to the injected host. Grants
//! are read at call time, so a revocation applies immediately.

use std::collections::HashMap;
use std::sync::Arc;
use log::{debug, Level};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;

use crate::events::{AgentEvent, EventBus, Subscription, Topic};
use crate::plugin::error::{PluginError, PluginResult};
use crate::plugin::host::{Branch, CommandOutput, Commit, PullRequest, Worktree, WorkingStatus};
use crate::plugin::permissions::{Capability, PermissionStore};
use crate::plugin::settings::SettingsStore;
use crate::plugin::storage::Namespace;

pub use crate::plugin::host::{HostAccessors, LogCrateSink, LogSink};

/// Capability-scoped API object for one plugin
pub struct PluginContext {
    plugin_id: String,
    host: Arc<dyn HostAccessors>,
    permissions: Arc<PermissionStore>,
    settings: Arc<SettingsStore>,
    bus: EventBus<AgentEvent>,
    sink: Arc<dyn LogSink>,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl PluginContext {
    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    /// Whether the plugin currently holds a capability
    pub fn has_permission(&self, capability: Capability) -> bool {
        self.permissions.has_permission(&self.plugin_id, capability)
    }

    fn require(&self, capability: Capability) -> PluginResult<()> {
        if self.has_permission(capability) {
            Ok(())
        } else {
            debug!("Denied '{}' to plugin '{}'", capability, self.plugin_id);
            Err(PluginError::permission_denied(&self.plugin_id, capability))
        }
    }

    /// Repository reads and refreshes
    pub fn api(&self) -> RepositoryApi<'_> {
        RepositoryApi { context: self }
    }

    /// Optional host services: files, shell, network, clipboard, notifications
    pub fn host(&self) -> HostServices<'_> {
        HostServices { context: self }
    }

    /// Plugin-private key-value data
    pub fn storage(&self) -> PluginStorage<'_> {
        PluginStorage { context: self }
    }

    /// Read access to the plugin's settings
    pub fn settings(&self) -> PluginSettings<'_> {
        PluginSettings { context: self }
    }

    /// Event bus subscriptions owned by this context
    pub fn events(&self) -> PluginEvents<'_> {
        PluginEvents { context: self }
    }

    pub fn logger(&self) -> PluginLogger<'_> {
        PluginLogger { context: self }
    }

    /// Cancel every subscription this context opened; returns how many
    pub fn release_subscriptions(&self) -> usize {
        let subscriptions: Vec<Subscription> = self.subscriptions.lock().drain(..).collect();
        let count = subscriptions.len();
        for subscription in subscriptions {
            subscription.unsubscribe();
        }
        count
    }
}

/// Repository-domain accessors
pub struct RepositoryApi<'a> {
    context: &'a PluginContext,
}

impl RepositoryApi<'_> {
    fn host(&self) -> PluginResult<&Arc<dyn HostAccessors>> {
        self.context.require(Capability::ReadRepositoryData)?;
        Ok(&self.context.host)
    }

    pub fn get_branches(&self) -> PluginResult<Vec<Branch>> {
        Ok(self.host()?.branches())
    }

    pub fn get_commits(&self) -> PluginResult<Vec<Commit>> {
        Ok(self.host()?.commits())
    }

    pub fn get_pull_requests(&self) -> PluginResult<Vec<PullRequest>> {
        Ok(self.host()?.pull_requests())
    }

    pub fn get_worktrees(&self) -> PluginResult<Vec<Worktree>> {
        Ok(self.host()?.worktrees())
    }

    pub fn get_working_status(&self) -> PluginResult<Option<WorkingStatus>> {
        Ok(self.host()?.working_status())
    }

    pub async fn refresh_branches(&self) -> PluginResult<Vec<Branch>> {
        self.host()?.refresh_branches().await
    }

    pub async fn refresh_commits(&self) -> PluginResult<Vec<Commit>> {
        self.host()?.refresh_commits().await
    }

    pub async fn refresh_pull_requests(&self) -> PluginResult<Vec<PullRequest>> {
        self.host()?.refresh_pull_requests().await
    }

    pub async fn refresh_worktrees(&self) -> PluginResult<Vec<Worktree>> {
        self.host()?.refresh_worktrees().await
    }

    pub async fn refresh_working_status(&self) -> PluginResult<Option<WorkingStatus>> {
        self.host()?.refresh_working_status().await
    }

    pub async fn checkout_branch(&self, name: &str) -> PluginResult<()> {
        self.context.require(Capability::WriteRepositoryData)?;
        self.context.host.checkout_branch(name).await
    }
}

/// Host services gated by their own capabilities
pub struct HostServices<'a> {
    context: &'a PluginContext,
}

impl HostServices<'_> {
    pub async fn read_file(&self, path: &str) -> PluginResult<String> {
        self.context.require(Capability::ReadFiles)?;
        self.context.host.read_file(path).await
    }

    pub async fn write_file(&self, path: &str, contents: &str) -> PluginResult<()> {
        self.context.require(Capability::WriteFiles)?;
        self.context.host.write_file(path, contents).await
    }

    pub async fn run_command(&self, program: &str, args: &[String]) -> PluginResult<CommandOutput> {
        self.context.require(Capability::Shell)?;
        self.context.host.run_command(program, args).await
    }

    pub async fn fetch_url(&self, url: &str) -> PluginResult<String> {
        self.context.require(Capability::Network)?;
        self.context.host.fetch_url(url).await
    }

    pub async fn write_clipboard(&self, text: &str) -> PluginResult<()> {
        self.context.require(Capability::Clipboard)?;
        self.context.host.write_clipboard(text).await
    }

    pub async fn notify(&self, title: &str, body: &str) -> PluginResult<()> {
        self.context.require(Capability::Notifications)?;
        self.context.host.notify(title, body).await
    }
}

/// The plugin's own data namespace
pub struct PluginStorage<'a> {
    context: &'a PluginContext,
}

impl PluginStorage<'_> {
    pub fn get(&self, key: &str) -> PluginResult<Option<Value>> {
        self.context.settings.get_data(&self.context.plugin_id, key)
    }

    pub fn set(&self, key: &str, value: Value) -> PluginResult<()> {
        self.context.settings.set_data(&self.context.plugin_id, key, value)
    }

    pub fn remove(&self, key: &str) -> PluginResult<()> {
        self.context.settings.remove_data(&self.context.plugin_id, key)
    }

    pub fn keys(&self) -> PluginResult<Vec<String>> {
        self.context.settings.data_keys(&self.context.plugin_id)
    }
}

pub struct PluginSettings<'a> {
    context: &'a PluginContext,
}

impl PluginSettings<'_> {
    /// Effective value of a setting, falling back to its declared default
    pub fn get(&self, key: &str) -> PluginResult<Option<Value>> {
        Ok(self.all()?.shift_remove(key))
    }

    pub fn all(&self) -> PluginResult<Namespace> {
        self.context.settings.effective_values(&self.context.plugin_id)
    }
}

pub struct PluginEvents<'a> {
    context: &'a PluginContext,
}

impl PluginEvents<'_> {
    /// Subscribe to an event type or `"*"`. Returns an id for `off`.
    pub fn on<T, F>(&self, topic: T, handler: F) -> u64
    where
        T: Into<Topic>,
        F: Fn(&AgentEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.track(self.context.bus.on(topic, handler))
    }

    /// Subscribe for a single delivery
    pub fn once<T, F>(&self, topic: T, handler: F) -> u64
    where
        T: Into<Topic>,
        F: Fn(&AgentEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.track(self.context.bus.once(topic, handler))
    }

    fn track(&self, subscription: Subscription) -> u64 {
        let id = subscription.id();
        self.context.subscriptions.lock().push(subscription);
        id
    }

    /// Cancel a subscription opened through this context
    pub fn off(&self, id: u64) -> bool {
        let subscription = {
            let mut subscriptions = self.context.subscriptions.lock();
            subscriptions
                .iter()
                .position(|subscription| subscription.id() == id)
                .map(|index| subscriptions.remove(index))
        };
        subscription.is_some_and(Subscription::unsubscribe)
    }

    /// Number of open subscriptions
    pub fn active(&self) -> usize {
        self.context.subscriptions.lock().len()
    }
}

pub struct PluginLogger<'a> {
    context: &'a PluginContext,
}

impl PluginLogger<'_> {
    pub fn log(&self, level: Level, message: &str) {
        self.context.sink.log(&self.context.plugin_id, level, message);
    }

    pub fn debug(&self, message: &str) {
        self.log(Level::Debug, message);
    }

    pub fn info(&self, message: &str) {
        self.log(Level::Info, message);
    }

    pub fn warn(&self, message: &str) {
        self.log(Level::Warn, message);
    }

    pub fn error(&self, message: &str) {
        self.log(Level::Error, message);
    }
}

/// Builds and caches one context per plugin id.
///
/// Repeated calls for the same id return the same `Arc`, so state held by
/// the facade is never duplicated. Cached contexts are dropped only by
/// `invalidate` or `rebuild`.
pub struct ContextFactory {
    host: RwLock<Arc<dyn HostAccessors>>,
    permissions: Arc<PermissionStore>,
    settings: Arc<SettingsStore>,
    bus: EventBus<AgentEvent>,
    sink: Arc<dyn LogSink>,
    cache: Mutex<HashMap<String, Arc<PluginContext>>>,
}

impl ContextFactory {
    pub fn new(
        host: Arc<dyn HostAccessors>,
        permissions: Arc<PermissionStore>,
        settings: Arc<SettingsStore>,
        bus: EventBus<AgentEvent>,
    ) -> Self {
        Self {
            host: RwLock::new(host),
            permissions,
            settings,
            bus,
            sink: Arc::new(LogCrateSink),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Replace the logger sink used by contexts created afterwards
    pub fn with_log_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Event bus contexts subscribe to
    pub fn bus(&self) -> &EventBus<AgentEvent> {
        &self.bus
    }

    /// Cached context for a plugin, built on first use
    pub fn get_or_create(&self, plugin_id: &str) -> Arc<PluginContext> {
        let mut cache = self.cache.lock();
        if let Some(context) = cache.get(plugin_id) {
            return Arc::clone(context);
        }

        debug!("Building context for plugin '{}'", plugin_id);
        let context = Arc::new(PluginContext {
            plugin_id: plugin_id.to_string(),
            host: self.host.read().clone(),
            permissions: Arc::clone(&self.permissions),
            settings: Arc::clone(&self.settings),
            bus: self.bus.clone(),
            sink: Arc::clone(&self.sink),
            subscriptions: Mutex::new(Vec::new()),
        });
        cache.insert(plugin_id.to_string(), Arc::clone(&context));
        context
    }

    pub fn get(&self, plugin_id: &str) -> Option<Arc<PluginContext>> {
        self.cache.lock().get(plugin_id).cloned()
    }

    /// Drop a cached context and its subscriptions
    pub fn invalidate(&self, plugin_id: &str) -> bool {
        let removed = self.cache.lock().remove(plugin_id);
        match removed {
            Some(context) => {
                let released = context.release_subscriptions();
                debug!("Invalidated context for plugin '{}' ({} subscriptions released)", plugin_id, released);
                true
            }
            None => false,
        }
    }

    /// Swap the host accessors and drop every cached context
    pub fn rebuild(&self, host: Arc<dyn HostAccessors>) {
        *self.host.write() = host;
        let contexts: Vec<Arc<PluginContext>> = self.cache.lock().drain().map(|(_, context)| context).collect();
        for context in &contexts {
            context.release_subscriptions();
        }
        debug!("Rebuilt context factory; dropped {} cached contexts", contexts.len());
    }

    /// Number of cached contexts
    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.lock().is_empty()
    }
}
