//! Plugin Runtime
//!
//! Capability-gated extension host. Plugins declare a manifest, are
//! installed into the catalog, approved for the capabilities they request,
//! registered and activated by the manager, and reach the host only
//! through their per-plugin context.
//!
//! # Example Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use gitdock::events::EventBus;
//! use gitdock::plugin::{
//!     ContextFactory, MemoryStorage, PermissionStore, PluginManager, SettingsStore, UnavailableHost,
//! };
//!
//! # fn main() -> gitdock::plugin::PluginResult<()> {
//! let storage = Arc::new(MemoryStorage::new());
//! let permissions = Arc::new(PermissionStore::load(storage.clone())?);
//! let settings = Arc::new(SettingsStore::new(storage));
//! let contexts = Arc::new(ContextFactory::new(
//!     Arc::new(UnavailableHost),
//!     Arc::clone(&permissions),
//!     settings,
//!     EventBus::new("agents"),
//! ));
//! let manager = PluginManager::new(contexts, permissions);
//! assert!(manager.get_all_registrations().is_empty());
//! # Ok(())
//! # }
//! ```

pub mod builtin;
pub mod catalog;
pub mod components;
pub mod context;
pub mod error;
pub mod host;
pub mod manager;
pub mod manifest;
pub mod panels;
pub mod permissions;
pub mod settings;
pub mod storage;
pub mod sync;

#[cfg(test)]
pub mod tests;

pub use catalog::{
    BuiltinFetcher, CatalogEntry, GitFetcher, InstallOptions, InstallOutcome, ManifestFetcher, NpmFetcher,
    PluginCatalog, UrlFetcher,
};
pub use components::{ComponentKind, ComponentRegistry, PluginComponent, ScopedComponents};
pub use context::{ContextFactory, PluginContext};
pub use error::{PluginError, PluginResult};
pub use host::{
    Branch, ChangeKind, CommandOutput, Commit, FileChange, HostAccessors, LogCrateSink, LogSink, PullRequest,
    UnavailableHost, Worktree, WorkingStatus,
};
pub use manager::{PluginManager, PluginModule, PluginRegistration};
pub use manifest::{
    InstallSource, NavigationItem, PluginManifest, PluginType, SettingDeclaration, SettingType, SourceKind,
};
pub use panels::OpenPanel;
pub use permissions::{
    Capability, PermissionDecision, PermissionRequest, PermissionRequestFlow, PermissionStore, RiskLevel,
};
pub use settings::{SettingValue, SettingsEditor, SettingsStore, ValidationOutcome};
pub use storage::{JsonFileStorage, MemoryStorage, StorageBackend};
pub use sync::RegistrationSync;
