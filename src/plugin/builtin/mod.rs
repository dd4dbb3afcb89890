//! Built-in Plugins
//!
//! Plugins shipped with the host and installable from the `builtin` source.

pub mod agent_notifier;
pub mod branch_summary;

use std::sync::Arc;
use serde_json::Value;

use crate::plugin::components::{ComponentKind, ComponentRegistry};
use crate::plugin::manager::PluginModule;

pub use agent_notifier::AgentNotifier;
pub use branch_summary::BranchSummary;

/// Manifest and activation code of a built-in plugin
pub struct BuiltinPlugin {
    pub manifest: Value,
    pub module: Option<Arc<dyn PluginModule>>,
}

pub fn builtin_plugins() -> Vec<BuiltinPlugin> {
    vec![
        BuiltinPlugin {
            manifest: agent_notifier::manifest(),
            module: Some(Arc::new(AgentNotifier)),
        },
        BuiltinPlugin {
            manifest: branch_summary::manifest(),
            module: None,
        },
    ]
}

/// Register the components rendered by built-in plugins
pub fn register_components(registry: &ComponentRegistry) {
    registry.register(branch_summary::ID, ComponentKind::Widget, Arc::new(BranchSummary));
}
