//! Branch summary widget for the branch list.

use serde_json::{json, Value};

use crate::plugin::components::PluginComponent;
use crate::plugin::context::PluginContext;
use crate::plugin::error::{PluginError, PluginResult};

pub const ID: &str = "branch-summary";

/// Slot the widget mounts into, one instance per branch row
pub const SLOT: &str = "branch-list-item";

pub fn manifest() -> Value {
    json!({
        "id": ID,
        "name": "Branch Summary",
        "version": "1.0.0",
        "type": "widget",
        "component": ID,
        "description": "Shows whether a branch is checked out and what it tracks",
        "permissions": ["read-repository-data"],
        "slots": [SLOT],
        "settings": [
            { "key": "show-upstream", "type": "boolean", "label": "Show upstream branch", "default": true }
        ]
    })
}

/// Renders `{ "branch": <name> }` props into a badge description
pub struct BranchSummary;

impl PluginComponent for BranchSummary {
    fn render(&self, context: &PluginContext, props: &Value) -> PluginResult<Value> {
        let name = props
            .get("branch")
            .and_then(Value::as_str)
            .ok_or_else(|| PluginError::validation("branch", "prop is required"))?;
        let branches = context.api().get_branches()?;
        let branch = branches.iter().find(|branch| branch.name == name);
        let show_upstream = context
            .settings()
            .get("show-upstream")?
            .and_then(|value| value.as_bool())
            .unwrap_or(true);

        Ok(json!({
            "type": "badge",
            "branch": name,
            "known": branch.is_some(),
            "head": branch.is_some_and(|branch| branch.is_head),
            "upstream": branch.and_then(|branch| branch.upstream.clone()).filter(|_| show_upstream),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use crate::events::EventBus;
    use crate::plugin::context::ContextFactory;
    use crate::plugin::permissions::{Capability, PermissionStore};
    use crate::plugin::settings::SettingsStore;
    use crate::plugin::storage::MemoryStorage;
    use crate::plugin::tests::mocks::MockHost;

    fn contexts() -> (ContextFactory, Arc<PermissionStore>) {
        let storage = Arc::new(MemoryStorage::new());
        let permissions = Arc::new(PermissionStore::load(storage.clone()).unwrap());
        let factory = ContextFactory::new(
            Arc::new(MockHost::with_branches(&["main", "feature"])),
            Arc::clone(&permissions),
            Arc::new(SettingsStore::new(storage)),
            EventBus::new("agents"),
        );
        (factory, permissions)
    }

    #[test]
    fn test_renders_badge() {
        let (factory, permissions) = contexts();
        permissions.grant_permissions(ID, &[Capability::ReadRepositoryData]).unwrap();
        let context = factory.get_or_create(ID);

        let tree = BranchSummary.render(&context, &json!({ "branch": "main" })).unwrap();
        assert_eq!(tree["head"], json!(true));
        assert_eq!(tree["known"], json!(true));

        let tree = BranchSummary.render(&context, &json!({ "branch": "gone" })).unwrap();
        assert_eq!(tree["known"], json!(false));
    }

    #[test]
    fn test_render_needs_repository_access() {
        let (factory, _permissions) = contexts();
        let context = factory.get_or_create(ID);

        let err = BranchSummary.render(&context, &json!({ "branch": "main" })).unwrap_err();
        assert_eq!(err, PluginError::permission_denied(ID, Capability::ReadRepositoryData));
        assert!(BranchSummary.render(&context, &json!({})).is_err());
    }
}
