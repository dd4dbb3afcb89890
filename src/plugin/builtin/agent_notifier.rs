//! Agent notifier: desktop notifications when a coding agent finishes or fails.

use std::sync::{Arc, Weak};
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::events::AgentEvent;
use crate::plugin::context::PluginContext;
use crate::plugin::manager::PluginModule;

pub const ID: &str = "agent-notifier";

const ON_COMPLETION: &str = "notify-on-completion";
const ON_FAILURE: &str = "notify-on-failure";

pub fn manifest() -> Value {
    json!({
        "id": ID,
        "name": "Agent Notifier",
        "version": "1.0.0",
        "type": "service",
        "description": "Notifies when a coding agent session completes or fails",
        "permissions": ["notifications"],
        "settings": [
            { "key": ON_COMPLETION, "type": "boolean", "label": "Notify on completion", "default": true },
            { "key": ON_FAILURE, "type": "boolean", "label": "Notify on failure", "default": true }
        ]
    })
}

pub struct AgentNotifier;

#[async_trait]
impl PluginModule for AgentNotifier {
    async fn activate(&self, context: Arc<PluginContext>) -> anyhow::Result<()> {
        let weak = Arc::downgrade(&context);
        for topic in [AgentEvent::COMPLETED, AgentEvent::FAILED] {
            let weak = weak.clone();
            context.events().on(topic, move |event| notify(&weak, event));
        }
        context.logger().info("watching agent sessions");
        Ok(())
    }
}

fn notify(context: &Weak<PluginContext>, event: &AgentEvent) -> anyhow::Result<()> {
    let Some(context) = context.upgrade() else {
        return Ok(());
    };
    let (setting, title, body) = match event {
        AgentEvent::Completed { session_id, summary } => (
            ON_COMPLETION,
            "Agent finished",
            summary.clone().unwrap_or_else(|| format!("Session {} completed", session_id)),
        ),
        AgentEvent::Failed { session_id, error } => (ON_FAILURE, "Agent failed", format!("Session {}: {}", session_id, error)),
        _ => return Ok(()),
    };

    let wanted = context.settings().get(setting)?.and_then(|value| value.as_bool()).unwrap_or(true);
    if !wanted {
        return Ok(());
    }

    let runtime = tokio::runtime::Handle::try_current()?;
    runtime.spawn(async move {
        if let Err(e) = context.host().notify(title, &body).await {
            context.logger().warn(&format!("notification failed: {}", e));
        }
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use crate::plugin::context::ContextFactory;
    use crate::plugin::manifest::PluginManifest;
    use crate::plugin::permissions::{Capability, PermissionStore};
    use crate::plugin::settings::SettingsStore;
    use crate::plugin::storage::MemoryStorage;
    use crate::plugin::tests::mocks::MockHost;
    use indexmap::IndexMap;

    struct Fixture {
        host: Arc<MockHost>,
        contexts: ContextFactory,
        settings: Arc<SettingsStore>,
        permissions: Arc<PermissionStore>,
    }

    fn fixture() -> Fixture {
        let storage = Arc::new(MemoryStorage::new());
        let permissions = Arc::new(PermissionStore::load(storage.clone()).unwrap());
        let settings = Arc::new(SettingsStore::new(storage));
        let manifest = PluginManifest::from_value(&manifest()).unwrap();
        settings.register_schema(ID, manifest.settings);
        let host = Arc::new(MockHost::default());
        let contexts = ContextFactory::new(host.clone(), Arc::clone(&permissions), Arc::clone(&settings), EventBus::new("agents"));
        Fixture { host, contexts, settings, permissions }
    }

    async fn settle(host: &MockHost, expected: usize) {
        for _ in 0..20 {
            if host.notifications().len() >= expected {
                break;
            }
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_notifies_on_agent_events() {
        let f = fixture();
        f.permissions.grant_permissions(ID, &[Capability::Notifications]).unwrap();
        AgentNotifier.activate(f.contexts.get_or_create(ID)).await.unwrap();

        f.contexts.bus().emit(&AgentEvent::completed("s1"));
        f.contexts.bus().emit(&AgentEvent::failed("s2", "exit 1"));
        f.contexts.bus().emit(&AgentEvent::started("s3", "claude"));
        settle(&f.host, 2).await;

        assert_eq!(f.host.notifications(), vec!["Agent finished".to_string(), "Agent failed".to_string()]);
    }

    #[tokio::test]
    async fn test_respects_settings() {
        let f = fixture();
        f.permissions.grant_permissions(ID, &[Capability::Notifications]).unwrap();
        let mut values = IndexMap::new();
        values.insert(ON_COMPLETION.to_string(), json!(false));
        f.settings.set_multiple(ID, values).unwrap();
        AgentNotifier.activate(f.contexts.get_or_create(ID)).await.unwrap();

        f.contexts.bus().emit(&AgentEvent::completed("s1"));
        f.contexts.bus().emit(&AgentEvent::failed("s2", "exit 1"));
        settle(&f.host, 1).await;

        assert_eq!(f.host.notifications(), vec!["Agent failed".to_string()]);
    }

    #[tokio::test]
    async fn test_revoked_notifications_are_not_sent() {
        let f = fixture();
        AgentNotifier.activate(f.contexts.get_or_create(ID)).await.unwrap();

        assert_eq!(f.contexts.bus().emit(&AgentEvent::completed("s1")), 1);
        settle(&f.host, 1).await;

        assert!(f.host.notifications().is_empty());
    }
}
