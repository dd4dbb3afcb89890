//! Component Registry
//!
//! Maps the opaque component id a manifest declares to a renderable
//! implementation, partitioned by kind so a lookup never hands a widget to
//! code expecting an app. Lookups return `None` on a miss; a missing
//! component is a normal, renderable state.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};
use log::{debug, warn};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::plugin::context::PluginContext;
use crate::plugin::error::{PluginError, PluginResult};
use crate::plugin::manifest::PluginType;

/// Kind of renderable surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentKind {
    App,
    Panel,
    Widget,
}

impl ComponentKind {
    /// Kind a plugin type mounts as; services render nothing
    pub fn for_plugin_type(plugin_type: PluginType) -> Option<Self> {
        match plugin_type {
            PluginType::App => Some(ComponentKind::App),
            PluginType::Panel => Some(ComponentKind::Panel),
            PluginType::Widget => Some(ComponentKind::Widget),
            PluginType::Service => None,
        }
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComponentKind::App => write!(f, "app"),
            ComponentKind::Panel => write!(f, "panel"),
            ComponentKind::Widget => write!(f, "widget"),
        }
    }
}

/// Renderable implementation behind a component id
pub trait PluginComponent: Send + Sync {
    /// Produce a render tree for the host UI from the plugin's context and
    /// the props supplied by the mount point
    fn render(&self, context: &PluginContext, props: &Value) -> PluginResult<Value>;
}

#[derive(Clone)]
struct ComponentEntry {
    kind: ComponentKind,
    component: Arc<dyn PluginComponent>,
}

fn same_component(a: &Arc<dyn PluginComponent>, b: &Arc<dyn PluginComponent>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

/// Id → implementation table
#[derive(Default)]
pub struct ComponentRegistry {
    entries: RwLock<HashMap<String, ComponentEntry>>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a component; returns the implementation it replaced
    pub fn register<S: Into<String>>(
        &self,
        id: S,
        kind: ComponentKind,
        component: Arc<dyn PluginComponent>,
    ) -> Option<Arc<dyn PluginComponent>> {
        self.insert(id.into(), ComponentEntry { kind, component })
            .map(|entry| entry.component)
    }

    fn insert(&self, id: String, entry: ComponentEntry) -> Option<ComponentEntry> {
        debug!("Registering {} component '{}'", entry.kind, id);
        let previous = self.entries.write().insert(id.clone(), entry);
        if let Some(previous) = &previous {
            warn!("Component '{}' was already registered as {}; replaced", id, previous.kind);
        }
        previous
    }

    /// Remove a component; returns false when it was not registered
    pub fn unregister(&self, id: &str) -> bool {
        self.entries.write().remove(id).is_some()
    }

    /// Put back what `component` shadowed, provided it is still the
    /// registered implementation
    fn restore_if_same(
        &self,
        id: &str,
        component: &Arc<dyn PluginComponent>,
        previous: Option<ComponentEntry>,
    ) -> bool {
        let mut entries = self.entries.write();
        match entries.get(id) {
            Some(entry) if same_component(&entry.component, component) => {
                match previous {
                    Some(previous) => entries.insert(id.to_string(), previous),
                    None => entries.remove(id),
                };
                true
            }
            _ => false,
        }
    }

    /// Lookup constrained to a kind
    pub fn get(&self, kind: ComponentKind, id: &str) -> Option<Arc<dyn PluginComponent>> {
        self.entries
            .read()
            .get(id)
            .filter(|entry| entry.kind == kind)
            .map(|entry| Arc::clone(&entry.component))
    }

    pub fn get_app(&self, id: &str) -> Option<Arc<dyn PluginComponent>> {
        self.get(ComponentKind::App, id)
    }

    pub fn get_panel(&self, id: &str) -> Option<Arc<dyn PluginComponent>> {
        self.get(ComponentKind::Panel, id)
    }

    pub fn get_widget(&self, id: &str) -> Option<Arc<dyn PluginComponent>> {
        self.get(ComponentKind::Widget, id)
    }

    /// Lookup for render paths that want a displayable error on a miss
    pub fn resolve(&self, kind: ComponentKind, id: &str) -> PluginResult<Arc<dyn PluginComponent>> {
        self.get(kind, id)
            .ok_or_else(|| PluginError::component_not_found(kind, id))
    }

    /// Kind an id is registered under
    pub fn kind_of(&self, id: &str) -> Option<ComponentKind> {
        self.entries.read().get(id).map(|entry| entry.kind)
    }

    /// Registered ids of a kind, sorted
    pub fn ids(&self, kind: ComponentKind) -> Vec<String> {
        let mut ids: Vec<String> = self
            .entries
            .read()
            .iter()
            .filter(|(_, entry)| entry.kind == kind)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Registration scope that unregisters its components when dropped
    pub fn scoped(&self) -> ScopedComponents<'_> {
        ScopedComponents {
            registry: self,
            owned: Vec::new(),
        }
    }
}

/// Process-wide registry usable outside any mount lifecycle
pub fn global() -> &'static ComponentRegistry {
    static REGISTRY: OnceLock<ComponentRegistry> = OnceLock::new();
    REGISTRY.get_or_init(ComponentRegistry::new)
}

/// Registrations tied to a consumer's lifetime.
///
/// Components registered through the scope are removed from the underlying
/// registry on drop, and whatever they shadowed is registered again. Ids
/// something else has replaced meanwhile are left alone.
pub struct ScopedComponents<'a> {
    registry: &'a ComponentRegistry,
    owned: Vec<(String, Arc<dyn PluginComponent>, Option<ComponentEntry>)>,
}

impl<'a> ScopedComponents<'a> {
    pub fn register<S: Into<String>>(&mut self, id: S, kind: ComponentKind, component: Arc<dyn PluginComponent>) {
        let id = id.into();
        let previous = self.registry.insert(id.clone(), ComponentEntry { kind, component: Arc::clone(&component) });
        self.owned.push((id, component, previous));
    }

    pub fn get_app(&self, id: &str) -> Option<Arc<dyn PluginComponent>> {
        self.registry.get_app(id)
    }

    pub fn get_panel(&self, id: &str) -> Option<Arc<dyn PluginComponent>> {
        self.registry.get_panel(id)
    }

    pub fn get_widget(&self, id: &str) -> Option<Arc<dyn PluginComponent>> {
        self.registry.get_widget(id)
    }

    /// Number of components this scope registered
    pub fn len(&self) -> usize {
        self.owned.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owned.is_empty()
    }
}

impl Drop for ScopedComponents<'_> {
    fn drop(&mut self) {
        while let Some((id, component, previous)) = self.owned.pop() {
            if self.registry.restore_if_same(&id, &component, previous) {
                debug!("Unregistered scoped component '{}'", id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::tests::mocks::StaticComponent;

    fn component(label: &str) -> Arc<dyn PluginComponent> {
        Arc::new(StaticComponent::new(label))
    }

    #[test]
    fn test_lookup_is_partitioned_by_kind() {
        let registry = ComponentRegistry::new();
        registry.register("badge", ComponentKind::Widget, component("badge"));

        assert!(registry.get_widget("badge").is_some());
        assert!(registry.get_app("badge").is_none());
        assert!(registry.get_panel("missing").is_none());
        assert_eq!(registry.kind_of("badge"), Some(ComponentKind::Widget));
    }

    #[test]
    fn test_resolve_reports_component_not_found() {
        let registry = ComponentRegistry::new();
        let err = registry.resolve(ComponentKind::App, "dashboard").err().unwrap();
        assert_eq!(err, PluginError::component_not_found(ComponentKind::App, "dashboard"));
    }

    #[test]
    fn test_register_replaces_and_unregisters() {
        let registry = ComponentRegistry::new();
        assert!(registry.register("chat", ComponentKind::Panel, component("a")).is_none());
        assert!(registry.register("chat", ComponentKind::Panel, component("b")).is_some());
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.ids(ComponentKind::Panel), vec!["chat".to_string()]);

        assert!(registry.unregister("chat"));
        assert!(!registry.unregister("chat"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_scope_unregisters_on_drop() {
        let registry = ComponentRegistry::new();
        registry.register("static", ComponentKind::App, component("static"));
        {
            let mut scope = registry.scoped();
            scope.register("feature", ComponentKind::Widget, component("feature"));
            assert!(scope.get_widget("feature").is_some());
            assert_eq!(scope.len(), 1);
        }

        assert!(registry.get_widget("feature").is_none());
        assert!(registry.get_app("static").is_some());
    }

    #[test]
    fn test_scope_keeps_replacement_registered_elsewhere() {
        let registry = ComponentRegistry::new();
        {
            let mut scope = registry.scoped();
            scope.register("shared", ComponentKind::Widget, component("scoped"));
            registry.register("shared", ComponentKind::Widget, component("replacement"));
        }
        assert!(registry.get_widget("shared").is_some());
    }

    #[test]
    fn test_scope_restores_shadowed_component() {
        let registry = ComponentRegistry::new();
        let original = component("static chat");
        registry.register("chat", ComponentKind::Panel, Arc::clone(&original));
        {
            let mut scope = registry.scoped();
            scope.register("chat", ComponentKind::Panel, component("scoped chat"));
            scope.register("chat", ComponentKind::Widget, component("scoped badge"));
            assert!(scope.get_panel("chat").is_none());
        }

        let restored = registry.get_panel("chat").unwrap();
        assert!(same_component(&restored, &original));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_global_registry_is_shared() {
        assert!(std::ptr::eq(global(), global()));

        let id = "global-registry-test-widget";
        global().register(id, ComponentKind::Widget, component("global"));
        assert!(global().get_widget(id).is_some());
        assert!(global().unregister(id));
        assert!(global().get_widget(id).is_none());
    }

    #[test]
    fn test_kind_for_plugin_type() {
        assert_eq!(ComponentKind::for_plugin_type(PluginType::Panel), Some(ComponentKind::Panel));
        assert_eq!(ComponentKind::for_plugin_type(PluginType::Service), None);
    }
}
