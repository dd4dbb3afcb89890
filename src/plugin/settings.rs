//! Plugin Settings
//!
//! Schema-validated per-plugin settings persistence, the plugin's private
//! data namespace, and an edit buffer that keeps unsaved values apart from
//! what is stored.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use indexmap::IndexMap;
use log::{debug, warn};
use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::plugin::error::{PluginError, PluginResult};
use crate::plugin::manifest::{SettingDeclaration, SettingType};
use crate::plugin::storage::{Namespace, StorageBackend};

/// Result of validating a candidate setting value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ValidationOutcome {
    fn ok() -> Self {
        Self { valid: true, error: None }
    }

    fn fail<S: Into<String>>(error: S) -> Self {
        Self { valid: false, error: Some(error.into()) }
    }
}

fn is_colour(candidate: &str) -> bool {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^#[0-9a-fA-F]{6}$").ok())
        .as_ref()
        .is_some_and(|pattern| pattern.is_match(candidate))
}

fn describe(value: &Value) -> String {
    match value {
        Value::String(s) => format!("'{}'", s),
        other => other.to_string(),
    }
}

/// Check a candidate value against its declaration
pub fn validate(declaration: &SettingDeclaration, value: &Value) -> ValidationOutcome {
    if value.is_null() {
        return if declaration.required {
            ValidationOutcome::fail("a value is required")
        } else {
            ValidationOutcome::ok()
        };
    }

    let in_options = |candidate: &Value| declaration.options.iter().any(|option| option == candidate);

    match declaration.setting_type {
        SettingType::String => match value {
            Value::String(_) if declaration.options.is_empty() || in_options(value) => ValidationOutcome::ok(),
            Value::String(_) => ValidationOutcome::fail(format!("{} is not one of the allowed options", describe(value))),
            _ => ValidationOutcome::fail("expected a string"),
        },
        SettingType::Number => {
            let Some(number) = value.as_f64() else {
                return ValidationOutcome::fail("expected a number");
            };
            if let Some(min) = declaration.min.filter(|min| number < *min) {
                return ValidationOutcome::fail(format!("must be at least {}", min));
            }
            if let Some(max) = declaration.max.filter(|max| number > *max) {
                return ValidationOutcome::fail(format!("must be at most {}", max));
            }
            ValidationOutcome::ok()
        }
        SettingType::Boolean => match value {
            Value::Bool(_) => ValidationOutcome::ok(),
            _ => ValidationOutcome::fail("expected true or false"),
        },
        SettingType::Select => {
            if in_options(value) {
                ValidationOutcome::ok()
            } else {
                ValidationOutcome::fail(format!("{} is not one of the allowed options", describe(value)))
            }
        }
        SettingType::Multiselect => {
            let Some(items) = value.as_array() else {
                return ValidationOutcome::fail("expected a list of options");
            };
            match items.iter().find(|item| !in_options(item)) {
                Some(item) => ValidationOutcome::fail(format!("{} is not one of the allowed options", describe(item))),
                None => ValidationOutcome::ok(),
            }
        }
        SettingType::Color => match value.as_str() {
            Some(s) if is_colour(s) => ValidationOutcome::ok(),
            _ => ValidationOutcome::fail(format!("{} is not a colour of the form #rrggbb", describe(value))),
        },
    }
}

fn settings_namespace(plugin_id: &str) -> String {
    format!("settings/{}", plugin_id)
}

fn data_namespace(plugin_id: &str) -> String {
    format!("data/{}", plugin_id)
}

/// Per-plugin persisted settings and plugin-private data
pub struct SettingsStore {
    storage: Arc<dyn StorageBackend>,
    schemas: RwLock<HashMap<String, Vec<SettingDeclaration>>>,
}

impl SettingsStore {
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self {
            storage,
            schemas: RwLock::new(HashMap::new()),
        }
    }

    /// Register the declarations writes for a plugin are validated against
    pub fn register_schema(&self, plugin_id: &str, declarations: Vec<SettingDeclaration>) {
        debug!("Registered {} setting declarations for plugin '{}'", declarations.len(), plugin_id);
        self.schemas.write().insert(plugin_id.to_string(), declarations);
    }

    /// Declarations registered for a plugin
    pub fn schema(&self, plugin_id: &str) -> Vec<SettingDeclaration> {
        self.schemas.read().get(plugin_id).cloned().unwrap_or_default()
    }

    /// Drop a plugin's schema, settings and data
    pub fn forget(&self, plugin_id: &str) -> PluginResult<()> {
        self.schemas.write().remove(plugin_id);
        self.storage.clear(&settings_namespace(plugin_id))?;
        self.storage.clear(&data_namespace(plugin_id))
    }

    /// Validate a candidate value against its declaration
    pub fn validate(declaration: &SettingDeclaration, value: &Value) -> ValidationOutcome {
        validate(declaration, value)
    }

    /// Persisted values; keys never written are absent
    pub fn get_all(&self, plugin_id: &str) -> PluginResult<Namespace> {
        self.storage.entries(&settings_namespace(plugin_id))
    }

    pub fn get(&self, plugin_id: &str, key: &str) -> PluginResult<Option<Value>> {
        self.storage.get(&settings_namespace(plugin_id), key)
    }

    /// Persisted values merged over declared defaults, in declaration order
    pub fn effective_values(&self, plugin_id: &str) -> PluginResult<Namespace> {
        let mut stored = self.get_all(plugin_id)?;
        let mut values = Namespace::new();
        for declaration in self.schema(plugin_id) {
            let value = stored
                .shift_remove(&declaration.key)
                .unwrap_or_else(|| declaration.default.clone());
            values.insert(declaration.key, value);
        }
        values.extend(stored);
        Ok(values)
    }

    /// Persist a batch of values. Every value is validated first; a single
    /// invalid or undeclared key fails the whole batch and nothing is written.
    pub fn set_multiple(&self, plugin_id: &str, values: IndexMap<String, Value>) -> PluginResult<()> {
        {
            let schemas = self.schemas.read();
            if let Some(schema) = schemas.get(plugin_id) {
                for (key, value) in &values {
                    let declaration = schema
                        .iter()
                        .find(|declaration| &declaration.key == key)
                        .ok_or_else(|| PluginError::validation(key, "no such setting"))?;
                    if let Some(error) = validate(declaration, value).error {
                        return Err(PluginError::validation(key, error));
                    }
                }
            } else {
                warn!("No settings schema registered for plugin '{}'; storing values unchecked", plugin_id);
            }
        }

        self.storage.set_many(&settings_namespace(plugin_id), values.into_iter().collect())
    }

    /// Drop every persisted override so each declared key falls back to
    /// its current default
    pub fn reset_all(&self, plugin_id: &str, declarations: &[SettingDeclaration]) -> PluginResult<()> {
        debug!("Reverting {} settings of plugin '{}' to defaults", declarations.len(), plugin_id);
        self.storage.clear(&settings_namespace(plugin_id))
    }

    pub fn get_data(&self, plugin_id: &str, key: &str) -> PluginResult<Option<Value>> {
        self.storage.get(&data_namespace(plugin_id), key)
    }

    pub fn set_data(&self, plugin_id: &str, key: &str, value: Value) -> PluginResult<()> {
        self.storage.set(&data_namespace(plugin_id), key, value)
    }

    pub fn remove_data(&self, plugin_id: &str, key: &str) -> PluginResult<()> {
        self.storage.remove(&data_namespace(plugin_id), key)
    }

    pub fn data_keys(&self, plugin_id: &str) -> PluginResult<Vec<String>> {
        Ok(self.storage.entries(&data_namespace(plugin_id))?.into_keys().collect())
    }
}

/// One entry of the edit buffer
#[derive(Debug, Clone, PartialEq)]
pub struct SettingValue {
    pub value: Value,
    pub dirty: bool,
    pub validation_error: Option<String>,
}

/// In-memory edit buffer over a plugin's settings. Edits stay local until
/// `save` persists them in one batch.
pub struct SettingsEditor {
    store: Arc<SettingsStore>,
    plugin_id: String,
    declarations: Vec<SettingDeclaration>,
    values: IndexMap<String, SettingValue>,
}

impl SettingsEditor {
    pub fn open(store: Arc<SettingsStore>, plugin_id: &str, declarations: Vec<SettingDeclaration>) -> PluginResult<Self> {
        let mut editor = Self {
            store,
            plugin_id: plugin_id.to_string(),
            declarations,
            values: IndexMap::new(),
        };
        editor.reload()?;
        Ok(editor)
    }

    fn reload(&mut self) -> PluginResult<()> {
        let mut stored = self.store.get_all(&self.plugin_id)?;
        self.values = self
            .declarations
            .iter()
            .map(|declaration| {
                let value = stored
                    .shift_remove(&declaration.key)
                    .unwrap_or_else(|| declaration.default.clone());
                (declaration.key.clone(), SettingValue { value, dirty: false, validation_error: None })
            })
            .collect();
        Ok(())
    }

    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    pub fn value(&self, key: &str) -> Option<&SettingValue> {
        self.values.get(key)
    }

    pub fn values(&self) -> &IndexMap<String, SettingValue> {
        &self.values
    }

    /// Values as they would be saved, edits included
    pub fn effective_values(&self) -> Namespace {
        self.values
            .iter()
            .map(|(key, entry)| (key.clone(), entry.value.clone()))
            .collect()
    }

    pub fn is_dirty(&self) -> bool {
        self.values.values().any(|entry| entry.dirty)
    }

    pub fn has_errors(&self) -> bool {
        self.values.values().any(|entry| entry.validation_error.is_some())
    }

    /// Buffer an edit. The value is kept even when invalid so the UI can
    /// show it next to its error; the returned outcome reports validity.
    pub fn set(&mut self, key: &str, value: Value) -> PluginResult<ValidationOutcome> {
        let declaration = self
            .declarations
            .iter()
            .find(|declaration| declaration.key == key)
            .ok_or_else(|| PluginError::validation(key, "no such setting"))?;
        let outcome = validate(declaration, &value);

        let entry = self
            .values
            .entry(key.to_string())
            .or_insert_with(|| SettingValue { value: Value::Null, dirty: false, validation_error: None });
        entry.value = value;
        entry.dirty = true;
        entry.validation_error = outcome.error.clone();
        Ok(outcome)
    }

    /// Persist dirty values. Refused while any value is invalid.
    /// Returns the number of values written.
    pub fn save(&mut self) -> PluginResult<usize> {
        if let Some((key, entry)) = self.values.iter().find(|(_, entry)| entry.validation_error.is_some()) {
            let message = entry.validation_error.clone().unwrap_or_default();
            return Err(PluginError::validation(key, message));
        }

        let dirty: IndexMap<String, Value> = self
            .values
            .iter()
            .filter(|(_, entry)| entry.dirty)
            .map(|(key, entry)| (key.clone(), entry.value.clone()))
            .collect();
        let count = dirty.len();
        if count == 0 {
            return Ok(0);
        }

        self.store.set_multiple(&self.plugin_id, dirty)?;
        self.values.values_mut().for_each(|entry| entry.dirty = false);
        Ok(count)
    }

    /// Drop unsaved edits
    pub fn discard(&mut self) -> PluginResult<()> {
        self.reload()
    }

    /// Reset persisted values to declared defaults and drop edits
    pub fn reset(&mut self) -> PluginResult<()> {
        self.store.reset_all(&self.plugin_id, &self.declarations)?;
        self.reload()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::storage::MemoryStorage;
    use proptest::prelude::*;
    use serde_json::json;

    fn declarations() -> Vec<SettingDeclaration> {
        vec![
            SettingDeclaration::new("refresh", SettingType::Number, json!(30)).with_range(Some(5.0), Some(300.0)),
            SettingDeclaration::new("style", SettingType::Select, json!("pill")).with_options(["pill", "dot"]),
            SettingDeclaration::new("accent", SettingType::Color, json!("#336699")),
            SettingDeclaration::new("compact", SettingType::Boolean, json!(false)),
            SettingDeclaration::new("labels", SettingType::Multiselect, json!([])).with_options(["bug", "feature"]),
        ]
    }

    fn store() -> Arc<SettingsStore> {
        let store = SettingsStore::new(Arc::new(MemoryStorage::new()));
        store.register_schema("p", declarations());
        Arc::new(store)
    }

    #[test]
    fn test_validation_rules() {
        let decls = declarations();
        assert!(validate(&decls[0], &json!(60)).valid);
        assert!(!validate(&decls[0], &json!(1)).valid);
        assert!(!validate(&decls[0], &json!("60")).valid);
        assert!(validate(&decls[1], &json!("dot")).valid);
        assert!(!validate(&decls[1], &json!("square")).valid);
        assert!(validate(&decls[2], &json!("#A0b1C2")).valid);
        assert!(!validate(&decls[2], &json!("#abc")).valid);
        assert!(!validate(&decls[3], &json!("true")).valid);
        assert!(validate(&decls[4], &json!(["bug"])).valid);
        assert!(!validate(&decls[4], &json!(["bug", "chore"])).valid);

        let constrained = SettingDeclaration::new("branch", SettingType::String, json!("main")).with_options(["main", "dev"]);
        assert!(!validate(&constrained, &json!("release")).valid);
    }

    #[test]
    fn test_required_rejects_null() {
        let optional = SettingDeclaration::new("token", SettingType::String, Value::Null);
        assert!(validate(&optional, &Value::Null).valid);
        let required = optional.required();
        assert_eq!(validate(&required, &Value::Null).error.as_deref(), Some("a value is required"));
    }

    #[test]
    fn test_settings_round_trip_and_reset() {
        let store = store();
        store.set_multiple("p", IndexMap::from([("refresh".to_string(), json!(120))])).unwrap();
        assert_eq!(store.get_all("p").unwrap()["refresh"], json!(120));

        store.reset_all("p", &declarations()).unwrap();
        assert!(store.get_all("p").unwrap().is_empty());
        assert_eq!(store.get("p", "refresh").unwrap(), None);
        let values = store.effective_values("p").unwrap();
        assert_eq!(values["refresh"], json!(30));
        assert_eq!(values["style"], json!("pill"));
    }

    #[test]
    fn test_reset_follows_later_default_changes() {
        let store = store();
        store.set_multiple("p", IndexMap::from([("refresh".to_string(), json!(120))])).unwrap();
        store.reset_all("p", &declarations()).unwrap();

        let mut updated = declarations();
        updated[0].default = json!(45);
        store.register_schema("p", updated);

        assert_eq!(store.effective_values("p").unwrap()["refresh"], json!(45));
    }

    #[test]
    fn test_invalid_batch_persists_nothing() {
        let store = store();
        let batch = IndexMap::from([
            ("refresh".to_string(), json!(60)),
            ("accent".to_string(), json!("orange")),
        ]);

        let err = store.set_multiple("p", batch).unwrap_err();
        assert!(matches!(err, PluginError::Validation { ref key, .. } if key == "accent"));
        assert!(store.get_all("p").unwrap().is_empty());

        let unknown = IndexMap::from([("nope".to_string(), json!(1))]);
        assert!(store.set_multiple("p", unknown).is_err());
    }

    #[test]
    fn test_effective_values_fall_back_to_defaults() {
        let store = store();
        store.set_multiple("p", IndexMap::from([("compact".to_string(), json!(true))])).unwrap();

        let values = store.effective_values("p").unwrap();
        assert_eq!(values["compact"], json!(true));
        assert_eq!(values["refresh"], json!(30));
        assert_eq!(values.keys().next().map(String::as_str), Some("refresh"));
    }

    #[test]
    fn test_data_namespace_is_separate() {
        let store = store();
        store.set_data("p", "refresh", json!("cursor")).unwrap();
        assert!(store.get_all("p").unwrap().is_empty());
        assert_eq!(store.data_keys("p").unwrap(), vec!["refresh".to_string()]);

        store.remove_data("p", "refresh").unwrap();
        assert_eq!(store.get_data("p", "refresh").unwrap(), None);
    }

    #[test]
    fn test_editor_dirty_save_discard() {
        let store = store();
        let mut editor = SettingsEditor::open(Arc::clone(&store), "p", declarations()).unwrap();
        assert!(!editor.is_dirty());

        assert!(editor.set("refresh", json!(90)).unwrap().valid);
        assert!(editor.value("refresh").unwrap().dirty);
        assert!(store.get("p", "refresh").unwrap().is_none());

        assert_eq!(editor.save().unwrap(), 1);
        assert!(!editor.is_dirty());
        assert_eq!(store.get("p", "refresh").unwrap(), Some(json!(90)));

        editor.set("compact", json!(true)).unwrap();
        editor.discard().unwrap();
        assert_eq!(editor.value("compact").unwrap().value, json!(false));
    }

    #[test]
    fn test_editor_blocks_save_on_error() {
        let store = store();
        let mut editor = SettingsEditor::open(Arc::clone(&store), "p", declarations()).unwrap();

        let outcome = editor.set("accent", json!("blue")).unwrap();
        assert!(!outcome.valid);
        assert!(editor.has_errors());
        assert!(matches!(editor.save(), Err(PluginError::Validation { .. })));
        assert!(store.get_all("p").unwrap().is_empty());

        assert!(editor.set("unknown", json!(1)).is_err());

        editor.set("accent", json!("#000000")).unwrap();
        assert_eq!(editor.save().unwrap(), 1);
    }

    #[test]
    fn test_editor_reset() {
        let store = store();
        store.set_multiple("p", IndexMap::from([("style".to_string(), json!("dot"))])).unwrap();
        let mut editor = SettingsEditor::open(Arc::clone(&store), "p", declarations()).unwrap();
        assert_eq!(editor.value("style").unwrap().value, json!("dot"));

        editor.reset().unwrap();
        assert_eq!(editor.effective_values()["style"], json!("pill"));
        assert!(!editor.value("style").unwrap().dirty);
        assert!(store.get_all("p").unwrap().is_empty());
    }

    proptest! {
        #[test]
        fn prop_hex_colours_are_accepted(colour in "#[0-9a-fA-F]{6}") {
            let declaration = SettingDeclaration::new("c", SettingType::Color, Value::Null);
            prop_assert!(validate(&declaration, &json!(colour)).valid);
        }

        #[test]
        fn prop_non_colours_are_rejected(text in "[g-z ]{0,8}") {
            let declaration = SettingDeclaration::new("c", SettingType::Color, Value::Null);
            prop_assert!(!validate(&declaration, &json!(text)).valid);
        }

        #[test]
        fn prop_number_bounds(n in -1000.0f64..1000.0) {
            let declaration = SettingDeclaration::new("n", SettingType::Number, Value::Null)
                .with_range(Some(-10.0), Some(10.0));
            prop_assert_eq!(validate(&declaration, &json!(n)).valid, (-10.0..=10.0).contains(&n));
        }
    }
}
