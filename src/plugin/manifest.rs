//! Plugin Manifest
//!
//! Static declarative metadata describing a plugin: identity, kind,
//! requested capabilities, settings schema and the component it renders.
//! A manifest is immutable once loaded; everything mutable about a plugin
//! lives in its registration or in the stores.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::plugin::error::{PluginError, PluginResult};
use crate::plugin::permissions::Capability;
use crate::plugin::settings;

/// Kind of plugin, which decides where its component is mounted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginType {
    App,
    Panel,
    Widget,
    Service,
}

impl PluginType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PluginType::App => "app",
            PluginType::Panel => "panel",
            PluginType::Widget => "widget",
            PluginType::Service => "service",
        }
    }
}

impl fmt::Display for PluginType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PluginType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "app" => Ok(PluginType::App),
            "panel" => Ok(PluginType::Panel),
            "widget" => Ok(PluginType::Widget),
            "service" => Ok(PluginType::Service),
            _ => Err(format!("Unknown plugin type: {}", s)),
        }
    }
}

/// Value type of a declared setting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettingType {
    String,
    Number,
    Boolean,
    Select,
    Multiselect,
    Color,
}

/// One entry of a plugin's settings schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingDeclaration {
    pub key: String,

    #[serde(rename = "type")]
    pub setting_type: SettingType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Declared default; `null` means no default
    #[serde(default)]
    pub default: Value,

    #[serde(default)]
    pub required: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,

    /// Allowed values for `select`, `multiselect` and constrained strings
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<Value>,
}

impl SettingDeclaration {
    pub fn new<S: Into<String>>(key: S, setting_type: SettingType, default: Value) -> Self {
        Self {
            key: key.into(),
            setting_type,
            label: None,
            description: None,
            default,
            required: false,
            min: None,
            max: None,
            options: Vec::new(),
        }
    }

    pub fn with_range(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    pub fn with_options<I, V>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.options = options.into_iter().map(Into::into).collect();
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// Navigation entry contributed by an app plugin
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavigationItem {
    pub id: String,
    pub label: String,
}

/// Where a plugin is installed from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Builtin,
    Git,
    Url,
    Npm,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Builtin => write!(f, "builtin"),
            SourceKind::Git => write!(f, "git"),
            SourceKind::Url => write!(f, "url"),
            SourceKind::Npm => write!(f, "npm"),
        }
    }
}

impl FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "builtin" => Ok(SourceKind::Builtin),
            "git" => Ok(SourceKind::Git),
            "url" => Ok(SourceKind::Url),
            "npm" => Ok(SourceKind::Npm),
            _ => Err(format!("Unknown install source: {}", s)),
        }
    }
}

/// Install source: repository URL, manifest URL, package name, or the id
/// of a builtin plugin
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstallSource {
    pub kind: SourceKind,
    #[serde(default)]
    pub location: String,
}

impl InstallSource {
    pub fn new<S: Into<String>>(kind: SourceKind, location: S) -> Self {
        Self { kind, location: location.into() }
    }

    pub fn builtin<S: Into<String>>(plugin_id: S) -> Self {
        Self::new(SourceKind::Builtin, plugin_id)
    }

    pub fn git<S: Into<String>>(url: S) -> Self {
        Self::new(SourceKind::Git, url)
    }

    pub fn url<S: Into<String>>(url: S) -> Self {
        Self::new(SourceKind::Url, url)
    }

    pub fn npm<S: Into<String>>(package: S) -> Self {
        Self::new(SourceKind::Npm, package)
    }
}

impl fmt::Display for InstallSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.location.is_empty() {
            write!(f, "{}", self.kind)
        } else {
            write!(f, "{}:{}", self.kind, self.location)
        }
    }
}

/// Validated plugin manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginManifest {
    pub id: String,
    pub name: String,
    pub version: String,

    #[serde(rename = "type")]
    pub plugin_type: PluginType,

    /// Component id resolved through the component registry; empty for services
    #[serde(default)]
    pub component: String,

    #[serde(default)]
    pub permissions: Vec<Capability>,

    #[serde(default)]
    pub settings: Vec<SettingDeclaration>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub navigation: Vec<NavigationItem>,

    /// Extension points a widget fills, in declared order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub slots: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,
}

const REQUIRED_FIELDS: [&str; 4] = ["id", "name", "version", "type"];

impl PluginManifest {
    /// Parse manifest JSON text
    pub fn from_json(text: &str) -> PluginResult<Self> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| PluginError::invalid_manifest(format!("not valid JSON: {}", e)))?;
        Self::from_value(&value)
    }

    /// Parse and validate a manifest document.
    ///
    /// Missing required fields and unknown plugin types are
    /// `InvalidManifest`; an unknown capability tag is a
    /// `PermissionDeclaration` error.
    pub fn from_value(value: &Value) -> PluginResult<Self> {
        let object = value
            .as_object()
            .ok_or_else(|| PluginError::invalid_manifest("manifest must be a JSON object"))?;

        for field in REQUIRED_FIELDS {
            match object.get(field) {
                Some(Value::String(s)) if !s.trim().is_empty() => {}
                Some(Value::String(_)) => {
                    return Err(PluginError::invalid_manifest(format!("field '{}' must not be empty", field)));
                }
                Some(_) => {
                    return Err(PluginError::invalid_manifest(format!("field '{}' must be a string", field)));
                }
                None => {
                    return Err(PluginError::invalid_manifest(format!("missing required field '{}'", field)));
                }
            }
        }

        let id = object.get("id").and_then(Value::as_str).unwrap_or_default();
        let declared_type = object.get("type").and_then(Value::as_str).unwrap_or_default();
        declared_type
            .parse::<PluginType>()
            .map_err(PluginError::invalid_manifest)?;

        let permissions = parse_permissions(id, object.get("permissions"))?;

        let mut normalized: Map<String, Value> = object.clone();
        normalized.insert("permissions".to_string(), serde_json::to_value(&permissions)?);

        let manifest: PluginManifest = serde_json::from_value(Value::Object(normalized))
            .map_err(|e| PluginError::invalid_manifest(format!("{}: {}", id, e)))?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Structural checks beyond field presence
    pub fn validate(&self) -> PluginResult<()> {
        if !is_valid_id(&self.id) {
            return Err(PluginError::invalid_manifest(format!(
                "plugin id '{}' may only contain lowercase letters, digits, '.', '_' and '-'",
                self.id
            )));
        }
        if self.name.trim().is_empty() || self.version.trim().is_empty() {
            return Err(PluginError::invalid_manifest(format!("{}: name and version are required", self.id)));
        }
        if self.plugin_type != PluginType::Service && self.component.trim().is_empty() {
            return Err(PluginError::invalid_manifest(format!(
                "{}: {} plugins must declare a component",
                self.id, self.plugin_type
            )));
        }

        let mut keys = HashSet::new();
        for declaration in &self.settings {
            if declaration.key.trim().is_empty() {
                return Err(PluginError::invalid_manifest(format!("{}: setting with empty key", self.id)));
            }
            if !keys.insert(declaration.key.as_str()) {
                return Err(PluginError::invalid_manifest(format!(
                    "{}: duplicate setting '{}'",
                    self.id, declaration.key
                )));
            }
            if matches!(declaration.setting_type, SettingType::Select | SettingType::Multiselect)
                && declaration.options.is_empty()
            {
                return Err(PluginError::invalid_manifest(format!(
                    "{}: setting '{}' must declare options",
                    self.id, declaration.key
                )));
            }
            if !declaration.default.is_null() {
                if let Some(error) = settings::validate(declaration, &declaration.default).error {
                    return Err(PluginError::invalid_manifest(format!(
                        "{}: default of setting '{}' is invalid: {}",
                        self.id, declaration.key, error
                    )));
                }
            }
        }

        Ok(())
    }

    /// Declaration of a setting key
    pub fn setting(&self, key: &str) -> Option<&SettingDeclaration> {
        self.settings.iter().find(|declaration| declaration.key == key)
    }

    /// Whether the plugin fills a slot
    pub fn declares_slot(&self, slot: &str) -> bool {
        self.slots.iter().any(|s| s == slot)
    }

    /// Whether the plugin requests a capability
    pub fn requests(&self, capability: Capability) -> bool {
        self.permissions.contains(&capability)
    }
}

fn parse_permissions(plugin_id: &str, value: Option<&Value>) -> PluginResult<Vec<Capability>> {
    let tags = match value {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(tags)) => tags,
        Some(_) => return Err(PluginError::invalid_manifest("field 'permissions' must be an array")),
    };

    let mut permissions = Vec::with_capacity(tags.len());
    for tag in tags {
        let tag = tag
            .as_str()
            .ok_or_else(|| PluginError::invalid_manifest("permissions must be strings"))?;
        let capability = tag
            .parse::<Capability>()
            .map_err(|_| PluginError::permission_declaration(plugin_id, tag))?;
        if !permissions.contains(&capability) {
            permissions.push(capability);
        }
    }
    Ok(permissions)
}

fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn widget_manifest() -> Value {
        json!({
            "id": "branch-badges",
            "name": "Branch Badges",
            "version": "1.2.0",
            "type": "widget",
            "component": "branch-badge",
            "permissions": ["read-repository-data", "shell"],
            "slots": ["branch-list-item"],
            "settings": [
                {"key": "style", "type": "select", "default": "pill", "options": ["pill", "dot"]},
                {"key": "accent", "type": "color", "default": "#ff8800"}
            ]
        })
    }

    #[test]
    fn test_parse_valid_manifest() {
        let manifest = PluginManifest::from_value(&widget_manifest()).unwrap();
        assert_eq!(manifest.plugin_type, PluginType::Widget);
        assert_eq!(manifest.permissions, vec![Capability::ReadRepositoryData, Capability::Shell]);
        assert!(manifest.declares_slot("branch-list-item"));
        assert_eq!(manifest.setting("accent").unwrap().setting_type, SettingType::Color);
    }

    #[test]
    fn test_missing_required_field() {
        let mut value = widget_manifest();
        value.as_object_mut().unwrap().remove("version");

        let err = PluginManifest::from_value(&value).unwrap_err();
        assert!(matches!(err, PluginError::InvalidManifest { .. }));
        assert!(err.to_string().contains("version"));
    }

    #[test]
    fn test_unknown_type_is_invalid_manifest() {
        let mut value = widget_manifest();
        value["type"] = json!("daemon");
        assert!(matches!(
            PluginManifest::from_value(&value),
            Err(PluginError::InvalidManifest { .. })
        ));
    }

    #[test]
    fn test_unknown_permission_is_declaration_error() {
        let mut value = widget_manifest();
        value["permissions"] = json!(["read-files", "telepathy"]);

        let err = PluginManifest::from_value(&value).unwrap_err();
        assert_eq!(err, PluginError::permission_declaration("branch-badges", "telepathy"));
    }

    #[test]
    fn test_id_charset() {
        let mut value = widget_manifest();
        value["id"] = json!("Branch Badges");
        assert!(PluginManifest::from_value(&value).is_err());
    }

    #[test]
    fn test_service_without_component() {
        let value = json!({"id": "sync", "name": "Sync", "version": "0.1.0", "type": "service"});
        let manifest = PluginManifest::from_value(&value).unwrap();
        assert!(manifest.component.is_empty());
        assert!(manifest.permissions.is_empty());

        let mut widget = widget_manifest();
        widget.as_object_mut().unwrap().remove("component");
        assert!(PluginManifest::from_value(&widget).is_err());
    }

    #[test]
    fn test_settings_schema_checks() {
        let mut duplicate = widget_manifest();
        duplicate["settings"] = json!([
            {"key": "a", "type": "boolean", "default": true},
            {"key": "a", "type": "boolean", "default": false}
        ]);
        assert!(PluginManifest::from_value(&duplicate).is_err());

        let mut no_options = widget_manifest();
        no_options["settings"] = json!([{"key": "mode", "type": "select"}]);
        assert!(PluginManifest::from_value(&no_options).is_err());

        let mut bad_default = widget_manifest();
        bad_default["settings"] = json!([{"key": "accent", "type": "color", "default": "orange"}]);
        let err = PluginManifest::from_value(&bad_default).unwrap_err();
        assert!(err.to_string().contains("accent"));
    }

    #[test]
    fn test_serialized_form_round_trips() {
        let manifest = PluginManifest::from_value(&widget_manifest()).unwrap();
        let value = serde_json::to_value(&manifest).unwrap();
        assert_eq!(value["type"], "widget");
        assert_eq!(PluginManifest::from_value(&value).unwrap(), manifest);
    }

    #[test]
    fn test_install_source_wire_format() {
        let source: InstallSource = serde_json::from_value(json!({"kind": "builtin"})).unwrap();
        assert_eq!(source.kind, SourceKind::Builtin);
        assert!(source.location.is_empty());

        let git = InstallSource::git("https://example.com/plugin.git");
        assert_eq!(git.to_string(), "git:https://example.com/plugin.git");
        assert_eq!("npm".parse::<SourceKind>().unwrap(), SourceKind::Npm);
    }
}
