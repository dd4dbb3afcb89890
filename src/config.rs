//! Configuration
//!
//! TOML configuration flattened to `section -> key -> string`, with
//! `base` as the fallback section and `--config-name` selecting an
//! override section.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use anyhow::{Context, Result};
use log::{debug, info};
use toml::Value;

use crate::events::DEFAULT_HISTORY_LIMIT;
use crate::plugin::manager::DEFAULT_ACTIVATION_TIMEOUT;
use crate::plugin::permissions::DEFAULT_REQUEST_TIMEOUT;

/// Environment variable naming an explicit configuration file
pub const CONFIG_ENV_VAR: &str = "GITDOCK_CONFIG";

/// section -> key -> value
pub type Configuration = HashMap<String, HashMap<String, String>>;

pub struct ConfigManager {
    config: Configuration,
    config_file_path: Option<PathBuf>,
    selected_section: Option<String>,
}

impl ConfigManager {
    pub fn from_config(config: Configuration) -> Self {
        Self {
            config,
            config_file_path: None,
            selected_section: None,
        }
    }

    /// Load the first configuration file found by discovery, or an empty
    /// configuration when there is none.
    pub fn load() -> Result<Self> {
        for path in discover_config_files() {
            debug!("Checking for config at {}", path.display());
            if path.is_file() {
                return Self::load_from_file(path);
            }
        }

        info!("No configuration file found, using defaults");
        Ok(Self::from_config(Configuration::new()))
    }

    pub fn load_from_file(path: PathBuf) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config = parse_toml_config(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        info!("Loaded configuration from {}", path.display());
        Ok(Self {
            config,
            config_file_path: Some(path),
            selected_section: None,
        })
    }

    pub fn config_file_path(&self) -> Option<&PathBuf> {
        self.config_file_path.as_ref()
    }

    /// Lookup order: selected section, then `section`, then `base`
    pub fn get_value(&self, section: &str, key: &str) -> Option<&String> {
        if let Some(selected) = &self.selected_section {
            if let Some(value) = self.config.get(selected).and_then(|s| s.get(key)) {
                return Some(value);
            }
        }

        self.config
            .get(section)
            .and_then(|s| s.get(key))
            .or_else(|| self.config.get("base").and_then(|s| s.get(key)))
    }

    pub fn select_section(&mut self, section: String) {
        debug!("Selecting configuration section '{}'", section);
        self.selected_section = Some(section);
    }

    pub fn get_bool(&self, section: &str, key: &str) -> Result<Option<bool>> {
        match self.get_value(section, key) {
            Some(value) => match value.to_lowercase().as_str() {
                "true" => Ok(Some(true)),
                "false" => Ok(Some(false)),
                _ => Err(anyhow::anyhow!("Invalid boolean value for {}.{}: {}", section, key, value)),
            },
            None => Ok(None),
        }
    }

    pub fn get_u64(&self, section: &str, key: &str) -> Result<Option<u64>> {
        self.get_value(section, key)
            .map(|value| {
                value
                    .parse::<u64>()
                    .with_context(|| format!("Invalid number for {}.{}: {}", section, key, value))
            })
            .transpose()
    }

    pub fn get_log_level(&self, section: &str, key: &str) -> Result<Option<log::LevelFilter>> {
        match self.get_value(section, key) {
            Some(value) => Ok(Some(crate::logging::parse_log_level(value)?)),
            None => Ok(None),
        }
    }

    pub fn get_path(&self, section: &str, key: &str) -> Option<PathBuf> {
        self.get_value(section, key).map(|value| expand_home(value))
    }

    /// Typed `[runtime]` settings, validated
    pub fn runtime_config(&self) -> Result<RuntimeConfig> {
        let mut config = RuntimeConfig::default();

        if let Some(dir) = self.get_path("runtime", "data-dir") {
            config.data_dir = dir;
        }
        if let Some(secs) = self.get_u64("runtime", "permission-timeout-secs")? {
            config.permission_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.get_u64("runtime", "activation-timeout-secs")? {
            config.activation_timeout = Duration::from_secs(secs);
        }
        if let Some(limit) = self.get_u64("runtime", "history-limit")? {
            config.history_limit = limit as usize;
        }
        if let Some(auto_enable) = self.get_bool("runtime", "auto-enable")? {
            config.auto_enable = auto_enable;
        }

        config.validate().context("Runtime configuration validation failed")?;
        Ok(config)
    }
}

/// Settings for the plugin host
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeConfig {
    /// Root of the JSON file storage
    pub data_dir: PathBuf,
    /// Maximum wait for an answer to a permission request
    pub permission_timeout: Duration,
    /// Maximum time a plugin may spend activating
    pub activation_timeout: Duration,
    /// Entries kept in each event history
    pub history_limit: usize,
    /// Enable plugins straight after install
    pub auto_enable: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            permission_timeout: DEFAULT_REQUEST_TIMEOUT,
            activation_timeout: DEFAULT_ACTIVATION_TIMEOUT,
            history_limit: DEFAULT_HISTORY_LIMIT,
            auto_enable: false,
        }
    }
}

impl RuntimeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.data_dir.as_os_str().is_empty() {
            anyhow::bail!("data-dir must not be empty");
        }
        if self.permission_timeout.is_zero() {
            anyhow::bail!("permission-timeout-secs must be greater than 0");
        }
        if self.activation_timeout.is_zero() {
            anyhow::bail!("activation-timeout-secs must be greater than 0");
        }
        if self.history_limit == 0 {
            anyhow::bail!("history-limit must be greater than 0");
        }
        Ok(())
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join("gitdock"))
        .unwrap_or_else(|| PathBuf::from(".gitdock"))
}

fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

/// Candidate configuration files, highest precedence first
fn discover_config_files() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    if let Ok(env_path) = env::var(CONFIG_ENV_VAR) {
        paths.push(PathBuf::from(env_path));
    }
    if let Some(config_dir) = dirs::config_dir() {
        paths.push(config_dir.join("gitdock").join("config.toml"));
    }
    if let Some(home_dir) = dirs::home_dir() {
        paths.push(home_dir.join(".gitdock.toml"));
    }
    paths.push(PathBuf::from("./.gitdock.toml"));

    debug!("Config discovery paths: {:?}", paths);
    paths
}

fn parse_toml_config(content: &str) -> Result<Configuration> {
    let root: Value = content.parse().context("Failed to parse TOML content")?;

    let mut config = Configuration::new();
    if let Value::Table(table) = root {
        flatten_toml_table(&table, "", &mut config);
    }
    Ok(config)
}

/// Nested tables become dotted section names; top-level scalars land in `base`
fn flatten_toml_table(table: &toml::Table, prefix: &str, config: &mut Configuration) {
    for (key, value) in table {
        match value {
            Value::Table(subtable) => {
                let section = if prefix.is_empty() { key.clone() } else { format!("{}.{}", prefix, key) };
                let (tables, scalars): (Vec<_>, Vec<_>) =
                    subtable.iter().partition(|(_, v)| matches!(v, Value::Table(_)));
                if !scalars.is_empty() {
                    let entry = config.entry(section.clone()).or_default();
                    for (subkey, subvalue) in scalars {
                        entry.insert(subkey.clone(), toml_value_to_string(subvalue));
                    }
                }
                if !tables.is_empty() {
                    flatten_toml_table(subtable, &section, config);
                }
            }
            scalar if prefix.is_empty() => {
                config
                    .entry("base".to_string())
                    .or_default()
                    .insert(key.clone(), toml_value_to_string(scalar));
            }
            _ => {}
        }
    }
}

fn toml_value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Integer(i) => i.to_string(),
        Value::Float(f) => f.to_string(),
        Value::Boolean(b) => b.to_string(),
        other => other.to_string(),
    }
}
