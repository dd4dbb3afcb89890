//! Logging
//!
//! `log` facade backend used by the `gitdock` binary. Records go to
//! stderr, a file, or both, as text or one JSON object per line, with
//! separate console and file levels.
//!
//! Records logged by plugins (target `plugin::<id>`) carry the plugin id
//! in the JSON `detail` field.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use anyhow::{Context, Result};
use chrono::Local;
use log::{Level, LevelFilter, Metadata, Record};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::plugin::host::PLUGIN_LOG_TARGET_PREFIX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            _ => Err(format!("Invalid log format: {}. Valid options: text, json", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LogDestination {
    Console,
    File(PathBuf),
    Both(PathBuf),
}

impl LogDestination {
    fn file(&self) -> Option<&Path> {
        match self {
            LogDestination::Console => None,
            LogDestination::File(path) | LogDestination::Both(path) => Some(path),
        }
    }

    fn console(&self) -> bool {
        !matches!(self, LogDestination::File(_))
    }
}

/// One line of JSON output
#[derive(Debug, Serialize, Deserialize)]
pub struct JsonLogEntry {
    pub timestamp: String,
    pub level: String,
    pub target: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub console_level: LevelFilter,
    pub file_level: Option<LevelFilter>,
    pub format: LogFormat,
    pub destination: LogDestination,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            console_level: LevelFilter::Info,
            file_level: None,
            format: LogFormat::Text,
            destination: LogDestination::Console,
        }
    }
}

impl LogConfig {
    /// Most verbose level any destination accepts
    pub fn max_level(&self) -> LevelFilter {
        match self.file_level {
            Some(file_level) if self.destination.file().is_some() => file_level.max(self.console_level),
            _ => self.console_level,
        }
    }
}

pub struct HostLogger {
    config: LogConfig,
    file: Mutex<Option<File>>,
}

impl HostLogger {
    /// Build the logger, opening the log file up front so a bad path is
    /// reported at startup.
    pub fn new(config: LogConfig) -> Result<Self> {
        let file = match config.destination.file() {
            Some(path) => Some(
                OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .with_context(|| format!("Failed to open log file: {}", path.display()))?,
            ),
            None => None,
        };
        Ok(Self {
            config,
            file: Mutex::new(file),
        })
    }

    fn timestamp() -> String {
        Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
    }

    fn format_text(&self, level: Level, target: &str, message: &str) -> String {
        format!("{} [{}] {}: {}", Self::timestamp(), level.as_str(), target, message)
    }

    fn format_json(&self, level: Level, target: &str, message: &str) -> Result<String> {
        let detail = target
            .strip_prefix(PLUGIN_LOG_TARGET_PREFIX)
            .map(|plugin_id| json!({ "plugin": plugin_id }));
        let entry = JsonLogEntry {
            timestamp: Self::timestamp(),
            level: level.as_str().to_string(),
            target: target.to_string(),
            message: message.to_string(),
            detail,
        };
        serde_json::to_string(&entry).context("Failed to serialize log entry")
    }

    fn format(&self, record: &Record) -> String {
        let message = record.args().to_string();
        match self.config.format {
            LogFormat::Text => self.format_text(record.level(), record.target(), &message),
            LogFormat::Json => self
                .format_json(record.level(), record.target(), &message)
                .unwrap_or_else(|_| self.format_text(record.level(), record.target(), &message)),
        }
    }

    fn to_console(&self, level: Level) -> bool {
        self.config.destination.console() && level <= self.config.console_level
    }

    fn to_file(&self, level: Level) -> bool {
        self.config.destination.file().is_some()
            && self.config.file_level.is_some_and(|file_level| level <= file_level)
    }
}

impl log::Log for HostLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        self.to_console(metadata.level()) || self.to_file(metadata.level())
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = self.format(record);

        if self.to_console(record.level()) {
            let _ = writeln!(io::stderr(), "{}", line);
        }
        if self.to_file(record.level()) {
            if let Some(file) = self.file.lock().as_mut() {
                if let Err(e) = writeln!(file, "{}", line) {
                    let _ = writeln!(io::stderr(), "Log file write failed: {}", e);
                }
            }
        }
    }

    fn flush(&self) {
        let _ = io::stderr().flush();
        if let Some(file) = self.file.lock().as_mut() {
            let _ = file.flush();
        }
    }
}

/// Install [`HostLogger`] as the global logger
pub fn init_logger(config: LogConfig) -> Result<()> {
    let max_level = config.max_level();
    let logger = HostLogger::new(config)?;
    log::set_boxed_logger(Box::new(logger)).context("Failed to set global logger")?;
    log::set_max_level(max_level);
    Ok(())
}

pub fn parse_log_level(level: &str) -> Result<LevelFilter> {
    LevelFilter::from_str(level).map_err(|_| {
        anyhow::anyhow!("Invalid log level: {}. Valid levels: error, warn, info, debug, trace, off", level)
    })
}
