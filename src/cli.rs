use std::path::PathBuf;
use anyhow::Result;
use clap::{Parser, Subcommand};
use log::debug;
use serde_json::Value;

use crate::plugin::manifest::SourceKind;
use crate::plugin::permissions::Capability;

/// Plugin runtime for the gitdock git client
#[derive(Parser, Debug)]
#[command(name = "gitdock")]
#[command(about = "Install, approve, enable and configure gitdock plugins")]
#[command(version)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Repository exposed to plugins (defaults to the current directory)
    #[arg(short = 'r', long = "repo", global = true, value_name = "PATH")]
    pub repository: Option<PathBuf>,

    /// Directory holding the plugin catalog, grants and settings
    #[arg(long, global = true, value_name = "DIR")]
    pub data_dir: Option<PathBuf>,

    /// Verbose output (debug level logging)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Quiet output (error level logging only)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Debug output (trace level logging)
    #[arg(long, global = true)]
    pub debug: bool,

    /// Log format: text or json
    #[arg(long, global = true, value_name = "FORMAT")]
    pub log_format: Option<String>,

    /// Log file path
    #[arg(long, global = true, value_name = "FILE")]
    pub log_file: Option<PathBuf>,

    /// Log level for the log file
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log_file_level: Option<String>,

    /// Configuration file path
    #[arg(long, global = true, value_name = "FILE")]
    pub config_file: Option<PathBuf>,

    /// Configuration section name
    #[arg(long, global = true, value_name = "SECTION")]
    pub config_name: Option<String>,

    /// Disable coloured output
    #[arg(long, global = true)]
    pub no_color: bool,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// List installed plugins
    List,

    /// Install a plugin from a source
    Install {
        /// Source kind: builtin, git, url or npm
        kind: SourceKind,
        /// Builtin id, repository URL, manifest URL or package name
        location: String,
        /// Enable the plugin once installed
        #[arg(long)]
        enable: bool,
        /// Grant every requested capability without prompting
        #[arg(short, long)]
        yes: bool,
        /// Replace an installed plugin with the same id
        #[arg(long)]
        replace: bool,
    },

    /// Remove a plugin with its grants and settings
    Uninstall { id: String },

    /// Enable an installed plugin
    Enable { id: String },

    /// Disable an installed plugin
    Disable { id: String },

    /// Show or change a plugin's granted capabilities
    Permissions {
        id: String,
        /// Grant a capability
        #[arg(long, value_name = "CAPABILITY")]
        grant: Vec<Capability>,
        /// Revoke a capability
        #[arg(long, value_name = "CAPABILITY")]
        revoke: Vec<Capability>,
        /// Revoke every capability
        #[arg(long, conflicts_with_all = ["grant", "revoke"])]
        revoke_all: bool,
    },

    /// Show or change a plugin's settings
    Settings {
        id: String,
        /// Set a value, as KEY=VALUE (VALUE is JSON, or a plain string)
        #[arg(long = "set", value_name = "KEY=VALUE", value_parser = parse_assignment)]
        set: Vec<(String, Value)>,
        /// Restore declared defaults
        #[arg(long, conflicts_with = "set")]
        reset: bool,
    },

    /// Describe every capability a plugin can request
    Capabilities,
}

pub fn parse_args() -> Args {
    let args = Args::parse();
    debug!("Parsed CLI arguments: {:?}", args);
    args
}

pub fn validate_args(args: &Args) -> Result<()> {
    let level_flags = [args.verbose, args.quiet, args.debug].iter().filter(|&&flag| flag).count();
    if level_flags > 1 {
        anyhow::bail!("Conflicting log level flags: only one of --verbose, --quiet, or --debug may be specified");
    }

    if let Some(format) = &args.log_format {
        if !matches!(format.to_lowercase().as_str(), "text" | "json") {
            anyhow::bail!("Invalid log format '{}'. Valid options: text, json", format);
        }
    }

    if let Some(level) = &args.log_file_level {
        crate::logging::parse_log_level(level)?;
        if args.log_file.is_none() {
            anyhow::bail!("--log-file-level requires --log-file");
        }
    }
    Ok(())
}

/// Parse `KEY=VALUE`; values that are not valid JSON are taken as strings
pub fn parse_assignment(raw: &str) -> std::result::Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", raw))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("missing key in '{}'", raw));
    }
    let value = serde_json::from_str::<Value>(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(argv: &[&str]) -> Args {
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_install_command() {
        let args = parse(&["gitdock", "install", "git", "https://example.com/badges.git", "--enable", "-y"]);
        assert_eq!(args.command, Command::Install {
            kind: SourceKind::Git,
            location: "https://example.com/badges.git".to_string(),
            enable: true,
            yes: true,
            replace: false,
        });
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let args = parse(&["gitdock", "list", "--data-dir", "/tmp/dock", "-v"]);
        assert_eq!(args.data_dir, Some(PathBuf::from("/tmp/dock")));
        assert!(args.verbose);
        assert!(validate_args(&args).is_ok());
    }

    #[test]
    fn test_permissions_command_parses_capabilities() {
        let args = parse(&["gitdock", "permissions", "notes", "--grant", "shell", "--revoke", "network"]);
        match args.command {
            Command::Permissions { grant, revoke, revoke_all, .. } => {
                assert_eq!(grant, vec![Capability::Shell]);
                assert_eq!(revoke, vec![Capability::Network]);
                assert!(!revoke_all);
            }
            other => panic!("unexpected command {:?}", other),
        }

        assert!(Args::try_parse_from(["gitdock", "permissions", "notes", "--grant", "root"]).is_err());
        assert!(Args::try_parse_from(["gitdock", "permissions", "notes", "--grant", "shell", "--revoke-all"]).is_err());
    }

    #[test]
    fn test_settings_assignments() {
        let args = parse(&["gitdock", "settings", "notes", "--set", "limit=5", "--set", "title=Daily notes"]);
        match args.command {
            Command::Settings { set, reset, .. } => {
                assert_eq!(set, vec![
                    ("limit".to_string(), json!(5)),
                    ("title".to_string(), json!("Daily notes")),
                ]);
                assert!(!reset);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_assignment_errors() {
        assert!(parse_assignment("novalue").is_err());
        assert!(parse_assignment("=5").is_err());
        assert_eq!(parse_assignment("flag=true").unwrap(), ("flag".to_string(), json!(true)));
    }

    #[test]
    fn test_validate_args_conflicts() {
        let args = parse(&["gitdock", "list", "-v", "-q"]);
        assert!(validate_args(&args).is_err());

        let args = parse(&["gitdock", "list", "--log-format", "xml"]);
        assert!(validate_args(&args).is_err());

        let args = parse(&["gitdock", "list", "--log-file-level", "debug"]);
        assert!(validate_args(&args).is_err());
    }
}
