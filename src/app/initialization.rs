//! Application initialization and configuration

use std::str::FromStr;
use anyhow::Result;
use log::{debug, LevelFilter};

use crate::config::{ConfigManager, RuntimeConfig};
use crate::{cli, display, logging};

pub fn load_configuration(args: &cli::Args) -> Result<ConfigManager> {
    let mut manager = match &args.config_file {
        Some(config_file) => {
            debug!("Loading configuration from explicit file: {}", config_file.display());
            ConfigManager::load_from_file(config_file.clone())?
        }
        None => ConfigManager::load()?,
    };

    if let Some(section_name) = &args.config_name {
        debug!("Selecting configuration section: {}", section_name);
        manager.select_section(section_name.clone());
    }
    Ok(manager)
}

/// Combine CLI flags with the `[logging]` section (falling back to `[base]`).
/// Flags win.
pub fn configure_logging(args: &cli::Args, config: &ConfigManager) -> Result<logging::LogConfig> {
    let console_level = if args.debug {
        LevelFilter::Trace
    } else if args.verbose {
        LevelFilter::Debug
    } else if args.quiet {
        LevelFilter::Error
    } else {
        config.get_log_level("logging", "console-level")?.unwrap_or(LevelFilter::Info)
    };

    let format = match args.log_format.as_deref().or(config.get_value("logging", "log-format").map(String::as_str)) {
        Some(format) => logging::LogFormat::from_str(format).map_err(anyhow::Error::msg)?,
        None => logging::LogFormat::Text,
    };

    let file_level = match &args.log_file_level {
        Some(level) => Some(logging::parse_log_level(level)?),
        None => config.get_log_level("logging", "file-level")?,
    };

    let destination = match args.log_file.clone().or_else(|| config.get_path("logging", "log-file")) {
        Some(path) => logging::LogDestination::Both(path),
        None => logging::LogDestination::Console,
    };
    let file_level = match destination {
        logging::LogDestination::Console => None,
        _ => Some(file_level.unwrap_or(console_level)),
    };

    debug!("Logging: console {:?}, file {:?}, format {:?}", console_level, file_level, format);
    Ok(logging::LogConfig {
        console_level,
        file_level,
        format,
        destination,
    })
}

/// Runtime settings from the `[runtime]` section, with `--data-dir` applied
pub fn runtime_config(args: &cli::Args, config: &ConfigManager) -> Result<RuntimeConfig> {
    let mut runtime = config.runtime_config()?;
    if let Some(data_dir) = &args.data_dir {
        runtime.data_dir = data_dir.clone();
    }
    debug!("Plugin data directory: {}", runtime.data_dir.display());
    Ok(runtime)
}

pub fn create_colour_manager(args: &cli::Args, config: &ConfigManager) -> Result<display::ColourManager> {
    let disabled = args.no_color || config.get_bool("display", "no-color")?.unwrap_or(false);
    Ok(display::ColourManager::from_args(disabled))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::io::Write;
    use std::path::PathBuf;
    use tempfile::NamedTempFile;

    fn config_from(text: &str) -> (NamedTempFile, ConfigManager) {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(text.as_bytes()).unwrap();
        let manager = ConfigManager::load_from_file(file.path().to_path_buf()).unwrap();
        (file, manager)
    }

    #[test]
    fn test_flags_override_config() {
        let (_file, config) = config_from("[base]\nconsole-level = \"warn\"\nlog-format = \"json\"\n");

        let args = cli::Args::parse_from(["gitdock", "list"]);
        let log = configure_logging(&args, &config).unwrap();
        assert_eq!(log.console_level, LevelFilter::Warn);
        assert_eq!(log.format, logging::LogFormat::Json);
        assert_eq!(log.destination, logging::LogDestination::Console);

        let args = cli::Args::parse_from(["gitdock", "list", "-v", "--log-format", "text"]);
        let log = configure_logging(&args, &config).unwrap();
        assert_eq!(log.console_level, LevelFilter::Debug);
        assert_eq!(log.format, logging::LogFormat::Text);
    }

    #[test]
    fn test_log_file_defaults_to_console_level() {
        let (_file, config) = config_from("");
        let args = cli::Args::parse_from(["gitdock", "list", "-q", "--log-file", "/tmp/gitdock.log"]);

        let log = configure_logging(&args, &config).unwrap();
        assert_eq!(log.destination, logging::LogDestination::Both(PathBuf::from("/tmp/gitdock.log")));
        assert_eq!(log.file_level, Some(LevelFilter::Error));
    }

    #[test]
    fn test_data_dir_flag_wins() {
        let (_file, config) = config_from("[runtime]\ndata-dir = \"/srv/gitdock\"\nhistory-limit = 10\n");

        let args = cli::Args::parse_from(["gitdock", "list"]);
        assert_eq!(runtime_config(&args, &config).unwrap().data_dir, PathBuf::from("/srv/gitdock"));

        let args = cli::Args::parse_from(["gitdock", "list", "--data-dir", "/tmp/dock"]);
        let runtime = runtime_config(&args, &config).unwrap();
        assert_eq!(runtime.data_dir, PathBuf::from("/tmp/dock"));
        assert_eq!(runtime.history_limit, 10);
    }
}
