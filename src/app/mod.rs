//! Application orchestration module

pub mod execution;
pub mod host;
pub mod initialization;
pub mod repository;

pub use execution::execute_command;
pub use host::{PluginHost, RestoreReport};
pub use initialization::{configure_logging, create_colour_manager, load_configuration, runtime_config};
pub use repository::{open_host, resolve_repository_path};
