use std::process;
use anyhow::Result;
use log::{debug, error};

use gitdock::{app, cli, logging};

fn main() {
    if let Err(e) = run() {
        error!("Application error: {:#}", e);
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

fn run() -> Result<()> {
    let args = cli::parse_args();
    cli::validate_args(&args)?;

    let config_manager = app::load_configuration(&args)?;
    let log_config = app::configure_logging(&args, &config_manager)?;
    logging::init_logger(log_config)?;

    let colours = app::create_colour_manager(&args, &config_manager)?;
    let runtime_config = app::runtime_config(&args, &config_manager)?;
    let repo_path = app::resolve_repository_path(args.repository.clone())?;

    // Single runtime for the whole application
    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;

    runtime.block_on(async {
        let host = app::PluginHost::open(app::open_host(&repo_path), runtime_config)?;
        let builtins = host.register_builtins()?;
        debug!("Builtin plugins available: {}", builtins.join(", "));

        let result = app::execute_command(&args, &host, &colours).await;
        host.manager().close_all_panels();
        result
    })
}
