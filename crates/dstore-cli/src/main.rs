// dstore - operator CLI for dstore connections
//
// Subcommands:
// - probe: establish a session, report the handshake outcome, disconnect
// - launch: daemon round trip only, prints port and ticket

mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use commands::exit_codes;
use dstore_config::{load_settings, settings_path};
use std::process;
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let path = cli.config.clone().unwrap_or_else(settings_path);
    let settings = match load_settings(&path) {
        Ok(settings) => settings,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(exit_codes::CONFIG_ERROR);
        }
    };
    debug!("Using settings from {}", path.display());

    let code = match cli.command {
        Commands::Probe(args) => commands::probe::execute(args, settings, cli.format).await?,
        Commands::Launch(args) => commands::launch::execute(args, settings, cli.format).await?,
    };
    process::exit(code);
}
