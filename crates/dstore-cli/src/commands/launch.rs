//! `dstore launch`

use super::{exit_code, exit_codes, secret_from_env};
use crate::cli::{LaunchArgs, OutputFormat};
use anyhow::Result;
use colored::Colorize;
use dstore_client::{ChannelOpener, Credentials, DaemonLauncher, TrustStore};
use dstore_config::ClientSettings;
use std::sync::Arc;
use std::time::Duration;

pub async fn execute(args: LaunchArgs, settings: ClientSettings, format: OutputFormat) -> Result<i32> {
    let opener = ChannelOpener::new(
        settings.connection.keystore.clone(),
        Arc::new(TrustStore::new()),
    );
    let launcher = DaemonLauncher::new(opener, &settings.daemon);
    let daemon_port = args.daemon_port.unwrap_or(settings.daemon.port);
    let timeout = args
        .target
        .timeout_ms
        .filter(|ms| *ms > 0)
        .map(Duration::from_millis);
    let credentials = Credentials::new(args.user, secret_from_env());

    match launcher
        .launch(&args.target.endpoint(), &credentials, daemon_port, timeout)
        .await
    {
        Ok(ticket) => {
            match format {
                OutputFormat::Json => println!(
                    "{}",
                    serde_json::json!({"port": ticket.port, "ticket": ticket.ticket})
                ),
                OutputFormat::Text => {
                    println!("{} server started", "✓".green().bold());
                    println!("  port:   {}", ticket.port);
                    println!("  ticket: {}", ticket.ticket);
                }
            }
            Ok(exit_codes::SUCCESS)
        }
        Err(e) => {
            match format {
                OutputFormat::Json => println!(
                    "{}",
                    serde_json::json!({"failure": e.kind(), "message": e.to_string()})
                ),
                OutputFormat::Text => println!("{} {}", "✗".red().bold(), e),
            }
            Ok(exit_code(e.kind()))
        }
    }
}
