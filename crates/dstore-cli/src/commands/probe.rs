//! `dstore probe`

use super::{exit_code, exit_codes, secret_from_env};
use crate::cli::{OutputFormat, ProbeArgs};
use anyhow::Result;
use colored::Colorize;
use dstore_client::{
    ConnectionOutcome, Credentials, EstablishOptions, SessionEstablisher, TrustStore, VersionInfo,
};
use dstore_config::ClientSettings;
use std::sync::Arc;
use tracing::{info, warn};

pub async fn execute(args: ProbeArgs, settings: ClientSettings, format: OutputFormat) -> Result<i32> {
    let store = TrustStore::new();
    let establisher = SessionEstablisher::new(settings, Arc::new(store.clone()));
    let endpoint = args.target.endpoint();
    let credentials = Credentials::new(args.user, secret_from_env());
    let options = EstablishOptions {
        launch_via_daemon: args.daemon,
        daemon_port: args.daemon_port,
        timeout_millis: args.target.timeout_ms.unwrap_or(0),
    };

    let mut outcome = establisher.establish(&endpoint, &credentials, &options).await;
    if outcome.is_trust_rejected() && args.accept_untrusted {
        for cert in &outcome.untrusted_certificates {
            warn!("Accepting certificate sha256:{}", cert.fingerprint());
        }
        store.accept(&outcome.untrusted_certificates);
        info!("Retrying {} with the accepted certificates", endpoint);
        outcome = establisher.establish(&endpoint, &credentials, &options).await;
    }

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&outcome)?),
        OutputFormat::Text => print_outcome(&outcome, establisher.versions()),
    }

    let code = match outcome.failure {
        None => exit_codes::SUCCESS,
        Some(kind) => exit_code(kind),
    };
    establisher.disconnect().await;
    Ok(code)
}

fn print_outcome(outcome: &ConnectionOutcome, versions: &VersionInfo) {
    let remote = versions
        .remote()
        .map(|v| v.to_string())
        .unwrap_or_else(|| "unknown".into());

    if outcome.connected {
        println!(
            "{} connected (server {}, client {})",
            "✓".green().bold(),
            remote,
            versions.local()
        );
        if let Some(warning) = &outcome.message {
            println!("  {} {}", "warning:".yellow().bold(), warning);
        }
        if let Some(ticket) = &outcome.ticket {
            println!("  ticket: {}", ticket);
        }
        return;
    }

    let kind = outcome
        .failure
        .map(|kind| format!("{:?}", kind))
        .unwrap_or_default();
    println!(
        "{} {} {}",
        "✗".red().bold(),
        kind.red(),
        outcome.message.as_deref().unwrap_or("")
    );
    for cert in &outcome.untrusted_certificates {
        println!("  untrusted sha256:{}", cert.fingerprint());
    }
    if outcome.is_trust_rejected() {
        println!("  rerun with --accept-untrusted to trust this chain");
    }
}
