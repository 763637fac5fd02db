use clap::{Args, Parser, Subcommand, ValueEnum};
use dstore_client::Endpoint;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Parser)]
#[command(name = "dstore")]
#[command(about = "dstore - connect to dstore servers and daemons")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging (shortcut for RUST_LOG=debug)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Settings file (defaults to $DSTORE_CONFIG or ~/.config/dstore/client.toml)
    #[arg(short = 'C', long, global = true)]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(short = 'f', long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Connect to a server, report the handshake outcome, then disconnect
    Probe(ProbeArgs),

    /// Ask a daemon to start a server and print its port and ticket
    Launch(LaunchArgs),
}

#[derive(Args, Debug, Clone)]
pub struct TargetArgs {
    /// Server host
    #[arg(long, default_value = "localhost")]
    pub host: String,

    /// Server port; 0 lets the daemon choose
    #[arg(short, long, default_value_t = 0)]
    pub port: u16,

    /// Use TLS
    #[arg(long)]
    pub secure: bool,

    /// Connect and handshake timeout in milliseconds (overrides config)
    #[arg(long)]
    pub timeout_ms: Option<u64>,
}

impl TargetArgs {
    pub fn endpoint(&self) -> Endpoint {
        if self.secure {
            Endpoint::secure(&self.host, self.port)
        } else {
            Endpoint::new(&self.host, self.port)
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ProbeArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Launch the server through the daemon first
    #[arg(long)]
    pub daemon: bool,

    /// Daemon port (overrides config)
    #[arg(long)]
    pub daemon_port: Option<u16>,

    /// User for the daemon launch request
    #[arg(short, long, env = "USER", default_value = "")]
    pub user: String,

    /// Trust certificates the server presents and retry once
    #[arg(long)]
    pub accept_untrusted: bool,
}

#[derive(Args, Debug, Clone)]
pub struct LaunchArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Daemon port (overrides config)
    #[arg(long)]
    pub daemon_port: Option<u16>,

    /// User for the launch request
    #[arg(short, long, env = "USER", default_value = "")]
    pub user: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_probe_flags() {
        let cli = Cli::try_parse_from([
            "dstore",
            "probe",
            "--host",
            "store.local",
            "-p",
            "4033",
            "--secure",
            "--accept-untrusted",
            "--timeout-ms",
            "250",
        ])
        .unwrap();

        let Commands::Probe(args) = cli.command else {
            panic!("expected probe");
        };
        let endpoint = args.target.endpoint();
        assert_eq!(endpoint.host(), "store.local");
        assert_eq!(endpoint.port(), 4033);
        assert!(endpoint.uses_secure_transport());
        assert!(args.accept_untrusted);
        assert_eq!(args.target.timeout_ms, Some(250));
        assert!(!args.daemon);
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["dstore", "launch", "-v", "-f", "json", "--daemon-port", "5000"])
            .unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.format, OutputFormat::Json);
        let Commands::Launch(args) = cli.command else {
            panic!("expected launch");
        };
        assert_eq!(args.daemon_port, Some(5000));
        assert_eq!(args.target.port, 0);
    }
}
