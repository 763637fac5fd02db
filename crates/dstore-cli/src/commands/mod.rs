pub mod launch;
pub mod probe;

use dstore_client::FailureKind;

/// Exit codes shared by the subcommands
pub mod exit_codes {
    pub const SUCCESS: i32 = 0;
    pub const CONFIG_ERROR: i32 = 1;
    pub const CONNECT_FAILED: i32 = 2;
    pub const INCOMPATIBLE: i32 = 3;
    pub const TRUST_REJECTED: i32 = 4;
    pub const DAEMON_REJECTED: i32 = 5;
}

pub fn exit_code(failure: FailureKind) -> i32 {
    match failure {
        FailureKind::HandshakeIncompatible => exit_codes::INCOMPATIBLE,
        FailureKind::TrustRejected => exit_codes::TRUST_REJECTED,
        FailureKind::DaemonRejected => exit_codes::DAEMON_REJECTED,
        _ => exit_codes::CONNECT_FAILED,
    }
}

/// Secret for daemon launch requests, never taken from the command line.
pub fn secret_from_env() -> String {
    std::env::var("DSTORE_SECRET").unwrap_or_default()
}
