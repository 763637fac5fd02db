//! Daemon launch vocabulary
//!
//! The client sends `user`, `secret` and the desired port on separate lines;
//! the daemon answers with one status line and, on success, the port and a
//! one-time ticket.

/// Well-known port the daemon listens on.
pub const DEFAULT_DAEMON_PORT: u16 = 4075;

/// Ticket used for direct connections that did not go through the daemon.
pub const NO_TICKET: &str = "null";

const CONNECTED: &str = "connected";
const AUTHENTICATION_FAILED: &str = "Authentication Failed";
const UNKNOWN_PROBLEM: &str = "Unknown problem connecting to server";
const SERVER_FAILURE: &str = "Server failure: ";
const PASSWORD_EXPIRED: &str = "password expired";
const NEW_PASSWORD_INVALID: &str = "new password not valid";

/// Status line returned by the daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DaemonStatus {
    Connected,
    AuthenticationFailed,
    UnknownProblem,
    ServerFailure(String),
    PasswordExpired,
    NewPasswordInvalid,
    /// A line outside the fixed vocabulary. Still a failure.
    Other(String),
}

impl DaemonStatus {
    pub fn parse(line: &str) -> Self {
        if line.eq_ignore_ascii_case(CONNECTED) {
            Self::Connected
        } else if line == AUTHENTICATION_FAILED {
            Self::AuthenticationFailed
        } else if line == UNKNOWN_PROBLEM {
            Self::UnknownProblem
        } else if let Some(detail) = line.strip_prefix(SERVER_FAILURE) {
            Self::ServerFailure(detail.to_string())
        } else if line == PASSWORD_EXPIRED {
            Self::PasswordExpired
        } else if line == NEW_PASSWORD_INVALID {
            Self::NewPasswordInvalid
        } else {
            Self::Other(line.to_string())
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Whether the line belongs to the daemon's fixed vocabulary.
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Other(_))
    }

    /// Wire form of the status line.
    pub fn as_line(&self) -> String {
        match self {
            Self::Connected => CONNECTED.to_string(),
            Self::AuthenticationFailed => AUTHENTICATION_FAILED.to_string(),
            Self::UnknownProblem => UNKNOWN_PROBLEM.to_string(),
            Self::ServerFailure(detail) => format!("{}{}", SERVER_FAILURE, detail),
            Self::PasswordExpired => PASSWORD_EXPIRED.to_string(),
            Self::NewPasswordInvalid => NEW_PASSWORD_INVALID.to_string(),
            Self::Other(line) => line.clone(),
        }
    }
}
