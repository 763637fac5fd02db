//! Error types for connection establishment and live sessions

use crate::outcome::FailureKind;
use crate::trust::Certificate;
use dstore_protocol::FrameError;
use std::fmt;
use std::io;
use std::path::PathBuf;

/// Which peer a connection attempt was aimed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerRole {
    Server,
    Daemon,
}

impl fmt::Display for PeerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerRole::Server => f.write_str("server"),
            PeerRole::Daemon => f.write_str("daemon"),
        }
    }
}

/// Failure while opening a channel or talking to the daemon.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("Connection refused. Make sure that the {role} is running on {host}:{port}")]
    HostUnreachable {
        role: PeerRole,
        host: String,
        port: u16,
    },

    #[error("Unknown host {host}: {reason}")]
    UnknownHost { host: String, reason: String },

    /// The peer presented a certificate chain nobody has accepted yet.
    #[error("Untrusted certificate presented by {host}:{port}")]
    TrustRejected {
        host: String,
        port: u16,
        certificates: Vec<Certificate>,
    },

    #[error("Timed out during {operation}")]
    Timeout { operation: &'static str },

    /// Displays the daemon's status line verbatim.
    #[error("{status}")]
    DaemonRejected { status: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Failed to load key store {path}: {source}")]
    KeyStore {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    #[error("{0}")]
    Io(#[from] io::Error),
}

impl ConnectError {
    pub fn kind(&self) -> FailureKind {
        match self {
            ConnectError::HostUnreachable { .. } => FailureKind::HostUnreachable,
            ConnectError::UnknownHost { .. } => FailureKind::UnknownHost,
            ConnectError::TrustRejected { .. } => FailureKind::TrustRejected,
            ConnectError::Timeout { .. } => FailureKind::Timeout,
            ConnectError::DaemonRejected { .. } => FailureKind::DaemonRejected,
            ConnectError::Protocol(_) => FailureKind::Unexpected,
            ConnectError::KeyStore { .. } | ConnectError::Tls(_) | ConnectError::Io(_) => {
                FailureKind::IoFailure
            }
        }
    }

    /// Certificates the peer presented when trust was refused.
    pub fn untrusted_certificates(&self) -> &[Certificate] {
        match self {
            ConnectError::TrustRejected { certificates, .. } => certificates,
            _ => &[],
        }
    }

    /// Re-attribute an unreachable host to the daemon.
    pub(crate) fn for_daemon(self) -> Self {
        match self {
            ConnectError::HostUnreachable { host, port, .. } => ConnectError::HostUnreachable {
                role: PeerRole::Daemon,
                host,
                port,
            },
            other => other,
        }
    }
}

/// Failure on an established session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session is not connected")]
    NotConnected,

    #[error("session closed before the reply arrived")]
    Closed,

    #[error(transparent)]
    Encode(#[from] FrameError),

    #[error("session roles need a running tokio runtime")]
    NoRuntime,

    #[error("server reported an error: {0}")]
    Remote(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unreachable_names_the_daemon() {
        let err = ConnectError::HostUnreachable {
            role: PeerRole::Server,
            host: "store.local".into(),
            port: 4075,
        }
        .for_daemon();
        assert_eq!(
            err.to_string(),
            "Connection refused. Make sure that the daemon is running on store.local:4075"
        );
        assert_eq!(err.kind(), FailureKind::HostUnreachable);
    }

    #[test]
    fn test_daemon_rejection_displays_raw_line() {
        let err = ConnectError::DaemonRejected {
            status: "Authentication Failed".into(),
        };
        assert_eq!(err.to_string(), "Authentication Failed");
        assert_eq!(err.kind(), FailureKind::DaemonRejected);
    }

    #[test]
    fn test_only_trust_rejection_carries_certificates() {
        let rejected = ConnectError::TrustRejected {
            host: "h".into(),
            port: 1,
            certificates: vec![Certificate::from_der(vec![1, 2, 3])],
        };
        assert_eq!(rejected.untrusted_certificates().len(), 1);

        let io = ConnectError::Io(io::Error::new(io::ErrorKind::BrokenPipe, "gone"));
        assert!(io.untrusted_certificates().is_empty());
        assert_eq!(io.kind(), FailureKind::IoFailure);
    }
}
