//! Result value handed back from [`SessionEstablisher::establish`]
//!
//! [`SessionEstablisher::establish`]: crate::SessionEstablisher::establish

use crate::error::ConnectError;
use crate::trust::Certificate;
use serde::Serialize;

/// Coarse classification of a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    HostUnreachable,
    UnknownHost,
    TrustRejected,
    IoFailure,
    Timeout,
    HandshakeIncompatible,
    DaemonRejected,
    Unexpected,
    /// Another attempt or a live session already owns the establisher.
    Busy,
}

/// Outcome of one connection attempt.
///
/// Built once and returned by value. `untrusted_certificates` is non-empty
/// only when `failure` is [`FailureKind::TrustRejected`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionOutcome {
    pub connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ticket: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub untrusted_certificates: Vec<Certificate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
}

impl ConnectionOutcome {
    pub fn connected(ticket: impl Into<String>, message: Option<String>) -> Self {
        Self {
            connected: true,
            message,
            ticket: Some(ticket.into()),
            untrusted_certificates: Vec::new(),
            failure: None,
        }
    }

    pub fn failed(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            connected: false,
            message: Some(message.into()),
            ticket: None,
            untrusted_certificates: Vec::new(),
            failure: Some(kind),
        }
    }

    pub fn busy() -> Self {
        Self::failed(
            FailureKind::Busy,
            "A connection attempt is already in progress or a session is active",
        )
    }

    pub fn from_error(err: &ConnectError) -> Self {
        Self {
            untrusted_certificates: err.untrusted_certificates().to_vec(),
            ..Self::failed(err.kind(), err.to_string())
        }
    }

    pub fn is_trust_rejected(&self) -> bool {
        self.failure == Some(FailureKind::TrustRejected)
    }
}
