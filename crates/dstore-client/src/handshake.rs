//! Drives the version handshake over an open channel

use crate::channel::{Channel, MAX_LINE_BYTES};
use dstore_protocol::{classify_handshake, HandshakeOutcome, VersionTriple, HANDSHAKE_PREAMBLE_LINES};
use parking_lot::RwLock;
use std::io;
use std::sync::Arc;
use tracing::{debug, warn};

/// Result of one handshake attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub outcome: HandshakeOutcome,
    /// The server's version when it sent a well-formed one.
    pub remote: Option<VersionTriple>,
    /// What went wrong, for `Unexpected` and `Timeout`.
    pub detail: Option<String>,
}

impl Handshake {
    fn failed(outcome: HandshakeOutcome, detail: impl Into<String>) -> Self {
        Self {
            outcome,
            remote: None,
            detail: Some(detail.into()),
        }
    }
}

pub struct HandshakeNegotiator {
    local: VersionTriple,
}

impl HandshakeNegotiator {
    pub fn new(local: VersionTriple) -> Self {
        Self { local }
    }

    /// Send the preamble and classify the server's reply.
    ///
    /// The channel's read timeout only covers the reply line; it is cleared
    /// afterwards whatever the outcome. On failure the channel is left open
    /// for the caller to close.
    pub async fn negotiate(&self, channel: &mut Channel) -> Handshake {
        let handshake = self.exchange(channel).await;
        channel.set_read_timeout(None);
        handshake
    }

    async fn exchange(&self, channel: &mut Channel) -> Handshake {
        let preamble = "\n".repeat(HANDSHAKE_PREAMBLE_LINES);
        if let Err(e) = channel.send(preamble.as_bytes()).await {
            warn!("Handshake write to {} failed: {}", channel.peer(), e);
            return Handshake::failed(HandshakeOutcome::Unexpected, e.to_string());
        }

        let line = match channel.read_line(MAX_LINE_BYTES).await {
            Ok(Some(line)) => line,
            Ok(None) => {
                warn!("{} closed the connection during the handshake", channel.peer());
                return Handshake::failed(
                    HandshakeOutcome::Unexpected,
                    "connection closed before the server sent its version",
                );
            }
            Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                warn!("Timed out waiting for the handshake from {}", channel.peer());
                return Handshake::failed(HandshakeOutcome::Timeout, e.to_string());
            }
            Err(e) => {
                warn!("Handshake read from {} failed: {}", channel.peer(), e);
                return Handshake::failed(HandshakeOutcome::Unexpected, e.to_string());
            }
        };

        let (outcome, remote) = classify_handshake(&self.local, &line);
        debug!(
            "Handshake with {}: server sent {:?}, local {}, outcome {:?}",
            channel.peer(),
            line,
            self.local,
            outcome
        );
        Handshake {
            outcome,
            remote,
            detail: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Versions {
    local: VersionTriple,
    remote: Option<VersionTriple>,
}

/// Local and last-seen remote version, shared by the establisher and its
/// session.
#[derive(Debug, Clone)]
pub struct VersionInfo {
    inner: Arc<RwLock<Versions>>,
}

impl VersionInfo {
    pub fn new(local: VersionTriple) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Versions {
                local,
                remote: None,
            })),
        }
    }

    pub fn local(&self) -> VersionTriple {
        self.inner.read().local
    }

    pub fn remote(&self) -> Option<VersionTriple> {
        self.inner.read().remote
    }

    pub(crate) fn set_remote(&self, remote: Option<VersionTriple>) {
        self.inner.write().remote = remote;
    }
}

impl Default for VersionInfo {
    fn default() -> Self {
        Self::new(VersionTriple::CURRENT)
    }
}
