//! Version handshake classification
//!
//! The client opens with three empty lines; the server answers with a single
//! line. This module decides what that line means. It never touches a socket,
//! so the driver in the client crate only has to supply the line.

use crate::version::VersionTriple;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Number of empty lines the client writes before reading the server's version.
pub const HANDSHAKE_PREAMBLE_LINES: usize = 3;

/// Prefix of a raw markup reply from a server that predates the handshake.
pub const LEGACY_TAG: &str = "<DataElement";

/// How the remote version relates to ours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandshakeOutcome {
    Correct,
    /// Server is one or two majors behind; usable with a warning.
    ServerOlderRecent,
    /// Server is one major ahead; usable with a warning.
    ServerNewerRecent,
    ServerOlder,
    ServerNewer,
    /// Protocol numbers differ.
    Incorrect,
    /// I/O failure or the channel closed before a line arrived.
    Unexpected,
    Timeout,
}

impl HandshakeOutcome {
    /// Whether a session may be built on top of this outcome.
    pub fn is_compatible(self) -> bool {
        matches!(
            self,
            Self::Correct | Self::ServerOlderRecent | Self::ServerNewerRecent
        )
    }
}

/// Classify the server's handshake line against the local version.
///
/// Returns the parsed remote version alongside the outcome when the line was
/// a well-formed version string.
pub fn classify_handshake(
    local: &VersionTriple,
    line: &str,
) -> (HandshakeOutcome, Option<VersionTriple>) {
    if line == local.to_string() {
        return (HandshakeOutcome::Correct, Some(*local));
    }

    if line.starts_with(LEGACY_TAG) {
        return (HandshakeOutcome::ServerOlder, None);
    }

    match line.parse::<VersionTriple>() {
        Ok(remote) => (compare_versions(local, &remote), Some(remote)),
        // Anything unparseable is treated like the legacy markup reply.
        Err(_) => (HandshakeOutcome::ServerOlder, None),
    }
}

/// Compatibility of two well-formed versions.
///
/// The older window is two majors wide, the newer window only one.
pub fn compare_versions(local: &VersionTriple, remote: &VersionTriple) -> HandshakeOutcome {
    if remote.protocol != local.protocol {
        return HandshakeOutcome::Incorrect;
    }

    match remote.major.cmp(&local.major) {
        Ordering::Equal => HandshakeOutcome::Correct,
        Ordering::Greater => {
            if remote.major - local.major == 1 {
                HandshakeOutcome::ServerNewerRecent
            } else {
                HandshakeOutcome::ServerNewer
            }
        }
        Ordering::Less => match local.major - remote.major {
            1 | 2 => HandshakeOutcome::ServerOlderRecent,
            _ => HandshakeOutcome::ServerOlder,
        },
    }
}
