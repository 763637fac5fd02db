//! Settings structures and their defaults

use dstore_protocol::DEFAULT_DAEMON_PORT;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level client settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    /// Direct connection settings
    pub connection: ConnectionSettings,
    /// Daemon launch settings
    pub daemon: DaemonSettings,
    /// Session teardown settings
    pub session: SessionSettings,
}

/// Direct connection settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    /// Handshake read timeout in milliseconds; 0 waits forever
    pub timeout_ms: u64,
    /// PEM file holding the certificates trusted for secure transport
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keystore: Option<PathBuf>,
}

/// Daemon launch settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonSettings {
    /// Well-known port the daemon listens on
    pub port: u16,
    /// Connect and status timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            port: DEFAULT_DAEMON_PORT,
            timeout_ms: 10_000,
        }
    }
}

impl DaemonSettings {
    /// Timeout as a duration, falling back to the default when unset
    pub fn timeout(&self) -> Duration {
        if self.timeout_ms == 0 {
            Duration::from_millis(Self::default().timeout_ms)
        } else {
            Duration::from_millis(self.timeout_ms)
        }
    }
}

/// Session teardown settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// How long disconnect waits for the server to close after `exit`
    pub exit_timeout_ms: u64,
    /// Pause between stopping command dispatch and update notification
    pub disconnect_grace_ms: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            exit_timeout_ms: 2_000,
            disconnect_grace_ms: 200,
        }
    }
}

impl SessionSettings {
    /// Exit acknowledgement timeout
    pub fn exit_timeout(&self) -> Duration {
        Duration::from_millis(self.exit_timeout_ms)
    }

    /// Grace delay during disconnect
    pub fn disconnect_grace(&self) -> Duration {
        Duration::from_millis(self.disconnect_grace_ms)
    }
}
