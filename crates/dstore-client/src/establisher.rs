//! Top-level connection orchestration
//!
//! [`SessionEstablisher::establish`] runs the optional daemon launch, opens
//! the channel, negotiates the handshake and brings up the [`Session`].
//! Every failure comes back as a [`ConnectionOutcome`]; nothing is returned
//! as an error.

use crate::channel::ChannelOpener;
use crate::daemon::DaemonLauncher;
use crate::endpoint::{Credentials, Endpoint};
use crate::handshake::{HandshakeNegotiator, VersionInfo};
use crate::outcome::{ConnectionOutcome, FailureKind};
use crate::session::{Session, SessionOptions};
use crate::trust::TrustDecisionProvider;
use dstore_config::ClientSettings;
use dstore_protocol::{HandshakeOutcome, VersionTriple, NO_TICKET};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub const CLIENT_OLDER_WARNING: &str = "client is older than server";
pub const SERVER_OLDER_WARNING: &str = "server is older than client";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Unconnected,
    Connecting,
    Connected,
    Disconnecting,
}

/// Per-attempt options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EstablishOptions {
    /// Ask the daemon for a fresh server first.
    pub launch_via_daemon: bool,
    /// Daemon port; the configured one when `None`.
    pub daemon_port: Option<u16>,
    /// Connect and handshake timeout; 0 uses the configured timeout.
    pub timeout_millis: u64,
}

pub struct SessionEstablisher {
    versions: VersionInfo,
    opener: ChannelOpener,
    launcher: DaemonLauncher,
    settings: ClientSettings,
    state: Mutex<ConnectionState>,
    session: Mutex<Option<Session>>,
}

impl SessionEstablisher {
    pub fn new(settings: ClientSettings, trust: Arc<dyn TrustDecisionProvider>) -> Self {
        let opener = ChannelOpener::new(settings.connection.keystore.clone(), trust);
        let launcher = DaemonLauncher::new(opener.clone(), &settings.daemon);
        Self {
            versions: VersionInfo::default(),
            opener,
            launcher,
            settings,
            state: Mutex::new(ConnectionState::Unconnected),
            session: Mutex::new(None),
        }
    }

    /// Override the version announced to servers.
    pub fn with_local_version(mut self, local: VersionTriple) -> Self {
        self.versions = VersionInfo::new(local);
        self
    }

    /// Current state. A session whose channel died reports `Unconnected`
    /// even before it is torn down.
    pub fn state(&self) -> ConnectionState {
        let state = *self.state.lock();
        match state {
            ConnectionState::Connected if !self.is_connected() => ConnectionState::Unconnected,
            other => other,
        }
    }

    pub fn versions(&self) -> &VersionInfo {
        &self.versions
    }

    /// The live session, if the last attempt succeeded.
    pub fn session(&self) -> Option<Session> {
        self.session.lock().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.session
            .lock()
            .as_ref()
            .is_some_and(Session::is_connected)
    }

    /// Connect to `endpoint`.
    ///
    /// Rejected with [`FailureKind::Busy`] while another attempt runs or a
    /// live session exists. A session whose channel died is torn down first.
    /// Dropping the returned future part way resets the establisher to
    /// [`ConnectionState::Unconnected`].
    pub async fn establish(
        &self,
        endpoint: &Endpoint,
        credentials: &Credentials,
        options: &EstablishOptions,
    ) -> ConnectionOutcome {
        let stale = {
            let mut state = self.state.lock();
            let stale = match *state {
                ConnectionState::Unconnected => None,
                ConnectionState::Connected if !self.is_connected() => self.session.lock().take(),
                current => {
                    warn!("Rejecting connection to {}: establisher is {:?}", endpoint, current);
                    return ConnectionOutcome::busy();
                }
            };
            *state = ConnectionState::Connecting;
            stale
        };

        let reset = scopeguard::guard(&self.state, |state| {
            *state.lock() = ConnectionState::Unconnected;
        });

        if let Some(session) = stale {
            info!("Tearing down dead session with {}", session.peer());
            session.disconnect().await;
        }

        let outcome = self.connect(endpoint, credentials, options).await;
        if outcome.connected {
            let reset = scopeguard::ScopeGuard::into_inner(reset);
            *reset.lock() = ConnectionState::Connected;
        }
        outcome
    }

    async fn connect(
        &self,
        endpoint: &Endpoint,
        credentials: &Credentials,
        options: &EstablishOptions,
    ) -> ConnectionOutcome {
        let explicit_timeout =
            (options.timeout_millis > 0).then(|| Duration::from_millis(options.timeout_millis));

        let (target, ticket) = if options.launch_via_daemon {
            let daemon_port = options.daemon_port.unwrap_or(self.settings.daemon.port);
            let launched = match self
                .launcher
                .launch(endpoint, credentials, daemon_port, explicit_timeout)
                .await
            {
                Ok(launched) => launched,
                Err(e) => return ConnectionOutcome::from_error(&e),
            };
            let Some(port) = launched.port_number() else {
                return ConnectionOutcome::failed(
                    FailureKind::Unexpected,
                    format!(
                        "Daemon on {} returned an invalid server port '{}'",
                        endpoint.host(),
                        launched.port
                    ),
                );
            };
            (endpoint.with_port(port), launched.ticket)
        } else {
            (endpoint.clone(), NO_TICKET.to_string())
        };

        let timeout = explicit_timeout.or_else(|| {
            let ms = self.settings.connection.timeout_ms;
            (ms > 0).then(|| Duration::from_millis(ms))
        });

        let mut channel = match self.opener.open(&target, timeout).await {
            Ok(channel) => channel,
            Err(e) => {
                warn!("Could not open channel to {}: {}", target, e);
                return ConnectionOutcome::from_error(&e);
            }
        };

        let local = self.versions.local();
        let handshake = HandshakeNegotiator::new(local)
            .negotiate(&mut channel)
            .await;
        self.versions.set_remote(handshake.remote);

        let message = match handshake.outcome {
            HandshakeOutcome::Correct => None,
            HandshakeOutcome::ServerNewerRecent => Some(CLIENT_OLDER_WARNING.to_string()),
            HandshakeOutcome::ServerOlderRecent => Some(SERVER_OLDER_WARNING.to_string()),
            failed => {
                channel.close().await;
                let remote = handshake
                    .remote
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| "unknown".into());
                let detail = handshake.detail.unwrap_or_default();
                return match failed {
                    HandshakeOutcome::ServerNewer => ConnectionOutcome::failed(
                        FailureKind::HandshakeIncompatible,
                        format!(
                            "Incompatible server on {}: server version {} is newer than client version {}. Upgrade the client.",
                            target, remote, local
                        ),
                    ),
                    HandshakeOutcome::ServerOlder => ConnectionOutcome::failed(
                        FailureKind::HandshakeIncompatible,
                        format!(
                            "Incompatible server on {}: server version {} is older than client version {}. Upgrade the server.",
                            target, remote, local
                        ),
                    ),
                    HandshakeOutcome::Timeout => ConnectionOutcome::failed(
                        FailureKind::Timeout,
                        format!("Timed out waiting for the server on {} to send its version", target),
                    ),
                    HandshakeOutcome::Unexpected => ConnectionOutcome::failed(
                        FailureKind::Unexpected,
                        format!("Unexpected reply from the server on {}: {}", target, detail),
                    ),
                    _ => ConnectionOutcome::failed(
                        FailureKind::HandshakeIncompatible,
                        format!(
                            "Cannot connect to server. Incompatible protocol on {}: server {}, client {}",
                            target, remote, local
                        ),
                    ),
                };
            }
        };

        if let Some(warning) = &message {
            warn!("Connected to {} with a version warning: {}", target, warning);
        }

        let options = SessionOptions::from(&self.settings.session);
        match Session::start(channel, ticket.clone(), self.versions.clone(), options) {
            Ok(session) => {
                info!("Connected to {}", target);
                *self.session.lock() = Some(session);
                ConnectionOutcome::connected(ticket, message)
            }
            Err(e) => ConnectionOutcome::failed(
                FailureKind::Unexpected,
                format!("Could not start session with {}: {}", target, e),
            ),
        }
    }

    /// Disconnect the current session, if any. Idempotent.
    pub async fn disconnect(&self) {
        let session = {
            let mut state = self.state.lock();
            if *state != ConnectionState::Connected {
                return;
            }
            *state = ConnectionState::Disconnecting;
            self.session.lock().take()
        };

        let reset = scopeguard::guard(&self.state, |state| {
            *state.lock() = ConnectionState::Unconnected;
        });
        if let Some(session) = session {
            session.disconnect().await;
        }
        drop(reset);
    }
}
