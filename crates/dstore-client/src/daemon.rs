//! Server launch through the daemon
//!
//! The daemon listens on a well-known port and spawns one server per
//! request. The client sends its user, secret and desired port; on success
//! the daemon answers with the new server's port and a one-time ticket.

use crate::channel::{Channel, ChannelOpener, MAX_LINE_BYTES};
use crate::endpoint::{Credentials, Endpoint};
use crate::error::ConnectError;
use dstore_config::DaemonSettings;
use dstore_protocol::DaemonStatus;
use std::io;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Port and ticket of a freshly launched server, verbatim from the daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonTicket {
    pub port: String,
    pub ticket: String,
}

impl DaemonTicket {
    pub fn port_number(&self) -> Option<u16> {
        self.port.trim().parse().ok()
    }
}

pub struct DaemonLauncher {
    opener: ChannelOpener,
    default_timeout: Duration,
}

impl DaemonLauncher {
    pub fn new(opener: ChannelOpener, settings: &DaemonSettings) -> Self {
        Self {
            opener,
            default_timeout: settings.timeout(),
        }
    }

    /// Ask the daemon on `daemon_port` of `endpoint`'s host to start a server.
    ///
    /// The daemon is reached with the same transport as `endpoint`. A port of
    /// 0 on `endpoint` lets the daemon pick one.
    pub async fn launch(
        &self,
        endpoint: &Endpoint,
        credentials: &Credentials,
        daemon_port: u16,
        timeout: Option<Duration>,
    ) -> Result<DaemonTicket, ConnectError> {
        let daemon = endpoint.with_port(daemon_port);
        let timeout = timeout.unwrap_or(self.default_timeout);
        info!("Requesting a server from the daemon on {}", daemon);

        let mut channel = self
            .opener
            .open(&daemon, Some(timeout))
            .await
            .map_err(ConnectError::for_daemon)?;

        let result = request(&mut channel, endpoint, credentials).await;
        channel.close().await;

        match &result {
            Ok(ticket) => info!("Daemon on {} started a server on port {}", daemon, ticket.port),
            Err(e) => warn!("Daemon launch on {} failed: {}", daemon, e),
        }
        result
    }
}

async fn request(
    channel: &mut Channel,
    endpoint: &Endpoint,
    credentials: &Credentials,
) -> Result<DaemonTicket, ConnectError> {
    let desired_port = match endpoint.port() {
        0 => String::new(),
        port => port.to_string(),
    };
    let request = format!(
        "{}\n{}\n{}\n",
        credentials.user(),
        credentials.secret(),
        desired_port
    );
    channel.send(request.as_bytes()).await?;
    debug!("Sent launch request for user {}", credentials.user());

    let line = read_daemon_line(channel, "daemon status")
        .await?
        .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "no status returned"))?;

    let status = DaemonStatus::parse(&line);
    if !status.is_connected() {
        if !status.is_known() {
            debug!("Daemon sent an unrecognised status line");
        }
        return Err(ConnectError::DaemonRejected { status: line });
    }

    let port = read_daemon_line(channel, "daemon port").await?;
    let ticket = read_daemon_line(channel, "daemon ticket").await?;
    match (port, ticket) {
        (Some(port), Some(ticket)) => Ok(DaemonTicket { port, ticket }),
        _ => Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "daemon closed the connection before sending port and ticket",
        )
        .into()),
    }
}

async fn read_daemon_line(
    channel: &mut Channel,
    operation: &'static str,
) -> Result<Option<String>, ConnectError> {
    channel.read_line(MAX_LINE_BYTES).await.map_err(|e| {
        if e.kind() == io::ErrorKind::TimedOut {
            ConnectError::Timeout { operation }
        } else {
            ConnectError::Io(e)
        }
    })
}
