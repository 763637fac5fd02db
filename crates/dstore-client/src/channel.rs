//! Byte-stream channels to a server or daemon
//!
//! A [`Channel`] is split once into a buffered reader and a writer. The
//! handshake and the daemon exchange read through the same buffered reader
//! that the session later owns, so nothing the server sends right after its
//! handshake line is lost.

use crate::endpoint::Endpoint;
use crate::error::{ConnectError, PeerRole};
use crate::tls::SecureChannelFactory;
use crate::trust::TrustDecisionProvider;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
    ReadHalf, WriteHalf,
};
use tokio::net::{lookup_host, TcpStream};
use tracing::debug;

/// Longest handshake or daemon line accepted.
pub(crate) const MAX_LINE_BYTES: usize = 4 * 1024;

/// Any bidirectional byte stream a channel can run over.
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

pub(crate) type BoxedStream = Box<dyn AsyncStream>;
pub(crate) type ChannelReader = BufReader<ReadHalf<BoxedStream>>;
pub(crate) type ChannelWriter = WriteHalf<BoxedStream>;

/// An open connection plus the read timeout used until the handshake is done.
pub struct Channel {
    reader: ChannelReader,
    writer: ChannelWriter,
    peer: String,
    read_timeout: Option<Duration>,
}

impl Channel {
    /// Wrap an already connected stream.
    pub fn new(stream: impl AsyncStream + 'static, peer: impl Into<String>) -> Self {
        let boxed: BoxedStream = Box::new(stream);
        let (read, write) = tokio::io::split(boxed);
        Self {
            reader: BufReader::new(read),
            writer: write,
            peer: peer.into(),
            read_timeout: None,
        }
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout
    }

    pub fn set_read_timeout(&mut self, timeout: Option<Duration>) {
        self.read_timeout = timeout;
    }

    /// Write `bytes` and flush.
    pub async fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.writer.write_all(bytes).await?;
        self.writer.flush().await
    }

    /// Read one line of at most `limit` bytes, honouring the read timeout.
    ///
    /// `Ok(None)` means the peer closed the stream. An expired timeout is an
    /// error of kind [`io::ErrorKind::TimedOut`].
    pub async fn read_line(&mut self, limit: usize) -> io::Result<Option<String>> {
        match self.read_timeout {
            Some(timeout) => tokio::time::timeout(timeout, read_bounded_line(&mut self.reader, limit))
                .await
                .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "read timed out"))?,
            None => read_bounded_line(&mut self.reader, limit).await,
        }
    }

    /// Shut down the write side. The channel is dropped afterwards.
    pub async fn close(mut self) {
        if let Err(e) = self.writer.shutdown().await {
            debug!("Closing channel to {}: {}", self.peer, e);
        }
    }

    pub(crate) fn into_parts(self) -> (ChannelReader, ChannelWriter, String) {
        (self.reader, self.writer, self.peer)
    }
}

/// Read a `\n`-terminated line of at most `limit` bytes, dropping the
/// terminator and a trailing `\r`.
///
/// A final line without a terminator is returned as is. A longer line, or
/// one that is not UTF-8, is rejected with [`io::ErrorKind::InvalidData`].
pub(crate) async fn read_bounded_line<R>(reader: &mut R, limit: usize) -> io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    match read_bounded_bytes(reader, limit).await? {
        Some(buf) => String::from_utf8(buf)
            .map(Some)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e)),
        None => Ok(None),
    }
}

/// Raw form of [`read_bounded_line`]; the line is returned undecoded.
pub(crate) async fn read_bounded_bytes<R>(reader: &mut R, limit: usize) -> io::Result<Option<Vec<u8>>>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let read = (&mut *reader)
        .take(limit as u64 + 1)
        .read_until(b'\n', &mut buf)
        .await?;
    if read == 0 {
        return Ok(None);
    }

    if buf.last() == Some(&b'\n') {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
    } else if read > limit {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("line exceeds {} bytes", limit),
        ));
    }

    Ok(Some(buf))
}

/// Opens plain or secure channels.
#[derive(Clone)]
pub struct ChannelOpener {
    tls: SecureChannelFactory,
}

impl ChannelOpener {
    /// `keystore` is the PEM file of trust anchors for secure endpoints.
    pub fn new(keystore: Option<PathBuf>, trust: Arc<dyn TrustDecisionProvider>) -> Self {
        Self {
            tls: SecureChannelFactory::new(keystore, trust),
        }
    }

    /// Connect to `endpoint`.
    ///
    /// `timeout` bounds the TCP connect and the TLS handshake, and becomes
    /// the channel's read timeout.
    pub async fn open(
        &self,
        endpoint: &Endpoint,
        timeout: Option<Duration>,
    ) -> Result<Channel, ConnectError> {
        debug!(
            "Opening {} channel to {}",
            if endpoint.uses_secure_transport() { "secure" } else { "plain" },
            endpoint
        );

        let tcp = bounded(timeout, "connect", connect_tcp(endpoint)).await?;
        let mut channel = if endpoint.uses_secure_transport() {
            let stream = bounded(
                timeout,
                "TLS handshake",
                self.tls.connect(tcp, endpoint.host(), endpoint.port()),
            )
            .await?;
            Channel::new(stream, endpoint.to_string())
        } else {
            Channel::new(tcp, endpoint.to_string())
        };
        channel.set_read_timeout(timeout);
        Ok(channel)
    }
}

async fn bounded<T>(
    timeout: Option<Duration>,
    operation: &'static str,
    fut: impl std::future::Future<Output = Result<T, ConnectError>>,
) -> Result<T, ConnectError> {
    match timeout {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| ConnectError::Timeout { operation })?,
        None => fut.await,
    }
}

async fn connect_tcp(endpoint: &Endpoint) -> Result<TcpStream, ConnectError> {
    let addrs: Vec<SocketAddr> = lookup_host((endpoint.host(), endpoint.port()))
        .await
        .map_err(|e| ConnectError::UnknownHost {
            host: endpoint.host().to_owned(),
            reason: e.to_string(),
        })?
        .collect();

    let mut last_error = None;
    for addr in addrs {
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!("Could not disable Nagle on {}: {}", addr, e);
                }
                return Ok(stream);
            }
            Err(e) => {
                debug!("Connect to {} failed: {}", addr, e);
                last_error = Some(e);
            }
        }
    }

    Err(match last_error {
        Some(e) if is_unreachable(&e) => ConnectError::HostUnreachable {
            role: PeerRole::Server,
            host: endpoint.host().to_owned(),
            port: endpoint.port(),
        },
        Some(e) => ConnectError::Io(e),
        None => ConnectError::UnknownHost {
            host: endpoint.host().to_owned(),
            reason: "no addresses found".into(),
        },
    })
}

fn is_unreachable(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::HostUnreachable
            | io::ErrorKind::NetworkUnreachable
            | io::ErrorKind::AddrNotAvailable
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trust::TrustStore;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_read_bounded_line_strips_terminators() {
        let mut reader = BufReader::new(&b"first\r\nsecond\nlast"[..]);
        assert_eq!(read_bounded_line(&mut reader, 64).await.unwrap().as_deref(), Some("first"));
        assert_eq!(read_bounded_line(&mut reader, 64).await.unwrap().as_deref(), Some("second"));
        assert_eq!(read_bounded_line(&mut reader, 64).await.unwrap().as_deref(), Some("last"));
        assert_eq!(read_bounded_line(&mut reader, 64).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_read_bounded_line_rejects_long_lines() {
        let mut reader = BufReader::new(&b"0123456789\n"[..]);
        let err = read_bounded_line(&mut reader, 4).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn test_read_bounded_bytes_keeps_invalid_utf8() {
        let mut reader = BufReader::new(&b"\xff\xfe\r\nok\n"[..]);
        assert_eq!(
            read_bounded_bytes(&mut reader, 64).await.unwrap(),
            Some(vec![0xff, 0xfe])
        );
        assert_eq!(read_bounded_line(&mut reader, 64).await.unwrap().as_deref(), Some("ok"));
    }

    #[tokio::test]
    async fn test_read_bounded_line_accepts_line_at_limit() {
        let mut reader = BufReader::new(&b"abcd\nnext\n"[..]);
        assert_eq!(read_bounded_line(&mut reader, 4).await.unwrap().as_deref(), Some("abcd"));
        assert_eq!(read_bounded_line(&mut reader, 4).await.unwrap().as_deref(), Some("next"));
    }

    #[tokio::test]
    async fn test_read_line_times_out() {
        let (client, _server) = tokio::io::duplex(64);
        let mut channel = Channel::new(client, "duplex");
        channel.set_read_timeout(Some(Duration::from_millis(20)));
        let err = channel.read_line(MAX_LINE_BYTES).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[tokio::test]
    async fn test_open_refused_port_is_unreachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let opener = ChannelOpener::new(None, Arc::new(TrustStore::new()));
        let err = opener
            .open(&Endpoint::new("127.0.0.1", port), Some(Duration::from_secs(2)))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ConnectError::HostUnreachable { role: PeerRole::Server, .. }));
    }

    #[tokio::test]
    async fn test_open_sets_read_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let opener = ChannelOpener::new(None, Arc::new(TrustStore::new()));

        let timeout = Some(Duration::from_millis(750));
        let channel = opener.open(&Endpoint::new("127.0.0.1", port), timeout).await.unwrap();
        assert_eq!(channel.read_timeout(), timeout);
        assert_eq!(channel.peer(), format!("127.0.0.1:{}", port));
    }
}
