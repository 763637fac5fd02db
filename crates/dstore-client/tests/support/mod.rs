//! In-process fake servers and daemons for integration tests

#![allow(dead_code)]

use dstore_client::Endpoint;
use dstore_protocol::{CommandFrame, InboundFrame, ResultFrame, UpdateFrame};
use parking_lot::Mutex;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;

/// How the fake server answers the handshake preamble.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Send this line, then serve session frames.
    Version(String),
    /// Send this line, then hang up.
    VersionThenClose(String),
    /// Never answer.
    Silent,
    /// Hang up after reading the preamble.
    Close,
}

impl Reply {
    pub fn version(line: &str) -> Self {
        Reply::Version(line.to_string())
    }
}

/// Fake dstore server listening on an ephemeral port.
///
/// Session behaviour: every command frame is answered with a result echoing
/// the command; `notify` first pushes `args.count` updates; `exit` makes the
/// server hang up. Every session line it receives is logged.
pub struct FakeServer {
    pub port: u16,
    pub received: Arc<Mutex<Vec<String>>>,
    handle: JoinHandle<()>,
}

impl FakeServer {
    pub async fn start(reply: Reply) -> Self {
        Self::spawn(reply, None).await
    }

    pub async fn start_tls(reply: Reply, acceptor: TlsAcceptor) -> Self {
        Self::spawn(reply, Some(acceptor)).await
    }

    async fn spawn(reply: Reply, acceptor: Option<TlsAcceptor>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let received = Arc::new(Mutex::new(Vec::new()));

        let log = received.clone();
        let handle = tokio::spawn(async move {
            loop {
                let Ok((tcp, _)) = listener.accept().await else {
                    break;
                };
                let reply = reply.clone();
                let log = log.clone();
                let acceptor = acceptor.clone();
                tokio::spawn(async move {
                    match acceptor {
                        Some(acceptor) => {
                            // The client may refuse our certificate.
                            if let Ok(tls) = acceptor.accept(tcp).await {
                                serve(tls, reply, log).await;
                            }
                        }
                        None => serve(tcp, reply, log).await,
                    }
                });
            }
        });

        Self {
            port,
            received,
            handle,
        }
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new("127.0.0.1", self.port)
    }

    pub fn received(&self) -> Vec<String> {
        self.received.lock().clone()
    }

    /// Wait until the server has logged `count` session lines.
    pub async fn wait_for_lines(&self, count: usize) -> Vec<String> {
        for _ in 0..200 {
            let lines = self.received();
            if lines.len() >= count {
                return lines;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("server saw only {:?}", self.received());
    }
}

impl Drop for FakeServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn serve<S>(stream: S, reply: Reply, log: Arc<Mutex<Vec<String>>>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (read, mut write) = tokio::io::split(stream);
    let mut lines = BufReader::new(read).lines();

    for _ in 0..3 {
        match lines.next_line().await {
            Ok(Some(_)) => {}
            _ => return,
        }
    }

    let version = match reply {
        Reply::Close => return,
        Reply::Silent => {
            while let Ok(Some(_)) = lines.next_line().await {}
            return;
        }
        Reply::VersionThenClose(line) => {
            let _ = write.write_all(format!("{}\n", line).as_bytes()).await;
            return;
        }
        Reply::Version(line) => line,
    };
    if write
        .write_all(format!("{}\n", version).as_bytes())
        .await
        .is_err()
    {
        return;
    }

    while let Ok(Some(line)) = lines.next_line().await {
        log.lock().push(line.clone());
        let Ok(command) = serde_json::from_str::<CommandFrame>(&line) else {
            continue;
        };
        if command.command == "exit" {
            break;
        }

        let mut out = String::new();
        if command.command == "notify" {
            let count = command.args["count"].as_u64().unwrap_or(0);
            for n in 0..count {
                let update = InboundFrame::Update(UpdateFrame {
                    source: Some("fake".into()),
                    data: json!(n),
                });
                out.push_str(&update.to_line().unwrap());
            }
        }
        let result = InboundFrame::Result(ResultFrame {
            id: command.id,
            data: json!({"command": command.command, "args": command.args}),
            error: None,
        });
        out.push_str(&result.to_line().unwrap());
        if write.write_all(out.as_bytes()).await.is_err() {
            break;
        }
    }
    let _ = write.shutdown().await;
}

/// One-shot daemon that records the request lines and sends `reply`.
pub struct FakeDaemon {
    pub port: u16,
    pub request: Arc<Mutex<Vec<String>>>,
    handle: JoinHandle<()>,
}

impl FakeDaemon {
    pub async fn start(reply: String) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let request = Arc::new(Mutex::new(Vec::new()));

        let log = request.clone();
        let handle = tokio::spawn(async move {
            let Ok((tcp, _)) = listener.accept().await else {
                return;
            };
            let (read, mut write) = tcp.into_split();
            let mut lines = BufReader::new(read).lines();
            for _ in 0..3 {
                match lines.next_line().await {
                    Ok(Some(line)) => log.lock().push(line),
                    _ => return,
                }
            }
            let _ = write.write_all(reply.as_bytes()).await;
        });

        Self {
            port,
            request,
            handle,
        }
    }

    pub fn request(&self) -> Vec<String> {
        self.request.lock().clone()
    }
}

impl Drop for FakeDaemon {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Self-signed certificate for `localhost` and an acceptor serving it.
pub struct TestCertificate {
    pub der: CertificateDer<'static>,
    pub pem: String,
    pub acceptor: TlsAcceptor,
}

pub fn test_certificate() -> TestCertificate {
    let rcgen::CertifiedKey { cert, key_pair } =
        rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_pair.serialize_der()));

    let config = rustls::ServerConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .unwrap()
    .with_no_client_auth()
    .with_single_cert(vec![cert.der().clone()], key)
    .unwrap();

    TestCertificate {
        der: cert.der().clone(),
        pem: cert.pem(),
        acceptor: TlsAcceptor::from(Arc::new(config)),
    }
}
