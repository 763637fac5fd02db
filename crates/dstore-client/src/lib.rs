//! Client-side connection establishment for dstore servers
//!
//! A connection attempt goes through up to four steps:
//! 1. optionally ask the daemon to launch a server ([`DaemonLauncher`])
//! 2. open a plain or TLS channel ([`ChannelOpener`])
//! 3. negotiate protocol versions ([`HandshakeNegotiator`])
//! 4. start the session roles ([`Session`])
//!
//! [`SessionEstablisher`] runs them in order and reports the result as a
//! [`ConnectionOutcome`].
//!
//! ```rust,no_run
//! use dstore_client::{Credentials, Endpoint, EstablishOptions, SessionEstablisher, TrustStore};
//! use std::sync::Arc;
//!
//! # async fn run() {
//! let establisher = SessionEstablisher::new(Default::default(), Arc::new(TrustStore::new()));
//! let outcome = establisher
//!     .establish(
//!         &Endpoint::new("store.example.com", 4033),
//!         &Credentials::new("alice", ""),
//!         &EstablishOptions::default(),
//!     )
//!     .await;
//! if let Some(session) = establisher.session() {
//!     let mut updates = session.subscribe();
//!     while let Some(update) = updates.recv().await {
//!         println!("{:?}", update);
//!     }
//! }
//! # let _ = outcome;
//! # }
//! ```

pub mod channel;
pub mod daemon;
pub mod endpoint;
pub mod error;
pub mod establisher;
pub mod handshake;
pub mod outcome;
pub mod session;
pub mod tls;
pub mod trust;

pub use channel::{AsyncStream, Channel, ChannelOpener};
pub use daemon::{DaemonLauncher, DaemonTicket};
pub use endpoint::{Credentials, Endpoint};
pub use error::{ConnectError, PeerRole, SessionError};
pub use establisher::{
    ConnectionState, EstablishOptions, SessionEstablisher, CLIENT_OLDER_WARNING,
    SERVER_OLDER_WARNING,
};
pub use handshake::{Handshake, HandshakeNegotiator, VersionInfo};
pub use outcome::{ConnectionOutcome, FailureKind};
pub use session::{CommandReply, Session, SessionOptions, SessionUpdate};
pub use tls::{KeyStore, SecureChannelFactory};
pub use trust::{Certificate, PromptTrust, TrustDecision, TrustDecisionProvider, TrustStore};

pub use dstore_protocol::{HandshakeOutcome, VersionTriple};
