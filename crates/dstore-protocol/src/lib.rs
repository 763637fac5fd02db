//! Shared wire types for dstore client/server communication
//!
//! Three plain-text exchanges live here:
//! - the version handshake (`handshake`), classified without any I/O
//! - the daemon launch vocabulary (`daemon`)
//! - newline-delimited JSON session frames (`frame`)

mod daemon;
mod frame;
mod handshake;
mod version;

pub use daemon::{DaemonStatus, DEFAULT_DAEMON_PORT, NO_TICKET};
pub use frame::{CommandFrame, FrameError, InboundFrame, ResultFrame, UpdateFrame, EXIT_COMMAND};
pub use handshake::{
    classify_handshake, compare_versions, HandshakeOutcome, HANDSHAKE_PREAMBLE_LINES, LEGACY_TAG,
};
pub use version::{VersionParseError, VersionTriple};
