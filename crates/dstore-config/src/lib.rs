//! # dstore client configuration
//!
//! Tuning knobs for connection establishment: handshake timeout, the
//! credential store used for secure transport, daemon port and timeout,
//! and session teardown timing. Connection profiles (which host to talk to)
//! are supplied by the caller and are not stored here.
//!
//! ```rust,no_run
//! use dstore_config::{load_settings, settings_path};
//!
//! let settings = load_settings(&settings_path())?;
//! println!("daemon port: {}", settings.daemon.port);
//! # Ok::<(), dstore_config::ConfigError>(())
//! ```

#![warn(missing_docs)]

mod loader;
mod settings;

pub use loader::{load_settings, settings_path, ConfigError, CONFIG_ENV_VAR};
pub use settings::{ClientSettings, ConnectionSettings, DaemonSettings, SessionSettings};
