//! Connection targets and launch credentials

use serde::{Deserialize, Serialize};
use std::fmt;

/// Host and port of a dstore server, plus whether to speak TLS to it.
///
/// Immutable: rewriting the port (after a daemon launch) yields a new value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    host: String,
    port: u16,
    secure: bool,
}

impl Endpoint {
    /// Plain TCP endpoint.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            secure: false,
        }
    }

    /// TLS endpoint.
    pub fn secure(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            secure: true,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn uses_secure_transport(&self) -> bool {
        self.secure
    }

    /// Same host and transport, different port.
    pub fn with_port(&self, port: u16) -> Self {
        Self {
            host: self.host.clone(),
            port,
            secure: self.secure,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') && !self.host.starts_with('[') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// User and secret sent to the daemon when launching a server.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    user: String,
    secret: String,
}

impl Credentials {
    pub fn new(user: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            secret: secret.into(),
        }
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("secret", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_port_keeps_host_and_transport() {
        let endpoint = Endpoint::secure("build.example.com", 4033);
        let moved = endpoint.with_port(9999);
        assert_eq!(moved.host(), "build.example.com");
        assert_eq!(moved.port(), 9999);
        assert!(moved.uses_secure_transport());
        assert_eq!(endpoint.port(), 4033);
    }

    #[test]
    fn test_display_brackets_ipv6() {
        assert_eq!(Endpoint::new("::1", 80).to_string(), "[::1]:80");
        assert_eq!(Endpoint::new("localhost", 80).to_string(), "localhost:80");
    }

    #[test]
    fn test_credentials_debug_hides_secret() {
        let creds = Credentials::new("alice", "hunter2");
        let rendered = format!("{:?}", creds);
        assert!(rendered.contains("alice"));
        assert!(!rendered.contains("hunter2"));
    }
}
