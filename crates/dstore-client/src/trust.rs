//! Trust decisions for certificates the key store does not vouch for
//!
//! The networking core never decides trust. It only asks a
//! [`TrustDecisionProvider`] whether a chain was accepted earlier, and hands
//! rejected chains back to the caller inside the connection outcome. The
//! caller (usually a UI) shows them to the user, records the decision, and
//! retries.

use parking_lot::RwLock;
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fmt::{self, Write as _};
use std::sync::Arc;

/// DER-encoded X.509 certificate as presented by the peer.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Certificate {
    der: Vec<u8>,
}

impl Certificate {
    pub fn from_der(der: impl Into<Vec<u8>>) -> Self {
        Self { der: der.into() }
    }

    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// Lowercase hex SHA-256 of the DER bytes.
    pub fn fingerprint(&self) -> String {
        Sha256::digest(&self.der)
            .iter()
            .fold(String::with_capacity(64), |mut out, byte| {
                let _ = write!(out, "{:02x}", byte);
                out
            })
    }
}

impl fmt::Debug for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Certificate")
            .field("sha256", &self.fingerprint())
            .field("len", &self.der.len())
            .finish()
    }
}

impl Serialize for Certificate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Certificate", 2)?;
        state.serialize_field("sha256", &self.fingerprint())?;
        state.serialize_field("len", &self.der.len())?;
        state.end()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustDecision {
    Accept,
    Reject,
}

/// Caller-owned trust policy.
///
/// `decide` runs on the UI side after a rejected attempt. `is_accepted` is
/// the only question the TLS verifier asks, once per handshake.
pub trait TrustDecisionProvider: Send + Sync {
    fn decide(&self, chain: &[Certificate]) -> TrustDecision;

    fn is_accepted(&self, chain: &[Certificate]) -> bool;
}

/// Append-only set of accepted certificate fingerprints.
///
/// Clones share the same set, so one store can back several establishers and
/// an acceptance carries over to every later attempt.
#[derive(Debug, Clone, Default)]
pub struct TrustStore {
    accepted: Arc<RwLock<HashSet<String>>>,
}

impl TrustStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record every certificate in `chain` as trusted.
    pub fn accept(&self, chain: &[Certificate]) {
        let mut accepted = self.accepted.write();
        for cert in chain {
            accepted.insert(cert.fingerprint());
        }
    }

    pub fn len(&self) -> usize {
        self.accepted.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.accepted.read().is_empty()
    }
}

impl TrustDecisionProvider for TrustStore {
    /// A bare store never prompts; only chains it already holds pass.
    fn decide(&self, chain: &[Certificate]) -> TrustDecision {
        if self.is_accepted(chain) {
            TrustDecision::Accept
        } else {
            TrustDecision::Reject
        }
    }

    fn is_accepted(&self, chain: &[Certificate]) -> bool {
        if chain.is_empty() {
            return false;
        }
        let accepted = self.accepted.read();
        chain.iter().all(|cert| accepted.contains(&cert.fingerprint()))
    }
}

/// A [`TrustStore`] that asks a closure about unknown chains and remembers
/// the chains it accepts.
pub struct PromptTrust<F> {
    store: TrustStore,
    prompt: F,
}

impl<F> PromptTrust<F>
where
    F: Fn(&[Certificate]) -> TrustDecision + Send + Sync,
{
    pub fn new(store: TrustStore, prompt: F) -> Self {
        Self { store, prompt }
    }

    pub fn store(&self) -> &TrustStore {
        &self.store
    }
}

impl<F> TrustDecisionProvider for PromptTrust<F>
where
    F: Fn(&[Certificate]) -> TrustDecision + Send + Sync,
{
    fn decide(&self, chain: &[Certificate]) -> TrustDecision {
        if self.store.is_accepted(chain) {
            return TrustDecision::Accept;
        }
        let decision = (self.prompt)(chain);
        if decision == TrustDecision::Accept {
            self.store.accept(chain);
        }
        decision
    }

    fn is_accepted(&self, chain: &[Certificate]) -> bool {
        self.store.is_accepted(chain)
    }
}
