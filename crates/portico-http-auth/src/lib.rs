//! HTTP access gate for tunnels
//!
//! A tunnel registers a single credential string. A public request is let
//! through when the tunnel's credential is empty, or when the request's raw
//! `Authorization` header value matches it.
//!
//! # Usage
//!
//! ```
//! use portico_http_auth::{basic_credential, AccessGate};
//!
//! let gate = AccessGate::default();
//! let credential = basic_credential("user", "password");
//!
//! assert!(gate.check(&credential, "Basic dXNlcjpwYXNzd29yZA=="));
//! assert!(!gate.check(&credential, ""));
//! assert!(gate.check("", "anything"));
//! ```

mod basic;

pub use basic::{basic_credential, parse_user_password};

use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::trace;

/// Error type for credential configuration
#[derive(Error, Debug, PartialEq, Eq)]
pub enum AuthError {
    #[error("Invalid credentials format: {0}")]
    InvalidFormat(String),
}

/// How a supplied credential is compared with the configured one
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CredentialMatch {
    /// Byte-exact string equality
    #[default]
    Exact,
    /// Equality of SHA-256 digests, folded without early exit so the time
    /// taken does not depend on where the values first differ
    Digest,
}

/// Decides whether a request may reach a tunnel
#[derive(Debug, Clone, Copy, Default)]
pub struct AccessGate {
    matching: CredentialMatch,
}

impl AccessGate {
    pub fn new(matching: CredentialMatch) -> Self {
        Self { matching }
    }

    pub fn matching(&self) -> CredentialMatch {
        self.matching
    }

    /// Check the `supplied` credential against the tunnel's `configured` one
    pub fn check(&self, configured: &str, supplied: &str) -> bool {
        if configured.is_empty() {
            trace!("Tunnel has no credential, allowing request");
            return true;
        }

        match self.matching {
            CredentialMatch::Exact => configured == supplied,
            CredentialMatch::Digest => digest_eq(configured, supplied),
        }
    }
}

fn digest_eq(a: &str, b: &str) -> bool {
    let a = Sha256::digest(a.as_bytes());
    let b = Sha256::digest(b.as_bytes());
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
