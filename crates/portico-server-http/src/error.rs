//! Error types for the public HTTP listener

use portico_router::RouteKey;
use std::io;
use thiserror::Error;

/// Why a request head could not be sniffed
#[derive(Debug, Error)]
pub enum SniffError {
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("Connection closed after {0} bytes, before the end of the request head")]
    Incomplete(usize),

    #[error("Request head exceeds {0} bytes")]
    HeadTooLarge(usize),

    #[error("Invalid HTTP request: {0}")]
    Parse(#[from] httparse::Error),

    #[error("Invalid request target: {0}")]
    InvalidTarget(String),

    #[error("Header {0} is not valid UTF-8")]
    InvalidHeader(&'static str),
}

impl SniffError {
    /// Whether the connection's deadline fired while reading
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::IoError(e) if e.kind() == io::ErrorKind::TimedOut)
    }
}

/// Outcome of a connection that was not handed to a tunnel
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("Malformed request: {0}")]
    MalformedRequest(#[source] SniffError),

    #[error("No tunnel found for {0}")]
    TunnelNotFound(RouteKey),

    #[error("Authorization failed for {0}")]
    NotAuthorized(RouteKey),
}

#[derive(Debug, Error)]
pub enum HttpServerError {
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("Failed to bind to {address}: {reason}\n\nTroubleshooting:\n  • Check if another process is using this port: lsof -i :{port}\n  • Try using a different address or port")]
    BindError {
        address: String,
        port: u16,
        reason: String,
    },
}
