//! Tunnels declared on the command line
//!
//! A static tunnel forwards every public connection routed to it to a fixed
//! backend address, copying bytes both ways until either side closes.

use async_trait::async_trait;
use portico_connection::PublicStream;
use portico_http_auth::{basic_credential, parse_user_password, AuthError};
use portico_router::Tunnel;
use std::str::FromStr;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum TunnelSpecError {
    #[error("Expected HOST=BACKEND[,auth=USER:PASS], got '{0}'")]
    MissingBackend(String),

    #[error("Tunnel host must not be empty")]
    EmptyHost,

    #[error("Unknown tunnel option '{0}'")]
    UnknownOption(String),

    #[error("Invalid tunnel auth: {0}")]
    InvalidAuth(#[from] AuthError),
}

/// `HOST=BACKEND[,auth=USER:PASS]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelSpec {
    pub host: String,
    pub backend: String,
    /// `Authorization` value required on requests, empty for public tunnels
    pub credential: String,
}

impl FromStr for TunnelSpec {
    type Err = TunnelSpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, rest) = s
            .split_once('=')
            .ok_or_else(|| TunnelSpecError::MissingBackend(s.to_string()))?;
        let host = host.trim();
        if host.is_empty() {
            return Err(TunnelSpecError::EmptyHost);
        }

        let mut parts = rest.split(',');
        let backend = parts.next().unwrap_or("").trim();
        if backend.is_empty() {
            return Err(TunnelSpecError::MissingBackend(s.to_string()));
        }

        let mut credential = String::new();
        for option in parts {
            match option.split_once('=') {
                Some(("auth", value)) => {
                    let (user, password) = parse_user_password(value)?;
                    credential = basic_credential(user, password);
                }
                _ => return Err(TunnelSpecError::UnknownOption(option.to_string())),
            }
        }

        Ok(Self {
            host: host.to_string(),
            backend: backend.to_string(),
            credential,
        })
    }
}

pub struct ForwardingTunnel {
    backend: String,
    credential: String,
}

impl ForwardingTunnel {
    pub fn new(spec: &TunnelSpec) -> Self {
        Self {
            backend: spec.backend.clone(),
            credential: spec.credential.clone(),
        }
    }
}

#[async_trait]
impl Tunnel for ForwardingTunnel {
    fn auth_credential(&self) -> &str {
        &self.credential
    }

    async fn handle_public_connection(&self, stream: PublicStream) {
        let peer_addr = stream.get_ref().peer_addr();
        let mut backend = match TcpStream::connect(&self.backend).await {
            Ok(backend) => backend,
            Err(e) => {
                warn!("Failed to connect to backend {}: {}", self.backend, e);
                return;
            }
        };

        // Forward the sniffed head, then relay the bare connection
        let (head, mut conn) = stream.into_parts();
        if let Err(e) = backend.write_all(&head).await {
            debug!("Failed to forward request head to {}: {}", self.backend, e);
            return;
        }

        match tokio::io::copy_bidirectional(&mut conn, &mut backend).await {
            Ok((to_backend, to_client)) => debug!(
                "Connection from {} closed ({} bytes in, {} bytes out)",
                peer_addr, to_backend, to_client
            ),
            Err(e) => debug!("Connection from {} to {} ended: {}", peer_addr, self.backend, e),
        }
    }
}
