//! Public HTTP listener and per-connection dispatcher

use crate::error::{ConnectionError, HttpServerError};
use crate::response::ErrorResponse;
use crate::sniff::{RequestSniffer, SniffFailure, DEFAULT_MAX_HEAD_LEN};
use futures_util::FutureExt;
use portico_connection::PublicConnection;
use portico_http_auth::{AccessGate, CredentialMatch};
use portico_router::{RouteKey, TunnelLookup, HTTP_SCHEME};
use std::any::Any;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Pause after a failed accept so a persistent error does not spin the loop
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
pub struct HttpServerConfig {
    pub bind_addr: SocketAddr,
    /// Scheme half of the routing key
    pub scheme: String,
    /// How long a connection may take to send its request head
    pub sniff_timeout: Duration,
    pub max_head_len: usize,
    /// Realm announced in `WWW-Authenticate`
    pub realm: String,
    pub credential_match: CredentialMatch,
}

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 80)),
            scheme: HTTP_SCHEME.to_string(),
            sniff_timeout: Duration::from_secs(10),
            max_head_len: DEFAULT_MAX_HEAD_LEN,
            realm: "portico".to_string(),
            credential_match: CredentialMatch::Exact,
        }
    }
}

/// Routes one public connection at a time to its tunnel
pub struct Dispatcher {
    scheme: String,
    sniff_timeout: Duration,
    realm: String,
    sniffer: RequestSniffer,
    gate: AccessGate,
    lookup: Arc<dyn TunnelLookup>,
}

impl Dispatcher {
    pub fn new(config: &HttpServerConfig, lookup: Arc<dyn TunnelLookup>) -> Self {
        Self {
            scheme: config.scheme.clone(),
            sniff_timeout: config.sniff_timeout,
            realm: config.realm.clone(),
            sniffer: RequestSniffer::new(config.max_head_len),
            gate: AccessGate::new(config.credential_match),
            lookup,
        }
    }

    /// Process a connection to completion, containing any failure.
    ///
    /// Errors and panics end here: they are logged and only close this
    /// connection.
    pub async fn dispatch(self: Arc<Self>, conn: PublicConnection) {
        let peer_addr = conn.peer_addr();
        match AssertUnwindSafe(self.handle_connection(conn))
            .catch_unwind()
            .await
        {
            Ok(Ok(())) => debug!("Connection from {} handed off", peer_addr),
            Ok(Err(e)) => self.log_failure(peer_addr, &e),
            Err(panic) => warn!(
                "Handler for connection from {} panicked: {}",
                peer_addr,
                panic_message(panic.as_ref())
            ),
        }
    }

    /// Sniff, route, authorize and hand off a single connection.
    ///
    /// Returns once the tunnel's handler returns, or once an error response
    /// has been written.
    pub async fn handle_connection(
        &self,
        mut conn: PublicConnection,
    ) -> Result<(), ConnectionError> {
        let peer_addr = conn.peer_addr();

        // Dead or slow clients must not hold the task while we decide where to route
        conn.arm_deadline(self.sniff_timeout);

        let (metadata, mut stream) = match self.sniffer.sniff(conn).await {
            Ok(sniffed) => sniffed,
            Err(SniffFailure { error, mut stream }) => {
                ErrorResponse::BadRequest.send(&mut stream).await;
                return Err(ConnectionError::MalformedRequest(error));
            }
        };

        let host = metadata.virtual_host();
        debug!(
            "Found hostname {} in {} {} from {}",
            host, metadata.method, metadata.target, peer_addr
        );

        let key = RouteKey::new(&self.scheme, host);
        let Some(tunnel) = self.lookup.lookup(&key) else {
            let response = ErrorResponse::NotFound {
                host: host.to_string(),
            };
            response.send(&mut stream).await;
            return Err(ConnectionError::TunnelNotFound(key));
        };

        if !self
            .gate
            .check(tunnel.auth_credential(), &metadata.authorization)
        {
            let response = ErrorResponse::NotAuthorized {
                realm: self.realm.clone(),
            };
            response.send(&mut stream).await;
            return Err(ConnectionError::NotAuthorized(key));
        }

        // From here on dead connections are detected by the tunnel session
        stream.get_mut().clear_deadline();

        debug!("Handing connection from {} to tunnel {}", peer_addr, key);
        tunnel.handle_public_connection(stream).await;
        Ok(())
    }

    fn log_failure(&self, peer_addr: SocketAddr, err: &ConnectionError) {
        match err {
            ConnectionError::MalformedRequest(e) if e.is_timeout() => {
                debug!(
                    "Timed out waiting for {} request from {}",
                    self.scheme, peer_addr
                );
            }
            ConnectionError::MalformedRequest(e) => {
                warn!(
                    "Failed to read valid {} request from {}: {}",
                    self.scheme, peer_addr, e
                );
            }
            ConnectionError::TunnelNotFound(key) => {
                info!("No tunnel found for {} (from {})", key, peer_addr);
            }
            ConnectionError::NotAuthorized(key) => {
                info!("Authentication failed for {} (from {})", key, peer_addr);
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}

/// Public HTTP listener
pub struct HttpServer {
    listener: TcpListener,
    dispatcher: Arc<Dispatcher>,
}

impl HttpServer {
    /// Bind the listener socket.
    ///
    /// Failing to bind is a startup error the caller should not recover from.
    pub async fn bind(
        config: HttpServerConfig,
        lookup: Arc<dyn TunnelLookup>,
    ) -> Result<Self, HttpServerError> {
        let listener = TcpListener::bind(config.bind_addr).await.map_err(|e| {
            let port = config.bind_addr.port();
            let address = config.bind_addr.ip().to_string();
            let reason = e.to_string();
            HttpServerError::BindError {
                address,
                port,
                reason,
            }
        })?;

        info!(
            "Listening for public {} connections on {}",
            config.scheme,
            listener.local_addr()?
        );

        Ok(Self {
            listener,
            dispatcher: Arc::new(Dispatcher::new(&config, lookup)),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Run the accept loop on a background task
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Accept connections forever, one task per connection
    pub async fn run(self) {
        loop {
            match self.listener.accept().await {
                Ok((socket, peer_addr)) => {
                    info!("New connection from {}", peer_addr);
                    let conn = PublicConnection::new(socket, peer_addr);
                    tokio::spawn(self.dispatcher.clone().dispatch(conn));
                }
                Err(e) => {
                    error!("Failed to accept public connection: {}", e);
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                }
            }
        }
    }
}
