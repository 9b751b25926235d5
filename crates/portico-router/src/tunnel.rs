//! Tunnel handle as seen by the public listener

use async_trait::async_trait;
use portico_connection::PublicStream;

/// A registered client session able to serve public connections
///
/// The listener only reads the credential and hands over connections; it
/// never mutates the tunnel.
#[async_trait]
pub trait Tunnel: Send + Sync {
    /// Credential a request's `Authorization` header must carry.
    ///
    /// An empty credential means the tunnel is public.
    fn auth_credential(&self) -> &str;

    /// Take ownership of a routed public connection.
    ///
    /// The stream replays the sniffed request head first, so the tunnel sees
    /// the connection from its first byte. The tunnel is responsible for
    /// eventually closing it.
    async fn handle_public_connection(&self, stream: PublicStream);
}
