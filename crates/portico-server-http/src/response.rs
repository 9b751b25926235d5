//! Fixed error responses written before closing an unroutable connection
//!
//! These are HTTP/1.0 responses with bare `\n` line endings. Each body ends
//! with a newline that is counted in `Content-Length`. Existing clients match
//! on these bytes, so they must not change.

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::debug;

const BAD_REQUEST: &str = "HTTP/1.0 400 Bad Request\nContent-Length: 12\n\nBad Request\n";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorResponse {
    /// The request head could not be parsed
    BadRequest,
    /// No tunnel is registered for `host`
    NotFound { host: String },
    /// The tunnel requires a credential the request did not carry
    NotAuthorized { realm: String },
}

impl ErrorResponse {
    pub fn status(&self) -> u16 {
        match self {
            Self::BadRequest => 400,
            Self::NotFound { .. } => 404,
            Self::NotAuthorized { .. } => 401,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Self::BadRequest => BAD_REQUEST.as_bytes().to_vec(),
            Self::NotFound { host } => {
                let body = format!("Tunnel {} not found\n", host);
                format!(
                    "HTTP/1.0 404 Not Found\nContent-Length: {}\n\n{}",
                    body.len(),
                    body
                )
                .into_bytes()
            }
            Self::NotAuthorized { realm } => format!(
                "HTTP/1.0 401 Not Authorized\nWWW-Authenticate: Basic realm=\"{}\"\nContent-Length: 23\n\nAuthorization required\n",
                realm
            )
            .into_bytes(),
        }
    }

    /// Write the response and close the write half.
    ///
    /// A failed write is only logged: the connection is dropped either way.
    pub async fn send<W: AsyncWrite + Unpin>(&self, writer: &mut W) {
        let result = async {
            writer.write_all(&self.to_bytes()).await?;
            writer.shutdown().await
        }
        .await;

        if let Err(e) = result {
            debug!("Failed to write {} response: {}", self.status(), e);
        }
    }
}
