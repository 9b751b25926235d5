//! Public HTTP ingress for tunnels
//!
//! Accepts raw TCP connections, sniffs the HTTP request head for the virtual
//! host and credential, and hands the untouched byte stream to the matching
//! tunnel. Requests that cannot be routed get a short HTTP/1.0 error response.
pub mod error;
pub mod response;
pub mod server;
pub mod sniff;

pub use error::{ConnectionError, HttpServerError, SniffError};
pub use response::ErrorResponse;
pub use server::{Dispatcher, HttpServer, HttpServerConfig};
pub use sniff::{RequestMetadata, RequestSniffer, SniffFailure, DEFAULT_MAX_HEAD_LEN};
