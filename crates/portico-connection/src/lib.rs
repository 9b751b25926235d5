//! Public connection handling for the ingress listener
//!
//! A public connection goes through two wrappers before it reaches a tunnel:
//! - [`PublicConnection`] owns the socket and its deadline while the request is
//!   still unclassified.
//! - [`ReplayStream`] keeps the bytes consumed during request sniffing and
//!   replays them ahead of the live socket, so the tunnel sees the stream from
//!   its very first byte.

pub mod deadline;
pub mod replay;

pub use deadline::{PublicConnection, PublicIo};
pub use replay::ReplayStream;

/// The stream a tunnel takes ownership of on handoff
pub type PublicStream = ReplayStream<PublicConnection>;
