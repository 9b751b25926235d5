//! Routing for public HTTP connections
//!
//! Maps a [`RouteKey`] (`scheme://host`) to the [`Tunnel`] registered for it.
//! The listener only ever sees the read-only [`TunnelLookup`] facet; the
//! control plane owns registration through [`TunnelRegistry`].

pub mod registry;
pub mod tunnel;

pub use registry::{RegistryError, TunnelLookup, TunnelRegistry};
pub use tunnel::Tunnel;

use std::fmt;

/// Scheme used by the plain HTTP listener
pub const HTTP_SCHEME: &str = "http";

/// Registry key for a tunnel: `scheme://host`, lowercased
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RouteKey(String);

impl RouteKey {
    pub fn new(scheme: &str, host: &str) -> Self {
        Self(format!(
            "{}://{}",
            scheme.to_ascii_lowercase(),
            host.to_lowercase()
        ))
    }

    /// Key for the plain HTTP listener
    pub fn http(host: &str) -> Self {
        Self::new(HTTP_SCHEME, host)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn scheme(&self) -> &str {
        self.0.split_once("://").map(|(scheme, _)| scheme).unwrap_or("")
    }

    pub fn host(&self) -> &str {
        self.0.split_once("://").map(|(_, host)| host).unwrap_or("")
    }
}

impl fmt::Display for RouteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
