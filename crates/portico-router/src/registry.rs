//! Tunnel registry and its read-only lookup facet

use crate::{RouteKey, Tunnel};
use dashmap::DashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, trace};

/// Registry errors
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Tunnel already registered for {0}")]
    AlreadyRegistered(RouteKey),

    #[error("No tunnel registered for {0}")]
    NotFound(RouteKey),
}

/// Read-only view of the registry used by the public listener
///
/// Lookups may race with registration; a lookup that runs before a
/// registration completes simply observes `None`.
pub trait TunnelLookup: Send + Sync {
    fn lookup(&self, key: &RouteKey) -> Option<Arc<dyn Tunnel>>;
}

/// Concurrent in-memory registry of live tunnels
#[derive(Default)]
pub struct TunnelRegistry {
    tunnels: DashMap<RouteKey, Arc<dyn Tunnel>>,
}

impl TunnelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tunnel under `key`
    pub fn register(&self, key: RouteKey, tunnel: Arc<dyn Tunnel>) -> Result<(), RegistryError> {
        match self.tunnels.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(entry) => {
                Err(RegistryError::AlreadyRegistered(entry.key().clone()))
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                debug!("Registering tunnel for {}", entry.key());
                entry.insert(tunnel);
                Ok(())
            }
        }
    }

    /// Remove the tunnel registered under `key`
    pub fn unregister(&self, key: &RouteKey) -> Result<Arc<dyn Tunnel>, RegistryError> {
        debug!("Unregistering tunnel for {}", key);
        self.tunnels
            .remove(key)
            .map(|(_, tunnel)| tunnel)
            .ok_or_else(|| RegistryError::NotFound(key.clone()))
    }

    pub fn exists(&self, key: &RouteKey) -> bool {
        self.tunnels.contains_key(key)
    }

    /// Number of registered tunnels
    pub fn count(&self) -> usize {
        self.tunnels.len()
    }

    /// All registered keys
    pub fn keys(&self) -> Vec<RouteKey> {
        self.tunnels.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn clear(&self) {
        self.tunnels.clear();
    }
}

impl TunnelLookup for TunnelRegistry {
    fn lookup(&self, key: &RouteKey) -> Option<Arc<dyn Tunnel>> {
        let found = self.tunnels.get(key).map(|entry| entry.value().clone());
        trace!("Tunnel lookup for {}: found={}", key, found.is_some());
        found
    }
}
