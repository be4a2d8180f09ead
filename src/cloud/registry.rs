//! Cache of cloud handles keyed by `region::project`.
//!
//! Callers that talk to several projects or regions in one run share handles
//! through an explicit registry instead of a process-wide map.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

use crate::error::Result;

use super::{GceCloud, WaiterConfig};

/// Builds a handle for a `(project, region)` pair.
pub type CloudFactory = dyn Fn(&str, &str) -> Result<GceCloud> + Send + Sync;

/// Registry of cloud handles.
pub struct CloudRegistry {
    /// Cached handles.
    clients: Mutex<HashMap<String, Arc<GceCloud>>>,
    /// Constructor for missing entries.
    factory: Box<CloudFactory>,
}

impl std::fmt::Debug for CloudRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let clients = self.clients.lock().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("CloudRegistry")
            .field("keys", &clients.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl CloudRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new(factory: Box<CloudFactory>) -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
            factory,
        }
    }

    /// Creates a registry of live handles authenticated with `token`.
    #[must_use]
    pub fn live(token: impl Into<String>, waiter: WaiterConfig) -> Self {
        let token = token.into();
        Self::new(Box::new(move |project, region| {
            GceCloud::live(project, region, &token, waiter)
        }))
    }

    /// Cache key of a handle.
    #[must_use]
    pub fn key(project: &str, region: &str) -> String {
        format!("{region}::{project}")
    }

    /// Returns the cached handle for `(project, region)`, creating it on first use.
    ///
    /// # Errors
    ///
    /// Returns the factory's error if a new handle cannot be built.
    pub fn get(&self, project: &str, region: &str) -> Result<Arc<GceCloud>> {
        let key = Self::key(project, region);
        let mut clients = self.clients.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(cloud) = clients.get(&key) {
            return Ok(Arc::clone(cloud));
        }
        debug!("Creating cloud client for {key}");
        let cloud = Arc::new((self.factory)(project, region)?);
        clients.insert(key, Arc::clone(&cloud));
        Ok(cloud)
    }

    /// Registers an existing handle, replacing any cached one.
    pub fn insert(&self, cloud: Arc<GceCloud>) {
        let key = Self::key(cloud.project(), cloud.region());
        self.clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, cloud);
    }

    /// Number of cached handles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.clients.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Returns true if nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulator::MockCloud;

    #[test]
    fn test_registry_caches_per_region_and_project() {
        let sim = Arc::new(MockCloud::new());
        let registry = CloudRegistry::new(Box::new(move |project, region| {
            Ok(sim.cloud(project, region))
        }));

        let a = registry.get("p1", "us-central1").expect("created");
        let b = registry.get("p1", "us-central1").expect("cached");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.project(), "p1");

        registry.get("p2", "us-central1").expect("created");
        registry.get("p1", "europe-west1").expect("created");
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_live_registry_builds_handles_lazily() {
        let registry = CloudRegistry::live("token", WaiterConfig::default());
        assert!(registry.is_empty());
        let cloud = registry.get("p", "europe-west1").expect("created");
        assert_eq!(cloud.project(), "p");
        assert_eq!(cloud.region(), "europe-west1");
        assert_eq!(CloudRegistry::key("p", "europe-west1"), "europe-west1::p");
        assert_eq!(registry.len(), 1);
    }
}
