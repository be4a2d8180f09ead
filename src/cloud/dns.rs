//! Cloud DNS managed-zone facade.

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::Result;

use super::transport::{ApiClient, RoundTripper};
use super::types::ManagedZone;

/// Base URL of the Cloud DNS API.
pub const DNS_BASE_URL: &str = "https://dns.googleapis.com/dns/v1/";

/// Managed zone operations.
#[async_trait]
pub trait ManagedZoneClient: Send + Sync {
    /// Creates a zone.
    async fn create(&self, project: &str, zone: &ManagedZone) -> Result<ManagedZone>;
    /// Reads a zone.
    async fn get(&self, project: &str, name: &str) -> Result<ManagedZone>;
    /// Lists zones.
    async fn list(&self, project: &str) -> Result<Vec<ManagedZone>>;
}

/// Live managed zone facade.
#[derive(Debug, Clone)]
pub struct RestManagedZones {
    /// JSON client rooted at the DNS API.
    api: ApiClient,
}

impl RestManagedZones {
    /// Creates a client over `transport`.
    #[must_use]
    pub fn new(transport: Arc<dyn RoundTripper>) -> Self {
        Self {
            api: ApiClient::new(transport, DNS_BASE_URL),
        }
    }
}

#[async_trait]
impl ManagedZoneClient for RestManagedZones {
    async fn create(&self, project: &str, zone: &ManagedZone) -> Result<ManagedZone> {
        self.api
            .post(&format!("projects/{project}/managedZones"), zone)
            .await
    }

    async fn get(&self, project: &str, name: &str) -> Result<ManagedZone> {
        self.api
            .get(&format!("projects/{project}/managedZones/{name}"))
            .await
    }

    async fn list(&self, project: &str) -> Result<Vec<ManagedZone>> {
        #[derive(serde::Deserialize, Default)]
        #[serde(rename_all = "camelCase", default)]
        struct Zones {
            managed_zones: Vec<ManagedZone>,
        }
        let zones: Zones = self
            .api
            .get(&format!("projects/{project}/managedZones"))
            .await?;
        Ok(zones.managed_zones)
    }
}

/// Appends the trailing dot DNS names carry in the API.
#[must_use]
pub fn fqdn(name: &str) -> String {
    if name.ends_with('.') {
        name.to_string()
    } else {
        format!("{name}.")
    }
}
