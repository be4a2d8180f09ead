//! Google Cloud access layer.
//!
//! This module provides:
//! - Canonical resource URLs and naming helpers
//! - Wire types for the compute, IAM, storage and DNS APIs
//! - Narrow per-kind facades and their live REST implementations
//! - The operation waiter and the client registry
//! - [`GceCloud`], the handle tasks use to reach all of the above

pub mod compute;
pub mod dns;
pub mod iam;
pub mod naming;
pub mod registry;
pub mod rest;
pub mod storage;
pub mod transport;
pub mod types;
pub mod url;
pub mod waiter;

use std::sync::Arc;
use tracing::debug;

use crate::error::Result;

pub use compute::Compute;
pub use dns::ManagedZoneClient;
pub use iam::{IamClient, ServiceAccountClient};
pub use registry::CloudRegistry;
pub use storage::{GcsPath, StorageClient};
pub use transport::{ReqwestTransport, RoundTripper};
pub use url::{GoogleCloudUrl, Scope};
pub use waiter::{OperationWaiter, WaiterConfig};

use types::Operation;

/// Everything a [`GceCloud`] is assembled from.
pub struct CloudParts {
    /// Project id.
    pub project: String,
    /// Region.
    pub region: String,
    /// Compute facades.
    pub compute: Arc<dyn Compute>,
    /// Service account facade.
    pub service_accounts: Arc<dyn ServiceAccountClient>,
    /// DNS facade.
    pub dns: Arc<dyn ManagedZoneClient>,
    /// Transport for the HTTP-level clients (IAM roles and policies, storage).
    pub transport: Arc<dyn RoundTripper>,
    /// Waiter tuning.
    pub waiter: WaiterConfig,
}

/// Handle on one project and region of Google Cloud.
pub struct GceCloud {
    /// Project id.
    project: String,
    /// Region.
    region: String,
    /// Compute facades.
    compute: Arc<dyn Compute>,
    /// Service accounts.
    service_accounts: Arc<dyn ServiceAccountClient>,
    /// Managed zones.
    dns: Arc<dyn ManagedZoneClient>,
    /// Roles and project policy.
    iam: IamClient,
    /// Storage.
    storage: StorageClient,
    /// Waiter tuning.
    waiter: WaiterConfig,
}

impl std::fmt::Debug for GceCloud {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GceCloud")
            .field("project", &self.project)
            .field("region", &self.region)
            .finish_non_exhaustive()
    }
}

impl GceCloud {
    /// Assembles a handle from its parts.
    #[must_use]
    pub fn from_parts(parts: CloudParts) -> Self {
        Self {
            project: parts.project,
            region: parts.region,
            compute: parts.compute,
            service_accounts: parts.service_accounts,
            dns: parts.dns,
            iam: IamClient::new(Arc::clone(&parts.transport)),
            storage: StorageClient::new(parts.transport),
            waiter: parts.waiter,
        }
    }

    /// Creates a handle talking to the real APIs with an OAuth access token.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn live(project: &str, region: &str, token: &str, waiter: WaiterConfig) -> Result<Self> {
        debug!("Creating live cloud handle for {project} in {region}");
        let transport: Arc<dyn RoundTripper> = Arc::new(ReqwestTransport::new(token)?);
        Ok(Self::from_parts(CloudParts {
            project: project.to_string(),
            region: region.to_string(),
            compute: Arc::new(rest::RestCompute::new(Arc::clone(&transport))),
            service_accounts: Arc::new(iam::RestServiceAccounts::new(Arc::clone(&transport))),
            dns: Arc::new(dns::RestManagedZones::new(Arc::clone(&transport))),
            transport,
            waiter,
        }))
    }

    /// Project id.
    #[must_use]
    pub fn project(&self) -> &str {
        &self.project
    }

    /// Region.
    #[must_use]
    pub fn region(&self) -> &str {
        &self.region
    }

    /// Compute facades.
    #[must_use]
    pub fn compute(&self) -> &dyn Compute {
        self.compute.as_ref()
    }

    /// Service account facade.
    #[must_use]
    pub fn service_accounts(&self) -> &dyn ServiceAccountClient {
        self.service_accounts.as_ref()
    }

    /// Managed zone facade.
    #[must_use]
    pub fn dns(&self) -> &dyn ManagedZoneClient {
        self.dns.as_ref()
    }

    /// Roles and project policy client.
    #[must_use]
    pub const fn iam(&self) -> &IamClient {
        &self.iam
    }

    /// Storage client.
    #[must_use]
    pub const fn storage(&self) -> &StorageClient {
        &self.storage
    }

    /// Waits for an operation using the handle's waiter settings.
    ///
    /// # Errors
    ///
    /// See [`OperationWaiter::wait`].
    pub async fn wait(&self, op: &Operation) -> Result<()> {
        OperationWaiter::new(self.compute.operations(), self.waiter)
            .wait(op)
            .await
    }

    /// Names of the zones in the handle's region.
    ///
    /// # Errors
    ///
    /// Returns an error if the zones cannot be listed.
    pub async fn zones(&self) -> Result<Vec<String>> {
        let mut zones: Vec<String> = self
            .compute
            .locations()
            .list_zones(&self.project, Some(&self.region))
            .await?
            .into_iter()
            .map(|z| z.name)
            .collect();
        zones.sort();
        Ok(zones)
    }

    /// Email of the project's default compute service account.
    ///
    /// # Errors
    ///
    /// Returns an error if the project cannot be read.
    pub async fn default_service_account(&self) -> Result<String> {
        let project = self.compute.locations().get_project(&self.project).await?;
        if project.default_service_account.is_empty() {
            Ok(format!("{}-compute@developer.gserviceaccount.com", project.id))
        } else {
            Ok(project.default_service_account)
        }
    }
}
