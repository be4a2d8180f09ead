//! In-memory Google Cloud.
//!
//! [`MockCloud`] implements every compute facade, the service account and DNS
//! facades, and answers the IAM policy, IAM role and Cloud Storage APIs at the
//! HTTP level through [`SimulatorTransport`]. Every kind is guarded by its own
//! mutex; operations are returned already `DONE`.

pub mod compute;
pub mod http;
pub mod services;
pub mod store;

use std::sync::Arc;

use crate::cloud::types::Policy;
use crate::cloud::{CloudParts, CloudRegistry, GceCloud, WaiterConfig};

pub use compute::MockCompute;
pub use http::{SimulatorTransport, next_etag};
pub use services::{MockManagedZones, MockServiceAccounts};

/// A complete simulated cloud shared by any number of handles.
#[derive(Debug, Default, Clone)]
pub struct MockCloud {
    compute: Arc<MockCompute>,
    service_accounts: Arc<MockServiceAccounts>,
    dns: Arc<MockManagedZones>,
    http: Arc<SimulatorTransport>,
}

impl MockCloud {
    /// Creates an empty simulated cloud.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A handle on `project` and `region` backed by this simulator.
    #[must_use]
    pub fn cloud(&self, project: &str, region: &str) -> GceCloud {
        GceCloud::from_parts(CloudParts {
            project: project.to_string(),
            region: region.to_string(),
            compute: Arc::clone(&self.compute) as _,
            service_accounts: Arc::clone(&self.service_accounts) as _,
            dns: Arc::clone(&self.dns) as _,
            transport: Arc::clone(&self.http) as _,
            waiter: WaiterConfig::default(),
        })
    }

    /// A registry whose handles are all backed by this simulator.
    #[must_use]
    pub fn registry(&self) -> CloudRegistry {
        let sim = self.clone();
        CloudRegistry::new(Box::new(move |project, region| Ok(sim.cloud(project, region))))
    }

    /// The compute side, for seeding and inspection.
    #[must_use]
    pub fn compute(&self) -> &MockCompute {
        &self.compute
    }

    /// The HTTP side, for seeding and inspection.
    #[must_use]
    pub fn http(&self) -> &SimulatorTransport {
        &self.http
    }

    /// Current project policy, if one was read or written.
    #[must_use]
    pub fn project_policy(&self, project: &str) -> Option<Policy> {
        self.http.project_policy(project)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_handle_reports_project_not_region() {
        let sim = MockCloud::new();
        let cloud = sim.cloud("my-project", "us-central1");
        assert_eq!(cloud.project(), "my-project");
        assert_eq!(cloud.region(), "us-central1");
        assert_eq!(
            cloud.zones().await.expect("zones"),
            ["us-central1-a", "us-central1-b", "us-central1-c", "us-central1-f"]
        );
    }

    #[tokio::test]
    async fn test_registry_handles_share_the_simulator() {
        let sim = MockCloud::new();
        let registry = sim.registry();
        let cloud = registry.get("p", "us-central1").expect("handle");
        let policy = cloud.iam().get_project_policy("p").await.expect("policy");
        assert_eq!(sim.project_policy("p"), Some(policy));
        assert!(Arc::ptr_eq(&cloud, &registry.get("p", "us-central1").expect("cached")));
    }

    #[tokio::test]
    async fn test_handles_share_state() {
        let sim = MockCloud::new();
        let a = sim.cloud("p", "us-central1");
        let b = sim.cloud("p", "us-central1");
        let policy = a.iam().get_project_policy("p").await.expect("policy");
        let mut updated = policy.clone();
        updated.add_member("roles/viewer", "user:x@example.com");
        a.iam().set_project_policy("p", &updated).await.expect("written");

        let err = b
            .iam()
            .set_project_policy("p", &updated)
            .await
            .expect_err("stale etag");
        assert!(err.is_etag_mismatch());
    }
}
