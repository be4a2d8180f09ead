//! Narrow per-kind facades over the compute API.
//!
//! Each resource kind gets its own small trait so that callers and tests only
//! depend on what they use. The live REST client and the in-memory simulator
//! both implement every facade; [`Compute`] hands out the per-kind views.
//!
//! Facades for addresses, forwarding rules, health checks and backend services
//! route to the global collection when `region` is empty.

use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::error::Result;

use super::types::{
    Address, BackendService, Disk, Firewall, ForwardingRule, HealthCheck, HttpHealthCheck,
    InstanceGroupManager, InstanceManagedByIgmError, InstanceTemplate, ManagedInstance, Network,
    Operation, Project, Region, Router, Subnetwork, TargetPool, Zone,
};
use super::url::Scope;

/// Network operations.
#[async_trait]
pub trait NetworkClient: Send + Sync {
    /// Creates a network.
    async fn insert(&self, project: &str, network: &Network) -> Result<Operation>;
    /// Reads a network.
    async fn get(&self, project: &str, name: &str) -> Result<Network>;
    /// Deletes a network.
    async fn delete(&self, project: &str, name: &str) -> Result<Operation>;
    /// Lists networks.
    async fn list(&self, project: &str) -> Result<Vec<Network>>;
}

/// Subnetwork operations.
#[async_trait]
pub trait SubnetworkClient: Send + Sync {
    /// Creates a subnet.
    async fn insert(&self, project: &str, region: &str, subnet: &Subnetwork) -> Result<Operation>;
    /// Patches a subnet; the body must carry the current fingerprint.
    async fn patch(&self, project: &str, region: &str, subnet: &Subnetwork) -> Result<Operation>;
    /// Reads a subnet.
    async fn get(&self, project: &str, region: &str, name: &str) -> Result<Subnetwork>;
    /// Deletes a subnet.
    async fn delete(&self, project: &str, region: &str, name: &str) -> Result<Operation>;
    /// Lists the subnets of a region.
    async fn list(&self, project: &str, region: &str) -> Result<Vec<Subnetwork>>;
}

/// Firewall operations.
#[async_trait]
pub trait FirewallClient: Send + Sync {
    /// Creates a rule.
    async fn insert(&self, project: &str, firewall: &Firewall) -> Result<Operation>;
    /// Replaces a rule.
    async fn update(&self, project: &str, name: &str, firewall: &Firewall) -> Result<Operation>;
    /// Reads a rule.
    async fn get(&self, project: &str, name: &str) -> Result<Firewall>;
    /// Deletes a rule.
    async fn delete(&self, project: &str, name: &str) -> Result<Operation>;
    /// Lists rules.
    async fn list(&self, project: &str) -> Result<Vec<Firewall>>;
}

/// Router operations.
#[async_trait]
pub trait RouterClient: Send + Sync {
    /// Creates a router.
    async fn insert(&self, project: &str, region: &str, router: &Router) -> Result<Operation>;
    /// Patches a router.
    async fn patch(&self, project: &str, region: &str, router: &Router) -> Result<Operation>;
    /// Reads a router.
    async fn get(&self, project: &str, region: &str, name: &str) -> Result<Router>;
    /// Deletes a router.
    async fn delete(&self, project: &str, region: &str, name: &str) -> Result<Operation>;
    /// Lists the routers of a region.
    async fn list(&self, project: &str, region: &str) -> Result<Vec<Router>>;
}

/// Address operations. An empty `region` targets global addresses.
#[async_trait]
pub trait AddressClient: Send + Sync {
    /// Reserves an address.
    async fn insert(&self, project: &str, region: &str, address: &Address) -> Result<Operation>;
    /// Reads an address.
    async fn get(&self, project: &str, region: &str, name: &str) -> Result<Address>;
    /// Releases an address.
    async fn delete(&self, project: &str, region: &str, name: &str) -> Result<Operation>;
    /// Lists addresses.
    async fn list(&self, project: &str, region: &str) -> Result<Vec<Address>>;
    /// Lists addresses matching a `field = value` filter.
    async fn list_with_filter(
        &self,
        project: &str,
        region: &str,
        filter: &str,
    ) -> Result<Vec<Address>>;
}

/// Forwarding rule operations. An empty `region` targets global rules.
#[async_trait]
pub trait ForwardingRuleClient: Send + Sync {
    /// Creates a rule.
    async fn insert(&self, project: &str, region: &str, rule: &ForwardingRule) -> Result<Operation>;
    /// Reads a rule.
    async fn get(&self, project: &str, region: &str, name: &str) -> Result<ForwardingRule>;
    /// Deletes a rule.
    async fn delete(&self, project: &str, region: &str, name: &str) -> Result<Operation>;
    /// Lists rules.
    async fn list(&self, project: &str, region: &str) -> Result<Vec<ForwardingRule>>;
}

/// Legacy HTTP health check operations.
#[async_trait]
pub trait HttpHealthCheckClient: Send + Sync {
    /// Creates a check.
    async fn insert(&self, project: &str, check: &HttpHealthCheck) -> Result<Operation>;
    /// Reads a check.
    async fn get(&self, project: &str, name: &str) -> Result<HttpHealthCheck>;
    /// Deletes a check.
    async fn delete(&self, project: &str, name: &str) -> Result<Operation>;
    /// Lists checks.
    async fn list(&self, project: &str) -> Result<Vec<HttpHealthCheck>>;
}

/// Health check operations. An empty `region` targets global checks.
#[async_trait]
pub trait HealthCheckClient: Send + Sync {
    /// Creates a check.
    async fn insert(&self, project: &str, region: &str, check: &HealthCheck) -> Result<Operation>;
    /// Reads a check.
    async fn get(&self, project: &str, region: &str, name: &str) -> Result<HealthCheck>;
    /// Deletes a check.
    async fn delete(&self, project: &str, region: &str, name: &str) -> Result<Operation>;
    /// Lists checks.
    async fn list(&self, project: &str, region: &str) -> Result<Vec<HealthCheck>>;
}

/// Backend service operations. An empty `region` targets global services.
#[async_trait]
pub trait BackendServiceClient: Send + Sync {
    /// Creates a service.
    async fn insert(&self, project: &str, region: &str, service: &BackendService)
    -> Result<Operation>;
    /// Replaces a service.
    async fn update(&self, project: &str, region: &str, service: &BackendService)
    -> Result<Operation>;
    /// Reads a service.
    async fn get(&self, project: &str, region: &str, name: &str) -> Result<BackendService>;
    /// Deletes a service.
    async fn delete(&self, project: &str, region: &str, name: &str) -> Result<Operation>;
    /// Lists services.
    async fn list(&self, project: &str, region: &str) -> Result<Vec<BackendService>>;
}

/// Target pool operations.
#[async_trait]
pub trait TargetPoolClient: Send + Sync {
    /// Creates a pool.
    async fn insert(&self, project: &str, region: &str, pool: &TargetPool) -> Result<Operation>;
    /// Reads a pool.
    async fn get(&self, project: &str, region: &str, name: &str) -> Result<TargetPool>;
    /// Deletes a pool.
    async fn delete(&self, project: &str, region: &str, name: &str) -> Result<Operation>;
    /// Lists pools.
    async fn list(&self, project: &str, region: &str) -> Result<Vec<TargetPool>>;
    /// Attaches an HTTP health check to a pool.
    async fn add_health_check(
        &self,
        project: &str,
        region: &str,
        pool: &str,
        health_check_link: &str,
    ) -> Result<Operation>;
}

/// Instance template operations.
#[async_trait]
pub trait InstanceTemplateClient: Send + Sync {
    /// Creates a template.
    async fn insert(&self, project: &str, template: &InstanceTemplate) -> Result<Operation>;
    /// Reads a template.
    async fn get(&self, project: &str, name: &str) -> Result<InstanceTemplate>;
    /// Deletes a template.
    async fn delete(&self, project: &str, name: &str) -> Result<Operation>;
    /// Lists templates.
    async fn list(&self, project: &str) -> Result<Vec<InstanceTemplate>>;
}

/// Managed instance group operations.
#[async_trait]
pub trait InstanceGroupManagerClient: Send + Sync {
    /// Creates a group.
    async fn insert(&self, project: &str, zone: &str, igm: &InstanceGroupManager)
    -> Result<Operation>;
    /// Reads a group.
    async fn get(&self, project: &str, zone: &str, name: &str) -> Result<InstanceGroupManager>;
    /// Deletes a group.
    async fn delete(&self, project: &str, zone: &str, name: &str) -> Result<Operation>;
    /// Lists the groups of a zone.
    async fn list(&self, project: &str, zone: &str) -> Result<Vec<InstanceGroupManager>>;
    /// Lists the instances a group manages.
    async fn list_managed_instances(
        &self,
        project: &str,
        zone: &str,
        name: &str,
    ) -> Result<Vec<ManagedInstance>>;
    /// Lists the errors the group hit while creating or recreating instances.
    async fn list_errors(
        &self,
        project: &str,
        zone: &str,
        name: &str,
    ) -> Result<Vec<InstanceManagedByIgmError>>;
    /// Recreates the given instances.
    async fn recreate_instances(
        &self,
        project: &str,
        zone: &str,
        name: &str,
        instances: &[String],
    ) -> Result<Operation>;
    /// Replaces the group's target pools.
    async fn set_target_pools(
        &self,
        project: &str,
        zone: &str,
        name: &str,
        pools: &[String],
    ) -> Result<Operation>;
    /// Points the group at another template.
    async fn set_instance_template(
        &self,
        project: &str,
        zone: &str,
        name: &str,
        template_link: &str,
    ) -> Result<Operation>;
    /// Changes the target size.
    async fn resize(&self, project: &str, zone: &str, name: &str, size: i64) -> Result<Operation>;
}

/// Persistent disk operations.
#[async_trait]
pub trait DiskClient: Send + Sync {
    /// Creates a disk.
    async fn insert(&self, project: &str, zone: &str, disk: &Disk) -> Result<Operation>;
    /// Reads a disk.
    async fn get(&self, project: &str, zone: &str, name: &str) -> Result<Disk>;
    /// Deletes a disk.
    async fn delete(&self, project: &str, zone: &str, name: &str) -> Result<Operation>;
    /// Lists the disks of a zone matching an optional filter.
    async fn list(&self, project: &str, zone: &str, filter: Option<&str>) -> Result<Vec<Disk>>;
    /// Lists disks in every zone.
    async fn aggregated_list(&self, project: &str) -> Result<Vec<Disk>>;
    /// Replaces the labels of a disk, guarded by its label fingerprint.
    async fn set_labels(
        &self,
        project: &str,
        zone: &str,
        name: &str,
        labels: &BTreeMap<String, String>,
        fingerprint: &str,
    ) -> Result<Operation>;
}

/// Zone and region discovery.
#[async_trait]
pub trait LocationClient: Send + Sync {
    /// Lists zones, optionally restricted to a region.
    async fn list_zones(&self, project: &str, region: Option<&str>) -> Result<Vec<Zone>>;
    /// Lists regions.
    async fn list_regions(&self, project: &str) -> Result<Vec<Region>>;
    /// Reads the project.
    async fn get_project(&self, project: &str) -> Result<Project>;
}

/// Operation polling, one endpoint per scope.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OperationClient: Send + Sync {
    /// Reads the current state of an operation.
    async fn get(&self, project: &str, scope: &Scope, name: &str) -> Result<Operation>;
}

/// The compute API as a set of per-kind capabilities.
pub trait Compute: Send + Sync {
    /// Networks.
    fn networks(&self) -> &dyn NetworkClient;
    /// Subnetworks.
    fn subnetworks(&self) -> &dyn SubnetworkClient;
    /// Firewall rules.
    fn firewalls(&self) -> &dyn FirewallClient;
    /// Routers.
    fn routers(&self) -> &dyn RouterClient;
    /// Addresses.
    fn addresses(&self) -> &dyn AddressClient;
    /// Forwarding rules.
    fn forwarding_rules(&self) -> &dyn ForwardingRuleClient;
    /// HTTP health checks.
    fn http_health_checks(&self) -> &dyn HttpHealthCheckClient;
    /// Health checks.
    fn health_checks(&self) -> &dyn HealthCheckClient;
    /// Backend services.
    fn backend_services(&self) -> &dyn BackendServiceClient;
    /// Target pools.
    fn target_pools(&self) -> &dyn TargetPoolClient;
    /// Instance templates.
    fn instance_templates(&self) -> &dyn InstanceTemplateClient;
    /// Managed instance groups.
    fn instance_group_managers(&self) -> &dyn InstanceGroupManagerClient;
    /// Disks.
    fn disks(&self) -> &dyn DiskClient;
    /// Zones, regions and projects.
    fn locations(&self) -> &dyn LocationClient;
    /// Operations.
    fn operations(&self) -> &dyn OperationClient;
}
