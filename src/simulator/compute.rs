//! In-memory implementation of the compute facades.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use tracing::trace;

use crate::cloud::compute::{
    AddressClient, BackendServiceClient, Compute, DiskClient, FirewallClient, ForwardingRuleClient,
    HealthCheckClient, HttpHealthCheckClient, InstanceGroupManagerClient, InstanceTemplateClient,
    LocationClient, NetworkClient, OperationClient, RouterClient, SubnetworkClient,
    TargetPoolClient,
};
use crate::cloud::types::{
    Address, BackendService, Disk, Firewall, ForwardingRule, HealthCheck, HttpHealthCheck,
    InstanceGroupManager, InstanceManagedByIgmError, InstanceTemplate, ManagedInstance,
    ManagedInstanceVersion, Network, Operation, OperationStatus, Project, Region, Router,
    Subnetwork, TargetPool, Zone,
};
use crate::cloud::url::{GoogleCloudUrl, Scope, last_component};
use crate::error::{CloudError, Result};

use super::store::{ScopedStore, SimResource, matches_filter};

/// In-memory compute API.
#[derive(Debug)]
pub struct MockCompute {
    networks: ScopedStore<Network>,
    subnetworks: ScopedStore<Subnetwork>,
    firewalls: ScopedStore<Firewall>,
    routers: ScopedStore<Router>,
    addresses: ScopedStore<Address>,
    forwarding_rules: ScopedStore<ForwardingRule>,
    http_health_checks: ScopedStore<HttpHealthCheck>,
    health_checks: ScopedStore<HealthCheck>,
    backend_services: ScopedStore<BackendService>,
    target_pools: ScopedStore<TargetPool>,
    instance_templates: ScopedStore<InstanceTemplate>,
    instance_group_managers: ScopedStore<InstanceGroupManager>,
    disks: ScopedStore<Disk>,
    operations: ScopedStore<Operation>,
    /// Region name to zone names.
    regions: Mutex<BTreeMap<String, Vec<String>>>,
    /// Instance link to the template link it was created from.
    instance_versions: Mutex<BTreeMap<String, String>>,
    /// Group link to the errors it reports.
    igm_errors: Mutex<BTreeMap<String, Vec<InstanceManagedByIgmError>>>,
    /// Source of ids and addresses.
    counter: AtomicU64,
}

impl Default for MockCompute {
    fn default() -> Self {
        Self::new()
    }
}

impl MockCompute {
    /// Creates an empty compute API with `us-central1` and `europe-west1` zones.
    #[must_use]
    pub fn new() -> Self {
        let regions = BTreeMap::from([
            (
                "us-central1".to_string(),
                ["a", "b", "c", "f"].iter().map(|z| format!("us-central1-{z}")).collect(),
            ),
            (
                "europe-west1".to_string(),
                ["b", "c", "d"].iter().map(|z| format!("europe-west1-{z}")).collect(),
            ),
        ]);
        Self {
            networks: ScopedStore::new("network"),
            subnetworks: ScopedStore::new("subnetwork"),
            firewalls: ScopedStore::new("firewall"),
            routers: ScopedStore::new("router"),
            addresses: ScopedStore::new("address"),
            forwarding_rules: ScopedStore::new("forwardingRule"),
            http_health_checks: ScopedStore::new("httpHealthCheck"),
            health_checks: ScopedStore::new("healthCheck"),
            backend_services: ScopedStore::new("backendService"),
            target_pools: ScopedStore::new("targetPool"),
            instance_templates: ScopedStore::new("instanceTemplate"),
            instance_group_managers: ScopedStore::new("instanceGroupManager"),
            disks: ScopedStore::new("disk"),
            operations: ScopedStore::new("operation"),
            regions: Mutex::new(regions),
            instance_versions: Mutex::new(BTreeMap::new()),
            igm_errors: Mutex::new(BTreeMap::new()),
            counter: AtomicU64::new(1000),
        }
    }

    /// Declares a region and its zones.
    pub fn add_region(&self, region: &str, zones: &[&str]) {
        self.regions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(region.to_string(), zones.iter().map(ToString::to_string).collect());
    }

    /// Number of instance templates stored across projects.
    #[must_use]
    pub fn instance_template_count(&self) -> usize {
        self.instance_templates.len()
    }

    /// Records an error reported by a managed instance group.
    pub fn seed_igm_error(&self, project: &str, zone: &str, name: &str, error: InstanceManagedByIgmError) {
        let link = GoogleCloudUrl::zonal(project, zone, "instanceGroupManagers", name).to_string();
        self.igm_errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(link)
            .or_default()
            .push(error);
    }

    /// Links of the instances a group manages, in creation order.
    fn instance_links(project: &str, zone: &str, igm: &InstanceGroupManager) -> Vec<String> {
        (0..igm.target_size.max(0))
            .map(|i| {
                GoogleCloudUrl::zonal(
                    project,
                    zone,
                    "instances",
                    &format!("{}-{i:04}", igm.base_instance_name),
                )
                .to_string()
            })
            .collect()
    }

    /// Template each instance runs, defaulting new instances to the group's template.
    fn versions_of(&self, links: &[String], template: &str) -> Vec<String> {
        let mut versions = self
            .instance_versions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        links
            .iter()
            .map(|link| {
                versions
                    .entry(link.clone())
                    .or_insert_with(|| template.to_string())
                    .clone()
            })
            .collect()
    }

    fn next_id(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::Relaxed)
    }

    /// Records a finished operation and returns it.
    fn done(&self, project: &str, scope: &Scope, kind: &str, target: &GoogleCloudUrl) -> Operation {
        let name = format!("operation-{}", uuid::Uuid::new_v4());
        let link = GoogleCloudUrl::new(project, scope.clone(), "operations", &name);
        let op = Operation {
            name: name.clone(),
            status: OperationStatus::Done,
            self_link: link.to_string(),
            target_link: Some(target.to_string()),
            operation_type: Some(kind.to_string()),
            error: None,
            insert_time: Some(chrono::Utc::now().to_rfc3339()),
        };
        trace!("Simulated {kind} of {target}");
        // Operation names are unique, so the insert cannot collide.
        let _ = self.operations.create(project, scope, &name, op.clone());
        op
    }

    fn create_in<T: SimResource>(
        &self,
        store: &ScopedStore<T>,
        project: &str,
        scope: &Scope,
        mut value: T,
    ) -> Result<Operation> {
        validate_name(T::COLLECTION, value.name())?;
        let name = value.name().to_string();
        let url = GoogleCloudUrl::new(project, scope.clone(), T::COLLECTION, &name);
        value.assign(url.to_string(), self.next_id().to_string());
        store.create(project, scope, &name, value)?;
        Ok(self.done(project, scope, "insert", &url))
    }

    fn mutate<T: SimResource, F>(
        &self,
        store: &ScopedStore<T>,
        project: &str,
        scope: &Scope,
        name: &str,
        kind: &str,
        f: F,
    ) -> Result<Operation>
    where
        F: FnOnce(&mut T) -> Result<()>,
    {
        store.update(project, scope, name, f)?;
        let url = GoogleCloudUrl::new(project, scope.clone(), T::COLLECTION, name);
        Ok(self.done(project, scope, kind, &url))
    }

    fn delete_in<T: SimResource>(
        &self,
        store: &ScopedStore<T>,
        project: &str,
        scope: &Scope,
        name: &str,
    ) -> Result<Operation> {
        store.remove(project, scope, name)?;
        let url = GoogleCloudUrl::new(project, scope.clone(), T::COLLECTION, name);
        Ok(self.done(project, scope, "delete", &url))
    }

    fn allocate_ip(&self, internal: bool) -> String {
        let n = self.next_id();
        if internal {
            format!("10.128.{}.{}", (n / 250) % 250, n % 250 + 2)
        } else {
            format!("34.{}.{}.{}", 64 + (n / 62_500) % 64, (n / 250) % 250, n % 250 + 2)
        }
    }

    fn zones_of(&self, region: Option<&str>) -> Vec<(String, String)> {
        self.regions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(r, _)| region.is_none_or(|want| want == r.as_str()))
            .flat_map(|(r, zones)| zones.iter().map(move |z| (r.clone(), z.clone())))
            .collect()
    }
}

/// Rejects names the compute API would refuse.
fn validate_name(collection: &str, name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name.len() <= 63
        && name.starts_with(|c: char| c.is_ascii_lowercase())
        && !name.ends_with('-')
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if valid {
        Ok(())
    } else {
        Err(CloudError::BadRequest {
            message: format!("Invalid value for field '{collection}.name': '{name}'"),
        }
        .into())
    }
}

/// Short fingerprint of a serializable value.
fn fingerprint<T: serde::Serialize>(value: &T) -> String {
    let bytes = serde_json::to_vec(value).unwrap_or_default();
    hex::encode(&Sha256::digest(&bytes)[..8])
}

fn region_scope(region: &str) -> Scope {
    Scope::Region(region.to_string())
}

fn zone_scope(zone: &str) -> Scope {
    Scope::Zone(zone.to_string())
}

#[async_trait]
impl NetworkClient for MockCompute {
    async fn insert(&self, project: &str, network: &Network) -> Result<Operation> {
        self.create_in(&self.networks, project, &Scope::Global, network.clone())
    }

    async fn get(&self, project: &str, name: &str) -> Result<Network> {
        let mut network = self.networks.get(project, &Scope::Global, name)?;
        network.subnetworks = self
            .subnetworks
            .list_project(project)
            .into_iter()
            .filter(|(_, s)| last_component(&s.network) == name)
            .map(|(_, s)| s.self_link)
            .collect();
        Ok(network)
    }

    async fn delete(&self, project: &str, name: &str) -> Result<Operation> {
        self.delete_in(&self.networks, project, &Scope::Global, name)
    }

    async fn list(&self, project: &str) -> Result<Vec<Network>> {
        Ok(self.networks.list(project, &Scope::Global))
    }
}

#[async_trait]
impl SubnetworkClient for MockCompute {
    async fn insert(&self, project: &str, region: &str, subnet: &Subnetwork) -> Result<Operation> {
        let scope = region_scope(region);
        let mut subnet = subnet.clone();
        subnet.region = scope.link(project);
        subnet.fingerprint = Some(fingerprint(&subnet.secondary_ip_ranges));
        self.create_in(&self.subnetworks, project, &scope, subnet)
    }

    async fn patch(&self, project: &str, region: &str, subnet: &Subnetwork) -> Result<Operation> {
        let patch = subnet.clone();
        self.mutate(
            &self.subnetworks,
            project,
            &region_scope(region),
            &subnet.name,
            "patch",
            |stored| {
                if patch.fingerprint != stored.fingerprint {
                    return Err(CloudError::BadRequest {
                        message: format!("fingerprint mismatch patching subnetwork {}", stored.name),
                    }
                    .into());
                }
                stored.secondary_ip_ranges = patch.secondary_ip_ranges;
                stored.fingerprint = Some(fingerprint(&stored.secondary_ip_ranges));
                Ok(())
            },
        )
    }

    async fn get(&self, project: &str, region: &str, name: &str) -> Result<Subnetwork> {
        self.subnetworks.get(project, &region_scope(region), name)
    }

    async fn delete(&self, project: &str, region: &str, name: &str) -> Result<Operation> {
        self.delete_in(&self.subnetworks, project, &region_scope(region), name)
    }

    async fn list(&self, project: &str, region: &str) -> Result<Vec<Subnetwork>> {
        Ok(self.subnetworks.list(project, &region_scope(region)))
    }
}

#[async_trait]
impl FirewallClient for MockCompute {
    async fn insert(&self, project: &str, firewall: &Firewall) -> Result<Operation> {
        self.create_in(&self.firewalls, project, &Scope::Global, firewall.clone())
    }

    async fn update(&self, project: &str, name: &str, firewall: &Firewall) -> Result<Operation> {
        let replacement = firewall.clone();
        self.mutate(&self.firewalls, project, &Scope::Global, name, "update", |stored| {
            let (self_link, id) = (stored.self_link.clone(), stored.id.clone());
            *stored = replacement;
            stored.self_link = self_link;
            stored.id = id;
            Ok(())
        })
    }

    async fn get(&self, project: &str, name: &str) -> Result<Firewall> {
        self.firewalls.get(project, &Scope::Global, name)
    }

    async fn delete(&self, project: &str, name: &str) -> Result<Operation> {
        self.delete_in(&self.firewalls, project, &Scope::Global, name)
    }

    async fn list(&self, project: &str) -> Result<Vec<Firewall>> {
        Ok(self.firewalls.list(project, &Scope::Global))
    }
}

#[async_trait]
impl RouterClient for MockCompute {
    async fn insert(&self, project: &str, region: &str, router: &Router) -> Result<Operation> {
        let scope = region_scope(region);
        let mut router = router.clone();
        router.region = scope.link(project);
        self.create_in(&self.routers, project, &scope, router)
    }

    async fn patch(&self, project: &str, region: &str, router: &Router) -> Result<Operation> {
        let patch = router.clone();
        self.mutate(&self.routers, project, &region_scope(region), &router.name, "patch", |stored| {
            stored.nats = patch.nats;
            Ok(())
        })
    }

    async fn get(&self, project: &str, region: &str, name: &str) -> Result<Router> {
        self.routers.get(project, &region_scope(region), name)
    }

    async fn delete(&self, project: &str, region: &str, name: &str) -> Result<Operation> {
        self.delete_in(&self.routers, project, &region_scope(region), name)
    }

    async fn list(&self, project: &str, region: &str) -> Result<Vec<Router>> {
        Ok(self.routers.list(project, &region_scope(region)))
    }
}

#[async_trait]
impl AddressClient for MockCompute {
    async fn insert(&self, project: &str, region: &str, address: &Address) -> Result<Operation> {
        let scope = Scope::regional_or_global(region);
        let mut address = address.clone();
        if address.address.is_empty() {
            address.address = self.allocate_ip(address.address_type.as_deref() == Some("INTERNAL"));
        }
        if !region.is_empty() {
            address.region = scope.link(project);
        }
        address.status = Some("RESERVED".to_string());
        self.create_in(&self.addresses, project, &scope, address)
    }

    async fn get(&self, project: &str, region: &str, name: &str) -> Result<Address> {
        self.addresses.get(project, &Scope::regional_or_global(region), name)
    }

    async fn delete(&self, project: &str, region: &str, name: &str) -> Result<Operation> {
        self.delete_in(&self.addresses, project, &Scope::regional_or_global(region), name)
    }

    async fn list(&self, project: &str, region: &str) -> Result<Vec<Address>> {
        Ok(self.addresses.list(project, &Scope::regional_or_global(region)))
    }

    async fn list_with_filter(
        &self,
        project: &str,
        region: &str,
        filter: &str,
    ) -> Result<Vec<Address>> {
        Ok(self
            .addresses
            .list(project, &Scope::regional_or_global(region))
            .into_iter()
            .filter(|a| matches_filter(a, filter))
            .collect())
    }
}

#[async_trait]
impl ForwardingRuleClient for MockCompute {
    async fn insert(&self, project: &str, region: &str, rule: &ForwardingRule) -> Result<Operation> {
        let scope = Scope::regional_or_global(region);
        let mut rule = rule.clone();
        if rule.ip_address.is_empty() {
            rule.ip_address = self.allocate_ip(rule.load_balancing_scheme == "INTERNAL");
        }
        if !region.is_empty() {
            rule.region = scope.link(project);
        }
        self.create_in(&self.forwarding_rules, project, &scope, rule)
    }

    async fn get(&self, project: &str, region: &str, name: &str) -> Result<ForwardingRule> {
        self.forwarding_rules
            .get(project, &Scope::regional_or_global(region), name)
    }

    async fn delete(&self, project: &str, region: &str, name: &str) -> Result<Operation> {
        self.delete_in(&self.forwarding_rules, project, &Scope::regional_or_global(region), name)
    }

    async fn list(&self, project: &str, region: &str) -> Result<Vec<ForwardingRule>> {
        Ok(self
            .forwarding_rules
            .list(project, &Scope::regional_or_global(region)))
    }
}

#[async_trait]
impl HttpHealthCheckClient for MockCompute {
    async fn insert(&self, project: &str, check: &HttpHealthCheck) -> Result<Operation> {
        self.create_in(&self.http_health_checks, project, &Scope::Global, check.clone())
    }

    async fn get(&self, project: &str, name: &str) -> Result<HttpHealthCheck> {
        self.http_health_checks.get(project, &Scope::Global, name)
    }

    async fn delete(&self, project: &str, name: &str) -> Result<Operation> {
        self.delete_in(&self.http_health_checks, project, &Scope::Global, name)
    }

    async fn list(&self, project: &str) -> Result<Vec<HttpHealthCheck>> {
        Ok(self.http_health_checks.list(project, &Scope::Global))
    }
}

#[async_trait]
impl HealthCheckClient for MockCompute {
    async fn insert(&self, project: &str, region: &str, check: &HealthCheck) -> Result<Operation> {
        let scope = Scope::regional_or_global(region);
        let mut check = check.clone();
        if !region.is_empty() {
            check.region = scope.link(project);
        }
        self.create_in(&self.health_checks, project, &scope, check)
    }

    async fn get(&self, project: &str, region: &str, name: &str) -> Result<HealthCheck> {
        self.health_checks
            .get(project, &Scope::regional_or_global(region), name)
    }

    async fn delete(&self, project: &str, region: &str, name: &str) -> Result<Operation> {
        self.delete_in(&self.health_checks, project, &Scope::regional_or_global(region), name)
    }

    async fn list(&self, project: &str, region: &str) -> Result<Vec<HealthCheck>> {
        Ok(self.health_checks.list(project, &Scope::regional_or_global(region)))
    }
}

#[async_trait]
impl BackendServiceClient for MockCompute {
    async fn insert(
        &self,
        project: &str,
        region: &str,
        service: &BackendService,
    ) -> Result<Operation> {
        let scope = Scope::regional_or_global(region);
        let mut service = service.clone();
        if !region.is_empty() {
            service.region = scope.link(project);
        }
        self.create_in(&self.backend_services, project, &scope, service)
    }

    async fn update(
        &self,
        project: &str,
        region: &str,
        service: &BackendService,
    ) -> Result<Operation> {
        let replacement = service.clone();
        self.mutate(
            &self.backend_services,
            project,
            &Scope::regional_or_global(region),
            &service.name,
            "update",
            |stored| {
                stored.health_checks = replacement.health_checks;
                stored.backends = replacement.backends;
                stored.protocol = replacement.protocol;
                stored.load_balancing_scheme = replacement.load_balancing_scheme;
                Ok(())
            },
        )
    }

    async fn get(&self, project: &str, region: &str, name: &str) -> Result<BackendService> {
        self.backend_services
            .get(project, &Scope::regional_or_global(region), name)
    }

    async fn delete(&self, project: &str, region: &str, name: &str) -> Result<Operation> {
        self.delete_in(&self.backend_services, project, &Scope::regional_or_global(region), name)
    }

    async fn list(&self, project: &str, region: &str) -> Result<Vec<BackendService>> {
        Ok(self
            .backend_services
            .list(project, &Scope::regional_or_global(region)))
    }
}

#[async_trait]
impl TargetPoolClient for MockCompute {
    async fn insert(&self, project: &str, region: &str, pool: &TargetPool) -> Result<Operation> {
        let scope = region_scope(region);
        let mut pool = pool.clone();
        pool.region = scope.link(project);
        self.create_in(&self.target_pools, project, &scope, pool)
    }

    async fn get(&self, project: &str, region: &str, name: &str) -> Result<TargetPool> {
        self.target_pools.get(project, &region_scope(region), name)
    }

    async fn delete(&self, project: &str, region: &str, name: &str) -> Result<Operation> {
        self.delete_in(&self.target_pools, project, &region_scope(region), name)
    }

    async fn list(&self, project: &str, region: &str) -> Result<Vec<TargetPool>> {
        Ok(self.target_pools.list(project, &region_scope(region)))
    }

    async fn add_health_check(
        &self,
        project: &str,
        region: &str,
        pool: &str,
        health_check_link: &str,
    ) -> Result<Operation> {
        let link = health_check_link.to_string();
        self.mutate(&self.target_pools, project, &region_scope(region), pool, "addHealthCheck", |stored| {
            if !stored.health_checks.contains(&link) {
                stored.health_checks.push(link);
            }
            Ok(())
        })
    }
}

#[async_trait]
impl InstanceTemplateClient for MockCompute {
    async fn insert(&self, project: &str, template: &InstanceTemplate) -> Result<Operation> {
        let mut template = template.clone();
        template.creation_timestamp = Some(chrono::Utc::now().to_rfc3339());
        if let Some(metadata) = template.properties.metadata.as_mut() {
            metadata.fingerprint = Some(fingerprint(&metadata.items));
        }
        if let Some(tags) = template.properties.tags.as_mut() {
            tags.fingerprint = Some(fingerprint(&tags.items));
        }
        self.create_in(&self.instance_templates, project, &Scope::Global, template)
    }

    async fn get(&self, project: &str, name: &str) -> Result<InstanceTemplate> {
        self.instance_templates.get(project, &Scope::Global, name)
    }

    async fn delete(&self, project: &str, name: &str) -> Result<Operation> {
        self.delete_in(&self.instance_templates, project, &Scope::Global, name)
    }

    async fn list(&self, project: &str) -> Result<Vec<InstanceTemplate>> {
        Ok(self.instance_templates.list(project, &Scope::Global))
    }
}

#[async_trait]
impl InstanceGroupManagerClient for MockCompute {
    async fn insert(
        &self,
        project: &str,
        zone: &str,
        igm: &InstanceGroupManager,
    ) -> Result<Operation> {
        let scope = zone_scope(zone);
        let mut igm = igm.clone();
        igm.zone = scope.link(project);
        igm.instance_group =
            GoogleCloudUrl::zonal(project, zone, "instanceGroups", &igm.name).to_string();
        let links = Self::instance_links(project, zone, &igm);
        let template = igm.instance_template.clone();
        let op = self.create_in(&self.instance_group_managers, project, &scope, igm)?;
        self.versions_of(&links, &template);
        Ok(op)
    }

    async fn get(&self, project: &str, zone: &str, name: &str) -> Result<InstanceGroupManager> {
        self.instance_group_managers.get(project, &zone_scope(zone), name)
    }

    async fn delete(&self, project: &str, zone: &str, name: &str) -> Result<Operation> {
        self.delete_in(&self.instance_group_managers, project, &zone_scope(zone), name)
    }

    async fn list(&self, project: &str, zone: &str) -> Result<Vec<InstanceGroupManager>> {
        Ok(self.instance_group_managers.list(project, &zone_scope(zone)))
    }

    async fn list_managed_instances(
        &self,
        project: &str,
        zone: &str,
        name: &str,
    ) -> Result<Vec<ManagedInstance>> {
        let igm = self.instance_group_managers.get(project, &zone_scope(zone), name)?;
        let links = Self::instance_links(project, zone, &igm);
        let versions = self.versions_of(&links, &igm.instance_template);
        Ok(links
            .into_iter()
            .zip(versions)
            .map(|(instance, template)| ManagedInstance {
                instance,
                instance_status: Some("RUNNING".to_string()),
                current_action: "NONE".to_string(),
                version: Some(ManagedInstanceVersion {
                    instance_template: template,
                    name: None,
                }),
            })
            .collect())
    }

    async fn list_errors(
        &self,
        project: &str,
        zone: &str,
        name: &str,
    ) -> Result<Vec<InstanceManagedByIgmError>> {
        let igm = self.instance_group_managers.get(project, &zone_scope(zone), name)?;
        Ok(self
            .igm_errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&igm.self_link)
            .cloned()
            .unwrap_or_default())
    }

    async fn recreate_instances(
        &self,
        project: &str,
        zone: &str,
        name: &str,
        instances: &[String],
    ) -> Result<Operation> {
        let igm = self.instance_group_managers.get(project, &zone_scope(zone), name)?;
        let managed = Self::instance_links(project, zone, &igm);
        if let Some(unknown) = instances.iter().find(|i| !managed.contains(i)) {
            return Err(CloudError::NotFound {
                kind: "instance".to_string(),
                name: unknown.clone(),
            }
            .into());
        }
        {
            let mut versions = self
                .instance_versions
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            for instance in instances {
                versions.insert(instance.clone(), igm.instance_template.clone());
            }
        }
        self.mutate(
            &self.instance_group_managers,
            project,
            &zone_scope(zone),
            name,
            "recreateInstances",
            |_| Ok(()),
        )
    }

    async fn set_target_pools(
        &self,
        project: &str,
        zone: &str,
        name: &str,
        pools: &[String],
    ) -> Result<Operation> {
        let pools = pools.to_vec();
        self.mutate(
            &self.instance_group_managers,
            project,
            &zone_scope(zone),
            name,
            "setTargetPools",
            |stored| {
                stored.target_pools = pools;
                Ok(())
            },
        )
    }

    async fn set_instance_template(
        &self,
        project: &str,
        zone: &str,
        name: &str,
        template_link: &str,
    ) -> Result<Operation> {
        let template = GoogleCloudUrl::parse(template_link)?;
        self.instance_templates
            .get(project, &Scope::Global, &template.name)?;
        let link = template_link.to_string();
        self.mutate(
            &self.instance_group_managers,
            project,
            &zone_scope(zone),
            name,
            "setInstanceTemplate",
            |stored| {
                stored.instance_template = link;
                Ok(())
            },
        )
    }

    async fn resize(&self, project: &str, zone: &str, name: &str, size: i64) -> Result<Operation> {
        if size < 0 {
            return Err(CloudError::BadRequest {
                message: format!("Invalid size {size}"),
            }
            .into());
        }
        self.mutate(
            &self.instance_group_managers,
            project,
            &zone_scope(zone),
            name,
            "resize",
            |stored| {
                stored.target_size = size;
                Ok(())
            },
        )
    }
}

#[async_trait]
impl DiskClient for MockCompute {
    async fn insert(&self, project: &str, zone: &str, disk: &Disk) -> Result<Operation> {
        let scope = zone_scope(zone);
        let mut disk = disk.clone();
        disk.zone = scope.link(project);
        disk.label_fingerprint = Some(fingerprint(&disk.labels));
        self.create_in(&self.disks, project, &scope, disk)
    }

    async fn get(&self, project: &str, zone: &str, name: &str) -> Result<Disk> {
        self.disks.get(project, &zone_scope(zone), name)
    }

    async fn delete(&self, project: &str, zone: &str, name: &str) -> Result<Operation> {
        self.delete_in(&self.disks, project, &zone_scope(zone), name)
    }

    async fn list(&self, project: &str, zone: &str, filter: Option<&str>) -> Result<Vec<Disk>> {
        Ok(self
            .disks
            .list(project, &zone_scope(zone))
            .into_iter()
            .filter(|d| filter.is_none_or(|f| matches_filter(d, f)))
            .collect())
    }

    async fn aggregated_list(&self, project: &str) -> Result<Vec<Disk>> {
        Ok(self
            .disks
            .list_project(project)
            .into_iter()
            .map(|(_, d)| d)
            .collect())
    }

    async fn set_labels(
        &self,
        project: &str,
        zone: &str,
        name: &str,
        labels: &BTreeMap<String, String>,
        fingerprint_in: &str,
    ) -> Result<Operation> {
        let labels = labels.clone();
        self.mutate(&self.disks, project, &zone_scope(zone), name, "setLabels", |stored| {
            if stored.label_fingerprint.as_deref() != Some(fingerprint_in) {
                return Err(CloudError::BadRequest {
                    message: format!("labelFingerprint mismatch on disk {}", stored.name),
                }
                .into());
            }
            stored.label_fingerprint = Some(fingerprint(&labels));
            stored.labels = labels;
            Ok(())
        })
    }
}

#[async_trait]
impl LocationClient for MockCompute {
    async fn list_zones(&self, project: &str, region: Option<&str>) -> Result<Vec<Zone>> {
        Ok(self
            .zones_of(region)
            .into_iter()
            .map(|(r, z)| Zone {
                name: z,
                region: region_scope(&r).link(project),
                status: "UP".to_string(),
            })
            .collect())
    }

    async fn list_regions(&self, project: &str) -> Result<Vec<Region>> {
        let regions = self
            .regions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        Ok(regions
            .into_iter()
            .map(|(name, zones)| Region {
                zones: zones.iter().map(|z| zone_scope(z).link(project)).collect(),
                name,
                status: "UP".to_string(),
            })
            .collect())
    }

    async fn get_project(&self, project: &str) -> Result<Project> {
        let number = u64::from_str_radix(&fingerprint(&project)[..10], 16).unwrap_or_default()
            % 1_000_000_000_000;
        Ok(Project {
            name: project.to_string(),
            id: number.to_string(),
            default_service_account: format!("{number}-compute@developer.gserviceaccount.com"),
        })
    }
}

#[async_trait]
impl OperationClient for MockCompute {
    async fn get(&self, project: &str, scope: &Scope, name: &str) -> Result<Operation> {
        self.operations.get(project, scope, name)
    }
}

impl Compute for MockCompute {
    fn networks(&self) -> &dyn NetworkClient {
        self
    }
    fn subnetworks(&self) -> &dyn SubnetworkClient {
        self
    }
    fn firewalls(&self) -> &dyn FirewallClient {
        self
    }
    fn routers(&self) -> &dyn RouterClient {
        self
    }
    fn addresses(&self) -> &dyn AddressClient {
        self
    }
    fn forwarding_rules(&self) -> &dyn ForwardingRuleClient {
        self
    }
    fn http_health_checks(&self) -> &dyn HttpHealthCheckClient {
        self
    }
    fn health_checks(&self) -> &dyn HealthCheckClient {
        self
    }
    fn backend_services(&self) -> &dyn BackendServiceClient {
        self
    }
    fn target_pools(&self) -> &dyn TargetPoolClient {
        self
    }
    fn instance_templates(&self) -> &dyn InstanceTemplateClient {
        self
    }
    fn instance_group_managers(&self) -> &dyn InstanceGroupManagerClient {
        self
    }
    fn disks(&self) -> &dyn DiskClient {
        self
    }
    fn locations(&self) -> &dyn LocationClient {
        self
    }
    fn operations(&self) -> &dyn OperationClient {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_insert_synthesizes_self_link_and_done_operation() {
        let compute = MockCompute::new();
        let op = NetworkClient::insert(
            &compute,
            "p",
            &Network {
                name: "net".into(),
                ..Network::default()
            },
        )
        .await
        .expect("inserted");
        assert!(op.is_done());
        assert!(op.self_link.contains("/projects/p/global/operations/operation-"));

        let network = NetworkClient::get(&compute, "p", "net").await.expect("found");
        assert_eq!(
            network.self_link,
            "https://www.googleapis.com/compute/v1/projects/p/global/networks/net"
        );
        assert!(network.id.is_some());

        let polled = OperationClient::get(&compute, "p", &Scope::Global, &op.name)
            .await
            .expect("operation stored");
        assert_eq!(polled, op);
    }

    #[tokio::test]
    async fn test_global_and_regional_addresses_are_separate() {
        let compute = MockCompute::new();
        let address = Address {
            name: "api".into(),
            ..Address::default()
        };
        AddressClient::insert(&compute, "p", "", &address).await.expect("global");
        AddressClient::insert(&compute, "p", "us-central1", &address)
            .await
            .expect("regional");
        let regional = AddressClient::get(&compute, "p", "us-central1", "api")
            .await
            .expect("found");
        assert!(regional.region.ends_with("/regions/us-central1"));
        assert!(!regional.address.is_empty());
        assert_eq!(AddressClient::list(&compute, "p", "").await.expect("listed").len(), 1);
    }

    #[tokio::test]
    async fn test_rejects_invalid_names() {
        let compute = MockCompute::new();
        let err = FirewallClient::insert(
            &compute,
            "p",
            &Firewall {
                name: "Bad_Name".into(),
                ..Firewall::default()
            },
        )
        .await
        .expect_err("invalid name");
        assert!(matches!(
            err,
            crate::error::InfraError::Cloud(CloudError::BadRequest { .. })
        ));
    }

    #[tokio::test]
    async fn test_disk_labels_require_fingerprint() {
        let compute = MockCompute::new();
        DiskClient::insert(
            &compute,
            "p",
            "us-central1-a",
            &Disk {
                name: "d1".into(),
                size_gb: 20,
                ..Disk::default()
            },
        )
        .await
        .expect("inserted");
        let labels = BTreeMap::from([("a".to_string(), "b".to_string())]);
        assert!(
            DiskClient::set_labels(&compute, "p", "us-central1-a", "d1", &labels, "stale")
                .await
                .is_err()
        );
        let disk = DiskClient::get(&compute, "p", "us-central1-a", "d1").await.expect("found");
        let fp = disk.label_fingerprint.expect("fingerprint set");
        DiskClient::set_labels(&compute, "p", "us-central1-a", "d1", &labels, &fp)
            .await
            .expect("labels set");
        let listed = DiskClient::list(&compute, "p", "us-central1-a", Some("labels.a = b"))
            .await
            .expect("listed");
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn test_zones_of_region() {
        let compute = MockCompute::new();
        let zones = LocationClient::list_zones(&compute, "p", Some("europe-west1"))
            .await
            .expect("listed");
        let names: Vec<_> = zones.iter().map(|z| z.name.as_str()).collect();
        assert_eq!(names, ["europe-west1-b", "europe-west1-c", "europe-west1-d"]);
    }
}
