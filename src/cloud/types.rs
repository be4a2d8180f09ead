//! Wire types for the compute, IAM, storage and DNS APIs.
//!
//! Field names follow the JSON representation of the REST APIs. Only the
//! fields the provisioning core reads or writes are modelled.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ============================================================================
// Operations
// ============================================================================

/// Status of a long-running operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationStatus {
    /// Queued.
    #[default]
    Pending,
    /// In progress.
    Running,
    /// Finished, successfully or not.
    Done,
}

/// A long-running compute operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Operation {
    /// Operation name.
    pub name: String,
    /// Current status.
    pub status: OperationStatus,
    /// Link to the operation itself; selects the polling endpoint.
    pub self_link: String,
    /// Link to the resource being changed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_link: Option<String>,
    /// Kind of operation, e.g. `insert`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation_type: Option<String>,
    /// Set when the operation failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<OperationError>,
    /// RFC3339 insert time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insert_time: Option<String>,
}

/// Error payload of a failed operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OperationError {
    /// Individual errors; the first is surfaced.
    pub errors: Vec<OperationErrorItem>,
}

/// One sub-error of an operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OperationErrorItem {
    /// Error code, e.g. `RESOURCE_NOT_READY`.
    pub code: String,
    /// Human readable message.
    pub message: String,
    /// Field or resource the error refers to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl Operation {
    /// Returns true once the operation reached `DONE`.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.status == OperationStatus::Done
    }
}

// ============================================================================
// Networking
// ============================================================================

/// A VPC network.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Network {
    /// Network name.
    pub name: String,
    /// Canonical link.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub self_link: String,
    /// Server-assigned id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Whether subnets are created automatically. Always serialized.
    pub auto_create_subnetworks: bool,
    /// Legacy network range.
    #[serde(rename = "IPv4Range", skip_serializing_if = "Option::is_none")]
    pub ipv4_range: Option<String>,
    /// Links of the network's subnets.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub subnetworks: Vec<String>,
}

/// A secondary range on a subnetwork.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SubnetworkSecondaryRange {
    /// Range name, e.g. `pods`.
    pub range_name: String,
    /// CIDR.
    pub ip_cidr_range: String,
}

/// A regional subnetwork.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Subnetwork {
    /// Subnet name.
    pub name: String,
    /// Canonical link.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub self_link: String,
    /// Server-assigned id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Link of the parent network.
    pub network: String,
    /// Region link or name.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub region: String,
    /// Primary CIDR.
    pub ip_cidr_range: String,
    /// Secondary ranges.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub secondary_ip_ranges: Vec<SubnetworkSecondaryRange>,
    /// Fingerprint required by patch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
}

/// One allowed protocol/ports entry of a firewall.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FirewallAllowed {
    /// Protocol name or number.
    #[serde(rename = "IPProtocol")]
    pub ip_protocol: String,
    /// Ports or port ranges.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<String>,
}

/// An ingress firewall rule.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Firewall {
    /// Rule name.
    pub name: String,
    /// Canonical link.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub self_link: String,
    /// Server-assigned id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Network link.
    pub network: String,
    /// Source CIDRs.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub source_ranges: Vec<String>,
    /// Source network tags.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub source_tags: Vec<String>,
    /// Target network tags.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub target_tags: Vec<String>,
    /// Allowed protocols.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub allowed: Vec<FirewallAllowed>,
    /// Disabled rules match nothing.
    pub disabled: bool,
}

/// NAT subnetwork selection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RouterNatSubnetwork {
    /// Subnet link.
    pub name: String,
    /// Ranges to NAT, e.g. `ALL_IP_RANGES`.
    pub source_ip_ranges_to_nat: Vec<String>,
}

/// A Cloud NAT configuration on a router.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RouterNat {
    /// NAT name.
    pub name: String,
    /// `AUTO_ONLY` or `MANUAL_ONLY`.
    pub nat_ip_allocate_option: String,
    /// Which subnet ranges are translated.
    pub source_subnetwork_ip_ranges_to_nat: String,
    /// Explicit subnets when using `LIST_OF_SUBNETWORKS`.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub subnetworks: Vec<RouterNatSubnetwork>,
}

/// A Cloud Router.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Router {
    /// Router name.
    pub name: String,
    /// Canonical link.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub self_link: String,
    /// Server-assigned id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Network link.
    pub network: String,
    /// Region link or name.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub region: String,
    /// NAT configurations.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub nats: Vec<RouterNat>,
}

/// A reserved IP address.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Address {
    /// Address name.
    pub name: String,
    /// Canonical link.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub self_link: String,
    /// Server-assigned id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// The IP address, assigned by the server when empty.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub address: String,
    /// `INTERNAL` or `EXTERNAL`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address_type: Option<String>,
    /// Purpose of an internal address.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,
    /// Subnet link of an internal address.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subnetwork: Option<String>,
    /// Region link, empty for global addresses.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub region: String,
    /// `RESERVED` or `IN_USE`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// A forwarding rule.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ForwardingRule {
    /// Rule name.
    pub name: String,
    /// Canonical link.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub self_link: String,
    /// Server-assigned id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Virtual IP.
    #[serde(rename = "IPAddress", skip_serializing_if = "String::is_empty")]
    pub ip_address: String,
    /// Protocol.
    #[serde(rename = "IPProtocol", skip_serializing_if = "String::is_empty")]
    pub ip_protocol: String,
    /// Port range such as `443-443`.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub port_range: String,
    /// Explicit ports.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<String>,
    /// Target pool link.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub target: String,
    /// Backend service link.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub backend_service: String,
    /// `EXTERNAL` or `INTERNAL`.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub load_balancing_scheme: String,
    /// Network link (internal rules).
    #[serde(skip_serializing_if = "String::is_empty")]
    pub network: String,
    /// Subnet link (internal rules).
    #[serde(skip_serializing_if = "String::is_empty")]
    pub subnetwork: String,
    /// Labels.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// Region link, empty for global rules.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub region: String,
}

/// A legacy HTTP health check.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HttpHealthCheck {
    /// Health check name.
    pub name: String,
    /// Canonical link.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub self_link: String,
    /// Server-assigned id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Probed port.
    pub port: i64,
    /// Probed path.
    pub request_path: String,
}

/// TCP probe settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TcpHealthCheck {
    /// Probed port.
    pub port: i64,
}

/// A health check (global or regional).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HealthCheck {
    /// Health check name.
    pub name: String,
    /// Canonical link.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub self_link: String,
    /// Server-assigned id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Probe type, e.g. `TCP`.
    #[serde(rename = "type")]
    pub check_type: String,
    /// TCP probe settings.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tcp_health_check: Option<TcpHealthCheck>,
    /// Region link, empty for global checks.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub region: String,
}

/// One backend of a backend service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Backend {
    /// Instance group link.
    pub group: String,
}

/// A backend service (global or regional).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BackendService {
    /// Service name.
    pub name: String,
    /// Canonical link.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub self_link: String,
    /// Server-assigned id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Protocol, e.g. `TCP`.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub protocol: String,
    /// `EXTERNAL` or `INTERNAL`.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub load_balancing_scheme: String,
    /// Health check links.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub health_checks: Vec<String>,
    /// Backends.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub backends: Vec<Backend>,
    /// Region link, empty for global services.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub region: String,
}

/// A legacy target pool.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TargetPool {
    /// Pool name.
    pub name: String,
    /// Canonical link.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub self_link: String,
    /// Server-assigned id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// HTTP health check links.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub health_checks: Vec<String>,
    /// Instance links.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub instances: Vec<String>,
    /// Region link.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub region: String,
}

// ============================================================================
// Instances
// ============================================================================

/// Boot disk initialization parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AttachedDiskInitializeParams {
    /// Source image link.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub source_image: String,
    /// Size in GB.
    #[serde(rename = "diskSizeGb")]
    pub disk_size_gb: i64,
    /// Disk type name, e.g. `pd-standard`.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub disk_type: String,
    /// Labels applied to the created disk.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

/// A disk attached to an instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AttachedDisk {
    /// Whether this is the boot disk.
    pub boot: bool,
    /// Delete the disk with the instance.
    pub auto_delete: bool,
    /// Device name inside the guest.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub device_name: String,
    /// `READ_WRITE` or `READ_ONLY`.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub mode: String,
    /// `PERSISTENT` or `SCRATCH`.
    #[serde(rename = "type", skip_serializing_if = "String::is_empty")]
    pub disk_type: String,
    /// Creation parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initialize_params: Option<AttachedDiskInitializeParams>,
}

/// External access configuration of a network interface.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AccessConfig {
    /// Access config name.
    pub name: String,
    /// `ONE_TO_ONE_NAT`.
    #[serde(rename = "type")]
    pub access_type: String,
    /// `PREMIUM` or `STANDARD`.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub network_tier: String,
}

/// An alias IP range on a network interface.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AliasIpRange {
    /// CIDR or netmask such as `/24`.
    pub ip_cidr_range: String,
    /// Secondary range of the subnet to allocate from.
    pub subnetwork_range_name: String,
}

/// A network interface.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NetworkInterface {
    /// Network link.
    pub network: String,
    /// Subnet link.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub subnetwork: String,
    /// External access.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub access_configs: Vec<AccessConfig>,
    /// Alias ranges.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub alias_ip_ranges: Vec<AliasIpRange>,
}

/// Network tags.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tags {
    /// Tag values.
    pub items: Vec<String>,
    /// Server fingerprint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
}

/// One metadata entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataItem {
    /// Key.
    pub key: String,
    /// Value.
    pub value: String,
}

/// Instance metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Metadata {
    /// Entries.
    pub items: Vec<MetadataItem>,
    /// Server fingerprint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
}

/// A service account attached to instances.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstanceServiceAccount {
    /// Account email.
    pub email: String,
    /// OAuth scopes (long form).
    pub scopes: Vec<String>,
}

/// Scheduling options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Scheduling {
    /// Restart after host failure.
    pub automatic_restart: bool,
    /// `MIGRATE` or `TERMINATE`.
    pub on_host_maintenance: String,
    /// Preemptible VM.
    pub preemptible: bool,
    /// `STANDARD` or `SPOT`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provisioning_model: Option<String>,
}

/// A guest accelerator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AcceleratorConfig {
    /// Accelerator type, e.g. `nvidia-tesla-t4`.
    pub accelerator_type: String,
    /// Number of accelerators.
    pub accelerator_count: i64,
}

/// Properties of an instance template.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InstanceProperties {
    /// Machine type name.
    pub machine_type: String,
    /// Allow forwarding packets not addressed to the instance.
    pub can_ip_forward: bool,
    /// Disks.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub disks: Vec<AttachedDisk>,
    /// Network interfaces.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub network_interfaces: Vec<NetworkInterface>,
    /// Network tags.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Tags>,
    /// Labels.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// Metadata.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
    /// Service accounts.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub service_accounts: Vec<InstanceServiceAccount>,
    /// Scheduling.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduling: Option<Scheduling>,
    /// Accelerators.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub guest_accelerators: Vec<AcceleratorConfig>,
}

/// An instance template.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InstanceTemplate {
    /// Concrete template name.
    pub name: String,
    /// Canonical link.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub self_link: String,
    /// Server-assigned id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Creation time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<String>,
    /// Free text.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Instance properties.
    pub properties: InstanceProperties,
}

/// A managed instance group.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InstanceGroupManager {
    /// Manager name.
    pub name: String,
    /// Canonical link.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub self_link: String,
    /// Server-assigned id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Zone link or name.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub zone: String,
    /// Prefix of instance names.
    pub base_instance_name: String,
    /// Template link.
    pub instance_template: String,
    /// Desired instance count.
    pub target_size: i64,
    /// Target pool links.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub target_pools: Vec<String>,
    /// Link of the underlying instance group.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub instance_group: String,
}

/// An instance as seen by its managing group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ManagedInstance {
    /// Instance link.
    pub instance: String,
    /// e.g. `RUNNING`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_status: Option<String>,
    /// e.g. `NONE` or `RECREATING`.
    pub current_action: String,
    /// Template the instance was created from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<ManagedInstanceVersion>,
}

/// Version of a managed instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ManagedInstanceVersion {
    /// Template link.
    pub instance_template: String,
    /// Version name, if the group declares versions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// An error a managed instance group hit while acting on an instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InstanceManagedByIgmError {
    /// RFC3339 time of the error.
    pub timestamp: String,
    /// The error itself.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<InstanceManagedByIgmErrorDetail>,
}

/// Code and message of an [`InstanceManagedByIgmError`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InstanceManagedByIgmErrorDetail {
    /// Error code.
    pub code: String,
    /// Human readable message.
    pub message: String,
}

/// A persistent disk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Disk {
    /// Disk name.
    pub name: String,
    /// Canonical link.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub self_link: String,
    /// Server-assigned id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Zone link or name.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub zone: String,
    /// Disk type link or name.
    #[serde(rename = "type", skip_serializing_if = "String::is_empty")]
    pub disk_type: String,
    /// Size in GB.
    #[serde(rename = "sizeGb")]
    pub size_gb: i64,
    /// Labels.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// Fingerprint required by `setLabels`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label_fingerprint: Option<String>,
}

/// Body of `disks.setLabels`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ZoneSetLabelsRequest {
    /// The full new label set.
    pub labels: BTreeMap<String, String>,
    /// Fingerprint read before the update.
    pub label_fingerprint: String,
}

/// A compute zone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Zone {
    /// Zone name.
    pub name: String,
    /// Region link.
    pub region: String,
    /// `UP` or `DOWN`.
    pub status: String,
}

/// A compute region.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Region {
    /// Region name.
    pub name: String,
    /// Zone links.
    pub zones: Vec<String>,
    /// `UP` or `DOWN`.
    pub status: String,
}

/// A compute project.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Project {
    /// Project id.
    pub name: String,
    /// Numeric project id.
    pub id: String,
    /// Default compute service account email.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub default_service_account: String,
}

/// A list response page.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListPage<T> {
    /// Items of this page.
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
    /// Token for the next page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<String>,
}

// ============================================================================
// IAM
// ============================================================================

/// A conditional binding expression.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Expr {
    /// CEL expression.
    pub expression: String,
    /// Title.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub title: String,
    /// Description.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
}

/// One role binding of a policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Binding {
    /// Role, e.g. `roles/owner`.
    pub role: String,
    /// Members, e.g. `serviceAccount:foo@p.iam.gserviceaccount.com`.
    pub members: Vec<String>,
    /// Optional condition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<Expr>,
}

/// An IAM policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Policy {
    /// Bindings.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub bindings: Vec<Binding>,
    /// Concurrency token.
    pub etag: String,
    /// Policy schema version.
    pub version: i32,
}

impl Policy {
    /// Adds `member` to the unconditional binding for `role`. Returns true if the policy changed.
    pub fn add_member(&mut self, role: &str, member: &str) -> bool {
        if let Some(binding) = self
            .bindings
            .iter_mut()
            .find(|b| b.role == role && b.condition.is_none())
        {
            if binding.members.iter().any(|m| m == member) {
                return false;
            }
            binding.members.push(member.to_string());
            return true;
        }
        self.bindings.push(Binding {
            role: role.to_string(),
            members: vec![member.to_string()],
            condition: None,
        });
        true
    }

    /// Returns true if the unconditional binding for `role` contains `member`.
    #[must_use]
    pub fn has_member(&self, role: &str, member: &str) -> bool {
        self.bindings
            .iter()
            .filter(|b| b.role == role && b.condition.is_none())
            .any(|b| b.members.iter().any(|m| m == member))
    }
}

/// Body of `getIamPolicy`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GetIamPolicyRequest {
    /// Options.
    pub options: GetPolicyOptions,
}

/// Options of `getIamPolicy`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GetPolicyOptions {
    /// Highest policy version the caller understands.
    pub requested_policy_version: i32,
}

/// Body of `setIamPolicy`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SetIamPolicyRequest {
    /// The new policy, carrying the etag that was read.
    pub policy: Policy,
}

/// An IAM service account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServiceAccount {
    /// Resource name `projects/<p>/serviceAccounts/<email>`.
    pub name: String,
    /// Owning project.
    pub project_id: String,
    /// Email.
    pub email: String,
    /// Display name.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub display_name: String,
    /// Description.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Server-assigned id.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub unique_id: String,
}

/// Body of `serviceAccounts.create`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CreateServiceAccountRequest {
    /// Local part of the email.
    pub account_id: String,
    /// Account details.
    pub service_account: ServiceAccount,
}

/// A custom IAM role.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Role {
    /// Resource name `projects/<p>/roles/<id>`.
    pub name: String,
    /// Title.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub title: String,
    /// Description.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Permissions.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub included_permissions: Vec<String>,
    /// Launch stage.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub stage: String,
    /// Concurrency token.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub etag: String,
    /// Soft-deleted roles keep their id for a while.
    pub deleted: bool,
}

/// Body of `roles.create`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CreateRoleRequest {
    /// Role id.
    pub role_id: String,
    /// Role definition.
    pub role: Role,
}

// ============================================================================
// Storage
// ============================================================================

/// A bucket access control entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BucketAccessControl {
    /// Bucket name.
    pub bucket: String,
    /// Entity, e.g. `user-foo@example.com`.
    pub entity: String,
    /// `READER`, `WRITER` or `OWNER`.
    pub role: String,
}

/// An object access control entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectAccessControl {
    /// Bucket name.
    pub bucket: String,
    /// Object name.
    pub object: String,
    /// Entity.
    pub entity: String,
    /// `READER` or `OWNER`.
    pub role: String,
}

/// Metadata of a stored object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageObject {
    /// Bucket name.
    pub bucket: String,
    /// Object name.
    pub name: String,
    /// Size in bytes, as a decimal string.
    pub size: String,
    /// Content type.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub content_type: String,
}

// ============================================================================
// DNS
// ============================================================================

/// A network a private zone is visible to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ManagedZonePrivateVisibilityConfigNetwork {
    /// Network link.
    pub network_url: String,
}

/// Private visibility settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagedZonePrivateVisibilityConfig {
    /// Networks.
    pub networks: Vec<ManagedZonePrivateVisibilityConfigNetwork>,
}

/// A Cloud DNS managed zone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ManagedZone {
    /// Zone resource name.
    pub name: String,
    /// DNS name with trailing dot.
    pub dns_name: String,
    /// Description.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// `public` or `private`.
    pub visibility: String,
    /// Labels.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// Networks for private zones.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private_visibility_config: Option<ManagedZonePrivateVisibilityConfig>,
    /// Server-assigned id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_add_member_is_idempotent() {
        let mut policy = Policy::default();
        assert!(policy.add_member("roles/owner", "user:a@example.com"));
        assert!(!policy.add_member("roles/owner", "user:a@example.com"));
        assert!(policy.add_member("roles/owner", "user:b@example.com"));
        assert_eq!(policy.bindings.len(), 1);
        assert_eq!(policy.bindings[0].members.len(), 2);
    }

    #[test]
    fn test_policy_ignores_conditional_bindings() {
        let mut policy = Policy {
            bindings: vec![Binding {
                role: "roles/viewer".into(),
                members: vec!["user:a@example.com".into()],
                condition: Some(Expr {
                    expression: "request.time < timestamp(\"2030-01-01T00:00:00Z\")".into(),
                    ..Expr::default()
                }),
            }],
            ..Policy::default()
        };
        assert!(!policy.has_member("roles/viewer", "user:a@example.com"));
        assert!(policy.add_member("roles/viewer", "user:a@example.com"));
        assert_eq!(policy.bindings.len(), 2);
    }

    #[test]
    fn test_network_serializes_auto_create_false() {
        let network = Network {
            name: "n".into(),
            ..Network::default()
        };
        let json = serde_json::to_value(&network).expect("serializes");
        assert_eq!(json["autoCreateSubnetworks"], serde_json::Value::Bool(false));
    }

    #[test]
    fn test_operation_wire_format() {
        let op: Operation = serde_json::from_str(
            r#"{"name":"op-1","status":"DONE","selfLink":"x","error":{"errors":[{"code":"QUOTA","message":"m"}]}}"#,
        )
        .expect("parses");
        assert!(op.is_done());
        assert_eq!(op.error.map(|e| e.errors.len()), Some(1));
    }
}
