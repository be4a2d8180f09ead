//! Cluster specification types.
//!
//! These structs map to the cluster YAML file and fully describe the desired
//! infrastructure of one cluster.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Root of a cluster specification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClusterConfig {
    /// Cluster name, usually a DNS name such as `c1.example.com`.
    pub name: String,
    /// Cloud project.
    pub project: String,
    /// Region all regional resources live in.
    pub region: String,
    /// Networking.
    #[serde(default)]
    pub networking: NetworkingConfig,
    /// API server access.
    #[serde(default)]
    pub api: ApiConfig,
    /// CIDRs allowed to SSH to nodes and control plane.
    #[serde(default)]
    pub ssh_access: Vec<String>,
    /// CIDRs allowed to reach the NodePort range.
    #[serde(default)]
    pub node_port_access: Vec<String>,
    /// Cluster DNS.
    #[serde(default)]
    pub dns: DnsConfig,
    /// State store path, e.g. `gs://bucket/c1.example.com`.
    #[serde(default)]
    pub config_base: Option<String>,
    /// Extra paths the control plane writes to.
    #[serde(default)]
    pub additional_writeable_paths: Vec<String>,
    /// Existing service account email used by all instances.
    #[serde(default)]
    pub service_account: Option<String>,
    /// Create one service account per role when no account is given.
    #[serde(default)]
    pub per_role_service_accounts: bool,
    /// SSH public keys added to instance metadata.
    #[serde(default)]
    pub ssh_public_keys: Vec<String>,
    /// Etcd clusters and their members.
    #[serde(default)]
    pub etcd_clusters: Vec<EtcdClusterConfig>,
    /// Instance groups.
    #[serde(default)]
    pub instance_groups: Vec<InstanceGroupConfig>,
}

/// Networking configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct NetworkingConfig {
    /// Existing network to use; empty to create one named after the cluster.
    #[serde(default)]
    pub network_id: Option<String>,
    /// Carry pod and service ranges as subnet secondary ranges.
    #[serde(default)]
    pub ip_alias: bool,
    /// Pod CIDR.
    #[serde(default)]
    pub pod_cidr: Option<String>,
    /// Service CIDR.
    #[serde(default)]
    pub service_cidr: Option<String>,
    /// Public or private topology.
    #[serde(default)]
    pub topology: Topology,
    /// Subnets.
    #[serde(default)]
    pub subnets: Vec<SubnetConfig>,
}

/// Whether instances get public IPs by default.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Topology {
    /// Instances are reachable from the internet.
    #[default]
    Public,
    /// Instances reach the internet through NAT.
    Private,
}

/// A subnet of the cluster network.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubnetConfig {
    /// Subnet name within the cluster.
    pub name: String,
    /// Region, defaulting to the cluster region.
    #[serde(default)]
    pub region: Option<String>,
    /// Primary CIDR; allocated when empty in IP alias mode.
    #[serde(default)]
    pub cidr: Option<String>,
    /// Subnet type.
    #[serde(default, rename = "type")]
    pub subnet_type: SubnetType,
    /// Existing subnet to use instead of creating one.
    #[serde(default)]
    pub id: Option<String>,
}

/// Kind of subnet.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SubnetType {
    /// Instances have public IPs.
    #[default]
    Public,
    /// Instances use NAT.
    Private,
    /// Load balancers and bastions.
    Utility,
}

/// API server access.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApiConfig {
    /// Load balancer in front of the API; none means direct access.
    #[serde(default)]
    pub load_balancer: Option<LoadBalancerConfig>,
    /// CIDRs allowed to reach the API.
    #[serde(default)]
    pub access: Vec<String>,
}

/// API load balancer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoadBalancerConfig {
    /// Load balancer type.
    #[serde(rename = "type")]
    pub lb_type: LoadBalancerType,
}

/// API load balancer types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum LoadBalancerType {
    /// External TCP load balancer.
    Public,
    /// Internal load balancer.
    Internal,
}

impl fmt::Display for LoadBalancerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Public => write!(f, "Public"),
            Self::Internal => write!(f, "Internal"),
        }
    }
}

/// Cluster DNS.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DnsConfig {
    /// DNS type.
    #[serde(default, rename = "type")]
    pub dns_type: DnsType,
    /// Zone name such as `example.com`.
    #[serde(default)]
    pub zone: Option<String>,
}

/// How cluster names are published.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DnsType {
    /// An existing public zone.
    #[default]
    Public,
    /// A private zone created for the cluster.
    Private,
    /// No DNS.
    None,
}

/// An etcd cluster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EtcdClusterConfig {
    /// Cluster name, e.g. `main` or `events`.
    pub name: String,
    /// Members.
    pub members: Vec<EtcdMemberConfig>,
}

/// One etcd member and its volume.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EtcdMemberConfig {
    /// Member name.
    pub name: String,
    /// Zone of the volume.
    pub zone: String,
    /// Volume size in GB.
    #[serde(default = "default_etcd_volume_size")]
    pub volume_size_gb: i64,
    /// Volume type.
    #[serde(default = "default_etcd_volume_type")]
    pub volume_type: String,
}

/// An instance group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstanceGroupConfig {
    /// Group name within the cluster.
    pub name: String,
    /// Role.
    pub role: InstanceGroupRole,
    /// Machine type.
    pub machine_type: String,
    /// Image as `project/name` or a full link.
    pub image: String,
    /// Minimum size, spread across zones.
    pub min_size: i64,
    /// Maximum size.
    #[serde(default)]
    pub max_size: Option<i64>,
    /// Zones.
    #[serde(default)]
    pub zones: Vec<String>,
    /// Subnets, by name.
    #[serde(default)]
    pub subnets: Vec<String>,
    /// Root volume size in GB.
    #[serde(default)]
    pub root_volume_size_gb: Option<i64>,
    /// Root volume type.
    #[serde(default)]
    pub root_volume_type: Option<String>,
    /// Preemptible instances.
    #[serde(default)]
    pub preemptible: bool,
    /// Provisioning model, e.g. `SPOT`.
    #[serde(default)]
    pub provisioning_model: Option<String>,
    /// Guest accelerators.
    #[serde(default)]
    pub accelerators: Vec<AcceleratorConfig>,
    /// Instance labels.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Extra network tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Startup script.
    #[serde(default)]
    pub startup_script: Option<String>,
    /// Give instances an external IP; defaults from the topology.
    #[serde(default)]
    pub associate_public_ip: Option<bool>,
}

/// A guest accelerator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AcceleratorConfig {
    /// Accelerator type, e.g. `nvidia-tesla-t4`.
    #[serde(rename = "type")]
    pub accelerator_type: String,
    /// Count.
    pub count: i64,
}

/// Role of an instance group.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum InstanceGroupRole {
    /// Runs the control plane.
    ControlPlane,
    /// Runs workloads.
    Node,
    /// SSH jump host.
    Bastion,
    /// Runs only the API server.
    #[serde(rename = "APIServer")]
    ApiServer,
}

impl InstanceGroupRole {
    /// Value of the role label and suffix of the role tag.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::ControlPlane => "control-plane",
            Self::Node => "node",
            Self::Bastion => "bastion",
            Self::ApiServer => "apiserver",
        }
    }

    /// Returns true if instances of this role serve the Kubernetes API.
    #[must_use]
    pub const fn has_api_server(self) -> bool {
        matches!(self, Self::ControlPlane | Self::ApiServer)
    }

    /// Default root volume size in GB.
    #[must_use]
    pub const fn default_volume_size_gb(self) -> i64 {
        match self {
            Self::ControlPlane | Self::ApiServer => 64,
            Self::Node => 128,
            Self::Bastion => 32,
        }
    }
}

impl fmt::Display for InstanceGroupRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl ClusterConfig {
    /// Instance groups with `role`.
    pub fn groups_with_role(
        &self,
        role: InstanceGroupRole,
    ) -> impl Iterator<Item = &InstanceGroupConfig> {
        self.instance_groups.iter().filter(move |g| g.role == role)
    }

    /// Returns true if any instance group has `role`.
    #[must_use]
    pub fn has_role(&self, role: InstanceGroupRole) -> bool {
        self.groups_with_role(role).next().is_some()
    }

    /// Region of `subnet`.
    #[must_use]
    pub fn subnet_region<'a>(&'a self, subnet: &'a SubnetConfig) -> &'a str {
        subnet.region.as_deref().unwrap_or(&self.region)
    }

    /// Subnet by name.
    #[must_use]
    pub fn subnet(&self, name: &str) -> Option<&SubnetConfig> {
        self.networking.subnets.iter().find(|s| s.name == name)
    }

    /// Returns true if the cluster uses an existing network.
    #[must_use]
    pub fn uses_shared_network(&self) -> bool {
        self.networking
            .network_id
            .as_deref()
            .is_some_and(|id| !id.is_empty())
    }
}

fn default_etcd_volume_size() -> i64 {
    20
}

fn default_etcd_volume_type() -> String {
    String::from("pd-ssd")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_labels() {
        assert_eq!(InstanceGroupRole::ControlPlane.label(), "control-plane");
        assert!(InstanceGroupRole::ApiServer.has_api_server());
        assert!(!InstanceGroupRole::Bastion.has_api_server());
    }

    #[test]
    fn test_role_serde_names() {
        let role: InstanceGroupRole = serde_yaml::from_str("APIServer").expect("role");
        assert_eq!(role, InstanceGroupRole::ApiServer);
        let role: InstanceGroupRole = serde_yaml::from_str("ControlPlane").expect("role");
        assert_eq!(role, InstanceGroupRole::ControlPlane);
    }

    #[test]
    fn test_etcd_member_defaults() {
        let member: EtcdMemberConfig =
            serde_yaml::from_str("name: a\nzone: us-central1-a\n").expect("member");
        assert_eq!(member.volume_size_gb, 20);
        assert_eq!(member.volume_type, "pd-ssd");
    }
}
