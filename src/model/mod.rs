//! Model builders: cluster specification to resource tasks.
//!
//! Each builder is a pure function of the [`ClusterConfig`] that adds the
//! tasks of one concern to a [`TaskSet`]. Builders share naming through
//! [`ModelContext`] so that every task refers to the names its peers use.

mod dns;
mod etcd;
mod firewall;
mod iam;
mod instances;
mod load_balancer;
mod network;
mod storage_acl;

pub use dns::DnsModelBuilder;
pub use etcd::EtcdVolumeBuilder;
pub use firewall::{FirewallModelBuilder, split_by_family};
pub use iam::ServiceAccountsBuilder;
pub use instances::{InstanceGroupModelBuilder, instance_group_manager_name, split_across_zones};
pub use load_balancer::ApiLoadBalancerBuilder;
pub use network::NetworkModelBuilder;
pub use storage_acl::StorageAclBuilder;

use std::collections::BTreeMap;
use tracing::debug;

use crate::cloud::GcsPath;
use crate::cloud::naming::{
    LABEL_CLUSTER_NAME, LABEL_ROLE_PREFIX, MAX_NAME_LENGTH, limited_length_name,
    safe_cluster_name, safe_object_name, tag_for_role,
};
use crate::config::{ClusterConfig, InstanceGroupConfig, InstanceGroupRole, SubnetConfig};
use crate::engine::TaskSet;
use crate::error::Result;
use crate::tasks::{Member, Network, Ref, ServiceAccount, Subnet, TargetPool};

/// Name of the API load balancer objects before cluster qualification.
pub const API_LB_ID: &str = "api";

/// Longest account id the IAM API accepts.
const MAX_ACCOUNT_ID_LENGTH: usize = 30;

/// Adds the tasks of one concern.
pub trait ModelBuilder {
    /// Adds this builder's tasks to `tasks`.
    ///
    /// # Errors
    ///
    /// Returns an error if the specification cannot be expressed as tasks.
    fn build(&self, ctx: &ModelContext<'_>, tasks: &mut TaskSet) -> Result<()>;
}

/// Naming and lookup shared by the builders.
#[derive(Debug, Clone, Copy)]
pub struct ModelContext<'a> {
    /// The cluster being built.
    pub cluster: &'a ClusterConfig,
}

impl<'a> ModelContext<'a> {
    /// Creates a context for `cluster`.
    #[must_use]
    pub const fn new(cluster: &'a ClusterConfig) -> Self {
        Self { cluster }
    }

    /// Cluster name usable in resource names and labels.
    #[must_use]
    pub fn safe_cluster_name(&self) -> String {
        safe_cluster_name(&self.cluster.name)
    }

    /// Cloud name of a cluster-owned object with id `id`.
    #[must_use]
    pub fn name_for(&self, id: &str) -> String {
        safe_object_name(id, &self.cluster.name)
    }

    /// Returns true if the cluster uses IP alias networking.
    #[must_use]
    pub const fn ip_alias(&self) -> bool {
        self.cluster.networking.ip_alias
    }

    /// Name of the cluster network.
    #[must_use]
    pub fn network_name(&self) -> String {
        match &self.cluster.networking.network_id {
            Some(id) if !id.is_empty() => id.clone(),
            _ => limited_length_name(&self.safe_cluster_name(), MAX_NAME_LENGTH),
        }
    }

    /// Reference to the cluster network.
    #[must_use]
    pub fn network(&self) -> Ref<Network> {
        Ref::new(self.network_name())
    }

    /// Cloud name of a declared subnet.
    #[must_use]
    pub fn subnet_name(&self, subnet: &SubnetConfig) -> String {
        match &subnet.id {
            Some(id) if !id.is_empty() => id.clone(),
            _ => self.name_for(&subnet.name),
        }
    }

    /// Subnet the instances of `group` attach to, if any subnet is declared.
    #[must_use]
    pub fn subnet_for(&self, group: &InstanceGroupConfig) -> Option<(&'a SubnetConfig, Ref<Subnet>)> {
        let subnet = match group.subnets.first() {
            Some(name) => self.cluster.subnet(name)?,
            None => self.cluster.networking.subnets.first()?,
        };
        Some((subnet, Ref::new(self.subnet_name(subnet))))
    }

    /// Role name used in tags and role labels.
    ///
    /// The control plane keeps the `master` name so that rules and labels
    /// written by older releases still match.
    #[must_use]
    pub const fn role_name(role: InstanceGroupRole) -> &'static str {
        match role {
            InstanceGroupRole::ControlPlane => "master",
            other => other.label(),
        }
    }

    /// Network tag of the instances of `role`.
    #[must_use]
    pub fn tag_for(&self, role: InstanceGroupRole) -> String {
        tag_for_role(&self.cluster.name, Self::role_name(role))
    }

    /// Labels every cluster-owned resource carries.
    #[must_use]
    pub fn cluster_labels(&self) -> BTreeMap<String, String> {
        BTreeMap::from([(LABEL_CLUSTER_NAME.to_string(), self.safe_cluster_name())])
    }

    /// Role label of `role`.
    #[must_use]
    pub fn role_label(role: InstanceGroupRole) -> (String, String) {
        let name = Self::role_name(role);
        (format!("{LABEL_ROLE_PREFIX}{name}"), name.to_string())
    }

    /// Returns true if a load balancer fronts the API.
    #[must_use]
    pub const fn uses_load_balancer(&self) -> bool {
        self.cluster.api.load_balancer.is_some()
    }

    /// Target pool of the API load balancer.
    #[must_use]
    pub fn api_target_pool(&self) -> Option<Ref<TargetPool>> {
        self.uses_load_balancer()
            .then(|| Ref::new(self.name_for(API_LB_ID)))
    }

    /// State store bucket, when the config base is a bucket path.
    #[must_use]
    pub fn config_bucket(&self) -> Option<GcsPath> {
        self.cluster.config_base.as_deref().and_then(GcsPath::parse)
    }

    /// Account id of the per-role service account of `role`.
    #[must_use]
    pub fn role_account_id(&self, role: InstanceGroupRole) -> String {
        limited_length_name(
            &format!("{}-{}", Self::role_name(role), self.safe_cluster_name()),
            MAX_ACCOUNT_ID_LENGTH,
        )
    }

    /// Principal the instances of `role` run as.
    #[must_use]
    pub fn member_for(&self, role: InstanceGroupRole) -> Member {
        if let Some(email) = &self.cluster.service_account {
            return Member::ServiceAccount(Ref::to(&ServiceAccount::shared(email.as_str())));
        }
        if self.cluster.per_role_service_accounts {
            return Member::ServiceAccount(Ref::new(self.role_account_id(role)));
        }
        Member::DefaultServiceAccount
    }

    /// Roles that have at least one instance group, in role order.
    pub fn roles(&self) -> impl Iterator<Item = InstanceGroupRole> + '_ {
        [
            InstanceGroupRole::ControlPlane,
            InstanceGroupRole::ApiServer,
            InstanceGroupRole::Node,
            InstanceGroupRole::Bastion,
        ]
        .into_iter()
        .filter(|role| self.cluster.has_role(*role))
    }
}

/// The builders in the order they run.
#[must_use]
pub fn builders() -> Vec<Box<dyn ModelBuilder>> {
    vec![
        Box::new(NetworkModelBuilder),
        Box::new(FirewallModelBuilder),
        Box::new(ServiceAccountsBuilder),
        Box::new(StorageAclBuilder),
        Box::new(ApiLoadBalancerBuilder),
        Box::new(InstanceGroupModelBuilder),
        Box::new(EtcdVolumeBuilder),
        Box::new(DnsModelBuilder),
    ]
}

/// Builds every task of `cluster`.
///
/// # Errors
///
/// Returns an error if any builder rejects the specification or two builders
/// emit the same task.
pub fn build_tasks(cluster: &ClusterConfig) -> Result<TaskSet> {
    let ctx = ModelContext::new(cluster);
    let mut tasks = TaskSet::new();
    for builder in builders() {
        builder.build(&ctx, &mut tasks)?;
    }
    debug!("Built {} tasks for cluster {}", tasks.len(), cluster.name);
    Ok(tasks)
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::config::{ClusterConfig, ConfigParser};

    /// The minimal cluster used across builder tests.
    pub const MINIMAL: &str = r"
name: testcluster.test.com
project: testproject
region: us-central1
networking:
  subnets:
    - name: us-central1
      type: private
      cidr: 10.0.1.0/24
";

    pub fn parse(yaml: &str) -> ClusterConfig {
        ConfigParser::new().parse_yaml(yaml, None).expect("valid yaml")
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::{MINIMAL, parse};
    use super::*;
    use crate::tasks::FirewallRule;

    #[test]
    fn test_names() {
        let cluster = parse(MINIMAL);
        let ctx = ModelContext::new(&cluster);
        assert_eq!(ctx.network_name(), "testcluster-test-com");
        assert_eq!(ctx.name_for("api"), "api-testcluster-test-com");
        assert_eq!(
            ctx.tag_for(InstanceGroupRole::ControlPlane),
            "testcluster-test-com-k8s-io-role-master"
        );
        assert_eq!(
            ctx.role_account_id(InstanceGroupRole::ControlPlane),
            limited_length_name("master-testcluster-test-com", 30)
        );
    }

    #[test]
    fn test_minimal_network_tasks() {
        let tasks = build_tasks(&parse(MINIMAL)).expect("built");
        assert_eq!(tasks.of_kind::<Network>().count(), 1);
        assert_eq!(tasks.of_kind::<Subnet>().count(), 1);
        let rules: Vec<_> = tasks
            .of_kind::<FirewallRule>()
            .map(|r| r.name.clone())
            .collect();
        assert_eq!(
            rules,
            [
                "master-to-master-testcluster-test-com",
                "master-to-node-testcluster-test-com",
                "node-to-master-testcluster-test-com",
                "node-to-node-testcluster-test-com",
            ]
        );
    }

    #[test]
    fn test_member_selection() {
        let mut cluster = parse(MINIMAL);
        let ctx = ModelContext::new(&cluster);
        assert_eq!(
            ctx.member_for(InstanceGroupRole::Node),
            Member::DefaultServiceAccount
        );

        cluster.per_role_service_accounts = true;
        let ctx = ModelContext::new(&cluster);
        assert_eq!(
            ctx.member_for(InstanceGroupRole::Node),
            Member::ServiceAccount(Ref::new(ctx.role_account_id(InstanceGroupRole::Node)))
        );

        cluster.service_account = Some("shared@p.iam.gserviceaccount.com".to_string());
        let ctx = ModelContext::new(&cluster);
        assert_eq!(
            ctx.member_for(InstanceGroupRole::Node),
            Member::ServiceAccount(Ref::new("shared"))
        );
    }
}
