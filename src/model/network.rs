//! Network, subnets and the NAT router of private clusters.

use std::collections::{BTreeMap, BTreeSet};

use crate::config::{SubnetConfig, SubnetType, Topology};
use crate::engine::TaskSet;
use crate::error::{ModelError, Result};
use crate::tasks::{Lifecycle, Network, Router, RouterNat, Subnet};

use super::{ModelBuilder, ModelContext};

/// Secondary range carrying pod IPs in IP alias mode.
pub const POD_RANGE: &str = "pods";
/// Secondary range carrying service IPs in IP alias mode.
pub const SERVICE_RANGE: &str = "services";

/// Emits the network, one subnet per declared subnet, and a NAT router for
/// private topologies.
#[derive(Debug, Clone, Copy, Default)]
pub struct NetworkModelBuilder;

impl NetworkModelBuilder {
    fn subnet(ctx: &ModelContext<'_>, config: &SubnetConfig) -> Result<Subnet> {
        let name = ctx.subnet_name(config);
        let region = ctx.cluster.subnet_region(config).to_string();
        if config.id.as_deref().is_some_and(|id| !id.is_empty()) {
            return Ok(Subnet {
                name,
                network: ctx.network(),
                region,
                cidr: None,
                secondary_ranges: None,
                lifecycle: Lifecycle::ExistsAndWarnIfChanges,
                shared: true,
            });
        }

        let cidr = config.cidr.clone().ok_or_else(|| ModelError::InvalidSpec {
            message: format!("subnet {} has no CIDR and none was planned", config.name),
        })?;
        let mut subnet = Subnet::new(name, ctx.network(), region, cidr);
        if ctx.ip_alias() {
            let networking = &ctx.cluster.networking;
            let mut ranges = BTreeMap::new();
            if let Some(pods) = &networking.pod_cidr {
                ranges.insert(POD_RANGE.to_string(), pods.clone());
            }
            if let Some(services) = &networking.service_cidr {
                ranges.insert(SERVICE_RANGE.to_string(), services.clone());
            }
            subnet.secondary_ranges = Some(ranges);
        }
        Ok(subnet)
    }
}

impl ModelBuilder for NetworkModelBuilder {
    fn build(&self, ctx: &ModelContext<'_>, tasks: &mut TaskSet) -> Result<()> {
        let network = if ctx.cluster.uses_shared_network() {
            Network::shared(ctx.network_name())
        } else {
            Network::custom(ctx.network_name())
        };
        tasks.add(network)?;

        for config in &ctx.cluster.networking.subnets {
            tasks.add(Self::subnet(ctx, config)?)?;
        }

        let networking = &ctx.cluster.networking;
        let has_private = networking
            .subnets
            .iter()
            .any(|s| s.subnet_type == SubnetType::Private);
        if networking.topology == Topology::Private && has_private {
            let name = ctx.name_for("nat");
            tasks.add(Router {
                nat: Some(RouterNat::for_subnets(name.clone(), BTreeSet::new())),
                name,
                region: ctx.cluster.region.clone(),
                network: ctx.network(),
                lifecycle: Lifecycle::Sync,
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::test_support::{MINIMAL, parse};
    use crate::tasks::NetworkMode;

    fn build(yaml: &str) -> TaskSet {
        let cluster = parse(yaml);
        let mut tasks = TaskSet::new();
        NetworkModelBuilder
            .build(&ModelContext::new(&cluster), &mut tasks)
            .expect("built");
        tasks
    }

    #[test]
    fn test_custom_network_and_subnet() {
        let tasks = build(MINIMAL);
        let network = tasks.get::<Network>("testcluster-test-com").expect("network");
        assert_eq!(network.mode, Some(NetworkMode::Custom));
        assert!(!network.shared);

        let subnet = tasks
            .get::<Subnet>("us-central1-testcluster-test-com")
            .expect("subnet");
        assert_eq!(subnet.cidr.as_deref(), Some("10.0.1.0/24"));
        assert_eq!(subnet.region, "us-central1");
        assert_eq!(subnet.secondary_ranges, Some(BTreeMap::new()));
        assert_eq!(tasks.of_kind::<Router>().count(), 0);
    }

    #[test]
    fn test_ip_alias_secondary_ranges() {
        let yaml = MINIMAL.replace(
            "networking:\n",
            "networking:\n  ip_alias: true\n  pod_cidr: 10.4.0.0/14\n  service_cidr: 10.8.0.0/20\n",
        );
        let tasks = build(&yaml);
        let subnet = tasks
            .get::<Subnet>("us-central1-testcluster-test-com")
            .expect("subnet");
        let ranges = subnet.secondary_ranges.as_ref().expect("ranges");
        assert_eq!(ranges.get(POD_RANGE).map(String::as_str), Some("10.4.0.0/14"));
        assert_eq!(ranges.get(SERVICE_RANGE).map(String::as_str), Some("10.8.0.0/20"));
    }

    #[test]
    fn test_shared_network_and_subnet() {
        let yaml = r"
name: c1.example.com
project: p
region: us-central1
networking:
  network_id: shared-net
  subnets:
    - name: main
      id: shared-subnet
";
        let tasks = build(yaml);
        let network = tasks.get::<Network>("shared-net").expect("network");
        assert!(network.shared);
        assert_eq!(network.lifecycle, Lifecycle::ExistsAndWarnIfChanges);
        let subnet = tasks.get::<Subnet>("shared-subnet").expect("subnet");
        assert!(subnet.shared);
        assert_eq!(subnet.cidr, None);
    }

    #[test]
    fn test_private_topology_router() {
        let yaml = MINIMAL.replace("networking:\n", "networking:\n  topology: private\n");
        let tasks = build(&yaml);
        let router = tasks
            .get::<Router>("nat-testcluster-test-com")
            .expect("router");
        let nat = router.nat.as_ref().expect("nat");
        assert_eq!(nat.nat_ip_allocate_option, "AUTO_ONLY");
        assert_eq!(nat.source_subnetwork_ip_ranges_to_nat, "ALL_SUBNETWORKS_ALL_IP_RANGES");
    }

    #[test]
    fn test_missing_cidr_is_an_error() {
        let yaml = MINIMAL.replace("      cidr: 10.0.1.0/24\n", "");
        let cluster = parse(&yaml);
        let err = NetworkModelBuilder
            .build(&ModelContext::new(&cluster), &mut TaskSet::new())
            .expect_err("no cidr");
        assert!(err.to_string().contains("has no CIDR"));
    }
}
