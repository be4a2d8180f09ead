//! CIDR planning for IP alias networking.
//!
//! When pod, service or node ranges are left unset, free blocks are carved
//! out of `10.0.0.0/8` so that they never overlap a range already used by a
//! subnet of the target network, in any region.

use std::net::Ipv4Addr;

use ipnetwork::{IpNetwork, Ipv4Network};
use tracing::{debug, info, warn};

use crate::cloud::GceCloud;
use crate::cloud::types::Subnetwork;
use crate::cloud::url::last_component;
use crate::config::ClusterConfig;
use crate::error::{InfraError, ModelError, Result};

/// Block allocations are drawn from.
pub const BASE_CIDR: &str = "10.0.0.0/8";
/// Prefix length of an allocated pod range.
pub const POD_PREFIX: u8 = 14;
/// Prefix length of an allocated service range.
pub const SERVICE_PREFIX: u8 = 20;
/// Prefix length of an allocated node subnet.
pub const NODE_PREFIX: u8 = 20;

/// Parses an IPv4 CIDR, masking off host bits.
///
/// A bare address without a prefix length is rejected.
///
/// # Errors
///
/// Returns `InvalidSpec` if `s` is not an IPv4 network in CIDR notation.
pub fn parse_ipv4(s: &str) -> Result<Ipv4Network> {
    let invalid = |reason: String| {
        InfraError::from(ModelError::InvalidSpec {
            message: format!("invalid IPv4 CIDR {s:?}: {reason}"),
        })
    };
    if !s.contains('/') {
        return Err(invalid("missing prefix length".to_string()));
    }
    let parsed: Ipv4Network = s.parse().map_err(|e| invalid(format!("{e}")))?;
    Ipv4Network::new(parsed.network(), parsed.prefix()).map_err(|e| invalid(format!("{e}")))
}

/// Returns true if `s` is an IPv6 CIDR or address.
#[must_use]
pub fn is_ipv6(s: &str) -> bool {
    s.parse::<IpNetwork>().is_ok_and(|net| net.is_ipv6())
}

/// Returns true if `s` is a well-formed IPv4 or IPv6 CIDR.
#[must_use]
pub fn is_valid_cidr(s: &str) -> bool {
    s.contains('/') && s.parse::<IpNetwork>().is_ok()
}

fn block_size(prefix: u8) -> u64 {
    1u64 << (32 - u32::from(prefix.min(32)))
}

fn start_of(net: &Ipv4Network) -> u64 {
    u64::from(u32::from(net.network()))
}

/// Allocates successive non-overlapping blocks from a base range.
///
/// Each allocation starts where the previous one ended, aligned to the
/// requested size, and skips any block that overlaps a used range. The
/// block at the base network address is never handed out.
#[derive(Debug, Clone)]
pub struct CidrPlanner {
    base: Ipv4Network,
    used: Vec<Ipv4Network>,
    cursor: u64,
}

impl CidrPlanner {
    /// Creates a planner over `base` that avoids `used`.
    #[must_use]
    pub fn new(base: Ipv4Network, used: Vec<Ipv4Network>) -> Self {
        Self {
            cursor: start_of(&base),
            base,
            used,
        }
    }

    /// Creates a planner over [`BASE_CIDR`].
    ///
    /// # Errors
    ///
    /// Never fails for the built-in base.
    pub fn over_default_base(used: Vec<Ipv4Network>) -> Result<Self> {
        Ok(Self::new(parse_ipv4(BASE_CIDR)?, used))
    }

    /// Marks `cidr` as used.
    pub fn reserve(&mut self, cidr: Ipv4Network) {
        self.used.push(cidr);
    }

    /// Ranges the planner avoids, including its own allocations.
    #[must_use]
    pub fn used(&self) -> &[Ipv4Network] {
        &self.used
    }

    /// Allocates the next free block of `/prefix`.
    ///
    /// # Errors
    ///
    /// Returns `CidrExhausted` when the base has no free block left, or
    /// `InvalidSpec` when `prefix` is shorter than the base prefix.
    pub fn allocate(&mut self, prefix: u8) -> Result<Ipv4Network> {
        if prefix < self.base.prefix() || prefix > 32 {
            return Err(ModelError::InvalidSpec {
                message: format!("cannot allocate a /{prefix} from {}", self.base),
            }
            .into());
        }
        let size = block_size(prefix);
        let base_start = start_of(&self.base);
        let base_end = base_start + block_size(self.base.prefix());
        let mut candidate = self.cursor.div_ceil(size) * size;
        loop {
            if candidate + size > base_end {
                return Err(ModelError::CidrExhausted {
                    base: self.base.to_string(),
                    prefix,
                }
                .into());
            }
            if candidate == base_start {
                candidate += size;
                continue;
            }
            let start = u32::try_from(candidate)
                .map_err(|_| InfraError::internal(format!("address {candidate} out of range")))?;
            let block = Ipv4Network::new(Ipv4Addr::from(start), prefix)
                .map_err(|e| InfraError::internal(format!("block at {candidate}: {e}")))?;
            if let Some(used) = self.used.iter().find(|u| u.overlaps(block)) {
                debug!("Skipping {block}: overlaps {used}");
                candidate += size;
                continue;
            }
            self.used.push(block);
            self.cursor = candidate + size;
            return Ok(block);
        }
    }
}

/// Primary and secondary IPv4 ranges of `subnets`.
#[must_use]
pub fn subnet_ranges(subnets: &[Subnetwork]) -> Vec<Ipv4Network> {
    let mut ranges = Vec::new();
    for subnet in subnets {
        let all = std::iter::once(subnet.ip_cidr_range.as_str())
            .chain(subnet.secondary_ip_ranges.iter().map(|r| r.ip_cidr_range.as_str()));
        for range in all.filter(|r| !r.is_empty() && !is_ipv6(r)) {
            match parse_ipv4(range) {
                Ok(cidr) => ranges.push(cidr),
                Err(_) => warn!("Ignoring unparseable range {range} of subnet {}", subnet.name),
            }
        }
    }
    ranges
}

/// Lists every subnet of `network` across all regions of the project.
///
/// # Errors
///
/// Returns an error if a listing fails.
pub async fn network_subnets(cloud: &GceCloud, network: &str) -> Result<Vec<Subnetwork>> {
    let compute = cloud.compute();
    let mut subnets = Vec::new();
    for region in compute.locations().list_regions(cloud.project()).await? {
        let listed = compute
            .subnetworks()
            .list(cloud.project(), &region.name)
            .await?;
        subnets.extend(
            listed
                .into_iter()
                .filter(|s| last_component(&s.network) == network),
        );
    }
    Ok(subnets)
}

/// Returns true if IP alias networking leaves a range to allocate.
#[must_use]
pub fn needs_planning(config: &ClusterConfig) -> bool {
    let net = &config.networking;
    net.ip_alias
        && (net.pod_cidr.is_none()
            || net.service_cidr.is_none()
            || net.subnets.iter().any(|s| s.id.is_none() && s.cidr.is_none()))
}

/// Fills unset pod, service and node subnet ranges of `config`.
///
/// Ranges already present in `config` are treated as used. Allocation
/// order is pod, service, then node subnets in declaration order.
///
/// # Errors
///
/// Returns an error if a configured range is malformed or the base is exhausted.
pub fn assign_cidrs(config: &mut ClusterConfig, used: Vec<Ipv4Network>) -> Result<()> {
    let mut planner = CidrPlanner::over_default_base(used)?;
    let net = &mut config.networking;
    let configured = [net.pod_cidr.as_deref(), net.service_cidr.as_deref()]
        .into_iter()
        .chain(net.subnets.iter().map(|s| s.cidr.as_deref()))
        .flatten()
        .filter(|c| !is_ipv6(c));
    for cidr in configured {
        planner.reserve(parse_ipv4(cidr)?);
    }

    if net.pod_cidr.is_none() {
        let pod = planner.allocate(POD_PREFIX)?;
        info!("Allocated pod CIDR {pod}");
        net.pod_cidr = Some(pod.to_string());
    }
    if net.service_cidr.is_none() {
        let service = planner.allocate(SERVICE_PREFIX)?;
        info!("Allocated service CIDR {service}");
        net.service_cidr = Some(service.to_string());
    }
    for subnet in net
        .subnets
        .iter_mut()
        .filter(|s| s.id.is_none() && s.cidr.is_none())
    {
        let node = planner.allocate(NODE_PREFIX)?;
        info!("Allocated CIDR {node} for subnet {}", subnet.name);
        subnet.cidr = Some(node.to_string());
    }
    Ok(())
}

/// Plans missing ranges against the live subnets of `network`.
///
/// Does nothing unless [`needs_planning`] holds. The subnet listing is taken
/// once; concurrent allocations against the same network are not detected.
///
/// # Errors
///
/// Returns an error if listing fails or no free range remains.
pub async fn plan(cloud: &GceCloud, network: &str, config: &mut ClusterConfig) -> Result<()> {
    if !needs_planning(config) {
        return Ok(());
    }
    let subnets = network_subnets(cloud, network).await?;
    debug!("Planning CIDRs around {} existing subnet(s)", subnets.len());
    assign_cidrs(config, subnet_ranges(&subnets))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::types::SubnetworkSecondaryRange;
    use crate::config::{NetworkingConfig, SubnetConfig, SubnetType};
    use crate::simulator::MockCloud;

    fn cidr(s: &str) -> Ipv4Network {
        parse_ipv4(s).expect("cidr")
    }

    fn cluster(ip_alias: bool) -> ClusterConfig {
        ClusterConfig {
            name: "c1.example.com".to_string(),
            project: "p".to_string(),
            region: "us-central1".to_string(),
            networking: NetworkingConfig {
                ip_alias,
                subnets: vec![SubnetConfig {
                    name: "us-central1".to_string(),
                    region: None,
                    cidr: None,
                    subnet_type: SubnetType::Public,
                    id: None,
                }],
                ..NetworkingConfig::default()
            },
            api: crate::config::ApiConfig::default(),
            ssh_access: Vec::new(),
            node_port_access: Vec::new(),
            dns: crate::config::DnsConfig::default(),
            config_base: None,
            additional_writeable_paths: Vec::new(),
            service_account: None,
            per_role_service_accounts: false,
            ssh_public_keys: Vec::new(),
            etcd_clusters: Vec::new(),
            instance_groups: Vec::new(),
        }
    }

    #[test]
    fn test_parse_masks_host_bits() {
        assert_eq!(cidr("10.1.2.3/16").to_string(), "10.1.0.0/16");
        assert!(parse_ipv4("10.0.0.0/33").is_err());
        assert!(parse_ipv4("10.0.0.0").is_err());
        assert!(parse_ipv4("::/0").is_err());
    }

    #[test]
    fn test_overlap() {
        assert!(cidr("10.0.0.0/8").overlaps(cidr("10.4.0.0/14")));
        assert!(!cidr("10.4.0.0/14").overlaps(cidr("10.8.0.0/20")));
        assert!(cidr("10.8.16.0/20").is_subnet_of(cidr("10.0.0.0/8")));
    }

    #[test]
    fn test_valid_cidr_both_families() {
        assert!(is_valid_cidr("0.0.0.0/0"));
        assert!(is_valid_cidr("::/0"));
        assert!(is_valid_cidr("2001:db8::/32"));
        assert!(!is_valid_cidr("::/129"));
        assert!(!is_valid_cidr("nope"));
        assert!(!is_valid_cidr("10.0.0.1"));
        assert!(is_ipv6("::/0"));
        assert!(is_ipv6("2001:db8::1"));
        assert!(!is_ipv6("0.0.0.0/0"));
        assert!(!is_ipv6("not:a:cidr"));
    }

    #[test]
    fn test_sequence_on_empty_network() {
        let mut planner = CidrPlanner::over_default_base(Vec::new()).expect("planner");
        assert_eq!(planner.allocate(POD_PREFIX).expect("pod").to_string(), "10.4.0.0/14");
        assert_eq!(
            planner.allocate(SERVICE_PREFIX).expect("service").to_string(),
            "10.8.0.0/20"
        );
        assert_eq!(planner.allocate(NODE_PREFIX).expect("node").to_string(), "10.8.16.0/20");
    }

    #[test]
    fn test_allocations_avoid_used_ranges() {
        let used = vec![cidr("10.4.0.0/14"), cidr("10.12.0.0/20")];
        let mut planner = CidrPlanner::over_default_base(used.clone()).expect("planner");
        let allocated = [
            planner.allocate(POD_PREFIX).expect("pod"),
            planner.allocate(SERVICE_PREFIX).expect("service"),
            planner.allocate(NODE_PREFIX).expect("node"),
        ];
        assert_eq!(allocated[0].to_string(), "10.8.0.0/14");
        assert_eq!(allocated[1].to_string(), "10.12.16.0/20");
        for (i, a) in allocated.iter().enumerate() {
            assert!(used.iter().all(|u| !u.overlaps(*a)), "{a} overlaps used");
            for b in &allocated[i + 1..] {
                assert!(!a.overlaps(*b), "{a} overlaps {b}");
            }
        }
    }

    #[test]
    fn test_exhaustion() {
        let mut planner = CidrPlanner::new(cidr("192.168.0.0/23"), Vec::new());
        assert_eq!(planner.allocate(24).expect("second half").to_string(), "192.168.1.0/24");
        let err = planner.allocate(24).expect_err("exhausted");
        assert_eq!(err.to_string(), "Model error: No free /24 left in 192.168.0.0/23");
    }

    #[test]
    fn test_assign_keeps_configured_ranges() {
        let mut config = cluster(true);
        config.networking.pod_cidr = Some("10.4.0.0/14".to_string());
        assign_cidrs(&mut config, Vec::new()).expect("assigned");
        let net = &config.networking;
        assert_eq!(net.pod_cidr.as_deref(), Some("10.4.0.0/14"));
        // First fit below the configured pod range; the block at 10.0.0.0 stays free.
        assert_eq!(net.service_cidr.as_deref(), Some("10.0.16.0/20"));
        assert_eq!(net.subnets[0].cidr.as_deref(), Some("10.0.32.0/20"));

        let ranges: Vec<Ipv4Network> = [&net.pod_cidr, &net.service_cidr, &net.subnets[0].cidr]
            .into_iter()
            .map(|c| cidr(c.as_deref().expect("assigned")))
            .collect();
        let base_address = Ipv4Addr::new(10, 0, 0, 0);
        for (i, a) in ranges.iter().enumerate() {
            assert!(!a.contains(base_address), "{a} holds the base address");
            for b in &ranges[i + 1..] {
                assert!(!a.overlaps(*b), "{a} overlaps {b}");
            }
        }
    }

    #[test]
    fn test_no_planning_without_ip_alias() {
        assert!(!needs_planning(&cluster(false)));
        assert!(needs_planning(&cluster(true)));
    }

    #[tokio::test]
    async fn test_plan_reads_subnets_in_all_regions() {
        let sim = MockCloud::new();
        let cloud = sim.cloud("p", "us-central1");
        let existing = Subnetwork {
            name: "other".to_string(),
            network: "projects/p/global/networks/shared".to_string(),
            ip_cidr_range: "10.4.0.0/14".to_string(),
            secondary_ip_ranges: vec![SubnetworkSecondaryRange {
                range_name: "pods".to_string(),
                ip_cidr_range: "10.8.0.0/14".to_string(),
            }],
            ..Subnetwork::default()
        };
        cloud
            .compute()
            .subnetworks()
            .insert("p", "europe-west1", &existing)
            .await
            .expect("seeded");

        let mut config = cluster(true);
        plan(&cloud, "shared", &mut config).await.expect("planned");
        assert_eq!(config.networking.pod_cidr.as_deref(), Some("10.12.0.0/14"));
        assert_eq!(config.networking.service_cidr.as_deref(), Some("10.16.0.0/20"));
        assert_eq!(config.networking.subnets[0].cidr.as_deref(), Some("10.16.16.0/20"));
    }
}
