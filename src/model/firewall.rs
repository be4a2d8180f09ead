//! Firewall rules between cluster roles and from the outside world.

use std::collections::BTreeSet;

use crate::cidr::is_ipv6;
use crate::config::InstanceGroupRole;
use crate::engine::TaskSet;
use crate::error::Result;
use crate::tasks::FirewallRule;

use super::{ModelBuilder, ModelContext};

/// Protocols opened between roles that trust each other fully.
const ALL_PROTOCOLS: &[&str] = &["ah", "esp", "icmp", "sctp", "tcp", "udp"];

/// Ports the control plane accepts from nodes.
const NODE_TO_MASTER: &[&str] = &["tcp:443", "tcp:4194"];

const SSH: &[&str] = &["tcp:22"];
const HTTPS: &[&str] = &["tcp:443"];
const NODE_PORTS: &[&str] = &["tcp:30000-32767", "udp:30000-32767"];

/// Splits a rule into an IPv4 rule and an IPv6 rule named `ipv6_name`.
///
/// A rule without source ranges is returned unchanged. Otherwise both rules
/// are always emitted; a family with no ranges is emitted disabled so that a
/// rule left over from an earlier run stops matching.
#[must_use]
pub fn split_by_family(rule: FirewallRule, ipv6_name: impl Into<String>) -> Vec<FirewallRule> {
    if rule.source_ranges.is_empty() {
        return vec![rule];
    }
    let (v6, v4): (BTreeSet<String>, BTreeSet<String>) = rule
        .source_ranges
        .iter()
        .cloned()
        .partition(|cidr| is_ipv6(cidr));

    let mut ipv6 = rule.clone();
    ipv6.name = ipv6_name.into();
    ipv6.disabled = rule.disabled || v6.is_empty();
    ipv6.source_ranges = v6;

    let mut ipv4 = rule;
    ipv4.disabled = ipv4.disabled || v4.is_empty();
    ipv4.source_ranges = v4;

    vec![ipv4, ipv6]
}

/// Emits the cluster firewall rules.
#[derive(Debug, Clone, Copy, Default)]
pub struct FirewallModelBuilder;

impl FirewallModelBuilder {
    fn rule(ctx: &ModelContext<'_>, id: &str, allowed: &[&str]) -> FirewallRule {
        let mut rule = FirewallRule::new(ctx.name_for(id), ctx.network());
        rule.allowed = allowed.iter().map(ToString::to_string).collect();
        rule
    }

    fn between(
        ctx: &ModelContext<'_>,
        id: &str,
        from: InstanceGroupRole,
        to: InstanceGroupRole,
        allowed: &[&str],
    ) -> FirewallRule {
        let mut rule = Self::rule(ctx, id, allowed);
        rule.source_tags.insert(ctx.tag_for(from));
        rule.target_tags.insert(ctx.tag_for(to));
        rule
    }

    fn from_ranges(
        ctx: &ModelContext<'_>,
        id: &str,
        ranges: &[String],
        to: InstanceGroupRole,
        allowed: &[&str],
    ) -> FirewallRule {
        let mut rule = Self::rule(ctx, id, allowed);
        rule.source_ranges = ranges.iter().cloned().collect();
        rule.target_tags.insert(ctx.tag_for(to));
        rule
    }

    /// Adds `rule` through the family split.
    fn add(ctx: &ModelContext<'_>, tasks: &mut TaskSet, id: &str, rule: FirewallRule) -> Result<()> {
        for rule in split_by_family(rule, ctx.name_for(&format!("{id}-ipv6"))) {
            tasks.add(rule)?;
        }
        Ok(())
    }
}

impl ModelBuilder for FirewallModelBuilder {
    fn build(&self, ctx: &ModelContext<'_>, tasks: &mut TaskSet) -> Result<()> {
        use InstanceGroupRole::{Bastion, ControlPlane, Node};
        let cluster = ctx.cluster;

        let internal = [
            ("node-to-node", Node, Node, ALL_PROTOCOLS),
            ("master-to-master", ControlPlane, ControlPlane, ALL_PROTOCOLS),
            ("master-to-node", ControlPlane, Node, ALL_PROTOCOLS),
            ("node-to-master", Node, ControlPlane, NODE_TO_MASTER),
        ];
        for (id, from, to, allowed) in internal {
            Self::add(ctx, tasks, id, Self::between(ctx, id, from, to, allowed))?;
        }

        if ctx.ip_alias()
            && let Some(pod_cidr) = &cluster.networking.pod_cidr
        {
            let id = "pod-cidrs-to-node";
            let rule = Self::from_ranges(ctx, id, std::slice::from_ref(pod_cidr), Node, ALL_PROTOCOLS);
            Self::add(ctx, tasks, id, rule)?;
        }

        if cluster.has_role(Bastion) {
            let world = vec!["0.0.0.0/0".to_string()];
            let sources = if cluster.ssh_access.is_empty() {
                &world
            } else {
                &cluster.ssh_access
            };
            let id = "ssh-external-to-bastion";
            Self::add(ctx, tasks, id, Self::from_ranges(ctx, id, sources, Bastion, SSH))?;
            for (id, to) in [("bastion-to-master-ssh", ControlPlane), ("bastion-to-node-ssh", Node)] {
                Self::add(ctx, tasks, id, Self::between(ctx, id, Bastion, to, SSH))?;
            }
        }

        if !cluster.ssh_access.is_empty() {
            for (id, to) in [("ssh-external-to-master", ControlPlane), ("ssh-external-to-node", Node)] {
                let rule = Self::from_ranges(ctx, id, &cluster.ssh_access, to, SSH);
                Self::add(ctx, tasks, id, rule)?;
            }
        }

        if !cluster.node_port_access.is_empty() {
            let id = "nodeport-external-to-node";
            let rule = Self::from_ranges(ctx, id, &cluster.node_port_access, Node, NODE_PORTS);
            Self::add(ctx, tasks, id, rule)?;
        }

        // With a load balancer the API rules come from the load balancer builder.
        if !ctx.uses_load_balancer() && !cluster.api.access.is_empty() {
            let id = "kubernetes-master-https";
            let rule = Self::from_ranges(ctx, id, &cluster.api.access, ControlPlane, HTTPS);
            Self::add(ctx, tasks, id, rule)?;
        }
        Ok(())
    }
}
