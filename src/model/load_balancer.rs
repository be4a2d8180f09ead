//! External TCP load balancer in front of the Kubernetes API.

use std::collections::BTreeMap;

use crate::cloud::naming::LABEL_CLUSTER_NAME;
use crate::config::{InstanceGroupRole, LoadBalancerType};
use crate::engine::TaskSet;
use crate::error::{ModelError, Result};
use crate::tasks::{
    Address, FirewallRule, ForwardingRule, HttpHealthCheck, Lifecycle, PoolHealthCheck, Ref,
    TargetPool,
};

use super::firewall::split_by_family;
use super::{API_LB_ID, ModelBuilder, ModelContext};

/// Port the API server listens on.
pub const API_PORT: u16 = 443;

/// Port of the API server health endpoint.
pub const API_HEALTH_CHECK_PORT: i64 = 3990;

/// Emits the API load balancer and the firewall rules that open it.
///
/// Only public load balancers are supported; an internal one is rejected.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApiLoadBalancerBuilder;

impl ApiLoadBalancerBuilder {
    fn create_public(ctx: &ModelContext<'_>, tasks: &mut TaskSet) -> Result<()> {
        let name = ctx.name_for(API_LB_ID);
        let region = ctx.cluster.region.clone();

        let health_check = HttpHealthCheck {
            name: name.clone(),
            port: API_HEALTH_CHECK_PORT,
            request_path: "/healthz".to_string(),
            lifecycle: Lifecycle::Sync,
        };
        let pool = TargetPool {
            name: name.clone(),
            region: region.clone(),
            lifecycle: Lifecycle::Sync,
        };
        let pool_health_check = PoolHealthCheck {
            name: name.clone(),
            region: region.clone(),
            pool: Ref::to(&pool),
            health_check: Ref::to(&health_check),
            lifecycle: Lifecycle::Sync,
        };
        let address = Address::external(name.clone(), region.clone());

        let mut rule = ForwardingRule::to_pool(
            name,
            region,
            Ref::to(&address),
            format!("{API_PORT}-{API_PORT}"),
            Ref::to(&pool),
        );
        rule.labels = BTreeMap::from([
            (LABEL_CLUSTER_NAME.to_string(), ctx.safe_cluster_name()),
            ("name".to_string(), API_LB_ID.to_string()),
        ]);

        tasks.add_alternate_name(Ref::to(&address));
        tasks.add(health_check)?;
        tasks.add(pool)?;
        tasks.add(pool_health_check)?;
        tasks.add(address)?;
        tasks.add(rule)?;
        Ok(())
    }

    fn add_firewall_rules(ctx: &ModelContext<'_>, tasks: &mut TaskSet) -> Result<()> {
        let master = ctx.tag_for(InstanceGroupRole::ControlPlane);
        let allowed = format!("tcp:{API_PORT}");

        let mut https = FirewallRule::new(ctx.name_for("https-api"), ctx.network());
        https.source_ranges = if ctx.cluster.api.access.is_empty() {
            ["0.0.0.0/0".to_string()].into()
        } else {
            ctx.cluster.api.access.iter().cloned().collect()
        };
        https.target_tags.insert(master.clone());
        https.allowed.insert(allowed.clone());
        for rule in split_by_family(https, ctx.name_for("https-api-ipv6")) {
            tasks.add(rule)?;
        }

        // IP alias ranges are always IPv4, so this rule is not split.
        if ctx.ip_alias()
            && let Some(pod_cidr) = &ctx.cluster.networking.pod_cidr
        {
            let mut pods = FirewallRule::new(ctx.name_for("pod-cidrs-to-https-api"), ctx.network());
            pods.source_ranges.insert(pod_cidr.clone());
            pods.target_tags.insert(master);
            pods.allowed.insert(allowed);
            tasks.add(pods)?;
        }
        Ok(())
    }
}

impl ModelBuilder for ApiLoadBalancerBuilder {
    fn build(&self, ctx: &ModelContext<'_>, tasks: &mut TaskSet) -> Result<()> {
        let Some(lb) = &ctx.cluster.api.load_balancer else {
            return Ok(());
        };
        match lb.lb_type {
            LoadBalancerType::Public => Self::create_public(ctx, tasks)?,
            LoadBalancerType::Internal => {
                return Err(ModelError::UnsupportedLoadBalancer {
                    lb_type: lb.lb_type.to_string(),
                }
                .into());
            }
        }
        Self::add_firewall_rules(ctx, tasks)
    }
}
