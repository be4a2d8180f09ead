//! Cloud Router task, with an optional Cloud NAT.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeSet;

use crate::cloud::types;
use crate::cloud::url::{GoogleCloudUrl, last_component};
use crate::error::Result;

use super::{
    Changes, Context, DeclarativeWriter, Lifecycle, Network, Ref, Resource, Subnet, TaskKey,
    TaskOutput, found,
};

/// NAT settings of a router.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouterNat {
    /// NAT name.
    pub name: String,
    /// `AUTO_ONLY` or `MANUAL_ONLY`.
    pub nat_ip_allocate_option: String,
    /// `ALL_SUBNETWORKS_ALL_IP_RANGES` or `LIST_OF_SUBNETWORKS`.
    pub source_subnetwork_ip_ranges_to_nat: String,
    /// Subnets translated with `LIST_OF_SUBNETWORKS`.
    pub subnetworks: BTreeSet<Ref<Subnet>>,
}

impl RouterNat {
    /// NAT for the listed subnets with automatically allocated IPs.
    #[must_use]
    pub fn for_subnets(name: impl Into<String>, subnetworks: BTreeSet<Ref<Subnet>>) -> Self {
        let ranges = if subnetworks.is_empty() {
            "ALL_SUBNETWORKS_ALL_IP_RANGES"
        } else {
            "LIST_OF_SUBNETWORKS"
        };
        Self {
            name: name.into(),
            nat_ip_allocate_option: "AUTO_ONLY".to_string(),
            source_subnetwork_ip_ranges_to_nat: ranges.to_string(),
            subnetworks,
        }
    }
}

/// A regional router.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Router {
    /// Router name.
    pub name: String,
    /// Region.
    pub region: String,
    /// Network.
    pub network: Ref<Network>,
    /// NAT configuration.
    pub nat: Option<RouterNat>,
    /// Engine treatment.
    #[serde(skip)]
    pub lifecycle: Lifecycle,
}

impl Router {
    fn wire_nat(&self, ctx: &Context<'_>) -> Result<Vec<types::RouterNat>> {
        let Some(nat) = &self.nat else {
            return Ok(Vec::new());
        };
        let mut subnetworks = Vec::new();
        for subnet in &nat.subnetworks {
            subnetworks.push(types::RouterNatSubnetwork {
                name: ctx.link(subnet)?,
                source_ip_ranges_to_nat: vec!["ALL_IP_RANGES".to_string()],
            });
        }
        Ok(vec![types::RouterNat {
            name: nat.name.clone(),
            nat_ip_allocate_option: nat.nat_ip_allocate_option.clone(),
            source_subnetwork_ip_ranges_to_nat: nat.source_subnetwork_ip_ranges_to_nat.clone(),
            subnetworks,
        }])
    }
}

#[async_trait]
impl Resource for Router {
    const KIND: &'static str = "Router";
    const DECLARATIVE_TYPE: &'static str = "google_compute_router";

    fn name(&self) -> &str {
        &self.name
    }

    fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    fn dependencies(&self) -> Vec<TaskKey> {
        let mut deps = vec![self.network.key()];
        if let Some(nat) = &self.nat {
            deps.extend(nat.subnetworks.iter().map(Ref::key));
        }
        deps
    }

    async fn find(&self, ctx: &Context<'_>) -> Result<Option<Self>> {
        let routers = ctx.cloud.compute().routers();
        let Some(router) = found(routers.get(ctx.project(), &self.region, &self.name).await)?
        else {
            return Ok(None);
        };
        let nat = router.nats.into_iter().next().map(|nat| RouterNat {
            name: nat.name,
            nat_ip_allocate_option: nat.nat_ip_allocate_option,
            source_subnetwork_ip_ranges_to_nat: nat.source_subnetwork_ip_ranges_to_nat,
            subnetworks: nat
                .subnetworks
                .iter()
                .map(|s| Ref::new(last_component(&s.name)))
                .collect(),
        });
        Ok(Some(Self {
            name: router.name,
            region: last_component(&router.region).to_string(),
            network: Ref::new(last_component(&router.network)),
            nat,
            lifecycle: self.lifecycle,
        }))
    }

    fn check_changes(&self, actual: Option<&Self>, changes: &Changes) -> Result<()> {
        match actual {
            Some(_) => changes.ensure_unchanged(Self::KIND, &["region", "network"]),
            None => Ok(()),
        }
    }

    async fn render_cloud(
        &self,
        ctx: &Context<'_>,
        actual: Option<&Self>,
        changes: &Changes,
    ) -> Result<TaskOutput> {
        let routers = ctx.cloud.compute().routers();
        let router = types::Router {
            name: self.name.clone(),
            network: ctx.link(&self.network)?,
            nats: self.wire_nat(ctx)?,
            ..types::Router::default()
        };
        let op = if actual.is_some() {
            let mut changes = changes.clone();
            changes.take("nat");
            changes.ensure_empty(Self::KIND)?;
            routers.patch(ctx.project(), &self.region, &router).await?
        } else {
            routers.insert(ctx.project(), &self.region, &router).await?
        };
        ctx.cloud.wait(&op).await?;
        Ok(self.output(ctx))
    }

    fn output(&self, ctx: &Context<'_>) -> TaskOutput {
        TaskOutput::link(
            &self.name,
            GoogleCloudUrl::regional(ctx.project(), &self.region, "routers", &self.name)
                .to_string(),
        )
    }

    fn render_declarative(&self, w: &mut DeclarativeWriter) -> Result<()> {
        w.add(
            Self::DECLARATIVE_TYPE,
            &self.name,
            json!({
                "name": self.name,
                "region": self.region,
                "network": DeclarativeWriter::reference(&self.network, "name"),
            }),
        );
        if let Some(nat) = &self.nat {
            let subnetworks: Vec<_> = nat
                .subnetworks
                .iter()
                .map(|s| {
                    json!({
                        "name": DeclarativeWriter::reference(s, "self_link"),
                        "source_ip_ranges_to_nat": ["ALL_IP_RANGES"],
                    })
                })
                .collect();
            let mut block = json!({
                "name": nat.name,
                "region": self.region,
                "router": format!("${{{}.{}.name}}", Self::DECLARATIVE_TYPE, super::declarative_name(&self.name)),
                "nat_ip_allocate_option": nat.nat_ip_allocate_option,
                "source_subnetwork_ip_ranges_to_nat": nat.source_subnetwork_ip_ranges_to_nat,
            });
            if !subnetworks.is_empty() {
                block["subnetwork"] = json!(subnetworks);
            }
            w.add("google_compute_router_nat", &nat.name, block);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Action, Target, run_step};
    use crate::simulator::MockCloud;
    use crate::tasks::Outputs;

    fn outputs() -> Outputs {
        Outputs::from([
            (
                TaskKey::of::<Network>("c1"),
                TaskOutput::link("c1", "https://www.googleapis.com/compute/v1/projects/p/global/networks/c1"),
            ),
            (
                TaskKey::of::<Subnet>("us-central1-c1"),
                TaskOutput::link(
                    "us-central1-c1",
                    "https://www.googleapis.com/compute/v1/projects/p/regions/us-central1/subnetworks/us-central1-c1",
                ),
            ),
        ])
    }

    fn router(nat: Option<RouterNat>) -> Router {
        Router {
            name: "nat-c1".into(),
            region: "us-central1".into(),
            network: Ref::new("c1"),
            nat,
            lifecycle: Lifecycle::Sync,
        }
    }

    #[tokio::test]
    async fn test_nat_is_patched_onto_existing_router() {
        let sim = MockCloud::new();
        let cloud = sim.cloud("p", "us-central1");
        let outputs = outputs();
        let ctx = Context::new(&cloud, &outputs);
        run_step(&router(None), &ctx, Target::Apply).await.expect("created");

        let nat = RouterNat::for_subnets("nat-c1", BTreeSet::from([Ref::new("us-central1-c1")]));
        let with_nat = router(Some(nat));
        assert!(with_nat.dependencies().contains(&TaskKey::of::<Subnet>("us-central1-c1")));
        let outcome = run_step(&with_nat, &ctx, Target::Apply).await.expect("patched");
        assert_eq!(outcome.action, Action::Updated);

        let again = run_step(&with_nat, &ctx, Target::Apply).await.expect("stable");
        assert_eq!(again.action, Action::Unchanged);
    }

    #[test]
    fn test_nat_declarative_block() {
        let nat = RouterNat::for_subnets("nat-c1", BTreeSet::new());
        let mut w = DeclarativeWriter::new();
        router(Some(nat)).render_declarative(&mut w).expect("rendered");
        let block = w.block("google_compute_router_nat", "nat-c1").expect("nat block");
        assert_eq!(block["router"], "${google_compute_router.nat-c1.name}");
        assert_eq!(
            block["source_subnetwork_ip_ranges_to_nat"],
            "ALL_SUBNETWORKS_ALL_IP_RANGES"
        );
    }
}
