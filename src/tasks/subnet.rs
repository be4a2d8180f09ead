//! Regional subnetwork task.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use tracing::debug;

use crate::cloud::types::{Subnetwork, SubnetworkSecondaryRange};
use crate::cloud::url::{GoogleCloudUrl, last_component};
use crate::error::{Result, TaskError};

use super::{
    Changes, Context, DeclarativeWriter, Lifecycle, Network, Ref, Resource, TaskKey, TaskOutput,
    found,
};

/// A subnetwork of a cluster network.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Subnet {
    /// Subnet name.
    pub name: String,
    /// Parent network.
    pub network: Ref<Network>,
    /// Region.
    pub region: String,
    /// Primary range; unset for shared subnets.
    pub cidr: Option<String>,
    /// Secondary ranges by name; unset for shared subnets.
    pub secondary_ranges: Option<BTreeMap<String, String>>,
    /// Engine treatment.
    #[serde(skip)]
    pub lifecycle: Lifecycle,
    /// Owned by someone else.
    #[serde(skip)]
    pub shared: bool,
}

impl Subnet {
    /// A subnet owned by the cluster.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        network: Ref<Network>,
        region: impl Into<String>,
        cidr: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            network,
            region: region.into(),
            cidr: Some(cidr.into()),
            secondary_ranges: Some(BTreeMap::new()),
            lifecycle: Lifecycle::Sync,
            shared: false,
        }
    }
}

#[async_trait]
impl Resource for Subnet {
    const KIND: &'static str = "Subnet";
    const DECLARATIVE_TYPE: &'static str = "google_compute_subnetwork";

    fn name(&self) -> &str {
        &self.name
    }

    fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    fn is_shared(&self) -> bool {
        self.shared
    }

    fn dependencies(&self) -> Vec<TaskKey> {
        vec![self.network.key()]
    }

    async fn find(&self, ctx: &Context<'_>) -> Result<Option<Self>> {
        let subnets = ctx.cloud.compute().subnetworks();
        let Some(subnet) = found(subnets.get(ctx.project(), &self.region, &self.name).await)?
        else {
            return Ok(None);
        };
        Ok(Some(Self {
            name: subnet.name,
            network: Ref::new(last_component(&subnet.network)),
            region: last_component(&subnet.region).to_string(),
            cidr: Some(subnet.ip_cidr_range),
            secondary_ranges: Some(
                subnet
                    .secondary_ip_ranges
                    .into_iter()
                    .map(|r| (r.range_name, r.ip_cidr_range))
                    .collect(),
            ),
            lifecycle: self.lifecycle,
            shared: self.shared,
        }))
    }

    fn check_changes(&self, actual: Option<&Self>, changes: &Changes) -> Result<()> {
        if actual.is_some() {
            return changes.ensure_unchanged(Self::KIND, &["network", "region", "cidr"]);
        }
        if self.cidr.is_none() {
            return Err(TaskError::required(Self::KIND, &self.name, "cidr").into());
        }
        if self.region.is_empty() {
            return Err(TaskError::required(Self::KIND, &self.name, "region").into());
        }
        Ok(())
    }

    async fn render_cloud(
        &self,
        ctx: &Context<'_>,
        actual: Option<&Self>,
        changes: &Changes,
    ) -> Result<TaskOutput> {
        let subnets = ctx.cloud.compute().subnetworks();
        let secondary: Vec<SubnetworkSecondaryRange> = self
            .secondary_ranges
            .iter()
            .flatten()
            .map(|(name, cidr)| SubnetworkSecondaryRange {
                range_name: name.clone(),
                ip_cidr_range: cidr.clone(),
            })
            .collect();

        if actual.is_none() {
            let subnet = Subnetwork {
                name: self.name.clone(),
                network: ctx.link(&self.network)?,
                region: self.region.clone(),
                ip_cidr_range: self.cidr.clone().unwrap_or_default(),
                secondary_ip_ranges: secondary,
                ..Subnetwork::default()
            };
            let op = subnets.insert(ctx.project(), &self.region, &subnet).await?;
            ctx.cloud.wait(&op).await?;
            return Ok(self.output(ctx));
        }

        let mut changes = changes.clone();
        if changes.take("secondary_ranges") {
            let current = subnets.get(ctx.project(), &self.region, &self.name).await?;
            debug!(
                "Patching secondary ranges of subnet {} ({} ranges)",
                self.name,
                secondary.len()
            );
            let patch = Subnetwork {
                secondary_ip_ranges: secondary,
                ..current
            };
            let op = subnets.patch(ctx.project(), &self.region, &patch).await?;
            ctx.cloud.wait(&op).await?;
        }
        changes.ensure_empty(Self::KIND)?;
        Ok(self.output(ctx))
    }

    fn output(&self, ctx: &Context<'_>) -> TaskOutput {
        TaskOutput::link(
            &self.name,
            GoogleCloudUrl::regional(ctx.project(), &self.region, "subnetworks", &self.name)
                .to_string(),
        )
    }

    fn render_declarative(&self, w: &mut DeclarativeWriter) -> Result<()> {
        if self.shared {
            w.add_data(
                Self::DECLARATIVE_TYPE,
                &self.name,
                json!({ "name": self.name, "region": self.region }),
            );
            return Ok(());
        }
        let secondary: Vec<_> = self
            .secondary_ranges
            .iter()
            .flatten()
            .map(|(name, cidr)| json!({ "range_name": name, "ip_cidr_range": cidr }))
            .collect();
        let mut block = json!({
            "name": self.name,
            "network": DeclarativeWriter::reference(&self.network, "name"),
            "region": self.region,
            "ip_cidr_range": self.cidr,
        });
        if !secondary.is_empty() {
            block["secondary_ip_range"] = json!(secondary);
        }
        w.add(Self::DECLARATIVE_TYPE, &self.name, block);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Action, Target, run_step};
    use crate::simulator::MockCloud;
    use crate::tasks::Outputs;

    fn subnet() -> Subnet {
        Subnet::new("nodes", Ref::new("c1"), "us-central1", "10.0.16.0/20")
    }

    #[tokio::test]
    async fn test_secondary_ranges_are_patched_in_place() {
        let sim = MockCloud::new();
        let cloud = sim.cloud("p", "us-central1");
        let mut outputs = Outputs::new();
        let network = Network::custom("c1");
        {
            let ctx = Context::new(&cloud, &outputs);
            run_step(&network, &ctx, Target::Apply).await.expect("network");
            outputs.insert(TaskKey::of::<Network>("c1"), network.output(&ctx));
        }
        let ctx = Context::new(&cloud, &outputs);
        run_step(&subnet(), &ctx, Target::Apply).await.expect("subnet");

        let mut with_pods = subnet();
        with_pods.secondary_ranges = Some(BTreeMap::from([(
            "pods".to_string(),
            "10.4.0.0/14".to_string(),
        )]));
        let outcome = run_step(&with_pods, &ctx, Target::Apply).await.expect("patched");
        assert_eq!(outcome.action, Action::Updated);
        assert_eq!(outcome.changes, ["secondary_ranges"]);

        let live = cloud
            .compute()
            .subnetworks()
            .get("p", "us-central1", "nodes")
            .await
            .expect("subnet");
        assert_eq!(live.secondary_ip_ranges[0].range_name, "pods");
    }

    #[tokio::test]
    async fn test_cidr_is_immutable() {
        let sim = MockCloud::new();
        let cloud = sim.cloud("p", "us-central1");
        let mut outputs = Outputs::new();
        outputs.insert(
            TaskKey::of::<Network>("c1"),
            TaskOutput::link("c1", "https://www.googleapis.com/compute/v1/projects/p/global/networks/c1"),
        );
        let ctx = Context::new(&cloud, &outputs);
        run_step(&subnet(), &ctx, Target::Apply).await.expect("subnet");

        let mut moved = subnet();
        moved.cidr = Some("10.1.0.0/20".into());
        let err = run_step(&moved, &ctx, Target::Apply).await.expect_err("immutable");
        assert!(err.to_string().contains("cannot apply changes to Subnet: cidr"));
    }
}
