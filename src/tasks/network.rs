//! VPC network task.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;

use crate::cloud::types;
use crate::cloud::url::GoogleCloudUrl;
use crate::error::{Result, TaskError};

use super::{Changes, Context, DeclarativeWriter, Lifecycle, Resource, TaskOutput, found};

/// Subnet mode of a network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NetworkMode {
    /// One subnet per region, created by the cloud.
    Auto,
    /// Subnets are declared explicitly.
    Custom,
    /// A single range without subnets.
    Legacy,
}

/// A VPC network.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Network {
    /// Network name.
    pub name: String,
    /// Subnet mode; unset for shared networks.
    pub mode: Option<NetworkMode>,
    /// Range of a legacy network.
    pub cidr: Option<String>,
    /// Engine treatment.
    #[serde(skip)]
    pub lifecycle: Lifecycle,
    /// Owned by someone else.
    #[serde(skip)]
    pub shared: bool,
}

impl Network {
    /// A custom-mode network owned by the cluster.
    #[must_use]
    pub fn custom(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mode: Some(NetworkMode::Custom),
            cidr: None,
            lifecycle: Lifecycle::Sync,
            shared: false,
        }
    }

    /// A pre-existing network the cluster only uses.
    #[must_use]
    pub fn shared(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mode: None,
            cidr: None,
            lifecycle: Lifecycle::ExistsAndWarnIfChanges,
            shared: true,
        }
    }
}

#[async_trait]
impl Resource for Network {
    const KIND: &'static str = "Network";
    const DECLARATIVE_TYPE: &'static str = "google_compute_network";

    fn name(&self) -> &str {
        &self.name
    }

    fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    fn is_shared(&self) -> bool {
        self.shared
    }

    async fn find(&self, ctx: &Context<'_>) -> Result<Option<Self>> {
        let networks = ctx.cloud.compute().networks();
        let Some(network) = found(networks.get(ctx.project(), &self.name).await)? else {
            return Ok(None);
        };
        let mode = if network.ipv4_range.is_some() {
            NetworkMode::Legacy
        } else if network.auto_create_subnetworks {
            NetworkMode::Auto
        } else {
            NetworkMode::Custom
        };
        Ok(Some(Self {
            name: network.name,
            mode: Some(mode),
            cidr: network.ipv4_range,
            lifecycle: self.lifecycle,
            shared: self.shared,
        }))
    }

    fn check_changes(&self, actual: Option<&Self>, changes: &Changes) -> Result<()> {
        if actual.is_some() {
            return changes.ensure_unchanged(Self::KIND, &["mode", "cidr"]);
        }
        let mode = self
            .mode
            .ok_or_else(|| TaskError::required(Self::KIND, &self.name, "mode"))?;
        match (mode, &self.cidr) {
            (NetworkMode::Legacy, None) => {
                Err(TaskError::required(Self::KIND, &self.name, "cidr").into())
            }
            (NetworkMode::Auto | NetworkMode::Custom, Some(_)) => Err(TaskError::invalid(
                Self::KIND,
                &self.name,
                "cidr",
                "only legacy networks carry a range",
            )
            .into()),
            _ => Ok(()),
        }
    }

    async fn render_cloud(
        &self,
        ctx: &Context<'_>,
        actual: Option<&Self>,
        changes: &Changes,
    ) -> Result<TaskOutput> {
        if actual.is_some() {
            changes.ensure_empty(Self::KIND)?;
            return Ok(self.output(ctx));
        }
        let network = types::Network {
            name: self.name.clone(),
            auto_create_subnetworks: self.mode == Some(NetworkMode::Auto),
            ipv4_range: self.cidr.clone(),
            ..types::Network::default()
        };
        let op = ctx
            .cloud
            .compute()
            .networks()
            .insert(ctx.project(), &network)
            .await?;
        ctx.cloud.wait(&op).await?;
        Ok(self.output(ctx))
    }

    fn output(&self, ctx: &Context<'_>) -> TaskOutput {
        TaskOutput::link(
            &self.name,
            GoogleCloudUrl::global(ctx.project(), "networks", &self.name).to_string(),
        )
    }

    fn render_declarative(&self, w: &mut DeclarativeWriter) -> Result<()> {
        if self.shared {
            w.add_data(Self::DECLARATIVE_TYPE, &self.name, json!({ "name": self.name }));
            return Ok(());
        }
        let mut block = json!({
            "name": self.name,
            "auto_create_subnetworks": self.mode == Some(NetworkMode::Auto),
        });
        if let Some(cidr) = &self.cidr {
            block["ipv4_range"] = json!(cidr);
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

    #[tokio::test]
    async fn test_network_created_then_unchanged() {
        let sim = MockCloud::new();
        let cloud = sim.cloud("p", "us-central1");
        let outputs = Outputs::new();
        let ctx = Context::new(&cloud, &outputs);
        let network = Network::custom("c1");

        let first = run_step(&network, &ctx, Target::Apply).await.expect("created");
        assert_eq!(first.action, Action::Created);
        assert_eq!(
            first.output.self_link,
            "https://www.googleapis.com/compute/v1/projects/p/global/networks/c1"
        );

        let second = run_step(&network, &ctx, Target::Apply).await.expect("converged");
        assert_eq!(second.action, Action::Unchanged);
    }

    #[tokio::test]
    async fn test_changing_mode_is_rejected() {
        let sim = MockCloud::new();
        let cloud = sim.cloud("p", "us-central1");
        let outputs = Outputs::new();
        let ctx = Context::new(&cloud, &outputs);
        run_step(&Network::custom("c1"), &ctx, Target::Apply)
            .await
            .expect("created");

        let legacy = Network {
            mode: Some(NetworkMode::Legacy),
            cidr: Some("10.0.0.0/16".into()),
            ..Network::custom("c1")
        };
        let err = run_step(&legacy, &ctx, Target::Apply)
            .await
            .expect_err("immutable");
        assert!(err.to_string().contains("cannot apply changes to Network: mode"));
    }

    #[tokio::test]
    async fn test_missing_shared_network_fails() {
        let sim = MockCloud::new();
        let cloud = sim.cloud("p", "us-central1");
        let outputs = Outputs::new();
        let ctx = Context::new(&cloud, &outputs);
        let err = run_step(&Network::shared("corp"), &ctx, Target::Apply)
            .await
            .expect_err("must exist");
        assert!(err.to_string().contains("expected to exist"));
    }

    #[test]
    fn test_shared_network_renders_data_source() {
        let mut w = DeclarativeWriter::new();
        Network::shared("corp").render_declarative(&mut w).expect("rendered");
        assert_eq!(w.count("google_compute_network"), 0);
        assert_eq!(w.to_json()["data"]["google_compute_network"]["corp"]["name"], "corp");
    }
}
