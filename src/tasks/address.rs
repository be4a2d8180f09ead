//! Reserved IP address task.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;

use crate::cloud::types;
use crate::cloud::url::{GoogleCloudUrl, Scope, last_component};
use crate::error::Result;

use super::{
    Changes, Context, DeclarativeWriter, Lifecycle, Ref, Resource, Subnet, TaskKey, TaskOutput,
    found,
};

/// A reserved address. An empty `region` means a global address.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Address {
    /// Address name.
    pub name: String,
    /// Region, empty for global.
    pub region: String,
    /// Literal IP to reserve; assigned by the cloud when unset.
    pub ip_address: Option<String>,
    /// `INTERNAL` or `EXTERNAL`.
    pub address_type: Option<String>,
    /// Purpose of an internal address.
    pub purpose: Option<String>,
    /// Subnet of an internal address.
    pub subnetwork: Option<Ref<Subnet>>,
    /// Engine treatment.
    #[serde(skip)]
    pub lifecycle: Lifecycle,
}

impl Address {
    /// An external regional address with a cloud-assigned IP.
    #[must_use]
    pub fn external(name: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            region: region.into(),
            ip_address: None,
            address_type: None,
            purpose: None,
            subnetwork: None,
            lifecycle: Lifecycle::Sync,
        }
    }

    fn link(&self, project: &str) -> String {
        GoogleCloudUrl::new(
            project,
            Scope::regional_or_global(&self.region),
            "addresses",
            &self.name,
        )
        .to_string()
    }
}

#[async_trait]
impl Resource for Address {
    const KIND: &'static str = "Address";
    const DECLARATIVE_TYPE: &'static str = "google_compute_address";

    fn name(&self) -> &str {
        &self.name
    }

    fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    fn dependencies(&self) -> Vec<TaskKey> {
        self.subnetwork.iter().map(Ref::key).collect()
    }

    async fn find(&self, ctx: &Context<'_>) -> Result<Option<Self>> {
        let addresses = ctx.cloud.compute().addresses();
        let Some(address) = found(addresses.get(ctx.project(), &self.region, &self.name).await)?
        else {
            return Ok(None);
        };
        Ok(Some(Self {
            name: address.name,
            region: last_component(&address.region).to_string(),
            ip_address: Some(address.address).filter(|a| !a.is_empty()),
            address_type: address.address_type,
            purpose: address.purpose,
            subnetwork: address.subnetwork.as_deref().map(|s| Ref::new(last_component(s))),
            lifecycle: self.lifecycle,
        }))
    }

    fn check_changes(&self, actual: Option<&Self>, changes: &Changes) -> Result<()> {
        match actual {
            Some(_) => changes.ensure_empty(Self::KIND),
            None => Ok(()),
        }
    }

    async fn render_cloud(
        &self,
        ctx: &Context<'_>,
        actual: Option<&Self>,
        changes: &Changes,
    ) -> Result<TaskOutput> {
        let addresses = ctx.cloud.compute().addresses();
        if actual.is_none() {
            let subnetwork = match &self.subnetwork {
                Some(subnet) => Some(ctx.link(subnet)?),
                None => None,
            };
            let address = types::Address {
                name: self.name.clone(),
                address: self.ip_address.clone().unwrap_or_default(),
                address_type: self.address_type.clone(),
                purpose: self.purpose.clone(),
                subnetwork,
                ..types::Address::default()
            };
            let op = addresses.insert(ctx.project(), &self.region, &address).await?;
            ctx.cloud.wait(&op).await?;
        } else {
            changes.ensure_empty(Self::KIND)?;
        }
        let live = addresses.get(ctx.project(), &self.region, &self.name).await?;
        Ok(TaskOutput {
            ip_address: Some(live.address),
            ..self.output(ctx)
        })
    }

    fn output(&self, ctx: &Context<'_>) -> TaskOutput {
        TaskOutput {
            ip_address: self.ip_address.clone(),
            ..TaskOutput::link(&self.name, self.link(ctx.project()))
        }
    }

    fn render_declarative(&self, w: &mut DeclarativeWriter) -> Result<()> {
        let mut block = json!({ "name": self.name });
        if !self.region.is_empty() {
            block["region"] = json!(self.region);
        }
        if let Some(ip) = &self.ip_address {
            block["address"] = json!(ip);
        }
        if let Some(address_type) = &self.address_type {
            block["address_type"] = json!(address_type);
        }
        if let Some(purpose) = &self.purpose {
            block["purpose"] = json!(purpose);
        }
        if let Some(subnet) = &self.subnetwork {
            block["subnetwork"] = json!(DeclarativeWriter::reference(subnet, "self_link"));
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
    async fn test_address_output_carries_assigned_ip() {
        let sim = MockCloud::new();
        let cloud = sim.cloud("p", "us-central1");
        let outputs = Outputs::new();
        let ctx = Context::new(&cloud, &outputs);
        let address = Address::external("api-c1", "us-central1");

        let created = run_step(&address, &ctx, Target::Apply).await.expect("created");
        let ip = created.output.ip_address.clone().expect("ip assigned");
        assert!(!ip.is_empty());

        let again = run_step(&address, &ctx, Target::Apply).await.expect("found");
        assert_eq!(again.action, Action::Unchanged);
        assert_eq!(again.output.ip_address, Some(ip));
    }

    #[tokio::test]
    async fn test_address_ip_cannot_change() {
        let sim = MockCloud::new();
        let cloud = sim.cloud("p", "us-central1");
        let outputs = Outputs::new();
        let ctx = Context::new(&cloud, &outputs);
        run_step(&Address::external("api-c1", "us-central1"), &ctx, Target::Apply)
            .await
            .expect("created");

        let pinned = Address {
            ip_address: Some("1.2.3.4".into()),
            ..Address::external("api-c1", "us-central1")
        };
        let err = run_step(&pinned, &ctx, Target::Apply)
            .await
            .expect_err("immutable");
        assert!(err.to_string().contains("cannot apply changes to Address: ip_address"));
    }
}
