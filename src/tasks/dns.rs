//! Cloud DNS managed zone task.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use tracing::info;

use crate::cloud::dns::fqdn;
use crate::cloud::types::{
    self, ManagedZonePrivateVisibilityConfig, ManagedZonePrivateVisibilityConfigNetwork,
};
use crate::cloud::url::last_component;
use crate::error::{Result, TaskError};

use super::{
    Changes, Context, DeclarativeWriter, Lifecycle, Network, Ref, Resource, TaskKey, TaskOutput,
    found,
};

/// Visibility value of zones only resolvable from attached networks.
pub const PRIVATE: &str = "private";

/// A managed DNS zone. Only private zones are created; public zones are
/// expected to exist already.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ManagedZone {
    /// Zone resource name.
    pub name: String,
    /// DNS name, normalized with a trailing dot.
    pub dns_name: String,
    /// Description.
    pub description: Option<String>,
    /// `public` or `private`.
    pub visibility: String,
    /// Labels.
    pub labels: BTreeMap<String, String>,
    /// Network a private zone is visible from.
    pub network: Option<Ref<Network>>,
    /// Engine treatment.
    #[serde(skip)]
    pub lifecycle: Lifecycle,
}

impl ManagedZone {
    /// A private zone attached to `network`.
    #[must_use]
    pub fn private(name: impl Into<String>, dns_name: &str, network: Ref<Network>) -> Self {
        Self {
            name: name.into(),
            dns_name: fqdn(dns_name),
            description: None,
            visibility: PRIVATE.to_string(),
            labels: BTreeMap::new(),
            network: Some(network),
            lifecycle: Lifecycle::Sync,
        }
    }

    fn is_private(&self) -> bool {
        self.visibility == PRIVATE
    }
}

#[async_trait]
impl Resource for ManagedZone {
    const KIND: &'static str = "ManagedZone";
    const DECLARATIVE_TYPE: &'static str = "google_dns_managed_zone";

    fn name(&self) -> &str {
        &self.name
    }

    fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    fn dependencies(&self) -> Vec<TaskKey> {
        self.network.iter().map(Ref::key).collect()
    }

    async fn find(&self, ctx: &Context<'_>) -> Result<Option<Self>> {
        let Some(zone) = found(ctx.cloud.dns().get(ctx.project(), &self.name).await)? else {
            return Ok(None);
        };
        let network = zone
            .private_visibility_config
            .as_ref()
            .and_then(|config| config.networks.first())
            .map(|n| match &self.network {
                Some(desired) if ctx.is_link_of(desired, &n.network_url) => desired.clone(),
                _ => Ref::new(last_component(&n.network_url)),
            });
        Ok(Some(Self {
            name: zone.name,
            dns_name: zone.dns_name,
            description: Some(zone.description).filter(|d| !d.is_empty()),
            visibility: zone.visibility,
            labels: zone.labels,
            network,
            lifecycle: self.lifecycle,
        }))
    }

    fn check_changes(&self, actual: Option<&Self>, changes: &Changes) -> Result<()> {
        if actual.is_some() {
            return changes.ensure_empty(Self::KIND);
        }
        if !self.is_private() {
            return Err(TaskError::invalid(
                Self::KIND,
                &self.name,
                "visibility",
                "only private zones are created; public zones must already exist",
            )
            .into());
        }
        if self.network.is_none() {
            return Err(TaskError::required(Self::KIND, &self.name, "network").into());
        }
        Ok(())
    }

    async fn render_cloud(
        &self,
        ctx: &Context<'_>,
        _actual: Option<&Self>,
        _changes: &Changes,
    ) -> Result<TaskOutput> {
        let networks = self
            .network
            .iter()
            .map(|n| {
                Ok(ManagedZonePrivateVisibilityConfigNetwork {
                    network_url: ctx.link(n)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let zone = types::ManagedZone {
            name: self.name.clone(),
            dns_name: fqdn(&self.dns_name),
            description: self.description.clone().unwrap_or_default(),
            visibility: self.visibility.clone(),
            labels: self.labels.clone(),
            private_visibility_config: Some(ManagedZonePrivateVisibilityConfig { networks }),
            id: None,
        };
        let created = ctx.cloud.dns().create(ctx.project(), &zone).await?;
        info!("Created private zone {} for {}", created.name, created.dns_name);
        Ok(self.output(ctx))
    }

    fn output(&self, ctx: &Context<'_>) -> TaskOutput {
        TaskOutput::link(
            &self.name,
            format!("projects/{}/managedZones/{}", ctx.project(), self.name),
        )
    }

    fn render_declarative(&self, w: &mut DeclarativeWriter) -> Result<()> {
        let mut block = json!({
            "name": self.name,
            "dns_name": fqdn(&self.dns_name),
            "visibility": self.visibility,
        });
        if let Some(description) = &self.description {
            block["description"] = json!(description);
        }
        if !self.labels.is_empty() {
            block["labels"] = json!(self.labels);
        }
        if let Some(network) = &self.network {
            block["private_visibility_config"] = json!({
                "networks": [{ "network_url": DeclarativeWriter::reference(network, "self_link") }],
            });
        }
        w.add(Self::DECLARATIVE_TYPE, &self.name, block);
        Ok(())
    }
}
