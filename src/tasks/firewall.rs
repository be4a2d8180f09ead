//! Firewall rule task.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};

use crate::cloud::types::{Firewall, FirewallAllowed};
use crate::cloud::url::{GoogleCloudUrl, last_component};
use crate::error::{Result, TaskError};

use super::{
    Changes, Context, DeclarativeWriter, Lifecycle, Network, Ref, Resource, TaskKey, TaskOutput,
    found,
};

/// An ingress firewall rule.
///
/// `allowed` entries are `protocol` or `protocol:port[-port]`, for example
/// `tcp:443` or `udp`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FirewallRule {
    /// Rule name.
    pub name: String,
    /// Network the rule applies to.
    pub network: Ref<Network>,
    /// Source CIDRs.
    pub source_ranges: BTreeSet<String>,
    /// Source tags.
    pub source_tags: BTreeSet<String>,
    /// Target tags.
    pub target_tags: BTreeSet<String>,
    /// Allowed protocol/port entries.
    pub allowed: BTreeSet<String>,
    /// Disabled rules match nothing.
    pub disabled: bool,
    /// Engine treatment.
    #[serde(skip)]
    pub lifecycle: Lifecycle,
}

impl FirewallRule {
    /// An enabled rule with no sources, targets or protocols.
    #[must_use]
    pub fn new(name: impl Into<String>, network: Ref<Network>) -> Self {
        Self {
            name: name.into(),
            network,
            source_ranges: BTreeSet::new(),
            source_tags: BTreeSet::new(),
            target_tags: BTreeSet::new(),
            allowed: BTreeSet::new(),
            disabled: false,
            lifecycle: Lifecycle::Sync,
        }
    }

    /// Wire form of `allowed`, grouping ports by protocol.
    #[must_use]
    pub fn wire_allowed(&self) -> Vec<FirewallAllowed> {
        let mut by_protocol: BTreeMap<&str, Vec<String>> = BTreeMap::new();
        for entry in &self.allowed {
            match entry.split_once(':') {
                Some((protocol, ports)) => by_protocol
                    .entry(protocol)
                    .or_default()
                    .push(ports.to_string()),
                None => {
                    by_protocol.entry(entry.as_str()).or_default();
                }
            }
        }
        by_protocol
            .into_iter()
            .map(|(protocol, ports)| FirewallAllowed {
                ip_protocol: protocol.to_string(),
                ports,
            })
            .collect()
    }

    fn to_wire(&self, network_link: String) -> Firewall {
        Firewall {
            name: self.name.clone(),
            network: network_link,
            source_ranges: self.source_ranges.iter().cloned().collect(),
            source_tags: self.source_tags.iter().cloned().collect(),
            target_tags: self.target_tags.iter().cloned().collect(),
            allowed: self.wire_allowed(),
            disabled: self.disabled,
            ..Firewall::default()
        }
    }
}

fn flatten_allowed(allowed: &[FirewallAllowed]) -> BTreeSet<String> {
    allowed
        .iter()
        .flat_map(|a| {
            if a.ports.is_empty() {
                vec![a.ip_protocol.clone()]
            } else {
                a.ports
                    .iter()
                    .map(|p| format!("{}:{p}", a.ip_protocol))
                    .collect()
            }
        })
        .collect()
}

#[async_trait]
impl Resource for FirewallRule {
    const KIND: &'static str = "FirewallRule";
    const DECLARATIVE_TYPE: &'static str = "google_compute_firewall";

    fn name(&self) -> &str {
        &self.name
    }

    fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    fn dependencies(&self) -> Vec<TaskKey> {
        vec![self.network.key()]
    }

    async fn find(&self, ctx: &Context<'_>) -> Result<Option<Self>> {
        let firewalls = ctx.cloud.compute().firewalls();
        let Some(rule) = found(firewalls.get(ctx.project(), &self.name).await)? else {
            return Ok(None);
        };
        Ok(Some(Self {
            name: rule.name,
            network: Ref::new(last_component(&rule.network)),
            source_ranges: rule.source_ranges.into_iter().collect(),
            source_tags: rule.source_tags.into_iter().collect(),
            target_tags: rule.target_tags.into_iter().collect(),
            allowed: flatten_allowed(&rule.allowed),
            disabled: rule.disabled,
            lifecycle: self.lifecycle,
        }))
    }

    fn check_changes(&self, actual: Option<&Self>, changes: &Changes) -> Result<()> {
        if actual.is_some() {
            return changes.ensure_unchanged(Self::KIND, &["network"]);
        }
        if !self.disabled && self.source_ranges.is_empty() && self.source_tags.is_empty() {
            return Err(TaskError::required(Self::KIND, &self.name, "source_ranges").into());
        }
        Ok(())
    }

    async fn render_cloud(
        &self,
        ctx: &Context<'_>,
        actual: Option<&Self>,
        _changes: &Changes,
    ) -> Result<TaskOutput> {
        let firewalls = ctx.cloud.compute().firewalls();
        let rule = self.to_wire(ctx.link(&self.network)?);
        let op = if actual.is_some() {
            firewalls.update(ctx.project(), &self.name, &rule).await?
        } else {
            firewalls.insert(ctx.project(), &rule).await?
        };
        ctx.cloud.wait(&op).await?;
        Ok(self.output(ctx))
    }

    fn output(&self, ctx: &Context<'_>) -> TaskOutput {
        TaskOutput::link(
            &self.name,
            GoogleCloudUrl::global(ctx.project(), "firewalls", &self.name).to_string(),
        )
    }

    fn render_declarative(&self, w: &mut DeclarativeWriter) -> Result<()> {
        let allow: Vec<_> = self
            .wire_allowed()
            .into_iter()
            .map(|a| json!({ "protocol": a.ip_protocol, "ports": a.ports }))
            .collect();
        w.add(
            Self::DECLARATIVE_TYPE,
            &self.name,
            json!({
                "name": self.name,
                "network": DeclarativeWriter::reference(&self.network, "name"),
                "source_ranges": self.source_ranges,
                "source_tags": self.source_tags,
                "target_tags": self.target_tags,
                "allow": allow,
                "disabled": self.disabled,
            }),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Action, Target, run_step};
    use crate::simulator::MockCloud;
    use crate::tasks::Outputs;

    fn rule() -> FirewallRule {
        let mut rule = FirewallRule::new("https-api-c1", Ref::new("c1"));
        rule.source_ranges.insert("0.0.0.0/0".into());
        rule.target_tags.insert("c1-k8s-io-role-control-plane".into());
        rule.allowed.insert("tcp:443".into());
        rule
    }

    fn outputs() -> Outputs {
        Outputs::from([(
            TaskKey::of::<Network>("c1"),
            TaskOutput::link("c1", "https://www.googleapis.com/compute/v1/projects/p/global/networks/c1"),
        )])
    }

    #[test]
    fn test_allowed_groups_ports_by_protocol() {
        let mut rule = rule();
        rule.allowed.insert("tcp:4194".into());
        rule.allowed.insert("udp".into());
        let wire = rule.wire_allowed();
        assert_eq!(wire.len(), 2);
        assert_eq!(wire[0].ip_protocol, "tcp");
        assert_eq!(wire[0].ports, ["4194", "443"]);
        assert!(wire[1].ports.is_empty());
        assert_eq!(flatten_allowed(&wire), rule.allowed);
    }

    #[tokio::test]
    async fn test_rule_updates_in_place() {
        let sim = MockCloud::new();
        let cloud = sim.cloud("p", "us-central1");
        let outputs = outputs();
        let ctx = Context::new(&cloud, &outputs);
        run_step(&rule(), &ctx, Target::Apply).await.expect("created");

        let mut widened = rule();
        widened.source_ranges.insert("10.0.0.0/8".into());
        let outcome = run_step(&widened, &ctx, Target::Apply).await.expect("updated");
        assert_eq!(outcome.action, Action::Updated);

        let live = cloud
            .compute()
            .firewalls()
            .get("p", "https-api-c1")
            .await
            .expect("rule");
        assert_eq!(live.source_ranges, ["0.0.0.0/0", "10.0.0.0/8"]);
    }
}
