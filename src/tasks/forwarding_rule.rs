//! Forwarding rule task.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};

use crate::cloud::types;
use crate::cloud::url::{GoogleCloudUrl, Scope, last_component};
use crate::error::{Result, TaskError};

use super::{
    Address, BackendService, Changes, Context, DeclarativeWriter, Lifecycle, Network, Ref,
    Resource, Subnet, TaskKey, TaskOutput, TargetPool, found,
};

/// Where a forwarding rule's IP comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum IpAddressSpec {
    /// The IP reserved by an address task.
    Address(Ref<Address>),
    /// A literal IP.
    Literal(String),
}

/// A forwarding rule to a target pool or a backend service. An empty
/// `region` means a global rule.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForwardingRule {
    /// Rule name.
    pub name: String,
    /// Region, empty for global.
    pub region: String,
    /// Virtual IP.
    pub ip_address: Option<IpAddressSpec>,
    /// Protocol, e.g. `TCP`.
    pub ip_protocol: String,
    /// Port range such as `443-443`.
    pub port_range: Option<String>,
    /// Explicit ports.
    pub ports: BTreeSet<String>,
    /// Target pool.
    pub target: Option<Ref<TargetPool>>,
    /// Backend service.
    pub backend_service: Option<Ref<BackendService>>,
    /// `EXTERNAL` or `INTERNAL`.
    pub load_balancing_scheme: String,
    /// Network of an internal rule.
    pub network: Option<Ref<Network>>,
    /// Subnet of an internal rule.
    pub subnetwork: Option<Ref<Subnet>>,
    /// Labels.
    pub labels: BTreeMap<String, String>,
    /// Engine treatment.
    #[serde(skip)]
    pub lifecycle: Lifecycle,
}

impl ForwardingRule {
    /// An external TCP rule to a target pool.
    #[must_use]
    pub fn to_pool(
        name: impl Into<String>,
        region: impl Into<String>,
        ip_address: Ref<Address>,
        port_range: impl Into<String>,
        target: Ref<TargetPool>,
    ) -> Self {
        Self {
            name: name.into(),
            region: region.into(),
            ip_address: Some(IpAddressSpec::Address(ip_address)),
            ip_protocol: "TCP".to_string(),
            port_range: Some(port_range.into()),
            ports: BTreeSet::new(),
            target: Some(target),
            backend_service: None,
            load_balancing_scheme: "EXTERNAL".to_string(),
            network: None,
            subnetwork: None,
            labels: BTreeMap::new(),
            lifecycle: Lifecycle::Sync,
        }
    }

    fn resolve_ip(&self, ctx: &Context<'_>) -> Result<String> {
        match &self.ip_address {
            Some(IpAddressSpec::Literal(ip)) => Ok(ip.clone()),
            Some(IpAddressSpec::Address(address)) => {
                ctx.output(address)?.ip_address.clone().ok_or_else(|| {
                    TaskError::UnresolvedReference {
                        target: address.key().to_string(),
                    }
                    .into()
                })
            }
            None => Ok(String::new()),
        }
    }

    fn link(&self, project: &str) -> String {
        GoogleCloudUrl::new(
            project,
            Scope::regional_or_global(&self.region),
            "forwardingRules",
            &self.name,
        )
        .to_string()
    }
}

#[async_trait]
impl Resource for ForwardingRule {
    const KIND: &'static str = "ForwardingRule";
    const DECLARATIVE_TYPE: &'static str = "google_compute_forwarding_rule";

    fn name(&self) -> &str {
        &self.name
    }

    fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    fn dependencies(&self) -> Vec<TaskKey> {
        let mut deps = Vec::new();
        if let Some(IpAddressSpec::Address(address)) = &self.ip_address {
            deps.push(address.key());
        }
        deps.extend(self.target.iter().map(Ref::key));
        deps.extend(self.backend_service.iter().map(Ref::key));
        deps.extend(self.network.iter().map(Ref::key));
        deps.extend(self.subnetwork.iter().map(Ref::key));
        deps
    }

    async fn find(&self, ctx: &Context<'_>) -> Result<Option<Self>> {
        let rules = ctx.cloud.compute().forwarding_rules();
        let Some(rule) = found(rules.get(ctx.project(), &self.region, &self.name).await)? else {
            return Ok(None);
        };
        let ip_address = match &self.ip_address {
            Some(IpAddressSpec::Address(address))
                if ctx
                    .output(address)
                    .is_ok_and(|o| o.ip_address.as_deref() == Some(rule.ip_address.as_str())) =>
            {
                self.ip_address.clone()
            }
            _ => Some(IpAddressSpec::Literal(rule.ip_address)),
        };
        let non_empty = |s: String| Some(s).filter(|s| !s.is_empty());
        Ok(Some(Self {
            name: rule.name,
            region: last_component(&rule.region).to_string(),
            ip_address,
            ip_protocol: rule.ip_protocol,
            port_range: non_empty(rule.port_range),
            ports: rule.ports.into_iter().collect(),
            target: non_empty(rule.target).map(|l| Ref::new(last_component(&l))),
            backend_service: non_empty(rule.backend_service).map(|l| Ref::new(last_component(&l))),
            load_balancing_scheme: rule.load_balancing_scheme,
            network: non_empty(rule.network).map(|l| Ref::new(last_component(&l))),
            subnetwork: non_empty(rule.subnetwork).map(|l| Ref::new(last_component(&l))),
            labels: rule.labels,
            lifecycle: self.lifecycle,
        }))
    }

    fn check_changes(&self, actual: Option<&Self>, changes: &Changes) -> Result<()> {
        if actual.is_some() {
            return changes.ensure_empty(Self::KIND);
        }
        match (&self.target, &self.backend_service) {
            (Some(_), None) | (None, Some(_)) => Ok(()),
            _ => Err(TaskError::invalid(
                Self::KIND,
                &self.name,
                "target",
                "exactly one of target and backend_service must be set",
            )
            .into()),
        }
    }

    async fn render_cloud(
        &self,
        ctx: &Context<'_>,
        _actual: Option<&Self>,
        _changes: &Changes,
    ) -> Result<TaskOutput> {
        let optional_link = |r: Option<Result<String>>| r.transpose().map(Option::unwrap_or_default);
        let rule = types::ForwardingRule {
            name: self.name.clone(),
            ip_address: self.resolve_ip(ctx)?,
            ip_protocol: self.ip_protocol.clone(),
            port_range: self.port_range.clone().unwrap_or_default(),
            ports: self.ports.iter().cloned().collect(),
            target: optional_link(self.target.as_ref().map(|t| ctx.link(t)))?,
            backend_service: optional_link(self.backend_service.as_ref().map(|b| ctx.link(b)))?,
            load_balancing_scheme: self.load_balancing_scheme.clone(),
            network: optional_link(self.network.as_ref().map(|n| ctx.link(n)))?,
            subnetwork: optional_link(self.subnetwork.as_ref().map(|s| ctx.link(s)))?,
            labels: self.labels.clone(),
            ..types::ForwardingRule::default()
        };
        let op = ctx
            .cloud
            .compute()
            .forwarding_rules()
            .insert(ctx.project(), &self.region, &rule)
            .await?;
        ctx.cloud.wait(&op).await?;
        Ok(self.output(ctx))
    }

    fn output(&self, ctx: &Context<'_>) -> TaskOutput {
        TaskOutput::link(&self.name, self.link(ctx.project()))
    }

    fn render_declarative(&self, w: &mut DeclarativeWriter) -> Result<()> {
        let mut block = json!({
            "name": self.name,
            "ip_protocol": self.ip_protocol,
            "load_balancing_scheme": self.load_balancing_scheme,
        });
        if !self.region.is_empty() {
            block["region"] = json!(self.region);
        }
        match &self.ip_address {
            Some(IpAddressSpec::Address(address)) => {
                block["ip_address"] = json!(DeclarativeWriter::reference(address, "address"));
            }
            Some(IpAddressSpec::Literal(ip)) => block["ip_address"] = json!(ip),
            None => {}
        }
        if let Some(range) = &self.port_range {
            block["port_range"] = json!(range);
        }
        if !self.ports.is_empty() {
            block["ports"] = json!(self.ports);
        }
        if let Some(target) = &self.target {
            block["target"] = json!(DeclarativeWriter::reference(target, "self_link"));
        }
        if let Some(service) = &self.backend_service {
            block["backend_service"] = json!(DeclarativeWriter::reference(service, "self_link"));
        }
        if let Some(network) = &self.network {
            block["network"] = json!(DeclarativeWriter::reference(network, "self_link"));
        }
        if let Some(subnet) = &self.subnetwork {
            block["subnetwork"] = json!(DeclarativeWriter::reference(subnet, "self_link"));
        }
        if !self.labels.is_empty() {
            block["labels"] = json!(self.labels);
        }
        w.add(Self::DECLARATIVE_TYPE, &self.name, block);
        Ok(())
    }
}
