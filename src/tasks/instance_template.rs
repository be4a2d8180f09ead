//! Instance template task.
//!
//! Templates are immutable in the cloud, so the task never updates one. The
//! declared name is a prefix; each concrete template is named
//! `<prefix>-<unix seconds>`. `find` returns the newest existing template
//! whose normalized form equals the normalized desired template, and a
//! change of any property produces a brand new template.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::cloud::types::{
    self, AcceleratorConfig, AccessConfig, AliasIpRange, AttachedDisk, AttachedDiskInitializeParams,
    InstanceProperties, InstanceServiceAccount, Metadata, MetadataItem, NetworkInterface,
    Scheduling, Tags,
};
use crate::cloud::url::{GoogleCloudUrl, absolute_link, last_component, relative_link};
use crate::error::{Result, TaskError};

use super::{
    Changes, Context, DeclarativeWriter, Lifecycle, Member, Network, Ref, Resource, Subnet,
    TaskKey, TaskOutput,
};

/// Longest accepted name prefix.
pub const MAX_PREFIX_LENGTH: usize = 32;

/// Largest single metadata value.
pub const MAX_METADATA_VALUE_BYTES: usize = 256 * 1024;

/// Largest total metadata size.
pub const MAX_METADATA_TOTAL_BYTES: usize = 512 * 1024;

const SCOPE_PREFIX: &str = "https://www.googleapis.com/auth/";

/// A guest accelerator request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Accelerator {
    /// Accelerator type, e.g. `nvidia-tesla-t4`.
    pub accelerator_type: String,
    /// Count per instance.
    pub count: i64,
}

/// Desired instance template, named by prefix.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstanceTemplate {
    /// Name prefix.
    pub name: String,
    /// Network of the primary interface.
    pub network: Ref<Network>,
    /// Subnet of the primary interface.
    pub subnet: Option<Ref<Subnet>>,
    /// Machine type name.
    pub machine_type: String,
    /// Boot image link.
    pub boot_disk_image: String,
    /// Boot disk size.
    pub boot_disk_size_gb: i64,
    /// Boot disk type, e.g. `pd-standard`.
    pub boot_disk_type: String,
    /// Allow IP forwarding.
    pub can_ip_forward: bool,
    /// Attach an ephemeral public IP.
    pub has_external_ip: bool,
    /// Alias ranges by subnet secondary range name.
    pub alias_ip_ranges: BTreeMap<String, String>,
    /// Network tags.
    pub tags: BTreeSet<String>,
    /// Labels.
    pub labels: BTreeMap<String, String>,
    /// Metadata.
    pub metadata: BTreeMap<String, String>,
    /// Instance service account.
    pub service_account: Member,
    /// OAuth scopes, short or long form.
    pub scopes: BTreeSet<String>,
    /// Preemptible instances.
    pub preemptible: bool,
    /// `STANDARD` or `SPOT`.
    pub provisioning_model: Option<String>,
    /// Accelerators.
    pub guest_accelerators: Vec<Accelerator>,
    /// Concrete name of the template found in the cloud.
    #[serde(skip)]
    pub concrete_name: Option<String>,
    /// Engine treatment.
    #[serde(skip)]
    pub lifecycle: Lifecycle,
}

/// Expands a short scope alias such as `storage-ro` into its URL.
#[must_use]
pub fn expand_scope(scope: &str) -> String {
    if scope.starts_with("https://") {
        return scope.to_string();
    }
    let name = match scope {
        "compute-rw" => "compute",
        "compute-ro" => "compute.readonly",
        "storage-ro" => "devstorage.read_only",
        "storage-rw" => "devstorage.read_write",
        "storage-full" => "devstorage.full_control",
        "logging-write" => "logging.write",
        "monitoring-write" => "monitoring.write",
        "userinfo-email" => "userinfo.email",
        "clouddns" => "ndev.clouddns.readwrite",
        other => other,
    };
    format!("{SCOPE_PREFIX}{name}")
}

/// Strips server-assigned and order-only differences from a template.
///
/// Clears name, link, id, creation timestamp and fingerprints, sorts
/// metadata items, tags and scopes, and reduces links to one form: images,
/// networks and subnets project-relative, machine, disk and accelerator
/// types to their names, scopes to their long form.
#[must_use]
pub fn normalize_template(template: &types::InstanceTemplate) -> types::InstanceTemplate {
    let mut t = template.clone();
    t.name = String::new();
    t.self_link = String::new();
    t.id = None;
    t.creation_timestamp = None;
    let p = &mut t.properties;
    p.machine_type = last_component(&p.machine_type).to_string();
    for disk in &mut p.disks {
        if let Some(params) = &mut disk.initialize_params {
            params.source_image = relative_link(&params.source_image);
            params.disk_type = last_component(&params.disk_type).to_string();
        }
    }
    for interface in &mut p.network_interfaces {
        interface.network = relative_link(&interface.network);
        interface.subnetwork = relative_link(&interface.subnetwork);
    }
    for accelerator in &mut p.guest_accelerators {
        accelerator.accelerator_type = last_component(&accelerator.accelerator_type).to_string();
    }
    for sa in &mut p.service_accounts {
        sa.scopes = sa.scopes.iter().map(|s| expand_scope(s)).collect();
    }
    if let Some(metadata) = &mut t.properties.metadata {
        metadata.fingerprint = None;
        metadata.items.sort_by(|a, b| a.key.cmp(&b.key));
    }
    if let Some(tags) = &mut t.properties.tags {
        tags.fingerprint = None;
        tags.items.sort();
    }
    for sa in &mut t.properties.service_accounts {
        sa.scopes.sort();
    }
    t
}

/// Numeric suffix of a concrete template name, if it belongs to `prefix`.
fn suffix_of(name: &str, prefix: &str) -> Option<i64> {
    let rest = name.strip_prefix(prefix)?.strip_prefix('-')?;
    if rest.is_empty() || !rest.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    rest.parse().ok()
}

impl InstanceTemplate {
    /// Wire form of this template, with references resolved.
    ///
    /// # Errors
    ///
    /// Returns an error if a reference or the service account cannot be resolved.
    pub async fn to_wire(&self, ctx: &Context<'_>) -> Result<types::InstanceTemplate> {
        let subnetwork = match &self.subnet {
            Some(subnet) => ctx.link(subnet)?,
            None => String::new(),
        };
        let access_configs = if self.has_external_ip {
            vec![AccessConfig {
                name: "external-nat".to_string(),
                access_type: "ONE_TO_ONE_NAT".to_string(),
                network_tier: "PREMIUM".to_string(),
            }]
        } else {
            Vec::new()
        };
        let email = self.service_account.email(ctx).await?;
        let terminate = self.preemptible || !self.guest_accelerators.is_empty();

        Ok(types::InstanceTemplate {
            properties: InstanceProperties {
                machine_type: self.machine_type.clone(),
                can_ip_forward: self.can_ip_forward,
                disks: vec![AttachedDisk {
                    boot: true,
                    auto_delete: true,
                    device_name: "persistent-disks-0".to_string(),
                    mode: "READ_WRITE".to_string(),
                    disk_type: "PERSISTENT".to_string(),
                    initialize_params: Some(AttachedDiskInitializeParams {
                        source_image: absolute_link(&self.boot_disk_image),
                        disk_size_gb: self.boot_disk_size_gb,
                        disk_type: self.boot_disk_type.clone(),
                        labels: BTreeMap::new(),
                    }),
                }],
                network_interfaces: vec![NetworkInterface {
                    network: ctx.link(&self.network)?,
                    subnetwork,
                    access_configs,
                    alias_ip_ranges: self
                        .alias_ip_ranges
                        .iter()
                        .map(|(range, cidr)| AliasIpRange {
                            ip_cidr_range: cidr.clone(),
                            subnetwork_range_name: range.clone(),
                        })
                        .collect(),
                }],
                tags: Some(Tags {
                    items: self.tags.iter().cloned().collect(),
                    fingerprint: None,
                }),
                labels: self.labels.clone(),
                metadata: Some(Metadata {
                    items: self
                        .metadata
                        .iter()
                        .map(|(key, value)| MetadataItem {
                            key: key.clone(),
                            value: value.clone(),
                        })
                        .collect(),
                    fingerprint: None,
                }),
                service_accounts: vec![InstanceServiceAccount {
                    email,
                    scopes: self.scopes.iter().map(|s| expand_scope(s)).collect(),
                }],
                scheduling: Some(Scheduling {
                    automatic_restart: !self.preemptible,
                    on_host_maintenance: if terminate { "TERMINATE" } else { "MIGRATE" }
                        .to_string(),
                    preemptible: self.preemptible,
                    provisioning_model: self.provisioning_model.clone(),
                }),
                guest_accelerators: self
                    .guest_accelerators
                    .iter()
                    .map(|a| AcceleratorConfig {
                        accelerator_type: a.accelerator_type.clone(),
                        accelerator_count: a.count,
                    })
                    .collect(),
            },
            ..types::InstanceTemplate::default()
        })
    }

    fn concrete_name_or_next(&self) -> String {
        self.concrete_name
            .clone()
            .unwrap_or_else(|| format!("{}-{}", self.name, chrono::Utc::now().timestamp()))
    }
}

#[async_trait]
impl Resource for InstanceTemplate {
    const KIND: &'static str = "InstanceTemplate";
    const DECLARATIVE_TYPE: &'static str = "google_compute_instance_template";

    fn name(&self) -> &str {
        &self.name
    }

    fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    fn dependencies(&self) -> Vec<TaskKey> {
        let mut deps = vec![self.network.key()];
        deps.extend(self.subnet.iter().map(Ref::key));
        deps.extend(self.service_account.dependency());
        deps
    }

    async fn find(&self, ctx: &Context<'_>) -> Result<Option<Self>> {
        let desired = normalize_template(&self.to_wire(ctx).await?);
        let templates = ctx
            .cloud
            .compute()
            .instance_templates()
            .list(ctx.project())
            .await?;
        let newest = templates
            .iter()
            .filter_map(|t| suffix_of(&t.name, &self.name).map(|suffix| (suffix, t)))
            .filter(|(_, t)| normalize_template(t) == desired)
            .max_by_key(|(suffix, _)| *suffix);
        Ok(newest.map(|(_, t)| {
            debug!("Instance template {} matches {}", t.name, self.name);
            Self {
                concrete_name: Some(t.name.clone()),
                ..self.clone()
            }
        }))
    }

    fn check_changes(&self, _actual: Option<&Self>, _changes: &Changes) -> Result<()> {
        if self.name.len() > MAX_PREFIX_LENGTH {
            return Err(TaskError::invalid(
                Self::KIND,
                &self.name,
                "name",
                format!("prefix longer than {MAX_PREFIX_LENGTH} characters"),
            )
            .into());
        }
        let mut total = 0;
        for (key, value) in &self.metadata {
            if value.len() > MAX_METADATA_VALUE_BYTES {
                return Err(TaskError::invalid(
                    Self::KIND,
                    &self.name,
                    format!("metadata.{key}"),
                    format!("value exceeds {MAX_METADATA_VALUE_BYTES} bytes"),
                )
                .into());
            }
            total += key.len() + value.len();
        }
        if total > MAX_METADATA_TOTAL_BYTES {
            return Err(TaskError::invalid(
                Self::KIND,
                &self.name,
                "metadata",
                format!("total size exceeds {MAX_METADATA_TOTAL_BYTES} bytes"),
            )
            .into());
        }
        Ok(())
    }

    async fn render_cloud(
        &self,
        ctx: &Context<'_>,
        _actual: Option<&Self>,
        _changes: &Changes,
    ) -> Result<TaskOutput> {
        let templates = ctx.cloud.compute().instance_templates();
        let newest_existing = templates
            .list(ctx.project())
            .await?
            .iter()
            .filter_map(|t| suffix_of(&t.name, &self.name))
            .max();
        let now = chrono::Utc::now().timestamp();
        let suffix = newest_existing.map_or(now, |newest| now.max(newest + 1));
        let name = format!("{}-{suffix}", self.name);

        let mut template = self.to_wire(ctx).await?;
        template.name.clone_from(&name);
        debug!("Creating instance template {name}");
        let op = templates.insert(ctx.project(), &template).await?;
        ctx.cloud.wait(&op).await?;

        Ok(TaskOutput::link(
            &name,
            GoogleCloudUrl::global(ctx.project(), "instanceTemplates", &name).to_string(),
        ))
    }

    fn output(&self, ctx: &Context<'_>) -> TaskOutput {
        let name = self.concrete_name_or_next();
        let link = GoogleCloudUrl::global(ctx.project(), "instanceTemplates", &name).to_string();
        TaskOutput::link(name, link)
    }

    fn render_declarative(&self, w: &mut DeclarativeWriter) -> Result<()> {
        let mut interface = json!({
            "network": DeclarativeWriter::reference(&self.network, "self_link"),
        });
        if let Some(subnet) = &self.subnet {
            interface["subnetwork"] = json!(DeclarativeWriter::reference(subnet, "self_link"));
        }
        if self.has_external_ip {
            interface["access_config"] = json!([{ "network_tier": "PREMIUM" }]);
        }
        if !self.alias_ip_ranges.is_empty() {
            interface["alias_ip_range"] = json!(
                self.alias_ip_ranges
                    .iter()
                    .map(|(range, cidr)| json!({
                        "ip_cidr_range": cidr,
                        "subnetwork_range_name": range,
                    }))
                    .collect::<Vec<_>>()
            );
        }
        let scopes: Vec<String> = self.scopes.iter().map(|s| expand_scope(s)).collect();
        let email = match &self.service_account {
            Member::ServiceAccount(r) => DeclarativeWriter::reference(r, "email"),
            Member::Literal(email) => email.clone(),
            Member::DefaultServiceAccount => {
                "${data.google_compute_default_service_account.default.email}".to_string()
            }
        };
        let mut block = json!({
            "name_prefix": format!("{}-", self.name),
            "machine_type": self.machine_type,
            "can_ip_forward": self.can_ip_forward,
            "disk": [{
                "boot": true,
                "auto_delete": true,
                "source_image": self.boot_disk_image,
                "disk_size_gb": self.boot_disk_size_gb,
                "disk_type": self.boot_disk_type,
            }],
            "network_interface": [interface],
            "tags": self.tags,
            "labels": self.labels,
            "metadata": self.metadata,
            "service_account": [{ "email": email, "scopes": scopes }],
            "scheduling": [{
                "automatic_restart": !self.preemptible,
                "preemptible": self.preemptible,
                "on_host_maintenance": if self.preemptible || !self.guest_accelerators.is_empty() {
                    "TERMINATE"
                } else {
                    "MIGRATE"
                },
            }],
            "lifecycle": { "create_before_destroy": true },
        });
        if !self.guest_accelerators.is_empty() {
            block["guest_accelerator"] = json!(
                self.guest_accelerators
                    .iter()
                    .map(|a| json!({ "type": a.accelerator_type, "count": a.count }))
                    .collect::<Vec<_>>()
            );
        }
        if let Some(model) = &self.provisioning_model {
            block["scheduling"][0]["provisioning_model"] = json!(model);
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

    fn template(prefix: &str) -> InstanceTemplate {
        InstanceTemplate {
            name: prefix.into(),
            network: Ref::new("c1"),
            subnet: None,
            machine_type: "e2-medium".into(),
            boot_disk_image: "https://www.googleapis.com/compute/v1/projects/ubuntu-os-cloud/global/images/ubuntu-2204".into(),
            boot_disk_size_gb: 128,
            boot_disk_type: "pd-standard".into(),
            can_ip_forward: true,
            has_external_ip: true,
            alias_ip_ranges: BTreeMap::new(),
            tags: BTreeSet::from(["c1-k8s-io-role-node".to_string()]),
            labels: BTreeMap::new(),
            metadata: BTreeMap::from([
                ("cluster-name".to_string(), "c1".to_string()),
                ("startup-script".to_string(), "#!/bin/bash".to_string()),
            ]),
            service_account: Member::Literal("nodes@p.iam.gserviceaccount.com".into()),
            scopes: BTreeSet::from(["storage-ro".to_string(), "compute-rw".to_string()]),
            preemptible: false,
            provisioning_model: None,
            guest_accelerators: Vec::new(),
            concrete_name: None,
            lifecycle: Lifecycle::Sync,
        }
    }

    fn outputs() -> Outputs {
        Outputs::from([(
            TaskKey::of::<Network>("c1"),
            TaskOutput::link("c1", "https://www.googleapis.com/compute/v1/projects/p/global/networks/c1"),
        )])
    }

    #[test]
    fn test_scope_aliases() {
        assert_eq!(
            expand_scope("storage-ro"),
            "https://www.googleapis.com/auth/devstorage.read_only"
        );
        assert_eq!(
            expand_scope("https://www.googleapis.com/auth/cloud-platform"),
            "https://www.googleapis.com/auth/cloud-platform"
        );
    }

    #[test]
    fn test_suffix_parsing() {
        assert_eq!(suffix_of("nodes-c1-1700000000", "nodes-c1"), Some(1_700_000_000));
        assert_eq!(suffix_of("nodes-c1-extra-1", "nodes-c1"), None);
        assert_eq!(suffix_of("nodes-c1", "nodes-c1"), None);
    }

    #[test]
    fn test_normalization_ignores_server_fields_and_order() {
        let mut a = types::InstanceTemplate::default();
        a.properties.metadata = Some(Metadata {
            items: vec![
                MetadataItem { key: "b".into(), value: "2".into() },
                MetadataItem { key: "a".into(), value: "1".into() },
            ],
            fingerprint: Some("f1".into()),
        });
        let mut b = a.clone();
        b.name = "nodes-1".into();
        b.self_link = "link".into();
        b.id = Some("7".into());
        b.creation_timestamp = Some("2024-01-01T00:00:00Z".into());
        if let Some(m) = &mut b.properties.metadata {
            m.items.reverse();
            m.fingerprint = Some("f2".into());
        }
        assert_eq!(normalize_template(&a), normalize_template(&b));
    }

    #[tokio::test]
    async fn test_full_links_from_the_api_still_match() {
        let sim = MockCloud::new();
        let cloud = sim.cloud("p", "us-central1");
        let outputs = outputs();
        let ctx = Context::new(&cloud, &outputs);

        let mut desired = template("nodes-c1");
        desired.boot_disk_image = "projects/ubuntu-os-cloud/global/images/ubuntu-2204".into();

        let mut stored = desired.to_wire(&ctx).await.expect("wire");
        stored.name = "nodes-c1-1700000000".into();
        stored.properties.machine_type =
            "https://www.googleapis.com/compute/v1/projects/p/zones/us-central1-a/machineTypes/e2-medium".into();
        if let Some(params) = &mut stored.properties.disks[0].initialize_params {
            params.source_image = "https://www.googleapis.com/compute/v1/projects/ubuntu-os-cloud/global/images/ubuntu-2204".into();
        }
        stored.properties.service_accounts[0].scopes.reverse();
        cloud
            .compute()
            .instance_templates()
            .insert("p", &stored)
            .await
            .expect("seeded");

        let found = desired.find(&ctx).await.expect("listed").expect("matched");
        assert_eq!(found.concrete_name.as_deref(), Some("nodes-c1-1700000000"));

        let step = run_step(&desired, &ctx, Target::Apply).await.expect("ran");
        assert_eq!(step.action, Action::Unchanged);
        assert_eq!(sim.compute().instance_template_count(), 1);
    }

    #[tokio::test]
    async fn test_matching_template_is_reused_and_change_creates_new() {
        let sim = MockCloud::new();
        let cloud = sim.cloud("p", "us-central1");
        let outputs = outputs();
        let ctx = Context::new(&cloud, &outputs);

        let created = run_step(&template("nodes-c1"), &ctx, Target::Apply)
            .await
            .expect("created");
        assert_eq!(created.action, Action::Created);
        assert!(created.output.name.starts_with("nodes-c1-"));

        let again = run_step(&template("nodes-c1"), &ctx, Target::Apply)
            .await
            .expect("found");
        assert_eq!(again.action, Action::Unchanged);
        assert_eq!(again.output.name, created.output.name);

        let mut bigger = template("nodes-c1");
        bigger.machine_type = "e2-standard-4".into();
        let replaced = run_step(&bigger, &ctx, Target::Apply).await.expect("new template");
        assert_eq!(replaced.action, Action::Created);
        assert_ne!(replaced.output.name, created.output.name);
        assert_eq!(sim.compute().instance_template_count(), 2);
    }

    #[test]
    fn test_metadata_size_limit() {
        let mut t = template("nodes-c1");
        t.metadata
            .insert("big".into(), "x".repeat(MAX_METADATA_VALUE_BYTES + 1));
        let changes = Changes::compute(None, &t).expect("changes");
        assert!(t.check_changes(None, &changes).is_err());
    }

    #[test]
    fn test_long_prefix_rejected() {
        let t = template(&"n".repeat(MAX_PREFIX_LENGTH + 1));
        let changes = Changes::compute(None, &t).expect("changes");
        assert!(t.check_changes(None, &changes).is_err());
    }
}
