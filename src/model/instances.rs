//! Instance templates and per-zone instance group managers.

use std::collections::{BTreeMap, BTreeSet};

use crate::cloud::naming::{MAX_NAME_LENGTH, limited_length_name, safe_object_name};
use crate::cloud::url::short_zone;
use crate::config::{InstanceGroupConfig, InstanceGroupRole, SubnetType, Topology};
use crate::engine::TaskSet;
use crate::error::{InfraError, ModelError, Result};
use crate::tasks::instance_template::MAX_PREFIX_LENGTH;
use crate::tasks::{Accelerator, InstanceGroupManager, InstanceTemplate, Lifecycle, Ref};

use super::network::POD_RANGE;
use super::{ModelBuilder, ModelContext};

/// Default boot disk type.
pub const DEFAULT_VOLUME_TYPE: &str = "pd-standard";

/// Alias range every instance takes from the pod range in IP alias mode.
const POD_ALIAS_RANGE: &str = "/24";

/// Name of the instance group manager running `group_name` in `zone`.
#[must_use]
pub fn instance_group_manager_name(cluster_name: &str, group_name: &str, zone: &str) -> String {
    limited_length_name(
        &format!("{}-{}", short_zone(zone), safe_object_name(group_name, cluster_name)),
        MAX_NAME_LENGTH,
    )
}

/// Splits `min_size` instances across `zones`.
///
/// Every zone gets `min_size / zones.len()`; the remainder goes one by one to
/// the zones in order, starting with the first.
///
/// # Errors
///
/// Returns `NoZones` if `zones` is empty.
pub fn split_across_zones(
    group: &str,
    min_size: i64,
    zones: &[String],
) -> Result<Vec<(String, i64)>> {
    if zones.is_empty() {
        return Err(ModelError::NoZones {
            group: group.to_string(),
        }
        .into());
    }
    let count = i64::try_from(zones.len())
        .map_err(|_| InfraError::internal(format!("too many zones in {group}")))?;
    let base = min_size / count;
    let remainder = min_size % count;
    Ok(zones
        .iter()
        .zip(0_i64..)
        .map(|(zone, i)| (zone.clone(), base + i64::from(i < remainder)))
        .collect())
}

/// Boot image link for an image spec.
///
/// `project/name` becomes `projects/<project>/global/images/<name>`; links and
/// bare names are used as given.
#[must_use]
pub fn image_link(image: &str) -> String {
    if image.starts_with("https://") || image.starts_with("projects/") {
        return image.to_string();
    }
    match image.split_once('/') {
        Some((project, name)) if !name.contains('/') => {
            format!("projects/{project}/global/images/{name}")
        }
        _ => image.to_string(),
    }
}

/// Emits one instance template per instance group and one instance group
/// manager per zone of the group.
#[derive(Debug, Clone, Copy, Default)]
pub struct InstanceGroupModelBuilder;

impl InstanceGroupModelBuilder {
    fn scopes(role: InstanceGroupRole) -> BTreeSet<String> {
        let control_plane = role == InstanceGroupRole::ControlPlane;
        let mut scopes = BTreeSet::from([
            "monitoring-write".to_string(),
            "logging-write".to_string(),
        ]);
        if control_plane {
            scopes.insert("compute-rw".to_string());
            scopes.insert("storage-rw".to_string());
            scopes.insert("clouddns".to_string());
        } else {
            scopes.insert("compute-ro".to_string());
            scopes.insert("storage-ro".to_string());
        }
        scopes
    }

    fn metadata(ctx: &ModelContext<'_>, group: &InstanceGroupConfig) -> BTreeMap<String, String> {
        let mut metadata = BTreeMap::from([
            ("cluster-name".to_string(), ctx.cluster.name.clone()),
            ("instance-group-name".to_string(), group.name.clone()),
        ]);
        if !ctx.cluster.ssh_public_keys.is_empty() {
            let keys: Vec<String> = ctx
                .cluster
                .ssh_public_keys
                .iter()
                .map(|key| format!("admin:{}", key.trim()))
                .collect();
            metadata.insert("ssh-keys".to_string(), keys.join("\n"));
        }
        if let Some(script) = &group.startup_script {
            metadata.insert("startup-script".to_string(), script.clone());
        }
        metadata
    }

    fn template(ctx: &ModelContext<'_>, group: &InstanceGroupConfig) -> Result<InstanceTemplate> {
        let subnet = ctx.subnet_for(group);
        if subnet.is_none() && !group.subnets.is_empty() {
            return Err(ModelError::InvalidSpec {
                message: format!("instance group {} names an undeclared subnet", group.name),
            }
            .into());
        }
        let has_external_ip = group.associate_public_ip.unwrap_or_else(|| {
            ctx.cluster.networking.topology == Topology::Public
                && subnet
                    .as_ref()
                    .is_none_or(|(config, _)| config.subnet_type != SubnetType::Private)
        });

        let mut tags: BTreeSet<String> = group.tags.iter().cloned().collect();
        tags.insert(ctx.tag_for(group.role));

        let mut labels = ctx.cluster_labels();
        let (role_key, role_value) = ModelContext::role_label(group.role);
        labels.insert(role_key, role_value);
        labels.extend(group.labels.clone());

        let alias_ip_ranges = if ctx.ip_alias() {
            BTreeMap::from([(POD_RANGE.to_string(), POD_ALIAS_RANGE.to_string())])
        } else {
            BTreeMap::new()
        };

        Ok(InstanceTemplate {
            name: limited_length_name(&ctx.name_for(&group.name), MAX_PREFIX_LENGTH),
            network: ctx.network(),
            subnet: subnet.map(|(_, r)| r),
            machine_type: group.machine_type.clone(),
            boot_disk_image: image_link(&group.image),
            boot_disk_size_gb: group
                .root_volume_size_gb
                .unwrap_or_else(|| group.role.default_volume_size_gb()),
            boot_disk_type: group
                .root_volume_type
                .clone()
                .unwrap_or_else(|| DEFAULT_VOLUME_TYPE.to_string()),
            can_ip_forward: true,
            has_external_ip,
            alias_ip_ranges,
            tags,
            labels,
            metadata: Self::metadata(ctx, group),
            service_account: ctx.member_for(group.role),
            scopes: Self::scopes(group.role),
            preemptible: group.preemptible,
            provisioning_model: group.provisioning_model.clone(),
            guest_accelerators: group
                .accelerators
                .iter()
                .map(|a| Accelerator {
                    accelerator_type: a.accelerator_type.clone(),
                    count: a.count,
                })
                .collect(),
            concrete_name: None,
            lifecycle: Lifecycle::Sync,
        })
    }
}

impl ModelBuilder for InstanceGroupModelBuilder {
    fn build(&self, ctx: &ModelContext<'_>, tasks: &mut TaskSet) -> Result<()> {
        for group in &ctx.cluster.instance_groups {
            let template = Self::template(ctx, group)?;
            let template_ref = Ref::to(&template);
            tasks.add(template)?;

            let target_pools: BTreeSet<_> = if group.role.has_api_server() {
                ctx.api_target_pool().into_iter().collect()
            } else {
                BTreeSet::new()
            };
            for (zone, target_size) in split_across_zones(&group.name, group.min_size, &group.zones)? {
                tasks.add(InstanceGroupManager {
                    name: instance_group_manager_name(&ctx.cluster.name, &group.name, &zone),
                    zone,
                    base_instance_name: group.name.clone(),
                    target_size,
                    instance_template: template_ref.clone(),
                    target_pools: target_pools.clone(),
                    lifecycle: Lifecycle::Sync,
                })?;
            }
        }
        Ok(())
    }
}
