//! Instance groups as they run in the cloud.
//!
//! Managed instance groups are traced back to the configured instance groups
//! through their templates and names. Instances still running an older
//! template are reported as needing an update and can be recreated one at a
//! time.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

use crate::cloud::GceCloud;
use crate::cloud::types::{InstanceGroupManager, InstanceManagedByIgmError, ManagedInstance};
use crate::cloud::url::{GoogleCloudUrl, Scope, last_component, relative_link};
use crate::config::{ClusterConfig, InstanceGroupConfig};
use crate::error::{InfraError, ModelError, Result};
use crate::model::instance_group_manager_name;
use crate::resources::find_cluster_templates;

/// One instance of a managed group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CloudInstance {
    /// Instance link.
    pub id: String,
    /// Instance name.
    pub name: String,
    /// e.g. `RUNNING`.
    pub status: Option<String>,
    /// Template the instance was created from.
    pub instance_template: Option<String>,
}

/// An error the group hit while acting on an instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScalingEvent {
    /// When it happened.
    pub timestamp: DateTime<Utc>,
    /// What went wrong.
    pub description: String,
}

/// A managed instance group backing a configured instance group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CloudInstanceGroup {
    /// Manager name.
    pub name: String,
    /// Name of the configured instance group.
    pub instance_group: String,
    /// Zone of the manager.
    pub zone: String,
    /// Desired instance count.
    pub target_size: i64,
    /// Current template link.
    pub instance_template: String,
    /// Manager link.
    pub self_link: String,
    /// Instances on the current template.
    pub ready: Vec<CloudInstance>,
    /// Instances on an older template.
    pub need_update: Vec<CloudInstance>,
    /// Recent errors.
    pub events: Vec<ScalingEvent>,
}

/// Returns the configured group `igm` runs, if any.
///
/// # Errors
///
/// Returns `InvalidSpec` if more than one configured group maps to the manager's name.
pub fn match_instance_group<'a>(
    igm: &InstanceGroupManager,
    cluster: &'a ClusterConfig,
) -> Result<Option<&'a InstanceGroupConfig>> {
    let igm_name = last_component(&igm.name);
    let zone = last_component(&igm.zone);
    let mut matches = cluster
        .instance_groups
        .iter()
        .filter(|g| instance_group_manager_name(&cluster.name, &g.name, zone) == igm_name);
    let first = matches.next();
    if matches.next().is_some() {
        return Err(ModelError::InvalidSpec {
            message: format!("found multiple instance groups matching MIG {}", igm.name),
        }
        .into());
    }
    Ok(first)
}

/// Converts group errors into scaling events, skipping entries without an error.
///
/// # Errors
///
/// Returns an error if a timestamp is not RFC3339.
pub fn igm_errors_to_scaling_events(errors: &[InstanceManagedByIgmError]) -> Result<Vec<ScalingEvent>> {
    let mut events = Vec::new();
    for entry in errors {
        let timestamp = DateTime::parse_from_rfc3339(&entry.timestamp)
            .map_err(|e| InfraError::internal(format!("invalid timestamp {:?}: {e}", entry.timestamp)))?
            .with_timezone(&Utc);
        if let Some(error) = &entry.error {
            events.push(ScalingEvent {
                timestamp,
                description: error.message.clone(),
            });
        }
    }
    Ok(events)
}

fn cloud_instance(managed: &ManagedInstance) -> CloudInstance {
    CloudInstance {
        id: managed.instance.clone(),
        name: last_component(&managed.instance).to_string(),
        status: managed.instance_status.clone(),
        instance_template: managed.version.as_ref().map(|v| v.instance_template.clone()),
    }
}

/// Finds the managed groups of `cluster`, keyed by manager name.
///
/// Managers whose template the cluster does not own are ignored. Managers
/// with no matching configured group are skipped, with a warning when
/// `warn_unmatched` is set.
///
/// # Errors
///
/// Returns an error if a listing fails or a manager matches several groups.
pub async fn get_cloud_groups(
    cloud: &GceCloud,
    cluster: &ClusterConfig,
    warn_unmatched: bool,
) -> Result<BTreeMap<String, CloudInstanceGroup>> {
    let project = cloud.project();
    let compute = cloud.compute();
    let templates: BTreeSet<String> = find_cluster_templates(cloud, &cluster.name)
        .await?
        .iter()
        .map(|t| relative_link(&t.self_link))
        .collect();

    let mut groups = BTreeMap::new();
    for zone in cloud.zones().await? {
        for igm in compute.instance_group_managers().list(project, &zone).await? {
            let current = relative_link(&igm.instance_template);
            if !templates.contains(&current) {
                debug!("Ignoring MIG {} with unmanaged template {}", igm.name, igm.instance_template);
                continue;
            }
            let Some(group) = match_instance_group(&igm, cluster)? else {
                if warn_unmatched {
                    warn!("Found MIG with no corresponding instance group: {}", igm.name);
                }
                continue;
            };

            let errors = compute
                .instance_group_managers()
                .list_errors(project, &zone, &igm.name)
                .await?;
            let mut cloud_group = CloudInstanceGroup {
                name: igm.name.clone(),
                instance_group: group.name.clone(),
                zone: zone.clone(),
                target_size: igm.target_size,
                instance_template: igm.instance_template.clone(),
                self_link: igm.self_link.clone(),
                ready: Vec::new(),
                need_update: Vec::new(),
                events: igm_errors_to_scaling_events(&errors)?,
            };

            let instances = compute
                .instance_group_managers()
                .list_managed_instances(project, &zone, &igm.name)
                .await?;
            for managed in &instances {
                let instance = cloud_instance(managed);
                let up_to_date = instance
                    .instance_template
                    .as_deref()
                    .is_some_and(|t| relative_link(t) == current);
                if up_to_date {
                    cloud_group.ready.push(instance);
                } else {
                    cloud_group.need_update.push(instance);
                }
            }
            groups.insert(igm.name, cloud_group);
        }
    }
    Ok(groups)
}

/// Location of a group's manager.
fn manager_location(group: &CloudInstanceGroup) -> Result<(String, String)> {
    let url = GoogleCloudUrl::parse(&group.self_link)?;
    match url.scope {
        Scope::Zone(zone) => Ok((url.project, zone)),
        _ => Err(InfraError::internal(format!("{} is not a zonal manager", group.self_link))),
    }
}

/// Recreates `instance` through its managing group.
///
/// An instance that no longer exists is assumed deleted.
///
/// # Errors
///
/// Returns an error if the request or the operation fails.
pub async fn recreate_instance(
    cloud: &GceCloud,
    group: &CloudInstanceGroup,
    instance: &CloudInstance,
) -> Result<()> {
    let (project, zone) = manager_location(group)?;
    info!("Recreating instance {} in MIG {}", instance.name, group.name);
    let igms = cloud.compute().instance_group_managers();
    match igms
        .recreate_instances(&project, &zone, &group.name, std::slice::from_ref(&instance.id))
        .await
    {
        Ok(op) => cloud.wait(&op).await,
        Err(e) if e.is_not_found() => {
            info!("Instance not found, assuming deleted: {}", instance.id);
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Deletes a group's manager, then its current template.
///
/// # Errors
///
/// Returns an error if a deletion fails for any reason other than the
/// resource being gone already.
pub async fn delete_group(cloud: &GceCloud, group: &CloudInstanceGroup) -> Result<()> {
    let (project, zone) = manager_location(group)?;
    let compute = cloud.compute();

    info!("Deleting MIG {}", group.name);
    match compute.instance_group_managers().delete(&project, &zone, &group.name).await {
        Ok(op) => cloud.wait(&op).await?,
        Err(e) if e.is_not_found() => debug!("MIG {} already deleted", group.name),
        Err(e) => return Err(e),
    }

    let template = last_component(&group.instance_template);
    info!("Deleting instance template {template}");
    match compute.instance_templates().delete(&project, template).await {
        Ok(op) => cloud.wait(&op).await,
        Err(e) if e.is_not_found() => {
            debug!("Instance template {template} already deleted");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::types::InstanceManagedByIgmErrorDetail;
    use crate::engine::{Engine, EngineConfig, Target};
    use crate::model::build_tasks;
    use crate::model::test_support::{MINIMAL, parse};
    use crate::simulator::MockCloud;
    use std::sync::Arc;

    const NODES: &str = r"
instance_groups:
  - name: nodes
    role: Node
    machine_type: e2-medium
    image: ubuntu-os-cloud/ubuntu-2204-lts
    min_size: 3
    zones: [us-central1-a, us-central1-b]
";

    async fn applied(sim: &MockCloud, config: &ClusterConfig) {
        let cloud = Arc::new(sim.cloud("testproject", "us-central1"));
        let tasks = build_tasks(config).expect("tasks");
        Engine::new(cloud, EngineConfig::default())
            .run(&tasks, Target::Apply)
            .await
            .expect("applied")
            .ensure_success()
            .expect("succeeded");
    }

    fn igm(name: &str, zone: &str) -> InstanceGroupManager {
        InstanceGroupManager {
            name: name.to_string(),
            zone: format!("https://www.googleapis.com/compute/v1/projects/p/zones/{zone}"),
            ..InstanceGroupManager::default()
        }
    }

    #[test]
    fn test_match_instance_group_by_name_and_zone() {
        let config = parse(&format!("{MINIMAL}{NODES}"));
        let name = instance_group_manager_name(&config.name, "nodes", "us-central1-b");
        assert_eq!(name, "b-nodes-testcluster-test-com");

        let matched = match_instance_group(&igm(&name, "us-central1-b"), &config).expect("matched");
        assert_eq!(matched.map(|g| g.name.as_str()), Some("nodes"));

        let other = match_instance_group(&igm(&name, "us-central1-c"), &config).expect("matched");
        assert!(other.is_none());
    }

    #[test]
    fn test_ambiguous_match_is_an_error() {
        let mut config = parse(&format!("{MINIMAL}{NODES}"));
        config.instance_groups.push(config.instance_groups[0].clone());
        let name = instance_group_manager_name(&config.name, "nodes", "us-central1-a");
        assert!(match_instance_group(&igm(&name, "us-central1-a"), &config).is_err());
    }

    #[test]
    fn test_scaling_events_skip_entries_without_error() {
        let errors = [
            InstanceManagedByIgmError {
                timestamp: "2024-05-01T10:00:00Z".to_string(),
                error: Some(InstanceManagedByIgmErrorDetail {
                    code: "QUOTA_EXCEEDED".to_string(),
                    message: "Quota CPUS exceeded".to_string(),
                }),
            },
            InstanceManagedByIgmError {
                timestamp: "2024-05-01T10:05:00-07:00".to_string(),
                error: None,
            },
        ];
        let events = igm_errors_to_scaling_events(&errors).expect("events");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].description, "Quota CPUS exceeded");
        assert_eq!(events[0].timestamp.to_rfc3339(), "2024-05-01T10:00:00+00:00");

        let bad = [InstanceManagedByIgmError {
            timestamp: "yesterday".to_string(),
            error: None,
        }];
        assert!(igm_errors_to_scaling_events(&bad).is_err());
    }

    #[tokio::test]
    async fn test_groups_track_template_changes() {
        let sim = MockCloud::new();
        let config = parse(&format!("{MINIMAL}{NODES}"));
        applied(&sim, &config).await;

        let cloud = sim.cloud("testproject", "us-central1");
        let groups = get_cloud_groups(&cloud, &config, true).await.expect("groups");
        assert_eq!(groups.len(), 2);
        let a = &groups["a-nodes-testcluster-test-com"];
        assert_eq!(a.instance_group, "nodes");
        assert_eq!(a.zone, "us-central1-a");
        assert_eq!(a.ready.len(), 2);
        assert!(a.need_update.is_empty());
        assert_eq!(groups["b-nodes-testcluster-test-com"].ready.len(), 1);

        let mut bigger = config.clone();
        bigger.instance_groups[0].machine_type = "e2-standard-4".to_string();
        applied(&sim, &bigger).await;

        let groups = get_cloud_groups(&cloud, &bigger, true).await.expect("groups");
        let a = &groups["a-nodes-testcluster-test-com"];
        assert!(a.ready.is_empty());
        assert_eq!(a.need_update.len(), 2);

        recreate_instance(&cloud, a, &a.need_update[0]).await.expect("recreated");
        let groups = get_cloud_groups(&cloud, &bigger, true).await.expect("groups");
        let a = &groups["a-nodes-testcluster-test-com"];
        assert_eq!(a.ready.len(), 1);
        assert_eq!(a.need_update.len(), 1);
    }

    #[tokio::test]
    async fn test_recreating_a_vanished_instance_succeeds() {
        let sim = MockCloud::new();
        let config = parse(&format!("{MINIMAL}{NODES}"));
        applied(&sim, &config).await;
        let cloud = sim.cloud("testproject", "us-central1");
        let groups = get_cloud_groups(&cloud, &config, false).await.expect("groups");
        let group = &groups["b-nodes-testcluster-test-com"];

        let gone = CloudInstance {
            id: "https://www.googleapis.com/compute/v1/projects/testproject/zones/us-central1-b/instances/nodes-9999"
                .to_string(),
            name: "nodes-9999".to_string(),
            status: None,
            instance_template: None,
        };
        recreate_instance(&cloud, group, &gone).await.expect("ignored");
    }

    #[tokio::test]
    async fn test_group_errors_become_events() {
        let sim = MockCloud::new();
        let config = parse(&format!("{MINIMAL}{NODES}"));
        applied(&sim, &config).await;
        sim.compute().seed_igm_error(
            "testproject",
            "us-central1-a",
            "a-nodes-testcluster-test-com",
            InstanceManagedByIgmError {
                timestamp: "2024-05-01T10:00:00Z".to_string(),
                error: Some(InstanceManagedByIgmErrorDetail {
                    code: "ZONE_RESOURCE_POOL_EXHAUSTED".to_string(),
                    message: "The zone does not have enough resources".to_string(),
                }),
            },
        );

        let cloud = sim.cloud("testproject", "us-central1");
        let groups = get_cloud_groups(&cloud, &config, true).await.expect("groups");
        let events = &groups["a-nodes-testcluster-test-com"].events;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].description, "The zone does not have enough resources");
        assert!(groups["b-nodes-testcluster-test-com"].events.is_empty());
    }

    #[tokio::test]
    async fn test_delete_group_removes_manager_and_template() {
        let sim = MockCloud::new();
        let config = parse(&format!("{MINIMAL}{NODES}"));
        applied(&sim, &config).await;
        let cloud = sim.cloud("testproject", "us-central1");
        let groups = get_cloud_groups(&cloud, &config, true).await.expect("groups");

        let group = &groups["a-nodes-testcluster-test-com"];
        delete_group(&cloud, group).await.expect("deleted");
        assert_eq!(sim.compute().instance_template_count(), 0);

        // The other zone's manager still points at the deleted template.
        delete_group(&cloud, &groups["b-nodes-testcluster-test-com"])
            .await
            .expect("template already gone");
        let remaining = get_cloud_groups(&cloud, &config, true).await.expect("groups");
        assert!(remaining.is_empty());
    }

    #[tokio::test]
    async fn test_managers_of_other_clusters_are_ignored() {
        let sim = MockCloud::new();
        let config = parse(&format!("{MINIMAL}{NODES}"));
        applied(&sim, &config).await;

        let mut other = config.clone();
        other.name = "other.test.com".to_string();
        let cloud = sim.cloud("testproject", "us-central1");
        let groups = get_cloud_groups(&cloud, &other, true).await.expect("groups");
        assert!(groups.is_empty());
    }
}
