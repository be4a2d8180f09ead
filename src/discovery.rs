//! Etcd cluster-status discovery.
//!
//! Control-plane volumes carry one `k8s-io-etcd-<cluster>` label per etcd
//! cluster they belong to. Reading those labels back from the disks of every
//! zone gives the etcd membership of a running cluster without talking to
//! etcd itself.

use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::cloud::GceCloud;
use crate::cloud::naming::{
    LABEL_CLUSTER_NAME, LABEL_ETCD_PREFIX, LABEL_ROLE_PREFIX, decode_label, encode_label,
    safe_cluster_name,
};
use crate::cloud::types::Disk;
use crate::error::{InfraError, ModelError, Result};

/// Role names that mark a control-plane volume.
const CONTROL_PLANE_ROLES: &[&str] = &["master", "control-plane"];

/// Membership of one volume in one etcd cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EtcdClusterSpec {
    /// Etcd cluster name, e.g. `main`.
    pub cluster_key: String,
    /// Member this volume belongs to.
    pub node_name: String,
    /// All members of the cluster.
    pub node_names: Vec<String>,
}

impl EtcdClusterSpec {
    /// Parses a decoded label value of the form `<member>/<member>,<member>,...`.
    ///
    /// # Errors
    ///
    /// Returns an error if the value has no `/` or an empty member name.
    pub fn parse(cluster_key: &str, value: &str) -> Result<Self> {
        let invalid = || -> InfraError {
            ModelError::InvalidSpec {
                message: format!("malformed etcd cluster spec {value:?} for {cluster_key}"),
            }
            .into()
        };
        let (node_name, nodes) = value.split_once('/').ok_or_else(invalid)?;
        if node_name.is_empty() {
            return Err(invalid());
        }
        Ok(Self {
            cluster_key: cluster_key.to_string(),
            node_name: node_name.to_string(),
            node_names: nodes
                .split(',')
                .filter(|n| !n.is_empty())
                .map(ToString::to_string)
                .collect(),
        })
    }

    /// Label key for this spec.
    #[must_use]
    pub fn label_key(&self) -> String {
        format!("{LABEL_ETCD_PREFIX}{}", self.cluster_key)
    }

    /// Encoded label value for this spec.
    #[must_use]
    pub fn label_value(&self) -> String {
        encode_label(&format!("{}/{}", self.node_name, self.node_names.join(",")))
    }
}

/// A discovered etcd member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EtcdMemberStatus {
    /// Member name.
    pub name: String,
    /// Link or name of the volume backing it.
    pub volume_id: String,
}

/// A discovered etcd cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EtcdClusterStatus {
    /// Cluster name.
    pub name: String,
    /// Members, in discovery order.
    pub members: Vec<EtcdMemberStatus>,
}

/// Returns true if the disk carries a control-plane role label.
fn is_control_plane(disk: &Disk) -> bool {
    disk.labels
        .keys()
        .filter_map(|k| k.strip_prefix(LABEL_ROLE_PREFIX))
        .any(|role| CONTROL_PLANE_ROLES.contains(&role))
}

/// Etcd specs carried by one disk.
///
/// # Errors
///
/// Returns an error if an etcd label cannot be decoded or parsed.
pub fn etcd_specs(disk: &Disk) -> Result<Vec<EtcdClusterSpec>> {
    let mut specs = Vec::new();
    for (key, value) in &disk.labels {
        let Some(cluster_key) = key.strip_prefix(LABEL_ETCD_PREFIX) else {
            continue;
        };
        let decoded = decode_label(value)?;
        specs.push(EtcdClusterSpec::parse(cluster_key, &decoded)?);
    }
    Ok(specs)
}

/// Groups the etcd membership of `disks` by etcd cluster name.
///
/// Disks without a control-plane role label are skipped, as are disks whose
/// labels are malformed.
#[must_use]
pub fn group_members(disks: &[Disk]) -> Vec<EtcdClusterStatus> {
    let mut clusters: BTreeMap<String, Vec<EtcdMemberStatus>> = BTreeMap::new();
    for disk in disks {
        if !is_control_plane(disk) {
            debug!("Skipping disk {} - no control-plane role", disk.name);
            continue;
        }
        let specs = match etcd_specs(disk) {
            Ok(specs) => specs,
            Err(e) => {
                warn!("Skipping malformed volume {}: {e}", disk.name);
                continue;
            }
        };
        let volume_id = if disk.self_link.is_empty() {
            disk.name.clone()
        } else {
            disk.self_link.clone()
        };
        for spec in specs {
            clusters
                .entry(spec.cluster_key)
                .or_default()
                .push(EtcdMemberStatus {
                    name: spec.node_name,
                    volume_id: volume_id.clone(),
                });
        }
    }
    clusters
        .into_iter()
        .map(|(name, members)| EtcdClusterStatus { name, members })
        .collect()
}

/// Discovers the etcd clusters of `cluster_name` from the disks of every
/// zone in the handle's region.
///
/// # Errors
///
/// Returns an error if zones or disks cannot be listed.
pub async fn find_etcd_status(
    cloud: &GceCloud,
    cluster_name: &str,
) -> Result<Vec<EtcdClusterStatus>> {
    let filter = format!("labels.{LABEL_CLUSTER_NAME} = {}", safe_cluster_name(cluster_name));
    let mut disks = Vec::new();
    for zone in cloud.zones().await? {
        debug!("Listing disks in {}/{zone}", cloud.project());
        let found = cloud
            .compute()
            .disks()
            .list(cloud.project(), &zone, Some(&filter))
            .await?;
        disks.extend(found);
    }
    Ok(group_members(&disks))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn disk(name: &str, labels: &[(&str, &str)]) -> Disk {
        Disk {
            name: name.to_string(),
            labels: labels
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
            ..Disk::default()
        }
    }

    #[test]
    fn test_spec_label_roundtrip() {
        let spec = EtcdClusterSpec {
            cluster_key: "main".to_string(),
            node_name: "a".to_string(),
            node_names: vec!["a".to_string(), "b".to_string(), "c".to_string()],
        };
        assert_eq!(spec.label_key(), "k8s-io-etcd-main");
        assert_eq!(spec.label_value(), "a-2fa-2cb-2cc");
        let decoded = decode_label(&spec.label_value()).expect("decoded");
        assert_eq!(EtcdClusterSpec::parse("main", &decoded).expect("parsed"), spec);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(EtcdClusterSpec::parse("main", "no-slash").is_err());
        assert!(EtcdClusterSpec::parse("main", "/a,b").is_err());
    }

    #[test]
    fn test_group_members_requires_control_plane_role() {
        let disks = [
            disk(
                "a-etcd-main",
                &[("k8s-io-role-master", "master"), ("k8s-io-etcd-main", "a-2fa-2cb")],
            ),
            disk(
                "b-etcd-main",
                &[
                    ("k8s-io-role-control-plane", "1"),
                    ("k8s-io-etcd-main", "b-2fa-2cb"),
                    ("k8s-io-etcd-events", "b-2fb"),
                ],
            ),
            disk("stray", &[("k8s-io-etcd-main", "c-2fc")]),
            disk(
                "broken",
                &[("k8s-io-role-master", ""), ("k8s-io-etcd-main", "zz-zz")],
            ),
        ];
        let status = group_members(&disks);
        assert_eq!(status.len(), 2);
        assert_eq!(status[0].name, "events");
        assert_eq!(status[1].name, "main");
        let names: Vec<_> = status[1].members.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, ["a", "b"]);
        assert_eq!(status[1].members[0].volume_id, "a-etcd-main");
    }
}
