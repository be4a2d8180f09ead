//! Listing of cluster-owned cloud resources for a delete pass.
//!
//! Ownership is decided the way the builders name and label things: names
//! ending in the safe cluster name, the cluster label, the `cluster-name`
//! instance metadata, and the role tags on firewall rules.

use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use tracing::debug;

use crate::cloud::GceCloud;
use crate::cloud::types::InstanceTemplate;
use crate::cloud::naming::{LABEL_CLUSTER_NAME, LABEL_ROLE_PREFIX, safe_cluster_name};
use crate::cloud::url::last_component;
use crate::error::Result;

/// A resource found in the cloud that belongs to the cluster.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct CloudResource {
    /// Kind, e.g. `InstanceTemplate`.
    pub kind: &'static str,
    /// Resource name.
    pub name: String,
    /// Zone or region, empty for global resources.
    pub location: String,
    /// Canonical link.
    pub self_link: String,
}

impl fmt::Display for CloudResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.location.is_empty() {
            write!(f, "{}/{}", self.kind, self.name)
        } else {
            write!(f, "{}/{}/{}", self.kind, self.location, self.name)
        }
    }
}

/// Name matching rules of one cluster.
#[derive(Debug, Clone)]
pub struct ClusterMatcher {
    suffix: String,
    tag_prefix: String,
}

impl ClusterMatcher {
    /// Matcher for `cluster_name`.
    #[must_use]
    pub fn new(cluster_name: &str) -> Self {
        let safe = safe_cluster_name(cluster_name);
        Self {
            suffix: format!("-{safe}"),
            tag_prefix: format!("{safe}-{LABEL_ROLE_PREFIX}"),
        }
    }

    /// Returns true if `name` is a cluster object name.
    #[must_use]
    pub fn owns_name(&self, name: &str) -> bool {
        name.ends_with(&self.suffix)
    }

    /// Returns true if `network_link` is the network the cluster created.
    #[must_use]
    pub fn is_cluster_network(&self, network_link: &str) -> bool {
        last_component(network_link) == &self.suffix[1..]
    }

    /// Returns true if any of `tags` is a role tag of the cluster.
    #[must_use]
    pub fn owns_tags<'a>(&self, mut tags: impl Iterator<Item = &'a String>) -> bool {
        tags.any(|t| t.starts_with(&self.tag_prefix))
    }

    /// Safe cluster name as carried by the cluster label.
    #[must_use]
    pub fn label_value(&self) -> &str {
        &self.suffix[1..]
    }
}

/// Lists the instance templates carrying the cluster's `cluster-name` metadata.
///
/// # Errors
///
/// Returns an error if the listing fails.
pub async fn find_cluster_templates(
    cloud: &GceCloud,
    cluster_name: &str,
) -> Result<Vec<InstanceTemplate>> {
    let templates = cloud.compute().instance_templates().list(cloud.project()).await?;
    Ok(templates
        .into_iter()
        .filter(|t| {
            t.properties.metadata.as_ref().is_some_and(|m| {
                m.items
                    .iter()
                    .any(|i| i.key == "cluster-name" && i.value == cluster_name)
            })
        })
        .collect())
}

/// Lists every cluster-owned resource in the handle's project and region.
///
/// # Errors
///
/// Returns an error if any listing fails.
pub async fn list_cluster_resources(
    cloud: &GceCloud,
    cluster_name: &str,
) -> Result<Vec<CloudResource>> {
    let matcher = ClusterMatcher::new(cluster_name);
    let project = cloud.project();
    let region = cloud.region();
    let compute = cloud.compute();
    let mut found = BTreeSet::new();
    let mut add = |kind: &'static str, name: &str, location: &str, self_link: &str| {
        debug!("Found {kind} {name} owned by {cluster_name}");
        found.insert(CloudResource {
            kind,
            name: name.to_string(),
            location: location.to_string(),
            self_link: self_link.to_string(),
        });
    };

    let mut templates = BTreeSet::new();
    for t in find_cluster_templates(cloud, cluster_name).await? {
        add("InstanceTemplate", &t.name, "", &t.self_link);
        templates.insert(t.name);
    }

    for zone in cloud.zones().await? {
        for igm in compute.instance_group_managers().list(project, &zone).await? {
            if templates.contains(last_component(&igm.instance_template)) {
                add("InstanceGroupManager", &igm.name, &zone, &igm.self_link);
            }
        }
    }

    for pool in compute.target_pools().list(project, region).await? {
        if matcher.owns_name(&pool.name) {
            add("TargetPool", &pool.name, region, &pool.self_link);
        }
    }

    for rule in compute.forwarding_rules().list(project, region).await? {
        let labelled = rule
            .labels
            .get(LABEL_CLUSTER_NAME)
            .is_some_and(|v| v == matcher.label_value());
        if labelled || matcher.owns_name(&rule.name) {
            add("ForwardingRule", &rule.name, region, &rule.self_link);
        }
    }

    for address in compute.addresses().list(project, region).await? {
        if matcher.owns_name(&address.name) {
            add("Address", &address.name, region, &address.self_link);
        }
    }

    for rule in compute.firewalls().list(project).await? {
        let tagged = matcher.owns_tags(rule.target_tags.iter().chain(rule.source_tags.iter()));
        if matcher.owns_name(&rule.name) || tagged {
            add("FirewallRule", &rule.name, "", &rule.self_link);
        }
    }

    for disk in compute.disks().aggregated_list(project).await? {
        let labelled = disk
            .labels
            .get(LABEL_CLUSTER_NAME)
            .is_some_and(|v| v == matcher.label_value());
        if labelled {
            add("Disk", &disk.name, last_component(&disk.zone), &disk.self_link);
        }
    }

    for subnet in compute.subnetworks().list(project, region).await? {
        if matcher.owns_name(&subnet.name) && matcher.is_cluster_network(&subnet.network) {
            add("Subnet", &subnet.name, region, &subnet.self_link);
        }
    }

    for router in compute.routers().list(project, region).await? {
        if matcher.owns_name(&router.name) {
            add("Router", &router.name, region, &router.self_link);
        }
    }

    Ok(found.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matcher() {
        let matcher = ClusterMatcher::new("c1.example.com");
        assert!(matcher.owns_name("api-c1-example-com"));
        assert!(!matcher.owns_name("api-c2-example-com"));
        assert!(matcher.is_cluster_network(
            "https://www.googleapis.com/compute/v1/projects/p/global/networks/c1-example-com"
        ));
        let tags = ["c1-example-com-k8s-io-role-node".to_string()];
        assert!(matcher.owns_tags(tags.iter()));
        assert!(!matcher.owns_tags(["other".to_string()].iter()));
        assert_eq!(matcher.label_value(), "c1-example-com");
    }

    #[test]
    fn test_display() {
        let r = CloudResource {
            kind: "Disk",
            name: "d".to_string(),
            location: "us-central1-a".to_string(),
            self_link: String::new(),
        };
        assert_eq!(r.to_string(), "Disk/us-central1-a/d");
    }
}
