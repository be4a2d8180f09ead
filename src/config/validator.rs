//! Configuration validation for cluster specifications.
//!
//! Catches specification mistakes before any task is built, so that errors
//! name the offending field instead of surfacing as a cloud rejection.

use crate::cidr::is_valid_cidr;
use crate::cloud::naming::MAX_NAME_LENGTH;
use crate::cloud::url::zone_to_region;
use crate::error::{ConfigError, InfraError, Result};
use crate::tasks::instance_template::{MAX_METADATA_TOTAL_BYTES, MAX_METADATA_VALUE_BYTES};
use std::collections::HashSet;
use tracing::debug;

use super::spec::{
    ClusterConfig, DnsType, InstanceGroupConfig, InstanceGroupRole, LoadBalancerType,
};

/// Validation result containing all errors found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl ValidationResult {
    fn error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ValidationError {
            field: field.into(),
            message: message.into(),
        });
    }
}

/// Validator for cluster specifications.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfigValidator;

impl ConfigValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates a cluster specification.
    ///
    /// # Errors
    ///
    /// Returns the first error found; all errors and warnings are collected
    /// by [`Self::check`].
    pub fn validate(&self, config: &ClusterConfig) -> Result<ValidationResult> {
        let result = self.check(config);
        if let Some(first) = result.errors.first() {
            return Err(InfraError::Config(ConfigError::ValidationError {
                message: first.message.clone(),
                field: Some(first.field.clone()),
            }));
        }
        debug!("Configuration validation passed");
        Ok(result)
    }

    /// Collects every error and warning in `config`.
    #[must_use]
    pub fn check(&self, config: &ClusterConfig) -> ValidationResult {
        let mut result = ValidationResult::default();
        Self::validate_cluster(config, &mut result);
        Self::validate_networking(config, &mut result);
        Self::validate_access(config, &mut result);
        Self::validate_instance_groups(config, &mut result);
        Self::validate_etcd(config, &mut result);
        result
    }

    fn validate_cluster(config: &ClusterConfig, result: &mut ValidationResult) {
        if config.name.is_empty() {
            result.error("name", "Cluster name cannot be empty");
        } else if !config
            .name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.')
        {
            result.error(
                "name",
                format!(
                    "Cluster name '{}' is invalid. Must be lowercase alphanumeric with dots and hyphens.",
                    config.name
                ),
            );
        }
        if config.project.is_empty() {
            result.error("project", "Project cannot be empty");
        }
        if config.region.is_empty() {
            result.error("region", "Region cannot be empty");
        }
        if let Some(base) = &config.config_base {
            if !base.starts_with("gs://") {
                result.warnings.push(format!(
                    "config_base '{base}' is not a gs:// path; no bucket permissions will be granted"
                ));
            }
        }
        if config.dns.dns_type == DnsType::Private && config.dns.zone.is_none() {
            result.error("dns.zone", "A private DNS zone name is required");
        }
    }

    fn validate_networking(config: &ClusterConfig, result: &mut ValidationResult) {
        let net = &config.networking;
        for (field, cidr) in [("networking.pod_cidr", &net.pod_cidr), ("networking.service_cidr", &net.service_cidr)] {
            if let Some(cidr) = cidr {
                if !is_valid_cidr(cidr) {
                    result.error(field, format!("Invalid CIDR '{cidr}'"));
                }
            }
        }
        if !net.ip_alias && (net.pod_cidr.is_some() || net.service_cidr.is_some()) {
            result
                .warnings
                .push("pod and service CIDRs only become subnet ranges with ip_alias".to_string());
        }

        let mut names = HashSet::new();
        for (i, subnet) in net.subnets.iter().enumerate() {
            let field = format!("networking.subnets[{i}]");
            if !names.insert(subnet.name.as_str()) {
                result.error(&field, format!("Duplicate subnet name '{}'", subnet.name));
            }
            match (&subnet.cidr, &subnet.id) {
                (Some(cidr), _) if !is_valid_cidr(cidr) => {
                    result.error(format!("{field}.cidr"), format!("Invalid CIDR '{cidr}'"));
                }
                (None, None) if !net.ip_alias => {
                    result.error(
                        format!("{field}.cidr"),
                        "A CIDR is required unless ip_alias allocates one",
                    );
                }
                _ => {}
            }
        }
    }

    fn validate_access(config: &ClusterConfig, result: &mut ValidationResult) {
        let lists = [
            ("api.access", &config.api.access),
            ("ssh_access", &config.ssh_access),
            ("node_port_access", &config.node_port_access),
        ];
        for (field, cidrs) in lists {
            for cidr in cidrs.iter().filter(|c| !is_valid_cidr(c)) {
                result.error(field, format!("Invalid CIDR '{cidr}'"));
            }
        }
        if let Some(lb) = &config.api.load_balancer {
            if lb.lb_type == LoadBalancerType::Internal {
                result.error(
                    "api.load_balancer.type",
                    "Internal API load balancers are not supported",
                );
            }
        }
    }

    fn validate_instance_groups(config: &ClusterConfig, result: &mut ValidationResult) {
        if !config.instance_groups.is_empty() && !config.has_role(InstanceGroupRole::ControlPlane)
        {
            result.error(
                "instance_groups",
                "At least one ControlPlane instance group is required",
            );
        }

        let mut names = HashSet::new();
        for (i, group) in config.instance_groups.iter().enumerate() {
            let field = format!("instance_groups[{i}]");
            if !names.insert(group.name.as_str()) {
                result.error(&field, format!("Duplicate instance group name '{}'", group.name));
            }
            Self::validate_group(config, group, &field, result);
        }
    }

    fn validate_group(
        config: &ClusterConfig,
        group: &InstanceGroupConfig,
        field: &str,
        result: &mut ValidationResult,
    ) {
        if group.name.is_empty() || group.name.len() > MAX_NAME_LENGTH {
            result.error(
                format!("{field}.name"),
                format!("Instance group name must be 1 to {MAX_NAME_LENGTH} characters"),
            );
        }
        if group.machine_type.is_empty() {
            result.error(format!("{field}.machine_type"), "Machine type is required");
        }
        if group.image.is_empty() {
            result.error(format!("{field}.image"), "Image is required");
        }
        if group.min_size < 0 {
            result.error(format!("{field}.min_size"), "Minimum size cannot be negative");
        }
        if let Some(max) = group.max_size {
            if max < group.min_size {
                result.error(
                    format!("{field}.max_size"),
                    format!("Maximum size {max} is below minimum size {}", group.min_size),
                );
            }
        }
        if group.zones.is_empty() {
            result.error(format!("{field}.zones"), "At least one zone is required");
        }
        for zone in &group.zones {
            if zone_to_region(zone) != config.region {
                result.error(
                    format!("{field}.zones"),
                    format!("Zone '{zone}' is not in region '{}'", config.region),
                );
            }
        }
        for subnet in &group.subnets {
            if config.subnet(subnet).is_none() {
                result.error(
                    format!("{field}.subnets"),
                    format!("Subnet '{subnet}' is not declared in networking.subnets"),
                );
            }
        }
        if let Some(script) = &group.startup_script {
            if script.len() > MAX_METADATA_VALUE_BYTES {
                result.error(
                    format!("{field}.startup_script"),
                    format!("Startup script exceeds {MAX_METADATA_VALUE_BYTES} bytes"),
                );
            }
        }
        let ssh_keys: usize = config.ssh_public_keys.iter().map(|k| k.len() + 1).sum();
        let script = group.startup_script.as_ref().map_or(0, String::len);
        if ssh_keys + script > MAX_METADATA_TOTAL_BYTES {
            result.error(
                format!("{field}.startup_script"),
                format!("Instance metadata exceeds {MAX_METADATA_TOTAL_BYTES} bytes"),
            );
        }
        if group.preemptible
            && group
                .provisioning_model
                .as_deref()
                .is_some_and(|m| m != "SPOT")
        {
            result.warnings.push(format!(
                "{field}: preemptible with provisioning model other than SPOT"
            ));
        }
    }

    fn validate_etcd(config: &ClusterConfig, result: &mut ValidationResult) {
        for (i, cluster) in config.etcd_clusters.iter().enumerate() {
            let field = format!("etcd_clusters[{i}]");
            if cluster.members.is_empty() {
                result.error(&field, format!("Etcd cluster '{}' has no members", cluster.name));
            }
            if cluster.members.len() % 2 == 0 && !cluster.members.is_empty() {
                result.warnings.push(format!(
                    "Etcd cluster '{}' has an even number of members",
                    cluster.name
                ));
            }
            for member in &cluster.members {
                if zone_to_region(&member.zone) != config.region {
                    result.error(
                        format!("{field}.members"),
                        format!("Zone '{}' is not in region '{}'", member.zone, config.region),
                    );
                }
                if member.volume_size_gb <= 0 {
                    result.error(
                        format!("{field}.members"),
                        format!("Member '{}' needs a positive volume size", member.name),
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigParser;

    fn parse(yaml: &str) -> ClusterConfig {
        ConfigParser::new().parse_yaml(yaml, None).expect("valid yaml")
    }

    const VALID: &str = r"
name: c1.example.com
project: p
region: us-central1
config_base: gs://state/c1.example.com
networking:
  subnets:
    - name: us-central1
      cidr: 10.0.1.0/24
node_port_access: ['0.0.0.0/0', '::/0']
instance_groups:
  - name: control-plane
    role: ControlPlane
    machine_type: e2-medium
    image: ubuntu-os-cloud/ubuntu-2204
    min_size: 1
    zones: [us-central1-a]
    subnets: [us-central1]
";

    #[test]
    fn test_valid_config() {
        let result = ConfigValidator::new()
            .validate(&parse(VALID))
            .expect("valid");
        assert!(result.errors.is_empty());
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_zone_outside_region() {
        let yaml = VALID.replace("us-central1-a", "europe-west1-b");
        let err = ConfigValidator::new()
            .validate(&parse(&yaml))
            .expect_err("bad zone");
        assert!(err.to_string().contains("not in region"));
    }

    #[test]
    fn test_collects_all_errors() {
        let yaml = r"
name: C1
project: p
region: us-central1
api:
  load_balancer:
    type: Internal
ssh_access: [not-a-cidr]
networking:
  subnets:
    - name: a
instance_groups:
  - name: nodes
    role: Node
    machine_type: e2-medium
    image: img
    min_size: 3
    max_size: 1
    subnets: [missing]
";
        let result = ConfigValidator::new().check(&parse(yaml));
        let fields: Vec<_> = result.errors.iter().map(|e| e.field.as_str()).collect();
        assert!(fields.contains(&"name"));
        assert!(fields.contains(&"ssh_access"));
        assert!(fields.contains(&"api.load_balancer.type"));
        assert!(fields.contains(&"networking.subnets[0].cidr"));
        assert!(fields.contains(&"instance_groups"));
        assert!(fields.contains(&"instance_groups[0].max_size"));
        assert!(fields.contains(&"instance_groups[0].zones"));
        assert!(fields.contains(&"instance_groups[0].subnets"));
    }

    #[test]
    fn test_non_bucket_config_base_warns() {
        let yaml = VALID.replace("gs://state/c1.example.com", "file:///tmp/state");
        let result = ConfigValidator::new()
            .validate(&parse(&yaml))
            .expect("valid");
        assert_eq!(result.warnings.len(), 1);
    }
}
