//! End-to-end provisioning of one cluster.
//!
//! Validates the specification, fills in unplanned CIDRs, builds the task
//! graph, and hands it to the engine.

use serde::Serialize;
use tracing::{debug, info};

use crate::cidr;
use crate::config::{ClusterConfig, ConfigHasher, ConfigValidator};
use crate::engine::{Engine, RunReport, Target};
use crate::error::Result;
use crate::model::{ModelContext, build_tasks};

/// Result of a provisioning run.
#[derive(Debug, Clone, Serialize)]
pub struct ProvisionResult {
    /// Hash of the specification as given.
    pub config_hash: String,
    /// Specification with planned CIDRs filled in.
    #[serde(skip)]
    pub planned: ClusterConfig,
    /// Engine report.
    pub report: RunReport,
}

/// Drives the engine from a cluster specification.
#[derive(Debug, Clone)]
pub struct Provisioner {
    engine: Engine,
    validator: ConfigValidator,
    hasher: ConfigHasher,
}

impl Provisioner {
    /// Creates a provisioner running on `engine`.
    #[must_use]
    pub const fn new(engine: Engine) -> Self {
        Self {
            engine,
            validator: ConfigValidator::new(),
            hasher: ConfigHasher::new(),
        }
    }

    /// Returns a copy of `config` with every missing range allocated.
    ///
    /// Exports never read the cloud, so their ranges are planned over an
    /// empty network.
    ///
    /// # Errors
    ///
    /// Returns an error if existing subnets cannot be listed or no range is free.
    pub async fn plan_cidrs(&self, config: &ClusterConfig, target: Target) -> Result<ClusterConfig> {
        let mut planned = config.clone();
        if !cidr::needs_planning(&planned) {
            return Ok(planned);
        }
        if target == Target::Export {
            cidr::assign_cidrs(&mut planned, Vec::new())?;
        } else {
            let network = ModelContext::new(config).network_name();
            cidr::plan(self.engine.cloud(), &network, &mut planned).await?;
        }
        Ok(planned)
    }

    /// Validates `config`, builds its tasks and runs them against `target`.
    ///
    /// Task failures are recorded in the report; see [`RunReport::ensure_success`].
    ///
    /// # Errors
    ///
    /// Returns an error if the specification is invalid, a builder rejects
    /// it, CIDR planning fails, or the tasks cannot be ordered.
    pub async fn run(&self, config: &ClusterConfig, target: Target) -> Result<ProvisionResult> {
        self.validator.validate(config)?;
        let config_hash = self.hasher.hash_config(config)?;
        info!(
            "Provisioning {} ({target:?}, config {})",
            config.name,
            self.hasher.short_hash(&config_hash)
        );

        let planned = self.plan_cidrs(config, target).await?;
        let tasks = build_tasks(&planned)?;
        debug!("Handing {} tasks to the engine", tasks.len());
        let report = self.engine.run(&tasks, target).await?;

        Ok(ProvisionResult {
            config_hash,
            planned,
            report,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineConfig;
    use crate::model::test_support::{MINIMAL, parse};
    use crate::simulator::MockCloud;
    use std::sync::Arc;

    const CONTROL_PLANE: &str = r"
instance_groups:
  - name: control-plane
    role: ControlPlane
    machine_type: e2-medium
    image: ubuntu-os-cloud/ubuntu-2204-lts
    min_size: 1
    zones: [us-central1-a]
";

    fn provisioner(sim: &MockCloud) -> Provisioner {
        let cloud = Arc::new(sim.cloud("testproject", "us-central1"));
        Provisioner::new(Engine::new(cloud, EngineConfig::default()))
    }

    #[tokio::test]
    async fn test_export_plans_cidrs_offline() {
        let yaml = format!(
            "{CONTROL_PLANE}name: c.example.com\nproject: testproject\nregion: us-central1\nnetworking:\n  ip_alias: true\n  subnets:\n    - name: us-central1\n      type: private\n"
        );
        let config = parse(&yaml);
        let sim = MockCloud::new();
        let result = provisioner(&sim)
            .run(&config, Target::Export)
            .await
            .expect("exported");
        assert!(result.report.success);
        assert!(result.report.declarative.is_some());
        assert_eq!(result.planned.networking.pod_cidr.as_deref(), Some("10.4.0.0/14"));
        assert_eq!(result.planned.networking.subnets[0].cidr.as_deref(), Some("10.8.16.0/20"));
        assert!(config.networking.pod_cidr.is_none());
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let mut config = parse(&format!("{MINIMAL}{CONTROL_PLANE}"));
        config.region = String::new();
        let sim = MockCloud::new();
        assert!(provisioner(&sim).run(&config, Target::DryRun).await.is_err());
    }

    #[tokio::test]
    async fn test_hash_is_of_input() {
        let config = parse(&format!("{MINIMAL}{CONTROL_PLANE}"));
        let sim = MockCloud::new();
        let result = provisioner(&sim)
            .run(&config, Target::DryRun)
            .await
            .expect("planned");
        assert_eq!(
            result.config_hash,
            ConfigHasher::new().hash_config(&config).expect("hash")
        );
        assert!(result.report.changed > 0);
    }
}
