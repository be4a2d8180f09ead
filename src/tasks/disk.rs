//! Persistent disk task, used for etcd volumes.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;

use crate::cloud::types;
use crate::cloud::url::{GoogleCloudUrl, last_component};
use crate::error::{Result, TaskError};

use super::{Changes, Context, DeclarativeWriter, Lifecycle, Resource, TaskOutput, found};

/// A zonal persistent disk. Only labels change in place.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Disk {
    /// Disk name.
    pub name: String,
    /// Zone.
    pub zone: String,
    /// Disk type, e.g. `pd-ssd`.
    pub volume_type: String,
    /// Size in GB.
    pub size_gb: i64,
    /// Labels.
    pub labels: BTreeMap<String, String>,
    /// Engine treatment.
    #[serde(skip)]
    pub lifecycle: Lifecycle,
}

#[async_trait]
impl Resource for Disk {
    const KIND: &'static str = "Disk";
    const DECLARATIVE_TYPE: &'static str = "google_compute_disk";

    fn name(&self) -> &str {
        &self.name
    }

    fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    async fn find(&self, ctx: &Context<'_>) -> Result<Option<Self>> {
        let disks = ctx.cloud.compute().disks();
        Ok(
            found(disks.get(ctx.project(), &self.zone, &self.name).await)?.map(|disk| Self {
                name: disk.name,
                zone: last_component(&disk.zone).to_string(),
                volume_type: last_component(&disk.disk_type).to_string(),
                size_gb: disk.size_gb,
                labels: disk.labels,
                lifecycle: self.lifecycle,
            }),
        )
    }

    fn check_changes(&self, actual: Option<&Self>, changes: &Changes) -> Result<()> {
        if actual.is_some() {
            return changes.ensure_unchanged(Self::KIND, &["zone", "volume_type", "size_gb"]);
        }
        if self.size_gb <= 0 {
            return Err(
                TaskError::invalid(Self::KIND, &self.name, "size_gb", "must be positive").into(),
            );
        }
        Ok(())
    }

    async fn render_cloud(
        &self,
        ctx: &Context<'_>,
        actual: Option<&Self>,
        changes: &Changes,
    ) -> Result<TaskOutput> {
        let disks = ctx.cloud.compute().disks();
        if actual.is_none() {
            let disk = types::Disk {
                name: self.name.clone(),
                disk_type: GoogleCloudUrl::zonal(
                    ctx.project(),
                    &self.zone,
                    "diskTypes",
                    &self.volume_type,
                )
                .to_string(),
                size_gb: self.size_gb,
                labels: self.labels.clone(),
                ..types::Disk::default()
            };
            let op = disks.insert(ctx.project(), &self.zone, &disk).await?;
            ctx.cloud.wait(&op).await?;
            return Ok(self.output(ctx));
        }

        let mut changes = changes.clone();
        if changes.take("labels") {
            let current = disks.get(ctx.project(), &self.zone, &self.name).await?;
            let op = disks
                .set_labels(
                    ctx.project(),
                    &self.zone,
                    &self.name,
                    &self.labels,
                    current.label_fingerprint.as_deref().unwrap_or_default(),
                )
                .await?;
            ctx.cloud.wait(&op).await?;
        }
        changes.ensure_empty(Self::KIND)?;
        Ok(self.output(ctx))
    }

    fn output(&self, ctx: &Context<'_>) -> TaskOutput {
        TaskOutput::link(
            &self.name,
            GoogleCloudUrl::zonal(ctx.project(), &self.zone, "disks", &self.name).to_string(),
        )
    }

    fn render_declarative(&self, w: &mut DeclarativeWriter) -> Result<()> {
        w.add(
            Self::DECLARATIVE_TYPE,
            &self.name,
            json!({
                "name": self.name,
                "zone": self.zone,
                "type": self.volume_type,
                "size": self.size_gb,
                "labels": self.labels,
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

    fn disk() -> Disk {
        Disk {
            name: "a-etcd-main-c1".into(),
            zone: "us-central1-a".into(),
            volume_type: "pd-ssd".into(),
            size_gb: 20,
            labels: BTreeMap::from([("k8s-io-etcd-main".to_string(), "a-2fa".to_string())]),
            lifecycle: Lifecycle::Sync,
        }
    }

    #[tokio::test]
    async fn test_labels_update_in_place() {
        let sim = MockCloud::new();
        let cloud = sim.cloud("p", "us-central1");
        let outputs = Outputs::new();
        let ctx = Context::new(&cloud, &outputs);
        run_step(&disk(), &ctx, Target::Apply).await.expect("created");

        let mut relabeled = disk();
        relabeled
            .labels
            .insert("k8s-io-role-control-plane".into(), "1".into());
        let outcome = run_step(&relabeled, &ctx, Target::Apply).await.expect("relabeled");
        assert_eq!(outcome.action, Action::Updated);
        let live = cloud
            .compute()
            .disks()
            .get("p", "us-central1-a", "a-etcd-main-c1")
            .await
            .expect("disk");
        assert_eq!(live.labels.len(), 2);
    }

    #[tokio::test]
    async fn test_size_is_immutable() {
        let sim = MockCloud::new();
        let cloud = sim.cloud("p", "us-central1");
        let outputs = Outputs::new();
        let ctx = Context::new(&cloud, &outputs);
        run_step(&disk(), &ctx, Target::Apply).await.expect("created");

        let mut bigger = disk();
        bigger.size_gb = 40;
        let err = run_step(&bigger, &ctx, Target::Apply).await.expect_err("immutable");
        assert!(err.to_string().contains("Disk: size_gb"));
    }
}
