//! Managed instance group task.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeSet;
use tracing::info;

use crate::cloud::types;
use crate::cloud::url::{GoogleCloudUrl, last_component};
use crate::error::Result;

use super::{
    Changes, Context, DeclarativeWriter, InstanceTemplate, Lifecycle, Ref, Resource, TaskKey,
    TaskOutput, TargetPool, found,
};

/// A zonal managed instance group.
///
/// Only the size, the template and the target pools can change in place.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstanceGroupManager {
    /// Group name.
    pub name: String,
    /// Zone.
    pub zone: String,
    /// Prefix of instance names.
    pub base_instance_name: String,
    /// Desired size.
    pub target_size: i64,
    /// Template the group creates instances from.
    pub instance_template: Ref<InstanceTemplate>,
    /// Target pools the instances join.
    pub target_pools: BTreeSet<Ref<TargetPool>>,
    /// Engine treatment.
    #[serde(skip)]
    pub lifecycle: Lifecycle,
}

impl InstanceGroupManager {
    fn pool_links(&self, ctx: &Context<'_>) -> Result<Vec<String>> {
        self.target_pools.iter().map(|p| ctx.link(p)).collect()
    }
}

#[async_trait]
impl Resource for InstanceGroupManager {
    const KIND: &'static str = "InstanceGroupManager";
    const DECLARATIVE_TYPE: &'static str = "google_compute_instance_group_manager";

    fn name(&self) -> &str {
        &self.name
    }

    fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    fn dependencies(&self) -> Vec<TaskKey> {
        let mut deps = vec![self.instance_template.key()];
        deps.extend(self.target_pools.iter().map(Ref::key));
        deps
    }

    async fn find(&self, ctx: &Context<'_>) -> Result<Option<Self>> {
        let igms = ctx.cloud.compute().instance_group_managers();
        let Some(igm) = found(igms.get(ctx.project(), &self.zone, &self.name).await)? else {
            return Ok(None);
        };
        let instance_template = if ctx.is_link_of(&self.instance_template, &igm.instance_template)
        {
            self.instance_template.clone()
        } else {
            Ref::new(last_component(&igm.instance_template))
        };
        Ok(Some(Self {
            name: igm.name,
            zone: last_component(&igm.zone).to_string(),
            base_instance_name: igm.base_instance_name,
            target_size: igm.target_size,
            instance_template,
            target_pools: igm
                .target_pools
                .iter()
                .map(|link| Ref::new(last_component(link)))
                .collect(),
            lifecycle: self.lifecycle,
        }))
    }

    fn check_changes(&self, actual: Option<&Self>, changes: &Changes) -> Result<()> {
        match actual {
            Some(_) => changes.ensure_unchanged(Self::KIND, &["zone", "base_instance_name"]),
            None => Ok(()),
        }
    }

    async fn render_cloud(
        &self,
        ctx: &Context<'_>,
        actual: Option<&Self>,
        changes: &Changes,
    ) -> Result<TaskOutput> {
        let igms = ctx.cloud.compute().instance_group_managers();
        let (project, zone, name) = (ctx.project(), self.zone.as_str(), self.name.as_str());

        if actual.is_none() {
            let igm = types::InstanceGroupManager {
                name: self.name.clone(),
                base_instance_name: self.base_instance_name.clone(),
                instance_template: ctx.link(&self.instance_template)?,
                target_size: self.target_size,
                target_pools: self.pool_links(ctx)?,
                ..types::InstanceGroupManager::default()
            };
            let op = igms.insert(project, zone, &igm).await?;
            ctx.cloud.wait(&op).await?;
            return Ok(self.output(ctx));
        }

        let mut changes = changes.clone();
        if changes.take("target_size") {
            info!("Resizing {name} to {}", self.target_size);
            let op = igms.resize(project, zone, name, self.target_size).await?;
            ctx.cloud.wait(&op).await?;
        }
        if changes.take("instance_template") {
            let template = ctx.link(&self.instance_template)?;
            info!("Switching {name} to template {}", last_component(&template));
            let op = igms
                .set_instance_template(project, zone, name, &template)
                .await?;
            ctx.cloud.wait(&op).await?;
        }
        if changes.take("target_pools") {
            let op = igms
                .set_target_pools(project, zone, name, &self.pool_links(ctx)?)
                .await?;
            ctx.cloud.wait(&op).await?;
        }
        changes.ensure_empty(Self::KIND)?;
        Ok(self.output(ctx))
    }

    fn output(&self, ctx: &Context<'_>) -> TaskOutput {
        TaskOutput {
            instance_group: Some(
                GoogleCloudUrl::zonal(ctx.project(), &self.zone, "instanceGroups", &self.name)
                    .to_string(),
            ),
            ..TaskOutput::link(
                &self.name,
                GoogleCloudUrl::zonal(
                    ctx.project(),
                    &self.zone,
                    "instanceGroupManagers",
                    &self.name,
                )
                .to_string(),
            )
        }
    }

    fn render_declarative(&self, w: &mut DeclarativeWriter) -> Result<()> {
        let pools: Vec<_> = self
            .target_pools
            .iter()
            .map(|p| DeclarativeWriter::reference(p, "self_link"))
            .collect();
        w.add(
            Self::DECLARATIVE_TYPE,
            &self.name,
            json!({
                "name": self.name,
                "zone": self.zone,
                "base_instance_name": self.base_instance_name,
                "version": [{
                    "instance_template":
                        DeclarativeWriter::reference(&self.instance_template, "self_link"),
                }],
                "target_size": self.target_size,
                "target_pools": pools,
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

    const TEMPLATES: &str = "https://www.googleapis.com/compute/v1/projects/p/global/instanceTemplates/";

    fn igm() -> InstanceGroupManager {
        InstanceGroupManager {
            name: "a-nodes-c1".into(),
            zone: "us-central1-a".into(),
            base_instance_name: "nodes".into(),
            target_size: 2,
            instance_template: Ref::new("nodes-c1"),
            target_pools: BTreeSet::new(),
            lifecycle: Lifecycle::Sync,
        }
    }

    async fn seed_template(sim: &MockCloud, name: &str) {
        let cloud = sim.cloud("p", "us-central1");
        let op = cloud
            .compute()
            .instance_templates()
            .insert(
                "p",
                &types::InstanceTemplate {
                    name: name.into(),
                    ..types::InstanceTemplate::default()
                },
            )
            .await
            .expect("template");
        cloud.wait(&op).await.expect("done");
    }

    fn outputs_with_template(name: &str) -> Outputs {
        Outputs::from([(
            TaskKey::of::<InstanceTemplate>("nodes-c1"),
            TaskOutput::link(name, format!("{TEMPLATES}{name}")),
        )])
    }

    #[tokio::test]
    async fn test_resize_and_template_switch_in_place() {
        let sim = MockCloud::new();
        seed_template(&sim, "nodes-c1-100").await;
        seed_template(&sim, "nodes-c1-200").await;
        let cloud = sim.cloud("p", "us-central1");

        let first = outputs_with_template("nodes-c1-100");
        let ctx = Context::new(&cloud, &first);
        run_step(&igm(), &ctx, Target::Apply).await.expect("created");
        let unchanged = run_step(&igm(), &ctx, Target::Apply).await.expect("stable");
        assert_eq!(unchanged.action, Action::Unchanged);

        let second = outputs_with_template("nodes-c1-200");
        let ctx = Context::new(&cloud, &second);
        let mut bigger = igm();
        bigger.target_size = 5;
        let outcome = run_step(&bigger, &ctx, Target::Apply).await.expect("updated");
        assert_eq!(outcome.action, Action::Updated);
        assert_eq!(outcome.changes, ["instance_template", "target_size"]);

        let live = cloud
            .compute()
            .instance_group_managers()
            .get("p", "us-central1-a", "a-nodes-c1")
            .await
            .expect("igm");
        assert_eq!(live.target_size, 5);
        assert!(live.instance_template.ends_with("/nodes-c1-200"));
    }

    #[tokio::test]
    async fn test_zone_cannot_change() {
        let sim = MockCloud::new();
        seed_template(&sim, "nodes-c1-100").await;
        let cloud = sim.cloud("p", "us-central1");
        let outputs = outputs_with_template("nodes-c1-100");
        let ctx = Context::new(&cloud, &outputs);
        run_step(&igm(), &ctx, Target::Apply).await.expect("created");

        let mut renamed = igm();
        renamed.base_instance_name = "workers".into();
        let err = run_step(&renamed, &ctx, Target::Apply)
            .await
            .expect_err("immutable");
        assert_eq!(
            err.to_string(),
            "Task error: cannot apply changes to InstanceGroupManager: base_instance_name"
        );
    }

    #[test]
    fn test_declarative_references_template() {
        let mut w = DeclarativeWriter::new();
        igm().render_declarative(&mut w).expect("rendered");
        let block = w
            .block("google_compute_instance_group_manager", "a-nodes-c1")
            .expect("block");
        assert_eq!(
            block["version"][0]["instance_template"],
            "${google_compute_instance_template.nodes-c1.self_link}"
        );
    }
}
