//! Target pool and pool health check tasks.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;

use crate::cloud::types;
use crate::cloud::url::{GoogleCloudUrl, last_component};
use crate::error::Result;

use super::{
    Changes, Context, DeclarativeWriter, HttpHealthCheck, Lifecycle, Ref, Resource, TaskKey,
    TaskOutput, found,
};

/// A legacy regional target pool.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TargetPool {
    /// Pool name.
    pub name: String,
    /// Region.
    pub region: String,
    /// Engine treatment.
    #[serde(skip)]
    pub lifecycle: Lifecycle,
}

#[async_trait]
impl Resource for TargetPool {
    const KIND: &'static str = "TargetPool";
    const DECLARATIVE_TYPE: &'static str = "google_compute_target_pool";

    fn name(&self) -> &str {
        &self.name
    }

    fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    async fn find(&self, ctx: &Context<'_>) -> Result<Option<Self>> {
        let pools = ctx.cloud.compute().target_pools();
        Ok(
            found(pools.get(ctx.project(), &self.region, &self.name).await)?.map(|pool| Self {
                name: pool.name,
                region: last_component(&pool.region).to_string(),
                lifecycle: self.lifecycle,
            }),
        )
    }

    fn check_changes(&self, actual: Option<&Self>, changes: &Changes) -> Result<()> {
        match actual {
            Some(_) => changes.ensure_empty(Self::KIND),
            None => Ok(()),
        }
    }

    async fn render_cloud(
        &self,
        ctx: &Context<'_>,
        _actual: Option<&Self>,
        _changes: &Changes,
    ) -> Result<TaskOutput> {
        let pool = types::TargetPool {
            name: self.name.clone(),
            ..types::TargetPool::default()
        };
        let op = ctx
            .cloud
            .compute()
            .target_pools()
            .insert(ctx.project(), &self.region, &pool)
            .await?;
        ctx.cloud.wait(&op).await?;
        Ok(self.output(ctx))
    }

    fn output(&self, ctx: &Context<'_>) -> TaskOutput {
        TaskOutput::link(
            &self.name,
            GoogleCloudUrl::regional(ctx.project(), &self.region, "targetPools", &self.name)
                .to_string(),
        )
    }

    fn render_declarative(&self, w: &mut DeclarativeWriter) -> Result<()> {
        w.add(
            Self::DECLARATIVE_TYPE,
            &self.name,
            json!({ "name": self.name, "region": self.region }),
        );
        Ok(())
    }
}

/// Attachment of an HTTP health check to a target pool.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PoolHealthCheck {
    /// Attachment name.
    pub name: String,
    /// Region of the pool.
    pub region: String,
    /// The pool.
    pub pool: Ref<TargetPool>,
    /// The check.
    pub health_check: Ref<HttpHealthCheck>,
    /// Engine treatment.
    #[serde(skip)]
    pub lifecycle: Lifecycle,
}

#[async_trait]
impl Resource for PoolHealthCheck {
    const KIND: &'static str = "PoolHealthCheck";
    const DECLARATIVE_TYPE: &'static str = "google_compute_target_pool";

    fn name(&self) -> &str {
        &self.name
    }

    fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    fn dependencies(&self) -> Vec<TaskKey> {
        vec![self.pool.key(), self.health_check.key()]
    }

    async fn find(&self, ctx: &Context<'_>) -> Result<Option<Self>> {
        let pools = ctx.cloud.compute().target_pools();
        let Some(pool) = found(pools.get(ctx.project(), &self.region, self.pool.name()).await)?
        else {
            return Ok(None);
        };
        let attached = pool
            .health_checks
            .iter()
            .any(|link| ctx.is_link_of(&self.health_check, link));
        Ok(attached.then(|| self.clone()))
    }

    fn check_changes(&self, _actual: Option<&Self>, _changes: &Changes) -> Result<()> {
        Ok(())
    }

    async fn render_cloud(
        &self,
        ctx: &Context<'_>,
        _actual: Option<&Self>,
        _changes: &Changes,
    ) -> Result<TaskOutput> {
        let link = ctx.link(&self.health_check)?;
        let op = ctx
            .cloud
            .compute()
            .target_pools()
            .add_health_check(ctx.project(), &self.region, self.pool.name(), &link)
            .await?;
        ctx.cloud.wait(&op).await?;
        Ok(self.output(ctx))
    }

    fn output(&self, ctx: &Context<'_>) -> TaskOutput {
        TaskOutput::link(
            &self.name,
            GoogleCloudUrl::regional(ctx.project(), &self.region, "targetPools", self.pool.name())
                .to_string(),
        )
    }

    /// Adds the check to the pool's block rather than writing a block of its own.
    fn render_declarative(&self, w: &mut DeclarativeWriter) -> Result<()> {
        w.add(
            Self::DECLARATIVE_TYPE,
            self.pool.name(),
            json!({
                "health_checks": [DeclarativeWriter::reference(&self.health_check, "name")],
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

    #[tokio::test]
    async fn test_pool_health_check_attaches_once() {
        let sim = MockCloud::new();
        let cloud = sim.cloud("p", "us-central1");
        let pool = TargetPool {
            name: "api-c1".into(),
            region: "us-central1".into(),
            lifecycle: Lifecycle::Sync,
        };
        let check = HttpHealthCheck {
            name: "api-c1".into(),
            port: 3990,
            request_path: "/healthz".into(),
            lifecycle: Lifecycle::Sync,
        };
        let mut outputs = Outputs::new();
        {
            let ctx = Context::new(&cloud, &outputs);
            let p = run_step(&pool, &ctx, Target::Apply).await.expect("pool");
            let c = run_step(&check, &ctx, Target::Apply).await.expect("check");
            outputs.insert(TaskKey::of::<TargetPool>("api-c1"), p.output);
            outputs.insert(TaskKey::of::<HttpHealthCheck>("api-c1"), c.output);
        }
        let ctx = Context::new(&cloud, &outputs);
        let attach = PoolHealthCheck {
            name: "api-c1".into(),
            region: "us-central1".into(),
            pool: Ref::new("api-c1"),
            health_check: Ref::new("api-c1"),
            lifecycle: Lifecycle::Sync,
        };
        let first = run_step(&attach, &ctx, Target::Apply).await.expect("attached");
        assert_eq!(first.action, Action::Created);
        let second = run_step(&attach, &ctx, Target::Apply).await.expect("found");
        assert_eq!(second.action, Action::Unchanged);

        let live = cloud
            .compute()
            .target_pools()
            .get("p", "us-central1", "api-c1")
            .await
            .expect("pool");
        assert_eq!(live.health_checks.len(), 1);
    }
}
