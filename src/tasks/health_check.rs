//! Health check and backend service tasks.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;

use crate::cloud::types::{self, Backend, TcpHealthCheck};
use crate::cloud::url::{GoogleCloudUrl, Scope, last_component};
use crate::error::Result;

use super::{
    Changes, Context, DeclarativeWriter, InstanceGroupManager, Lifecycle, Ref, Resource, TaskKey,
    TaskOutput, found,
};

// ============================================================================
// Legacy HTTP health check
// ============================================================================

/// A legacy HTTP health check, as used by target pools.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HttpHealthCheck {
    /// Check name.
    pub name: String,
    /// Probed port.
    pub port: i64,
    /// Probed path.
    pub request_path: String,
    /// Engine treatment.
    #[serde(skip)]
    pub lifecycle: Lifecycle,
}

#[async_trait]
impl Resource for HttpHealthCheck {
    const KIND: &'static str = "HttpHealthCheck";
    const DECLARATIVE_TYPE: &'static str = "google_compute_http_health_check";

    fn name(&self) -> &str {
        &self.name
    }

    fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    async fn find(&self, ctx: &Context<'_>) -> Result<Option<Self>> {
        let checks = ctx.cloud.compute().http_health_checks();
        Ok(found(checks.get(ctx.project(), &self.name).await)?.map(|check| Self {
            name: check.name,
            port: check.port,
            request_path: check.request_path,
            lifecycle: self.lifecycle,
        }))
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
        let check = types::HttpHealthCheck {
            name: self.name.clone(),
            port: self.port,
            request_path: self.request_path.clone(),
            ..types::HttpHealthCheck::default()
        };
        let op = ctx
            .cloud
            .compute()
            .http_health_checks()
            .insert(ctx.project(), &check)
            .await?;
        ctx.cloud.wait(&op).await?;
        Ok(self.output(ctx))
    }

    fn output(&self, ctx: &Context<'_>) -> TaskOutput {
        TaskOutput::link(
            &self.name,
            GoogleCloudUrl::global(ctx.project(), "httpHealthChecks", &self.name).to_string(),
        )
    }

    fn render_declarative(&self, w: &mut DeclarativeWriter) -> Result<()> {
        w.add(
            Self::DECLARATIVE_TYPE,
            &self.name,
            json!({
                "name": self.name,
                "port": self.port,
                "request_path": self.request_path,
            }),
        );
        Ok(())
    }
}

// ============================================================================
// TCP health check
// ============================================================================

/// A TCP health check. An empty `region` means a global check.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthCheck {
    /// Check name.
    pub name: String,
    /// Region, empty for global.
    pub region: String,
    /// Probed port.
    pub port: i64,
    /// Engine treatment.
    #[serde(skip)]
    pub lifecycle: Lifecycle,
}

#[async_trait]
impl Resource for HealthCheck {
    const KIND: &'static str = "HealthCheck";
    const DECLARATIVE_TYPE: &'static str = "google_compute_health_check";

    fn name(&self) -> &str {
        &self.name
    }

    fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    async fn find(&self, ctx: &Context<'_>) -> Result<Option<Self>> {
        let checks = ctx.cloud.compute().health_checks();
        Ok(
            found(checks.get(ctx.project(), &self.region, &self.name).await)?.map(|check| Self {
                name: check.name,
                region: last_component(&check.region).to_string(),
                port: check.tcp_health_check.map_or(0, |tcp| tcp.port),
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
        let check = types::HealthCheck {
            name: self.name.clone(),
            check_type: "TCP".to_string(),
            tcp_health_check: Some(TcpHealthCheck { port: self.port }),
            ..types::HealthCheck::default()
        };
        let op = ctx
            .cloud
            .compute()
            .health_checks()
            .insert(ctx.project(), &self.region, &check)
            .await?;
        ctx.cloud.wait(&op).await?;
        Ok(self.output(ctx))
    }

    fn output(&self, ctx: &Context<'_>) -> TaskOutput {
        TaskOutput::link(
            &self.name,
            GoogleCloudUrl::new(
                ctx.project(),
                Scope::regional_or_global(&self.region),
                "healthChecks",
                &self.name,
            )
            .to_string(),
        )
    }

    fn render_declarative(&self, w: &mut DeclarativeWriter) -> Result<()> {
        let mut block = json!({
            "name": self.name,
            "tcp_health_check": { "port": self.port },
        });
        if !self.region.is_empty() {
            block["region"] = json!(self.region);
        }
        w.add(Self::DECLARATIVE_TYPE, &self.name, block);
        Ok(())
    }
}

// ============================================================================
// Backend service
// ============================================================================

/// A backend service over managed instance groups. An empty `region` means
/// a global service.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackendService {
    /// Service name.
    pub name: String,
    /// Region, empty for global.
    pub region: String,
    /// Protocol, e.g. `TCP`.
    pub protocol: String,
    /// `EXTERNAL` or `INTERNAL`.
    pub load_balancing_scheme: String,
    /// Health checks.
    pub health_checks: Vec<Ref<HealthCheck>>,
    /// Instance groups behind the service.
    pub backends: Vec<Ref<InstanceGroupManager>>,
    /// Engine treatment.
    #[serde(skip)]
    pub lifecycle: Lifecycle,
}

impl BackendService {
    fn to_wire(&self, ctx: &Context<'_>) -> Result<types::BackendService> {
        let health_checks = self
            .health_checks
            .iter()
            .map(|hc| ctx.link(hc))
            .collect::<Result<Vec<_>>>()?;
        let backends = self
            .backends
            .iter()
            .map(|igm| {
                let output = ctx.output(igm)?;
                Ok(Backend {
                    group: output
                        .instance_group
                        .clone()
                        .unwrap_or_else(|| output.self_link.clone()),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(types::BackendService {
            name: self.name.clone(),
            protocol: self.protocol.clone(),
            load_balancing_scheme: self.load_balancing_scheme.clone(),
            health_checks,
            backends,
            ..types::BackendService::default()
        })
    }
}

#[async_trait]
impl Resource for BackendService {
    const KIND: &'static str = "BackendService";
    const DECLARATIVE_TYPE: &'static str = "google_compute_region_backend_service";

    fn name(&self) -> &str {
        &self.name
    }

    fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    fn dependencies(&self) -> Vec<TaskKey> {
        self.health_checks
            .iter()
            .map(Ref::key)
            .chain(self.backends.iter().map(Ref::key))
            .collect()
    }

    async fn find(&self, ctx: &Context<'_>) -> Result<Option<Self>> {
        let services = ctx.cloud.compute().backend_services();
        Ok(
            found(services.get(ctx.project(), &self.region, &self.name).await)?.map(|service| {
                Self {
                    name: service.name,
                    region: last_component(&service.region).to_string(),
                    protocol: service.protocol,
                    load_balancing_scheme: service.load_balancing_scheme,
                    health_checks: service
                        .health_checks
                        .iter()
                        .map(|link| Ref::new(last_component(link)))
                        .collect(),
                    backends: service
                        .backends
                        .iter()
                        .map(|b| Ref::new(last_component(&b.group)))
                        .collect(),
                    lifecycle: self.lifecycle,
                }
            }),
        )
    }

    fn check_changes(&self, actual: Option<&Self>, changes: &Changes) -> Result<()> {
        match actual {
            Some(_) => changes.ensure_unchanged(
                Self::KIND,
                &["region", "protocol", "load_balancing_scheme"],
            ),
            None => Ok(()),
        }
    }

    async fn render_cloud(
        &self,
        ctx: &Context<'_>,
        actual: Option<&Self>,
        _changes: &Changes,
    ) -> Result<TaskOutput> {
        let services = ctx.cloud.compute().backend_services();
        let service = self.to_wire(ctx)?;
        let op = if actual.is_some() {
            services.update(ctx.project(), &self.region, &service).await?
        } else {
            services.insert(ctx.project(), &self.region, &service).await?
        };
        ctx.cloud.wait(&op).await?;
        Ok(self.output(ctx))
    }

    fn output(&self, ctx: &Context<'_>) -> TaskOutput {
        TaskOutput::link(
            &self.name,
            GoogleCloudUrl::new(
                ctx.project(),
                Scope::regional_or_global(&self.region),
                "backendServices",
                &self.name,
            )
            .to_string(),
        )
    }

    fn render_declarative(&self, w: &mut DeclarativeWriter) -> Result<()> {
        let health_checks: Vec<_> = self
            .health_checks
            .iter()
            .map(|hc| DeclarativeWriter::reference(hc, "self_link"))
            .collect();
        let backends: Vec<_> = self
            .backends
            .iter()
            .map(|igm| json!({ "group": DeclarativeWriter::reference(igm, "instance_group") }))
            .collect();
        w.add(
            Self::DECLARATIVE_TYPE,
            &self.name,
            json!({
                "name": self.name,
                "region": self.region,
                "protocol": self.protocol,
                "load_balancing_scheme": self.load_balancing_scheme,
                "health_checks": health_checks,
                "backend": backends,
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
    async fn test_backend_service_tracks_group_links() {
        let sim = MockCloud::new();
        let cloud = sim.cloud("p", "us-central1");
        let check = HealthCheck {
            name: "api-c1".into(),
            region: "us-central1".into(),
            port: 443,
            lifecycle: Lifecycle::Sync,
        };
        let mut outputs = Outputs::new();
        {
            let ctx = Context::new(&cloud, &outputs);
            let created = run_step(&check, &ctx, Target::Apply).await.expect("check");
            outputs.insert(TaskKey::of::<HealthCheck>("api-c1"), created.output);
        }
        outputs.insert(
            TaskKey::of::<InstanceGroupManager>("a-master-c1"),
            TaskOutput {
                instance_group: Some(
                    "https://www.googleapis.com/compute/v1/projects/p/zones/us-central1-a/instanceGroups/a-master-c1"
                        .into(),
                ),
                ..TaskOutput::default()
            },
        );
        let ctx = Context::new(&cloud, &outputs);
        let service = BackendService {
            name: "api-c1".into(),
            region: "us-central1".into(),
            protocol: "TCP".into(),
            load_balancing_scheme: "INTERNAL".into(),
            health_checks: vec![Ref::new("api-c1")],
            backends: vec![Ref::new("a-master-c1")],
            lifecycle: Lifecycle::Sync,
        };
        run_step(&service, &ctx, Target::Apply).await.expect("created");
        let again = run_step(&service, &ctx, Target::Apply).await.expect("stable");
        assert_eq!(again.action, Action::Unchanged);
    }

    #[tokio::test]
    async fn test_http_health_check_is_immutable() {
        let sim = MockCloud::new();
        let cloud = sim.cloud("p", "us-central1");
        let outputs = Outputs::new();
        let ctx = Context::new(&cloud, &outputs);
        let mut check = HttpHealthCheck {
            name: "api-c1".into(),
            port: 3990,
            request_path: "/healthz".into(),
            lifecycle: Lifecycle::Sync,
        };
        run_step(&check, &ctx, Target::Apply).await.expect("created");
        check.port = 8080;
        let err = run_step(&check, &ctx, Target::Apply).await.expect_err("immutable");
        assert!(err.to_string().contains("HttpHealthCheck: port"));
    }
}
