//! Service account, IAM binding and custom role tasks.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeSet;
use tracing::{debug, warn};

use crate::cloud::iam::service_account_email;
use crate::cloud::types::{self, Policy, Role};
use crate::error::Result;

use super::{
    Changes, Context, DeclarativeWriter, Lifecycle, Member, Ref, Resource, TaskKey, TaskOutput,
    found,
};

// ============================================================================
// Service account
// ============================================================================

/// An IAM service account. `name` is the account id.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceAccount {
    /// Account id, the local part of the email.
    pub name: String,
    /// Explicit email of a shared account.
    pub email: Option<String>,
    /// Display name.
    pub display_name: Option<String>,
    /// Description.
    pub description: Option<String>,
    /// Engine treatment.
    #[serde(skip)]
    pub lifecycle: Lifecycle,
    /// Owned by someone else.
    #[serde(skip)]
    pub shared: bool,
}

impl ServiceAccount {
    /// An account owned by the cluster.
    #[must_use]
    pub fn owned(account_id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: account_id.into(),
            email: None,
            display_name: None,
            description: Some(description.into()),
            lifecycle: Lifecycle::Sync,
            shared: false,
        }
    }

    /// A pre-existing account identified by email.
    #[must_use]
    pub fn shared(email: impl Into<String>) -> Self {
        let email = email.into();
        Self {
            name: email.split('@').next().unwrap_or_default().to_string(),
            email: Some(email),
            display_name: None,
            description: None,
            lifecycle: Lifecycle::ExistsAndWarnIfChanges,
            shared: true,
        }
    }

    /// Email of the account in `project`.
    #[must_use]
    pub fn email_in(&self, project: &str) -> String {
        self.email
            .clone()
            .unwrap_or_else(|| service_account_email(&self.name, project))
    }
}

#[async_trait]
impl Resource for ServiceAccount {
    const KIND: &'static str = "ServiceAccount";
    const DECLARATIVE_TYPE: &'static str = "google_service_account";

    fn name(&self) -> &str {
        &self.name
    }

    fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    fn is_shared(&self) -> bool {
        self.shared
    }

    async fn find(&self, ctx: &Context<'_>) -> Result<Option<Self>> {
        let email = self.email_in(ctx.project());
        let accounts = ctx.cloud.service_accounts();
        let non_empty = |s: String| Some(s).filter(|s| !s.is_empty());
        Ok(
            found(accounts.get(ctx.project(), &email).await)?.map(|account| Self {
                name: self.name.clone(),
                email: self.email.clone(),
                display_name: non_empty(account.display_name),
                description: non_empty(account.description),
                lifecycle: self.lifecycle,
                shared: self.shared,
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
        let account = types::ServiceAccount {
            display_name: self.display_name.clone().unwrap_or_default(),
            description: self.description.clone().unwrap_or_default(),
            ..types::ServiceAccount::default()
        };
        let created = ctx
            .cloud
            .service_accounts()
            .create(ctx.project(), &self.name, &account)
            .await?;
        debug!("Created service account {}", created.email);
        Ok(self.output(ctx))
    }

    fn output(&self, ctx: &Context<'_>) -> TaskOutput {
        let email = self.email_in(ctx.project());
        TaskOutput {
            email: Some(email.clone()),
            ..TaskOutput::link(
                &self.name,
                format!("projects/{}/serviceAccounts/{email}", ctx.project()),
            )
        }
    }

    fn render_declarative(&self, w: &mut DeclarativeWriter) -> Result<()> {
        if self.shared {
            w.add_data(
                Self::DECLARATIVE_TYPE,
                &self.name,
                json!({ "account_id": self.email }),
            );
            return Ok(());
        }
        let mut block = json!({ "account_id": self.name });
        if let Some(display_name) = &self.display_name {
            block["display_name"] = json!(display_name);
        }
        if let Some(description) = &self.description {
            block["description"] = json!(description);
        }
        w.add(Self::DECLARATIVE_TYPE, &self.name, block);
        Ok(())
    }
}

// ============================================================================
// Custom role
// ============================================================================

/// A project-level custom role. `name` is the role id.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IamRole {
    /// Role id.
    pub name: String,
    /// Title.
    pub title: String,
    /// Description.
    pub description: String,
    /// Permissions.
    pub permissions: BTreeSet<String>,
    /// Engine treatment.
    #[serde(skip)]
    pub lifecycle: Lifecycle,
}

impl IamRole {
    fn to_wire(&self) -> Role {
        Role {
            title: self.title.clone(),
            description: self.description.clone(),
            included_permissions: self.permissions.iter().cloned().collect(),
            stage: "GA".to_string(),
            ..Role::default()
        }
    }
}

#[async_trait]
impl Resource for IamRole {
    const KIND: &'static str = "IamRole";
    const DECLARATIVE_TYPE: &'static str = "google_project_iam_custom_role";

    fn name(&self) -> &str {
        &self.name
    }

    fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    async fn find(&self, ctx: &Context<'_>) -> Result<Option<Self>> {
        let Some(role) = found(ctx.cloud.iam().get_role(ctx.project(), &self.name).await)? else {
            return Ok(None);
        };
        if role.deleted {
            debug!("Custom role {} is soft-deleted", self.name);
            return Ok(None);
        }
        Ok(Some(Self {
            name: self.name.clone(),
            title: role.title,
            description: role.description,
            permissions: role.included_permissions.into_iter().collect(),
            lifecycle: self.lifecycle,
        }))
    }

    fn check_changes(&self, _actual: Option<&Self>, _changes: &Changes) -> Result<()> {
        Ok(())
    }

    async fn render_cloud(
        &self,
        ctx: &Context<'_>,
        actual: Option<&Self>,
        _changes: &Changes,
    ) -> Result<TaskOutput> {
        let iam = ctx.cloud.iam();
        let project = ctx.project();
        let role = self.to_wire();
        if actual.is_some() {
            iam.patch_role(project, &self.name, &role).await?;
            return Ok(self.output(ctx));
        }
        match iam.create_role(project, &self.name, &role).await {
            Ok(_) => {}
            Err(e) if e.is_already_exists() => {
                warn!("Custom role {} was soft-deleted; undeleting", self.name);
                let deleted = iam.get_role(project, &self.name).await?;
                let restored = iam.undelete_role(project, &self.name, &deleted.etag).await?;
                iam.patch_role(
                    project,
                    &self.name,
                    &Role {
                        etag: restored.etag,
                        ..role
                    },
                )
                .await?;
            }
            Err(e) => return Err(e),
        }
        Ok(self.output(ctx))
    }

    fn output(&self, ctx: &Context<'_>) -> TaskOutput {
        let link = format!("projects/{}/roles/{}", ctx.project(), self.name);
        TaskOutput::link(&self.name, link)
    }

    fn render_declarative(&self, w: &mut DeclarativeWriter) -> Result<()> {
        w.add(
            Self::DECLARATIVE_TYPE,
            &self.name,
            json!({
                "role_id": self.name,
                "title": self.title,
                "description": self.description,
                "permissions": self.permissions,
            }),
        );
        Ok(())
    }
}

// ============================================================================
// Policy bindings
// ============================================================================

/// A predefined role or a custom role task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum RoleSpec {
    /// e.g. `roles/compute.viewer`.
    Predefined(String),
    /// A role created by an [`IamRole`] task.
    Custom(Ref<IamRole>),
}

impl RoleSpec {
    fn resolve(&self, ctx: &Context<'_>) -> Result<String> {
        match self {
            Self::Predefined(role) => Ok(role.clone()),
            Self::Custom(r) => ctx.link(r),
        }
    }

    fn dependency(&self) -> Option<TaskKey> {
        match self {
            Self::Custom(r) => Some(r.key()),
            Self::Predefined(_) => None,
        }
    }

    fn declarative(&self) -> String {
        match self {
            Self::Predefined(role) => role.clone(),
            Self::Custom(r) => DeclarativeWriter::reference(r, "name"),
        }
    }
}

enum PolicyTarget<'a> {
    Project(&'a str),
    Bucket(&'a str),
}

impl PolicyTarget<'_> {
    async fn get(&self, ctx: &Context<'_>) -> Result<Policy> {
        match self {
            Self::Project(project) => ctx.cloud.iam().get_project_policy(project).await,
            Self::Bucket(bucket) => ctx.cloud.storage().get_bucket_policy(bucket).await,
        }
    }

    async fn set(&self, ctx: &Context<'_>, policy: &Policy) -> Result<Policy> {
        match self {
            Self::Project(project) => ctx.cloud.iam().set_project_policy(project, policy).await,
            Self::Bucket(bucket) => ctx.cloud.storage().set_bucket_policy(bucket, policy).await,
        }
    }

    async fn has_member(&self, ctx: &Context<'_>, role: &str, member: &str) -> Result<bool> {
        Ok(self.get(ctx).await?.has_member(role, member))
    }

    /// Adds `member` to `role`, re-reading and retrying once on an etag conflict.
    async fn add_member(&self, ctx: &Context<'_>, role: &str, member: &str) -> Result<()> {
        let mut retried = false;
        loop {
            let mut policy = self.get(ctx).await?;
            if !policy.add_member(role, member) {
                return Ok(());
            }
            match self.set(ctx, &policy).await {
                Ok(_) => return Ok(()),
                Err(e) if e.is_etag_mismatch() && !retried => {
                    warn!("IAM policy changed concurrently; re-reading before retry");
                    retried = true;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Membership of one principal in one role of the project policy.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectIamBinding {
    /// Binding name.
    pub name: String,
    /// Project, defaulting to the run's project.
    pub project: Option<String>,
    /// Role.
    pub role: RoleSpec,
    /// Principal.
    pub member: Member,
    /// Engine treatment.
    #[serde(skip)]
    pub lifecycle: Lifecycle,
}

impl ProjectIamBinding {
    fn project<'a>(&'a self, ctx: &Context<'a>) -> &'a str {
        self.project.as_deref().unwrap_or_else(|| ctx.project())
    }
}

#[async_trait]
impl Resource for ProjectIamBinding {
    const KIND: &'static str = "ProjectIamBinding";
    const DECLARATIVE_TYPE: &'static str = "google_project_iam_member";

    fn name(&self) -> &str {
        &self.name
    }

    fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    fn dependencies(&self) -> Vec<TaskKey> {
        self.member
            .dependency()
            .into_iter()
            .chain(self.role.dependency())
            .collect()
    }

    async fn find(&self, ctx: &Context<'_>) -> Result<Option<Self>> {
        let role = self.role.resolve(ctx)?;
        let member = self.member.iam_member(ctx).await?;
        let target = PolicyTarget::Project(self.project(ctx));
        Ok(target
            .has_member(ctx, &role, &member)
            .await?
            .then(|| self.clone()))
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
        let role = self.role.resolve(ctx)?;
        let member = self.member.iam_member(ctx).await?;
        debug!("Binding {member} to {role}");
        PolicyTarget::Project(self.project(ctx))
            .add_member(ctx, &role, &member)
            .await?;
        Ok(self.output(ctx))
    }

    fn output(&self, ctx: &Context<'_>) -> TaskOutput {
        TaskOutput::link(&self.name, format!("projects/{}", self.project(ctx)))
    }

    fn render_declarative(&self, w: &mut DeclarativeWriter) -> Result<()> {
        let mut block = json!({
            "role": self.role.declarative(),
            "member": self.member.declarative_iam_member(),
        });
        if let Some(project) = &self.project {
            block["project"] = json!(project);
        }
        w.add(Self::DECLARATIVE_TYPE, &self.name, block);
        Ok(())
    }
}

/// Membership of one principal in one role of a bucket policy.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StorageBucketIam {
    /// Binding name.
    pub name: String,
    /// Bucket.
    pub bucket: String,
    /// Role, e.g. `roles/storage.objectViewer`.
    pub role: String,
    /// Principal.
    pub member: Member,
    /// Engine treatment.
    #[serde(skip)]
    pub lifecycle: Lifecycle,
}

#[async_trait]
impl Resource for StorageBucketIam {
    const KIND: &'static str = "StorageBucketIam";
    const DECLARATIVE_TYPE: &'static str = "google_storage_bucket_iam_member";

    fn name(&self) -> &str {
        &self.name
    }

    fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    fn dependencies(&self) -> Vec<TaskKey> {
        self.member.dependency().into_iter().collect()
    }

    async fn find(&self, ctx: &Context<'_>) -> Result<Option<Self>> {
        let member = self.member.iam_member(ctx).await?;
        Ok(PolicyTarget::Bucket(&self.bucket)
            .has_member(ctx, &self.role, &member)
            .await?
            .then(|| self.clone()))
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
        let member = self.member.iam_member(ctx).await?;
        PolicyTarget::Bucket(&self.bucket)
            .add_member(ctx, &self.role, &member)
            .await?;
        Ok(self.output(ctx))
    }

    fn output(&self, _ctx: &Context<'_>) -> TaskOutput {
        TaskOutput::link(&self.name, format!("b/{}", self.bucket))
    }

    fn render_declarative(&self, w: &mut DeclarativeWriter) -> Result<()> {
        w.add(
            Self::DECLARATIVE_TYPE,
            &self.name,
            json!({
                "bucket": self.bucket,
                "role": self.role,
                "member": self.member.declarative_iam_member(),
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
    async fn test_service_account_output_carries_email() {
        let sim = MockCloud::new();
        let cloud = sim.cloud("p", "us-central1");
        let outputs = Outputs::new();
        let ctx = Context::new(&cloud, &outputs);
        let account = ServiceAccount::owned("control-plane-c1", "control plane");
        let created = run_step(&account, &ctx, Target::Apply).await.expect("created");
        assert_eq!(
            created.output.email.as_deref(),
            Some("control-plane-c1@p.iam.gserviceaccount.com")
        );
        let again = run_step(&account, &ctx, Target::Apply).await.expect("found");
        assert_eq!(again.action, Action::Unchanged);
    }

    #[tokio::test]
    async fn test_project_binding_is_idempotent() {
        let sim = MockCloud::new();
        let cloud = sim.cloud("p", "us-central1");
        let outputs = Outputs::from([(
            TaskKey::of::<ServiceAccount>("nodes-c1"),
            TaskOutput {
                email: Some("nodes-c1@p.iam.gserviceaccount.com".into()),
                ..TaskOutput::default()
            },
        )]);
        let ctx = Context::new(&cloud, &outputs);
        let binding = ProjectIamBinding {
            name: "nodes-c1-compute-viewer".into(),
            project: None,
            role: RoleSpec::Predefined("roles/compute.viewer".into()),
            member: Member::ServiceAccount(Ref::new("nodes-c1")),
            lifecycle: Lifecycle::Sync,
        };
        let first = run_step(&binding, &ctx, Target::Apply).await.expect("bound");
        assert_eq!(first.action, Action::Created);
        let second = run_step(&binding, &ctx, Target::Apply).await.expect("found");
        assert_eq!(second.action, Action::Unchanged);

        let policy = sim.project_policy("p").expect("policy");
        assert!(policy.has_member(
            "roles/compute.viewer",
            "serviceAccount:nodes-c1@p.iam.gserviceaccount.com"
        ));
    }

    #[tokio::test]
    async fn test_soft_deleted_role_is_undeleted() {
        let sim = MockCloud::new();
        let cloud = sim.cloud("p", "us-central1");
        let outputs = Outputs::new();
        let ctx = Context::new(&cloud, &outputs);
        let mut role = IamRole {
            name: "kopsNodes".into(),
            title: "Nodes".into(),
            description: "node permissions".into(),
            permissions: BTreeSet::from(["compute.instances.get".to_string()]),
            lifecycle: Lifecycle::Sync,
        };
        run_step(&role, &ctx, Target::Apply).await.expect("created");
        assert!(sim.http().delete_role("p", "kopsNodes"));

        role.permissions.insert("compute.zones.list".into());
        let outcome = run_step(&role, &ctx, Target::Apply).await.expect("restored");
        assert_eq!(outcome.action, Action::Created);

        let live = cloud.iam().get_role("p", "kopsNodes").await.expect("role");
        assert!(!live.deleted);
        assert_eq!(live.included_permissions.len(), 2);
    }
}
