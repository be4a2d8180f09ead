//! Resource tasks: one intent type per cloud resource kind.
//!
//! Every kind implements [`Resource`], which gives the engine a uniform
//! `find -> diff -> check -> render` contract. Tasks refer to each other
//! through typed [`Ref`]s; the engine resolves them to links, addresses or
//! emails from the outputs of tasks that already ran.

pub mod address;
pub mod declarative;
pub mod disk;
pub mod dns;
pub mod firewall;
pub mod forwarding_rule;
pub mod health_check;
pub mod iam;
pub mod instance_group_manager;
pub mod instance_template;
pub mod network;
pub mod router;
pub mod storage_acl;
pub mod subnet;
pub mod target_pool;

use async_trait::async_trait;
use serde::{Serialize, Serializer};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

use crate::cloud::GceCloud;
use crate::error::{Result, TaskError};

pub use address::Address;
pub use declarative::{DeclarativeWriter, declarative_name};
pub use disk::Disk;
pub use dns::ManagedZone;
pub use firewall::FirewallRule;
pub use forwarding_rule::{ForwardingRule, IpAddressSpec};
pub use health_check::{BackendService, HealthCheck, HttpHealthCheck};
pub use iam::{IamRole, ProjectIamBinding, ServiceAccount, StorageBucketIam};
pub use instance_group_manager::InstanceGroupManager;
pub use instance_template::{Accelerator, InstanceTemplate, normalize_template};
pub use network::{Network, NetworkMode};
pub use router::{Router, RouterNat};
pub use storage_acl::{StorageBucketAcl, StorageObjectAcl};
pub use subnet::Subnet;
pub use target_pool::{PoolHealthCheck, TargetPool};

/// How the engine treats a task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub enum Lifecycle {
    /// Create or update to match the declaration.
    #[default]
    Sync,
    /// Must exist and match; differences are an error.
    ExistsAndValidates,
    /// Must exist; differences are logged.
    ExistsAndWarnIfChanges,
    /// Look up only.
    Ignore,
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Sync => "Sync",
            Self::ExistsAndValidates => "ExistsAndValidates",
            Self::ExistsAndWarnIfChanges => "ExistsAndWarnIfChanges",
            Self::Ignore => "Ignore",
        };
        f.write_str(s)
    }
}

/// Stable identity of a task: its kind and name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TaskKey {
    /// Kind, e.g. `Network`.
    pub kind: &'static str,
    /// Name, unique within the kind.
    pub name: String,
}

impl TaskKey {
    /// Key of a task of kind `R`.
    #[must_use]
    pub fn of<R: Resource>(name: impl Into<String>) -> Self {
        Self {
            kind: R::KIND,
            name: name.into(),
        }
    }
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

/// Typed reference to another task by name. Serializes as the name.
pub struct Ref<R> {
    name: String,
    marker: PhantomData<fn() -> R>,
}

impl<R: Resource> Ref<R> {
    /// Refers to the task of kind `R` named `name`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            marker: PhantomData,
        }
    }

    /// Refers to `task`.
    #[must_use]
    pub fn to(task: &R) -> Self {
        Self::new(task.name())
    }

    /// Name of the referenced task.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Key of the referenced task.
    #[must_use]
    pub fn key(&self) -> TaskKey {
        TaskKey::of::<R>(&self.name)
    }
}

impl<R> Clone for Ref<R> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            marker: PhantomData,
        }
    }
}

impl<R> fmt::Debug for Ref<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ref({})", self.name)
    }
}

impl<R> PartialEq for Ref<R> {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl<R> Eq for Ref<R> {}

impl<R> PartialOrd for Ref<R> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<R> Ord for Ref<R> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.name.cmp(&other.name)
    }
}

impl<R> Hash for Ref<R> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl<R> Serialize for Ref<R> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.name)
    }
}

/// What a finished task exposes to the tasks that reference it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TaskOutput {
    /// Cloud name of the resource.
    pub name: String,
    /// Canonical link.
    pub self_link: String,
    /// Assigned IP address (addresses).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    /// Account email (service accounts).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Link of the managed instance group (instance group managers).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_group: Option<String>,
}

impl TaskOutput {
    /// Output carrying a name and a link.
    #[must_use]
    pub fn link(name: impl Into<String>, self_link: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            self_link: self_link.into(),
            ..Self::default()
        }
    }
}

/// Outputs of completed tasks.
pub type Outputs = BTreeMap<TaskKey, TaskOutput>;

/// Everything a task can see while it runs.
#[derive(Debug, Clone, Copy)]
pub struct Context<'a> {
    /// Cloud handle.
    pub cloud: &'a GceCloud,
    /// Outputs of the tasks that already ran.
    outputs: &'a Outputs,
}

impl<'a> Context<'a> {
    /// Creates a context.
    #[must_use]
    pub const fn new(cloud: &'a GceCloud, outputs: &'a Outputs) -> Self {
        Self { cloud, outputs }
    }

    /// Project of the run.
    #[must_use]
    pub fn project(&self) -> &'a str {
        self.cloud.project()
    }

    /// Region of the run.
    #[must_use]
    pub fn region(&self) -> &'a str {
        self.cloud.region()
    }

    /// Output of a referenced task.
    ///
    /// # Errors
    ///
    /// Returns `UnresolvedReference` if the task has not produced an output.
    pub fn output<R: Resource>(&self, r: &Ref<R>) -> Result<&'a TaskOutput> {
        self.outputs.get(&r.key()).ok_or_else(|| {
            TaskError::UnresolvedReference {
                target: r.key().to_string(),
            }
            .into()
        })
    }

    /// Link of a referenced task.
    ///
    /// # Errors
    ///
    /// Returns `UnresolvedReference` if the task has not produced an output.
    pub fn link<R: Resource>(&self, r: &Ref<R>) -> Result<String> {
        Ok(self.output(r)?.self_link.clone())
    }

    /// Returns true if `link` is the link the referenced task produced.
    #[must_use]
    pub fn is_link_of<R: Resource>(&self, r: &Ref<R>, link: &str) -> bool {
        self.outputs
            .get(&r.key())
            .is_some_and(|o| o.self_link == link)
    }
}

/// Per-field difference between a found resource and its declaration.
///
/// Fields are the top-level serialized fields of the task. A field the
/// declaration leaves unset (`null`) never counts as changed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Changes {
    fields: BTreeMap<String, Value>,
}

impl Changes {
    /// Computes the changes needed to turn `actual` into `desired`.
    ///
    /// With no `actual`, every set field of `desired` is a change.
    ///
    /// # Errors
    ///
    /// Returns an error if either side cannot be serialized to a JSON object.
    pub fn compute<R: Serialize>(actual: Option<&R>, desired: &R) -> Result<Self> {
        let desired = to_object(desired)?;
        let actual = actual.map(to_object).transpose()?.unwrap_or_default();
        let fields = desired
            .into_iter()
            .filter(|(_, want)| !want.is_null())
            .filter(|(field, want)| actual.get(field) != Some(want))
            .collect();
        Ok(Self { fields })
    }

    /// Returns true if `field` changed.
    #[must_use]
    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    /// Marks `field` as handled. Returns true if it was present.
    pub fn take(&mut self, field: &str) -> bool {
        self.fields.remove(field).is_some()
    }

    /// Returns true if nothing changed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Names of the changed fields.
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// Desired value of a changed field.
    #[must_use]
    pub fn value(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Fails with `CannotChangeField` on the first remaining field.
    ///
    /// # Errors
    ///
    /// Returns an error if any field is left.
    pub fn ensure_empty(&self, kind: &'static str) -> Result<()> {
        match self.fields.keys().next() {
            Some(field) => Err(TaskError::cannot_change(kind, field.clone()).into()),
            None => Ok(()),
        }
    }

    /// Fails with `CannotChangeField` if any of `immutable` changed.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first immutable field that changed.
    pub fn ensure_unchanged(&self, kind: &'static str, immutable: &[&str]) -> Result<()> {
        match immutable.iter().find(|f| self.contains(f)) {
            Some(field) => Err(TaskError::cannot_change(kind, *field).into()),
            None => Ok(()),
        }
    }
}

fn to_object<T: Serialize>(value: &T) -> Result<serde_json::Map<String, Value>> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(crate::error::InfraError::internal(format!(
            "task did not serialize to an object: {other}"
        ))),
    }
}

/// The contract every resource kind implements.
#[async_trait]
pub trait Resource: Clone + Serialize + fmt::Debug + Send + Sync + 'static {
    /// Kind name used in task keys and messages.
    const KIND: &'static str;
    /// Resource type used in declarative output.
    const DECLARATIVE_TYPE: &'static str;

    /// Task name, also the cloud name unless the kind says otherwise.
    fn name(&self) -> &str;

    /// How the engine treats the task.
    fn lifecycle(&self) -> Lifecycle {
        Lifecycle::Sync
    }

    /// Shared resources are required to exist and are never mutated.
    fn is_shared(&self) -> bool {
        false
    }

    /// Tasks that must complete first.
    fn dependencies(&self) -> Vec<TaskKey> {
        Vec::new()
    }

    /// Reads the live resource; `None` if it does not exist.
    async fn find(&self, ctx: &Context<'_>) -> Result<Option<Self>>;

    /// Rejects changes the cloud cannot apply. `actual` is `None` on creation.
    fn check_changes(&self, actual: Option<&Self>, changes: &Changes) -> Result<()>;

    /// Creates the resource, or applies `changes` to the existing one.
    async fn render_cloud(
        &self,
        ctx: &Context<'_>,
        actual: Option<&Self>,
        changes: &Changes,
    ) -> Result<TaskOutput>;

    /// Output of this resource as it is (found) or will be (declared).
    fn output(&self, ctx: &Context<'_>) -> TaskOutput;

    /// Emits the declarative block(s) of this resource.
    fn render_declarative(&self, w: &mut DeclarativeWriter) -> Result<()>;
}

/// Turns `NotFound` into `None`.
///
/// # Errors
///
/// Returns any other error unchanged.
pub fn found<T>(result: Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

/// An IAM or ACL principal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Member {
    /// A literal member such as `user:a@example.com` or an ACL entity.
    Literal(String),
    /// A service account created or looked up by another task.
    ServiceAccount(Ref<ServiceAccount>),
    /// The project's default compute service account.
    DefaultServiceAccount,
}

impl Member {
    /// Task this member depends on, if any.
    #[must_use]
    pub fn dependency(&self) -> Option<TaskKey> {
        match self {
            Self::ServiceAccount(r) => Some(r.key()),
            _ => None,
        }
    }

    /// Email behind a service-account member, or the literal value.
    ///
    /// # Errors
    ///
    /// Returns an error if the account cannot be resolved.
    pub async fn email(&self, ctx: &Context<'_>) -> Result<String> {
        match self {
            Self::Literal(value) => Ok(value.clone()),
            Self::ServiceAccount(r) => {
                let output = ctx.output(r)?;
                output.email.clone().ok_or_else(|| {
                    TaskError::UnresolvedReference {
                        target: r.key().to_string(),
                    }
                    .into()
                })
            }
            Self::DefaultServiceAccount => ctx.cloud.default_service_account().await,
        }
    }

    /// IAM member string, e.g. `serviceAccount:a@p.iam.gserviceaccount.com`.
    ///
    /// # Errors
    ///
    /// Returns an error if the account cannot be resolved.
    pub async fn iam_member(&self, ctx: &Context<'_>) -> Result<String> {
        match self {
            Self::Literal(value) => Ok(value.clone()),
            _ => Ok(format!("serviceAccount:{}", self.email(ctx).await?)),
        }
    }

    /// ACL entity string, e.g. `user-a@p.iam.gserviceaccount.com`.
    ///
    /// # Errors
    ///
    /// Returns an error if the account cannot be resolved.
    pub async fn acl_entity(&self, ctx: &Context<'_>) -> Result<String> {
        match self {
            Self::Literal(value) => Ok(value.clone()),
            _ => Ok(format!("user-{}", self.email(ctx).await?)),
        }
    }

    /// Declarative form of the IAM member.
    #[must_use]
    pub fn declarative_iam_member(&self) -> String {
        match self {
            Self::Literal(value) => value.clone(),
            Self::ServiceAccount(r) => {
                format!("serviceAccount:{}", DeclarativeWriter::reference(r, "email"))
            }
            Self::DefaultServiceAccount => {
                "serviceAccount:${data.google_compute_default_service_account.default.email}"
                    .to_string()
            }
        }
    }

    /// Declarative form of the ACL entity.
    #[must_use]
    pub fn declarative_acl_entity(&self) -> String {
        match self {
            Self::Literal(value) => value.clone(),
            _ => self
                .declarative_iam_member()
                .replacen("serviceAccount:", "user-", 1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct Sample {
        name: String,
        size: Option<i64>,
        tags: Vec<String>,
    }

    #[test]
    fn test_changes_on_creation_skip_unset_fields() {
        let desired = Sample {
            name: "a".into(),
            size: None,
            tags: vec![],
        };
        let changes = Changes::compute(None, &desired).expect("computed");
        assert!(changes.contains("name"));
        assert!(changes.contains("tags"));
        assert!(!changes.contains("size"));
    }

    #[test]
    fn test_changes_between_peers() {
        let actual = Sample {
            name: "a".into(),
            size: Some(10),
            tags: vec!["x".into()],
        };
        let desired = Sample {
            name: "a".into(),
            size: Some(20),
            tags: vec!["x".into()],
        };
        let mut changes = Changes::compute(Some(&actual), &desired).expect("computed");
        assert_eq!(changes.fields().collect::<Vec<_>>(), ["size"]);
        assert!(changes.ensure_unchanged("Sample", &["size"]).is_err());
        assert!(changes.take("size"));
        changes.ensure_empty("Sample").expect("nothing left");
    }

    #[test]
    fn test_cannot_change_message() {
        let desired = Sample {
            name: "a".into(),
            size: Some(1),
            tags: vec![],
        };
        let changes = Changes::compute(None, &desired).expect("computed");
        let err = changes.ensure_unchanged("Disk", &["size"]).expect_err("immutable");
        assert_eq!(err.to_string(), "Task error: cannot apply changes to Disk: size");
    }

    #[test]
    fn test_ref_serializes_as_name() {
        let network: Ref<Network> = Ref::new("default");
        let value = serde_json::to_value(&network).expect("serialized");
        assert_eq!(value, serde_json::json!("default"));
    }
}
