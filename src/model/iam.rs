//! Service accounts and the IAM grants of per-role accounts.

use std::collections::BTreeSet;

use crate::config::InstanceGroupRole;
use crate::engine::TaskSet;
use crate::error::Result;
use crate::tasks::iam::RoleSpec;
use crate::tasks::{
    IamRole, Lifecycle, Member, ProjectIamBinding, Ref, ServiceAccount, StorageBucketIam,
};

use super::{ModelBuilder, ModelContext};

/// Predefined project roles of the control plane.
const CONTROL_PLANE_ROLES: &[&str] = &[
    "roles/compute.instanceAdmin.v1",
    "roles/compute.networkAdmin",
    "roles/compute.securityAdmin",
    "roles/compute.loadBalancerAdmin",
    "roles/compute.storageAdmin",
    "roles/iam.serviceAccountUser",
];

/// Permissions of the custom role nodes run with.
const NODE_PERMISSIONS: &[&str] = &[
    "compute.instances.get",
    "compute.instances.list",
    "compute.zones.list",
    "compute.instanceGroupManagers.get",
    "compute.instanceGroups.get",
];

const STATE_WRITER: &str = "roles/storage.objectAdmin";
const STATE_READER: &str = "roles/storage.objectViewer";

/// Emits the shared service account when one is configured, or one account
/// per role with its grants when per-role accounts are enabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct ServiceAccountsBuilder;

impl ServiceAccountsBuilder {
    fn node_role(ctx: &ModelContext<'_>) -> IamRole {
        IamRole {
            name: format!("k8s_node_{}", ctx.safe_cluster_name().replace('-', "_")),
            title: format!("Kubernetes node role for {}", ctx.cluster.name),
            description: format!("Permissions of the nodes of cluster {}", ctx.cluster.name),
            permissions: NODE_PERMISSIONS.iter().map(ToString::to_string).collect(),
            lifecycle: Lifecycle::Sync,
        }
    }

    fn project_binding(account: &str, role: RoleSpec, member: &Member) -> ProjectIamBinding {
        let suffix = match &role {
            RoleSpec::Predefined(name) => name.trim_start_matches("roles/").to_string(),
            RoleSpec::Custom(r) => r.name().to_string(),
        };
        ProjectIamBinding {
            name: format!("{account}-{suffix}"),
            project: None,
            role,
            member: member.clone(),
            lifecycle: Lifecycle::Sync,
        }
    }

    fn add_role_account(
        ctx: &ModelContext<'_>,
        tasks: &mut TaskSet,
        role: InstanceGroupRole,
        node_role: &Ref<IamRole>,
    ) -> Result<()> {
        let account = ServiceAccount::owned(
            ctx.role_account_id(role),
            format!("{} instances of cluster {}", ModelContext::role_name(role), ctx.cluster.name),
        );
        let id = account.name.clone();
        let member = Member::ServiceAccount(Ref::to(&account));
        tasks.add(account)?;

        let roles: Vec<RoleSpec> = match role {
            InstanceGroupRole::ControlPlane => CONTROL_PLANE_ROLES
                .iter()
                .map(|r| RoleSpec::Predefined((*r).to_string()))
                .collect(),
            InstanceGroupRole::Node | InstanceGroupRole::ApiServer => {
                vec![RoleSpec::Custom(node_role.clone())]
            }
            InstanceGroupRole::Bastion => Vec::new(),
        };
        for spec in roles {
            tasks.add(Self::project_binding(&id, spec, &member))?;
        }

        if role != InstanceGroupRole::Bastion
            && let Some(state) = ctx.config_bucket()
        {
            let bucket_role = if role == InstanceGroupRole::ControlPlane {
                STATE_WRITER
            } else {
                STATE_READER
            };
            tasks.add(StorageBucketIam {
                name: format!("{id}-{}", state.bucket),
                bucket: state.bucket,
                role: bucket_role.to_string(),
                member,
                lifecycle: Lifecycle::Sync,
            })?;
        }
        Ok(())
    }
}

impl ModelBuilder for ServiceAccountsBuilder {
    fn build(&self, ctx: &ModelContext<'_>, tasks: &mut TaskSet) -> Result<()> {
        if let Some(email) = &ctx.cluster.service_account {
            return tasks.add(ServiceAccount::shared(email.as_str()));
        }
        if !ctx.cluster.per_role_service_accounts {
            return Ok(());
        }

        let roles: BTreeSet<InstanceGroupRole> = ctx.roles().collect();
        let node_role = Self::node_role(ctx);
        let node_role_ref = Ref::to(&node_role);
        if roles.contains(&InstanceGroupRole::Node) || roles.contains(&InstanceGroupRole::ApiServer) {
            tasks.add(node_role)?;
        }
        for role in roles {
            Self::add_role_account(ctx, tasks, role, &node_role_ref)?;
        }
        Ok(())
    }
}
