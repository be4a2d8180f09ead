//! Bucket ACLs giving instances access to the state store.

use std::collections::BTreeMap;
use tracing::warn;

use crate::cloud::GcsPath;
use crate::cloud::naming::{MAX_NAME_LENGTH, limited_length_name};
use crate::config::InstanceGroupRole;
use crate::engine::TaskSet;
use crate::error::Result;
use crate::tasks::{Lifecycle, Member, StorageBucketAcl};

use super::{ModelBuilder, ModelContext};

const READER: &str = "READER";
const WRITER: &str = "WRITER";

/// Stable short id of a member, used in task names.
fn member_id(member: &Member) -> String {
    match member {
        Member::Literal(value) => value.clone(),
        Member::ServiceAccount(r) => r.name().to_string(),
        Member::DefaultServiceAccount => "default".to_string(),
    }
}

/// Strongest role per bucket and member.
#[derive(Debug, Default)]
struct Grants {
    entries: BTreeMap<(String, String), (Member, &'static str)>,
}

impl Grants {
    fn grant(&mut self, bucket: &str, member: &Member, role: &'static str) {
        let key = (bucket.to_string(), member_id(member));
        let entry = self
            .entries
            .entry(key)
            .or_insert_with(|| (member.clone(), role));
        if role == WRITER {
            entry.1 = WRITER;
        }
    }
}

/// Emits bucket ACLs on the state store and the extra writeable paths.
///
/// Clusters with per-role service accounts get bucket IAM bindings instead.
#[derive(Debug, Clone, Copy, Default)]
pub struct StorageAclBuilder;

impl StorageAclBuilder {
    fn bucket_of(path: &str) -> Option<GcsPath> {
        let parsed = GcsPath::parse(path);
        if parsed.is_none() {
            warn!("Path {path} is not a gs:// bucket path; not granting access to it");
        }
        parsed
    }
}

impl ModelBuilder for StorageAclBuilder {
    fn build(&self, ctx: &ModelContext<'_>, tasks: &mut TaskSet) -> Result<()> {
        let cluster = ctx.cluster;
        if cluster.service_account.is_none() && cluster.per_role_service_accounts {
            return Ok(());
        }

        let writer = ctx.member_for(InstanceGroupRole::ControlPlane);
        let mut readers = vec![writer.clone()];
        for role in ctx.roles() {
            let member = ctx.member_for(role);
            if !readers.contains(&member) {
                readers.push(member);
            }
        }

        let mut grants = Grants::default();
        if let Some(base) = cluster.config_base.as_deref()
            && let Some(state) = Self::bucket_of(base)
        {
            for member in &readers {
                grants.grant(&state.bucket, member, READER);
            }
            grants.grant(&state.bucket, &writer, WRITER);
        }
        for path in &cluster.additional_writeable_paths {
            if let Some(extra) = Self::bucket_of(path) {
                grants.grant(&extra.bucket, &writer, WRITER);
            }
        }

        for ((bucket, id), (member, role)) in grants.entries {
            tasks.add(StorageBucketAcl {
                name: limited_length_name(&format!("{bucket}-{id}"), MAX_NAME_LENGTH),
                bucket,
                entity: member,
                role: role.to_string(),
                lifecycle: Lifecycle::Sync,
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::test_support::{MINIMAL, parse};
    use crate::tasks::Ref;

    fn build(yaml: &str) -> TaskSet {
        let cluster = parse(yaml);
        let mut tasks = TaskSet::new();
        StorageAclBuilder
            .build(&ModelContext::new(&cluster), &mut tasks)
            .expect("built");
        tasks
    }

    fn acls(tasks: &TaskSet) -> Vec<(&str, &str)> {
        tasks
            .of_kind::<StorageBucketAcl>()
            .map(|a| (a.bucket.as_str(), a.role.as_str()))
            .collect()
    }

    #[test]
    fn test_default_account_gets_writer_on_state() {
        let yaml = format!(
            "{MINIMAL}config_base: gs://state/testcluster.test.com\nadditional_writeable_paths: [gs://backups/etcd, s3://elsewhere]\n"
        );
        let tasks = build(&yaml);
        assert_eq!(acls(&tasks), [("backups", "WRITER"), ("state", "WRITER")]);
        let acl = tasks.get::<StorageBucketAcl>("state-default").expect("acl");
        assert_eq!(acl.entity, Member::DefaultServiceAccount);
    }

    #[test]
    fn test_non_bucket_base_grants_nothing() {
        let yaml = format!("{MINIMAL}config_base: file:///tmp/state\n");
        assert!(build(&yaml).is_empty());
    }

    #[test]
    fn test_shared_account() {
        let yaml = format!(
            "{MINIMAL}config_base: gs://state/c\nservice_account: infra@p.iam.gserviceaccount.com\n"
        );
        let tasks = build(&yaml);
        let acl = tasks.get::<StorageBucketAcl>("state-infra").expect("acl");
        assert_eq!(acl.entity, Member::ServiceAccount(Ref::new("infra")));
        assert_eq!(acl.role, "WRITER");
    }

    #[test]
    fn test_per_role_accounts_use_bucket_iam() {
        let yaml = format!("{MINIMAL}config_base: gs://state/c\nper_role_service_accounts: true\n");
        assert!(build(&yaml).is_empty());
    }
}
