//! Legacy bucket and object ACL tasks, used when the state store bucket
//! does not have uniform bucket-level access.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;

use crate::cloud::types::{BucketAccessControl, ObjectAccessControl};
use crate::error::Result;

use super::{
    Changes, Context, DeclarativeWriter, Lifecycle, Member, Resource, TaskKey, TaskOutput, found,
};

/// An ACL entry on a bucket.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StorageBucketAcl {
    /// Task name.
    pub name: String,
    /// Bucket.
    pub bucket: String,
    /// Grantee.
    pub entity: Member,
    /// `READER`, `WRITER` or `OWNER`.
    pub role: String,
    /// Engine treatment.
    #[serde(skip)]
    pub lifecycle: Lifecycle,
}

#[async_trait]
impl Resource for StorageBucketAcl {
    const KIND: &'static str = "StorageBucketAcl";
    const DECLARATIVE_TYPE: &'static str = "google_storage_bucket_access_control";

    fn name(&self) -> &str {
        &self.name
    }

    fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    fn dependencies(&self) -> Vec<TaskKey> {
        self.entity.dependency().into_iter().collect()
    }

    async fn find(&self, ctx: &Context<'_>) -> Result<Option<Self>> {
        let entity = self.entity.acl_entity(ctx).await?;
        let acl = found(ctx.cloud.storage().get_bucket_acl(&self.bucket, &entity).await)?;
        Ok(acl.map(|acl| Self {
            role: acl.role,
            ..self.clone()
        }))
    }

    fn check_changes(&self, actual: Option<&Self>, changes: &Changes) -> Result<()> {
        match actual {
            Some(_) => changes.ensure_unchanged(Self::KIND, &["bucket", "entity"]),
            None => Ok(()),
        }
    }

    async fn render_cloud(
        &self,
        ctx: &Context<'_>,
        actual: Option<&Self>,
        _changes: &Changes,
    ) -> Result<TaskOutput> {
        let acl = BucketAccessControl {
            bucket: self.bucket.clone(),
            entity: self.entity.acl_entity(ctx).await?,
            role: self.role.clone(),
        };
        let storage = ctx.cloud.storage();
        if actual.is_some() {
            storage.update_bucket_acl(&acl).await?;
        } else {
            storage.insert_bucket_acl(&acl).await?;
        }
        Ok(self.output(ctx))
    }

    fn output(&self, _ctx: &Context<'_>) -> TaskOutput {
        TaskOutput::link(&self.name, format!("b/{}/acl", self.bucket))
    }

    fn render_declarative(&self, w: &mut DeclarativeWriter) -> Result<()> {
        w.add(
            Self::DECLARATIVE_TYPE,
            &self.name,
            json!({
                "bucket": self.bucket,
                "entity": self.entity.declarative_acl_entity(),
                "role": self.role,
            }),
        );
        Ok(())
    }
}

/// An ACL entry on one object.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StorageObjectAcl {
    /// Task name.
    pub name: String,
    /// Bucket.
    pub bucket: String,
    /// Object path.
    pub object: String,
    /// Grantee.
    pub entity: Member,
    /// `READER` or `OWNER`.
    pub role: String,
    /// Engine treatment.
    #[serde(skip)]
    pub lifecycle: Lifecycle,
}

#[async_trait]
impl Resource for StorageObjectAcl {
    const KIND: &'static str = "StorageObjectAcl";
    const DECLARATIVE_TYPE: &'static str = "google_storage_object_access_control";

    fn name(&self) -> &str {
        &self.name
    }

    fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    fn dependencies(&self) -> Vec<TaskKey> {
        self.entity.dependency().into_iter().collect()
    }

    async fn find(&self, ctx: &Context<'_>) -> Result<Option<Self>> {
        let entity = self.entity.acl_entity(ctx).await?;
        let acl = found(
            ctx.cloud
                .storage()
                .get_object_acl(&self.bucket, &self.object, &entity)
                .await,
        )?;
        Ok(acl.map(|acl| Self {
            role: acl.role,
            ..self.clone()
        }))
    }

    fn check_changes(&self, actual: Option<&Self>, changes: &Changes) -> Result<()> {
        match actual {
            Some(_) => changes.ensure_unchanged(Self::KIND, &["bucket", "object", "entity"]),
            None => Ok(()),
        }
    }

    async fn render_cloud(
        &self,
        ctx: &Context<'_>,
        actual: Option<&Self>,
        _changes: &Changes,
    ) -> Result<TaskOutput> {
        let acl = ObjectAccessControl {
            bucket: self.bucket.clone(),
            object: self.object.clone(),
            entity: self.entity.acl_entity(ctx).await?,
            role: self.role.clone(),
        };
        let storage = ctx.cloud.storage();
        if actual.is_some() {
            storage.update_object_acl(&acl).await?;
        } else {
            storage.insert_object_acl(&acl).await?;
        }
        Ok(self.output(ctx))
    }

    fn output(&self, _ctx: &Context<'_>) -> TaskOutput {
        TaskOutput::link(&self.name, format!("b/{}/o/{}/acl", self.bucket, self.object))
    }

    fn render_declarative(&self, w: &mut DeclarativeWriter) -> Result<()> {
        w.add(
            Self::DECLARATIVE_TYPE,
            &self.name,
            json!({
                "bucket": self.bucket,
                "object": self.object,
                "entity": self.entity.declarative_acl_entity(),
                "role": self.role,
            }),
        );
        Ok(())
    }
}
