//! Cloud Storage client: bucket and object ACLs, bucket IAM and uploads.

use reqwest::Method;
use std::sync::Arc;

use crate::error::Result;

use super::iam::{REQUESTED_POLICY_VERSION, etag_conflict};
use super::naming::percent_encode;
use super::transport::{ApiClient, RoundTripper};
use super::types::{BucketAccessControl, ObjectAccessControl, Policy, StorageObject};

/// Base URL of the storage JSON API.
pub const STORAGE_BASE_URL: &str = "https://storage.googleapis.com/storage/v1/";

/// Base URL of the storage upload endpoint.
pub const STORAGE_UPLOAD_URL: &str = "https://storage.googleapis.com/upload/storage/v1/";

/// A parsed `gs://bucket/path` location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GcsPath {
    /// Bucket name.
    pub bucket: String,
    /// Object key prefix, without a leading slash.
    pub key: String,
}

impl GcsPath {
    /// Parses a `gs://` URL; returns `None` for other schemes.
    #[must_use]
    pub fn parse(url: &str) -> Option<Self> {
        let rest = url.strip_prefix("gs://")?;
        let (bucket, key) = rest.split_once('/').unwrap_or((rest, ""));
        if bucket.is_empty() {
            return None;
        }
        Some(Self {
            bucket: bucket.to_string(),
            key: key.trim_matches('/').to_string(),
        })
    }
}

/// Storage API client over a [`RoundTripper`].
#[derive(Debug, Clone)]
pub struct StorageClient {
    /// JSON API.
    api: ApiClient,
}

impl StorageClient {
    /// Creates a client over `transport`.
    #[must_use]
    pub fn new(transport: Arc<dyn RoundTripper>) -> Self {
        Self {
            api: ApiClient::new(transport, STORAGE_BASE_URL),
        }
    }

    /// Reads the ACL entry of `entity` on a bucket.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the entity has no entry.
    pub async fn get_bucket_acl(&self, bucket: &str, entity: &str) -> Result<BucketAccessControl> {
        self.api
            .get(&format!("b/{bucket}/acl/{}", percent_encode(entity)))
            .await
    }

    /// Adds an ACL entry to a bucket.
    ///
    /// # Errors
    ///
    /// Returns an error if the API call fails.
    pub async fn insert_bucket_acl(&self, acl: &BucketAccessControl) -> Result<BucketAccessControl> {
        self.api.post(&format!("b/{}/acl", acl.bucket), acl).await
    }

    /// Replaces the role of an existing bucket ACL entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the API call fails.
    pub async fn update_bucket_acl(&self, acl: &BucketAccessControl) -> Result<BucketAccessControl> {
        let path = format!("b/{}/acl/{}", acl.bucket, percent_encode(&acl.entity));
        self.api.call(Method::PUT, &path, Some(acl)).await
    }

    /// Reads the ACL entry of `entity` on an object.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the entity has no entry.
    pub async fn get_object_acl(
        &self,
        bucket: &str,
        object: &str,
        entity: &str,
    ) -> Result<ObjectAccessControl> {
        self.api
            .get(&format!(
                "b/{bucket}/o/{}/acl/{}",
                percent_encode(object),
                percent_encode(entity)
            ))
            .await
    }

    /// Adds an ACL entry to an object.
    ///
    /// # Errors
    ///
    /// Returns an error if the API call fails.
    pub async fn insert_object_acl(&self, acl: &ObjectAccessControl) -> Result<ObjectAccessControl> {
        let path = format!("b/{}/o/{}/acl", acl.bucket, percent_encode(&acl.object));
        self.api.post(&path, acl).await
    }

    /// Replaces the role of an existing object ACL entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the API call fails.
    pub async fn update_object_acl(&self, acl: &ObjectAccessControl) -> Result<ObjectAccessControl> {
        let path = format!(
            "b/{}/o/{}/acl/{}",
            acl.bucket,
            percent_encode(&acl.object),
            percent_encode(&acl.entity)
        );
        self.api.call(Method::PUT, &path, Some(acl)).await
    }

    /// Reads the IAM policy of a bucket.
    ///
    /// # Errors
    ///
    /// Returns an error if the API call fails.
    pub async fn get_bucket_policy(&self, bucket: &str) -> Result<Policy> {
        self.api
            .get(&format!(
                "b/{bucket}/iam?optionsRequestedPolicyVersion={REQUESTED_POLICY_VERSION}"
            ))
            .await
    }

    /// Writes the IAM policy of a bucket, guarded by its etag.
    ///
    /// # Errors
    ///
    /// Returns `EtagMismatch` if the policy changed since it was read.
    pub async fn set_bucket_policy(&self, bucket: &str, policy: &Policy) -> Result<Policy> {
        let mut policy = policy.clone();
        policy.version = REQUESTED_POLICY_VERSION;
        self.api
            .call(Method::PUT, &format!("b/{bucket}/iam"), Some(&policy))
            .await
            .map_err(|e| etag_conflict(e, &format!("b/{bucket}")))
    }

    /// Uploads an object in a single request.
    ///
    /// # Errors
    ///
    /// Returns an error if the API call fails.
    pub async fn upload_object(
        &self,
        bucket: &str,
        name: &str,
        data: Vec<u8>,
        content_type: &str,
    ) -> Result<StorageObject> {
        let url = format!(
            "{STORAGE_UPLOAD_URL}b/{bucket}/o?uploadType=media&name={}",
            percent_encode(name)
        );
        self.api
            .call_raw(Method::POST, &url, Some(data), Some(content_type))
            .await
    }

    /// Reads the metadata of an object.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the object does not exist.
    pub async fn get_object(&self, bucket: &str, name: &str) -> Result<StorageObject> {
        self.api
            .get(&format!("b/{bucket}/o/{}", percent_encode(name)))
            .await
    }
}
