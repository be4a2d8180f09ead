//! IAM clients: service accounts, custom roles and project policies.
//!
//! Service accounts have a typed facade. Roles and project policies are plain
//! JSON clients over a [`RoundTripper`], which lets the simulator answer them
//! at the HTTP level.

use async_trait::async_trait;
use reqwest::Method;
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

use crate::error::{CloudError, InfraError, Result};

use super::transport::{ApiClient, RoundTripper};
use super::types::{
    CreateRoleRequest, CreateServiceAccountRequest, GetIamPolicyRequest, GetPolicyOptions, Policy,
    Role, ServiceAccount, SetIamPolicyRequest,
};

/// Base URL of the IAM API.
pub const IAM_BASE_URL: &str = "https://iam.googleapis.com/v1/";

/// Base URL of the resource manager API.
pub const RESOURCE_MANAGER_BASE_URL: &str = "https://cloudresourcemanager.googleapis.com/v1/";

/// Policy version requested on every read, so conditional bindings are preserved.
pub const REQUESTED_POLICY_VERSION: i32 = 3;

/// Canonical email of a service account.
#[must_use]
pub fn service_account_email(account_id: &str, project: &str) -> String {
    format!("{account_id}@{project}.iam.gserviceaccount.com")
}

/// Service account operations.
#[async_trait]
pub trait ServiceAccountClient: Send + Sync {
    /// Reads an account by email.
    async fn get(&self, project: &str, email: &str) -> Result<ServiceAccount>;
    /// Creates an account.
    async fn create(
        &self,
        project: &str,
        account_id: &str,
        account: &ServiceAccount,
    ) -> Result<ServiceAccount>;
    /// Lists accounts.
    async fn list(&self, project: &str) -> Result<Vec<ServiceAccount>>;
}

/// Live service account facade.
#[derive(Debug, Clone)]
pub struct RestServiceAccounts {
    /// JSON client rooted at the IAM API.
    api: ApiClient,
}

impl RestServiceAccounts {
    /// Creates a client over `transport`.
    #[must_use]
    pub fn new(transport: Arc<dyn RoundTripper>) -> Self {
        Self {
            api: ApiClient::new(transport, IAM_BASE_URL),
        }
    }
}

#[async_trait]
impl ServiceAccountClient for RestServiceAccounts {
    async fn get(&self, project: &str, email: &str) -> Result<ServiceAccount> {
        self.api
            .get(&format!("projects/{project}/serviceAccounts/{email}"))
            .await
    }

    async fn create(
        &self,
        project: &str,
        account_id: &str,
        account: &ServiceAccount,
    ) -> Result<ServiceAccount> {
        let body = CreateServiceAccountRequest {
            account_id: account_id.to_string(),
            service_account: account.clone(),
        };
        self.api
            .post(&format!("projects/{project}/serviceAccounts"), &body)
            .await
    }

    async fn list(&self, project: &str) -> Result<Vec<ServiceAccount>> {
        #[derive(serde::Deserialize, Default)]
        #[serde(rename_all = "camelCase", default)]
        struct Accounts {
            accounts: Vec<ServiceAccount>,
        }
        let accounts: Accounts = self
            .api
            .get(&format!("projects/{project}/serviceAccounts"))
            .await?;
        Ok(accounts.accounts)
    }
}

/// Client for custom roles and project IAM policies.
#[derive(Debug, Clone)]
pub struct IamClient {
    /// IAM API.
    iam: ApiClient,
    /// Resource manager API.
    resource_manager: ApiClient,
}

impl IamClient {
    /// Creates a client over `transport`.
    #[must_use]
    pub fn new(transport: Arc<dyn RoundTripper>) -> Self {
        Self {
            iam: ApiClient::new(Arc::clone(&transport), IAM_BASE_URL),
            resource_manager: ApiClient::new(transport, RESOURCE_MANAGER_BASE_URL),
        }
    }

    /// Reads a custom role.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the role id was never used.
    pub async fn get_role(&self, project: &str, role_id: &str) -> Result<Role> {
        self.iam
            .get(&format!("projects/{project}/roles/{role_id}"))
            .await
    }

    /// Creates a custom role.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyExists` if the id is taken, including by a soft-deleted role.
    pub async fn create_role(&self, project: &str, role_id: &str, role: &Role) -> Result<Role> {
        let body = CreateRoleRequest {
            role_id: role_id.to_string(),
            role: role.clone(),
        };
        self.iam
            .post(&format!("projects/{project}/roles"), &body)
            .await
    }

    /// Updates title, description and permissions of a custom role.
    ///
    /// # Errors
    ///
    /// Returns an error if the API call fails.
    pub async fn patch_role(&self, project: &str, role_id: &str, role: &Role) -> Result<Role> {
        let path = format!(
            "projects/{project}/roles/{role_id}?updateMask=title,description,includedPermissions"
        );
        self.iam.call(Method::PATCH, &path, Some(role)).await
    }

    /// Restores a soft-deleted custom role.
    ///
    /// # Errors
    ///
    /// Returns an error if the API call fails.
    pub async fn undelete_role(&self, project: &str, role_id: &str, etag: &str) -> Result<Role> {
        self.iam
            .post(
                &format!("projects/{project}/roles/{role_id}:undelete"),
                &json!({ "etag": etag }),
            )
            .await
    }

    /// Lists the live custom roles of a project.
    ///
    /// # Errors
    ///
    /// Returns an error if the API call fails.
    pub async fn list_roles(&self, project: &str) -> Result<Vec<Role>> {
        #[derive(serde::Deserialize, Default)]
        #[serde(default)]
        struct Roles {
            roles: Vec<Role>,
        }
        let roles: Roles = self
            .iam
            .get(&format!("projects/{project}/roles?showDeleted=false"))
            .await?;
        Ok(roles.roles)
    }

    /// Reads the project policy.
    ///
    /// # Errors
    ///
    /// Returns an error if the API call fails.
    pub async fn get_project_policy(&self, project: &str) -> Result<Policy> {
        let body = GetIamPolicyRequest {
            options: GetPolicyOptions {
                requested_policy_version: REQUESTED_POLICY_VERSION,
            },
        };
        self.resource_manager
            .post(&format!("projects/{project}:getIamPolicy"), &body)
            .await
    }

    /// Writes the project policy, guarded by the etag it carries.
    ///
    /// # Errors
    ///
    /// Returns `EtagMismatch` if the policy changed since it was read.
    pub async fn set_project_policy(&self, project: &str, policy: &Policy) -> Result<Policy> {
        let mut policy = policy.clone();
        policy.version = REQUESTED_POLICY_VERSION;
        let body = SetIamPolicyRequest { policy };
        debug!("Writing IAM policy of project {project}");
        self.resource_manager
            .post(&format!("projects/{project}:setIamPolicy"), &body)
            .await
            .map_err(|e| etag_conflict(e, &format!("projects/{project}")))
    }
}

/// Maps the conflict responses of `setIamPolicy` to `EtagMismatch`.
///
/// The policy was read moments earlier, so a `NotFound` here means the etag no longer matches.
pub(crate) fn etag_conflict(error: InfraError, resource: &str) -> InfraError {
    match error {
        InfraError::Cloud(
            CloudError::NotFound { .. }
            | CloudError::AlreadyExists { .. }
            | CloudError::Api { code: 409, .. }
            | CloudError::Api { code: 412, .. },
        ) => CloudError::EtagMismatch {
            resource: resource.to_string(),
        }
        .into(),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_account_email() {
        assert_eq!(
            service_account_email("control-plane", "my-proj"),
            "control-plane@my-proj.iam.gserviceaccount.com"
        );
    }

    #[test]
    fn test_etag_conflict_mapping() {
        let mapped = etag_conflict(CloudError::not_found("policy", "p").into(), "projects/p");
        assert!(mapped.is_etag_mismatch());

        let untouched = etag_conflict(CloudError::network("reset").into(), "projects/p");
        assert!(!untouched.is_etag_mismatch());
    }
}
