//! HTTP-level simulation of the project IAM, IAM roles and Cloud Storage APIs.
//!
//! Requests are matched against small per-API route tables of
//! `(method, path pattern)` and dispatched to a handler. A `{}` pattern token
//! captures one path segment; `{}:verb` captures a segment ending in `:verb`.

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};
use tracing::{debug, warn};

use crate::cloud::iam::{IAM_BASE_URL, RESOURCE_MANAGER_BASE_URL};
use crate::cloud::naming::percent_decode;
use crate::cloud::storage::{STORAGE_BASE_URL, STORAGE_UPLOAD_URL};
use crate::cloud::transport::{ErrorEnvelope, HttpRequest, HttpResponse, RoundTripper};
use crate::cloud::types::{
    BucketAccessControl, CreateRoleRequest, ObjectAccessControl, Policy, Role,
    SetIamPolicyRequest, StorageObject,
};
use crate::error::{CloudError, InfraError, Result};

/// Etag that follows `prev`: the lowercase hex SHA-256 of it.
#[must_use]
pub fn next_etag(prev: &str) -> String {
    hex::encode(Sha256::digest(prev.as_bytes()))
}

/// A request after routing.
struct Routed<'a> {
    /// Captured path segments, in order.
    params: Vec<String>,
    /// Decoded query parameters.
    query: BTreeMap<String, String>,
    /// Raw body.
    body: &'a [u8],
    /// Body content type.
    content_type: Option<&'a str>,
}

impl Routed<'_> {
    fn param(&self, i: usize) -> &str {
        self.params.get(i).map_or("", String::as_str)
    }

    fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(self.body).map_err(|e| {
            CloudError::BadRequest {
                message: format!("invalid JSON body: {e}"),
            }
            .into()
        })
    }
}

type Handler = fn(&HttpState, &Routed<'_>) -> Result<HttpResponse>;

/// One row of a route table.
struct Route {
    method: &'static str,
    pattern: &'static str,
    handler: Handler,
}

/// Routes of one API, relative to its base URL.
struct Api {
    base: &'static str,
    routes: &'static [Route],
}

const RESOURCE_MANAGER_ROUTES: &[Route] = &[
    Route {
        method: "POST",
        pattern: "projects/{}:getIamPolicy",
        handler: get_project_policy,
    },
    Route {
        method: "POST",
        pattern: "projects/{}:setIamPolicy",
        handler: set_project_policy,
    },
];

const IAM_ROUTES: &[Route] = &[
    Route {
        method: "GET",
        pattern: "projects/{}/roles",
        handler: list_roles,
    },
    Route {
        method: "POST",
        pattern: "projects/{}/roles",
        handler: create_role,
    },
    Route {
        method: "GET",
        pattern: "projects/{}/roles/{}",
        handler: get_role,
    },
    Route {
        method: "PATCH",
        pattern: "projects/{}/roles/{}",
        handler: patch_role,
    },
    Route {
        method: "POST",
        pattern: "projects/{}/roles/{}:undelete",
        handler: undelete_role,
    },
];

const STORAGE_ROUTES: &[Route] = &[
    Route {
        method: "GET",
        pattern: "b/{}/acl/{}",
        handler: get_bucket_acl,
    },
    Route {
        method: "POST",
        pattern: "b/{}/acl",
        handler: insert_bucket_acl,
    },
    Route {
        method: "PUT",
        pattern: "b/{}/acl/{}",
        handler: update_bucket_acl,
    },
    Route {
        method: "GET",
        pattern: "b/{}/o/{}/acl/{}",
        handler: get_object_acl,
    },
    Route {
        method: "POST",
        pattern: "b/{}/o/{}/acl",
        handler: insert_object_acl,
    },
    Route {
        method: "PUT",
        pattern: "b/{}/o/{}/acl/{}",
        handler: update_object_acl,
    },
    Route {
        method: "GET",
        pattern: "b/{}/iam",
        handler: get_bucket_policy,
    },
    Route {
        method: "PUT",
        pattern: "b/{}/iam",
        handler: set_bucket_policy,
    },
    Route {
        method: "GET",
        pattern: "b/{}/o/{}",
        handler: get_object,
    },
];

const UPLOAD_ROUTES: &[Route] = &[Route {
    method: "POST",
    pattern: "b/{}/o",
    handler: upload_object,
}];

const APIS: &[Api] = &[
    Api {
        base: RESOURCE_MANAGER_BASE_URL,
        routes: RESOURCE_MANAGER_ROUTES,
    },
    Api {
        base: IAM_BASE_URL,
        routes: IAM_ROUTES,
    },
    Api {
        base: STORAGE_UPLOAD_URL,
        routes: UPLOAD_ROUTES,
    },
    Api {
        base: STORAGE_BASE_URL,
        routes: STORAGE_ROUTES,
    },
];

/// Matches `path` against `pattern`, returning the captured segments.
fn match_pattern(pattern: &str, path: &str) -> Option<Vec<String>> {
    let pattern_tokens: Vec<&str> = pattern.split('/').collect();
    let path_tokens: Vec<&str> = path.split('/').collect();
    if pattern_tokens.len() != path_tokens.len() {
        return None;
    }
    let mut params = Vec::new();
    for (want, got) in pattern_tokens.iter().zip(&path_tokens) {
        if *want == "{}" {
            if got.is_empty() || got.contains(':') {
                return None;
            }
            params.push(percent_decode(got).ok()?);
        } else if let Some(verb) = want.strip_prefix("{}") {
            let captured = got.strip_suffix(verb)?;
            if captured.is_empty() {
                return None;
            }
            params.push(percent_decode(captured).ok()?);
        } else if want != got {
            return None;
        }
    }
    Some(params)
}

fn parse_query(query: &str) -> BTreeMap<String, String> {
    url::form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect()
}

type PolicyMap = Mutex<BTreeMap<String, Policy>>;

/// State behind the HTTP handlers; each map has its own lock.
#[derive(Debug, Default)]
struct HttpState {
    project_policies: PolicyMap,
    bucket_policies: PolicyMap,
    roles: Mutex<BTreeMap<(String, String), Role>>,
    bucket_acls: Mutex<BTreeMap<(String, String), BucketAccessControl>>,
    object_acls: Mutex<BTreeMap<(String, String, String), ObjectAccessControl>>,
    objects: Mutex<BTreeMap<(String, String), (StorageObject, Vec<u8>)>>,
}

fn ok<T: Serialize>(value: &T) -> Result<HttpResponse> {
    HttpResponse::json(200, value)
}

fn empty_policy() -> Policy {
    Policy {
        bindings: Vec::new(),
        etag: next_etag(""),
        version: 1,
    }
}

fn read_policy(map: &PolicyMap, key: &str) -> Policy {
    map.lock()
        .unwrap_or_else(PoisonError::into_inner)
        .entry(key.to_string())
        .or_insert_with(empty_policy)
        .clone()
}

fn write_policy(map: &PolicyMap, key: &str, mut incoming: Policy) -> Result<Policy> {
    let mut policies = map.lock().unwrap_or_else(PoisonError::into_inner);
    let stored = policies.entry(key.to_string()).or_insert_with(empty_policy);
    if incoming.etag != stored.etag {
        debug!("Rejecting policy write on {key}: etag {} != {}", incoming.etag, stored.etag);
        return Err(CloudError::not_found("policy etag", format!("{key} ({})", incoming.etag)).into());
    }
    incoming.etag = next_etag(&stored.etag);
    *stored = incoming.clone();
    Ok(incoming)
}

fn get_project_policy(state: &HttpState, req: &Routed<'_>) -> Result<HttpResponse> {
    ok(&read_policy(&state.project_policies, req.param(0)))
}

fn set_project_policy(state: &HttpState, req: &Routed<'_>) -> Result<HttpResponse> {
    let body: SetIamPolicyRequest = req.json()?;
    ok(&write_policy(&state.project_policies, req.param(0), body.policy)?)
}

fn get_bucket_policy(state: &HttpState, req: &Routed<'_>) -> Result<HttpResponse> {
    ok(&read_policy(&state.bucket_policies, req.param(0)))
}

fn set_bucket_policy(state: &HttpState, req: &Routed<'_>) -> Result<HttpResponse> {
    let policy: Policy = req.json()?;
    ok(&write_policy(&state.bucket_policies, req.param(0), policy)?)
}

fn role_key(req: &Routed<'_>) -> (String, String) {
    (req.param(0).to_string(), req.param(1).to_string())
}

fn list_roles(state: &HttpState, req: &Routed<'_>) -> Result<HttpResponse> {
    let show_deleted = req.query.get("showDeleted").is_some_and(|v| v == "true");
    let roles: Vec<Role> = state
        .roles
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .iter()
        .filter(|((p, _), r)| p == req.param(0) && (show_deleted || !r.deleted))
        .map(|(_, r)| r.clone())
        .collect();
    ok(&serde_json::json!({ "roles": roles }))
}

fn create_role(state: &HttpState, req: &Routed<'_>) -> Result<HttpResponse> {
    let body: CreateRoleRequest = req.json()?;
    let key = (req.param(0).to_string(), body.role_id.clone());
    let mut roles = state.roles.lock().unwrap_or_else(PoisonError::into_inner);
    if roles.contains_key(&key) {
        return Err(CloudError::already_exists("role", &body.role_id).into());
    }
    let role = Role {
        name: format!("projects/{}/roles/{}", key.0, key.1),
        etag: next_etag(&key.1),
        deleted: false,
        ..body.role
    };
    roles.insert(key, role.clone());
    ok(&role)
}

fn get_role(state: &HttpState, req: &Routed<'_>) -> Result<HttpResponse> {
    let key = role_key(req);
    let roles = state.roles.lock().unwrap_or_else(PoisonError::into_inner);
    let role = roles
        .get(&key)
        .ok_or_else(|| CloudError::not_found("role", &key.1))?;
    ok(role)
}

fn patch_role(state: &HttpState, req: &Routed<'_>) -> Result<HttpResponse> {
    let patch: Role = req.json()?;
    let mask = req.query.get("updateMask").cloned().unwrap_or_default();
    let key = role_key(req);
    let mut roles = state.roles.lock().unwrap_or_else(PoisonError::into_inner);
    let role = roles
        .get_mut(&key)
        .ok_or_else(|| CloudError::not_found("role", &key.1))?;
    for field in mask.split(',') {
        match field {
            "title" => role.title.clone_from(&patch.title),
            "description" => role.description.clone_from(&patch.description),
            "includedPermissions" => role.included_permissions.clone_from(&patch.included_permissions),
            _ => {}
        }
    }
    role.etag = next_etag(&role.etag);
    ok(role)
}

fn undelete_role(state: &HttpState, req: &Routed<'_>) -> Result<HttpResponse> {
    #[derive(serde::Deserialize, Default)]
    #[serde(default)]
    struct Undelete {
        etag: String,
    }
    let body: Undelete = req.json()?;
    let key = role_key(req);
    let mut roles = state.roles.lock().unwrap_or_else(PoisonError::into_inner);
    let role = roles
        .get_mut(&key)
        .ok_or_else(|| CloudError::not_found("role", &key.1))?;
    if !body.etag.is_empty() && body.etag != role.etag {
        return Err(CloudError::BadRequest {
            message: format!("etag mismatch undeleting role {}", key.1),
        }
        .into());
    }
    role.deleted = false;
    role.etag = next_etag(&role.etag);
    ok(role)
}

fn get_bucket_acl(state: &HttpState, req: &Routed<'_>) -> Result<HttpResponse> {
    let key = (req.param(0).to_string(), req.param(1).to_string());
    let acls = state.bucket_acls.lock().unwrap_or_else(PoisonError::into_inner);
    let acl = acls
        .get(&key)
        .ok_or_else(|| CloudError::not_found("bucketAccessControl", &key.1))?;
    ok(acl)
}

fn insert_bucket_acl(state: &HttpState, req: &Routed<'_>) -> Result<HttpResponse> {
    let mut acl: BucketAccessControl = req.json()?;
    acl.bucket = req.param(0).to_string();
    state
        .bucket_acls
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .insert((acl.bucket.clone(), acl.entity.clone()), acl.clone());
    ok(&acl)
}

fn update_bucket_acl(state: &HttpState, req: &Routed<'_>) -> Result<HttpResponse> {
    let update: BucketAccessControl = req.json()?;
    let key = (req.param(0).to_string(), req.param(1).to_string());
    let mut acls = state.bucket_acls.lock().unwrap_or_else(PoisonError::into_inner);
    let acl = acls
        .get_mut(&key)
        .ok_or_else(|| CloudError::not_found("bucketAccessControl", &key.1))?;
    acl.role = update.role;
    ok(acl)
}

fn object_acl_key(req: &Routed<'_>) -> (String, String, String) {
    (
        req.param(0).to_string(),
        req.param(1).to_string(),
        req.param(2).to_string(),
    )
}

fn get_object_acl(state: &HttpState, req: &Routed<'_>) -> Result<HttpResponse> {
    let key = object_acl_key(req);
    let acls = state.object_acls.lock().unwrap_or_else(PoisonError::into_inner);
    let acl = acls
        .get(&key)
        .ok_or_else(|| CloudError::not_found("objectAccessControl", &key.2))?;
    ok(acl)
}

fn insert_object_acl(state: &HttpState, req: &Routed<'_>) -> Result<HttpResponse> {
    let mut acl: ObjectAccessControl = req.json()?;
    acl.bucket = req.param(0).to_string();
    acl.object = req.param(1).to_string();
    state
        .object_acls
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(
            (acl.bucket.clone(), acl.object.clone(), acl.entity.clone()),
            acl.clone(),
        );
    ok(&acl)
}

fn update_object_acl(state: &HttpState, req: &Routed<'_>) -> Result<HttpResponse> {
    let update: ObjectAccessControl = req.json()?;
    let key = object_acl_key(req);
    let mut acls = state.object_acls.lock().unwrap_or_else(PoisonError::into_inner);
    let acl = acls
        .get_mut(&key)
        .ok_or_else(|| CloudError::not_found("objectAccessControl", &key.2))?;
    acl.role = update.role;
    ok(acl)
}

fn get_object(state: &HttpState, req: &Routed<'_>) -> Result<HttpResponse> {
    let key = (req.param(0).to_string(), req.param(1).to_string());
    let objects = state.objects.lock().unwrap_or_else(PoisonError::into_inner);
    let (object, _) = objects
        .get(&key)
        .ok_or_else(|| CloudError::not_found("object", &key.1))?;
    ok(object)
}

fn upload_object(state: &HttpState, req: &Routed<'_>) -> Result<HttpResponse> {
    let name = req.query.get("name").cloned().unwrap_or_default();
    if name.is_empty() {
        return Err(CloudError::BadRequest {
            message: "missing object name".to_string(),
        }
        .into());
    }
    let object = StorageObject {
        bucket: req.param(0).to_string(),
        name: name.clone(),
        size: req.body.len().to_string(),
        content_type: req.content_type.unwrap_or_default().to_string(),
    };
    state
        .objects
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .insert((object.bucket.clone(), name), (object.clone(), req.body.to_vec()));
    ok(&object)
}

/// Round-tripper answering the niche APIs from memory.
#[derive(Debug, Default)]
pub struct SimulatorTransport {
    state: HttpState,
}

impl SimulatorTransport {
    /// Creates an empty transport.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces a project policy verbatim, etag included.
    pub fn seed_project_policy(&self, project: &str, policy: Policy) {
        self.state
            .project_policies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(project.to_string(), policy);
    }

    /// Current project policy, if one was read or written.
    #[must_use]
    pub fn project_policy(&self, project: &str) -> Option<Policy> {
        self.state
            .project_policies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(project)
            .cloned()
    }

    /// Soft-deletes a custom role. Returns false if it does not exist.
    pub fn delete_role(&self, project: &str, role_id: &str) -> bool {
        let mut roles = self.state.roles.lock().unwrap_or_else(PoisonError::into_inner);
        match roles.get_mut(&(project.to_string(), role_id.to_string())) {
            Some(role) => {
                role.deleted = true;
                role.etag = next_etag(&role.etag);
                true
            }
            None => false,
        }
    }

    /// Content of an uploaded object.
    #[must_use]
    pub fn object_data(&self, bucket: &str, name: &str) -> Option<Vec<u8>> {
        self.state
            .objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(bucket.to_string(), name.to_string()))
            .map(|(_, data)| data.clone())
    }

    fn dispatch(&self, request: &HttpRequest) -> Option<Result<HttpResponse>> {
        let (path_and_base, query) = request
            .url
            .split_once('?')
            .unwrap_or((request.url.as_str(), ""));
        let api = APIS.iter().find(|api| path_and_base.starts_with(api.base))?;
        let path = &path_and_base[api.base.len()..];
        let method = request.method.as_str();

        api.routes.iter().find_map(|route| {
            if route.method != method {
                return None;
            }
            let params = match_pattern(route.pattern, path)?;
            let routed = Routed {
                params,
                query: parse_query(query),
                body: request.body.as_deref().unwrap_or_default(),
                content_type: request.content_type.as_deref(),
            };
            Some((route.handler)(&self.state, &routed))
        })
    }
}

#[async_trait]
impl RoundTripper for SimulatorTransport {
    async fn round_trip(&self, request: HttpRequest) -> Result<HttpResponse> {
        debug!("Simulated {} {}", request.method, request.url);
        match self.dispatch(&request) {
            None => {
                warn!("No simulator handler for {} {}", request.method, request.url);
                Err(CloudError::UnhandledRequest {
                    method: request.method.to_string(),
                    url: request.url,
                }
                .into())
            }
            Some(Ok(response)) => Ok(response),
            Some(Err(InfraError::Cloud(error))) => {
                let (_, code) = error.wire_status();
                HttpResponse::json(code, &ErrorEnvelope::from_error(&error))
            }
            Some(Err(other)) => {
                let error = CloudError::BadRequest {
                    message: other.to_string(),
                };
                HttpResponse::json(400, &ErrorEnvelope::from_error(&error))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::Method;

    fn post(url: &str, body: &serde_json::Value) -> HttpRequest {
        HttpRequest {
            method: Method::POST,
            url: url.to_string(),
            body: Some(serde_json::to_vec(body).expect("json")),
            content_type: Some(crate::cloud::transport::JSON_CONTENT_TYPE.to_string()),
        }
    }

    #[test]
    fn test_next_etag_is_sha256_hex() {
        assert_eq!(
            next_etag(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_match_pattern() {
        assert_eq!(
            match_pattern("projects/{}:getIamPolicy", "projects/p1:getIamPolicy"),
            Some(vec!["p1".to_string()])
        );
        assert_eq!(match_pattern("projects/{}/roles/{}", "projects/p/roles/r:undelete"), None);
        assert_eq!(
            match_pattern("b/{}/o/{}/acl", "b/bucket/o/a%2Fb/acl"),
            Some(vec!["bucket".to_string(), "a/b".to_string()])
        );
        assert_eq!(match_pattern("b/{}/acl", "b/x/acl/extra"), None);
    }

    #[test]
    fn test_parse_query_decodes_values() {
        let query = parse_query("showDeleted=true&filter=labels.name%3Dapi+x&empty");
        assert_eq!(query.get("showDeleted").map(String::as_str), Some("true"));
        assert_eq!(query.get("filter").map(String::as_str), Some("labels.name=api x"));
        assert_eq!(query.get("empty").map(String::as_str), Some(""));
    }

    #[tokio::test]
    async fn test_get_policy_synthesizes_etag() {
        let transport = SimulatorTransport::new();
        let response = transport
            .round_trip(post(
                "https://cloudresourcemanager.googleapis.com/v1/projects/p:getIamPolicy",
                &serde_json::json!({}),
            ))
            .await
            .expect("handled");
        assert_eq!(response.status, 200);
        assert_eq!(response.content_type, "application/json; charset=UTF-8");
        let policy: Policy = serde_json::from_slice(&response.body).expect("policy");
        assert!(policy.bindings.is_empty());
        assert_eq!(policy.etag, next_etag(""));
    }

    #[tokio::test]
    async fn test_set_policy_with_stale_etag_is_not_found() {
        let transport = SimulatorTransport::new();
        transport.seed_project_policy(
            "p",
            Policy {
                etag: "h0".into(),
                ..Policy::default()
            },
        );
        let response = transport
            .round_trip(post(
                "https://cloudresourcemanager.googleapis.com/v1/projects/p:setIamPolicy",
                &serde_json::json!({"policy": {"etag": "h1", "version": 3}}),
            ))
            .await
            .expect("handled");
        assert_eq!(response.status, 404);
        let envelope: ErrorEnvelope = serde_json::from_slice(&response.body).expect("envelope");
        assert_eq!(envelope.error.code, 404);
        assert_eq!(envelope.error.status, "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_set_policy_advances_etag() {
        let transport = SimulatorTransport::new();
        transport.seed_project_policy(
            "p",
            Policy {
                etag: "h0".into(),
                ..Policy::default()
            },
        );
        let response = transport
            .round_trip(post(
                "https://cloudresourcemanager.googleapis.com/v1/projects/p:setIamPolicy",
                &serde_json::json!({"policy": {"etag": "h0", "version": 3}}),
            ))
            .await
            .expect("handled");
        assert_eq!(response.status, 200);
        assert_eq!(
            transport.project_policy("p").map(|p| p.etag),
            Some(next_etag("h0"))
        );
    }

    #[tokio::test]
    async fn test_unknown_route_is_an_error() {
        let transport = SimulatorTransport::new();
        let err = transport
            .round_trip(post(
                "https://cloudresourcemanager.googleapis.com/v1/folders/f:getIamPolicy",
                &serde_json::json!({}),
            ))
            .await
            .expect_err("unhandled");
        assert!(matches!(err, InfraError::Cloud(CloudError::UnhandledRequest { .. })));
    }
}
