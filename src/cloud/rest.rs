//! Live compute facades speaking JSON REST.

use async_trait::async_trait;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use url::form_urlencoded;

use crate::error::Result;

use super::compute::{
    AddressClient, BackendServiceClient, Compute, DiskClient, FirewallClient, ForwardingRuleClient,
    HealthCheckClient, HttpHealthCheckClient, InstanceGroupManagerClient, InstanceTemplateClient,
    LocationClient, NetworkClient, OperationClient, RouterClient, SubnetworkClient,
    TargetPoolClient,
};
use super::transport::{ApiClient, RoundTripper};
use super::types::{
    Address, BackendService, Disk, Firewall, ForwardingRule, HealthCheck, HttpHealthCheck,
    InstanceGroupManager, InstanceManagedByIgmError, InstanceTemplate, ListPage, ManagedInstance,
    Network, Operation, Project, Region, Router, Subnetwork, TargetPool, Zone, ZoneSetLabelsRequest,
};
use super::url::{COMPUTE_BASE_URL, Scope};

/// Compute API client backed by a [`RoundTripper`].
#[derive(Debug, Clone)]
pub struct RestCompute {
    /// JSON client rooted at the compute base URL.
    api: ApiClient,
}

impl RestCompute {
    /// Creates a client over `transport`.
    #[must_use]
    pub fn new(transport: Arc<dyn RoundTripper>) -> Self {
        Self {
            api: ApiClient::new(transport, COMPUTE_BASE_URL),
        }
    }

    /// Collection path for a global, regional or zonal collection.
    fn collection(project: &str, scope: &Scope, collection: &str) -> String {
        match scope {
            Scope::Global => format!("projects/{project}/global/{collection}"),
            Scope::Region(r) => format!("projects/{project}/regions/{r}/{collection}"),
            Scope::Zone(z) => format!("projects/{project}/zones/{z}/{collection}"),
        }
    }

    /// Collection path, regional unless `region` is empty.
    fn routed(project: &str, region: &str, collection: &str) -> String {
        Self::collection(project, &Scope::regional_or_global(region), collection)
    }

    /// Follows `nextPageToken` until every item of a list has been read.
    async fn list_all<T: DeserializeOwned>(&self, path: &str, filter: Option<&str>) -> Result<Vec<T>> {
        let mut items = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let query = {
                let mut query = form_urlencoded::Serializer::new(String::new());
                if let Some(filter) = filter {
                    query.append_pair("filter", filter);
                }
                if let Some(t) = &token {
                    query.append_pair("pageToken", t);
                }
                query.finish()
            };
            let url = if query.is_empty() {
                path.to_string()
            } else {
                format!("{path}?{query}")
            };
            let page: ListPage<T> = self.api.get(&url).await?;
            items.extend(page.items);
            match page.next_page_token {
                Some(next) if !next.is_empty() => token = Some(next),
                _ => return Ok(items),
            }
        }
    }

    async fn insert_at<B: Serialize + Sync>(&self, path: &str, body: &B) -> Result<Operation> {
        self.api.post(path, body).await
    }
}

#[async_trait]
impl NetworkClient for RestCompute {
    async fn insert(&self, project: &str, network: &Network) -> Result<Operation> {
        self.insert_at(&Self::collection(project, &Scope::Global, "networks"), network)
            .await
    }

    async fn get(&self, project: &str, name: &str) -> Result<Network> {
        self.api
            .get(&format!("{}/{name}", Self::collection(project, &Scope::Global, "networks")))
            .await
    }

    async fn delete(&self, project: &str, name: &str) -> Result<Operation> {
        self.api
            .delete(&format!("{}/{name}", Self::collection(project, &Scope::Global, "networks")))
            .await
    }

    async fn list(&self, project: &str) -> Result<Vec<Network>> {
        self.list_all(&Self::collection(project, &Scope::Global, "networks"), None)
            .await
    }
}

#[async_trait]
impl SubnetworkClient for RestCompute {
    async fn insert(&self, project: &str, region: &str, subnet: &Subnetwork) -> Result<Operation> {
        self.insert_at(&Self::routed(project, region, "subnetworks"), subnet)
            .await
    }

    async fn patch(&self, project: &str, region: &str, subnet: &Subnetwork) -> Result<Operation> {
        let path = format!("{}/{}", Self::routed(project, region, "subnetworks"), subnet.name);
        self.api.call(Method::PATCH, &path, Some(subnet)).await
    }

    async fn get(&self, project: &str, region: &str, name: &str) -> Result<Subnetwork> {
        self.api
            .get(&format!("{}/{name}", Self::routed(project, region, "subnetworks")))
            .await
    }

    async fn delete(&self, project: &str, region: &str, name: &str) -> Result<Operation> {
        self.api
            .delete(&format!("{}/{name}", Self::routed(project, region, "subnetworks")))
            .await
    }

    async fn list(&self, project: &str, region: &str) -> Result<Vec<Subnetwork>> {
        self.list_all(&Self::routed(project, region, "subnetworks"), None)
            .await
    }
}

#[async_trait]
impl FirewallClient for RestCompute {
    async fn insert(&self, project: &str, firewall: &Firewall) -> Result<Operation> {
        self.insert_at(&Self::collection(project, &Scope::Global, "firewalls"), firewall)
            .await
    }

    async fn update(&self, project: &str, name: &str, firewall: &Firewall) -> Result<Operation> {
        let path = format!("{}/{name}", Self::collection(project, &Scope::Global, "firewalls"));
        self.api.call(Method::PUT, &path, Some(firewall)).await
    }

    async fn get(&self, project: &str, name: &str) -> Result<Firewall> {
        self.api
            .get(&format!("{}/{name}", Self::collection(project, &Scope::Global, "firewalls")))
            .await
    }

    async fn delete(&self, project: &str, name: &str) -> Result<Operation> {
        self.api
            .delete(&format!("{}/{name}", Self::collection(project, &Scope::Global, "firewalls")))
            .await
    }

    async fn list(&self, project: &str) -> Result<Vec<Firewall>> {
        self.list_all(&Self::collection(project, &Scope::Global, "firewalls"), None)
            .await
    }
}

#[async_trait]
impl RouterClient for RestCompute {
    async fn insert(&self, project: &str, region: &str, router: &Router) -> Result<Operation> {
        self.insert_at(&Self::routed(project, region, "routers"), router)
            .await
    }

    async fn patch(&self, project: &str, region: &str, router: &Router) -> Result<Operation> {
        let path = format!("{}/{}", Self::routed(project, region, "routers"), router.name);
        self.api.call(Method::PATCH, &path, Some(router)).await
    }

    async fn get(&self, project: &str, region: &str, name: &str) -> Result<Router> {
        self.api
            .get(&format!("{}/{name}", Self::routed(project, region, "routers")))
            .await
    }

    async fn delete(&self, project: &str, region: &str, name: &str) -> Result<Operation> {
        self.api
            .delete(&format!("{}/{name}", Self::routed(project, region, "routers")))
            .await
    }

    async fn list(&self, project: &str, region: &str) -> Result<Vec<Router>> {
        self.list_all(&Self::routed(project, region, "routers"), None)
            .await
    }
}

#[async_trait]
impl AddressClient for RestCompute {
    async fn insert(&self, project: &str, region: &str, address: &Address) -> Result<Operation> {
        self.insert_at(&Self::routed(project, region, "addresses"), address)
            .await
    }

    async fn get(&self, project: &str, region: &str, name: &str) -> Result<Address> {
        self.api
            .get(&format!("{}/{name}", Self::routed(project, region, "addresses")))
            .await
    }

    async fn delete(&self, project: &str, region: &str, name: &str) -> Result<Operation> {
        self.api
            .delete(&format!("{}/{name}", Self::routed(project, region, "addresses")))
            .await
    }

    async fn list(&self, project: &str, region: &str) -> Result<Vec<Address>> {
        self.list_all(&Self::routed(project, region, "addresses"), None)
            .await
    }

    async fn list_with_filter(
        &self,
        project: &str,
        region: &str,
        filter: &str,
    ) -> Result<Vec<Address>> {
        self.list_all(&Self::routed(project, region, "addresses"), Some(filter))
            .await
    }
}

#[async_trait]
impl ForwardingRuleClient for RestCompute {
    async fn insert(&self, project: &str, region: &str, rule: &ForwardingRule) -> Result<Operation> {
        self.insert_at(&Self::routed(project, region, "forwardingRules"), rule)
            .await
    }

    async fn get(&self, project: &str, region: &str, name: &str) -> Result<ForwardingRule> {
        self.api
            .get(&format!("{}/{name}", Self::routed(project, region, "forwardingRules")))
            .await
    }

    async fn delete(&self, project: &str, region: &str, name: &str) -> Result<Operation> {
        self.api
            .delete(&format!("{}/{name}", Self::routed(project, region, "forwardingRules")))
            .await
    }

    async fn list(&self, project: &str, region: &str) -> Result<Vec<ForwardingRule>> {
        self.list_all(&Self::routed(project, region, "forwardingRules"), None)
            .await
    }
}

#[async_trait]
impl HttpHealthCheckClient for RestCompute {
    async fn insert(&self, project: &str, check: &HttpHealthCheck) -> Result<Operation> {
        self.insert_at(&Self::collection(project, &Scope::Global, "httpHealthChecks"), check)
            .await
    }

    async fn get(&self, project: &str, name: &str) -> Result<HttpHealthCheck> {
        self.api
            .get(&format!(
                "{}/{name}",
                Self::collection(project, &Scope::Global, "httpHealthChecks")
            ))
            .await
    }

    async fn delete(&self, project: &str, name: &str) -> Result<Operation> {
        self.api
            .delete(&format!(
                "{}/{name}",
                Self::collection(project, &Scope::Global, "httpHealthChecks")
            ))
            .await
    }

    async fn list(&self, project: &str) -> Result<Vec<HttpHealthCheck>> {
        self.list_all(&Self::collection(project, &Scope::Global, "httpHealthChecks"), None)
            .await
    }
}

#[async_trait]
impl HealthCheckClient for RestCompute {
    async fn insert(&self, project: &str, region: &str, check: &HealthCheck) -> Result<Operation> {
        self.insert_at(&Self::routed(project, region, "healthChecks"), check)
            .await
    }

    async fn get(&self, project: &str, region: &str, name: &str) -> Result<HealthCheck> {
        self.api
            .get(&format!("{}/{name}", Self::routed(project, region, "healthChecks")))
            .await
    }

    async fn delete(&self, project: &str, region: &str, name: &str) -> Result<Operation> {
        self.api
            .delete(&format!("{}/{name}", Self::routed(project, region, "healthChecks")))
            .await
    }

    async fn list(&self, project: &str, region: &str) -> Result<Vec<HealthCheck>> {
        self.list_all(&Self::routed(project, region, "healthChecks"), None)
            .await
    }
}

#[async_trait]
impl BackendServiceClient for RestCompute {
    async fn insert(
        &self,
        project: &str,
        region: &str,
        service: &BackendService,
    ) -> Result<Operation> {
        self.insert_at(&Self::routed(project, region, "backendServices"), service)
            .await
    }

    async fn update(
        &self,
        project: &str,
        region: &str,
        service: &BackendService,
    ) -> Result<Operation> {
        let path = format!("{}/{}", Self::routed(project, region, "backendServices"), service.name);
        self.api.call(Method::PUT, &path, Some(service)).await
    }

    async fn get(&self, project: &str, region: &str, name: &str) -> Result<BackendService> {
        self.api
            .get(&format!("{}/{name}", Self::routed(project, region, "backendServices")))
            .await
    }

    async fn delete(&self, project: &str, region: &str, name: &str) -> Result<Operation> {
        self.api
            .delete(&format!("{}/{name}", Self::routed(project, region, "backendServices")))
            .await
    }

    async fn list(&self, project: &str, region: &str) -> Result<Vec<BackendService>> {
        self.list_all(&Self::routed(project, region, "backendServices"), None)
            .await
    }
}

#[async_trait]
impl TargetPoolClient for RestCompute {
    async fn insert(&self, project: &str, region: &str, pool: &TargetPool) -> Result<Operation> {
        self.insert_at(&Self::routed(project, region, "targetPools"), pool)
            .await
    }

    async fn get(&self, project: &str, region: &str, name: &str) -> Result<TargetPool> {
        self.api
            .get(&format!("{}/{name}", Self::routed(project, region, "targetPools")))
            .await
    }

    async fn delete(&self, project: &str, region: &str, name: &str) -> Result<Operation> {
        self.api
            .delete(&format!("{}/{name}", Self::routed(project, region, "targetPools")))
            .await
    }

    async fn list(&self, project: &str, region: &str) -> Result<Vec<TargetPool>> {
        self.list_all(&Self::routed(project, region, "targetPools"), None)
            .await
    }

    async fn add_health_check(
        &self,
        project: &str,
        region: &str,
        pool: &str,
        health_check_link: &str,
    ) -> Result<Operation> {
        let path = format!("{}/{pool}/addHealthCheck", Self::routed(project, region, "targetPools"));
        let body = json!({ "healthChecks": [{ "healthCheck": health_check_link }] });
        self.api.post(&path, &body).await
    }
}

#[async_trait]
impl InstanceTemplateClient for RestCompute {
    async fn insert(&self, project: &str, template: &InstanceTemplate) -> Result<Operation> {
        self.insert_at(&Self::collection(project, &Scope::Global, "instanceTemplates"), template)
            .await
    }

    async fn get(&self, project: &str, name: &str) -> Result<InstanceTemplate> {
        self.api
            .get(&format!(
                "{}/{name}",
                Self::collection(project, &Scope::Global, "instanceTemplates")
            ))
            .await
    }

    async fn delete(&self, project: &str, name: &str) -> Result<Operation> {
        self.api
            .delete(&format!(
                "{}/{name}",
                Self::collection(project, &Scope::Global, "instanceTemplates")
            ))
            .await
    }

    async fn list(&self, project: &str) -> Result<Vec<InstanceTemplate>> {
        self.list_all(&Self::collection(project, &Scope::Global, "instanceTemplates"), None)
            .await
    }
}

#[async_trait]
impl InstanceGroupManagerClient for RestCompute {
    async fn insert(
        &self,
        project: &str,
        zone: &str,
        igm: &InstanceGroupManager,
    ) -> Result<Operation> {
        let scope = Scope::Zone(zone.to_string());
        self.insert_at(&Self::collection(project, &scope, "instanceGroupManagers"), igm)
            .await
    }

    async fn get(&self, project: &str, zone: &str, name: &str) -> Result<InstanceGroupManager> {
        let scope = Scope::Zone(zone.to_string());
        self.api
            .get(&format!("{}/{name}", Self::collection(project, &scope, "instanceGroupManagers")))
            .await
    }

    async fn delete(&self, project: &str, zone: &str, name: &str) -> Result<Operation> {
        let scope = Scope::Zone(zone.to_string());
        self.api
            .delete(&format!("{}/{name}", Self::collection(project, &scope, "instanceGroupManagers")))
            .await
    }

    async fn list(&self, project: &str, zone: &str) -> Result<Vec<InstanceGroupManager>> {
        let scope = Scope::Zone(zone.to_string());
        self.list_all(&Self::collection(project, &scope, "instanceGroupManagers"), None)
            .await
    }

    async fn list_managed_instances(
        &self,
        project: &str,
        zone: &str,
        name: &str,
    ) -> Result<Vec<ManagedInstance>> {
        #[derive(serde::Deserialize, Default)]
        #[serde(rename_all = "camelCase", default)]
        struct ManagedInstances {
            managed_instances: Vec<ManagedInstance>,
        }

        let scope = Scope::Zone(zone.to_string());
        let path = format!(
            "{}/{name}/listManagedInstances",
            Self::collection(project, &scope, "instanceGroupManagers")
        );
        let response: ManagedInstances = self.api.post(&path, &json!({})).await?;
        Ok(response.managed_instances)
    }

    async fn list_errors(
        &self,
        project: &str,
        zone: &str,
        name: &str,
    ) -> Result<Vec<InstanceManagedByIgmError>> {
        let scope = Scope::Zone(zone.to_string());
        let path = format!(
            "{}/{name}/listErrors",
            Self::collection(project, &scope, "instanceGroupManagers")
        );
        self.list_all(&path, None).await
    }

    async fn recreate_instances(
        &self,
        project: &str,
        zone: &str,
        name: &str,
        instances: &[String],
    ) -> Result<Operation> {
        let scope = Scope::Zone(zone.to_string());
        let path = format!(
            "{}/{name}/recreateInstances",
            Self::collection(project, &scope, "instanceGroupManagers")
        );
        self.api.post(&path, &json!({ "instances": instances })).await
    }

    async fn set_target_pools(
        &self,
        project: &str,
        zone: &str,
        name: &str,
        pools: &[String],
    ) -> Result<Operation> {
        let scope = Scope::Zone(zone.to_string());
        let path = format!(
            "{}/{name}/setTargetPools",
            Self::collection(project, &scope, "instanceGroupManagers")
        );
        self.api.post(&path, &json!({ "targetPools": pools })).await
    }

    async fn set_instance_template(
        &self,
        project: &str,
        zone: &str,
        name: &str,
        template_link: &str,
    ) -> Result<Operation> {
        let scope = Scope::Zone(zone.to_string());
        let path = format!(
            "{}/{name}/setInstanceTemplate",
            Self::collection(project, &scope, "instanceGroupManagers")
        );
        self.api
            .post(&path, &json!({ "instanceTemplate": template_link }))
            .await
    }

    async fn resize(&self, project: &str, zone: &str, name: &str, size: i64) -> Result<Operation> {
        let scope = Scope::Zone(zone.to_string());
        let path = format!(
            "{}/{name}/resize?size={size}",
            Self::collection(project, &scope, "instanceGroupManagers")
        );
        self.api.post(&path, &json!({})).await
    }
}

#[async_trait]
impl DiskClient for RestCompute {
    async fn insert(&self, project: &str, zone: &str, disk: &Disk) -> Result<Operation> {
        let scope = Scope::Zone(zone.to_string());
        self.insert_at(&Self::collection(project, &scope, "disks"), disk)
            .await
    }

    async fn get(&self, project: &str, zone: &str, name: &str) -> Result<Disk> {
        let scope = Scope::Zone(zone.to_string());
        self.api
            .get(&format!("{}/{name}", Self::collection(project, &scope, "disks")))
            .await
    }

    async fn delete(&self, project: &str, zone: &str, name: &str) -> Result<Operation> {
        let scope = Scope::Zone(zone.to_string());
        self.api
            .delete(&format!("{}/{name}", Self::collection(project, &scope, "disks")))
            .await
    }

    async fn list(&self, project: &str, zone: &str, filter: Option<&str>) -> Result<Vec<Disk>> {
        let scope = Scope::Zone(zone.to_string());
        self.list_all(&Self::collection(project, &scope, "disks"), filter)
            .await
    }

    async fn aggregated_list(&self, project: &str) -> Result<Vec<Disk>> {
        #[derive(serde::Deserialize, Default)]
        #[serde(default)]
        struct ScopedDisks {
            disks: Vec<Disk>,
        }
        #[derive(serde::Deserialize, Default)]
        #[serde(rename_all = "camelCase", default)]
        struct Aggregated {
            items: BTreeMap<String, ScopedDisks>,
            next_page_token: Option<String>,
        }

        let mut disks = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let mut path = format!("projects/{project}/aggregated/disks");
            if let Some(t) = &token {
                let query = form_urlencoded::Serializer::new(String::new())
                    .append_pair("pageToken", t)
                    .finish();
                path = format!("{path}?{query}");
            }
            let page: Aggregated = self.api.get(&path).await?;
            disks.extend(page.items.into_values().flat_map(|s| s.disks));
            match page.next_page_token {
                Some(next) if !next.is_empty() => token = Some(next),
                _ => return Ok(disks),
            }
        }
    }

    async fn set_labels(
        &self,
        project: &str,
        zone: &str,
        name: &str,
        labels: &BTreeMap<String, String>,
        fingerprint: &str,
    ) -> Result<Operation> {
        let scope = Scope::Zone(zone.to_string());
        let path = format!("{}/{name}/setLabels", Self::collection(project, &scope, "disks"));
        let body = ZoneSetLabelsRequest {
            labels: labels.clone(),
            label_fingerprint: fingerprint.to_string(),
        };
        self.api.post(&path, &body).await
    }
}

#[async_trait]
impl LocationClient for RestCompute {
    async fn list_zones(&self, project: &str, region: Option<&str>) -> Result<Vec<Zone>> {
        let zones: Vec<Zone> = self.list_all(&format!("projects/{project}/zones"), None).await?;
        Ok(match region {
            Some(region) => zones
                .into_iter()
                .filter(|z| super::url::last_component(&z.region) == region)
                .collect(),
            None => zones,
        })
    }

    async fn list_regions(&self, project: &str) -> Result<Vec<Region>> {
        self.list_all(&format!("projects/{project}/regions"), None)
            .await
    }

    async fn get_project(&self, project: &str) -> Result<Project> {
        self.api.get(&format!("projects/{project}")).await
    }
}

#[async_trait]
impl OperationClient for RestCompute {
    async fn get(&self, project: &str, scope: &Scope, name: &str) -> Result<Operation> {
        self.api
            .get(&format!("{}/{name}", Self::collection(project, scope, "operations")))
            .await
    }
}

impl Compute for RestCompute {
    fn networks(&self) -> &dyn NetworkClient {
        self
    }
    fn subnetworks(&self) -> &dyn SubnetworkClient {
        self
    }
    fn firewalls(&self) -> &dyn FirewallClient {
        self
    }
    fn routers(&self) -> &dyn RouterClient {
        self
    }
    fn addresses(&self) -> &dyn AddressClient {
        self
    }
    fn forwarding_rules(&self) -> &dyn ForwardingRuleClient {
        self
    }
    fn http_health_checks(&self) -> &dyn HttpHealthCheckClient {
        self
    }
    fn health_checks(&self) -> &dyn HealthCheckClient {
        self
    }
    fn backend_services(&self) -> &dyn BackendServiceClient {
        self
    }
    fn target_pools(&self) -> &dyn TargetPoolClient {
        self
    }
    fn instance_templates(&self) -> &dyn InstanceTemplateClient {
        self
    }
    fn instance_group_managers(&self) -> &dyn InstanceGroupManagerClient {
        self
    }
    fn disks(&self) -> &dyn DiskClient {
        self
    }
    fn locations(&self) -> &dyn LocationClient {
        self
    }
    fn operations(&self) -> &dyn OperationClient {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::transport::ReqwestTransport;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Rewrites the compute base URL onto a local mock server.
    struct Rebase {
        inner: ReqwestTransport,
        base: String,
    }

    #[async_trait]
    impl RoundTripper for Rebase {
        async fn round_trip(
            &self,
            mut request: crate::cloud::transport::HttpRequest,
        ) -> Result<crate::cloud::transport::HttpResponse> {
            request.url = request.url.replace(COMPUTE_BASE_URL, &self.base);
            self.inner.round_trip(request).await
        }
    }

    #[tokio::test]
    async fn test_list_follows_page_tokens() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/projects/p/regions/r1/subnetworks"))
            .and(query_param("pageToken", "next"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [{"name": "b", "network": "n", "ipCidrRange": "10.0.1.0/24"}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/projects/p/regions/r1/subnetworks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [{"name": "a", "network": "n", "ipCidrRange": "10.0.0.0/24"}],
                "nextPageToken": "next"
            })))
            .mount(&server)
            .await;

        let transport = Arc::new(Rebase {
            inner: ReqwestTransport::new("t").expect("client"),
            base: format!("{}/", server.uri()),
        });
        let compute = RestCompute::new(transport);
        let subnets = compute
            .subnetworks()
            .list("p", "r1")
            .await
            .expect("list succeeds");
        let names: Vec<_> = subnets.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_routed_paths() {
        assert_eq!(
            RestCompute::routed("p", "", "addresses"),
            "projects/p/global/addresses"
        );
        assert_eq!(
            RestCompute::routed("p", "us-east1", "addresses"),
            "projects/p/regions/us-east1/addresses"
        );
    }
}
