//! End-to-end scenarios against the in-memory simulator.

use std::sync::Arc;

use reqwest::Method;

use gce_infra::cidr::{CidrPlanner, NODE_PREFIX, POD_PREFIX, SERVICE_PREFIX};
use gce_infra::cloud::transport::{ErrorEnvelope, HttpRequest, JSON_CONTENT_TYPE, RoundTripper};
use gce_infra::cloud::types::Policy;
use gce_infra::config::{ClusterConfig, ConfigParser};
use gce_infra::engine::{Action, Engine, EngineConfig, Target, TaskSet};
use gce_infra::error::InfraError;
use gce_infra::model::{build_tasks, split_across_zones};
use gce_infra::provisioner::Provisioner;
use gce_infra::simulator::MockCloud;
use gce_infra::tasks::iam::RoleSpec;
use gce_infra::tasks::{FirewallRule, Lifecycle, Member, Network, ProjectIamBinding, Subnet};

const PROJECT: &str = "testproject";
const REGION: &str = "us-central1";

const MINIMAL: &str = r"
name: testcluster.test.com
project: testproject
region: us-central1
networking:
  subnets:
    - name: us-central1
      type: private
      cidr: 10.0.1.0/24
";

const GROUPS: &str = r"
instance_groups:
  - name: control-plane
    role: ControlPlane
    machine_type: e2-medium
    image: ubuntu-os-cloud/ubuntu-2204-lts
    min_size: 1
    zones: [us-central1-a]
  - name: nodes
    role: Node
    machine_type: e2-medium
    image: ubuntu-os-cloud/ubuntu-2204-lts
    min_size: 3
    zones: [us-central1-a, us-central1-b]
";

fn parse(yaml: &str) -> ClusterConfig {
    ConfigParser::new().parse_yaml(yaml, None).expect("valid yaml")
}

fn provisioner(sim: &MockCloud) -> Provisioner {
    let cloud = Arc::new(sim.cloud(PROJECT, REGION));
    Provisioner::new(Engine::new(cloud, EngineConfig::default()))
}

#[tokio::test]
async fn minimal_network_converges() {
    let config = parse(MINIMAL);
    let tasks = build_tasks(&config).expect("tasks");
    assert_eq!(tasks.of_kind::<Network>().count(), 1);
    assert_eq!(tasks.of_kind::<Subnet>().count(), 1);
    let mut rules: Vec<&str> = tasks
        .of_kind::<FirewallRule>()
        .map(|r| r.name.as_str())
        .collect();
    rules.sort_unstable();
    assert_eq!(
        rules,
        [
            "master-to-master-testcluster-test-com",
            "master-to-node-testcluster-test-com",
            "node-to-master-testcluster-test-com",
            "node-to-node-testcluster-test-com",
        ]
    );

    let sim = MockCloud::new();
    let provisioner = provisioner(&sim);
    let first = provisioner.run(&config, Target::Apply).await.expect("applied");
    assert!(first.report.success);
    assert_eq!(first.report.changed, tasks.len());

    let second = provisioner.run(&config, Target::Apply).await.expect("reapplied");
    assert!(second.report.success);
    assert_eq!(second.report.changed, 0);

    let cloud = sim.cloud(PROJECT, REGION);
    let firewalls = cloud.compute().firewalls().list(PROJECT).await.expect("firewalls");
    assert_eq!(firewalls.len(), 4);
}

#[tokio::test]
async fn full_cluster_converges_and_dry_run_is_clean() {
    let config = parse(&format!(
        "{MINIMAL}{GROUPS}config_base: gs://state/testcluster.test.com\napi:\n  load_balancer:\n    type: Public\n"
    ));
    let sim = MockCloud::new();
    let provisioner = provisioner(&sim);

    let planned = provisioner.run(&config, Target::DryRun).await.expect("planned");
    assert!(planned.report.success);
    assert!(
        planned
            .report
            .results
            .iter()
            .all(|r| r.action.is_some_and(Action::is_change))
    );
    assert_eq!(sim.compute().instance_template_count(), 0);

    let applied = provisioner.run(&config, Target::Apply).await.expect("applied");
    assert!(applied.report.success);
    assert_eq!(applied.report.alternate_names.len(), 1);

    let again = provisioner.run(&config, Target::DryRun).await.expect("planned");
    assert!(again.report.success);
    assert_eq!(again.report.changed, 0);
}

#[test]
fn zone_splitter_three_over_two() {
    let zones = vec!["us-central1-a".to_string(), "us-central1-b".to_string()];
    let split = split_across_zones("nodes", 3, &zones).expect("split");
    assert_eq!(
        split,
        [("us-central1-a".to_string(), 2), ("us-central1-b".to_string(), 1)]
    );
}

#[test]
fn cidr_planner_on_empty_network() {
    let mut planner = CidrPlanner::over_default_base(Vec::new()).expect("planner");
    let pod = planner.allocate(POD_PREFIX).expect("pod");
    let service = planner.allocate(SERVICE_PREFIX).expect("service");
    let node = planner.allocate(NODE_PREFIX).expect("node");
    assert_eq!(pod.to_string(), "10.4.0.0/14");
    assert_eq!(service.to_string(), "10.8.0.0/20");
    assert_eq!(node.to_string(), "10.8.16.0/20");
}

#[tokio::test]
async fn iam_binding_is_idempotent() {
    let member = "serviceAccount:foo@p.iam.gserviceaccount.com";
    let mut tasks = TaskSet::new();
    tasks
        .add(ProjectIamBinding {
            name: "foo-owner".to_string(),
            project: None,
            role: RoleSpec::Predefined("roles/owner".to_string()),
            member: Member::Literal(member.to_string()),
            lifecycle: Lifecycle::Sync,
        })
        .expect("added");

    let sim = MockCloud::new();
    let engine = Engine::new(Arc::new(sim.cloud("p", REGION)), EngineConfig::default());

    let first = engine.run(&tasks, Target::Apply).await.expect("ran");
    assert!(first.success);
    let policy = sim.project_policy("p").expect("policy");
    let owners: Vec<_> = policy
        .bindings
        .iter()
        .filter(|b| b.role == "roles/owner")
        .collect();
    assert_eq!(owners.len(), 1);
    assert_eq!(owners[0].members, [member]);

    let second = engine.run(&tasks, Target::Apply).await.expect("ran");
    assert_eq!(second.changed, 0);
    assert_eq!(sim.project_policy("p").expect("policy"), policy);
}

#[tokio::test]
async fn stale_etag_is_rejected() {
    let sim = MockCloud::new();
    let seeded = Policy {
        etag: "h0".to_string(),
        ..Policy::default()
    };
    sim.http().seed_project_policy("p", seeded.clone());
    let stale = Policy {
        etag: "h1".to_string(),
        version: 3,
        ..Policy::default()
    };

    // On the wire the conflict is a 404 NOT_FOUND.
    let response = sim
        .http()
        .round_trip(HttpRequest {
            method: Method::POST,
            url: "https://cloudresourcemanager.googleapis.com/v1/projects/p:setIamPolicy".to_string(),
            body: Some(serde_json::to_vec(&serde_json::json!({ "policy": stale })).expect("json")),
            content_type: Some(JSON_CONTENT_TYPE.to_string()),
        })
        .await
        .expect("answered");
    assert_eq!(response.status, 404);
    let envelope: ErrorEnvelope = serde_json::from_slice(&response.body).expect("envelope");
    assert_eq!(envelope.error.code, 404);
    assert_eq!(envelope.error.status, "NOT_FOUND");

    // The IAM client reports it as an etag mismatch, not a missing resource.
    let cloud = sim.cloud("p", REGION);
    let err = cloud
        .iam()
        .set_project_policy("p", &stale)
        .await
        .expect_err("conflict");
    assert!(err.is_etag_mismatch(), "unexpected error {err:?}");
    assert!(!err.is_not_found());
    match &err {
        InfraError::Cloud(e) => assert_eq!(e.wire_status(), ("NOT_FOUND", 404)),
        other => panic!("unexpected error {other:?}"),
    }

    assert_eq!(sim.project_policy("p"), Some(seeded));
}

#[tokio::test]
async fn machine_type_change_creates_new_template() {
    let yaml = format!("{MINIMAL}{GROUPS}");
    let sim = MockCloud::new();
    let provisioner = provisioner(&sim);
    let cloud = sim.cloud(PROJECT, REGION);

    let config = parse(&yaml);
    provisioner.run(&config, Target::Apply).await.expect("applied");
    let before = cloud
        .compute()
        .instance_templates()
        .list(PROJECT)
        .await
        .expect("templates");
    assert_eq!(before.len(), 2);

    let mut bigger = config.clone();
    bigger.instance_groups[1].machine_type = "e2-standard-4".to_string();
    let report = provisioner
        .run(&bigger, Target::Apply)
        .await
        .expect("applied")
        .report;
    assert!(report.success);

    let templates = cloud
        .compute()
        .instance_templates()
        .list(PROJECT)
        .await
        .expect("templates");
    assert_eq!(templates.len(), 3);
    let old = before
        .iter()
        .find(|t| t.name.starts_with("nodes-"))
        .expect("old node template");
    let mut node_templates: Vec<&str> = templates
        .iter()
        .map(|t| t.name.as_str())
        .filter(|n| n.starts_with("nodes-"))
        .collect();
    node_templates.sort_unstable();
    assert_eq!(node_templates.len(), 2);
    let newer = node_templates
        .iter()
        .copied()
        .find(|n| *n != old.name)
        .expect("new template");
    let prefix = old.name.rsplit_once('-').map(|(p, _)| p).expect("suffix");
    assert_eq!(newer.rsplit_once('-').map(|(p, _)| p), Some(prefix));

    for zone in ["us-central1-a", "us-central1-b"] {
        let managers = cloud
            .compute()
            .instance_group_managers()
            .list(PROJECT, zone)
            .await
            .expect("managers");
        let nodes = managers
            .iter()
            .find(|m| m.base_instance_name == "nodes")
            .expect("node manager");
        assert!(nodes.instance_template.ends_with(&format!("/{newer}")));
    }
}

#[test]
fn nodeport_access_is_split_by_family() {
    let config = parse(&format!(
        "{MINIMAL}{GROUPS}node_port_access: [\"0.0.0.0/0\", \"::/0\"]\n"
    ));
    let tasks = build_tasks(&config).expect("tasks");
    let v4 = tasks
        .get::<FirewallRule>("nodeport-external-to-node-testcluster-test-com")
        .expect("ipv4 rule");
    let v6 = tasks
        .get::<FirewallRule>("nodeport-external-to-node-ipv6-testcluster-test-com")
        .expect("ipv6 rule");
    assert_eq!(v4.source_ranges.iter().collect::<Vec<_>>(), ["0.0.0.0/0"]);
    assert_eq!(v6.source_ranges.iter().collect::<Vec<_>>(), ["::/0"]);
    for rule in [v4, v6] {
        assert!(!rule.disabled);
        assert!(rule.target_tags.contains("testcluster-test-com-k8s-io-role-node"));
    }
}
