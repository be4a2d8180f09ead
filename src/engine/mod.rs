//! Task graph engine.
//!
//! The engine orders a [`TaskSet`] by its dependencies and runs ready tasks
//! on a bounded pool of workers. A task starts only after all of its
//! predecessors succeeded; when a task fails, everything downstream of it is
//! skipped. Transient cloud errors are retried with exponential backoff until
//! the per-task time budget runs out.

mod graph;
mod report;
mod step;
mod task;

pub use graph::{Dependencies, dependencies, topological_order};
pub use report::{RunReport, SKIPPED_MESSAGE, TaskResult};
pub use step::{Action, StepOutcome, Target, run_step};
pub use task::{Task, TaskSet};

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::cloud::GceCloud;
use crate::error::{EngineError, Result};
use crate::tasks::{Context, DeclarativeWriter, Outputs, TaskKey};

/// Engine tuning.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum number of tasks running at once.
    pub workers: usize,
    /// Time budget of one task, retries included.
    pub max_task_duration: Duration,
    /// Delay before the first retry.
    pub backoff_base: Duration,
    /// Upper bound of the retry delay.
    pub backoff_cap: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: 8,
            max_task_duration: Duration::from_secs(10 * 60),
            backoff_base: Duration::from_secs(3),
            backoff_cap: Duration::from_secs(60),
        }
    }
}

impl EngineConfig {
    /// Delay before retry number `attempt` (zero based).
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1_u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.backoff_base.saturating_mul(factor).min(self.backoff_cap)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskState {
    Pending,
    Running,
    Done,
    Failed,
}

struct Finished {
    key: TaskKey,
    attempts: u32,
    result: Result<StepOutcome>,
}

/// Runs task sets against one cloud.
#[derive(Debug, Clone)]
pub struct Engine {
    cloud: Arc<GceCloud>,
    config: EngineConfig,
}

impl Engine {
    /// Creates an engine.
    #[must_use]
    pub const fn new(cloud: Arc<GceCloud>, config: EngineConfig) -> Self {
        Self { cloud, config }
    }

    /// Cloud the engine runs against.
    #[must_use]
    pub fn cloud(&self) -> &GceCloud {
        &self.cloud
    }

    /// Runs every task in `tasks` against `target`.
    ///
    /// Task failures are recorded in the report rather than returned; use
    /// [`RunReport::ensure_success`] to turn them into an error.
    ///
    /// # Errors
    ///
    /// Returns `UnknownDependency` or `Cycle` if the tasks cannot be ordered.
    pub async fn run(&self, tasks: &TaskSet, target: Target) -> Result<RunReport> {
        let deps = dependencies(tasks)?;
        let order = topological_order(&deps)?;
        info!("Running {} tasks ({target:?})", order.len());

        let mut states: BTreeMap<TaskKey, TaskState> = order
            .iter()
            .map(|key| (key.clone(), TaskState::Pending))
            .collect();
        let mut results: BTreeMap<TaskKey, TaskResult> = BTreeMap::new();
        let mut fragments: BTreeMap<TaskKey, DeclarativeWriter> = BTreeMap::new();
        let mut outputs = Outputs::new();
        let mut running: JoinSet<Finished> = JoinSet::new();
        let workers = self.config.workers.max(1);

        loop {
            // One pass in dependency order settles skip cascades too.
            for key in &order {
                if states.get(key) != Some(&TaskState::Pending) {
                    continue;
                }
                let preds = deps.get(key).into_iter().flatten();
                let mut blocked = false;
                let mut broken = false;
                for pred in preds {
                    match states.get(pred) {
                        Some(TaskState::Done) => {}
                        Some(TaskState::Failed) => broken = true,
                        _ => blocked = true,
                    }
                }
                if broken {
                    warn!("Skipping {key}: a dependency failed");
                    states.insert(key.clone(), TaskState::Failed);
                    results.insert(key.clone(), TaskResult::skipped(key.clone()));
                    continue;
                }
                if blocked || running.len() >= workers {
                    continue;
                }
                let Some(task) = tasks.task(key) else {
                    continue;
                };
                debug!("Starting {key}");
                states.insert(key.clone(), TaskState::Running);
                running.spawn(execute(
                    Arc::clone(task),
                    key.clone(),
                    Arc::clone(&self.cloud),
                    outputs.clone(),
                    target,
                    self.config.clone(),
                ));
            }

            let Some(joined) = running.join_next().await else {
                break;
            };
            let finished = match joined {
                Ok(finished) => finished,
                Err(e) => {
                    error!("Task worker aborted: {e}");
                    continue;
                }
            };
            let key = finished.key;
            match finished.result {
                Ok(outcome) => {
                    info!("{key}: {}", outcome.action);
                    states.insert(key.clone(), TaskState::Done);
                    outputs.insert(key.clone(), outcome.output);
                    if let Some(writer) = outcome.declarative {
                        fragments.insert(key.clone(), writer);
                    }
                    results.insert(
                        key.clone(),
                        TaskResult {
                            key,
                            action: Some(outcome.action),
                            changes: outcome.changes,
                            attempts: finished.attempts,
                            error: None,
                            error_kind: None,
                        },
                    );
                }
                Err(e) => {
                    error!("{key} failed: {e}");
                    states.insert(key.clone(), TaskState::Failed);
                    results.insert(
                        key.clone(),
                        TaskResult {
                            key,
                            action: None,
                            changes: Vec::new(),
                            attempts: finished.attempts,
                            error: Some(e.to_string()),
                            error_kind: Some(e.kind()),
                        },
                    );
                }
            }
        }

        let mut ordered = Vec::with_capacity(order.len());
        let mut writer = DeclarativeWriter::new();
        for key in &order {
            if let Some(fragment) = fragments.remove(key) {
                writer.merge(fragment);
            }
            let result = results.remove(key).unwrap_or_else(|| TaskResult {
                key: key.clone(),
                action: None,
                changes: Vec::new(),
                attempts: 0,
                error: Some("task worker aborted".to_string()),
                error_kind: Some("Internal"),
            });
            ordered.push(result);
        }

        let alternate_names = tasks
            .alternate_names()
            .iter()
            .filter_map(|address| outputs.get(&address.key()))
            .filter_map(|output| output.ip_address.clone())
            .collect();
        let declarative = (target == Target::Export).then(|| writer.to_json());
        let report = RunReport::new(target, ordered, outputs, declarative, alternate_names);
        info!(
            "Run finished: {} succeeded, {} failed, {} skipped, {} changed",
            report.successful, report.failed, report.skipped, report.changed
        );
        Ok(report)
    }
}

/// Runs one task, retrying transient errors within its time budget.
async fn execute(
    task: Arc<dyn Task>,
    key: TaskKey,
    cloud: Arc<GceCloud>,
    outputs: Outputs,
    target: Target,
    config: EngineConfig,
) -> Finished {
    let ctx = Context::new(&cloud, &outputs);
    let started = Instant::now();
    let mut attempts = 0;
    loop {
        let attempt = attempts;
        attempts += 1;
        match task.step(&ctx, target).await {
            Ok(outcome) => {
                return Finished {
                    key,
                    attempts,
                    result: Ok(outcome),
                };
            }
            Err(e) if e.is_retryable() => {
                let delay = config.backoff(attempt);
                if started.elapsed() + delay > config.max_task_duration {
                    let result = Err(EngineError::MaxDurationExceeded {
                        task: key.to_string(),
                        secs: config.max_task_duration.as_secs(),
                        last_error: e.to_string(),
                    }
                    .into());
                    return Finished {
                        key,
                        attempts,
                        result,
                    };
                }
                warn!("{key} not ready ({e}); retrying in {}s", delay.as_secs());
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                return Finished {
                    key,
                    attempts,
                    result: Err(e),
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CloudError;
    use crate::simulator::MockCloud;
    use crate::tasks::{
        Address, Changes, FirewallRule, Network, Ref, Resource, Subnet, TaskOutput,
    };
    use async_trait::async_trait;
    use serde::Serialize;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn engine(sim: &MockCloud) -> Engine {
        Engine::new(
            Arc::new(sim.cloud("p", "us-central1")),
            EngineConfig::default(),
        )
    }

    fn network_tasks() -> TaskSet {
        let mut set = TaskSet::new();
        set.add(Network::custom("c1")).expect("network");
        set.add(Subnet::new("c1-us-central1", Ref::new("c1"), "us-central1", "10.0.1.0/24"))
            .expect("subnet");
        let mut rule = FirewallRule::new("c1-ssh", Ref::new("c1"));
        rule.source_ranges.insert("0.0.0.0/0".into());
        rule.allowed.insert("tcp:22".into());
        set.add(rule).expect("firewall");
        set
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let config = EngineConfig::default();
        assert_eq!(config.backoff(0), Duration::from_secs(3));
        assert_eq!(config.backoff(1), Duration::from_secs(6));
        assert_eq!(config.backoff(4), Duration::from_secs(48));
        assert_eq!(config.backoff(5), Duration::from_secs(60));
        assert_eq!(config.backoff(40), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_apply_twice_converges() {
        let sim = MockCloud::new();
        let engine = engine(&sim);
        let tasks = network_tasks();

        let first = engine.run(&tasks, Target::Apply).await.expect("first");
        assert!(first.success);
        assert_eq!(first.changed, 3);

        let second = engine.run(&tasks, Target::Apply).await.expect("second");
        assert!(second.success);
        assert_eq!(second.changed, 0);
        assert!(
            second
                .results
                .iter()
                .all(|r| r.action == Some(Action::Unchanged))
        );
    }

    #[tokio::test]
    async fn test_failure_skips_descendants() {
        let sim = MockCloud::new();
        let engine = engine(&sim);
        let mut tasks = TaskSet::new();
        tasks.add(Network::shared("missing")).expect("network");
        tasks
            .add(Subnet::new("s", Ref::new("missing"), "us-central1", "10.0.1.0/24"))
            .expect("subnet");
        tasks.add(Network::custom("other")).expect("independent");

        let report = engine.run(&tasks, Target::Apply).await.expect("ran");
        assert!(!report.success);
        assert_eq!(report.failed, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.successful, 1);
        let network = report
            .result(&TaskKey::of::<Network>("missing"))
            .expect("result");
        assert_eq!(network.error_kind, Some("SharedNotFound"));
        let subnet = report.result(&TaskKey::of::<Subnet>("s")).expect("result");
        assert_eq!(subnet.error.as_deref(), Some(SKIPPED_MESSAGE));
    }

    #[tokio::test]
    async fn test_export_merges_fragments() {
        let sim = MockCloud::new();
        let engine = engine(&sim);
        let report = engine
            .run(&network_tasks(), Target::Export)
            .await
            .expect("exported");
        let json = report.declarative.expect("declarative");
        assert!(json["resource"]["google_compute_network"]["c1"].is_object());
        assert!(json["resource"]["google_compute_firewall"]["c1-ssh"].is_object());
        assert!(cloud_is_empty(&sim).await);
    }

    async fn cloud_is_empty(sim: &MockCloud) -> bool {
        let cloud = sim.cloud("p", "us-central1");
        cloud
            .compute()
            .networks()
            .list("p")
            .await
            .is_ok_and(|n| n.is_empty())
    }

    #[tokio::test]
    async fn test_alternate_names_resolve_to_ips() {
        let sim = MockCloud::new();
        let engine = engine(&sim);
        let mut tasks = TaskSet::new();
        tasks
            .add(Address::external("api-c1", "us-central1"))
            .expect("address");
        tasks.add_alternate_name(Ref::new("api-c1"));
        let report = engine.run(&tasks, Target::Apply).await.expect("ran");
        assert_eq!(report.alternate_names.len(), 1);
    }

    /// Fails with a transient error a fixed number of times.
    #[derive(Debug, Clone, Serialize)]
    struct Flaky {
        name: String,
        #[serde(skip)]
        failures: Arc<AtomicU32>,
        #[serde(skip)]
        fail_times: u32,
    }

    #[async_trait]
    impl Resource for Flaky {
        const KIND: &'static str = "Flaky";
        const DECLARATIVE_TYPE: &'static str = "flaky";

        fn name(&self) -> &str {
            &self.name
        }

        async fn find(&self, _ctx: &Context<'_>) -> Result<Option<Self>> {
            if self.failures.fetch_add(1, Ordering::SeqCst) < self.fail_times {
                return Err(CloudError::ResourceNotReady {
                    message: "still provisioning".into(),
                }
                .into());
            }
            Ok(Some(self.clone()))
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
            Ok(self.output(ctx))
        }

        fn output(&self, _ctx: &Context<'_>) -> TaskOutput {
            TaskOutput::link(&self.name, "")
        }

        fn render_declarative(&self, _w: &mut DeclarativeWriter) -> Result<()> {
            Ok(())
        }
    }

    fn flaky(fail_times: u32) -> Flaky {
        Flaky {
            name: "flaky".into(),
            failures: Arc::new(AtomicU32::new(0)),
            fail_times,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_are_retried() {
        let sim = MockCloud::new();
        let engine = engine(&sim);
        let mut tasks = TaskSet::new();
        tasks.add(flaky(2)).expect("task");

        let report = engine.run(&tasks, Target::Apply).await.expect("ran");
        assert!(report.success);
        let result = report
            .result(&TaskKey::of::<Flaky>("flaky"))
            .expect("result");
        assert_eq!(result.attempts, 3);
        assert_eq!(result.action, Some(Action::Unchanged));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_stop_at_max_duration() {
        let sim = MockCloud::new();
        let engine = Engine::new(
            Arc::new(sim.cloud("p", "us-central1")),
            EngineConfig {
                max_task_duration: Duration::from_secs(30),
                ..EngineConfig::default()
            },
        );
        let mut tasks = TaskSet::new();
        tasks.add(flaky(u32::MAX)).expect("task");

        let report = engine.run(&tasks, Target::Apply).await.expect("ran");
        let result = report
            .result(&TaskKey::of::<Flaky>("flaky"))
            .expect("result");
        // 3s + 6s + 12s fit in 30s; the next 24s delay does not.
        assert_eq!(result.attempts, 4);
        assert_eq!(result.error_kind, Some("Engine"));
        assert!(
            result
                .error
                .as_deref()
                .is_some_and(|e| e.contains("did not complete within 30s"))
        );
    }
}
