//! Results of an engine run.

use serde::Serialize;
use serde_json::Value;

use crate::error::{EngineError, Result};
use crate::tasks::{Outputs, TaskKey};

use super::step::{Action, Target};

/// Error message recorded for tasks whose predecessors failed.
pub const SKIPPED_MESSAGE: &str = "Skipped due to dependency failure";

/// Result of one task.
#[derive(Debug, Clone, Serialize)]
pub struct TaskResult {
    /// Task identity.
    pub key: TaskKey,
    /// What happened, if the task succeeded.
    pub action: Option<Action>,
    /// Fields that differed.
    pub changes: Vec<String>,
    /// Attempts made, including retries.
    pub attempts: u32,
    /// Error message, if the task failed or was skipped.
    pub error: Option<String>,
    /// Stable error kind, if the task failed.
    pub error_kind: Option<&'static str>,
}

impl TaskResult {
    /// Returns true if the task succeeded.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.action.is_some()
    }

    /// Returns true if the task never ran because a predecessor failed.
    #[must_use]
    pub fn is_skipped(&self) -> bool {
        self.error.as_deref() == Some(SKIPPED_MESSAGE)
    }

    pub(crate) fn skipped(key: TaskKey) -> Self {
        Self {
            key,
            action: None,
            changes: Vec::new(),
            attempts: 0,
            error: Some(SKIPPED_MESSAGE.to_string()),
            error_kind: None,
        }
    }
}

/// Result of a whole run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// What the run did.
    pub target: Target,
    /// Per-task results in dependency order.
    pub results: Vec<TaskResult>,
    /// Outputs of the tasks that succeeded.
    #[serde(skip)]
    pub outputs: Outputs,
    /// Merged declarative configuration, for exports.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub declarative: Option<Value>,
    /// IPs to add to the API server certificate.
    pub alternate_names: Vec<String>,
    /// Number of tasks.
    pub total: usize,
    /// Tasks that succeeded.
    pub successful: usize,
    /// Tasks that failed.
    pub failed: usize,
    /// Tasks skipped because a predecessor failed.
    pub skipped: usize,
    /// Tasks that changed or would change the cloud.
    pub changed: usize,
    /// Whether every task succeeded.
    pub success: bool,
}

impl RunReport {
    pub(crate) fn new(
        target: Target,
        results: Vec<TaskResult>,
        outputs: Outputs,
        declarative: Option<Value>,
        alternate_names: Vec<String>,
    ) -> Self {
        let successful = results.iter().filter(|r| r.is_success()).count();
        let skipped = results.iter().filter(|r| r.is_skipped()).count();
        let failed = results.len() - successful - skipped;
        let changed = results
            .iter()
            .filter(|r| r.action.is_some_and(Action::is_change))
            .count();
        Self {
            target,
            total: results.len(),
            successful,
            failed,
            skipped,
            changed,
            success: failed == 0 && skipped == 0,
            results,
            outputs,
            declarative,
            alternate_names,
        }
    }

    /// Result of one task.
    #[must_use]
    pub fn result(&self, key: &TaskKey) -> Option<&TaskResult> {
        self.results.iter().find(|r| &r.key == key)
    }

    /// Tasks that failed, with their errors.
    pub fn failures(&self) -> impl Iterator<Item = &TaskResult> {
        self.results
            .iter()
            .filter(|r| !r.is_success() && !r.is_skipped())
    }

    /// Turns a failed run into an error.
    ///
    /// # Errors
    ///
    /// Returns `TasksFailed` if any task failed or was skipped.
    pub fn ensure_success(self) -> Result<Self> {
        if self.success {
            return Ok(self);
        }
        Err(EngineError::TasksFailed {
            failed: self.failed,
            skipped: self.skipped,
        }
        .into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::Network;

    fn ok(name: &str, action: Action) -> TaskResult {
        TaskResult {
            key: TaskKey::of::<Network>(name),
            action: Some(action),
            changes: Vec::new(),
            attempts: 1,
            error: None,
            error_kind: None,
        }
    }

    #[test]
    fn test_counts() {
        let failed = TaskResult {
            action: None,
            error: Some("boom".into()),
            error_kind: Some("Api"),
            ..ok("c", Action::Created)
        };
        let report = RunReport::new(
            Target::Apply,
            vec![
                ok("a", Action::Created),
                ok("b", Action::Unchanged),
                failed,
                TaskResult::skipped(TaskKey::of::<Network>("d")),
            ],
            Outputs::new(),
            None,
            Vec::new(),
        );
        assert_eq!(report.total, 4);
        assert_eq!(report.successful, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.changed, 1);
        assert_eq!(report.failures().count(), 1);

        let err = report.ensure_success().expect_err("failed");
        assert_eq!(err.to_string(), "Engine error: 1 task(s) failed, 1 skipped");
    }
}
