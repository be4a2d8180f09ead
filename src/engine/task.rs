//! Type-erased tasks and the set the engine runs.

use async_trait::async_trait;
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{EngineError, Result};
use crate::tasks::{Address, Context, Ref, Resource, TaskKey};

use super::step::{StepOutcome, Target, run_step};

/// A task as the engine sees it, independent of its resource kind.
#[async_trait]
pub trait Task: fmt::Debug + Send + Sync {
    /// Stable identity.
    fn key(&self) -> TaskKey;

    /// Tasks that must complete first.
    fn dependencies(&self) -> Vec<TaskKey>;

    /// Runs the task once.
    async fn step(&self, ctx: &Context<'_>, target: Target) -> Result<StepOutcome>;

    /// Concrete task, for typed lookups.
    fn as_any(&self) -> &dyn Any;
}

#[async_trait]
impl<R: Resource> Task for R {
    fn key(&self) -> TaskKey {
        TaskKey::of::<R>(self.name())
    }

    fn dependencies(&self) -> Vec<TaskKey> {
        Resource::dependencies(self)
    }

    async fn step(&self, ctx: &Context<'_>, target: Target) -> Result<StepOutcome> {
        run_step(self, ctx, target).await
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// The tasks of one run, keyed by kind and name.
#[derive(Debug, Default, Clone)]
pub struct TaskSet {
    tasks: BTreeMap<TaskKey, Arc<dyn Task>>,
    alternate_names: Vec<Ref<Address>>,
}

impl TaskSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a task.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateTask` if a task with the same kind and name exists.
    pub fn add<R: Resource>(&mut self, task: R) -> Result<()> {
        let key = Task::key(&task);
        if self.tasks.contains_key(&key) {
            return Err(EngineError::DuplicateTask {
                task: key.to_string(),
            }
            .into());
        }
        self.tasks.insert(key, Arc::new(task));
        Ok(())
    }

    /// Looks up a task by kind and name.
    #[must_use]
    pub fn get<R: Resource>(&self, name: &str) -> Option<&R> {
        self.tasks
            .get(&TaskKey::of::<R>(name))
            .and_then(|t| t.as_any().downcast_ref::<R>())
    }

    /// Returns true if a task of kind `R` named `name` exists.
    #[must_use]
    pub fn contains<R: Resource>(&self, name: &str) -> bool {
        self.tasks.contains_key(&TaskKey::of::<R>(name))
    }

    /// All tasks of kind `R`, in name order.
    pub fn of_kind<R: Resource>(&self) -> impl Iterator<Item = &R> {
        self.tasks
            .iter()
            .filter(|(key, _)| key.kind == R::KIND)
            .filter_map(|(_, t)| t.as_any().downcast_ref::<R>())
    }

    /// Number of tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Returns true if there are no tasks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Keys in order.
    pub fn keys(&self) -> impl Iterator<Item = &TaskKey> {
        self.tasks.keys()
    }

    pub(crate) fn task(&self, key: &TaskKey) -> Option<&Arc<dyn Task>> {
        self.tasks.get(key)
    }

    /// Records an address whose IP must be added to the API server
    /// certificate's alternate names.
    pub fn add_alternate_name(&mut self, address: Ref<Address>) {
        if !self.alternate_names.contains(&address) {
            self.alternate_names.push(address);
        }
    }

    /// Addresses recorded with [`Self::add_alternate_name`].
    #[must_use]
    pub fn alternate_names(&self) -> &[Ref<Address>] {
        &self.alternate_names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::{Network, Subnet};

    #[test]
    fn test_duplicate_task_is_rejected() {
        let mut set = TaskSet::new();
        set.add(Network::custom("c1")).expect("first");
        let err = set.add(Network::custom("c1")).expect_err("duplicate");
        assert_eq!(err.to_string(), "Engine error: Duplicate task: Network/c1");
    }

    #[test]
    fn test_same_name_different_kinds() {
        let mut set = TaskSet::new();
        set.add(Network::custom("c1")).expect("network");
        set.add(Subnet::new("c1", Ref::new("c1"), "us-central1", "10.0.0.0/24"))
            .expect("subnet");
        assert_eq!(set.len(), 2);
        assert!(set.get::<Subnet>("c1").is_some());
        assert_eq!(set.of_kind::<Network>().count(), 1);
    }

    #[test]
    fn test_dependencies_through_trait_object() {
        let mut set = TaskSet::new();
        set.add(Subnet::new("s", Ref::new("c1"), "us-central1", "10.0.0.0/24"))
            .expect("subnet");
        let task = set.task(&TaskKey::of::<Subnet>("s")).expect("task");
        assert_eq!(task.dependencies(), [TaskKey::of::<Network>("c1")]);
    }
}
