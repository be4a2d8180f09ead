//! Dependency ordering of a task set.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{EngineError, Result};
use crate::tasks::TaskKey;

use super::task::TaskSet;

/// Predecessors of each task.
pub type Dependencies = BTreeMap<TaskKey, BTreeSet<TaskKey>>;

/// Collects and checks the dependencies of every task.
///
/// # Errors
///
/// Returns `UnknownDependency` if a task depends on a task outside the set.
pub fn dependencies(tasks: &TaskSet) -> Result<Dependencies> {
    let mut deps = Dependencies::new();
    for key in tasks.keys() {
        let Some(task) = tasks.task(key) else {
            continue;
        };
        let mut preds = BTreeSet::new();
        for dep in task.dependencies() {
            if tasks.task(&dep).is_none() {
                return Err(EngineError::UnknownDependency {
                    task: key.to_string(),
                    dependency: dep.to_string(),
                }
                .into());
            }
            preds.insert(dep);
        }
        deps.insert(key.clone(), preds);
    }
    Ok(deps)
}

/// Orders tasks so that every task comes after its dependencies. Ties are
/// broken by key, so the order is stable for a given set.
///
/// # Errors
///
/// Returns `Cycle` naming the tasks that could not be ordered.
pub fn topological_order(deps: &Dependencies) -> Result<Vec<TaskKey>> {
    let mut remaining: BTreeMap<&TaskKey, usize> =
        deps.iter().map(|(key, preds)| (key, preds.len())).collect();
    let mut successors: BTreeMap<&TaskKey, Vec<&TaskKey>> = BTreeMap::new();
    for (key, preds) in deps {
        for pred in preds {
            successors.entry(pred).or_default().push(key);
        }
    }

    let mut ready: BTreeSet<&TaskKey> = remaining
        .iter()
        .filter(|(_, n)| **n == 0)
        .map(|(key, _)| *key)
        .collect();
    let mut order = Vec::with_capacity(deps.len());
    while let Some(key) = ready.pop_first() {
        remaining.remove(key);
        order.push(key.clone());
        for succ in successors.get(key).into_iter().flatten() {
            if let Some(n) = remaining.get_mut(succ) {
                *n -= 1;
                if *n == 0 {
                    ready.insert(*succ);
                }
            }
        }
    }

    if !remaining.is_empty() {
        let tasks = remaining
            .keys()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        return Err(EngineError::Cycle { tasks }.into());
    }
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::{FirewallRule, Network, Ref, Subnet};

    fn key(kind: &'static str, name: &str) -> TaskKey {
        TaskKey {
            kind,
            name: name.to_string(),
        }
    }

    #[test]
    fn test_dependencies_come_first() {
        let mut set = TaskSet::new();
        set.add(FirewallRule::new("c1-node-to-node", Ref::new("c1")))
            .expect("firewall");
        set.add(Subnet::new("c1-us-central1", Ref::new("c1"), "us-central1", "10.0.1.0/24"))
            .expect("subnet");
        set.add(Network::custom("c1")).expect("network");

        let deps = dependencies(&set).expect("deps");
        let order = topological_order(&deps).expect("ordered");
        assert_eq!(order[0], TaskKey::of::<Network>("c1"));
        assert_eq!(order.len(), 3);
    }

    #[test]
    fn test_unknown_dependency() {
        let mut set = TaskSet::new();
        set.add(Subnet::new("s", Ref::new("missing"), "us-central1", "10.0.1.0/24"))
            .expect("subnet");
        let err = dependencies(&set).expect_err("unknown");
        assert_eq!(
            err.to_string(),
            "Engine error: Task Subnet/s depends on unknown task Network/missing"
        );
    }

    #[test]
    fn test_cycle_is_reported() {
        let deps = Dependencies::from([
            (key("A", "a"), BTreeSet::from([key("B", "b")])),
            (key("B", "b"), BTreeSet::from([key("A", "a")])),
            (key("C", "c"), BTreeSet::new()),
        ]);
        let err = topological_order(&deps).expect_err("cycle");
        assert_eq!(err.to_string(), "Engine error: Dependency cycle between tasks: A/a, B/b");
    }

    #[test]
    fn test_order_is_stable() {
        let deps = Dependencies::from([
            (key("B", "b"), BTreeSet::new()),
            (key("A", "a"), BTreeSet::new()),
            (key("C", "c"), BTreeSet::from([key("A", "a")])),
        ]);
        let order = topological_order(&deps).expect("ordered");
        assert_eq!(order, [key("A", "a"), key("B", "b"), key("C", "c")]);
    }
}
