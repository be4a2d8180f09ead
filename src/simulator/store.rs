//! Keyed in-memory storage: `project -> scope -> name -> object`.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use crate::cloud::types::{
    Address, BackendService, Disk, Firewall, ForwardingRule, HealthCheck, HttpHealthCheck,
    InstanceGroupManager, InstanceTemplate, Network, Router, Subnetwork, TargetPool,
};
use crate::cloud::url::Scope;
use crate::error::{CloudError, Result};

/// A compute object the simulator assigns identity to on insert.
pub trait SimResource: Clone + Serialize + Send {
    /// API collection name, e.g. `networks`.
    const COLLECTION: &'static str;

    /// Object name.
    fn name(&self) -> &str;

    /// Records the server-assigned link and id.
    fn assign(&mut self, self_link: String, id: String);
}

macro_rules! sim_resource {
    ($($ty:ty => $collection:literal),* $(,)?) => {$(
        impl SimResource for $ty {
            const COLLECTION: &'static str = $collection;

            fn name(&self) -> &str {
                &self.name
            }

            fn assign(&mut self, self_link: String, id: String) {
                self.self_link = self_link;
                self.id = Some(id);
            }
        }
    )*};
}

sim_resource! {
    Network => "networks",
    Subnetwork => "subnetworks",
    Firewall => "firewalls",
    Router => "routers",
    Address => "addresses",
    ForwardingRule => "forwardingRules",
    HttpHealthCheck => "httpHealthChecks",
    HealthCheck => "healthChecks",
    BackendService => "backendServices",
    TargetPool => "targetPools",
    InstanceTemplate => "instanceTemplates",
    InstanceGroupManager => "instanceGroupManagers",
    Disk => "disks",
}

type Objects<T> = BTreeMap<String, BTreeMap<Scope, BTreeMap<String, T>>>;

/// One kind's objects behind a single mutex.
#[derive(Debug)]
pub struct ScopedStore<T> {
    /// Kind used in error messages.
    kind: &'static str,
    /// The objects.
    items: Mutex<Objects<T>>,
}

impl<T: Clone> ScopedStore<T> {
    /// Creates an empty store.
    #[must_use]
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            items: Mutex::new(BTreeMap::new()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Objects<T>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn not_found(&self, name: &str) -> CloudError {
        CloudError::not_found(self.kind, name)
    }

    /// Stores a new object.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyExists` if the name is taken in that scope.
    pub fn create(&self, project: &str, scope: &Scope, name: &str, value: T) -> Result<()> {
        let mut items = self.lock();
        let slot = items
            .entry(project.to_string())
            .or_default()
            .entry(scope.clone())
            .or_default();
        if slot.contains_key(name) {
            return Err(CloudError::already_exists(self.kind, name).into());
        }
        slot.insert(name.to_string(), value);
        Ok(())
    }

    /// Reads an object.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if it does not exist.
    pub fn get(&self, project: &str, scope: &Scope, name: &str) -> Result<T> {
        self.lock()
            .get(project)
            .and_then(|scopes| scopes.get(scope))
            .and_then(|objects| objects.get(name))
            .cloned()
            .ok_or_else(|| self.not_found(name).into())
    }

    /// Mutates an object in place and returns the updated copy.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if it does not exist, or the closure's error.
    pub fn update<F>(&self, project: &str, scope: &Scope, name: &str, f: F) -> Result<T>
    where
        F: FnOnce(&mut T) -> Result<()>,
    {
        let mut items = self.lock();
        let object = items
            .get_mut(project)
            .and_then(|scopes| scopes.get_mut(scope))
            .and_then(|objects| objects.get_mut(name))
            .ok_or_else(|| self.not_found(name))?;
        f(object)?;
        Ok(object.clone())
    }

    /// Removes an object.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if it does not exist.
    pub fn remove(&self, project: &str, scope: &Scope, name: &str) -> Result<T> {
        self.lock()
            .get_mut(project)
            .and_then(|scopes| scopes.get_mut(scope))
            .and_then(|objects| objects.remove(name))
            .ok_or_else(|| self.not_found(name).into())
    }

    /// Objects of one scope, ordered by name.
    #[must_use]
    pub fn list(&self, project: &str, scope: &Scope) -> Vec<T> {
        self.lock()
            .get(project)
            .and_then(|scopes| scopes.get(scope))
            .map(|objects| objects.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Objects of every scope of a project.
    #[must_use]
    pub fn list_project(&self, project: &str) -> Vec<(Scope, T)> {
        self.lock()
            .get(project)
            .map(|scopes| {
                scopes
                    .iter()
                    .flat_map(|(scope, objects)| {
                        objects.values().map(move |o| (scope.clone(), o.clone()))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Total number of objects across projects and scopes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock()
            .values()
            .flat_map(BTreeMap::values)
            .map(BTreeMap::len)
            .sum()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Evaluates a list filter such as `labels.k8s-io-cluster-name = foo AND name = bar`.
///
/// Clauses are `field = value`, `field eq value` or `field != value`; dotted fields
/// walk into the object's JSON form.
pub fn matches_filter<T: Serialize>(object: &T, filter: &str) -> bool {
    let Ok(value) = serde_json::to_value(object) else {
        return false;
    };
    filter
        .split(" AND ")
        .map(str::trim)
        .filter(|clause| !clause.is_empty())
        .all(|clause| clause_matches(&value, clause))
}

fn clause_matches(value: &serde_json::Value, clause: &str) -> bool {
    let clause = clause.trim_matches(|c| c == '(' || c == ')');
    let (field, expected, negate) = if let Some((f, v)) = clause.split_once("!=") {
        (f, v, true)
    } else if let Some((f, v)) = clause.split_once(" eq ") {
        (f, v, false)
    } else if let Some((f, v)) = clause.split_once('=') {
        (f, v, false)
    } else {
        return false;
    };
    let expected = expected.trim().trim_matches('"');
    let actual = field
        .trim()
        .split('.')
        .try_fold(value, |v, key| v.get(key))
        .and_then(serde_json::Value::as_str);
    (actual == Some(expected)) != negate
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_get_remove() {
        let store: ScopedStore<String> = ScopedStore::new("thing");
        let scope = Scope::Region("r".into());
        store.create("p", &scope, "a", "one".into()).expect("created");
        assert!(
            store
                .create("p", &scope, "a", "two".into())
                .expect_err("duplicate")
                .is_already_exists()
        );
        assert_eq!(store.get("p", &scope, "a").expect("found"), "one");
        assert!(store.get("p", &Scope::Global, "a").expect_err("other scope").is_not_found());
        store.remove("p", &scope, "a").expect("removed");
        assert!(store.is_empty());
    }

    #[test]
    fn test_filter_on_labels() {
        let disk = Disk {
            name: "d1".into(),
            labels: BTreeMap::from([("k8s-io-cluster-name".into(), "c-example-com".into())]),
            ..Disk::default()
        };
        assert!(matches_filter(&disk, "labels.k8s-io-cluster-name = c-example-com"));
        assert!(matches_filter(&disk, "labels.k8s-io-cluster-name=c-example-com AND name eq d1"));
        assert!(!matches_filter(&disk, "labels.k8s-io-cluster-name = other"));
        assert!(matches_filter(&disk, "name != d2"));
    }
}
