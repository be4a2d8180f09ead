//! Declarative (Terraform JSON) output.

use serde_json::{Map, Value, json};
use std::collections::BTreeMap;

use super::{Ref, Resource};

/// Collects resource blocks keyed by type and name.
///
/// Blocks written twice under the same type and name are merged: objects
/// merge recursively and arrays concatenate. Resources that are looked up
/// rather than owned are written as data sources; references to them are
/// rewritten to `${data.<type>.<name>.<attr>}` when the document is built.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeclarativeWriter {
    resources: BTreeMap<String, BTreeMap<String, Value>>,
    data: BTreeMap<String, BTreeMap<String, Value>>,
}

impl DeclarativeWriter {
    /// Creates an empty writer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or merges into) the block `resource_type.name`.
    pub fn add(&mut self, resource_type: &str, name: &str, block: Value) {
        let blocks = self.resources.entry(resource_type.to_string()).or_default();
        match blocks.get_mut(&declarative_name(name)) {
            Some(existing) => merge(existing, block),
            None => {
                blocks.insert(declarative_name(name), block);
            }
        }
    }

    /// Adds the data source `data.resource_type.name`.
    pub fn add_data(&mut self, resource_type: &str, name: &str, block: Value) {
        self.data
            .entry(resource_type.to_string())
            .or_default()
            .insert(declarative_name(name), block);
    }

    /// Merges every block of `other` into this writer.
    pub fn merge(&mut self, other: Self) {
        for (resource_type, blocks) in other.resources {
            for (name, block) in blocks {
                self.add(&resource_type, &name, block);
            }
        }
        for (resource_type, blocks) in other.data {
            self.data.entry(resource_type).or_default().extend(blocks);
        }
    }

    /// Interpolation of `attribute` of the referenced task's block.
    #[must_use]
    pub fn reference<R: Resource>(r: &Ref<R>, attribute: &str) -> String {
        format!(
            "${{{}.{}.{attribute}}}",
            R::DECLARATIVE_TYPE,
            declarative_name(r.name())
        )
    }

    /// Returns true if no block was written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty() && self.data.is_empty()
    }

    /// Number of blocks of `resource_type`.
    #[must_use]
    pub fn count(&self, resource_type: &str) -> usize {
        self.resources.get(resource_type).map_or(0, BTreeMap::len)
    }

    /// Block `resource_type.name`, if written.
    #[must_use]
    pub fn block(&self, resource_type: &str, name: &str) -> Option<&Value> {
        self.resources
            .get(resource_type)
            .and_then(|blocks| blocks.get(&declarative_name(name)))
    }

    /// The full document: `{"resource": {type: {name: block}}, "data": ...}`.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let rewrites: Vec<(String, String)> = self
            .data
            .iter()
            .flat_map(|(t, blocks)| {
                blocks
                    .keys()
                    .map(move |n| (format!("${{{t}.{n}."), format!("${{data.{t}.{n}.")))
            })
            .collect();
        let mut resources = Value::Object(section(&self.resources));
        if !rewrites.is_empty() {
            rewrite_references(&mut resources, &rewrites);
        }
        let mut doc = json!({ "resource": resources });
        if !self.data.is_empty() {
            doc["data"] = Value::Object(section(&self.data));
        }
        doc
    }
}

fn section(blocks: &BTreeMap<String, BTreeMap<String, Value>>) -> Map<String, Value> {
    blocks
        .iter()
        .map(|(t, named)| {
            let named: Map<String, Value> =
                named.iter().map(|(n, b)| (n.clone(), b.clone())).collect();
            (t.clone(), Value::Object(named))
        })
        .collect()
}

fn rewrite_references(value: &mut Value, rewrites: &[(String, String)]) {
    match value {
        Value::String(s) => {
            for (from, to) in rewrites {
                if s.contains(from.as_str()) {
                    *s = s.replace(from.as_str(), to);
                }
            }
        }
        Value::Array(items) => items
            .iter_mut()
            .for_each(|v| rewrite_references(v, rewrites)),
        Value::Object(map) => map
            .values_mut()
            .for_each(|v| rewrite_references(v, rewrites)),
        _ => {}
    }
}

/// Block name for a task name: dots become dashes, and a leading digit gets
/// a `_` prefix.
#[must_use]
pub fn declarative_name(name: &str) -> String {
    let name = name.replace('.', "-");
    if name.starts_with(|c: char| c.is_ascii_digit()) {
        format!("_{name}")
    } else {
        name
    }
}

fn merge(target: &mut Value, incoming: Value) {
    match (target, incoming) {
        (Value::Object(target), Value::Object(incoming)) => {
            for (key, value) in incoming {
                match target.get_mut(&key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        target.insert(key, value);
                    }
                }
            }
        }
        (Value::Array(target), Value::Array(incoming)) => target.extend(incoming),
        (target, incoming) => *target = incoming,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::Network;

    #[test]
    fn test_blocks_merge_and_arrays_concatenate() {
        let mut w = DeclarativeWriter::new();
        w.add("google_compute_target_pool", "api-c1", json!({"name": "api-c1"}));
        w.add(
            "google_compute_target_pool",
            "api-c1",
            json!({"health_checks": ["a"]}),
        );
        let mut other = DeclarativeWriter::new();
        other.add(
            "google_compute_target_pool",
            "api-c1",
            json!({"health_checks": ["b"]}),
        );
        w.merge(other);
        let block = w.block("google_compute_target_pool", "api-c1").expect("block");
        assert_eq!(block["name"], "api-c1");
        assert_eq!(block["health_checks"], json!(["a", "b"]));
    }

    #[test]
    fn test_reference_interpolation() {
        let r = Ref::<Network>::new("my.cluster");
        assert_eq!(
            DeclarativeWriter::reference(&r, "self_link"),
            "${google_compute_network.my-cluster.self_link}"
        );
    }

    #[test]
    fn test_references_to_data_sources_are_rewritten() {
        let mut w = DeclarativeWriter::new();
        w.add_data("google_compute_network", "shared", json!({"name": "shared"}));
        w.add(
            "google_compute_subnetwork",
            "nodes",
            json!({"network": DeclarativeWriter::reference(&Ref::<Network>::new("shared"), "self_link")}),
        );
        let doc = w.to_json();
        assert_eq!(
            doc["resource"]["google_compute_subnetwork"]["nodes"]["network"],
            "${data.google_compute_network.shared.self_link}"
        );
        assert_eq!(doc["data"]["google_compute_network"]["shared"]["name"], "shared");
    }

    #[test]
    fn test_declarative_name_leading_digit() {
        assert_eq!(declarative_name("1-etcd-main"), "_1-etcd-main");
        assert_eq!(declarative_name("nodes"), "nodes");
    }
}
