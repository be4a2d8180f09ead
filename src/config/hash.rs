//! Configuration hashing for change detection.
//!
//! Hashes are computed over the canonical JSON form of the specification, so
//! two files that differ only in formatting or key order hash the same.

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::Result;

use super::spec::{ClusterConfig, InstanceGroupConfig};

/// Hasher for computing configuration hashes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfigHasher;

impl ConfigHasher {
    /// Creates a new configuration hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Hash of the whole cluster specification.
    ///
    /// # Errors
    ///
    /// Returns an error if the specification cannot be serialized.
    pub fn hash_config(&self, config: &ClusterConfig) -> Result<String> {
        hash_json(config)
    }

    /// Hash of one instance group, used to tell which groups changed.
    ///
    /// # Errors
    ///
    /// Returns an error if the group cannot be serialized.
    pub fn hash_instance_group(&self, group: &InstanceGroupConfig) -> Result<String> {
        hash_json(group)
    }

    /// Computes a short hash (first 8 characters) for display purposes.
    #[must_use]
    pub fn short_hash(&self, hash: &str) -> String {
        hash.chars().take(8).collect()
    }
}

fn hash_json<T: Serialize>(value: &T) -> Result<String> {
    // Round-trip through Value so object keys come out sorted.
    let canonical = serde_json::to_vec(&serde_json::to_value(value)?)?;
    Ok(hex::encode(Sha256::digest(&canonical)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigParser;

    fn parse(yaml: &str) -> ClusterConfig {
        ConfigParser::new().parse_yaml(yaml, None).expect("valid yaml")
    }

    #[test]
    fn test_hash_ignores_formatting() {
        let a = parse("name: c1\nproject: p\nregion: r\nssh_access: [0.0.0.0/0]\n");
        let b = parse("region: r\nproject: p\nname: c1\nssh_access:\n  - 0.0.0.0/0\n");
        let hasher = ConfigHasher::new();
        assert_eq!(
            hasher.hash_config(&a).expect("hash"),
            hasher.hash_config(&b).expect("hash")
        );
    }

    #[test]
    fn test_different_configs_different_hash() {
        let hasher = ConfigHasher::new();
        let a = parse("name: c1\nproject: p\nregion: r\n");
        let b = parse("name: c2\nproject: p\nregion: r\n");
        let hash = hasher.hash_config(&a).expect("hash");
        assert_eq!(hash.len(), 64);
        assert_ne!(hash, hasher.hash_config(&b).expect("hash"));
    }

    #[test]
    fn test_short_hash() {
        let hasher = ConfigHasher::new();
        assert_eq!(hasher.short_hash("abcdef1234567890"), "abcdef12");
    }
}
