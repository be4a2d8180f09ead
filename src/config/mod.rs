//! Cluster specification handling.
//!
//! This module handles all configuration-related functionality:
//! - Parsing and deserializing the cluster YAML file
//! - Validation of configuration values
//! - Computing configuration hashes for change detection

mod hash;
mod parser;
mod spec;
mod validator;

pub use hash::ConfigHasher;
pub use parser::{
    ConfigParser, DEFAULT_CONFIG_FILES, ENV_CONFIG_BASE, ENV_PROJECT, ENV_REGION,
    find_config_file,
};
pub use spec::{
    AcceleratorConfig, ApiConfig, ClusterConfig, DnsConfig, DnsType, EtcdClusterConfig,
    EtcdMemberConfig, InstanceGroupConfig, InstanceGroupRole, LoadBalancerConfig,
    LoadBalancerType, NetworkingConfig, SubnetConfig, SubnetType, Topology,
};
pub use validator::{ConfigValidator, ValidationError, ValidationResult};
