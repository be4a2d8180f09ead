// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![warn(missing_docs)]                // All public items must be documented
#![warn(dead_code)]                   // Unused code is reported
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![warn(unused_imports)]              // Unused imports are reported
#![warn(unused_variables)]            // Unused variables are reported
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::missing_const_for_fn)] // Force const when possible
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::module_inception)]    // Module with same name as crate warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::shadow_unrelated)]    // Shadowing unrelated variables warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # gce-infra
//!
//! Declarative, idempotent provisioning of Kubernetes cluster infrastructure
//! on Google Compute Engine.
//!
//! ## Overview
//!
//! A cluster specification is turned into a graph of resource tasks
//! (networks, subnets, firewall rules, load balancer pieces, instance
//! templates and groups, service accounts, IAM grants, etcd volumes). The
//! engine then runs the graph against a cloud:
//!
//! - **Apply**: create missing resources and update drifted ones
//! - **Dry run**: report what an apply would change
//! - **Export**: emit declarative (Terraform JSON) configuration
//!
//! Every task reads the live resource first, so running the same
//! specification twice changes nothing the second time.
//!
//! ## Modules
//!
//! - [`config`]: Cluster specification parsing and validation
//! - [`cloud`]: Per-kind cloud facades, REST clients and naming rules
//! - [`simulator`]: In-memory cloud implementing every facade
//! - [`tasks`]: One intent type per resource kind
//! - [`engine`]: Dependency ordering, worker pool, retries and reports
//! - [`model`]: Builders turning a specification into tasks
//! - [`cidr`]: Allocation of pod, service and node ranges
//! - [`discovery`]: Etcd membership read back from volume labels
//! - [`resources`]: Listing of cluster-owned resources
//! - [`provisioner`]: Validate, plan, build and run in one call
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! name: c1.example.com
//! project: my-project
//! region: us-central1
//! networking:
//!   subnets:
//!     - name: us-central1
//!       type: private
//!       cidr: 10.0.16.0/20
//! instance_groups:
//!   - name: control-plane
//!     role: ControlPlane
//!     machine_type: e2-standard-2
//!     image: ubuntu-os-cloud/ubuntu-2204-lts
//!     min_size: 1
//!     zones: [us-central1-a]
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cidr;
pub mod cli;
pub mod cloud;
pub mod config;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod groups;
pub mod model;
pub mod provisioner;
pub mod resources;
pub mod simulator;
pub mod tasks;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use cloud::{CloudRegistry, GceCloud};
pub use config::{ClusterConfig, ConfigHasher, ConfigParser, ConfigValidator};
pub use engine::{Engine, EngineConfig, RunReport, Target, TaskSet};
pub use error::{InfraError, Result};
pub use model::build_tasks;
pub use provisioner::{ProvisionResult, Provisioner};
pub use simulator::MockCloud;
