//! CLI module for the gce-infra tool.
//!
//! This module provides the command-line interface for provisioning
//! cluster infrastructure.

mod commands;
mod output;

pub use commands::{Cli, Commands, OutputFormat};
pub use output::OutputFormatter;
