//! CLI command definitions.
//!
//! This module defines all CLI commands and their arguments using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// gce-infra - Declarative cluster infrastructure on Google Compute Engine.
#[derive(Parser, Debug)]
#[command(name = "gce-infra")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the cluster specification.
    #[arg(short, long, global = true, env = "GCE_INFRA_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Output format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    /// Run against an in-memory simulated cloud instead of the real APIs.
    #[arg(long, global = true)]
    pub simulate: bool,

    /// OAuth access token for the Google Cloud APIs.
    #[arg(long, global = true, env = "GCE_INFRA_ACCESS_TOKEN", hide_env_values = true)]
    pub access_token: Option<String>,

    /// Maximum number of tasks running at once.
    #[arg(long, global = true, default_value = "8")]
    pub workers: usize,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate the cluster specification.
    Validate {
        /// Show all warnings, not just errors.
        #[arg(short, long)]
        warnings: bool,
    },

    /// Show what an apply would change, without changing anything.
    Plan {
        /// List unchanged tasks too.
        #[arg(short, long)]
        detailed: bool,
    },

    /// Create and update the cluster infrastructure.
    Apply {
        /// Skip confirmation prompt.
        #[arg(short, long)]
        yes: bool,
    },

    /// Write the infrastructure as declarative (Terraform JSON) configuration.
    Export {
        /// File to write; standard output when omitted.
        #[arg(short = 'f', long)]
        file: Option<PathBuf>,
    },

    /// Show the etcd clusters discovered from their volumes.
    Status,

    /// List the cloud resources owned by the cluster.
    Resources,

    /// Show the managed instance groups and which instances are out of date.
    Groups {
        /// Recreate every instance running an older template.
        #[arg(long)]
        recreate_outdated: bool,
    },
}

/// Output format options.
#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}

impl Cli {
    /// Parses CLI arguments from the command line.
    #[must_use]
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_apply() {
        let cli = Cli::try_parse_from(["gce-infra", "--simulate", "apply", "--yes"]).expect("parsed");
        assert!(cli.simulate);
        assert!(matches!(cli.command, Commands::Apply { yes: true }));
        assert_eq!(cli.workers, 8);
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "gce-infra",
            "plan",
            "--output",
            "json",
            "--config",
            "c.yaml",
        ])
        .expect("parsed");
        assert!(matches!(cli.output, OutputFormat::Json));
        assert_eq!(cli.config, Some(PathBuf::from("c.yaml")));
    }

    #[test]
    fn test_parse_groups() {
        let cli = Cli::try_parse_from(["gce-infra", "groups", "--recreate-outdated"]).expect("parsed");
        assert!(matches!(
            cli.command,
            Commands::Groups {
                recreate_outdated: true
            }
        ));
    }

    #[test]
    fn test_unknown_command_rejected() {
        assert!(Cli::try_parse_from(["gce-infra", "destroy"]).is_err());
    }
}
