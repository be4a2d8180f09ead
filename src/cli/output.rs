//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying
//! information to the user in various formats.

use colored::Colorize;
use serde::Serialize;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::config::{ClusterConfig, ValidationResult};
use crate::discovery::EtcdClusterStatus;
use crate::engine::{Action, RunReport, TaskResult};
use crate::groups::CloudInstanceGroup;
use crate::resources::CloudResource;

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Task result row for table display.
#[derive(Tabled)]
struct TaskRow {
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Details")]
    details: String,
}

/// Etcd member row for table display.
#[derive(Tabled)]
struct EtcdRow {
    #[tabled(rename = "Cluster")]
    cluster: String,
    #[tabled(rename = "Member")]
    member: String,
    #[tabled(rename = "Volume")]
    volume: String,
}

/// Cloud resource row for table display.
#[derive(Tabled)]
struct ResourceRow {
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Location")]
    location: String,
}

/// Managed instance group row for table display.
#[derive(Tabled)]
struct GroupRow {
    #[tabled(rename = "MIG")]
    name: String,
    #[tabled(rename = "Group")]
    group: String,
    #[tabled(rename = "Zone")]
    zone: String,
    #[tabled(rename = "Target")]
    target: i64,
    #[tabled(rename = "Ready")]
    ready: usize,
    #[tabled(rename = "Needs update")]
    need_update: String,
    #[tabled(rename = "Last error")]
    last_error: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats a validation result with a summary of the cluster.
    #[must_use]
    pub fn format_validation(
        &self,
        config: &ClusterConfig,
        result: &ValidationResult,
        config_hash: &str,
        show_warnings: bool,
    ) -> String {
        match self.format {
            OutputFormat::Json => to_json(&ValidationJson {
                cluster: &config.name,
                project: &config.project,
                region: &config.region,
                config_hash,
                instance_groups: config.instance_groups.len(),
                subnets: config.networking.subnets.len(),
                warnings: &result.warnings,
            }),
            OutputFormat::Text => {
                let mut output = format!("{} Configuration is valid!\n", "✓".green());
                if show_warnings && !result.warnings.is_empty() {
                    let _ = write!(output, "\n{} Warnings:\n", "⚠".yellow());
                    for warning in &result.warnings {
                        let _ = writeln!(output, "   - {warning}");
                    }
                }
                output.push_str("\nCluster summary:\n");
                let _ = writeln!(output, "   Cluster: {}", config.name);
                let _ = writeln!(output, "   Project: {} ({})", config.project, config.region);
                let _ = writeln!(output, "   Subnets: {}", config.networking.subnets.len());
                let _ = writeln!(output, "   Instance groups: {}", config.instance_groups.len());
                let _ = writeln!(output, "   Config hash: {}", short(config_hash));
                output
            }
        }
    }

    /// Formats the report of an apply or dry run.
    ///
    /// Unchanged tasks are listed only when `detailed` is set.
    #[must_use]
    pub fn format_report(&self, report: &RunReport, config_hash: &str, detailed: bool) -> String {
        match self.format {
            OutputFormat::Json => to_json(&ReportJson {
                config_hash,
                report,
            }),
            OutputFormat::Text => Self::format_report_text(report, config_hash, detailed),
        }
    }

    fn format_report_text(report: &RunReport, config_hash: &str, detailed: bool) -> String {
        let mut output = String::new();
        let _ = write!(
            output,
            "\n{:?} of {} tasks (config hash {})\n\n",
            report.target,
            report.total,
            short(config_hash)
        );

        let rows: Vec<TaskRow> = report
            .results
            .iter()
            .filter(|r| detailed || !r.is_success() || r.action.is_some_and(Action::is_change))
            .map(|r| TaskRow {
                action: Self::format_action(r),
                kind: r.key.kind.to_string(),
                name: r.key.name.clone(),
                details: Self::details(r),
            })
            .collect();

        if rows.is_empty() {
            let _ = writeln!(
                output,
                "{} No changes required - infrastructure is up to date.",
                "✓".green()
            );
        } else {
            output.push_str(&Table::new(rows).to_string());
            output.push('\n');
        }

        if !report.alternate_names.is_empty() {
            let _ = write!(
                output,
                "\nAPI server alternate names: {}\n",
                report.alternate_names.join(", ")
            );
        }

        let status = if report.success {
            "succeeded".green().to_string()
        } else {
            "failed".red().to_string()
        };
        let _ = write!(
            output,
            "\nRun {status}: {} changed, {} succeeded, {} failed, {} skipped\n",
            report.changed.to_string().yellow(),
            report.successful.to_string().green(),
            report.failed.to_string().red(),
            report.skipped
        );
        output
    }

    /// Formats discovered etcd clusters.
    #[must_use]
    pub fn format_etcd_status(&self, clusters: &[EtcdClusterStatus]) -> String {
        match self.format {
            OutputFormat::Json => to_json(&clusters),
            OutputFormat::Text => {
                if clusters.is_empty() {
                    return "   No etcd volumes found.\n".to_string();
                }
                let rows: Vec<EtcdRow> = clusters
                    .iter()
                    .flat_map(|c| {
                        c.members.iter().map(|m| EtcdRow {
                            cluster: c.name.clone(),
                            member: m.name.clone(),
                            volume: truncate(&m.volume_id, 60),
                        })
                    })
                    .collect();
                format!("{}\n", Table::new(rows))
            }
        }
    }

    /// Formats managed instance groups.
    #[must_use]
    pub fn format_groups(&self, groups: &[CloudInstanceGroup]) -> String {
        match self.format {
            OutputFormat::Json => to_json(&groups),
            OutputFormat::Text => {
                if groups.is_empty() {
                    return "   No managed instance groups found.\n".to_string();
                }
                let rows: Vec<GroupRow> = groups
                    .iter()
                    .map(|g| GroupRow {
                        name: g.name.clone(),
                        group: g.instance_group.clone(),
                        zone: g.zone.clone(),
                        target: g.target_size,
                        ready: g.ready.len(),
                        need_update: if g.need_update.is_empty() {
                            "0".to_string()
                        } else {
                            g.need_update.len().to_string().yellow().to_string()
                        },
                        last_error: g
                            .events
                            .iter()
                            .max_by_key(|e| e.timestamp)
                            .map(|e| truncate(&e.description, 50))
                            .unwrap_or_default(),
                    })
                    .collect();
                format!("{}\n", Table::new(rows))
            }
        }
    }

    /// Formats the resources owned by a cluster.
    #[must_use]
    pub fn format_resources(&self, resources: &[CloudResource]) -> String {
        match self.format {
            OutputFormat::Json => to_json(&resources),
            OutputFormat::Text => {
                if resources.is_empty() {
                    return "   No cluster resources found.\n".to_string();
                }
                let rows: Vec<ResourceRow> = resources
                    .iter()
                    .map(|r| ResourceRow {
                        kind: r.kind.to_string(),
                        name: r.name.clone(),
                        location: if r.location.is_empty() {
                            "global".dimmed().to_string()
                        } else {
                            r.location.clone()
                        },
                    })
                    .collect();
                format!("{}\n{} resource(s)\n", Table::new(rows), resources.len())
            }
        }
    }

    /// Formats a task outcome with color.
    fn format_action(result: &TaskResult) -> String {
        match result.action {
            Some(Action::Created | Action::WouldCreate) => {
                format!("+{}", action_name(result)).green().to_string()
            }
            Some(Action::Updated | Action::WouldUpdate) => {
                format!("~{}", action_name(result)).yellow().to_string()
            }
            Some(Action::Drifted) => "drifted".yellow().to_string(),
            Some(action) => action.to_string().dimmed().to_string(),
            None if result.is_skipped() => "skipped".dimmed().to_string(),
            None => "failed".red().to_string(),
        }
    }

    fn details(result: &TaskResult) -> String {
        if let Some(error) = &result.error {
            return truncate(error, 60);
        }
        truncate(&result.changes.join(", "), 60)
    }
}

fn action_name(result: &TaskResult) -> String {
    result.action.map(|a| a.to_string()).unwrap_or_default()
}

fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_default()
}

/// First eight characters of a hash.
fn short(hash: &str) -> &str {
    hash.get(..8).unwrap_or(hash)
}

/// Truncates a string to a maximum number of characters.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}

// JSON serialization helpers

#[derive(Serialize)]
struct ValidationJson<'a> {
    cluster: &'a str,
    project: &'a str,
    region: &'a str,
    config_hash: &'a str,
    instance_groups: usize,
    subnets: usize,
    warnings: &'a [String],
}

#[derive(Serialize)]
struct ReportJson<'a> {
    config_hash: &'a str,
    #[serde(flatten)]
    report: &'a RunReport,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::EtcdMemberStatus;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdefghijkl", 8), "abcde...");
    }

    #[test]
    fn test_short_hash() {
        assert_eq!(short("0123456789abcdef"), "01234567");
        assert_eq!(short("abc"), "abc");
    }

    #[test]
    fn test_etcd_status_json() {
        let formatter = OutputFormatter::new(OutputFormat::Json);
        let clusters = vec![EtcdClusterStatus {
            name: "main".to_string(),
            members: vec![EtcdMemberStatus {
                name: "a".to_string(),
                volume_id: "d1".to_string(),
            }],
        }];
        let value: serde_json::Value =
            serde_json::from_str(&formatter.format_etcd_status(&clusters)).expect("json");
        assert_eq!(value[0]["name"], "main");
        assert_eq!(value[0]["members"][0]["volume_id"], "d1");
    }

    #[test]
    fn test_groups_json() {
        let formatter = OutputFormatter::new(OutputFormat::Json);
        let groups = vec![CloudInstanceGroup {
            name: "a-nodes-c1".to_string(),
            instance_group: "nodes".to_string(),
            zone: "us-central1-a".to_string(),
            target_size: 2,
            instance_template: "t".to_string(),
            self_link: "l".to_string(),
            ready: Vec::new(),
            need_update: Vec::new(),
            events: Vec::new(),
        }];
        let value: serde_json::Value =
            serde_json::from_str(&formatter.format_groups(&groups)).expect("json");
        assert_eq!(value[0]["instance_group"], "nodes");
        assert_eq!(value[0]["target_size"], 2);
        assert!(
            OutputFormatter::new(OutputFormat::Text)
                .format_groups(&[])
                .contains("No managed instance groups")
        );
    }

    #[test]
    fn test_empty_resources_text() {
        let formatter = OutputFormatter::new(OutputFormat::Text);
        assert!(formatter.format_resources(&[]).contains("No cluster resources"));
    }
}
