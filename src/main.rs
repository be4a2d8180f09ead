//! gce-infra CLI entrypoint.
//!
//! This is the main entrypoint for the gce-infra command-line tool.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use gce_infra::cli::{Cli, Commands, OutputFormatter};
use gce_infra::cloud::{CloudRegistry, GceCloud, WaiterConfig};
use gce_infra::config::{
    ClusterConfig, ConfigHasher, ConfigParser, ConfigValidator, find_config_file,
};
use gce_infra::discovery::find_etcd_status;
use gce_infra::engine::{Engine, EngineConfig, Target};
use gce_infra::error::{ConfigError, InfraError, Result};
use gce_infra::groups::{get_cloud_groups, recreate_instance};
use gce_infra::provisioner::Provisioner;
use gce_infra::resources::list_cluster_resources;
use gce_infra::simulator::MockCloud;

use clap::Parser;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose, cli.log_json);

    // Run async runtime
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system.
///
/// `RUST_LOG` takes precedence over the verbosity flag.
fn init_logging(verbose: bool, json: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Main async entry point. Returns false when a run completed with failed tasks.
async fn run(cli: Cli) -> Result<bool> {
    let formatter = OutputFormatter::new(cli.output);
    let config_file = resolve_config_path(cli.config.as_ref())?;

    match cli.command {
        Commands::Validate { warnings } => cmd_validate(&config_file, warnings, &formatter),
        Commands::Plan { detailed } => {
            let config = load_config(&config_file)?;
            let provisioner = provisioner(&cli, &config, cli.simulate)?;
            cmd_plan(&config, &provisioner, detailed, &formatter).await
        }
        Commands::Apply { yes } => {
            let config = load_config(&config_file)?;
            let provisioner = provisioner(&cli, &config, cli.simulate)?;
            cmd_apply(&config, &provisioner, yes, &formatter).await
        }
        Commands::Export { ref file } => {
            let config = load_config(&config_file)?;
            // Exports never touch the cloud, so no credentials are needed.
            let offline = cli.simulate || cli.access_token.is_none();
            let provisioner = provisioner(&cli, &config, offline)?;
            cmd_export(&config, &provisioner, file.as_deref()).await
        }
        Commands::Status => {
            let config = load_config(&config_file)?;
            let cloud = create_cloud(&cli, &config, cli.simulate)?;
            let clusters = find_etcd_status(&cloud, &config.name).await?;
            write_stdout(&formatter.format_etcd_status(&clusters))?;
            Ok(true)
        }
        Commands::Resources => {
            let config = load_config(&config_file)?;
            let cloud = create_cloud(&cli, &config, cli.simulate)?;
            let resources = list_cluster_resources(&cloud, &config.name).await?;
            write_stdout(&formatter.format_resources(&resources))?;
            Ok(true)
        }
        Commands::Groups { recreate_outdated } => {
            let config = load_config(&config_file)?;
            let cloud = create_cloud(&cli, &config, cli.simulate)?;
            cmd_groups(&cloud, &config, recreate_outdated, &formatter).await
        }
    }
}

/// Validate configuration.
fn cmd_validate(config_file: &Path, show_warnings: bool, formatter: &OutputFormatter) -> Result<bool> {
    info!("Validating configuration: {}", config_file.display());
    let parser = parser_for(config_file);
    parser.load_dotenv()?;
    let config = parser.load_with_env(config_file)?;

    let result = ConfigValidator::new().check(&config);
    if !result.errors.is_empty() {
        eprintln!("Configuration is invalid:");
        for error in &result.errors {
            eprintln!("  - {}: {}", error.field, error.message);
        }
        return Ok(false);
    }

    let hash = ConfigHasher::new().hash_config(&config)?;
    write_stdout(&formatter.format_validation(&config, &result, &hash, show_warnings))?;
    Ok(true)
}

/// Show what an apply would change.
async fn cmd_plan(
    config: &ClusterConfig,
    provisioner: &Provisioner,
    detailed: bool,
    formatter: &OutputFormatter,
) -> Result<bool> {
    let result = provisioner.run(config, Target::DryRun).await?;
    write_stdout(&formatter.format_report(&result.report, &result.config_hash, detailed))?;
    Ok(result.report.success)
}

/// Apply the cluster infrastructure.
async fn cmd_apply(
    config: &ClusterConfig,
    provisioner: &Provisioner,
    auto_approve: bool,
    formatter: &OutputFormatter,
) -> Result<bool> {
    // Show plan
    let plan = provisioner.run(config, Target::DryRun).await?;
    if !plan.report.success {
        write_stdout(&formatter.format_report(&plan.report, &plan.config_hash, false))?;
        return Ok(false);
    }
    if plan.report.changed == 0 {
        eprintln!("No changes to apply.");
        return Ok(true);
    }
    write_stdout(&formatter.format_report(&plan.report, &plan.config_hash, false))?;

    // Confirm
    if !auto_approve {
        eprint!("Do you want to apply these changes? [y/N]: ");
        std::io::stderr().flush()?;

        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;

        if !input.trim().eq_ignore_ascii_case("y") {
            eprintln!("Apply cancelled.");
            return Ok(true);
        }
    }

    let result = provisioner.run(config, Target::Apply).await?;
    write_stdout(&formatter.format_report(&result.report, &result.config_hash, false))?;
    for failure in result.report.failures() {
        warn!(
            "{} failed: {}",
            failure.key,
            failure.error.as_deref().unwrap_or_default()
        );
    }
    Ok(result.report.success)
}

/// Write declarative configuration.
async fn cmd_export(
    config: &ClusterConfig,
    provisioner: &Provisioner,
    file: Option<&Path>,
) -> Result<bool> {
    let result = provisioner.run(config, Target::Export).await?;
    let document = result
        .report
        .declarative
        .unwrap_or_else(|| serde_json::json!({}));
    let rendered = serde_json::to_string_pretty(&document)?;

    match file {
        Some(path) => {
            std::fs::write(path, format!("{rendered}\n"))?;
            eprintln!("Wrote {}", path.display());
        }
        None => write_stdout(&format!("{rendered}\n"))?,
    }
    Ok(result.report.success)
}

/// Show managed instance groups, optionally recreating outdated instances.
async fn cmd_groups(
    cloud: &GceCloud,
    config: &ClusterConfig,
    recreate_outdated: bool,
    formatter: &OutputFormatter,
) -> Result<bool> {
    let groups: Vec<_> = get_cloud_groups(cloud, config, true)
        .await?
        .into_values()
        .collect();
    write_stdout(&formatter.format_groups(&groups))?;
    if !recreate_outdated {
        return Ok(true);
    }

    let mut ok = true;
    for group in &groups {
        for instance in &group.need_update {
            if let Err(e) = recreate_instance(cloud, group, instance).await {
                warn!("Recreating {} failed: {e}", instance.name);
                ok = false;
            }
        }
    }
    Ok(ok)
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Resolves the configuration file path.
fn resolve_config_path(config_path: Option<&PathBuf>) -> Result<PathBuf> {
    config_path.map_or_else(|| find_config_file("."), |path| Ok(path.clone()))
}

/// A parser rooted at the directory of `config_file`.
fn parser_for(config_file: &Path) -> ConfigParser {
    ConfigParser::new().with_base_path(config_file.parent().unwrap_or_else(|| Path::new(".")))
}

/// Loads and validates the cluster specification.
fn load_config(config_file: &Path) -> Result<ClusterConfig> {
    debug!("Loading configuration from: {}", config_file.display());
    let parser = parser_for(config_file);
    parser.load_dotenv()?;
    let config = parser.load_with_env(config_file)?;
    ConfigValidator::new().validate(&config)?;
    Ok(config)
}

/// Creates the registry handing out cloud handles: simulated when `simulate`
/// is set, live otherwise.
fn create_registry(cli: &Cli, simulate: bool) -> Result<CloudRegistry> {
    if simulate {
        info!("Running against the in-memory simulator");
        return Ok(MockCloud::new().registry());
    }
    let token = cli.access_token.as_deref().ok_or_else(|| {
        InfraError::Config(ConfigError::validation(
            "No access token; set GCE_INFRA_ACCESS_TOKEN or pass --simulate",
            "access_token",
        ))
    })?;
    Ok(CloudRegistry::live(token, WaiterConfig::default()))
}

/// Returns the handle for the cluster's project and region.
fn create_cloud(cli: &Cli, config: &ClusterConfig, simulate: bool) -> Result<Arc<GceCloud>> {
    create_registry(cli, simulate)?.get(&config.project, &config.region)
}

/// Creates a provisioner on the cloud selected by the flags.
fn provisioner(cli: &Cli, config: &ClusterConfig, simulate: bool) -> Result<Provisioner> {
    let cloud = create_cloud(cli, config, simulate)?;
    let engine_config = EngineConfig {
        workers: cli.workers,
        ..EngineConfig::default()
    };
    Ok(Provisioner::new(Engine::new(cloud, engine_config)))
}

/// Writes command output to standard output.
fn write_stdout(text: &str) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(text.as_bytes())?;
    stdout.flush()?;
    Ok(())
}
