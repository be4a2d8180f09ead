//! Configuration parser for loading cluster specifications.
//!
//! Loads the cluster YAML file, an optional `.env` file, and applies
//! environment variable overrides on top.

use crate::error::{ConfigError, InfraError, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::spec::ClusterConfig;

/// Overrides `project`.
pub const ENV_PROJECT: &str = "GCE_INFRA_PROJECT";
/// Overrides `region`.
pub const ENV_REGION: &str = "GCE_INFRA_REGION";
/// Overrides `config_base`.
pub const ENV_CONFIG_BASE: &str = "GCE_INFRA_CONFIG_BASE";

/// Configuration parser for loading cluster specifications.
#[derive(Debug, Default)]
pub struct ConfigParser {
    /// Base path for resolving the `.env` file.
    base_path: Option<PathBuf>,
}

impl ConfigParser {
    /// Creates a new configuration parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the base path for resolving relative paths.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads a cluster specification from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<ClusterConfig> {
        let path = path.as_ref();
        info!("Loading cluster specification from: {}", path.display());

        if !path.exists() {
            return Err(InfraError::Config(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }));
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            InfraError::Config(ConfigError::ParseError {
                message: format!("Failed to read file: {e}"),
                location: Some(path.display().to_string()),
            })
        })?;

        self.parse_yaml(&content, Some(path))
    }

    /// Parses a cluster specification from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<ClusterConfig> {
        debug!("Parsing YAML cluster specification");

        let config: ClusterConfig = serde_yaml::from_str(content).map_err(|e| {
            InfraError::Config(ConfigError::ParseError {
                message: format!("YAML parse error: {e}"),
                location: source.map(|p| p.display().to_string()),
            })
        })?;

        debug!("Parsed cluster specification for {}", config.name);
        Ok(config)
    }

    /// Loads a cluster specification and applies environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_with_env(&self, path: impl AsRef<Path>) -> Result<ClusterConfig> {
        let mut config = self.load_file(path)?;
        Self::apply_env_overrides(&mut config, |name| std::env::var(name).ok());
        Ok(config)
    }

    /// Applies overrides looked up through `var`.
    pub fn apply_env_overrides(
        config: &mut ClusterConfig,
        var: impl Fn(&str) -> Option<String>,
    ) {
        if let Some(project) = var(ENV_PROJECT) {
            debug!("Overriding project from environment");
            config.project = project;
        }
        if let Some(region) = var(ENV_REGION) {
            debug!("Overriding region from environment");
            config.region = region;
        }
        if let Some(base) = var(ENV_CONFIG_BASE) {
            debug!("Overriding config_base from environment");
            config.config_base = Some(base);
        }
    }

    /// Loads the .env file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the .env file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self
            .base_path
            .as_ref()
            .map_or_else(|| PathBuf::from(".env"), |p| p.join(".env"));

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| {
                InfraError::Config(ConfigError::ParseError {
                    message: format!("Failed to load .env file: {e}"),
                    location: Some(env_path.display().to_string()),
                })
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }
}

/// Default cluster specification file names to search for.
pub const DEFAULT_CONFIG_FILES: &[&str] = &[
    "cluster.yaml",
    "cluster.yml",
    "gce-infra.yaml",
    "gce-infra.yml",
];

/// Finds the specification file in `start_dir` or one of its parents.
///
/// # Errors
///
/// Returns an error if no specification file is found.
pub fn find_config_file(start_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let start = start_dir.as_ref();
    let mut current = start.to_path_buf();

    loop {
        for filename in DEFAULT_CONFIG_FILES {
            let config_path = current.join(filename);
            if config_path.exists() {
                info!("Found cluster specification: {}", config_path.display());
                return Ok(config_path);
            }
        }

        if !current.pop() {
            break;
        }
    }

    Err(InfraError::Config(ConfigError::FileNotFound {
        path: start.join(DEFAULT_CONFIG_FILES[0]),
    }))
}
