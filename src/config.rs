//! datamap configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main datamap configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Where mapping definitions are loaded from
    pub mappings: MappingsConfig,

    /// Optional YAML table of doctype columns
    #[serde(rename = "schema-file")]
    pub schema_file: Option<PathBuf>,

    /// Expression evaluator limits
    pub evaluator: EvaluatorConfig,
}

/// Environment variable naming a config file, consulted after `--config`
pub const CONFIG_ENV: &str = "DATAMAP_CONFIG";

impl Config {
    /// Load configuration with fallback chain
    ///
    /// `--config`, then `$DATAMAP_CONFIG`, then `.datamap.yml`, then
    /// `~/.config/datamap/datamap.yml`, then defaults.
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        let env_path = std::env::var_os(CONFIG_ENV).filter(|v| !v.is_empty()).map(PathBuf::from);
        Self::load_chain(config_path, env_path)
    }

    fn load_chain(config_path: Option<&PathBuf>, env_path: Option<PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // A path named by the environment must exist
        if let Some(path) = env_path {
            return Self::load_from_file(&path)
                .context(format!("Failed to load config from {} (set by {})", path.display(), CONFIG_ENV));
        }

        // Try project-local config: .datamap.yml
        let local_config = PathBuf::from(".datamap.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/datamap/datamap.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("datamap").join("datamap.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        // No config file found, use defaults
        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Schema file with a leading `~/` resolved against the home directory
    pub fn schema_path(&self) -> Option<PathBuf> {
        self.schema_file
            .as_deref()
            .and_then(|path| expand_home(&path.to_string_lossy()))
    }
}

/// Resolve a leading `~/`; `None` when there is no home directory to resolve it against
fn expand_home(path: &str) -> Option<PathBuf> {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir().map(|home| home.join(rest)),
        None => Some(PathBuf::from(path)),
    }
}

/// Mapping definition paths configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MappingsConfig {
    /// Directories to search for mapping definitions (searched in order)
    pub paths: Vec<String>,
}

impl Default for MappingsConfig {
    fn default() -> Self {
        Self {
            paths: vec!["~/.config/datamap/mappings".to_string(), ".datamap/mappings".to_string()],
        }
    }
}

impl MappingsConfig {
    /// Expand paths (resolve ~/ and relative paths)
    pub fn expanded_paths(&self) -> Vec<PathBuf> {
        self.paths.iter().filter_map(|p| expand_home(p)).collect()
    }
}

/// Expression evaluator limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluatorConfig {
    /// Memory limit for a single evaluation, in bytes
    #[serde(rename = "memory-limit-bytes")]
    pub memory_limit_bytes: usize,

    /// Maximum VM instructions for a single evaluation
    #[serde(rename = "instruction-limit")]
    pub instruction_limit: u64,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            memory_limit_bytes: 8 * 1024 * 1024,
            instruction_limit: 1_000_000,
        }
    }
}
