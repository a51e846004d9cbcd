pub mod error;

pub use error::*;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable holding a direct path to the config file
pub const CONFIG_PATH_ENV: &str = "TOPOFLOW_CONFIG_PATH";

const CONFIG_FILE_NAME: &str = "topoflow.yaml";
const PROJECT_DIR_NAME: &str = ".topoflow";
const GLOBAL_DIR_NAME: &str = "topoflow";

/// Topoflow settings file (`topoflow.yaml`)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopoflowConfig {
    pub poll: PollConfig,
    pub locking: LockingConfig,
    pub control_plane: ControlPlaneConfig,
}

/// Poll timing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    /// Delay between two probes
    pub delay_ms: u64,
    /// Lower bound for `delay_ms`
    pub min_delay_ms: u64,
    /// Timeout used when the caller does not pass one
    pub default_timeout_secs: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            delay_ms: 10_000,
            min_delay_ms: 3_000,
            default_timeout_secs: 300,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockingConfig {
    /// Disk and NIC mutations on the same VM exclude each other
    pub co_lock_disk_nic: bool,
}

impl Default for LockingConfig {
    fn default() -> Self {
        Self {
            co_lock_disk_nic: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlPlaneConfig {
    /// XML-RPC endpoint passed to the CLI; the CLI's own default when unset
    pub endpoint: Option<String>,
    /// User template attribute the control plane records errors under
    pub error_attribute: String,
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            error_attribute: "ERROR".to_string(),
        }
    }
}

impl TopoflowConfig {
    /// Parse a YAML document
    pub fn from_yaml(path: &Path, content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll.default_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "poll.default_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.poll.delay_ms == 0 && self.poll.min_delay_ms == 0 {
            return Err(ConfigError::Invalid(
                "poll.delay_ms or poll.min_delay_ms must be greater than 0".to_string(),
            ));
        }
        if self.control_plane.error_attribute.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "control_plane.error_attribute must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Find the config file.
///
/// Search order:
/// 1. `TOPOFLOW_CONFIG_PATH` environment variable
/// 2. current directory: `topoflow.yaml`
/// 3. `./.topoflow/topoflow.yaml`
/// 4. `~/.config/topoflow/topoflow.yaml` (global)
pub fn find_config_file() -> Result<PathBuf> {
    if let Ok(config_path) = std::env::var(CONFIG_PATH_ENV) {
        let path = PathBuf::from(config_path);
        if path.exists() {
            return Ok(path);
        }
    }

    let current_dir = std::env::current_dir()?;

    let path = current_dir.join(CONFIG_FILE_NAME);
    if path.exists() {
        return Ok(path);
    }

    let project_dir = current_dir.join(PROJECT_DIR_NAME);
    if project_dir.is_dir() {
        let path = project_dir.join(CONFIG_FILE_NAME);
        if path.exists() {
            return Ok(path);
        }
    }

    if let Some(config_dir) = dirs::config_dir() {
        let global_config = config_dir.join(GLOBAL_DIR_NAME).join(CONFIG_FILE_NAME);
        if global_config.exists() {
            return Ok(global_config);
        }
    }

    Err(ConfigError::ConfigFileNotFound)
}

/// Load the config from a file
pub fn load(path: &Path) -> Result<TopoflowConfig> {
    let content = std::fs::read_to_string(path)?;
    TopoflowConfig::from_yaml(path, &content)
}

/// Load the discovered config file, or defaults when there is none
pub fn load_or_default() -> Result<TopoflowConfig> {
    match find_config_file() {
        Ok(path) => load(&path),
        Err(ConfigError::ConfigFileNotFound) => Ok(TopoflowConfig::default()),
        Err(e) => Err(e),
    }
}
