use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error(
        "config file not found. Checked:\n\
        - TOPOFLOW_CONFIG_PATH environment variable\n\
        - current directory: topoflow.yaml\n\
        - ./.topoflow/topoflow.yaml\n\
        - ~/.config/topoflow/topoflow.yaml"
    )]
    ConfigFileNotFound,

    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid config value: {0}")]
    Invalid(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
