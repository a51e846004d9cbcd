//! OpenNebula adapter error types

use thiserror::Error;
use topoflow_cloud::ApiError;

#[derive(Error, Debug)]
pub enum OneError {
    #[error("{0} not found. Please install the OpenNebula CLI tools")]
    CliNotFound(String),

    #[error("{command} failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("object not found: {0}")]
    NotFound(String),

    #[error("virtual router {router}: instance vm {vm} not found")]
    InstanceMissing { router: u64, vm: u64 },

    #[error("unexpected document: {0}")]
    InvalidDocument(String),

    #[error("unknown {field} code {code}")]
    UnknownState { field: &'static str, code: i32 },

    #[error("invalid template: {0}")]
    InvalidTemplate(String),

    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl OneError {
    /// Error for a read; anything but a missing object is retried by waits.
    /// A missing router instance is not a missing router.
    pub fn into_read_error(self) -> ApiError {
        match self {
            OneError::NotFound(what) => ApiError::NotFound(what),
            other => ApiError::Transport(other.to_string()),
        }
    }

    /// Error for a mutation; a refused command is final
    pub fn into_mutation_error(self) -> ApiError {
        match self {
            OneError::NotFound(what) => ApiError::NotFound(what),
            e @ (OneError::CommandFailed { .. } | OneError::InvalidTemplate(_)) => {
                ApiError::Rejected(e.to_string())
            }
            other => ApiError::Transport(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, OneError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_router_instance_is_retried() {
        let err = OneError::InstanceMissing { router: 3, vm: 11 };
        assert!(matches!(err.into_read_error(), ApiError::Transport(_)));

        let err = OneError::NotFound("virtual router 3".to_string());
        assert!(matches!(err.into_read_error(), ApiError::NotFound(_)));
    }
}
