//! Orchestration error types

use crate::model::{ParentInfo, ParentRef, SubResourceKind};
use crate::plane::ApiError;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Operation an error refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Attach(SubResourceKind),
    Detach(SubResourceKind),
    Read(SubResourceKind),
    ResizeDisk,
    ResizeVm,
    AwaitReady(SubResourceKind),
    WaitCreated,
    WaitDeleted,
    WaitPoweredOff,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Attach(kind) => write!(f, "{} attach", kind),
            Operation::Detach(kind) => write!(f, "{} detach", kind),
            Operation::Read(kind) => write!(f, "{} read", kind),
            Operation::ResizeDisk => write!(f, "disk resize"),
            Operation::ResizeVm => write!(f, "capacity resize"),
            Operation::AwaitReady(kind) => write!(f, "readiness for {} update", kind),
            Operation::WaitCreated => write!(f, "creation"),
            Operation::WaitDeleted => write!(f, "deletion"),
            Operation::WaitPoweredOff => write!(f, "power off"),
        }
    }
}

fn with_cause(cause: &Option<String>) -> String {
    match cause {
        Some(cause) => format!(": {}", cause),
        None => String::new(),
    }
}

fn secs(elapsed: &Duration) -> u64 {
    elapsed.as_secs()
}

fn with_state(state: &Option<String>) -> String {
    match state {
        Some(state) => format!(" (last state: {})", state),
        None => String::new(),
    }
}

#[derive(Error, Debug)]
pub enum TopologyError {
    #[error("{operation} on {parent}: parent not found")]
    NotFound {
        operation: Operation,
        parent: ParentRef,
    },

    #[error("{operation} on {parent} failed in state {state}{}", with_cause(.cause))]
    Failure {
        operation: Operation,
        parent: ParentRef,
        state: String,
        cause: Option<String>,
    },

    #[error(
        "{operation} on {parent} timed out after {}s{}{}",
        secs(.elapsed),
        with_state(.state),
        with_cause(.cause)
    )]
    Timeout {
        operation: Operation,
        parent: ParentRef,
        elapsed: Duration,
        state: Option<String>,
        cause: Option<String>,
        /// Last parent state observed before the deadline
        last: Option<Box<ParentInfo>>,
    },

    #[error("{operation} on {parent} rejected by control plane: {source}")]
    Api {
        operation: Operation,
        parent: ParentRef,
        #[source]
        source: ApiError,
    },

    #[error("{operation} on {parent} cancelled")]
    Cancelled {
        operation: Operation,
        parent: ParentRef,
    },

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl TopologyError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, TopologyError::Timeout { .. })
    }

    /// Remote error text attached to this error, if any
    pub fn remote_cause(&self) -> Option<&str> {
        match self {
            TopologyError::Failure { cause, .. } | TopologyError::Timeout { cause, .. } => {
                cause.as_deref()
            }
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, TopologyError>;
