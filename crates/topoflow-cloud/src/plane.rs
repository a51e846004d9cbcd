//! Control plane client boundary

use crate::model::{ParentInfo, ParentRef, SubResourceKind};
use async_trait::async_trait;
use thiserror::Error;

/// Errors reported by a control plane client
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("transport error: {0}")]
    Transport(String),
}

/// What the control plane returned for an accepted mutation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MutationReceipt {
    /// Id of the new child, when the API reports one
    pub child_id: Option<u64>,
}

impl MutationReceipt {
    pub fn uncorrelated() -> Self {
        Self::default()
    }

    pub fn correlated(child_id: u64) -> Self {
        Self {
            child_id: Some(child_id),
        }
    }
}

/// Imperative, eventually-consistent management API.
///
/// Mutations return once accepted; their effect only becomes visible through
/// later `parent_info` calls.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Read the full current state of a parent
    async fn parent_info(&self, parent: ParentRef) -> Result<ParentInfo, ApiError>;

    /// Attach a child described by a rendered template
    async fn attach(
        &self,
        parent: ParentRef,
        kind: SubResourceKind,
        template: &str,
    ) -> Result<MutationReceipt, ApiError>;

    /// Detach or release a child by id
    async fn detach(
        &self,
        parent: ParentRef,
        kind: SubResourceKind,
        child_id: u64,
    ) -> Result<(), ApiError>;

    /// Grow a VM disk to `size` (MB)
    async fn resize_disk(&self, vm: ParentRef, disk_id: u64, size: u64) -> Result<(), ApiError>;

    /// Change VM capacity from a rendered template (CPU, VCPU, MEMORY)
    async fn resize(&self, vm: ParentRef, template: &str) -> Result<(), ApiError>;
}
