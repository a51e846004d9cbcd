//! Topoflow Cloud Topology
//!
//! This crate attaches and detaches sub-resources (VM disks, VM NICs,
//! virtual network address ranges and virtual router NICs) against a
//! control plane that accepts mutations immediately but applies them
//! asynchronously.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │          caller (orchestrator, CLI, ...)         │
//! └─────────────────┬───────────────────────────────┘
//!                   │ attach / detach / resize
//! ┌─────────────────▼───────────────────────────────┐
//! │                 topoflow-cloud                   │
//! │  ┌──────────────────────────────────────────┐   │
//! │  │              Topology<C>                  │   │
//! │  └──────────────────────────────────────────┘   │
//! │  ┌────────────┐ ┌────────────┐ ┌────────────┐   │
//! │  │LockRegistry│ │  wait_for  │ │ DiffMatch  │   │
//! │  └────────────┘ └────────────┘ └────────────┘   │
//! │  ┌──────────────────────────────────────────┐   │
//! │  │        trait ControlPlane { ... }         │   │
//! │  └──────────────────────────────────────────┘   │
//! └─────────────────┬───────────────────────────────┘
//!                   │
//!          ┌────────▼────────┐
//!          │ topoflow-cloud- │
//!          │ one (CLI based) │
//!          └─────────────────┘
//! ```

pub mod diff;
pub mod error;
pub mod kind;
pub mod lock;
pub mod model;
pub mod plane;
pub mod state;
pub mod template;
pub mod topology;
pub mod waiter;

// Re-exports
pub use diff::{DiffMatch, KnownId, Pending, Resolver, Snapshot, resolve_attached, resolve_detached};
pub use error::{Operation, Result, TopologyError};
pub use kind::{AddressRange, ChildKind, Disk, Nic, RouterNic};
pub use lock::{CoLockPolicy, LockKey, LockRegistry, MultiGuard, MutationGuard, ReadGuard};
pub use model::{ChildObject, ParentInfo, ParentKind, ParentRef, SubResourceKind};
pub use plane::{ApiError, ControlPlane, MutationReceipt};
pub use state::{LcmState, StateSet, VmState, VmStateSet, VnetState, VnetStateSet, vm_state_label};
pub use template::AttributeTemplate;
pub use topology::Topology;
pub use waiter::{PollSettings, Probe, ProbeError, WaitError, WaitOutcome, WaitSpec, wait_for};
