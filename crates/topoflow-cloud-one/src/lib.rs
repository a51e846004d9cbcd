//! OpenNebula control plane for Topoflow
//!
//! This crate implements the `ControlPlane` trait on top of the OpenNebula
//! command-line tools, so `Topology` can attach and detach disks, NICs,
//! address ranges and virtual router NICs.
//!
//! # Requirements
//!
//! - `onevm`, `onevnet` and `onevrouter` must be installed
//! - Authentication is managed through the usual `ONE_AUTH` setup
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use topoflow_cloud::{AttributeTemplate, Disk, Topology};
//! use topoflow_cloud_one::OneControlPlane;
//!
//! let config = topoflow_config::load_or_default()?;
//! let plane = Arc::new(OneControlPlane::from_config(&config.control_plane));
//! let topology = Topology::from_config(plane, &config);
//!
//! let request = AttributeTemplate::new().with("IMAGE_ID", 7);
//! let disk = topology
//!     .attach::<Disk>(&cancel, 42, &request, topology.settings().default_timeout)
//!     .await?;
//! ```

pub mod document;
pub mod error;
pub mod onecli;
pub mod plane;

pub use document::{RouterInfo, parse_vm, parse_vnet, parse_vrouter, router_state, vm_label};
pub use error::{OneError, Result};
pub use onecli::{OneCli, Tool};
pub use plane::OneControlPlane;
