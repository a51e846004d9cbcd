//! Parent and child object model

use crate::template::AttributeTemplate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Kind of object that owns mutable sub-resources
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParentKind {
    VirtualMachine,
    VirtualRouter,
    VirtualNetwork,
}

impl fmt::Display for ParentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParentKind::VirtualMachine => write!(f, "vm"),
            ParentKind::VirtualRouter => write!(f, "vrouter"),
            ParentKind::VirtualNetwork => write!(f, "vnet"),
        }
    }
}

/// Class of sub-resource attached to a parent
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubResourceKind {
    Disk,
    Nic,
    AddressRange,
    RouterNic,
}

impl SubResourceKind {
    /// Attribute name of the child vector in the parent template
    pub fn vector_name(self) -> &'static str {
        match self {
            SubResourceKind::Disk => "DISK",
            SubResourceKind::Nic | SubResourceKind::RouterNic => "NIC",
            SubResourceKind::AddressRange => "AR",
        }
    }

    /// Attribute carrying the server-assigned child id
    pub fn id_key(self) -> &'static str {
        match self {
            SubResourceKind::Disk => "DISK_ID",
            SubResourceKind::Nic | SubResourceKind::RouterNic => "NIC_ID",
            SubResourceKind::AddressRange => "AR_ID",
        }
    }
}

impl fmt::Display for SubResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubResourceKind::Disk => write!(f, "disk"),
            SubResourceKind::Nic => write!(f, "nic"),
            SubResourceKind::AddressRange => write!(f, "address range"),
            SubResourceKind::RouterNic => write!(f, "router nic"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ParentRef {
    pub kind: ParentKind,
    pub id: u64,
}

impl ParentRef {
    pub fn vm(id: u64) -> Self {
        Self {
            kind: ParentKind::VirtualMachine,
            id,
        }
    }

    pub fn vrouter(id: u64) -> Self {
        Self {
            kind: ParentKind::VirtualRouter,
            id,
        }
    }

    pub fn vnet(id: u64) -> Self {
        Self {
            kind: ParentKind::VirtualNetwork,
            id,
        }
    }
}

impl fmt::Display for ParentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.id)
    }
}

/// Point-in-time representation of a parent as read from the control plane
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParentInfo {
    pub parent: ParentRef,

    /// State label (LCM label while a VM is ACTIVE, primary label otherwise)
    pub state: String,

    /// Child templates per sub-resource class, in the order the parent lists them
    pub children: BTreeMap<SubResourceKind, Vec<AttributeTemplate>>,

    /// Free-form user attributes (the remote side records errors here)
    pub user_template: AttributeTemplate,

    /// Top-level capacity attributes (CPU, VCPU, MEMORY)
    pub capacity: AttributeTemplate,
}

impl ParentInfo {
    pub fn new(parent: ParentRef, state: impl Into<String>) -> Self {
        Self {
            parent,
            state: state.into(),
            children: BTreeMap::new(),
            user_template: AttributeTemplate::new(),
            capacity: AttributeTemplate::new(),
        }
    }

    pub fn with_children(
        mut self,
        kind: SubResourceKind,
        children: impl IntoIterator<Item = AttributeTemplate>,
    ) -> Self {
        self.children.insert(kind, children.into_iter().collect());
        self
    }

    pub fn children(&self, kind: SubResourceKind) -> &[AttributeTemplate] {
        self.children.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    /// True when the parent owns no children of any class
    pub fn has_no_children(&self) -> bool {
        self.children.values().all(Vec::is_empty)
    }

    pub fn child(&self, kind: SubResourceKind, child_id: u64) -> Option<&AttributeTemplate> {
        self.children(kind)
            .iter()
            .find(|c| c.get_u64(kind.id_key()) == Some(child_id))
    }

    /// Error text recorded on the parent, if any
    pub fn error_attribute(&self, key: &str) -> Option<String> {
        self.user_template
            .get(key)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }
}

/// A child matched after an attach, with its server-assigned id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildObject {
    pub kind: SubResourceKind,
    pub id: u64,
    pub template: AttributeTemplate,
}
