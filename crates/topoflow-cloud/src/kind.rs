//! Per sub-resource class strategies

use crate::model::{ParentKind, SubResourceKind};
use crate::state::{
    VM_DISK_TRANSIENT, VM_DISK_UPDATE_READY, VM_FAILURE, VM_NIC_TRANSIENT, VM_NIC_UPDATE_READY,
    VNET_FAILURE, VNET_READY, VNET_TRANSIENT, VROUTER_NIC_DELETION_READY,
};

/// Sub-resource class an attach/detach is specialized for
pub trait ChildKind: Send + Sync + 'static {
    const KIND: SubResourceKind;
    const PARENT: ParentKind;

    /// Parent labels in which a mutation may be issued
    fn ready_labels() -> Vec<String>;

    /// Parent labels while a mutation of this class is in progress
    fn transient_labels() -> Vec<String>;

    /// Parent labels that end any wait with an error
    fn failure_labels() -> Vec<String>;

    /// Parent labels in which a detach may be issued
    fn detach_ready_labels() -> Vec<String> {
        Self::ready_labels()
    }
}

/// VM disk
pub struct Disk;

/// VM network interface
pub struct Nic;

/// Virtual network address range
pub struct AddressRange;

/// Virtual router network interface
pub struct RouterNic;

impl ChildKind for Disk {
    const KIND: SubResourceKind = SubResourceKind::Disk;
    const PARENT: ParentKind = ParentKind::VirtualMachine;

    fn ready_labels() -> Vec<String> {
        VM_DISK_UPDATE_READY.to_strings()
    }

    fn transient_labels() -> Vec<String> {
        VM_DISK_TRANSIENT.to_strings()
    }

    fn failure_labels() -> Vec<String> {
        VM_FAILURE.to_strings()
    }
}

impl ChildKind for Nic {
    const KIND: SubResourceKind = SubResourceKind::Nic;
    const PARENT: ParentKind = ParentKind::VirtualMachine;

    fn ready_labels() -> Vec<String> {
        VM_NIC_UPDATE_READY.to_strings()
    }

    fn transient_labels() -> Vec<String> {
        VM_NIC_TRANSIENT.to_strings()
    }

    fn failure_labels() -> Vec<String> {
        VM_FAILURE.to_strings()
    }
}

impl ChildKind for AddressRange {
    const KIND: SubResourceKind = SubResourceKind::AddressRange;
    const PARENT: ParentKind = ParentKind::VirtualNetwork;

    fn ready_labels() -> Vec<String> {
        VNET_READY.to_strings()
    }

    fn transient_labels() -> Vec<String> {
        VNET_TRANSIENT.to_strings()
    }

    fn failure_labels() -> Vec<String> {
        VNET_FAILURE.to_strings()
    }
}

// A router's state is the state of its VM instances.
impl ChildKind for RouterNic {
    const KIND: SubResourceKind = SubResourceKind::RouterNic;
    const PARENT: ParentKind = ParentKind::VirtualRouter;

    fn ready_labels() -> Vec<String> {
        VM_NIC_UPDATE_READY.to_strings()
    }

    fn transient_labels() -> Vec<String> {
        VM_NIC_TRANSIENT.to_strings()
    }

    fn failure_labels() -> Vec<String> {
        VM_FAILURE.to_strings()
    }

    fn detach_ready_labels() -> Vec<String> {
        VROUTER_NIC_DELETION_READY.to_strings()
    }
}
