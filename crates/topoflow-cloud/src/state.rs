//! Lifecycle state vocabulary for parent objects
//!
//! Virtual machines carry a coarse primary state (`VmState`) and, while
//! `ACTIVE`, a fine-grained LCM sub-state (`LcmState`). Virtual networks only
//! carry a primary state (`VnetState`). Waits compare against the flat label
//! list a [`StateSet`] renders to.

use std::borrow::Cow;
use std::convert::Infallible;
use std::fmt;

macro_rules! state_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $($variant:ident = $code:literal => $label:literal,)*
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub enum $name {
            $($variant,)*
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant,)*];

            /// Map a numeric wire code to a state
            pub fn from_code(code: i32) -> Option<Self> {
                match code {
                    $($code => Some($name::$variant),)*
                    _ => None,
                }
            }

            pub fn code(self) -> i32 {
                match self {
                    $($name::$variant => $code,)*
                }
            }

            pub fn label(self) -> &'static str {
                match self {
                    $($name::$variant => $label,)*
                }
            }

            pub fn from_label(label: &str) -> Option<Self> {
                Self::ALL.iter().copied().find(|s| s.label() == label)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.label())
            }
        }
    };
}

state_enum! {
    /// Primary state of a virtual machine
    VmState {
        Init = 0 => "INIT",
        Pending = 1 => "PENDING",
        Hold = 2 => "HOLD",
        Active = 3 => "ACTIVE",
        Stopped = 4 => "STOPPED",
        Suspended = 5 => "SUSPENDED",
        Done = 6 => "DONE",
        Poweroff = 8 => "POWEROFF",
        Undeployed = 9 => "UNDEPLOYED",
        Cloning = 10 => "CLONING",
        CloningFailure = 11 => "CLONING_FAILURE",
    }
}

state_enum! {
    /// LCM sub-state of an `ACTIVE` virtual machine
    LcmState {
        LcmInit = 0 => "LCM_INIT",
        Prolog = 1 => "PROLOG",
        Boot = 2 => "BOOT",
        Running = 3 => "RUNNING",
        Migrate = 4 => "MIGRATE",
        SaveStop = 5 => "SAVE_STOP",
        SaveSuspend = 6 => "SAVE_SUSPEND",
        SaveMigrate = 7 => "SAVE_MIGRATE",
        PrologMigrate = 8 => "PROLOG_MIGRATE",
        PrologResume = 9 => "PROLOG_RESUME",
        EpilogStop = 10 => "EPILOG_STOP",
        Epilog = 11 => "EPILOG",
        Shutdown = 12 => "SHUTDOWN",
        CleanupResubmit = 15 => "CLEANUP_RESUBMIT",
        Unknown = 16 => "UNKNOWN",
        Hotplug = 17 => "HOTPLUG",
        ShutdownPoweroff = 18 => "SHUTDOWN_POWEROFF",
        BootUnknown = 19 => "BOOT_UNKNOWN",
        BootPoweroff = 20 => "BOOT_POWEROFF",
        BootSuspended = 21 => "BOOT_SUSPENDED",
        BootStopped = 22 => "BOOT_STOPPED",
        CleanupDelete = 23 => "CLEANUP_DELETE",
        HotplugSnapshot = 24 => "HOTPLUG_SNAPSHOT",
        HotplugNic = 25 => "HOTPLUG_NIC",
        HotplugSaveas = 26 => "HOTPLUG_SAVEAS",
        HotplugSaveasPoweroff = 27 => "HOTPLUG_SAVEAS_POWEROFF",
        HotplugSaveasSuspended = 28 => "HOTPLUG_SAVEAS_SUSPENDED",
        ShutdownUndeploy = 29 => "SHUTDOWN_UNDEPLOY",
        EpilogUndeploy = 30 => "EPILOG_UNDEPLOY",
        PrologUndeploy = 31 => "PROLOG_UNDEPLOY",
        BootUndeploy = 32 => "BOOT_UNDEPLOY",
        HotplugPrologPoweroff = 33 => "HOTPLUG_PROLOG_POWEROFF",
        HotplugEpilogPoweroff = 34 => "HOTPLUG_EPILOG_POWEROFF",
        BootMigrate = 35 => "BOOT_MIGRATE",
        BootFailure = 36 => "BOOT_FAILURE",
        BootMigrateFailure = 37 => "BOOT_MIGRATE_FAILURE",
        PrologMigrateFailure = 38 => "PROLOG_MIGRATE_FAILURE",
        PrologFailure = 39 => "PROLOG_FAILURE",
        EpilogFailure = 40 => "EPILOG_FAILURE",
        EpilogStopFailure = 41 => "EPILOG_STOP_FAILURE",
        EpilogUndeployFailure = 42 => "EPILOG_UNDEPLOY_FAILURE",
        PrologMigratePoweroff = 43 => "PROLOG_MIGRATE_POWEROFF",
        PrologMigratePoweroffFailure = 44 => "PROLOG_MIGRATE_POWEROFF_FAILURE",
        PrologMigrateSuspend = 45 => "PROLOG_MIGRATE_SUSPEND",
        PrologMigrateSuspendFailure = 46 => "PROLOG_MIGRATE_SUSPEND_FAILURE",
        BootUndeployFailure = 47 => "BOOT_UNDEPLOY_FAILURE",
        BootStoppedFailure = 48 => "BOOT_STOPPED_FAILURE",
        PrologResumeFailure = 49 => "PROLOG_RESUME_FAILURE",
        PrologUndeployFailure = 50 => "PROLOG_UNDEPLOY_FAILURE",
        DiskSnapshotPoweroff = 51 => "DISK_SNAPSHOT_POWEROFF",
        DiskSnapshotRevertPoweroff = 52 => "DISK_SNAPSHOT_REVERT_POWEROFF",
        DiskSnapshotDeletePoweroff = 53 => "DISK_SNAPSHOT_DELETE_POWEROFF",
        DiskSnapshotSuspended = 54 => "DISK_SNAPSHOT_SUSPENDED",
        DiskSnapshotRevertSuspended = 55 => "DISK_SNAPSHOT_REVERT_SUSPENDED",
        DiskSnapshotDeleteSuspended = 56 => "DISK_SNAPSHOT_DELETE_SUSPENDED",
        DiskSnapshot = 57 => "DISK_SNAPSHOT",
        DiskSnapshotDelete = 59 => "DISK_SNAPSHOT_DELETE",
        PrologMigrateUnknown = 60 => "PROLOG_MIGRATE_UNKNOWN",
        PrologMigrateUnknownFailure = 61 => "PROLOG_MIGRATE_UNKNOWN_FAILURE",
        DiskResize = 62 => "DISK_RESIZE",
        DiskResizePoweroff = 63 => "DISK_RESIZE_POWEROFF",
        DiskResizeUndeployed = 64 => "DISK_RESIZE_UNDEPLOYED",
        HotplugNicPoweroff = 65 => "HOTPLUG_NIC_POWEROFF",
        HotplugResize = 66 => "HOTPLUG_RESIZE",
        HotplugSaveasUndeployed = 67 => "HOTPLUG_SAVEAS_UNDEPLOYED",
        HotplugSaveasStopped = 68 => "HOTPLUG_SAVEAS_STOPPED",
        Backup = 69 => "BACKUP",
        BackupPoweroff = 70 => "BACKUP_POWEROFF",
    }
}

state_enum! {
    /// State of a virtual network
    VnetState {
        Init = 0 => "INIT",
        Ready = 1 => "READY",
        LockCreate = 2 => "LOCK_CREATE",
        LockDelete = 3 => "LOCK_DELETE",
        Done = 4 => "DONE",
        Error = 5 => "ERROR",
        UpdateFailure = 6 => "UPDATE_FAILURE",
    }
}

/// Label a VM reports for wait comparisons.
///
/// The LCM sub-state only has meaning while the VM is `ACTIVE`; in every other
/// primary state the primary label is used.
pub fn vm_state_label(state: VmState, lcm: LcmState) -> &'static str {
    match state {
        VmState::Active => lcm.label(),
        other => other.label(),
    }
}

/// Immutable set of primary and secondary states used as a wait target
#[derive(Debug, Clone)]
pub struct StateSet<P: Clone + 'static, S: Clone + 'static = Infallible> {
    primary: Cow<'static, [P]>,
    secondary: Cow<'static, [S]>,
}

pub type VmStateSet = StateSet<VmState, LcmState>;
pub type VnetStateSet = StateSet<VnetState>;

impl<P, S> StateSet<P, S>
where
    P: Copy + Ord + fmt::Display + 'static,
    S: Copy + Ord + fmt::Display + 'static,
{
    pub const fn new(primary: &'static [P], secondary: &'static [S]) -> Self {
        Self {
            primary: Cow::Borrowed(primary),
            secondary: Cow::Borrowed(secondary),
        }
    }

    /// Union of two sets, returned as a new value
    pub fn append(&self, other: &Self) -> Self {
        Self {
            primary: Cow::Owned(merge(&self.primary, &other.primary)),
            secondary: Cow::Owned(merge(&self.secondary, &other.secondary)),
        }
    }

    pub fn contains_primary(&self, state: P) -> bool {
        self.primary.contains(&state)
    }

    pub fn contains_secondary(&self, state: S) -> bool {
        self.secondary.contains(&state)
    }

    pub fn is_empty(&self) -> bool {
        self.primary.is_empty() && self.secondary.is_empty()
    }

    /// Flat label list, primary labels first
    pub fn to_strings(&self) -> Vec<String> {
        let mut labels: Vec<String> = self.primary.iter().map(|s| s.to_string()).collect();
        for state in self.secondary.iter() {
            let label = state.to_string();
            if !labels.contains(&label) {
                labels.push(label);
            }
        }
        labels
    }
}

fn merge<T: Copy + Ord>(a: &[T], b: &[T]) -> Vec<T> {
    let mut merged: Vec<T> = a.iter().chain(b.iter()).copied().collect();
    merged.sort();
    merged.dedup();
    merged
}

impl<P, S> PartialEq for StateSet<P, S>
where
    P: Copy + Ord + fmt::Display + 'static,
    S: Copy + Ord + fmt::Display + 'static,
{
    fn eq(&self, other: &Self) -> bool {
        merge(&self.primary, &[]) == merge(&other.primary, &[])
            && merge(&self.secondary, &[]) == merge(&other.secondary, &[])
    }
}

use LcmState as L;
use VmState as V;

pub const VM_CREATE_TRANSIENT: VmStateSet = StateSet::new(
    &[V::Init, V::Pending, V::Hold, V::Cloning],
    &[L::LcmInit, L::Prolog, L::Boot],
);

pub const VM_CREATE_READY: VmStateSet = StateSet::new(&[V::Poweroff], &[L::Running]);

pub const VM_DELETE_READY: VmStateSet = StateSet::new(&[V::Done], &[]);

pub const VM_DELETE_TRANSIENT: VmStateSet = StateSet::new(
    &[],
    &[
        L::Epilog,
        L::Shutdown,
        L::ShutdownPoweroff,
        L::ShutdownUndeploy,
        L::EpilogUndeploy,
        L::CleanupDelete,
        L::CleanupResubmit,
    ],
);

pub const VM_POWEROFF_READY: VmStateSet = StateSet::new(&[V::Poweroff], &[]);

pub const VM_POWEROFF_TRANSIENT: VmStateSet =
    StateSet::new(&[], &[L::Shutdown, L::ShutdownPoweroff]);

pub const VM_RESIZE_READY: VmStateSet = StateSet::new(&[V::Poweroff], &[L::Running]);

pub const VM_RESIZE_TRANSIENT: VmStateSet = StateSet::new(&[], &[L::HotplugResize]);

pub const VM_DISK_UPDATE_READY: VmStateSet =
    StateSet::new(&[V::Poweroff, V::Undeployed], &[L::Running]);

pub const VM_DISK_TRANSIENT: VmStateSet = StateSet::new(
    &[],
    &[
        L::Hotplug,
        L::HotplugPrologPoweroff,
        L::HotplugEpilogPoweroff,
        L::DiskResize,
        L::DiskResizePoweroff,
        L::DiskResizeUndeployed,
    ],
);

pub const VM_NIC_UPDATE_READY: VmStateSet = StateSet::new(&[V::Poweroff], &[L::Running]);

pub const VM_NIC_TRANSIENT: VmStateSet =
    StateSet::new(&[], &[L::HotplugNic, L::HotplugNicPoweroff]);

pub const VROUTER_NIC_DELETION_READY: VmStateSet =
    StateSet::new(&[V::Poweroff, V::Undeployed], &[L::Running]);

/// Terminal failure states. Waiting never recovers from these.
pub const VM_FAILURE: VmStateSet = StateSet::new(
    &[V::CloningFailure],
    &[
        L::BootFailure,
        L::BootMigrateFailure,
        L::PrologMigrateFailure,
        L::PrologFailure,
        L::EpilogFailure,
        L::EpilogStopFailure,
        L::EpilogUndeployFailure,
        L::PrologMigratePoweroffFailure,
        L::PrologMigrateSuspendFailure,
        L::BootUndeployFailure,
        L::BootStoppedFailure,
        L::PrologResumeFailure,
        L::PrologUndeployFailure,
        L::PrologMigrateUnknownFailure,
    ],
);

pub const VNET_READY: VnetStateSet = StateSet::new(&[VnetState::Ready], &[]);

pub const VNET_TRANSIENT: VnetStateSet = StateSet::new(
    &[VnetState::Init, VnetState::LockCreate, VnetState::LockDelete],
    &[],
);

pub const VNET_FAILURE: VnetStateSet =
    StateSet::new(&[VnetState::Error, VnetState::UpdateFailure], &[]);
