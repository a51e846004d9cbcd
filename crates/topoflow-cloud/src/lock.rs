//! Mutation lock registry
//!
//! One read/write lock per (parent, sub-resource class) domain. Entries are
//! reference counted: they are created on first use and removed once no caller
//! holds or waits for them, so the map only grows with the number of domains
//! currently in use.

use crate::model::{ParentRef, SubResourceKind};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use topoflow_config::LockingConfig;

/// Mutation domain
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LockKey {
    pub parent: ParentRef,
    pub kind: SubResourceKind,
}

impl LockKey {
    pub fn new(parent: ParentRef, kind: SubResourceKind) -> Self {
        Self { parent, kind }
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.parent, self.kind)
    }
}

/// Which domains are locked together.
///
/// A VM serializes its disks and NICs in one template, so reading one list
/// while the other is rewritten is not safe. With `disk_with_nic` set, disk
/// and NIC mutations on the same VM exclude each other.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoLockPolicy {
    pub disk_with_nic: bool,
}

impl Default for CoLockPolicy {
    fn default() -> Self {
        Self {
            disk_with_nic: true,
        }
    }
}

impl From<&LockingConfig> for CoLockPolicy {
    fn from(config: &LockingConfig) -> Self {
        Self {
            disk_with_nic: config.co_lock_disk_nic,
        }
    }
}

impl CoLockPolicy {
    /// Keys to acquire for a mutation of `kind` on `parent`
    pub fn keys(&self, parent: ParentRef, kind: SubResourceKind) -> Vec<LockKey> {
        let mut keys = vec![LockKey::new(parent, kind)];
        if self.disk_with_nic {
            match kind {
                SubResourceKind::Disk => keys.push(LockKey::new(parent, SubResourceKind::Nic)),
                SubResourceKind::Nic => keys.push(LockKey::new(parent, SubResourceKind::Disk)),
                SubResourceKind::AddressRange | SubResourceKind::RouterNic => {}
            }
        }
        keys.sort();
        keys
    }
}

struct Entry {
    lock: Arc<RwLock<()>>,
    holders: usize,
}

#[derive(Default)]
pub struct LockRegistry {
    entries: Mutex<HashMap<LockKey, Entry>>,
}

impl fmt::Debug for LockRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockRegistry")
            .field("entries", &self.len())
            .finish()
    }
}

/// Registers a holder for a key; dropping it releases the registration
struct Lease {
    registry: Arc<LockRegistry>,
    key: LockKey,
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.registry.release(&self.key);
    }
}

/// Exclusive hold on one domain
pub struct MutationGuard {
    // declared before `lease` so the lock is released before the entry
    _guard: OwnedRwLockWriteGuard<()>,
    lease: Lease,
}

impl MutationGuard {
    pub fn key(&self) -> LockKey {
        self.lease.key
    }
}

impl Drop for MutationGuard {
    fn drop(&mut self) {
        tracing::debug!(key = %self.lease.key, "released mutation lock");
    }
}

/// Shared hold on one domain
pub struct ReadGuard {
    _guard: OwnedRwLockReadGuard<()>,
    lease: Lease,
}

impl ReadGuard {
    pub fn key(&self) -> LockKey {
        self.lease.key
    }
}

/// Exclusive hold on several domains
pub struct MultiGuard {
    guards: Vec<MutationGuard>,
}

impl MultiGuard {
    pub fn keys(&self) -> Vec<LockKey> {
        self.guards.iter().map(MutationGuard::key).collect()
    }
}

impl LockRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lease(self: &Arc<Self>, key: LockKey) -> (Lease, Arc<RwLock<()>>) {
        let mut entries = self.entries.lock();
        let entry = entries.entry(key).or_insert_with(|| Entry {
            lock: Arc::new(RwLock::new(())),
            holders: 0,
        });
        entry.holders += 1;
        let lock = entry.lock.clone();
        (
            Lease {
                registry: self.clone(),
                key,
            },
            lock,
        )
    }

    fn release(&self, key: &LockKey) {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get_mut(key) {
            entry.holders -= 1;
            if entry.holders == 0 {
                entries.remove(key);
            }
        }
    }

    /// Acquire the exclusive lock of a domain
    pub async fn lock(self: &Arc<Self>, key: LockKey) -> MutationGuard {
        let (lease, lock) = self.lease(key);
        let guard = lock.write_owned().await;
        tracing::debug!(key = %key, "acquired mutation lock");
        MutationGuard {
            _guard: guard,
            lease,
        }
    }

    /// Acquire the shared lock of a domain
    pub async fn read(self: &Arc<Self>, key: LockKey) -> ReadGuard {
        let (lease, lock) = self.lease(key);
        let guard = lock.read_owned().await;
        ReadGuard {
            _guard: guard,
            lease,
        }
    }

    /// Acquire several exclusive locks in key order.
    ///
    /// Sorting gives every caller the same acquisition order, so two callers
    /// co-locking overlapping domains cannot deadlock.
    pub async fn lock_all(self: &Arc<Self>, keys: impl IntoIterator<Item = LockKey>) -> MultiGuard {
        let mut keys: Vec<LockKey> = keys.into_iter().collect();
        keys.sort();
        keys.dedup();

        let mut guards = Vec::with_capacity(keys.len());
        for key in keys {
            guards.push(self.lock(key).await);
        }
        MultiGuard { guards }
    }

    /// Number of domains currently held or waited for
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
