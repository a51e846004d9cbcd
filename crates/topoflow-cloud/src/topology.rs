//! Attach/detach protocol
//!
//! Every mutation runs the same sequence:
//!
//! ```text
//! acquire locks -> await parent ready -> issue mutation -> poll until settled -> release
//! ```
//!
//! Locks are held across every poll sleep and released on every exit path,
//! including cancellation, because the guards are dropped with the future.

use crate::diff::{DiffMatch, KnownId, Resolver, Snapshot, resolve_detached};
use crate::error::{Operation, Result, TopologyError};
use crate::kind::{ChildKind, Disk};
use crate::lock::{CoLockPolicy, LockKey, LockRegistry, MultiGuard};
use crate::model::{ChildObject, ParentInfo, ParentRef, SubResourceKind};
use crate::plane::{ApiError, ControlPlane};
use crate::state::{
    VM_CREATE_READY, VM_CREATE_TRANSIENT, VM_DELETE_READY, VM_DELETE_TRANSIENT, VM_FAILURE,
    VM_POWEROFF_READY, VM_POWEROFF_TRANSIENT, VM_RESIZE_READY, VM_RESIZE_TRANSIENT,
};
use crate::template::AttributeTemplate;
use crate::waiter::{
    PollSettings, Probe, ProbeError, WaitError, WaitOutcome, WaitSpec, deadline_after, wait_for,
};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use topoflow_config::TopoflowConfig;

/// Label reported by a probe once the awaited condition holds
const SETTLED: &str = "SETTLED";

pub const DEFAULT_ERROR_ATTRIBUTE: &str = "ERROR";

/// Attribute holding a disk's size in MB
pub const SIZE_KEY: &str = "SIZE";

/// Capacity attributes a VM resize may change
pub const CAPACITY_KEYS: &[&str] = &["CPU", "VCPU", "MEMORY"];

struct Observed<R> {
    info: ParentInfo,
    outcome: Option<R>,
}

impl<R> fmt::Debug for Observed<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observed")
            .field("info", &self.info)
            .field("settled", &self.outcome.is_some())
            .finish()
    }
}

/// Orchestrates topology mutations against a control plane
pub struct Topology<C: ?Sized> {
    plane: Arc<C>,
    locks: Arc<LockRegistry>,
    settings: PollSettings,
    co_lock: CoLockPolicy,
    error_attribute: String,
}

impl<C: ControlPlane + ?Sized> Topology<C> {
    pub fn new(plane: Arc<C>) -> Self {
        Self {
            plane,
            locks: LockRegistry::new(),
            settings: PollSettings::default(),
            co_lock: CoLockPolicy::default(),
            error_attribute: DEFAULT_ERROR_ATTRIBUTE.to_string(),
        }
    }

    pub fn from_config(plane: Arc<C>, config: &TopoflowConfig) -> Self {
        Self {
            plane,
            locks: LockRegistry::new(),
            settings: PollSettings::from(&config.poll),
            co_lock: CoLockPolicy::from(&config.locking),
            error_attribute: config.control_plane.error_attribute.clone(),
        }
    }

    /// Share a lock registry with other orchestrators in the process
    pub fn with_locks(mut self, locks: Arc<LockRegistry>) -> Self {
        self.locks = locks;
        self
    }

    pub fn with_settings(mut self, settings: PollSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_co_lock(mut self, co_lock: CoLockPolicy) -> Self {
        self.co_lock = co_lock;
        self
    }

    pub fn locks(&self) -> &Arc<LockRegistry> {
        &self.locks
    }

    pub fn settings(&self) -> &PollSettings {
        &self.settings
    }

    pub fn plane(&self) -> &Arc<C> {
        &self.plane
    }

    /// Attach a child described by `request` and return it with its new id.
    ///
    /// Not idempotent: calling it again creates a second child.
    pub async fn attach<K: ChildKind>(
        &self,
        cancel: &CancellationToken,
        parent_id: u64,
        request: &AttributeTemplate,
        timeout: Duration,
    ) -> Result<ChildObject> {
        let kind = K::KIND;
        let parent = ParentRef {
            kind: K::PARENT,
            id: parent_id,
        };
        let operation = Operation::Attach(kind);
        if request.is_empty() {
            return Err(TopologyError::InvalidRequest(format!(
                "{} on {} needs at least one attribute",
                operation, parent
            )));
        }
        let started = Instant::now();
        let deadline = deadline_after(started, timeout);

        let _guard = self
            .acquire(cancel, operation, parent, self.co_lock.keys(parent, kind))
            .await?;

        let current = self
            .await_ready::<K>(cancel, parent, deadline, K::ready_labels())
            .await?;

        let rendered = request.render_vector(kind.vector_name());
        tracing::info!(parent = %parent, "attaching {}: {}", kind, rendered);
        let issued = self.plane.attach(parent, kind, &rendered);
        let receipt = self
            .call(cancel, operation, parent, started, deadline, issued)
            .await?
            .map_err(|source| TopologyError::Api {
                operation,
                parent,
                source,
            })?;

        let resolver: Box<dyn Resolver> = match receipt.child_id {
            Some(id) => Box::new(KnownId { kind, id }),
            None => Box::new(DiffMatch {
                kind,
                before: Snapshot::capture(current.children(kind), kind),
                request: request.clone(),
            }),
        };

        let transient = K::transient_labels();
        let spec = self
            .spec(vec![SETTLED.to_string()], deadline)
            .pending(concat(K::ready_labels(), &transient))
            .failure(K::failure_labels());
        let observed = self
            .observe(cancel, operation, parent, &spec, |info| {
                if transient.contains(&info.state) {
                    return None;
                }
                match resolver.resolve(info.children(kind)) {
                    Ok(child) => Some(child),
                    Err(pending) => {
                        tracing::debug!(parent = %parent, "{}", pending);
                        None
                    }
                }
            })
            .await?;

        match observed.and_then(|o| o.outcome) {
            Some(child) => {
                tracing::info!(parent = %parent, "attached {} {}", kind, child.id);
                Ok(child)
            }
            None => Err(TopologyError::NotFound { operation, parent }),
        }
    }

    /// Detach a child and wait until the parent no longer lists it.
    ///
    /// Succeeds without a mutation when the child (or the whole parent) is
    /// already gone.
    pub async fn detach<K: ChildKind>(
        &self,
        cancel: &CancellationToken,
        parent_id: u64,
        child_id: u64,
        timeout: Duration,
    ) -> Result<()> {
        let kind = K::KIND;
        let parent = ParentRef {
            kind: K::PARENT,
            id: parent_id,
        };
        let operation = Operation::Detach(kind);
        let started = Instant::now();
        let deadline = deadline_after(started, timeout);

        let _guard = self
            .acquire(cancel, operation, parent, self.co_lock.keys(parent, kind))
            .await?;

        let mut ready = K::detach_ready_labels();
        ready.push(SETTLED.to_string());
        let spec = self
            .spec(ready, deadline)
            .pending(K::transient_labels())
            .failure(K::failure_labels())
            .gone_is_success();
        let observed = self
            .observe(cancel, Operation::AwaitReady(kind), parent, &spec, |info| {
                (!resolve_detached(info.children(kind), child_id, kind)).then_some(())
            })
            .await?;

        match observed {
            None => {
                tracing::info!(parent = %parent, "parent is gone, nothing to detach");
                return Ok(());
            }
            Some(Observed {
                outcome: Some(()), ..
            }) => {
                tracing::info!(parent = %parent, "{} {} already detached", kind, child_id);
                return Ok(());
            }
            Some(_) => {}
        }

        tracing::info!(parent = %parent, "detaching {} {}", kind, child_id);
        let issued = self.plane.detach(parent, kind, child_id);
        let detached = self
            .call(cancel, operation, parent, started, deadline, issued)
            .await?;
        match detached {
            Ok(()) => {}
            Err(ApiError::NotFound(message)) => {
                tracing::debug!(parent = %parent, "detach reported not found: {}", message);
            }
            Err(source) => {
                return Err(TopologyError::Api {
                    operation,
                    parent,
                    source,
                });
            }
        }

        let transient = K::transient_labels();
        let spec = self
            .spec(vec![SETTLED.to_string()], deadline)
            .pending(concat(K::detach_ready_labels(), &transient))
            .failure(K::failure_labels())
            .gone_is_success();
        self.observe(cancel, operation, parent, &spec, |info| {
            if transient.contains(&info.state) {
                return None;
            }
            if resolve_detached(info.children(kind), child_id, kind) {
                tracing::debug!(parent = %parent, "{} {} still present", kind, child_id);
                return None;
            }
            Some(())
        })
        .await?;

        tracing::info!(parent = %parent, "detached {} {}", kind, child_id);
        Ok(())
    }

    /// Grow a VM disk and wait until the new size is reported
    pub async fn resize_disk(
        &self,
        cancel: &CancellationToken,
        vm_id: u64,
        disk_id: u64,
        new_size: u64,
        timeout: Duration,
    ) -> Result<()> {
        let kind = SubResourceKind::Disk;
        let parent = ParentRef::vm(vm_id);
        let operation = Operation::ResizeDisk;
        let started = Instant::now();
        let deadline = deadline_after(started, timeout);

        let _guard = self
            .acquire(cancel, operation, parent, self.co_lock.keys(parent, kind))
            .await?;

        let spec = self
            .spec(Disk::ready_labels(), deadline)
            .pending(Disk::transient_labels())
            .failure(Disk::failure_labels());
        let current = self
            .observe(cancel, Operation::AwaitReady(kind), parent, &spec, |_| None::<()>)
            .await?
            .map(|o| o.info)
            .ok_or(TopologyError::NotFound { operation, parent })?;

        let disk = current.child(kind, disk_id).ok_or_else(|| {
            TopologyError::InvalidRequest(format!("disk {} not found on {}", disk_id, parent))
        })?;
        match disk.get_u64(SIZE_KEY) {
            Some(size) if size == new_size => {
                tracing::info!(parent = %parent, "disk {} already has size {}", disk_id, size);
                return Ok(());
            }
            Some(size) if new_size < size => {
                return Err(TopologyError::InvalidRequest(format!(
                    "disk {} on {} cannot shrink from {} to {}",
                    disk_id, parent, size, new_size
                )));
            }
            _ => {}
        }

        tracing::info!(parent = %parent, "resizing disk {} to {}", disk_id, new_size);
        let resize = self.plane.resize_disk(parent, disk_id, new_size);
        self.call(cancel, operation, parent, started, deadline, resize)
            .await?
            .map_err(|source| TopologyError::Api {
                operation,
                parent,
                source,
            })?;

        let transient = Disk::transient_labels();
        let spec = self
            .spec(vec![SETTLED.to_string()], deadline)
            .pending(concat(Disk::ready_labels(), &transient))
            .failure(Disk::failure_labels());
        self.observe(cancel, operation, parent, &spec, |info| {
            if transient.contains(&info.state) {
                return None;
            }
            let size = info
                .child(kind, disk_id)
                .and_then(|d| d.get_u64(SIZE_KEY));
            (size == Some(new_size)).then_some(())
        })
        .await?
        .ok_or(TopologyError::NotFound { operation, parent })?;

        tracing::info!(parent = %parent, "disk {} resized to {}", disk_id, new_size);
        Ok(())
    }

    /// Change VM capacity (CPU, VCPU, MEMORY) and wait until it is applied
    pub async fn resize_vm(
        &self,
        cancel: &CancellationToken,
        vm_id: u64,
        capacity: &AttributeTemplate,
        timeout: Duration,
    ) -> Result<ParentInfo> {
        let parent = ParentRef::vm(vm_id);
        let operation = Operation::ResizeVm;
        if capacity.is_empty() {
            return Err(TopologyError::InvalidRequest(
                "capacity resize needs CPU, VCPU or MEMORY".to_string(),
            ));
        }
        if let Some((key, _)) = capacity.iter().find(|(k, _)| !CAPACITY_KEYS.contains(k)) {
            return Err(TopologyError::InvalidRequest(format!(
                "{} is not a capacity attribute",
                key
            )));
        }
        let started = Instant::now();
        let deadline = deadline_after(started, timeout);

        let keys = vec![
            LockKey::new(parent, SubResourceKind::Disk),
            LockKey::new(parent, SubResourceKind::Nic),
        ];
        let _guard = self.acquire(cancel, operation, parent, keys).await?;

        let spec = self
            .spec(VM_RESIZE_READY.to_strings(), deadline)
            .pending(VM_RESIZE_TRANSIENT.to_strings())
            .failure(VM_FAILURE.to_strings());
        self.observe(cancel, operation, parent, &spec, |_| None::<()>)
            .await?
            .ok_or(TopologyError::NotFound { operation, parent })?;

        tracing::info!(parent = %parent, "resizing capacity: {}", capacity);
        let rendered = capacity.render_flat();
        let resize = self.plane.resize(parent, &rendered);
        self.call(cancel, operation, parent, started, deadline, resize)
            .await?
            .map_err(|source| TopologyError::Api {
                operation,
                parent,
                source,
            })?;

        let transient = VM_RESIZE_TRANSIENT.to_strings();
        let spec = self
            .spec(vec![SETTLED.to_string()], deadline)
            .pending(concat(VM_RESIZE_READY.to_strings(), &transient))
            .failure(VM_FAILURE.to_strings());
        let observed = self
            .observe(cancel, operation, parent, &spec, |info| {
                (!transient.contains(&info.state) && capacity.is_satisfied_by(&info.capacity))
                    .then_some(())
            })
            .await?
            .ok_or(TopologyError::NotFound { operation, parent })?;

        Ok(observed.info)
    }

    /// Wait for a freshly created VM to come up (RUNNING or POWEROFF)
    pub async fn wait_created(
        &self,
        cancel: &CancellationToken,
        vm_id: u64,
        timeout: Duration,
    ) -> Result<ParentInfo> {
        let parent = ParentRef::vm(vm_id);
        let operation = Operation::WaitCreated;
        let spec = WaitSpec::new(VM_CREATE_READY.to_strings(), &self.settings, timeout)
            .pending(VM_CREATE_TRANSIENT.to_strings())
            .failure(VM_FAILURE.to_strings());

        self.observe(cancel, operation, parent, &spec, |_| None::<()>)
            .await?
            .map(|o| o.info)
            .ok_or(TopologyError::NotFound { operation, parent })
    }

    /// Wait for a VM to reach DONE or disappear
    pub async fn wait_deleted(
        &self,
        cancel: &CancellationToken,
        vm_id: u64,
        timeout: Duration,
    ) -> Result<()> {
        let parent = ParentRef::vm(vm_id);
        let spec = WaitSpec::new(VM_DELETE_READY.to_strings(), &self.settings, timeout)
            .pending(VM_DELETE_TRANSIENT.to_strings())
            .failure(VM_FAILURE.to_strings())
            .gone_is_success();

        self.observe(cancel, Operation::WaitDeleted, parent, &spec, |_| None::<()>)
            .await?;
        Ok(())
    }

    /// Wait for a VM to reach POWEROFF
    pub async fn wait_powered_off(
        &self,
        cancel: &CancellationToken,
        vm_id: u64,
        timeout: Duration,
    ) -> Result<ParentInfo> {
        let parent = ParentRef::vm(vm_id);
        let operation = Operation::WaitPoweredOff;
        let spec = WaitSpec::new(VM_POWEROFF_READY.to_strings(), &self.settings, timeout)
            .pending(VM_POWEROFF_TRANSIENT.to_strings())
            .failure(VM_FAILURE.to_strings());

        self.observe(cancel, operation, parent, &spec, |_| None::<()>)
            .await?
            .map(|o| o.info)
            .ok_or(TopologyError::NotFound { operation, parent })
    }

    /// Current children of one class, read under the shared lock
    pub async fn children<K: ChildKind>(&self, parent_id: u64) -> Result<Vec<AttributeTemplate>> {
        let kind = K::KIND;
        let parent = ParentRef {
            kind: K::PARENT,
            id: parent_id,
        };
        let operation = Operation::Read(kind);

        let _guard = self.locks.read(LockKey::new(parent, kind)).await;
        let info = self
            .plane
            .parent_info(parent)
            .await
            .map_err(|source| match source {
                ApiError::NotFound(_) => TopologyError::NotFound { operation, parent },
                source => TopologyError::Api {
                    operation,
                    parent,
                    source,
                },
            })?;
        Ok(info.children(kind).to_vec())
    }

    async fn acquire(
        &self,
        cancel: &CancellationToken,
        operation: Operation,
        parent: ParentRef,
        keys: Vec<LockKey>,
    ) -> Result<MultiGuard> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TopologyError::Cancelled { operation, parent }),
            guard = self.locks.lock_all(keys) => Ok(guard),
        }
    }

    /// Issue one control plane call. Gives up with `Cancelled` or `Timeout`
    /// when the token fires or the deadline passes first; the call may
    /// still have taken effect remotely.
    async fn call<T, Fut>(
        &self,
        cancel: &CancellationToken,
        operation: Operation,
        parent: ParentRef,
        started: Instant,
        deadline: Instant,
        call: Fut,
    ) -> Result<std::result::Result<T, ApiError>>
    where
        Fut: Future<Output = std::result::Result<T, ApiError>>,
    {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TopologyError::Cancelled { operation, parent }),
            result = call => Ok(result),
            _ = sleep_until(deadline) => {
                tracing::warn!(parent = %parent, "{} call still running at the deadline", operation);
                Err(TopologyError::Timeout {
                    operation,
                    parent,
                    elapsed: started.elapsed(),
                    state: None,
                    cause: None,
                    last: None,
                })
            }
        }
    }

    /// Wait until the parent accepts a mutation of class `K`.
    ///
    /// A parent without any children has nothing to race with and is
    /// accepted in whatever state it is in.
    async fn await_ready<K: ChildKind>(
        &self,
        cancel: &CancellationToken,
        parent: ParentRef,
        deadline: Instant,
        mut ready: Vec<String>,
    ) -> Result<ParentInfo> {
        let operation = Operation::AwaitReady(K::KIND);
        ready.push(SETTLED.to_string());
        let spec = self
            .spec(ready, deadline)
            .pending(K::transient_labels())
            .failure(K::failure_labels());

        self.observe(cancel, operation, parent, &spec, |info| {
            info.has_no_children().then_some(())
        })
        .await?
        .map(|o| o.info)
        .ok_or(TopologyError::NotFound { operation, parent })
    }

    fn spec(&self, target: Vec<String>, deadline: Instant) -> WaitSpec {
        let remaining = deadline.saturating_duration_since(Instant::now());
        WaitSpec::new(target, &self.settings, remaining)
    }

    async fn probe(&self, parent: ParentRef) -> std::result::Result<ParentInfo, ProbeError> {
        self.plane
            .parent_info(parent)
            .await
            .map_err(|err| match err {
                ApiError::NotFound(message) => ProbeError::NotFound(message),
                other => ProbeError::Transient(other.to_string()),
            })
    }

    /// Poll the parent until its state is in the spec's target set or
    /// `settled` accepts it. Returns `None` when the parent disappeared during
    /// a wait that allows it.
    async fn observe<R, F>(
        &self,
        cancel: &CancellationToken,
        operation: Operation,
        parent: ParentRef,
        spec: &WaitSpec,
        settled: F,
    ) -> Result<Option<Observed<R>>>
    where
        F: Fn(&ParentInfo) -> Option<R>,
    {
        let this = self;
        let settled = &settled;
        let result = wait_for(cancel, spec, move || async move {
            let info = match this.probe(parent).await {
                Ok(info) => info,
                Err(err) => return Err(err),
            };
            let error = info.error_attribute(&this.error_attribute);
            let (label, outcome) = if spec.failure.contains(&info.state) {
                (info.state.clone(), None)
            } else {
                match settled(&info) {
                    Some(outcome) => (SETTLED.to_string(), Some(outcome)),
                    None => (info.state.clone(), None),
                }
            };
            Ok(Probe::new(Observed { info, outcome }, label).with_error(error))
        })
        .await;

        match result {
            Ok(WaitOutcome::Reached(probe)) => Ok(Some(probe.value)),
            Ok(WaitOutcome::Gone) => Ok(None),
            Err(err) => Err(into_topology_error(operation, parent, err)),
        }
    }
}

fn concat(mut labels: Vec<String>, more: &[String]) -> Vec<String> {
    for label in more {
        if !labels.contains(label) {
            labels.push(label.clone());
        }
    }
    labels
}

fn into_topology_error<R>(
    operation: Operation,
    parent: ParentRef,
    err: WaitError<Observed<R>>,
) -> TopologyError {
    match err {
        WaitError::Failure { probe } => {
            tracing::warn!(parent = %parent, state = %probe.label, "{} failed", operation);
            TopologyError::Failure {
                operation,
                parent,
                state: probe.label,
                cause: probe.error,
            }
        }
        WaitError::NotFound(_) => TopologyError::NotFound { operation, parent },
        WaitError::Timeout {
            elapsed,
            last,
            last_error,
        } => {
            tracing::warn!(parent = %parent, "{} timed out after {:?}", operation, elapsed);
            let (state, cause, last) = match last {
                Some(probe) => (
                    Some(probe.value.info.state.clone()),
                    probe.error.or(last_error),
                    Some(Box::new(probe.value.info)),
                ),
                None => (None, last_error, None),
            };
            TopologyError::Timeout {
                operation,
                parent,
                elapsed,
                state,
                cause,
                last,
            }
        }
        WaitError::Cancelled => TopologyError::Cancelled { operation, parent },
    }
}
