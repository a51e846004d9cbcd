#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use topoflow_cloud::{
    ApiError, AttributeTemplate, ControlPlane, MutationReceipt, ParentInfo, ParentRef,
    PollSettings, SubResourceKind,
};

/// 30s timeout with a 10s delay gives probes at 0s, 10s, 20s and 30s
pub fn settings() -> PollSettings {
    PollSettings {
        delay: Duration::from_secs(10),
        min_delay: Duration::from_secs(3),
        default_timeout: Duration::from_secs(30),
    }
}

pub fn disk(id: u64, image: u64) -> AttributeTemplate {
    AttributeTemplate::new()
        .with("DISK_ID", id)
        .with("IMAGE_ID", image)
}

pub fn nic(id: u64, network: u64) -> AttributeTemplate {
    AttributeTemplate::new()
        .with("NIC_ID", id)
        .with("NETWORK_ID", network)
}

/// How the fake applies an accepted mutation
#[derive(Debug, Clone)]
pub struct Behavior {
    /// Time until the effect is visible
    pub apply_after: Duration,
    /// State while the mutation is applied
    pub busy_state: Option<String>,
    /// Never apply the mutation
    pub never_apply: bool,
    /// Reject the mutation call
    pub reject: Option<ApiError>,
    /// Return the new child id with the receipt
    pub correlate: bool,
    /// Enter this state with this error text instead of applying
    pub fail_with: Option<(String, String)>,
    /// Show the child without these keys for half of `apply_after`
    pub partial_without: Vec<String>,
    /// Attributes the control plane fills in on new children
    pub extra: AttributeTemplate,
    /// Report these request keys under another name, e.g. `IP` as `VROUTER_IP`
    pub renamed: Vec<(String, String)>,
    /// Report the detached child as already missing
    pub detach_not_found: bool,
    /// Mutation calls never return
    pub hang: bool,
}

impl Default for Behavior {
    fn default() -> Self {
        Self {
            apply_after: Duration::from_secs(15),
            busy_state: None,
            never_apply: false,
            reject: None,
            correlate: false,
            fail_with: None,
            partial_without: Vec::new(),
            extra: AttributeTemplate::new(),
            renamed: Vec::new(),
            detach_not_found: false,
            hang: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallKind {
    Read,
    Attach(SubResourceKind),
    Detach(SubResourceKind, u64),
    ResizeDisk(u64, u64),
    Resize,
}

#[derive(Debug, Clone)]
pub struct Call {
    pub parent: ParentRef,
    pub kind: CallKind,
    pub at: Instant,
}

#[derive(Debug)]
enum Change {
    Put(SubResourceKind, AttributeTemplate),
    Remove(SubResourceKind, u64),
    State(String),
    Error(String),
    Capacity(AttributeTemplate),
    Delete,
}

struct FakeParent {
    info: ParentInfo,
    scheduled: Vec<(Instant, Change)>,
    next_child_id: u64,
    read_errors: u32,
    gone: bool,
}

#[derive(Default)]
struct Inner {
    parents: HashMap<ParentRef, FakeParent>,
    behavior: Behavior,
    calls: Vec<Call>,
}

/// Scripted in-memory control plane.
///
/// Mutations are accepted at once and applied on a timer, so tests run under
/// paused time see the same eventual consistency a real control plane has.
#[derive(Default)]
pub struct FakePlane {
    inner: Mutex<Inner>,
}

impl FakePlane {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_behavior(behavior: Behavior) -> Self {
        let plane = Self::default();
        plane.inner.lock().unwrap().behavior = behavior;
        plane
    }

    pub fn set_behavior(&self, behavior: Behavior) {
        self.inner.lock().unwrap().behavior = behavior;
    }

    pub fn insert(&self, info: ParentInfo) {
        let next_child_id = info
            .children
            .iter()
            .flat_map(|(kind, children)| children.iter().filter_map(|c| c.get_u64(kind.id_key())))
            .max()
            .map_or(0, |id| id + 1);
        let parent = info.parent;
        self.inner.lock().unwrap().parents.insert(
            parent,
            FakeParent {
                info,
                scheduled: Vec::new(),
                next_child_id,
                read_errors: 0,
                gone: false,
            },
        );
    }

    /// Fail the next `count` reads of `parent` with a transport error
    pub fn fail_reads(&self, parent: ParentRef, count: u32) {
        if let Some(p) = self.inner.lock().unwrap().parents.get_mut(&parent) {
            p.read_errors = count;
        }
    }

    pub fn set_state(&self, parent: ParentRef, state: &str) {
        if let Some(p) = self.inner.lock().unwrap().parents.get_mut(&parent) {
            p.info.state = state.to_string();
        }
    }

    /// Change the state of `parent` once `after` has passed
    pub fn schedule_state(&self, parent: ParentRef, state: &str, after: Duration) {
        self.schedule(parent, after, Change::State(state.to_string()));
    }

    /// Remove `parent` once `after` has passed
    pub fn schedule_delete(&self, parent: ParentRef, after: Duration) {
        self.schedule(parent, after, Change::Delete);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.inner.lock().unwrap().calls.clone()
    }

    /// Mutation calls, reads excluded
    pub fn mutations(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| c.kind != CallKind::Read)
            .collect()
    }

    pub fn snapshot(&self, parent: ParentRef) -> Option<ParentInfo> {
        let mut inner = self.inner.lock().unwrap();
        let p = inner.parents.get_mut(&parent)?;
        p.apply_due(Instant::now());
        (!p.gone).then(|| p.info.clone())
    }

    fn schedule(&self, parent: ParentRef, after: Duration, change: Change) {
        if let Some(p) = self.inner.lock().unwrap().parents.get_mut(&parent) {
            p.scheduled.push((Instant::now() + after, change));
        }
    }

    fn record(inner: &mut Inner, parent: ParentRef, kind: CallKind) {
        inner.calls.push(Call {
            parent,
            kind,
            at: Instant::now(),
        });
    }

    /// Record a call that is never going to return
    fn hangs(&self, parent: ParentRef, kind: CallKind) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if !inner.behavior.hang {
            return false;
        }
        FakePlane::record(&mut inner, parent, kind);
        true
    }

    /// Schedule the common part of every accepted mutation
    fn begin(p: &mut FakeParent, behavior: &Behavior, now: Instant) -> Option<Instant> {
        let at = now + behavior.apply_after;
        if let Some((state, error)) = &behavior.fail_with {
            p.scheduled.push((at, Change::State(state.clone())));
            p.scheduled.push((at, Change::Error(error.clone())));
            return None;
        }
        if behavior.never_apply {
            return None;
        }
        if let Some(busy) = &behavior.busy_state {
            let settled = p.info.state.clone();
            p.info.state = busy.clone();
            p.scheduled.push((at, Change::State(settled)));
        }
        Some(at)
    }
}

impl FakeParent {
    fn apply_due(&mut self, now: Instant) {
        let (due, later): (Vec<_>, Vec<_>) =
            self.scheduled.drain(..).partition(|(at, _)| *at <= now);
        self.scheduled = later;
        for (_, change) in due {
            match change {
                Change::Put(kind, child) => {
                    let id = child.get_u64(kind.id_key());
                    let children = self.info.children.entry(kind).or_default();
                    match children.iter_mut().find(|c| c.get_u64(kind.id_key()) == id) {
                        Some(existing) => *existing = child,
                        None => children.push(child),
                    }
                }
                Change::Remove(kind, id) => {
                    if let Some(children) = self.info.children.get_mut(&kind) {
                        children.retain(|c| c.get_u64(kind.id_key()) != Some(id));
                    }
                }
                Change::State(state) => self.info.state = state,
                Change::Error(error) => self.info.user_template.insert("ERROR", error),
                Change::Capacity(capacity) => {
                    for (key, value) in capacity.iter() {
                        self.info.capacity.insert(key, value);
                    }
                }
                Change::Delete => self.gone = true,
            }
        }
    }
}

#[async_trait]
impl ControlPlane for FakePlane {
    async fn parent_info(&self, parent: ParentRef) -> Result<ParentInfo, ApiError> {
        let mut inner = self.inner.lock().unwrap();
        FakePlane::record(&mut inner, parent, CallKind::Read);
        let p = inner
            .parents
            .get_mut(&parent)
            .ok_or_else(|| ApiError::NotFound(parent.to_string()))?;
        p.apply_due(Instant::now());
        if p.read_errors > 0 {
            p.read_errors -= 1;
            return Err(ApiError::Transport("connection reset by peer".to_string()));
        }
        if p.gone {
            return Err(ApiError::NotFound(parent.to_string()));
        }
        Ok(p.info.clone())
    }

    async fn attach(
        &self,
        parent: ParentRef,
        kind: SubResourceKind,
        template: &str,
    ) -> Result<MutationReceipt, ApiError> {
        if self.hangs(parent, CallKind::Attach(kind)) {
            return std::future::pending().await;
        }
        let mut inner = self.inner.lock().unwrap();
        FakePlane::record(&mut inner, parent, CallKind::Attach(kind));
        let behavior = inner.behavior.clone();
        if let Some(err) = behavior.reject.clone() {
            return Err(err);
        }
        let request = parse_vector(kind.vector_name(), template)
            .ok_or_else(|| ApiError::Rejected(format!("syntax error in {}", template)))?;

        let now = Instant::now();
        let p = inner
            .parents
            .get_mut(&parent)
            .ok_or_else(|| ApiError::NotFound(parent.to_string()))?;
        let id = p.next_child_id;
        p.next_child_id += 1;

        let mut child = request.with(kind.id_key(), id);
        for (key, value) in behavior.extra.iter() {
            child.insert(key, value);
        }
        for (from, to) in &behavior.renamed {
            if let Some(value) = child.remove(from) {
                child.insert(to.as_str(), value);
            }
        }

        if let Some(at) = FakePlane::begin(p, &behavior, now) {
            if !behavior.partial_without.is_empty() {
                let mut partial = child.clone();
                for key in &behavior.partial_without {
                    partial.remove(key);
                }
                p.scheduled
                    .push((now + behavior.apply_after / 2, Change::Put(kind, partial)));
            }
            p.scheduled.push((at, Change::Put(kind, child)));
        }

        Ok(if behavior.correlate {
            MutationReceipt::correlated(id)
        } else {
            MutationReceipt::uncorrelated()
        })
    }

    async fn detach(
        &self,
        parent: ParentRef,
        kind: SubResourceKind,
        child_id: u64,
    ) -> Result<(), ApiError> {
        if self.hangs(parent, CallKind::Detach(kind, child_id)) {
            return std::future::pending().await;
        }
        let mut inner = self.inner.lock().unwrap();
        FakePlane::record(&mut inner, parent, CallKind::Detach(kind, child_id));
        let behavior = inner.behavior.clone();
        if let Some(err) = behavior.reject.clone() {
            return Err(err);
        }
        let now = Instant::now();
        let p = inner
            .parents
            .get_mut(&parent)
            .ok_or_else(|| ApiError::NotFound(parent.to_string()))?;
        if behavior.detach_not_found {
            p.scheduled.push((now, Change::Remove(kind, child_id)));
            return Err(ApiError::NotFound(format!("{} {}", kind, child_id)));
        }
        if let Some(at) = FakePlane::begin(p, &behavior, now) {
            p.scheduled.push((at, Change::Remove(kind, child_id)));
        }
        Ok(())
    }

    async fn resize_disk(&self, vm: ParentRef, disk_id: u64, size: u64) -> Result<(), ApiError> {
        let mut inner = self.inner.lock().unwrap();
        FakePlane::record(&mut inner, vm, CallKind::ResizeDisk(disk_id, size));
        let behavior = inner.behavior.clone();
        if let Some(err) = behavior.reject.clone() {
            return Err(err);
        }
        let now = Instant::now();
        let p = inner
            .parents
            .get_mut(&vm)
            .ok_or_else(|| ApiError::NotFound(vm.to_string()))?;
        let current = p
            .info
            .child(SubResourceKind::Disk, disk_id)
            .cloned()
            .ok_or_else(|| ApiError::Rejected(format!("disk {} not found", disk_id)))?;
        if let Some(at) = FakePlane::begin(p, &behavior, now) {
            p.scheduled.push((
                at,
                Change::Put(SubResourceKind::Disk, current.with("SIZE", size)),
            ));
        }
        Ok(())
    }

    async fn resize(&self, vm: ParentRef, template: &str) -> Result<(), ApiError> {
        let mut inner = self.inner.lock().unwrap();
        FakePlane::record(&mut inner, vm, CallKind::Resize);
        let behavior = inner.behavior.clone();
        if let Some(err) = behavior.reject.clone() {
            return Err(err);
        }
        let capacity = parse_pairs(template)
            .ok_or_else(|| ApiError::Rejected(format!("syntax error in {}", template)))?;
        let now = Instant::now();
        let p = inner
            .parents
            .get_mut(&vm)
            .ok_or_else(|| ApiError::NotFound(vm.to_string()))?;
        if let Some(at) = FakePlane::begin(p, &behavior, now) {
            p.scheduled.push((at, Change::Capacity(capacity)));
        }
        Ok(())
    }
}

/// Parse `NAME=[K="V",...]`
pub fn parse_vector(name: &str, rendered: &str) -> Option<AttributeTemplate> {
    let body = rendered
        .strip_prefix(name)?
        .strip_prefix("=[")?
        .strip_suffix(']')?;
    parse_pairs(body)
}

/// Parse `K="V"` pairs separated by commas or newlines
pub fn parse_pairs(input: &str) -> Option<AttributeTemplate> {
    let mut template = AttributeTemplate::new();
    let mut chars = input.chars().peekable();
    loop {
        while matches!(chars.peek(), Some(',') | Some('\n') | Some(' ')) {
            chars.next();
        }
        if chars.peek().is_none() {
            return Some(template);
        }
        let key: String = chars.by_ref().take_while(|c| *c != '=').collect();
        if chars.next()? != '"' {
            return None;
        }
        let mut value = String::new();
        loop {
            match chars.next()? {
                '\\' => value.push(chars.next()?),
                '"' => break,
                c => value.push(c),
            }
        }
        template.insert(key.trim(), value);
    }
}
