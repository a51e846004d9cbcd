//! Diff-match engine
//!
//! The control plane does not return the id of a child it creates
//! asynchronously. The new child is found by diffing the parent's child list
//! before and after the mutation and matching the difference against the
//! request template.

use crate::model::{ChildObject, SubResourceKind};
use crate::template::AttributeTemplate;
use std::collections::HashSet;
use thiserror::Error;

/// Attribute a router reports a NIC's floating address under
pub const VROUTER_IP_KEY: &str = "VROUTER_IP";
pub const IP_KEY: &str = "IP";

/// Renderings of a parent's children captured before a mutation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    renderings: Vec<String>,
    ids: Vec<u64>,
}

impl Snapshot {
    pub fn capture(children: &[AttributeTemplate], kind: SubResourceKind) -> Self {
        Self {
            renderings: children.iter().map(AttributeTemplate::canonical).collect(),
            ids: children
                .iter()
                .filter_map(|c| c.get_u64(kind.id_key()))
                .collect(),
        }
    }

    pub fn renderings(&self) -> &[String] {
        &self.renderings
    }

    pub fn len(&self) -> usize {
        self.renderings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.renderings.is_empty()
    }
}

/// Expected transient condition; the next poll may resolve it
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Pending {
    #[error("no new {0} on the parent yet")]
    NoCandidate(SubResourceKind),

    #[error("new {kind} does not match the request yet (differs on {})", joined(.mismatched))]
    NoMatch {
        kind: SubResourceKind,
        mismatched: Vec<String>,
    },

    #[error("{kind} {id} not visible on the parent yet")]
    NotVisible { kind: SubResourceKind, id: u64 },
}

fn joined(keys: &[String]) -> String {
    keys.join(", ")
}

/// Identifies the child a mutation produced
pub trait Resolver: Send + Sync {
    fn resolve(&self, after: &[AttributeTemplate]) -> Result<ChildObject, Pending>;
}

/// Snapshot-based resolution for uncorrelated mutations
#[derive(Debug, Clone)]
pub struct DiffMatch {
    pub kind: SubResourceKind,
    pub before: Snapshot,
    pub request: AttributeTemplate,
}

impl Resolver for DiffMatch {
    fn resolve(&self, after: &[AttributeTemplate]) -> Result<ChildObject, Pending> {
        resolve_attached(&self.before, after, &self.request, self.kind)
    }
}

/// Resolution by an id the control plane returned with the mutation
#[derive(Debug, Clone)]
pub struct KnownId {
    pub kind: SubResourceKind,
    pub id: u64,
}

impl Resolver for KnownId {
    fn resolve(&self, after: &[AttributeTemplate]) -> Result<ChildObject, Pending> {
        after
            .iter()
            .find(|c| c.get_u64(self.kind.id_key()) == Some(self.id))
            .map(|c| ChildObject {
                kind: self.kind,
                id: self.id,
                template: c.clone(),
            })
            .ok_or(Pending::NotVisible {
                kind: self.kind,
                id: self.id,
            })
    }
}

/// Find the child that appeared between `before` and `after` and matches
/// `request`.
///
/// Candidates are tried in the order the parent lists them and the first full
/// match wins.
pub fn resolve_attached(
    before: &Snapshot,
    after: &[AttributeTemplate],
    request: &AttributeTemplate,
    kind: SubResourceKind,
) -> Result<ChildObject, Pending> {
    let previous: HashSet<&str> = before.renderings.iter().map(String::as_str).collect();
    let mut closest: Option<Vec<String>> = None;
    let mut saw_candidate = false;

    for child in after {
        if previous.contains(child.canonical().as_str()) {
            continue;
        }
        // a child rewritten in place keeps its id and is not new
        let Some(id) = child.get_u64(kind.id_key()) else {
            continue;
        };
        if before.ids.contains(&id) {
            continue;
        }
        saw_candidate = true;

        let candidate = normalize(child, request, kind);
        let mismatched = request.mismatched_keys(&candidate);
        if mismatched.is_empty() {
            return Ok(ChildObject {
                kind,
                id,
                template: candidate,
            });
        }
        if closest.as_ref().is_none_or(|c| mismatched.len() < c.len()) {
            closest = Some(mismatched.into_iter().map(str::to_string).collect());
        }
    }

    if !saw_candidate {
        return Err(Pending::NoCandidate(kind));
    }
    Err(Pending::NoMatch {
        kind,
        mismatched: closest.unwrap_or_default(),
    })
}

/// Router NICs report a requested `IP` as `VROUTER_IP`
fn normalize(
    child: &AttributeTemplate,
    request: &AttributeTemplate,
    kind: SubResourceKind,
) -> AttributeTemplate {
    let mut candidate = child.clone();
    if kind == SubResourceKind::RouterNic
        && request.contains_key(IP_KEY)
        && !candidate.contains_key(IP_KEY)
    {
        if let Some(ip) = child.get(VROUTER_IP_KEY) {
            candidate.insert(IP_KEY, ip);
        }
    }
    candidate
}

/// Whether a child with `child_id` is still listed
pub fn resolve_detached(
    current: &[AttributeTemplate],
    child_id: u64,
    kind: SubResourceKind,
) -> bool {
    current
        .iter()
        .any(|c| c.get_u64(kind.id_key()) == Some(child_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn disk(id: u64, image: u64) -> AttributeTemplate {
        AttributeTemplate::new()
            .with("DISK_ID", id)
            .with("IMAGE_ID", image)
    }

    #[test]
    fn test_new_disk_is_resolved() {
        let before = Snapshot::capture(&[disk(1, 5)], SubResourceKind::Disk);
        let after = vec![disk(1, 5), disk(2, 7).with("TARGET", "vdb")];
        let request = AttributeTemplate::new()
            .with("IMAGE_ID", 7)
            .with("TARGET", "vdb");

        let child = resolve_attached(&before, &after, &request, SubResourceKind::Disk).unwrap();
        assert_eq!(child.id, 2);
        assert!(request.is_satisfied_by(&child.template));
    }

    #[test]
    fn test_unchanged_list_is_pending() {
        let before = Snapshot::capture(&[disk(1, 5)], SubResourceKind::Disk);
        let request = AttributeTemplate::new().with("IMAGE_ID", 7);

        let pending =
            resolve_attached(&before, &[disk(1, 5)], &request, SubResourceKind::Disk).unwrap_err();
        assert_eq!(pending, Pending::NoCandidate(SubResourceKind::Disk));
    }

    #[test]
    fn test_identical_shape_is_disambiguated_by_snapshot() {
        // two disks from the same image; only the one absent before counts
        let before = Snapshot::capture(&[disk(1, 7)], SubResourceKind::Disk);
        let after = vec![disk(1, 7), disk(4, 7)];
        let request = AttributeTemplate::new().with("IMAGE_ID", 7);

        let child = resolve_attached(&before, &after, &request, SubResourceKind::Disk).unwrap();
        assert_eq!(child.id, 4);
    }

    #[test]
    fn test_rewritten_existing_child_is_not_new() {
        let before = Snapshot::capture(&[disk(1, 7)], SubResourceKind::Disk);
        let after = vec![disk(1, 7).with("SIZE", 2048)];
        let request = AttributeTemplate::new().with("IMAGE_ID", 7);

        let pending =
            resolve_attached(&before, &after, &request, SubResourceKind::Disk).unwrap_err();
        assert_eq!(pending, Pending::NoCandidate(SubResourceKind::Disk));
    }

    #[test]
    fn test_partial_materialization_is_pending() {
        let before = Snapshot::capture(&[], SubResourceKind::Disk);
        let after = vec![disk(0, 7)];
        let request = AttributeTemplate::new()
            .with("IMAGE_ID", 7)
            .with("TARGET", "vdb");

        match resolve_attached(&before, &after, &request, SubResourceKind::Disk) {
            Err(Pending::NoMatch { mismatched, .. }) => assert_eq!(mismatched, vec!["TARGET"]),
            other => panic!("expected NoMatch, got {:?}", other),
        }
    }

    #[test]
    fn test_selection_is_order_independent() {
        let before = Snapshot::capture(&[disk(0, 3)], SubResourceKind::Disk);
        let mut after = vec![
            disk(0, 3),
            disk(1, 5).with("TARGET", "vdb"),
            disk(2, 7).with("TARGET", "vdc"),
            disk(3, 9).with("TARGET", "vdd"),
        ];
        let request = AttributeTemplate::new()
            .with("IMAGE_ID", 7)
            .with("TARGET", "vdc");

        for rotation in 0..after.len() {
            after.rotate_left(1);
            let child =
                resolve_attached(&before, &after, &request, SubResourceKind::Disk).unwrap();
            assert_eq!(child.id, 2, "rotation {}", rotation);
        }
        after.reverse();
        let child = resolve_attached(&before, &after, &request, SubResourceKind::Disk).unwrap();
        assert_eq!(child.id, 2);
    }

    #[test]
    fn test_router_ip_is_aliased() {
        let before = Snapshot::capture(&[], SubResourceKind::RouterNic);
        let after = vec![
            AttributeTemplate::new()
                .with("NIC_ID", 0)
                .with("NETWORK_ID", 12)
                .with("VROUTER_IP", "10.0.0.254"),
        ];
        let request = AttributeTemplate::new()
            .with("NETWORK_ID", 12)
            .with("IP", "10.0.0.254");

        let child =
            resolve_attached(&before, &after, &request, SubResourceKind::RouterNic).unwrap();
        assert_eq!(child.id, 0);
        assert_eq!(child.template.get("IP"), Some("10.0.0.254"));

        // plain VM NICs get no alias
        assert!(resolve_attached(&before, &after, &request, SubResourceKind::Nic).is_err());
    }

    #[test]
    fn test_known_id_resolver() {
        let resolver = KnownId {
            kind: SubResourceKind::Disk,
            id: 2,
        };

        assert!(resolver.resolve(&[disk(1, 5)]).is_err());
        assert_eq!(resolver.resolve(&[disk(1, 5), disk(2, 7)]).unwrap().id, 2);
    }

    #[test]
    fn test_resolve_detached() {
        let current = vec![disk(1, 5)];
        assert!(resolve_detached(&current, 1, SubResourceKind::Disk));
        assert!(!resolve_detached(&current, 2, SubResourceKind::Disk));
    }
}
