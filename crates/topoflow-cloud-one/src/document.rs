//! JSON documents returned by `show --json`
//!
//! OpenNebula renders every scalar as a string and collapses one-element
//! vectors into a plain object, so child lists are normalized here.

use crate::error::{OneError, Result};
use serde::Deserialize;
use serde_json::{Map, Value};
use topoflow_cloud::state::{VM_FAILURE, VROUTER_NIC_DELETION_READY};
use topoflow_cloud::{
    AttributeTemplate, LcmState, ParentInfo, ParentRef, SubResourceKind, VmState, VnetState,
    vm_state_label,
};

const CAPACITY_KEYS: &[&str] = &["CPU", "VCPU", "MEMORY"];

#[derive(Debug, Deserialize)]
struct VmDocument {
    #[serde(rename = "VM")]
    vm: VmBody,
}

#[derive(Debug, Deserialize)]
struct VmBody {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "STATE")]
    state: String,
    #[serde(rename = "LCM_STATE")]
    lcm_state: String,
    #[serde(rename = "TEMPLATE", default)]
    template: Map<String, Value>,
    #[serde(rename = "USER_TEMPLATE", default)]
    user_template: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct VnetDocument {
    #[serde(rename = "VNET")]
    vnet: VnetBody,
}

#[derive(Debug, Deserialize)]
struct VnetBody {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "STATE")]
    state: String,
    #[serde(rename = "AR_POOL", default)]
    ar_pool: Map<String, Value>,
    #[serde(rename = "TEMPLATE", default)]
    template: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct VRouterDocument {
    #[serde(rename = "VROUTER")]
    vrouter: VRouterBody,
}

#[derive(Debug, Deserialize)]
struct VRouterBody {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "VMS", default)]
    vms: Map<String, Value>,
    #[serde(rename = "TEMPLATE", default)]
    template: Map<String, Value>,
}

/// A virtual router and the VM instances that carry its state
#[derive(Debug, Clone)]
pub struct RouterInfo {
    pub info: ParentInfo,
    pub vm_ids: Vec<u64>,
}

fn parse_id(field: &str, value: &str) -> Result<u64> {
    value
        .trim()
        .parse()
        .map_err(|_| OneError::InvalidDocument(format!("{} is not an id: {:?}", field, value)))
}

fn parse_code(field: &'static str, value: &str) -> Result<i32> {
    value
        .trim()
        .parse()
        .map_err(|_| OneError::InvalidDocument(format!("{} is not a number: {:?}", field, value)))
}

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Scalar attributes of an object; nested vectors are skipped
fn attributes(object: &Map<String, Value>) -> AttributeTemplate {
    object
        .iter()
        .filter_map(|(k, v)| scalar(v).map(|v| (k.clone(), v)))
        .collect()
}

/// A vector attribute that may be absent, one object, or an array of objects
fn one_or_many(value: Option<&Value>) -> Vec<AttributeTemplate> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_object)
            .map(attributes)
            .collect(),
        Some(Value::Object(object)) => vec![attributes(object)],
        _ => Vec::new(),
    }
}

fn capacity(template: &Map<String, Value>) -> AttributeTemplate {
    CAPACITY_KEYS
        .iter()
        .filter_map(|key| template.get(*key).and_then(scalar).map(|v| (*key, v)))
        .collect()
}

/// Label of a VM from its numeric STATE and LCM_STATE.
///
/// Codes missing from the state tables become `STATE_<code>` or
/// `LCM_<code>`, so waits keep polling and report what the VM is in.
pub fn vm_label(state: &str, lcm_state: &str) -> Result<String> {
    let code = parse_code("STATE", state)?;
    let Some(state) = VmState::from_code(code) else {
        return Ok(format!("STATE_{}", code));
    };
    let code = parse_code("LCM_STATE", lcm_state)?;
    match LcmState::from_code(code) {
        Some(lcm) => Ok(vm_state_label(state, lcm).to_string()),
        None if state == VmState::Active => Ok(format!("LCM_{}", code)),
        None => Ok(state.label().to_string()),
    }
}

/// Decode `onevm show --json`
pub fn parse_vm(json: &str) -> Result<ParentInfo> {
    let doc: VmDocument = serde_json::from_str(json)?;
    let vm = doc.vm;

    let mut info = ParentInfo::new(
        ParentRef::vm(parse_id("ID", &vm.id)?),
        vm_label(&vm.state, &vm.lcm_state)?,
    )
    .with_children(SubResourceKind::Disk, one_or_many(vm.template.get("DISK")))
    .with_children(SubResourceKind::Nic, one_or_many(vm.template.get("NIC")));
    info.user_template = attributes(&vm.user_template);
    info.capacity = capacity(&vm.template);
    Ok(info)
}

/// Decode `onevnet show --json`
pub fn parse_vnet(json: &str) -> Result<ParentInfo> {
    let doc: VnetDocument = serde_json::from_str(json)?;
    let vnet = doc.vnet;

    let code = parse_code("STATE", &vnet.state)?;
    let state = VnetState::from_code(code).ok_or(OneError::UnknownState {
        field: "STATE",
        code,
    })?;

    let mut info = ParentInfo::new(ParentRef::vnet(parse_id("ID", &vnet.id)?), state.label())
        .with_children(
            SubResourceKind::AddressRange,
            one_or_many(vnet.ar_pool.get("AR")),
        );
    info.user_template = attributes(&vnet.template);
    Ok(info)
}

/// Decode `onevrouter show --json`.
///
/// The returned state is a placeholder until [`router_state`] has been
/// applied to the labels of the router's VMs.
pub fn parse_vrouter(json: &str) -> Result<RouterInfo> {
    let doc: VRouterDocument = serde_json::from_str(json)?;
    let vrouter = doc.vrouter;

    let vm_ids = match vrouter.vms.get("ID") {
        Some(Value::Array(ids)) => ids
            .iter()
            .filter_map(scalar)
            .map(|id| parse_id("VMS.ID", &id))
            .collect::<Result<Vec<_>>>()?,
        Some(value) => match scalar(value) {
            Some(id) => vec![parse_id("VMS.ID", &id)?],
            None => Vec::new(),
        },
        None => Vec::new(),
    };

    let mut info = ParentInfo::new(
        ParentRef::vrouter(parse_id("ID", &vrouter.id)?),
        VmState::Init.label(),
    )
    .with_children(
        SubResourceKind::RouterNic,
        one_or_many(vrouter.template.get("NIC")),
    );
    info.user_template = attributes(&vrouter.template);
    Ok(RouterInfo { info, vm_ids })
}

/// State of a virtual router from the labels of its VM instances.
///
/// A failed instance fails the router; otherwise the first instance that is
/// not ready decides. A router without instances has nothing to wait for.
pub fn router_state(labels: &[String]) -> String {
    let failure = VM_FAILURE.to_strings();
    if let Some(label) = labels.iter().find(|l| failure.contains(*l)) {
        return label.clone();
    }
    let ready = VROUTER_NIC_DELETION_READY.to_strings();
    labels
        .iter()
        .find(|l| !ready.contains(*l))
        .or_else(|| labels.first())
        .cloned()
        .unwrap_or_else(|| LcmState::Running.label().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vm_label() {
        assert_eq!(vm_label("3", "17").unwrap(), "HOTPLUG");
        assert_eq!(vm_label("8", "0").unwrap(), "POWEROFF");
        // LCM state is ignored outside ACTIVE
        assert_eq!(vm_label("8", "3").unwrap(), "POWEROFF");
        assert!(vm_label("x", "0").is_err());
    }

    #[test]
    fn test_unlisted_codes_get_numbered_labels() {
        assert_eq!(vm_label("3", "58").unwrap(), "LCM_58");
        assert_eq!(vm_label("3", "71").unwrap(), "LCM_71");
        assert_eq!(vm_label("12", "0").unwrap(), "STATE_12");
        assert_eq!(vm_label("8", "71").unwrap(), "POWEROFF");
    }

    #[test]
    fn test_one_or_many() {
        let single: Value = serde_json::json!({"DISK_ID": "0", "SIZE": 1024});
        let many: Value = serde_json::json!([{"DISK_ID": "0"}, {"DISK_ID": "1"}]);

        let disks = one_or_many(Some(&single));
        assert_eq!(disks.len(), 1);
        assert_eq!(disks[0].get("SIZE"), Some("1024"));
        assert_eq!(one_or_many(Some(&many)).len(), 2);
        assert!(one_or_many(None).is_empty());
    }

    #[test]
    fn test_router_state() {
        assert_eq!(router_state(&[]), "RUNNING");
        assert_eq!(
            router_state(&["RUNNING".to_string(), "HOTPLUG_NIC".to_string()]),
            "HOTPLUG_NIC"
        );
        assert_eq!(
            router_state(&["HOTPLUG_NIC".to_string(), "BOOT_FAILURE".to_string()]),
            "BOOT_FAILURE"
        );
        assert_eq!(
            router_state(&["UNDEPLOYED".to_string(), "RUNNING".to_string()]),
            "UNDEPLOYED"
        );
    }
}
