//! OpenNebula control plane implementation

use crate::document::{parse_vm, parse_vnet, parse_vrouter, router_state};
use crate::error::{OneError, Result};
use crate::onecli::{OneCli, Tool, parse_flat};
use async_trait::async_trait;
use topoflow_cloud::{
    ApiError, ControlPlane, MutationReceipt, ParentInfo, ParentKind, ParentRef, SubResourceKind,
};
use topoflow_config::ControlPlaneConfig;

/// OpenNebula control plane driven through the CLI tools
pub struct OneControlPlane {
    cli: OneCli,
}

impl OneControlPlane {
    pub fn new(endpoint: Option<String>) -> Self {
        Self {
            cli: OneCli::new(endpoint),
        }
    }

    pub fn from_config(config: &ControlPlaneConfig) -> Self {
        Self::new(config.endpoint.clone())
    }

    /// Check that the CLI tools are installed
    pub async fn check_installed(&self) -> Result<()> {
        self.cli.check_installed().await
    }

    async fn read(&self, parent: ParentRef) -> Result<ParentInfo> {
        match parent.kind {
            ParentKind::VirtualMachine => parse_vm(&self.cli.show(Tool::Vm, parent.id).await?),
            ParentKind::VirtualNetwork => parse_vnet(&self.cli.show(Tool::Vnet, parent.id).await?),
            ParentKind::VirtualRouter => {
                let router = parse_vrouter(&self.cli.show(Tool::VRouter, parent.id).await?)?;
                let mut labels = Vec::with_capacity(router.vm_ids.len());
                for vm_id in &router.vm_ids {
                    let json = self
                        .cli
                        .show(Tool::Vm, *vm_id)
                        .await
                        .map_err(|err| instance_error(parent.id, *vm_id, err))?;
                    labels.push(parse_vm(&json)?.state);
                }
                let mut info = router.info;
                info.state = router_state(&labels);
                Ok(info)
            }
        }
    }

    /// Tool and subcommand for a mutation of `kind` on `parent`
    fn command(parent: ParentRef, kind: SubResourceKind, attach: bool) -> Result<(Tool, &'static str)> {
        let command = match (parent.kind, kind, attach) {
            (ParentKind::VirtualMachine, SubResourceKind::Disk, true) => (Tool::Vm, "disk-attach"),
            (ParentKind::VirtualMachine, SubResourceKind::Disk, false) => (Tool::Vm, "disk-detach"),
            (ParentKind::VirtualMachine, SubResourceKind::Nic, true) => (Tool::Vm, "nic-attach"),
            (ParentKind::VirtualMachine, SubResourceKind::Nic, false) => (Tool::Vm, "nic-detach"),
            (ParentKind::VirtualNetwork, SubResourceKind::AddressRange, true) => {
                (Tool::Vnet, "addar")
            }
            (ParentKind::VirtualNetwork, SubResourceKind::AddressRange, false) => {
                (Tool::Vnet, "rmar")
            }
            (ParentKind::VirtualRouter, SubResourceKind::RouterNic, true) => {
                (Tool::VRouter, "nic-attach")
            }
            (ParentKind::VirtualRouter, SubResourceKind::RouterNic, false) => {
                (Tool::VRouter, "nic-detach")
            }
            _ => {
                return Err(OneError::InvalidTemplate(format!(
                    "{} has no {} children",
                    parent, kind
                )));
            }
        };
        Ok(command)
    }
}

/// Error for a failed read of one router instance VM
fn instance_error(router: u64, vm: u64, err: OneError) -> OneError {
    match err {
        OneError::NotFound(_) => OneError::InstanceMissing { router, vm },
        other => other,
    }
}

#[async_trait]
impl ControlPlane for OneControlPlane {
    async fn parent_info(&self, parent: ParentRef) -> std::result::Result<ParentInfo, ApiError> {
        self.read(parent).await.map_err(OneError::into_read_error)
    }

    async fn attach(
        &self,
        parent: ParentRef,
        kind: SubResourceKind,
        template: &str,
    ) -> std::result::Result<MutationReceipt, ApiError> {
        let (tool, subcommand) =
            Self::command(parent, kind, true).map_err(OneError::into_mutation_error)?;
        tracing::info!(parent = %parent, "{} {} {}", tool.binary(), subcommand, parent.id);
        self.cli
            .attach(tool, subcommand, parent.id, template)
            .await
            .map_err(OneError::into_mutation_error)?;
        // the CLI does not report the id of the new child
        Ok(MutationReceipt::uncorrelated())
    }

    async fn detach(
        &self,
        parent: ParentRef,
        kind: SubResourceKind,
        child_id: u64,
    ) -> std::result::Result<(), ApiError> {
        let (tool, subcommand) =
            Self::command(parent, kind, false).map_err(OneError::into_mutation_error)?;
        tracing::info!(parent = %parent, "{} {} {} {}", tool.binary(), subcommand, parent.id, child_id);
        self.cli
            .detach(tool, subcommand, parent.id, child_id)
            .await
            .map_err(OneError::into_mutation_error)
    }

    async fn resize_disk(
        &self,
        vm: ParentRef,
        disk_id: u64,
        size: u64,
    ) -> std::result::Result<(), ApiError> {
        self.cli
            .disk_resize(vm.id, disk_id, size)
            .await
            .map_err(OneError::into_mutation_error)
    }

    async fn resize(&self, vm: ParentRef, template: &str) -> std::result::Result<(), ApiError> {
        let capacity = parse_flat(template).map_err(OneError::into_mutation_error)?;
        self.cli
            .resize(vm.id, &capacity)
            .await
            .map_err(OneError::into_mutation_error)
    }
}
