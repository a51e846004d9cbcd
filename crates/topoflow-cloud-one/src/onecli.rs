//! OpenNebula CLI wrapper
//!
//! Wraps the `onevm`, `onevnet` and `onevrouter` commands. Reads use `--json`;
//! templates for attach commands are passed through a temporary file.

use crate::error::{OneError, Result};
use std::io::Write;
use std::process::Stdio;
use tokio::process::Command;

/// Command-line tool for one object class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    Vm,
    Vnet,
    VRouter,
}

impl Tool {
    pub fn binary(self) -> &'static str {
        match self {
            Tool::Vm => "onevm",
            Tool::Vnet => "onevnet",
            Tool::VRouter => "onevrouter",
        }
    }
}

/// OpenNebula CLI wrapper
#[derive(Debug, Clone, Default)]
pub struct OneCli {
    endpoint: Option<String>,
}

impl OneCli {
    pub fn new(endpoint: Option<String>) -> Self {
        Self { endpoint }
    }

    /// Check that the CLI tools are installed
    pub async fn check_installed(&self) -> Result<()> {
        for tool in [Tool::Vm, Tool::Vnet, Tool::VRouter] {
            let which = Command::new("which").arg(tool.binary()).output().await?;
            if !which.status.success() {
                return Err(OneError::CliNotFound(tool.binary().to_string()));
            }
        }
        Ok(())
    }

    /// Run a command and return stdout
    async fn run_command(&self, tool: Tool, args: &[&str]) -> Result<String> {
        let mut cmd = Command::new(tool.binary());
        cmd.args(args);
        if let Some(endpoint) = &self.endpoint {
            cmd.arg("--endpoint").arg(endpoint);
        }
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        let command = format!("{} {}", tool.binary(), args.join(" "));
        tracing::debug!("Running: {}", command);

        let output = cmd.output().await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            if is_not_found(&stderr) {
                return Err(OneError::NotFound(stderr));
            }
            return Err(OneError::CommandFailed { command, stderr });
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// Run a command that takes a template file as its last argument
    async fn run_with_template(&self, tool: Tool, args: &[&str], template: &str) -> Result<String> {
        let mut file = tempfile::Builder::new()
            .prefix("topoflow-")
            .suffix(".tmpl")
            .tempfile()?;
        file.write_all(template.as_bytes())?;
        file.flush()?;

        let path = file.path().to_string_lossy().to_string();
        let mut full: Vec<&str> = args.to_vec();
        full.push("--file");
        full.push(path.as_str());

        // the file is removed when `file` drops after the command ran
        self.run_command(tool, &full).await
    }

    /// Read an object as JSON
    pub async fn show(&self, tool: Tool, id: u64) -> Result<String> {
        let id = id.to_string();
        self.run_command(tool, &["show", id.as_str(), "--json"]).await
    }

    /// Attach a child described by `template`: a disk or NIC to a VM, an
    /// address range to a network, or a NIC to a virtual router
    pub async fn attach(&self, tool: Tool, subcommand: &str, id: u64, template: &str) -> Result<String> {
        let id = id.to_string();
        self.run_with_template(tool, &[subcommand, id.as_str()], template)
            .await
    }

    /// Detach or release a child by id
    pub async fn detach(&self, tool: Tool, subcommand: &str, id: u64, child_id: u64) -> Result<()> {
        let id = id.to_string();
        let child_id = child_id.to_string();
        self.run_command(tool, &[subcommand, id.as_str(), child_id.as_str()])
            .await?;
        Ok(())
    }

    /// Grow a VM disk to `size` MB
    pub async fn disk_resize(&self, vm_id: u64, disk_id: u64, size: u64) -> Result<()> {
        let id = vm_id.to_string();
        let disk_id = disk_id.to_string();
        let size = size.to_string();
        self.run_command(
            Tool::Vm,
            &["disk-resize", id.as_str(), disk_id.as_str(), size.as_str()],
        )
        .await?;
        Ok(())
    }

    /// Change VM capacity
    pub async fn resize(&self, vm_id: u64, capacity: &[(String, String)]) -> Result<()> {
        let id = vm_id.to_string();
        let mut args = vec!["resize", id.as_str()];
        for (key, value) in capacity {
            let flag = match key.as_str() {
                "CPU" => "--cpu",
                "VCPU" => "--vcpu",
                "MEMORY" => "--memory",
                other => {
                    return Err(OneError::InvalidTemplate(format!(
                        "{} cannot be resized",
                        other
                    )));
                }
            };
            args.push(flag);
            args.push(value.as_str());
        }
        self.run_command(Tool::Vm, &args).await?;
        Ok(())
    }
}

/// Messages the CLI prints for a missing object
fn is_not_found(stderr: &str) -> bool {
    stderr.contains("Error getting") || stderr.contains("does not exist") || stderr.contains("not found")
}

/// Parse top-level `KEY="VALUE"` lines
pub fn parse_flat(template: &str) -> Result<Vec<(String, String)>> {
    template
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            let (key, value) = line
                .split_once('=')
                .ok_or_else(|| OneError::InvalidTemplate(line.to_string()))?;
            let value = value
                .trim()
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .ok_or_else(|| OneError::InvalidTemplate(line.to_string()))?;
            Ok((key.trim().to_string(), value.replace("\\\"", "\"").replace("\\\\", "\\")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_detection() {
        assert!(is_not_found("[one.vm.info] Error getting virtual machine [42]."));
        assert!(!is_not_found("[one.vm.attach] Cannot attach disk: VM is in wrong state"));
    }

    #[test]
    fn test_parse_flat() {
        let parsed = parse_flat("MEMORY=\"2048\"\nVCPU=\"2\"\n").unwrap();
        assert_eq!(
            parsed,
            vec![
                ("MEMORY".to_string(), "2048".to_string()),
                ("VCPU".to_string(), "2".to_string()),
            ]
        );

        assert!(parse_flat("MEMORY 2048").is_err());
        assert!(parse_flat("MEMORY=2048").is_err());
    }
}
