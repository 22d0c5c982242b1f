//! Predefined remote pre-shutdown actions.
//!
//! Each action expands to a short POSIX shell one-liner executed over
//! SSH on the target host. Raw command strings are the escape hatch
//! for anything not covered here.

use crate::error::ActionError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PredefinedAction {
    /// Stop all running containers (Podman preferred, Docker fallback).
    StopContainers,
    /// Gracefully shut down all running libvirt domains.
    StopVms,
    /// Gracefully shut down all running Proxmox VMs.
    StopProxmoxVms,
    /// Gracefully shut down all running Proxmox containers.
    StopProxmoxCts,
    /// Gracefully shut down all running XCP-ng VMs.
    StopXcpngVms,
    /// Gracefully shut down all running ESXi VMs.
    StopEsxiVms,
    /// Stop one compose project.
    StopCompose { path: String },
    /// Flush filesystem buffers.
    Sync,
}

impl PredefinedAction {
    /// Resolve a configuration entry. `path` is required by
    /// `stop_compose` and rejected silently elsewhere.
    pub fn from_name(name: &str, path: Option<&str>) -> Result<Self, ActionError> {
        match name {
            "stop_containers" => Ok(Self::StopContainers),
            "stop_vms" => Ok(Self::StopVms),
            "stop_proxmox_vms" => Ok(Self::StopProxmoxVms),
            "stop_proxmox_cts" => Ok(Self::StopProxmoxCts),
            "stop_xcpng_vms" => Ok(Self::StopXcpngVms),
            "stop_esxi_vms" => Ok(Self::StopEsxiVms),
            "stop_compose" => match path {
                Some(path) => Ok(Self::StopCompose {
                    path: path.to_string(),
                }),
                None => Err(ActionError::MissingPath("stop_compose")),
            },
            "sync" => Ok(Self::Sync),
            other => Err(ActionError::UnknownAction(other.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::StopContainers => "stop_containers",
            Self::StopVms => "stop_vms",
            Self::StopProxmoxVms => "stop_proxmox_vms",
            Self::StopProxmoxCts => "stop_proxmox_cts",
            Self::StopXcpngVms => "stop_xcpng_vms",
            Self::StopEsxiVms => "stop_esxi_vms",
            Self::StopCompose { .. } => "stop_compose",
            Self::Sync => "sync",
        }
    }

    /// The shell command line executed on the remote host.
    pub fn script(&self) -> String {
        match self {
            Self::StopContainers => concat!(
                "if command -v podman >/dev/null 2>&1; ",
                "then podman ps -q | xargs -r podman stop; ",
                "elif command -v docker >/dev/null 2>&1; ",
                "then docker ps -q | xargs -r docker stop; fi"
            )
            .to_string(),
            Self::StopVms => {
                "virsh list --state-running --name | xargs -r -n1 virsh shutdown".to_string()
            }
            Self::StopProxmoxVms => {
                "qm list | awk '$3 == \"running\" {print $1}' | xargs -r -n1 qm shutdown"
                    .to_string()
            }
            Self::StopProxmoxCts => {
                "pct list | awk '$2 == \"running\" {print $1}' | xargs -r -n1 pct shutdown"
                    .to_string()
            }
            Self::StopXcpngVms => "xe vm-shutdown power-state=running --multiple".to_string(),
            Self::StopEsxiVms => concat!(
                "vim-cmd vmsvc/getallvms | awk 'NR>1 {print $1}' | ",
                "while read -r id; do vim-cmd vmsvc/power.shutdown \"$id\"; done"
            )
            .to_string(),
            Self::StopCompose { path } => format!(
                "if command -v podman >/dev/null 2>&1; \
                 then podman compose -f {path} down; \
                 else docker compose -f {path} down; fi",
                path = shell_quote(path)
            ),
            Self::Sync => "sync".to_string(),
        }
    }
}

/// Single-quote a value for embedding in a shell command line.
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

// ─── Tests ────────────────────────────────────────────────────────
