//! Canonical shutdown-stage configuration.
//!
//! These are the single shapes the orchestrator sees. The config
//! loader normalizes its "string or table" file forms into them, so
//! no stage ever branches on how an entry was written.

use std::path::PathBuf;

use serde::Deserialize;

use crate::actions::PredefinedAction;

/// Stage A: libvirt virtual machines.
#[derive(Debug, Clone, PartialEq)]
pub struct VmStageConfig {
    pub enabled: bool,
    /// How long to wait for graceful shutdowns to drain before
    /// force-destroying the stragglers.
    pub max_wait_s: u64,
}

impl Default for VmStageConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_wait_s: 30,
        }
    }
}

/// Container runtime selection.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeChoice {
    /// Probe Podman first, then Docker.
    #[default]
    Auto,
    Docker,
    Podman,
}

/// A compose project to stop, in order, before loose containers.
#[derive(Debug, Clone, PartialEq)]
pub struct ComposeFile {
    pub path: PathBuf,
    /// Overrides the stage-wide stop timeout for this project.
    pub stop_timeout_s: Option<u64>,
}

/// Stage B: container runtimes.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerStageConfig {
    pub enabled: bool,
    pub runtime: RuntimeChoice,
    pub stop_timeout_s: u64,
    pub compose_files: Vec<ComposeFile>,
    /// Stop whatever is still running after the compose projects.
    pub shutdown_all_remaining: bool,
    /// Podman only: also stop rootless users' containers.
    pub include_user_containers: bool,
}

impl Default for ContainerStageConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            runtime: RuntimeChoice::Auto,
            stop_timeout_s: 60,
            compose_files: Vec::new(),
            shutdown_all_remaining: true,
            include_user_containers: false,
        }
    }
}

/// One mount to unmount, with its extra `umount` flags (e.g. `-l`, `-f`).
#[derive(Debug, Clone, PartialEq)]
pub struct MountEntry {
    pub path: PathBuf,
    pub flags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnmountConfig {
    pub timeout_s: u64,
    pub mounts: Vec<MountEntry>,
}

impl Default for UnmountConfig {
    fn default() -> Self {
        Self {
            timeout_s: 15,
            mounts: Vec::new(),
        }
    }
}

/// Stage C: filesystems.
#[derive(Debug, Clone, PartialEq)]
pub struct FilesystemStageConfig {
    pub enabled: bool,
    pub sync_enabled: bool,
    /// Pause after sync so battery-backed controller caches flush.
    pub post_sync_delay_s: u64,
    pub unmount: UnmountConfig,
}

impl Default for FilesystemStageConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sync_enabled: true,
            post_sync_delay_s: 2,
            unmount: UnmountConfig::default(),
        }
    }
}

/// A pre-shutdown step on a remote host: either a predefined action
/// template or a raw command string.
#[derive(Debug, Clone, PartialEq)]
pub enum PreShutdownKind {
    Action(PredefinedAction),
    Custom(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PreShutdownCommand {
    pub kind: PreShutdownKind,
    /// Overrides the server's command timeout for this step.
    pub timeout_s: Option<u64>,
}

impl PreShutdownCommand {
    /// The remote command line this step executes.
    pub fn command_text(&self) -> String {
        match &self.kind {
            PreShutdownKind::Action(action) => action.script(),
            PreShutdownKind::Custom(cmd) => cmd.clone(),
        }
    }

    pub fn label(&self) -> String {
        match &self.kind {
            PreShutdownKind::Action(action) => action.name().to_string(),
            PreShutdownKind::Custom(cmd) => cmd.clone(),
        }
    }
}

/// Stage D: one remote host.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteServer {
    pub name: String,
    pub enabled: bool,
    pub host: String,
    pub user: String,
    pub connect_timeout_s: u64,
    pub command_timeout_s: u64,
    pub shutdown_command: String,
    /// Extra options appended verbatim to each ssh invocation.
    pub ssh_options: Vec<String>,
    /// Parallel servers run concurrently after all sequential ones.
    pub parallel: bool,
    pub pre_shutdown_commands: Vec<PreShutdownCommand>,
}

impl RemoteServer {
    pub fn new(name: impl Into<String>, host: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            host: host.into(),
            user: user.into(),
            connect_timeout_s: 10,
            command_timeout_s: 30,
            shutdown_command: "sudo shutdown -h now".to_string(),
            ssh_options: Vec::new(),
            parallel: true,
            pre_shutdown_commands: Vec::new(),
        }
    }
}

/// Stage F: the host itself.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalShutdownConfig {
    pub enabled: bool,
    pub command: String,
    /// Broadcast message appended to the command when set.
    pub message: Option<String>,
}

impl Default for LocalShutdownConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            command: "shutdown -h now".to_string(),
            message: None,
        }
    }
}

/// Everything the orchestrator needs, stages A through F.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ShutdownConfig {
    pub virtual_machines: VmStageConfig,
    pub containers: ContainerStageConfig,
    pub filesystems: FilesystemStageConfig,
    pub remote_servers: Vec<RemoteServer>,
    pub local: LocalShutdownConfig,
}
