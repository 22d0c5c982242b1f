//! upsguard-shutdown: the multi-stage shutdown orchestrator.
//! Fans out to virtual machines, container runtimes, filesystems,
//! remote hosts over SSH, and finally the local host. Every external
//! invocation runs under a wall-clock deadline; every stage is
//! best-effort.

pub mod actions;
pub mod config;
pub mod containers;
pub mod error;
pub mod exec;
pub mod filesystems;
pub mod orchestrator;
pub mod remote;
pub mod vms;

#[cfg(test)]
pub(crate) mod testing;

pub use actions::PredefinedAction;
pub use config::{
    ComposeFile, ContainerStageConfig, FilesystemStageConfig, LocalShutdownConfig, MountEntry,
    PreShutdownCommand, PreShutdownKind, RemoteServer, RuntimeChoice, ShutdownConfig,
    UnmountConfig, VmStageConfig,
};
pub use error::{ActionError, ExecError};
pub use exec::{CmdOutput, CommandRunner, SystemRunner};
pub use orchestrator::{Orchestrator, StageReport};
