//! The shutdown orchestrator: stages A through F, strictly in order,
//! each best-effort. Invoked at most once per process lifetime; the
//! caller sets the armed latch and writes nothing else from then on.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

use upsguard_core::types::ShutdownCause;
use upsguard_notify::{Notifier, Priority};

use crate::config::ShutdownConfig;
use crate::exec::{CommandRunner, argv};
use crate::{containers, filesystems, remote, vms};

/// Fixed pause before the local shutdown so the notification worker
/// can drain if the network came back. Never waits for confirmation:
/// network recovery is not guaranteed.
pub const FINAL_GRACE: Duration = Duration::from_secs(5);

/// Deadline for the local shutdown command.
const LOCAL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(60);

/// Per-stage outcome used for boundary logs and notifications.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StageReport {
    pub attempted: usize,
    pub failed: usize,
}

impl StageReport {
    pub fn merge(&mut self, other: StageReport) {
        self.attempted += other.attempted;
        self.failed += other.failed;
    }

    pub fn describe(&self) -> String {
        format!("{} actions, {} failed", self.attempted, self.failed)
    }
}

/// Marker persisted before any side effect. Its presence on startup
/// means a previous run armed but did not complete.
#[derive(Debug, Serialize)]
struct SentinelMarker<'a> {
    #[serde(flatten)]
    cause: &'a ShutdownCause,
    detail: String,
    started_at: DateTime<Utc>,
    pid: u32,
}

pub struct Orchestrator<R> {
    config: ShutdownConfig,
    runner: Arc<R>,
    notifier: Notifier,
    dry_run: bool,
    sentinel_path: PathBuf,
}

impl<R: CommandRunner + 'static> Orchestrator<R> {
    pub fn new(
        config: ShutdownConfig,
        runner: Arc<R>,
        notifier: Notifier,
        dry_run: bool,
        sentinel_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            config,
            runner,
            notifier,
            dry_run,
            sentinel_path: sentinel_path.into(),
        }
    }

    /// Drive the full sequence. Runs to completion; nothing in here
    /// aborts the host-must-go-down path.
    pub async fn run(self, cause: ShutdownCause) {
        error!("SHUTDOWN INITIATED [{cause}]: {}", cause.describe());
        self.write_sentinel(&cause);
        self.notifier.enqueue(
            Priority::Crisis,
            format!("Shutdown initiated [{cause}]: {}", cause.describe()),
        );

        if self.config.virtual_machines.enabled {
            info!("stage A: virtual machines");
            let report = vms::run(&self.config.virtual_machines, &*self.runner, self.dry_run).await;
            self.stage_boundary("virtual machines", report);
        } else {
            info!("stage A: virtual machines disabled, skipping");
        }

        if self.config.containers.enabled {
            info!("stage B: containers");
            let report = containers::run(&self.config.containers, &*self.runner, self.dry_run).await;
            self.stage_boundary("containers", report);
        } else {
            info!("stage B: containers disabled, skipping");
        }

        if self.config.filesystems.enabled {
            info!("stage C: filesystems");
            let report =
                filesystems::run(&self.config.filesystems, &*self.runner, self.dry_run).await;
            self.stage_boundary("filesystems", report);
        } else {
            info!("stage C: filesystems disabled, skipping");
        }

        if self.config.remote_servers.is_empty() {
            info!("stage D: no remote servers configured, skipping");
        } else {
            info!("stage D: remote servers");
            let report = remote::run(&self.config.remote_servers, &self.runner, self.dry_run).await;
            self.stage_boundary("remote servers", report);
        }

        info!("stage E: final grace ({}s)", FINAL_GRACE.as_secs());
        tokio::time::sleep(FINAL_GRACE).await;

        if self.config.local.enabled {
            info!("stage F: local shutdown");
            self.local_shutdown().await;
        } else {
            info!("stage F: local shutdown disabled, skipping");
        }

        info!("shutdown sequence complete");
        self.notifier
            .enqueue(Priority::Crisis, "Shutdown sequence complete".to_string());
    }

    fn stage_boundary(&self, stage: &str, report: StageReport) {
        info!("stage complete: {stage} ({})", report.describe());
        self.notifier.enqueue(
            Priority::Crisis,
            format!("Shutdown stage complete: {stage} ({})", report.describe()),
        );
    }

    /// Written atomically before any side effect. A write failure is
    /// logged and does not stop the sequence: the marker protects
    /// against double-initiation, the shutdown itself matters more.
    fn write_sentinel(&self, cause: &ShutdownCause) {
        if self.dry_run {
            info!(
                "[dry-run] would write shutdown marker to {}",
                self.sentinel_path.display()
            );
            return;
        }
        let marker = SentinelMarker {
            cause,
            detail: cause.describe(),
            started_at: Utc::now(),
            pid: std::process::id(),
        };
        let json = match serde_json::to_string_pretty(&marker) {
            Ok(json) => json,
            Err(e) => {
                warn!("cannot serialize shutdown marker: {e}");
                return;
            }
        };
        let tmp = self.sentinel_path.with_extension("tmp");
        let result = std::fs::write(&tmp, json)
            .and_then(|()| std::fs::rename(&tmp, &self.sentinel_path));
        match result {
            Ok(()) => info!("shutdown marker written to {}", self.sentinel_path.display()),
            Err(e) => warn!(
                "cannot write shutdown marker {}: {e}",
                self.sentinel_path.display()
            ),
        }
    }

    async fn local_shutdown(&self) {
        let mut command = self.config.local.command.clone();
        if let Some(message) = &self.config.local.message {
            command.push(' ');
            command.push_str(&shell_quote(message));
        }

        if self.dry_run {
            info!("[dry-run] would run: sh -c {command}");
            return;
        }

        self.notifier
            .enqueue(Priority::Crisis, format!("Executing local shutdown: {command}"));
        match self
            .runner
            .run("sh", &argv(["-c", command.as_str()]), LOCAL_SHUTDOWN_TIMEOUT)
            .await
        {
            Ok(out) if out.success => info!("local shutdown command accepted"),
            Ok(out) => error!(
                "local shutdown command exited {}: {}",
                out.exit_code,
                out.stderr.trim()
            ),
            Err(e) => error!("local shutdown command: {e}"),
        }
    }
}

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

// ─── Tests ────────────────────────────────────────────────────────
