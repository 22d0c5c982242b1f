//! Stage A: libvirt virtual machines.
//!
//! Graceful `virsh shutdown` for every running domain, a bounded
//! drain wait, then `virsh destroy` for whatever is still up.

use std::time::Duration;

use tracing::{info, warn};

use crate::config::VmStageConfig;
use crate::exec::{CommandRunner, argv};
use crate::orchestrator::StageReport;

/// Drain poll cadence while waiting for domains to stop.
pub const VM_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Deadline for individual virsh invocations.
const VIRSH_TIMEOUT: Duration = Duration::from_secs(10);

pub async fn run<R: CommandRunner>(cfg: &VmStageConfig, runner: &R, dry_run: bool) -> StageReport {
    let mut report = StageReport::default();

    let names = match list_running(runner).await {
        Ok(names) => names,
        Err(detail) => {
            warn!("cannot list running VMs: {detail}");
            report.failed += 1;
            return report;
        }
    };

    if names.is_empty() {
        info!("no running VMs");
        return report;
    }

    info!("shutting down {} VMs: {}", names.len(), names.join(", "));
    for name in &names {
        report.attempted += 1;
        if dry_run {
            info!("[dry-run] would run: virsh shutdown {name}");
            continue;
        }
        match runner
            .run("virsh", &argv(["shutdown", name.as_str()]), VIRSH_TIMEOUT)
            .await
        {
            Ok(out) if out.success => {}
            Ok(out) => {
                warn!("virsh shutdown {name} exited {}: {}", out.exit_code, out.stderr.trim());
                report.failed += 1;
            }
            Err(e) => {
                warn!("virsh shutdown {name}: {e}");
                report.failed += 1;
            }
        }
    }

    if dry_run {
        info!("[dry-run] would wait up to {}s for VMs to drain", cfg.max_wait_s);
        return report;
    }

    // Wait for the population to drain, polling every couple seconds.
    let deadline = Duration::from_secs(cfg.max_wait_s);
    let start = tokio::time::Instant::now();
    let mut remaining = names;
    while !remaining.is_empty() && start.elapsed() < deadline {
        tokio::time::sleep(VM_POLL_INTERVAL).await;
        match list_running(runner).await {
            Ok(names) => remaining = names,
            Err(detail) => warn!("VM drain poll failed: {detail}"),
        }
    }

    for name in &remaining {
        warn!("VM {name} still running after {}s, destroying", cfg.max_wait_s);
        report.attempted += 1;
        match runner
            .run("virsh", &argv(["destroy", name.as_str()]), VIRSH_TIMEOUT)
            .await
        {
            Ok(out) if out.success => {}
            Ok(out) => {
                warn!("virsh destroy {name} exited {}: {}", out.exit_code, out.stderr.trim());
                report.failed += 1;
            }
            Err(e) => {
                warn!("virsh destroy {name}: {e}");
                report.failed += 1;
            }
        }
    }

    report
}

async fn list_running<R: CommandRunner>(runner: &R) -> Result<Vec<String>, String> {
    match runner
        .run(
            "virsh",
            &argv(["list", "--state-running", "--name"]),
            VIRSH_TIMEOUT,
        )
        .await
    {
        Ok(out) if out.success => Ok(out.lines()),
        Ok(out) => Err(format!("virsh list exited {}: {}", out.exit_code, out.stderr.trim())),
        Err(e) => Err(e.to_string()),
    }
}

// ─── Tests ────────────────────────────────────────────────────────
