//! Stage C: filesystems.
//!
//! Sync, a short pause so battery-backed controller caches flush,
//! then the configured unmounts in order. Timeouts and failures are
//! logged and never abort the stage.

use std::time::Duration;

use tracing::{info, warn};

use crate::config::FilesystemStageConfig;
use crate::exec::{CommandRunner, argv};
use crate::orchestrator::StageReport;

/// Deadline for the sync invocation.
const SYNC_TIMEOUT: Duration = Duration::from_secs(10);

pub async fn run<R: CommandRunner>(
    cfg: &FilesystemStageConfig,
    runner: &R,
    dry_run: bool,
) -> StageReport {
    let mut report = StageReport::default();

    if cfg.sync_enabled {
        report.attempted += 1;
        if dry_run {
            info!("[dry-run] would run: sync");
        } else {
            match runner.run("sync", &[], SYNC_TIMEOUT).await {
                Ok(out) if out.success => {}
                Ok(out) => {
                    warn!("sync exited {}", out.exit_code);
                    report.failed += 1;
                }
                Err(e) => {
                    warn!("sync: {e}");
                    report.failed += 1;
                }
            }
        }
        // Let battery-backed controller caches drain before unmounting.
        tokio::time::sleep(Duration::from_secs(cfg.post_sync_delay_s)).await;
    }

    let timeout = Duration::from_secs(cfg.unmount.timeout_s);
    for mount in &cfg.unmount.mounts {
        let path = mount.path.to_string_lossy().into_owned();
        report.attempted += 1;
        if dry_run {
            info!(
                "[dry-run] would run: umount {} {path}",
                mount.flags.join(" ")
            );
            continue;
        }
        let mut args = argv(mount.flags.iter().cloned());
        args.push(path.clone());
        match runner.run("umount", &args, timeout).await {
            Ok(out) if out.success => info!("unmounted {path}"),
            Ok(out) => {
                warn!("umount {path} exited {}: {}", out.exit_code, out.stderr.trim());
                report.failed += 1;
            }
            Err(e) => {
                warn!("umount {path}: {e}");
                report.failed += 1;
            }
        }
    }

    report
}

// ─── Tests ────────────────────────────────────────────────────────
