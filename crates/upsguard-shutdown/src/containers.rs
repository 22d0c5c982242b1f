//! Stage B: container runtimes.
//!
//! Compose projects stop first, in configuration order, then whatever
//! is still running. Rootless Podman users get their own pass when
//! enabled. Runtime `auto` probes Podman, then Docker.

use std::time::Duration;

use tracing::{info, warn};

use crate::config::{ContainerStageConfig, RuntimeChoice};
use crate::exec::{CommandRunner, argv};
use crate::orchestrator::StageReport;

/// Deadline for probes and listings.
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Wall-clock margin on top of a graceful stop window.
const STOP_DEADLINE_MARGIN: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerRuntime {
    Docker,
    Podman,
}

impl ContainerRuntime {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Docker => "docker",
            Self::Podman => "podman",
        }
    }
}

/// Resolve the runtime binary. `auto` probes Podman then Docker;
/// explicit choices are used as-is without probing.
pub async fn resolve_runtime<R: CommandRunner>(
    choice: RuntimeChoice,
    runner: &R,
) -> Option<ContainerRuntime> {
    match choice {
        RuntimeChoice::Docker => Some(ContainerRuntime::Docker),
        RuntimeChoice::Podman => Some(ContainerRuntime::Podman),
        RuntimeChoice::Auto => {
            for rt in [ContainerRuntime::Podman, ContainerRuntime::Docker] {
                match runner
                    .run(rt.as_str(), &argv(["--version"]), PROBE_TIMEOUT)
                    .await
                {
                    Ok(out) if out.success => return Some(rt),
                    _ => {}
                }
            }
            None
        }
    }
}

pub async fn run<R: CommandRunner>(
    cfg: &ContainerStageConfig,
    runner: &R,
    dry_run: bool,
) -> StageReport {
    let mut report = StageReport::default();

    let Some(rt) = resolve_runtime(cfg.runtime, runner).await else {
        info!("no container runtime available, skipping container stage");
        return report;
    };
    info!("container runtime: {}", rt.as_str());

    for compose in &cfg.compose_files {
        let stop_secs = compose.stop_timeout_s.unwrap_or(cfg.stop_timeout_s);
        let path = compose.path.to_string_lossy().into_owned();
        report.attempted += 1;
        if dry_run {
            info!("[dry-run] would run: {} compose -f {path} down --timeout {stop_secs}", rt.as_str());
            continue;
        }
        let stop_arg = stop_secs.to_string();
        let args = argv([
            "compose",
            "-f",
            path.as_str(),
            "down",
            "--timeout",
            stop_arg.as_str(),
        ]);
        let deadline = Duration::from_secs(stop_secs) + STOP_DEADLINE_MARGIN;
        match runner.run(rt.as_str(), &args, deadline).await {
            Ok(out) if out.success => info!("compose project {path} stopped"),
            Ok(out) => {
                warn!("compose down {path} exited {}: {}", out.exit_code, out.stderr.trim());
                report.failed += 1;
            }
            Err(e) => {
                warn!("compose down {path}: {e}");
                report.failed += 1;
            }
        }
    }

    if cfg.shutdown_all_remaining {
        stop_remaining(rt, cfg.stop_timeout_s, runner, dry_run, &mut report).await;
    }

    if rt == ContainerRuntime::Podman && cfg.include_user_containers {
        stop_user_containers(cfg.stop_timeout_s, runner, dry_run, &mut report).await;
    }

    report
}

async fn stop_remaining<R: CommandRunner>(
    rt: ContainerRuntime,
    stop_secs: u64,
    runner: &R,
    dry_run: bool,
    report: &mut StageReport,
) {
    let ids = match runner
        .run(rt.as_str(), &argv(["ps", "--format", "{{.ID}}"]), PROBE_TIMEOUT)
        .await
    {
        Ok(out) if out.success => out.lines(),
        Ok(out) => {
            warn!("{} ps exited {}: {}", rt.as_str(), out.exit_code, out.stderr.trim());
            report.failed += 1;
            return;
        }
        Err(e) => {
            warn!("{} ps: {e}", rt.as_str());
            report.failed += 1;
            return;
        }
    };

    if ids.is_empty() {
        info!("no remaining containers");
        return;
    }

    report.attempted += ids.len();
    if dry_run {
        info!("[dry-run] would stop {} remaining containers", ids.len());
        return;
    }

    let stop_arg = stop_secs.to_string();
    let mut args = argv(["stop", "--time", stop_arg.as_str()]);
    args.extend(ids.iter().cloned());
    let deadline = Duration::from_secs(stop_secs) + STOP_DEADLINE_MARGIN;
    match runner.run(rt.as_str(), &args, deadline).await {
        Ok(out) if out.success => info!("stopped {} containers", ids.len()),
        Ok(out) => {
            warn!("{} stop exited {}: {}", rt.as_str(), out.exit_code, out.stderr.trim());
            report.failed += ids.len();
        }
        Err(e) => {
            warn!("{} stop: {e}", rt.as_str());
            report.failed += ids.len();
        }
    }
}

async fn stop_user_containers<R: CommandRunner>(
    stop_secs: u64,
    runner: &R,
    dry_run: bool,
    report: &mut StageReport,
) {
    let passwd = match runner.run("getent", &argv(["passwd"]), PROBE_TIMEOUT).await {
        Ok(out) if out.success => out.stdout,
        Ok(out) => {
            warn!("getent passwd exited {}: {}", out.exit_code, out.stderr.trim());
            report.failed += 1;
            return;
        }
        Err(e) => {
            warn!("getent passwd: {e}");
            report.failed += 1;
            return;
        }
    };

    for (user, uid) in parse_rootless_users(&passwd) {
        let runtime_dir = format!("XDG_RUNTIME_DIR=/run/user/{uid}");
        let list_args = argv([
            "-u",
            user.as_str(),
            "env",
            runtime_dir.as_str(),
            "podman",
            "ps",
            "-q",
        ]);
        let ids = match runner.run("sudo", &list_args, PROBE_TIMEOUT).await {
            Ok(out) if out.success => out.lines(),
            // Users without a podman setup are expected; keep going.
            Ok(out) => {
                info!("podman ps for {user} exited {}, skipping", out.exit_code);
                continue;
            }
            Err(e) => {
                warn!("podman ps for {user}: {e}");
                continue;
            }
        };

        if ids.is_empty() {
            continue;
        }

        report.attempted += ids.len();
        if dry_run {
            info!("[dry-run] would stop {} containers for user {user}", ids.len());
            continue;
        }

        let stop_arg = stop_secs.to_string();
        let mut stop_args = argv([
            "-u",
            user.as_str(),
            "env",
            runtime_dir.as_str(),
            "podman",
            "stop",
            "--time",
            stop_arg.as_str(),
        ]);
        stop_args.extend(ids.iter().cloned());
        let deadline = Duration::from_secs(stop_secs) + STOP_DEADLINE_MARGIN;
        match runner.run("sudo", &stop_args, deadline).await {
            Ok(out) if out.success => info!("stopped {} containers for user {user}", ids.len()),
            Ok(out) => {
                warn!("podman stop for {user} exited {}: {}", out.exit_code, out.stderr.trim());
                report.failed += ids.len();
            }
            Err(e) => {
                warn!("podman stop for {user}: {e}");
                report.failed += ids.len();
            }
        }
    }
}

/// Regular login users from `getent passwd` output: uid ≥ 1000 with a
/// real login shell.
fn parse_rootless_users(passwd: &str) -> Vec<(String, u32)> {
    passwd
        .lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split(':').collect();
            if fields.len() < 7 {
                return None;
            }
            let name = fields[0];
            let uid: u32 = fields[2].parse().ok()?;
            let shell = fields[6].trim();
            if uid < 1000 || uid == 65534 {
                return None;
            }
            if shell.ends_with("nologin") || shell.ends_with("false") || shell.is_empty() {
                return None;
            }
            Some((name.to_string(), uid))
        })
        .collect()
}

// ─── Tests ────────────────────────────────────────────────────────
