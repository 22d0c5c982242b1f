//! Stage D: remote servers over SSH.
//!
//! Two phases: every `parallel = false` server completes first, in
//! configuration order, then the rest run concurrently. A stuck host
//! only ever costs its own deadline, never the other hosts'.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::config::RemoteServer;
use crate::exec::{CommandRunner, argv};
use crate::orchestrator::StageReport;

pub async fn run<R: CommandRunner + 'static>(
    servers: &[RemoteServer],
    runner: &Arc<R>,
    dry_run: bool,
) -> StageReport {
    let mut report = StageReport::default();

    let enabled: Vec<&RemoteServer> = servers.iter().filter(|s| s.enabled).collect();
    for server in servers.iter().filter(|s| !s.enabled) {
        info!("remote server {} disabled, skipping", server.name);
    }

    // Sequential phase: fully completes before anything parallel starts.
    for server in enabled.iter().filter(|s| !s.parallel) {
        report.merge(shutdown_server(Arc::clone(runner), (*server).clone(), dry_run).await);
    }

    // Parallel phase.
    let mut tasks = JoinSet::new();
    for server in enabled.iter().filter(|s| s.parallel) {
        let runner = Arc::clone(runner);
        let server = (*server).clone();
        tasks.spawn(async move { shutdown_server(runner, server, dry_run).await });
    }
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(server_report) => report.merge(server_report),
            Err(e) => {
                warn!("remote shutdown task panicked: {e}");
                report.failed += 1;
            }
        }
    }

    report
}

async fn shutdown_server<R: CommandRunner>(
    runner: Arc<R>,
    server: RemoteServer,
    dry_run: bool,
) -> StageReport {
    let mut report = StageReport::default();

    let connect_opt = format!("ConnectTimeout={}", server.connect_timeout_s);
    let mut base = argv(["-o", connect_opt.as_str()]);
    base.extend(server.ssh_options.iter().cloned());
    base.push(format!("{}@{}", server.user, server.host));

    for pre in &server.pre_shutdown_commands {
        let command = pre.command_text();
        let timeout =
            Duration::from_secs(server.connect_timeout_s + pre.timeout_s.unwrap_or(server.command_timeout_s));
        report.attempted += 1;
        if dry_run {
            info!("[dry-run] {}: would run {}", server.name, pre.label());
            continue;
        }
        info!("{}: running pre-shutdown step {}", server.name, pre.label());
        let mut args = base.clone();
        args.push(command);
        match runner.run("ssh", &args, timeout).await {
            Ok(out) if out.success => {}
            Ok(out) => {
                warn!(
                    "{}: pre-shutdown step {} exited {}: {}",
                    server.name,
                    pre.label(),
                    out.exit_code,
                    out.stderr.trim()
                );
                report.failed += 1;
            }
            Err(e) => {
                warn!("{}: pre-shutdown step {}: {e}", server.name, pre.label());
                report.failed += 1;
            }
        }
    }

    report.attempted += 1;
    if dry_run {
        info!(
            "[dry-run] {}: would run shutdown command: {}",
            server.name, server.shutdown_command
        );
        return report;
    }

    info!("{}: sending shutdown command", server.name);
    let timeout = Duration::from_secs(server.connect_timeout_s + server.command_timeout_s);
    let mut args = base;
    args.push(server.shutdown_command.clone());
    match runner.run("ssh", &args, timeout).await {
        Ok(out) if out.success => info!("{}: shutdown command accepted", server.name),
        // The host dropping the connection mid-shutdown is normal; the
        // exit code alone cannot distinguish it from a refusal.
        Ok(out) => {
            warn!(
                "{}: shutdown command exited {}: {}",
                server.name,
                out.exit_code,
                out.stderr.trim()
            );
            report.failed += 1;
        }
        Err(e) => {
            warn!("{}: shutdown command: {e}", server.name);
            report.failed += 1;
        }
    }

    report
}

// ─── Tests ────────────────────────────────────────────────────────
