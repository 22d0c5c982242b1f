//! The monitor loop: poll → track → evaluate → (at most once) launch
//! the shutdown orchestrator. One tick per `check_interval`, state
//! file rewritten every tick, notifications enqueued without blocking.

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use upsguard_core::state::MonitorState;
use upsguard_core::triggers::{Verdict, evaluate};
use upsguard_core::types::{PowerEvent, ShutdownCause};
use upsguard_notify::{AppriseSink, Notifier, NotifyService, Priority};
use upsguard_nut::{NutPoller, UpscExecutor, UpscRunner};
use upsguard_shutdown::{CommandRunner, Orchestrator, SystemRunner};

use crate::config::Config;
use crate::statefile::{self, StateSnapshot};

pub struct Monitor<P, R> {
    config: Config,
    poller: NutPoller<P>,
    runner: Arc<R>,
    notifier: Notifier,
    state: MonitorState,
    dry_run: bool,
    exit_after_shutdown: bool,
    extended_time_warned: bool,
    state_file_error_logged: bool,
    orchestrator: Option<JoinHandle<()>>,
}

impl<P, R> Monitor<P, R>
where
    P: UpscRunner,
    R: CommandRunner + 'static,
{
    pub fn new(
        config: Config,
        poller: NutPoller<P>,
        runner: Arc<R>,
        notifier: Notifier,
        dry_run: bool,
        exit_after_shutdown: bool,
    ) -> Self {
        let state = MonitorState::new(
            TimeDelta::seconds(config.triggers.depletion.window_s as i64),
            config.ups.max_stale_tolerance,
        );
        Self {
            config,
            poller,
            runner,
            notifier,
            state,
            dry_run,
            exit_after_shutdown,
            extended_time_warned: false,
            state_file_error_logged: false,
            orchestrator: None,
        }
    }

    /// Run until a stop signal arrives (ignored once armed) or, with
    /// exit-after-shutdown, until the orchestrator finishes.
    pub async fn run(mut self) {
        info!("monitoring {}", self.config.ups.name);
        loop {
            self.tick(Utc::now()).await;

            if self.exit_after_shutdown
                && let Some(handle) = self.orchestrator.take()
            {
                if let Err(e) = handle.await {
                    error!("orchestrator task failed: {e}");
                }
                info!("exit-after-shutdown set, leaving monitor loop");
                return;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.ups.check_interval()) => {}
                _ = stop_signal() => {
                    if self.state.is_armed() {
                        warn!("interrupt ignored: shutdown sequence in progress");
                    } else {
                        info!("stop requested, leaving monitor loop");
                        return;
                    }
                }
            }
        }
    }

    /// One poll/track/evaluate cycle.
    pub async fn tick(&mut self, now: DateTime<Utc>) {
        let reading = self.poller.poll(now).await;

        for event in self.state.apply(&reading) {
            self.handle_event(&event);
        }

        let snapshot = StateSnapshot::from_tick(&reading, &self.state);
        match statefile::write_atomic(&self.config.files.state_file, &snapshot) {
            Ok(()) => self.state_file_error_logged = false,
            Err(e) => {
                // Log once per streak, not once per second.
                if !self.state_file_error_logged {
                    warn!(
                        "cannot write state file {}: {e}",
                        self.config.files.state_file.display()
                    );
                    self.state_file_error_logged = true;
                }
            }
        }

        let evaluation = evaluate(&reading, &self.state, &self.config.triggers, now);
        if evaluation.extended_time_suppressed && !self.extended_time_warned {
            self.extended_time_warned = true;
            warn!(
                "on battery beyond {}s but the extended-time trigger is disabled",
                self.config.triggers.extended_time.threshold_s
            );
        }
        if let Verdict::Shutdown(cause) = evaluation.verdict {
            self.arm_and_launch(cause);
        }
    }

    fn arm_and_launch(&mut self, cause: ShutdownCause) {
        if self.state.is_armed() {
            return;
        }
        self.state.arm();
        let orchestrator = Orchestrator::new(
            self.config.shutdown.clone(),
            Arc::clone(&self.runner),
            self.notifier.clone(),
            self.dry_run,
            self.config.files.shutdown_scheduled_file.clone(),
        );
        self.orchestrator = Some(tokio::spawn(orchestrator.run(cause)));
    }

    fn handle_event(&self, event: &PowerEvent) {
        match event {
            PowerEvent::OnBattery {
                charge,
                runtime,
                load,
            } => {
                warn!(
                    "power lost, running on battery (charge {}, runtime {}, load {})",
                    fmt_pct(*charge),
                    fmt_secs(*runtime),
                    fmt_pct(*load)
                );
                self.notifier.enqueue(
                    Priority::Crisis,
                    format!(
                        "Power lost, running on battery (charge {}, runtime {}, load {})",
                        fmt_pct(*charge),
                        fmt_secs(*runtime),
                        fmt_pct(*load)
                    ),
                );
            }
            PowerEvent::PowerRestored { outage } => {
                info!("power restored after {}s on battery", outage.num_seconds());
                self.notifier.enqueue(
                    Priority::Info,
                    format!("Power restored after {}s on battery", outage.num_seconds()),
                );
            }
            PowerEvent::ConnectionLost { consecutive } => {
                warn!("lost contact with UPS ({consecutive} polls without fresh data)");
                self.notifier.enqueue(
                    Priority::Crisis,
                    format!("Lost contact with UPS ({consecutive} polls without fresh data)"),
                );
            }
            PowerEvent::ConnectionRestored => {
                info!("contact with UPS restored");
                self.notifier
                    .enqueue(Priority::Info, "Contact with UPS restored".to_string());
            }
            PowerEvent::RegimeChanged {
                from,
                to,
                input_voltage,
            } => {
                let voltage = input_voltage
                    .map(|v| format!("{v:.1}V"))
                    .unwrap_or_else(|| "n/a".to_string());
                warn!("input power regime changed from {from} to {to} (input {voltage})");
                self.notifier.enqueue(
                    Priority::Info,
                    format!("Input power regime changed from {from} to {to} (input {voltage})"),
                );
            }
        }
    }
}

fn fmt_pct(value: Option<f64>) -> String {
    value
        .map(|v| format!("{v:.0}%"))
        .unwrap_or_else(|| "unknown".to_string())
}

fn fmt_secs(value: Option<u64>) -> String {
    value
        .map(|v| format!("{v}s"))
        .unwrap_or_else(|| "unknown".to_string())
}

/// Resolves when a stop is requested (ctrl-c or SIGTERM).
async fn stop_signal() {
    #[cfg(unix)]
    {
        let ctrl_c = tokio::signal::ctrl_c();
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                warn!("cannot register SIGTERM handler: {e}");
                ctrl_c.await.ok();
            }
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.ok();
    }
}

/// Wire the real executors and run until stopped.
pub async fn run_daemon(
    config: Config,
    dry_run_flag: bool,
    exit_after_shutdown: bool,
) -> anyhow::Result<()> {
    let sentinel = &config.files.shutdown_scheduled_file;
    if let Some(marker) = statefile::leftover_sentinel(sentinel) {
        warn!(
            "leftover shutdown marker at {} ({}); a previous run armed a shutdown that did \
             not complete; remove the file to silence this",
            sentinel.display(),
            marker.trim()
        );
    }

    let dry_run = dry_run_flag || config.dry_run;
    if dry_run {
        info!("dry-run mode: external actions are logged, not executed");
    }

    let service = NotifyService::start(
        AppriseSink::from_config(&config.notifications),
        config.notifications.retry_interval(),
    );
    let drain_deadline = config.notifications.send_timeout() + config.notifications.retry_interval();

    let poller = NutPoller::new(
        UpscExecutor::default(),
        config.ups.name.clone(),
        config.ups.check_interval(),
    );
    let monitor = Monitor::new(
        config,
        poller,
        Arc::new(SystemRunner),
        service.notifier(),
        dry_run,
        exit_after_shutdown,
    );
    monitor.run().await;

    service.drain(drain_deadline).await;
    Ok(())
}

/// Enqueue a probe message and wait for the worker to deliver it.
pub async fn test_notifications(config: &Config) -> anyhow::Result<()> {
    if config.notifications.urls.is_empty() {
        warn!("no notification URLs configured; the probe will be a no-op");
    }
    let service = NotifyService::start(
        AppriseSink::from_config(&config.notifications),
        config.notifications.retry_interval(),
    );
    service.notifier().enqueue(
        Priority::Info,
        format!(
            "Test notification from upsguard ({} sink(s) configured)",
            config.notifications.urls.len()
        ),
    );
    service
        .drain(config.notifications.send_timeout() + config.notifications.retry_interval())
        .await;
    Ok(())
}

// ─── Tests ────────────────────────────────────────────────────────
