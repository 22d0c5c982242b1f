//! The NUT poller: one `upsc` invocation per tick, classified into a
//! typed reading. Stateless; cadence is the caller's responsibility.

use std::time::Duration;

use chrono::{DateTime, Utc};

use upsguard_core::types::UpsReading;

use crate::executor::UpscRunner;
use crate::parse::build_reading;

/// Margin added to the check interval for the per-call deadline, so a
/// slow server is cut off before it can skew the cadence by more than
/// one tick.
pub const POLL_DEADLINE_MARGIN: Duration = Duration::from_secs(2);

/// Polls a single UPS (`NAME@HOST`) through an [`UpscRunner`].
pub struct NutPoller<R> {
    runner: R,
    target: String,
    deadline: Duration,
}

impl<R: UpscRunner> NutPoller<R> {
    pub fn new(runner: R, target: impl Into<String>, check_interval: Duration) -> Self {
        Self {
            runner,
            target: target.into(),
            deadline: check_interval + POLL_DEADLINE_MARGIN,
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Poll once. Never fails: tool errors become unreachable readings.
    pub async fn poll(&self, now: DateTime<Utc>) -> UpsReading {
        match self.runner.query(&self.target, self.deadline).await {
            Ok(output) => build_reading(&output, now),
            Err(e) => {
                tracing::debug!(target = %self.target, "upsc query failed: {e}");
                UpsReading::unreachable(now)
            }
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use upsguard_core::types::{FetchOutcome, StatusFlag};

    use crate::error::NutError;

    /// Fake runner returning a scripted sequence of results.
    struct FakeRunner {
        script: Mutex<Vec<Result<String, NutError>>>,
    }

    impl FakeRunner {
        fn new(script: Vec<Result<String, NutError>>) -> Self {
            Self {
                script: Mutex::new(script),
            }
        }
    }

    #[async_trait]
    impl UpscRunner for FakeRunner {
        async fn query(&self, _target: &str, _deadline: Duration) -> Result<String, NutError> {
            self.script
                .lock()
                .expect("script lock")
                .remove(0)
        }
    }

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-01T12:00:00Z")
            .expect("valid RFC3339")
            .with_timezone(&Utc)
    }

    #[tokio::test]
    async fn healthy_output_becomes_fresh_reading() {
        let runner = FakeRunner::new(vec![Ok(
            "ups.status=OL CHRG\nbattery.charge=100\nbattery.runtime=1800\n".to_string(),
        )]);
        let poller = NutPoller::new(runner, "ups@localhost", Duration::from_secs(1));
        let reading = poller.poll(now()).await;
        assert_eq!(reading.outcome, FetchOutcome::Ok);
        assert!(reading.has(StatusFlag::Ol));
        assert_eq!(reading.battery_percent, Some(100.0));
    }

    #[tokio::test]
    async fn command_failure_becomes_unreachable() {
        let runner = FakeRunner::new(vec![Err(NutError::CommandFailed {
            code: 1,
            stderr: "Error: Connection failure".to_string(),
        })]);
        let poller = NutPoller::new(runner, "ups@localhost", Duration::from_secs(1));
        let reading = poller.poll(now()).await;
        assert_eq!(reading.outcome, FetchOutcome::Unreachable);
        assert_eq!(reading.fetched_at, now());
    }

    #[tokio::test]
    async fn timeout_becomes_unreachable() {
        let runner = FakeRunner::new(vec![Err(NutError::TimedOut(3))]);
        let poller = NutPoller::new(runner, "ups@localhost", Duration::from_secs(1));
        let reading = poller.poll(now()).await;
        assert_eq!(reading.outcome, FetchOutcome::Unreachable);
    }

    #[tokio::test]
    async fn empty_output_becomes_unreachable() {
        let runner = FakeRunner::new(vec![Err(NutError::EmptyOutput)]);
        let poller = NutPoller::new(runner, "ups@localhost", Duration::from_secs(1));
        let reading = poller.poll(now()).await;
        assert_eq!(reading.outcome, FetchOutcome::Unreachable);
    }

    #[tokio::test]
    async fn poll_sequence_tracks_script() {
        let runner = FakeRunner::new(vec![
            Ok("ups.status=OL\nbattery.charge=100\n".to_string()),
            Err(NutError::TimedOut(3)),
            Ok("ups.status=OB DISCHRG\nbattery.charge=97\n".to_string()),
        ]);
        let poller = NutPoller::new(runner, "ups@localhost", Duration::from_secs(1));
        assert_eq!(poller.poll(now()).await.outcome, FetchOutcome::Ok);
        assert_eq!(poller.poll(now()).await.outcome, FetchOutcome::Unreachable);
        let third = poller.poll(now()).await;
        assert!(third.has(StatusFlag::Ob));
    }

    #[test]
    fn deadline_is_interval_plus_margin() {
        let runner = FakeRunner::new(vec![]);
        let poller = NutPoller::new(runner, "ups@localhost", Duration::from_secs(1));
        assert_eq!(poller.deadline, Duration::from_secs(3));
    }
}
