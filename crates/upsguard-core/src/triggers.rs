//! Shutdown trigger evaluation.
//!
//! [`evaluate`] is a pure function over (reading, state, config, now).
//! First match wins, in this order: FSD, failsafe on lost connection,
//! low battery, critical runtime, depletion rate, extended time.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::state::{DerivedState, MonitorState};
use crate::types::{ShutdownCause, StatusFlag, UpsReading};

// ─── Configuration ────────────────────────────────────────────────

/// Depletion-rate trigger settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DepletionConfig {
    /// Rolling history window in seconds.
    pub window_s: u64,
    /// Rate threshold in percent per minute (strictly greater fires).
    pub critical_rate_pct_per_min: f64,
    /// Post-outage grace period in seconds during which the rule is
    /// suspended to absorb UPS recalibration noise.
    pub grace_s: u64,
    /// Minimum sample count before the rate is trusted.
    pub min_samples: usize,
}

impl Default for DepletionConfig {
    fn default() -> Self {
        Self {
            window_s: 300,
            critical_rate_pct_per_min: 15.0,
            grace_s: 90,
            min_samples: 30,
        }
    }
}

/// Extended-on-battery trigger settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExtendedTimeConfig {
    pub enabled: bool,
    pub threshold_s: u64,
}

impl Default for ExtendedTimeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold_s: 900,
        }
    }
}

/// All trigger thresholds.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TriggerConfig {
    /// Battery percentage below which shutdown fires (strictly less).
    pub low_battery_percent: f64,
    /// Estimated runtime below which shutdown fires (strictly less).
    pub critical_runtime_s: u64,
    pub depletion: DepletionConfig,
    pub extended_time: ExtendedTimeConfig,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            low_battery_percent: 20.0,
            critical_runtime_s: 600,
            depletion: DepletionConfig::default(),
            extended_time: ExtendedTimeConfig::default(),
        }
    }
}

// ─── Evaluation ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    NoAction,
    Shutdown(ShutdownCause),
}

/// Output of one evaluation pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub verdict: Verdict,
    /// The extended-time rule matched but is disabled in configuration.
    /// The caller logs this once; the evaluator itself never logs.
    pub extended_time_suppressed: bool,
}

impl Evaluation {
    fn no_action() -> Self {
        Self {
            verdict: Verdict::NoAction,
            extended_time_suppressed: false,
        }
    }

    fn shutdown(cause: ShutdownCause) -> Self {
        Self {
            verdict: Verdict::Shutdown(cause),
            extended_time_suppressed: false,
        }
    }
}

/// Evaluate one reading against the tracked state. Pure; no IO.
pub fn evaluate(
    reading: &UpsReading,
    state: &MonitorState,
    cfg: &TriggerConfig,
    now: DateTime<Utc>,
) -> Evaluation {
    if state.is_armed() {
        return Evaluation::no_action();
    }

    // 1. UPS-asserted forced shutdown overrides everything.
    if reading.is_ok() && reading.has(StatusFlag::Fsd) {
        return Evaluation::shutdown(ShutdownCause::Fsd);
    }

    // 2. Failsafe: on battery and blind past the stale tolerance.
    if state.derived == DerivedState::OnBattery && !reading.is_ok() && state.connection_lost() {
        return Evaluation::shutdown(ShutdownCause::FailsafeConnectionLost {
            consecutive: state.consecutive_stale,
        });
    }

    if !reading.is_ok() || state.derived != DerivedState::OnBattery {
        return Evaluation::no_action();
    }

    // 3a. Low battery (strict <).
    if let Some(charge) = reading.battery_percent
        && charge < cfg.low_battery_percent
    {
        return Evaluation::shutdown(ShutdownCause::LowBattery {
            charge,
            threshold: cfg.low_battery_percent,
        });
    }

    // 3b. Critical runtime (strict <).
    if let Some(runtime) = reading.runtime_seconds
        && runtime < cfg.critical_runtime_s
    {
        return Evaluation::shutdown(ShutdownCause::CriticalRuntime {
            runtime,
            threshold: cfg.critical_runtime_s,
        });
    }

    let elapsed_on_battery = state
        .on_battery_since
        .map(|since| now.signed_duration_since(since));

    // 3c. Depletion rate, suspended during the post-outage grace window.
    if state.history.len() >= cfg.depletion.min_samples
        && let Some(rate) = state.history.rate_pct_per_min()
        && rate > cfg.depletion.critical_rate_pct_per_min
        && elapsed_on_battery
            .is_some_and(|elapsed| elapsed.num_seconds() > cfg.depletion.grace_s as i64)
    {
        return Evaluation::shutdown(ShutdownCause::DepletionRate {
            rate_pct_per_min: rate,
            threshold: cfg.depletion.critical_rate_pct_per_min,
            window_secs: state.history.span().num_seconds(),
        });
    }

    // 3d. Extended time on battery.
    if let Some(elapsed) = elapsed_on_battery
        && elapsed.num_seconds() > cfg.extended_time.threshold_s as i64
    {
        if cfg.extended_time.enabled {
            return Evaluation::shutdown(ShutdownCause::ExtendedTime {
                elapsed_secs: elapsed.num_seconds(),
                threshold_secs: cfg.extended_time.threshold_s,
            });
        }
        return Evaluation {
            verdict: Verdict::NoAction,
            extended_time_suppressed: true,
        };
    }

    Evaluation::no_action()
}

// ─── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn ts(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s)
            .expect("valid RFC3339")
            .with_timezone(&Utc)
    }

    fn t0() -> DateTime<Utc> {
        ts("2026-03-01T12:00:00Z")
    }

    fn state() -> MonitorState {
        MonitorState::new(TimeDelta::seconds(300), 3)
    }

    fn on_battery_reading(secs: i64, charge: f64, runtime: u64) -> UpsReading {
        UpsReading::ok(t0() + TimeDelta::seconds(secs), "OB DISCHRG")
            .with_battery(charge)
            .with_runtime(runtime)
    }

    /// Drive the state on battery with a stream of readings.
    fn on_battery_state(readings: &[UpsReading]) -> MonitorState {
        let mut st = state();
        for r in readings {
            st.apply(r);
        }
        assert_eq!(st.derived, DerivedState::OnBattery);
        st
    }

    // ── Purity ──────────────────────────────────────────────────

    #[test]
    fn identical_inputs_identical_output() {
        let reading = on_battery_reading(0, 19.0, 1200);
        let st = on_battery_state(std::slice::from_ref(&reading));
        let cfg = TriggerConfig::default();
        let a = evaluate(&reading, &st, &cfg, t0());
        let b = evaluate(&reading, &st, &cfg, t0());
        assert_eq!(a, b);
    }

    // ── Rule 1: FSD ─────────────────────────────────────────────

    #[test]
    fn fsd_fires_on_first_reading() {
        // High battery, online: FSD still wins.
        let reading = UpsReading::ok(t0(), "OL FSD")
            .with_battery(90.0)
            .with_runtime(1800);
        let st = state();
        let eval = evaluate(&reading, &st, &TriggerConfig::default(), t0());
        assert_eq!(eval.verdict, Verdict::Shutdown(ShutdownCause::Fsd));
    }

    #[test]
    fn fsd_beats_low_battery() {
        let reading = on_battery_reading(0, 5.0, 60);
        let mut fsd_reading = reading.clone();
        fsd_reading.flags.insert(StatusFlag::Fsd);
        let st = on_battery_state(std::slice::from_ref(&reading));
        let eval = evaluate(&fsd_reading, &st, &TriggerConfig::default(), t0());
        assert_eq!(eval.verdict, Verdict::Shutdown(ShutdownCause::Fsd));
    }

    #[test]
    fn fsd_ignored_on_unreachable_reading() {
        // A non-OK reading carries no flags by construction; this guards
        // the outcome gate itself.
        let reading = UpsReading::unreachable(t0());
        let st = state();
        let eval = evaluate(&reading, &st, &TriggerConfig::default(), t0());
        assert_eq!(eval.verdict, Verdict::NoAction);
    }

    // ── Rule 2: failsafe ────────────────────────────────────────

    #[test]
    fn failsafe_after_tolerance_crossed_on_battery() {
        let mut st = on_battery_state(&[on_battery_reading(0, 80.0, 1500)]);
        for i in 1..=4 {
            st.apply(&UpsReading::unreachable(t0() + TimeDelta::seconds(i)));
        }
        let reading = UpsReading::unreachable(t0() + TimeDelta::seconds(5));
        st.apply(&reading);
        let eval = evaluate(&reading, &st, &TriggerConfig::default(), t0() + TimeDelta::seconds(5));
        assert!(matches!(
            eval.verdict,
            Verdict::Shutdown(ShutdownCause::FailsafeConnectionLost { .. })
        ));
    }

    #[test]
    fn failsafe_not_at_tolerance_boundary() {
        // Exactly max_stale_tolerance failures: not yet.
        let mut st = on_battery_state(&[on_battery_reading(0, 80.0, 1500)]);
        for i in 1..=3 {
            st.apply(&UpsReading::unreachable(t0() + TimeDelta::seconds(i)));
        }
        assert_eq!(st.consecutive_stale, 3);
        let last = UpsReading::unreachable(t0() + TimeDelta::seconds(3));
        let eval = evaluate(&last, &st, &TriggerConfig::default(), t0() + TimeDelta::seconds(3));
        assert_eq!(eval.verdict, Verdict::NoAction);
    }

    #[test]
    fn no_failsafe_while_online() {
        let mut st = state();
        st.apply(
            &UpsReading::ok(t0(), "OL CHRG")
                .with_battery(100.0)
                .with_runtime(1800),
        );
        for i in 1..=10 {
            st.apply(&UpsReading::unreachable(t0() + TimeDelta::seconds(i)));
        }
        let last = UpsReading::unreachable(t0() + TimeDelta::seconds(10));
        let eval = evaluate(&last, &st, &TriggerConfig::default(), t0() + TimeDelta::seconds(10));
        assert_eq!(eval.verdict, Verdict::NoAction);
    }

    // ── Rule 3a/3b: low battery, critical runtime ───────────────

    #[test]
    fn low_battery_strictly_below_threshold() {
        let cfg = TriggerConfig::default();
        let at_threshold = on_battery_reading(0, 20.0, 1200);
        let st = on_battery_state(std::slice::from_ref(&at_threshold));
        let eval = evaluate(&at_threshold, &st, &cfg, t0());
        assert_eq!(eval.verdict, Verdict::NoAction, "equality must not fire");

        let below = on_battery_reading(1, 19.0, 1200);
        let eval = evaluate(&below, &st, &cfg, t0() + TimeDelta::seconds(1));
        assert!(matches!(
            eval.verdict,
            Verdict::Shutdown(ShutdownCause::LowBattery { charge, .. }) if charge == 19.0
        ));
    }

    #[test]
    fn critical_runtime_strictly_below_threshold() {
        let cfg = TriggerConfig::default();
        let at_threshold = on_battery_reading(0, 80.0, 600);
        let st = on_battery_state(std::slice::from_ref(&at_threshold));
        let eval = evaluate(&at_threshold, &st, &cfg, t0());
        assert_eq!(eval.verdict, Verdict::NoAction, "equality must not fire");

        let below = on_battery_reading(1, 80.0, 599);
        let eval = evaluate(&below, &st, &cfg, t0() + TimeDelta::seconds(1));
        assert!(matches!(
            eval.verdict,
            Verdict::Shutdown(ShutdownCause::CriticalRuntime { runtime: 599, .. })
        ));
    }

    #[test]
    fn no_trigger_while_online_even_below_thresholds() {
        let mut st = state();
        let reading = UpsReading::ok(t0(), "OL CHRG")
            .with_battery(10.0)
            .with_runtime(60);
        st.apply(&reading);
        let eval = evaluate(&reading, &st, &TriggerConfig::default(), t0());
        assert_eq!(eval.verdict, Verdict::NoAction);
    }

    // ── Rule 3c: depletion rate ─────────────────────────────────

    /// Readings draining ~54%/min at 1Hz, high battery/runtime so the
    /// simpler rules stay quiet (thresholds widened below).
    fn draining_cfg() -> TriggerConfig {
        TriggerConfig {
            low_battery_percent: 0.0,
            critical_runtime_s: 0,
            depletion: DepletionConfig {
                min_samples: 5,
                ..DepletionConfig::default()
            },
            ..TriggerConfig::default()
        }
    }

    fn draining_state(ticks: i64) -> (MonitorState, UpsReading) {
        let mut st = state();
        let mut last = on_battery_reading(0, 100.0, 1800);
        st.apply(&last);
        for i in 1..=ticks {
            last = on_battery_reading(i, 100.0 - i as f64 * 0.9, 1800);
            st.apply(&last);
        }
        (st, last)
    }

    #[test]
    fn depletion_suspended_during_grace() {
        let (st, last) = draining_state(10);
        // Rate is ~54%/min but only 10s on battery, well inside grace 90.
        let eval = evaluate(&last, &st, &draining_cfg(), last.fetched_at);
        assert_eq!(eval.verdict, Verdict::NoAction);
    }

    #[test]
    fn depletion_fires_after_grace() {
        let (st, last) = draining_state(95);
        let eval = evaluate(&last, &st, &draining_cfg(), last.fetched_at);
        assert!(matches!(
            eval.verdict,
            Verdict::Shutdown(ShutdownCause::DepletionRate { rate_pct_per_min, .. })
                if rate_pct_per_min > 15.0
        ));
    }

    #[test]
    fn depletion_needs_min_samples() {
        let (st, last) = draining_state(95);
        let cfg = TriggerConfig {
            depletion: DepletionConfig {
                min_samples: 500,
                ..DepletionConfig::default()
            },
            ..draining_cfg()
        };
        let eval = evaluate(&last, &st, &cfg, last.fetched_at);
        assert_eq!(eval.verdict, Verdict::NoAction);
    }

    #[test]
    fn gentle_drain_does_not_fire() {
        let mut st = state();
        let mut last = on_battery_reading(0, 100.0, 1800);
        st.apply(&last);
        // ~0.6%/min, far below the 15%/min threshold.
        for i in 1..=200 {
            last = on_battery_reading(i, 100.0 - i as f64 * 0.01, 1800);
            st.apply(&last);
        }
        let eval = evaluate(&last, &st, &draining_cfg(), last.fetched_at);
        assert_eq!(eval.verdict, Verdict::NoAction);
    }

    // ── Rule 3d: extended time ──────────────────────────────────

    #[test]
    fn extended_time_fires_past_threshold() {
        let first = on_battery_reading(0, 80.0, 1500);
        let st = on_battery_state(std::slice::from_ref(&first));
        let later = on_battery_reading(901, 79.0, 1490);
        let eval = evaluate(&later, &st, &TriggerConfig::default(), later.fetched_at);
        assert!(matches!(
            eval.verdict,
            Verdict::Shutdown(ShutdownCause::ExtendedTime { elapsed_secs: 901, .. })
        ));
    }

    #[test]
    fn extended_time_boundary_does_not_fire() {
        let first = on_battery_reading(0, 80.0, 1500);
        let st = on_battery_state(std::slice::from_ref(&first));
        let at = on_battery_reading(900, 79.0, 1490);
        let eval = evaluate(&at, &st, &TriggerConfig::default(), at.fetched_at);
        assert_eq!(eval.verdict, Verdict::NoAction);
    }

    #[test]
    fn extended_time_disabled_reports_suppression() {
        let cfg = TriggerConfig {
            extended_time: ExtendedTimeConfig {
                enabled: false,
                threshold_s: 900,
            },
            ..TriggerConfig::default()
        };
        let first = on_battery_reading(0, 80.0, 1500);
        let st = on_battery_state(std::slice::from_ref(&first));
        let later = on_battery_reading(901, 79.0, 1490);
        let eval = evaluate(&later, &st, &cfg, later.fetched_at);
        assert_eq!(eval.verdict, Verdict::NoAction);
        assert!(eval.extended_time_suppressed);
    }

    // ── Armed latch ─────────────────────────────────────────────

    #[test]
    fn armed_state_never_retriggers() {
        let reading = on_battery_reading(0, 5.0, 60);
        let mut st = on_battery_state(std::slice::from_ref(&reading));
        st.arm();
        let eval = evaluate(&reading, &st, &TriggerConfig::default(), t0());
        assert_eq!(eval.verdict, Verdict::NoAction);
    }

    // ── Config defaults ─────────────────────────────────────────

    #[test]
    fn default_thresholds_match_documented_values() {
        let cfg = TriggerConfig::default();
        assert_eq!(cfg.low_battery_percent, 20.0);
        assert_eq!(cfg.critical_runtime_s, 600);
        assert_eq!(cfg.depletion.window_s, 300);
        assert_eq!(cfg.depletion.critical_rate_pct_per_min, 15.0);
        assert_eq!(cfg.depletion.grace_s, 90);
        assert_eq!(cfg.depletion.min_samples, 30);
        assert!(cfg.extended_time.enabled);
        assert_eq!(cfg.extended_time.threshold_s, 900);
    }

    #[test]
    fn config_deserializes_with_partial_table() {
        let cfg: TriggerConfig = toml_like_json(r#"{"low_battery_percent": 25.0}"#);
        assert_eq!(cfg.low_battery_percent, 25.0);
        assert_eq!(cfg.critical_runtime_s, 600);
    }

    fn toml_like_json(json: &str) -> TriggerConfig {
        serde_json::from_str(json).expect("valid config json")
    }
}
