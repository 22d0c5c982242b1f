use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

// ─── Status Flags ─────────────────────────────────────────────────

/// NUT `ups.status` tokens recognized by the decision logic.
///
/// Tokens outside this set are preserved verbatim on
/// [`UpsReading::raw_status`] and ignored everywhere else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StatusFlag {
    /// On line (utility power present).
    Ol,
    /// On battery.
    Ob,
    /// Charging.
    Chrg,
    /// Discharging.
    Dischrg,
    /// Low battery (UPS-asserted).
    Lb,
    /// High battery.
    Hb,
    /// Forced shutdown imminent.
    Fsd,
    /// Bypass active (battery out of circuit).
    Bypass,
    /// Overloaded.
    Over,
    /// Calibration in progress.
    Cal,
    /// AVR trimming (input voltage high).
    Trim,
    /// AVR boosting (input voltage low).
    Boost,
    /// Replace battery.
    Rb,
    /// Output off.
    Off,
}

impl StatusFlag {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ol => "OL",
            Self::Ob => "OB",
            Self::Chrg => "CHRG",
            Self::Dischrg => "DISCHRG",
            Self::Lb => "LB",
            Self::Hb => "HB",
            Self::Fsd => "FSD",
            Self::Bypass => "BYPASS",
            Self::Over => "OVER",
            Self::Cal => "CAL",
            Self::Trim => "TRIM",
            Self::Boost => "BOOST",
            Self::Rb => "RB",
            Self::Off => "OFF",
        }
    }

    /// Parse a single status token. Unknown tokens yield `None`.
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "OL" => Some(Self::Ol),
            "OB" => Some(Self::Ob),
            "CHRG" => Some(Self::Chrg),
            "DISCHRG" => Some(Self::Dischrg),
            "LB" => Some(Self::Lb),
            "HB" => Some(Self::Hb),
            "FSD" => Some(Self::Fsd),
            "BYPASS" => Some(Self::Bypass),
            "OVER" => Some(Self::Over),
            "CAL" => Some(Self::Cal),
            "TRIM" => Some(Self::Trim),
            "BOOST" => Some(Self::Boost),
            "RB" => Some(Self::Rb),
            "OFF" => Some(Self::Off),
            _ => None,
        }
    }
}

impl fmt::Display for StatusFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parse a space-separated `ups.status` value into the recognized flag set.
pub fn parse_status_flags(status: &str) -> BTreeSet<StatusFlag> {
    status
        .split_whitespace()
        .filter_map(StatusFlag::from_token)
        .collect()
}

// ─── Fetch Outcome ────────────────────────────────────────────────

/// Classification of a single poll attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchOutcome {
    /// Fresh reading with at least the status field.
    Ok,
    /// The tool returned output but it lacks required fields.
    Stale,
    /// The tool failed, timed out, or returned nothing.
    Unreachable,
}

// ─── UPS Reading ──────────────────────────────────────────────────

/// Typed snapshot produced by one poll of the NUT server.
///
/// A reading whose outcome is not [`FetchOutcome::Ok`] carries no
/// numeric fields; the [`UpsReading::unreachable`] and
/// [`UpsReading::stale`] constructors enforce this by construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpsReading {
    pub outcome: FetchOutcome,
    /// Recognized status tokens.
    pub flags: BTreeSet<StatusFlag>,
    /// Verbatim `ups.status` value, unknown tokens included.
    pub raw_status: Option<String>,
    pub battery_percent: Option<f64>,
    pub runtime_seconds: Option<u64>,
    pub load_percent: Option<f64>,
    pub input_voltage: Option<f64>,
    pub output_voltage: Option<f64>,
    pub input_frequency: Option<f64>,
    pub nominal_voltage: Option<f64>,
    pub fetched_at: DateTime<Utc>,
}

impl UpsReading {
    /// A fresh reading carrying the given status string (parsed into flags).
    pub fn ok(fetched_at: DateTime<Utc>, status: &str) -> Self {
        Self {
            outcome: FetchOutcome::Ok,
            flags: parse_status_flags(status),
            raw_status: Some(status.to_string()),
            battery_percent: None,
            runtime_seconds: None,
            load_percent: None,
            input_voltage: None,
            output_voltage: None,
            input_frequency: None,
            nominal_voltage: None,
            fetched_at,
        }
    }

    /// A reading for a poll whose output lacked required fields.
    pub fn stale(fetched_at: DateTime<Utc>) -> Self {
        Self {
            outcome: FetchOutcome::Stale,
            ..Self::empty(fetched_at)
        }
    }

    /// A reading for a failed, timed-out, or empty poll.
    pub fn unreachable(fetched_at: DateTime<Utc>) -> Self {
        Self {
            outcome: FetchOutcome::Unreachable,
            ..Self::empty(fetched_at)
        }
    }

    fn empty(fetched_at: DateTime<Utc>) -> Self {
        Self {
            outcome: FetchOutcome::Unreachable,
            flags: BTreeSet::new(),
            raw_status: None,
            battery_percent: None,
            runtime_seconds: None,
            load_percent: None,
            input_voltage: None,
            output_voltage: None,
            input_frequency: None,
            nominal_voltage: None,
            fetched_at,
        }
    }

    #[must_use]
    pub fn with_battery(mut self, percent: f64) -> Self {
        self.battery_percent = Some(percent);
        self
    }

    #[must_use]
    pub fn with_runtime(mut self, seconds: u64) -> Self {
        self.runtime_seconds = Some(seconds);
        self
    }

    #[must_use]
    pub fn with_load(mut self, percent: f64) -> Self {
        self.load_percent = Some(percent);
        self
    }

    #[must_use]
    pub fn with_input_voltage(mut self, volts: f64) -> Self {
        self.input_voltage = Some(volts);
        self
    }

    #[must_use]
    pub fn with_output_voltage(mut self, volts: f64) -> Self {
        self.output_voltage = Some(volts);
        self
    }

    #[must_use]
    pub fn with_input_frequency(mut self, hz: f64) -> Self {
        self.input_frequency = Some(hz);
        self
    }

    #[must_use]
    pub fn with_nominal_voltage(mut self, volts: f64) -> Self {
        self.nominal_voltage = Some(volts);
        self
    }

    pub fn has(&self, flag: StatusFlag) -> bool {
        self.flags.contains(&flag)
    }

    pub fn is_ok(&self) -> bool {
        self.outcome == FetchOutcome::Ok
    }
}

// ─── Voltage Regime ───────────────────────────────────────────────

/// Brownout threshold as a fraction of nominal input voltage.
pub const BROWNOUT_RATIO: f64 = 0.76;

/// Surge threshold as a fraction of nominal input voltage.
pub const SURGE_RATIO: f64 = 1.20;

/// Input power quality regime derived from one reading.
///
/// Flag-driven regimes take precedence over the voltage-derived ones;
/// without a nominal voltage the voltage rules are inert.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoltageRegime {
    #[default]
    Normal,
    Brownout,
    Surge,
    AvrBoost,
    AvrTrim,
    Bypass,
    Overload,
}

impl VoltageRegime {
    /// Classify the regime for a fresh reading.
    pub fn classify(reading: &UpsReading) -> Self {
        if reading.has(StatusFlag::Bypass) {
            return Self::Bypass;
        }
        if reading.has(StatusFlag::Over) {
            return Self::Overload;
        }
        if reading.has(StatusFlag::Boost) {
            return Self::AvrBoost;
        }
        if reading.has(StatusFlag::Trim) {
            return Self::AvrTrim;
        }
        if let (Some(input), Some(nominal)) = (reading.input_voltage, reading.nominal_voltage)
            && nominal > 0.0
        {
            if input < nominal * BROWNOUT_RATIO {
                return Self::Brownout;
            }
            if input > nominal * SURGE_RATIO {
                return Self::Surge;
            }
        }
        Self::Normal
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Brownout => "brownout",
            Self::Surge => "surge",
            Self::AvrBoost => "avr_boost",
            Self::AvrTrim => "avr_trim",
            Self::Bypass => "bypass",
            Self::Overload => "overload",
        }
    }
}

impl fmt::Display for VoltageRegime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Power Events ─────────────────────────────────────────────────

/// Edge events raised by the monitor state tracker.
#[derive(Debug, Clone, PartialEq)]
pub enum PowerEvent {
    /// Utility power lost; the UPS is carrying the load.
    OnBattery {
        charge: Option<f64>,
        runtime: Option<u64>,
        load: Option<f64>,
    },
    /// Utility power returned after an outage of the given duration.
    PowerRestored { outage: TimeDelta },
    /// Contact with the UPS lost past the stale tolerance.
    ConnectionLost { consecutive: u32 },
    /// A fresh reading arrived after a connection loss.
    ConnectionRestored,
    /// Input power quality regime changed (entry and exit both fire).
    RegimeChanged {
        from: VoltageRegime,
        to: VoltageRegime,
        input_voltage: Option<f64>,
    },
}

// ─── Shutdown Cause ───────────────────────────────────────────────

/// Why the shutdown sequence was started, with the triggering values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cause", rename_all = "snake_case")]
pub enum ShutdownCause {
    /// UPS-asserted forced shutdown flag.
    Fsd,
    LowBattery { charge: f64, threshold: f64 },
    CriticalRuntime { runtime: u64, threshold: u64 },
    DepletionRate { rate_pct_per_min: f64, threshold: f64, window_secs: i64 },
    ExtendedTime { elapsed_secs: i64, threshold_secs: u64 },
    FailsafeConnectionLost { consecutive: u32 },
}

impl ShutdownCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fsd => "FSD",
            Self::LowBattery { .. } => "LOW_BATTERY",
            Self::CriticalRuntime { .. } => "CRITICAL_RUNTIME",
            Self::DepletionRate { .. } => "DEPLETION_RATE",
            Self::ExtendedTime { .. } => "EXTENDED_TIME",
            Self::FailsafeConnectionLost { .. } => "FAILSAFE_CONNECTION_LOST",
        }
    }

    /// One-line operator-facing description with the triggering values.
    pub fn describe(&self) -> String {
        match self {
            Self::Fsd => "UPS asserted forced shutdown (FSD)".to_string(),
            Self::LowBattery { charge, threshold } => {
                format!("battery at {charge:.1}% (threshold {threshold:.1}%)")
            }
            Self::CriticalRuntime { runtime, threshold } => {
                format!("estimated runtime {runtime}s (threshold {threshold}s)")
            }
            Self::DepletionRate {
                rate_pct_per_min,
                threshold,
                window_secs,
            } => format!(
                "battery draining at {rate_pct_per_min:.1}%/min over {window_secs}s (threshold {threshold:.1}%/min)"
            ),
            Self::ExtendedTime {
                elapsed_secs,
                threshold_secs,
            } => format!("on battery for {elapsed_secs}s (threshold {threshold_secs}s)"),
            Self::FailsafeConnectionLost { consecutive } => {
                format!("lost contact with UPS while on battery ({consecutive} consecutive failed polls)")
            }
        }
    }
}

impl fmt::Display for ShutdownCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Tests ────────────────────────────────────────────────────────
