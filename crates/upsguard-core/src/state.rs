//! Monitor state machine: derived power state, stale accounting,
//! voltage-regime edge detection, and battery history maintenance.
//!
//! [`MonitorState::apply`] is the single entry point: one reading in,
//! zero or more edge events out. All time comes from the reading.

use std::collections::BTreeSet;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::history::BatteryHistory;
use crate::types::{FetchOutcome, PowerEvent, StatusFlag, UpsReading, VoltageRegime};

// ─── Derived State ────────────────────────────────────────────────

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DerivedState {
    #[default]
    Unknown,
    Online,
    OnBattery,
    ShutdownArmed,
}

impl DerivedState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Online => "online",
            Self::OnBattery => "on_battery",
            Self::ShutdownArmed => "shutdown_armed",
        }
    }
}

// ─── Numeric snapshot (identical-reading detection) ───────────────

/// The numeric fields of a reading, for frozen-data detection.
#[derive(Debug, Clone, PartialEq)]
struct NumericFields {
    battery_percent: Option<f64>,
    runtime_seconds: Option<u64>,
    load_percent: Option<f64>,
    input_voltage: Option<f64>,
    output_voltage: Option<f64>,
    input_frequency: Option<f64>,
}

impl NumericFields {
    fn of(reading: &UpsReading) -> Self {
        Self {
            battery_percent: reading.battery_percent,
            runtime_seconds: reading.runtime_seconds,
            load_percent: reading.load_percent,
            input_voltage: reading.input_voltage,
            output_voltage: reading.output_voltage,
            input_frequency: reading.input_frequency,
        }
    }

    fn is_missing(&self) -> bool {
        self.battery_percent.is_none()
            && self.runtime_seconds.is_none()
            && self.load_percent.is_none()
            && self.input_voltage.is_none()
            && self.output_voltage.is_none()
            && self.input_frequency.is_none()
    }
}

// ─── Monitor State ────────────────────────────────────────────────

/// Tracked monitor state. Owned exclusively by the main task.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorState {
    pub derived: DerivedState,
    pub on_battery_since: Option<DateTime<Utc>>,
    pub consecutive_stale: u32,
    pub history: BatteryHistory,
    pub last_flags: BTreeSet<StatusFlag>,
    pub last_regime: VoltageRegime,
    shutdown_armed: bool,
    max_stale_tolerance: u32,
    connection_lost: bool,
    last_numeric: Option<NumericFields>,
}

impl MonitorState {
    pub fn new(depletion_window: TimeDelta, max_stale_tolerance: u32) -> Self {
        Self {
            derived: DerivedState::Unknown,
            on_battery_since: None,
            consecutive_stale: 0,
            history: BatteryHistory::new(depletion_window),
            last_flags: BTreeSet::new(),
            last_regime: VoltageRegime::Normal,
            shutdown_armed: false,
            max_stale_tolerance,
            connection_lost: false,
            last_numeric: None,
        }
    }

    /// One-way latch set by the caller on a shutdown verdict.
    /// No further derived transitions occur once armed.
    pub fn arm(&mut self) {
        self.shutdown_armed = true;
        self.derived = DerivedState::ShutdownArmed;
    }

    pub fn is_armed(&self) -> bool {
        self.shutdown_armed
    }

    /// Whether the stale counter has crossed the tolerance (strictly).
    pub fn connection_lost(&self) -> bool {
        self.connection_lost
    }

    /// Apply one reading, returning the edge events it produced.
    pub fn apply(&mut self, reading: &UpsReading) -> Vec<PowerEvent> {
        let mut events = Vec::new();

        match reading.outcome {
            FetchOutcome::Stale | FetchOutcome::Unreachable => {
                self.bump_stale(&mut events);
                return events;
            }
            FetchOutcome::Ok => {}
        }

        // Frozen-data accounting: an OK reading whose numeric fields are
        // missing, or identical to the previous OK reading's, counts
        // toward the stale tolerance. Flag transitions still process so
        // an outage edge on frozen numerics is never missed.
        let numeric = NumericFields::of(reading);
        let frozen = numeric.is_missing()
            || self
                .last_numeric
                .as_ref()
                .is_some_and(|prev| *prev == numeric);
        if frozen {
            self.bump_stale(&mut events);
        } else {
            self.consecutive_stale = 0;
            if self.connection_lost {
                self.connection_lost = false;
                events.push(PowerEvent::ConnectionRestored);
            }
        }
        self.last_numeric = Some(numeric);

        self.apply_transition(reading, &mut events);

        if self.derived == DerivedState::OnBattery
            && let Some(percent) = reading.battery_percent
        {
            self.history.push(reading.fetched_at, percent);
        }

        let regime = VoltageRegime::classify(reading);
        if regime != self.last_regime {
            events.push(PowerEvent::RegimeChanged {
                from: self.last_regime,
                to: regime,
                input_voltage: reading.input_voltage,
            });
            self.last_regime = regime;
        }

        self.last_flags = reading.flags.clone();
        events
    }

    fn bump_stale(&mut self, events: &mut Vec<PowerEvent>) {
        self.consecutive_stale = self.consecutive_stale.saturating_add(1);
        if self.consecutive_stale > self.max_stale_tolerance && !self.connection_lost {
            self.connection_lost = true;
            events.push(PowerEvent::ConnectionLost {
                consecutive: self.consecutive_stale,
            });
        }
    }

    fn apply_transition(&mut self, reading: &UpsReading, events: &mut Vec<PowerEvent>) {
        let on_battery = reading.has(StatusFlag::Ob);
        let online = reading.has(StatusFlag::Ol) && !on_battery;

        match self.derived {
            DerivedState::Unknown => {
                if online {
                    self.derived = DerivedState::Online;
                } else {
                    self.enter_on_battery(reading, events);
                }
            }
            DerivedState::Online => {
                if on_battery {
                    self.enter_on_battery(reading, events);
                }
            }
            DerivedState::OnBattery => {
                if online {
                    let outage = self
                        .on_battery_since
                        .map(|since| reading.fetched_at - since)
                        .unwrap_or_else(TimeDelta::zero);
                    self.derived = DerivedState::Online;
                    self.on_battery_since = None;
                    self.history.clear();
                    events.push(PowerEvent::PowerRestored { outage });
                }
            }
            // Armed is terminal for derived transitions.
            DerivedState::ShutdownArmed => {}
        }
    }

    fn enter_on_battery(&mut self, reading: &UpsReading, events: &mut Vec<PowerEvent>) {
        self.derived = DerivedState::OnBattery;
        self.on_battery_since = Some(reading.fetched_at);
        self.history.clear();
        events.push(PowerEvent::OnBattery {
            charge: reading.battery_percent,
            runtime: reading.runtime_seconds,
            load: reading.load_percent,
        });
    }
}

// ─── Tests ────────────────────────────────────────────────────────
