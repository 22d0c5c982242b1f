//! Atomic state-file persistence and sentinel inspection.
//!
//! The state file is rewritten on every tick (temp file + rename in
//! the same directory) so readers always see a complete document.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;

use upsguard_core::state::{DerivedState, MonitorState};
use upsguard_core::types::{FetchOutcome, UpsReading};

/// Point-in-time snapshot exposed to operators.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateSnapshot {
    pub status: String,
    pub derived: DerivedState,
    pub outcome: FetchOutcome,
    pub battery_percent: Option<f64>,
    pub runtime_seconds: Option<u64>,
    pub load_percent: Option<f64>,
    pub input_voltage: Option<f64>,
    pub output_voltage: Option<f64>,
    pub consecutive_stale: u32,
    pub updated_at: DateTime<Utc>,
}

impl StateSnapshot {
    pub fn from_tick(reading: &UpsReading, state: &MonitorState) -> Self {
        let status = match reading.outcome {
            FetchOutcome::Ok => reading.raw_status.clone().unwrap_or_default(),
            FetchOutcome::Stale => "STALE".to_string(),
            FetchOutcome::Unreachable => "UNREACHABLE".to_string(),
        };
        Self {
            status,
            derived: state.derived,
            outcome: reading.outcome,
            battery_percent: reading.battery_percent,
            runtime_seconds: reading.runtime_seconds,
            load_percent: reading.load_percent,
            input_voltage: reading.input_voltage,
            output_voltage: reading.output_voltage,
            consecutive_stale: state.consecutive_stale,
            updated_at: reading.fetched_at,
        }
    }
}

/// Serialize and atomically replace the state file.
pub fn write_atomic(path: &Path, snapshot: &StateSnapshot) -> std::io::Result<()> {
    let json = serde_json::to_string_pretty(snapshot)?;
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path)
}

/// Contents of a leftover shutdown marker, if one exists. Presence
/// means a previous run armed a shutdown that did not complete.
pub fn leftover_sentinel(path: &Path) -> Option<String> {
    match std::fs::read_to_string(path) {
        Ok(contents) => Some(contents),
        Err(_) => None,
    }
}

// ─── Tests ────────────────────────────────────────────────────────
