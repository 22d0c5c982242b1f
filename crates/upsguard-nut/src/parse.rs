//! `upsc` output parsing and reading classification.
//!
//! The tool prints one `key=value` pair per line. Unknown keys and
//! malformed lines are ignored; values are whitespace-trimmed.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use upsguard_core::types::UpsReading;

/// Recognized NUT variable names, in emission order.
const KEY_STATUS: &str = "ups.status";
const KEY_BATTERY_CHARGE: &str = "battery.charge";
const KEY_BATTERY_RUNTIME: &str = "battery.runtime";
const KEY_LOAD: &str = "ups.load";
const KEY_INPUT_VOLTAGE: &str = "input.voltage";
const KEY_NOMINAL_VOLTAGE: &str = "input.voltage.nominal";
const KEY_INPUT_FREQUENCY: &str = "input.frequency";
const KEY_OUTPUT_VOLTAGE: &str = "output.voltage";

/// Parse raw tool output into a key → value map.
pub fn parse_kv(output: &str) -> BTreeMap<String, String> {
    let mut vars = BTreeMap::new();
    for line in output.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        let value = value.trim();
        if key.is_empty() {
            continue;
        }
        vars.insert(key.to_string(), value.to_string());
    }
    vars
}

/// Build a classified reading from raw tool output.
///
/// Missing both `ups.status` and `battery.charge` means the server
/// answered with nothing usable: unreachable. A battery charge
/// without a status line is stale (the one field the state machine
/// requires is absent). Anything else is a fresh reading carrying
/// whichever numeric fields parsed.
pub fn build_reading(output: &str, fetched_at: DateTime<Utc>) -> UpsReading {
    let vars = parse_kv(output);

    let status = vars.get(KEY_STATUS);
    let charge = parse_f64(&vars, KEY_BATTERY_CHARGE);

    let Some(status) = status else {
        return if charge.is_some() {
            UpsReading::stale(fetched_at)
        } else {
            UpsReading::unreachable(fetched_at)
        };
    };

    let mut reading = UpsReading::ok(fetched_at, status);
    reading.battery_percent = charge.map(|v| v.clamp(0.0, 100.0));
    reading.runtime_seconds =
        parse_f64(&vars, KEY_BATTERY_RUNTIME).and_then(|v| (v >= 0.0).then_some(v as u64));
    reading.load_percent = parse_f64(&vars, KEY_LOAD).map(|v| v.clamp(0.0, 100.0));
    reading.input_voltage = parse_f64(&vars, KEY_INPUT_VOLTAGE);
    reading.output_voltage = parse_f64(&vars, KEY_OUTPUT_VOLTAGE);
    reading.input_frequency = parse_f64(&vars, KEY_INPUT_FREQUENCY);
    reading.nominal_voltage = parse_f64(&vars, KEY_NOMINAL_VOLTAGE);
    reading
}

/// Re-emit the recognized fields of a reading in `key=value` form.
/// Parsing the result yields an equivalent reading.
pub fn reading_to_kv(reading: &UpsReading) -> String {
    let mut lines = Vec::new();
    if let Some(status) = &reading.raw_status {
        lines.push(format!("{KEY_STATUS}={status}"));
    }
    push_f64(&mut lines, KEY_BATTERY_CHARGE, reading.battery_percent);
    if let Some(runtime) = reading.runtime_seconds {
        lines.push(format!("{KEY_BATTERY_RUNTIME}={runtime}"));
    }
    push_f64(&mut lines, KEY_LOAD, reading.load_percent);
    push_f64(&mut lines, KEY_INPUT_VOLTAGE, reading.input_voltage);
    push_f64(&mut lines, KEY_NOMINAL_VOLTAGE, reading.nominal_voltage);
    push_f64(&mut lines, KEY_INPUT_FREQUENCY, reading.input_frequency);
    push_f64(&mut lines, KEY_OUTPUT_VOLTAGE, reading.output_voltage);
    lines.join("\n")
}

fn parse_f64(vars: &BTreeMap<String, String>, key: &str) -> Option<f64> {
    vars.get(key).and_then(|v| v.parse::<f64>().ok())
}

fn push_f64(lines: &mut Vec<String>, key: &str, value: Option<f64>) {
    if let Some(v) = value {
        lines.push(format!("{key}={v}"));
    }
}

// ─── Tests ────────────────────────────────────────────────────────
