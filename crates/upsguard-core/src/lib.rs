//! upsguard-core: pure data model and decision logic.
//! UPS readings, monitor state machine, battery depletion history,
//! and the shutdown trigger evaluator. No IO, no async; all time
//! values are passed in as parameters.

pub mod history;
pub mod state;
pub mod triggers;
pub mod types;

pub use history::{BatteryHistory, BatterySample};
pub use state::{DerivedState, MonitorState};
pub use triggers::{
    DepletionConfig, Evaluation, ExtendedTimeConfig, TriggerConfig, Verdict, evaluate,
};
pub use types::{FetchOutcome, PowerEvent, ShutdownCause, StatusFlag, UpsReading, VoltageRegime};
