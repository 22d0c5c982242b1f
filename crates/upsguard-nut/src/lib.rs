//! upsguard-nut: NUT client IO boundary.
//! Provides the `upsc` subprocess executor, key=value output parsing,
//! and the never-failing poller that classifies each poll as
//! fresh/stale/unreachable. No business logic.

pub mod error;
pub mod executor;
pub mod parse;
pub mod poller;

pub use error::NutError;
pub use executor::{UpscExecutor, UpscRunner};
pub use parse::{build_reading, parse_kv, reading_to_kv};
pub use poller::{NutPoller, POLL_DEADLINE_MARGIN};
