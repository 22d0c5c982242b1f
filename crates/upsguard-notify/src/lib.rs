//! upsguard-notify: non-blocking notification delivery.
//! Producers enqueue onto an unbounded channel; a dedicated worker
//! task delivers in strict FIFO order with persistent retry, so the
//! critical path never waits on the network.

pub mod message;
pub mod sink;
pub mod worker;

pub use message::{Message, Priority};
pub use sink::{AppriseSink, NotifyConfig, NotifySink};
pub use worker::{Notifier, NotifyService};
