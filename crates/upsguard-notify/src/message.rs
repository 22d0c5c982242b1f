//! Notification message shape.

use chrono::{DateTime, Utc};

/// Delivery priority tag. Crisis messages are the shutdown-sequence
/// narrative; the worker treats both the same (order is the contract).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    Info,
    Crisis,
}

/// One queued notification.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Monotonically increasing enqueue sequence number (FIFO key).
    pub seq: u64,
    pub priority: Priority,
    pub title: Option<String>,
    pub body: String,
    pub enqueued_at: DateTime<Utc>,
}
