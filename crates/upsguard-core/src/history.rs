//! Rolling battery-percentage history for depletion-rate estimation.
//!
//! Samples are bounded by wall-clock span: anything older than the
//! configured window is evicted from the front on insertion.

use std::collections::VecDeque;

use chrono::{DateTime, TimeDelta, Utc};

/// One `(timestamp, battery percent)` observation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatterySample {
    pub at: DateTime<Utc>,
    pub percent: f64,
}

/// Time-ordered battery history bounded by a wall-clock window.
#[derive(Debug, Clone, PartialEq)]
pub struct BatteryHistory {
    samples: VecDeque<BatterySample>,
    window: TimeDelta,
}

impl BatteryHistory {
    pub fn new(window: TimeDelta) -> Self {
        Self {
            samples: VecDeque::new(),
            window,
        }
    }

    /// Append a sample and evict everything older than the window.
    ///
    /// Samples must arrive in time order; a sample not strictly newer
    /// than the last one is dropped to keep the history ordered.
    /// Returns whether the sample was recorded.
    pub fn push(&mut self, at: DateTime<Utc>, percent: f64) -> bool {
        if let Some(last) = self.samples.back()
            && at <= last.at
        {
            return false;
        }
        self.samples.push_back(BatterySample { at, percent });
        let cutoff = at - self.window;
        while let Some(front) = self.samples.front() {
            if front.at >= cutoff {
                break;
            }
            self.samples.pop_front();
        }
        true
    }

    /// Observed depletion rate in percent per minute, positive while
    /// draining. `None` with fewer than two samples or a zero span.
    pub fn rate_pct_per_min(&self) -> Option<f64> {
        let oldest = self.samples.front()?;
        let newest = self.samples.back()?;
        let span_secs = (newest.at - oldest.at).num_milliseconds() as f64 / 1000.0;
        if span_secs <= 0.0 {
            return None;
        }
        Some((oldest.percent - newest.percent) / span_secs * 60.0)
    }

    /// Wall-clock span covered by the current samples.
    pub fn span(&self) -> TimeDelta {
        match (self.samples.front(), self.samples.back()) {
            (Some(oldest), Some(newest)) => newest.at - oldest.at,
            _ => TimeDelta::zero(),
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn newest(&self) -> Option<&BatterySample> {
        self.samples.back()
    }
}

// ─── Tests ────────────────────────────────────────────────────────
