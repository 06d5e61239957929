//! Counter-to-rate conversion.
//!
//! Turns the current reading of a metric plus the previously persisted raw
//! value into the number that should be reported this cycle.

use crate::reading::{CacheEntry, MetricSpec, Reading};

/// Computes the value to report for `current`.
///
/// Gauges pass through unchanged. Counters need a previous sample and are
/// reported as a per-second rate; `None` means the metric is suppressed for
/// this cycle (first run, clock not advancing, or counter reset).
pub fn compute(spec: &MetricSpec, current: &Reading, previous: Option<&CacheEntry>) -> Option<f64> {
    if !spec.is_counter {
        return Some(current.value);
    }

    let previous = previous?;

    // A cache file can carry any timestamp; an overflowing span is no history.
    let dt = current.timestamp.checked_sub(previous.timestamp)?;
    if dt <= 0 {
        return None;
    }

    let dv = current.value - previous.value;
    // Negative deltas mean the monitored side restarted or the counter wrapped.
    if !dv.is_finite() || dv < 0.0 {
        return None;
    }

    Some(dv / dt as f64)
}
