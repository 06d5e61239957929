//! Data model for point-in-time readings and their persisted form.
//!
//! A `Reading` is what a plugin observes on one invocation, a `MetricSpec`
//! is the static declaration of how a metric is reported, and a `CacheEntry`
//! is the raw counter value kept on disk for the next invocation.

use serde::{Deserialize, Serialize};

/// Display unit of a graph, as understood by the monitoring agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Unit {
    Integer,
    Float,
    Percentage,
    Bytes,
    /// Rendered as `bytes/sec` in graph definitions. Printed with decimals.
    #[serde(rename = "bytes/sec")]
    BytesPerSecond,
    Iops,
}

impl Unit {
    /// Integral units are printed truncated, without decimals.
    pub fn is_integral(self) -> bool {
        matches!(self, Unit::Integer | Unit::Bytes | Unit::Iops)
    }
}

/// A single observation produced by a plugin fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub name: String,
    pub value: f64,
    /// Unix timestamp in seconds.
    pub timestamp: i64,
}

impl Reading {
    pub fn new(name: impl Into<String>, value: f64, timestamp: i64) -> Self {
        Self {
            name: name.into(),
            value,
            timestamp,
        }
    }
}

/// Static declaration of one reported metric (or a wildcard family).
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSpec {
    /// Full metric name; `#` and `*` segments match any single segment.
    pub name: String,
    /// Counters are converted to per-second rates.
    pub is_counter: bool,
    pub label: String,
    pub unit: Unit,
}

impl MetricSpec {
    pub fn gauge(name: impl Into<String>, label: impl Into<String>, unit: Unit) -> Self {
        Self {
            name: name.into(),
            is_counter: false,
            label: label.into(),
            unit,
        }
    }

    pub fn counter(name: impl Into<String>, label: impl Into<String>, unit: Unit) -> Self {
        Self {
            name: name.into(),
            is_counter: true,
            label: label.into(),
            unit,
        }
    }

    /// Returns true if `metric` is covered by this spec.
    ///
    /// Names are compared segment by segment on `.`; a wildcard segment
    /// matches exactly one non-empty segment.
    pub fn matches(&self, metric: &str) -> bool {
        let mut pattern = self.name.split('.');
        let mut candidate = metric.split('.');
        loop {
            match (pattern.next(), candidate.next()) {
                (None, None) => return true,
                (Some(p), Some(c)) => {
                    let wildcard = p == "#" || p == "*";
                    if c.is_empty() || !(wildcard || p == c) {
                        return false;
                    }
                }
                _ => return false,
            }
        }
    }
}

/// Persisted raw value of a counter metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub name: String,
    pub value: f64,
    pub timestamp: i64,
}

impl From<&Reading> for CacheEntry {
    fn from(reading: &Reading) -> Self {
        Self {
            name: reading.name.clone(),
            value: reading.value,
            timestamp: reading.timestamp,
        }
    }
}
