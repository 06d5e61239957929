//! Metric plugins for a monitoring agent.
//!
//! The agent runs a plugin binary once per polling interval and reads
//! `name\tvalue\ttimestamp` lines from its stdout. Many backends only expose
//! monotonically increasing counters, so this library keeps the raw values
//! of the previous invocation on disk and reports per-second rates instead.
//!
//! # Usage
//!
//! ```no_run
//! use metric_plugins::{Driver, Mode, StateStore};
//! use metric_plugins::plugins::MurmurPlugin;
//! use std::time::Duration;
//!
//! # async fn run() -> metric_plugins::Result<()> {
//! let plugin = MurmurPlugin::new("localhost", 64738, Duration::from_secs(1));
//! let driver = Driver::new(plugin, StateStore::new(std::env::temp_dir()));
//!
//! let mut out = Vec::new();
//! driver.run(Mode::Values, &mut out).await?;
//! print!("{}", String::from_utf8_lossy(&out));
//! # Ok(())
//! # }
//! ```

pub mod driver;
pub mod error;
pub mod graph;
pub mod output;
pub mod plugin;
pub mod plugins;
pub mod rate;
pub mod reading;
pub mod schedule;
pub mod state_store;

// Re-export main types for convenience
pub use driver::{Driver, Mode, RunSummary};
pub use error::{PluginError, Result, StoreError};
pub use graph::{Graph, GraphMetric};
pub use plugin::Plugin;
pub use reading::{CacheEntry, MetricSpec, Reading, Unit};
pub use schedule::{HourlyAt, RefreshSchedule};
pub use state_store::{CacheKey, StateStore};
