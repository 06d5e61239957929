//! The contract every backend implements.

use async_trait::async_trait;

use crate::error::Result;
use crate::graph::Graph;
use crate::reading::{MetricSpec, Reading};
use crate::state_store::CacheKey;

/// A metric source the driver can poll.
///
/// Implementations only know how to talk to their backend; persistence,
/// rate conversion and output are handled by [`crate::driver::Driver`].
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Short plugin name, used in logs.
    fn name(&self) -> &str;

    /// Identifies this configured instance for the state store.
    fn cache_key(&self) -> CacheKey;

    /// Static graph metadata for definitions mode.
    fn graph_definition(&self) -> Vec<Graph>;

    /// Metric declarations used to classify readings.
    ///
    /// Defaults to the metrics of [`Plugin::graph_definition`], each named
    /// `<graph-key>.<metric-name>`.
    fn metric_specs(&self) -> Vec<MetricSpec> {
        self.graph_definition()
            .iter()
            .flat_map(|g| g.metric_specs())
            .collect()
    }

    /// Returns all current readings, or fails as a whole.
    ///
    /// `now` is the invocation timestamp; plugins stamp their readings with
    /// it unless the backend reports its own observation times.
    async fn fetch(&self, now: i64) -> Result<Vec<Reading>>;
}
