//! One invocation of a plugin: fetch, difference against the previous run,
//! persist, print.

use std::io::Write;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{PluginError, Result};
use crate::output::{write_definitions, write_values, OutputValue};
use crate::plugin::Plugin;
use crate::rate;
use crate::reading::{CacheEntry, MetricSpec, Reading};
use crate::state_store::{CacheSet, StateStore};

/// Environment variable the agent sets when it wants graph definitions.
pub const DEFAULT_META_ENV: &str = "MACKEREL_AGENT_PLUGIN_META";

/// Default upper bound for a single fetch.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// What the agent asked for on this invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Definitions,
    Values,
}

impl Mode {
    /// Definitions mode when `var` is set to a non-empty value.
    pub fn from_env(var: &str) -> Self {
        match std::env::var_os(var) {
            Some(v) if !v.is_empty() => Mode::Definitions,
            _ => Mode::Values,
        }
    }
}

/// Summary of a values-mode run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub emitted: usize,
    pub suppressed: usize,
    pub unmatched: usize,
    pub history_found: bool,
    pub cache_saved: bool,
}

/// Drives a single plugin through one invocation.
pub struct Driver<P: Plugin> {
    plugin: P,
    store: StateStore,
    timeout: Duration,
}

impl<P: Plugin> Driver<P> {
    pub fn new(plugin: P, store: StateStore) -> Self {
        Self {
            plugin,
            store,
            timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn plugin(&self) -> &P {
        &self.plugin
    }

    /// Runs in `mode` using the current wall clock.
    pub async fn run<W: Write>(&self, mode: Mode, out: &mut W) -> Result<RunSummary> {
        self.run_at(mode, chrono::Utc::now().timestamp(), out).await
    }

    /// Runs in `mode` as if the current time were `now`.
    pub async fn run_at<W: Write>(&self, mode: Mode, now: i64, out: &mut W) -> Result<RunSummary> {
        match mode {
            Mode::Definitions => {
                write_definitions(out, &self.plugin.graph_definition())?;
                Ok(RunSummary::default())
            }
            Mode::Values => {
                let (values, summary) = self.collect(now).await?;
                write_values(out, &values)?;
                Ok(summary)
            }
        }
    }

    /// Fetches readings and turns them into printable values.
    ///
    /// The cache is updated with the raw counter readings even when a rate
    /// could not be computed, so the next run has a baseline.
    pub async fn collect(&self, now: i64) -> Result<(Vec<OutputValue>, RunSummary)> {
        let mut readings = tokio::time::timeout(self.timeout, self.plugin.fetch(now))
            .await
            .map_err(|_| PluginError::Timeout(self.timeout))??;
        debug!("{}: fetched {} readings", self.plugin.name(), readings.len());

        let specs = self.plugin.metric_specs();
        let key = self.plugin.cache_key();
        let (previous, history_found) = self.store.load(&key);

        // Oldest first, so readings of one batch can be differenced in order.
        readings.sort_by(|a, b| a.name.cmp(&b.name).then(a.timestamp.cmp(&b.timestamp)));

        let mut summary = RunSummary {
            history_found,
            ..RunSummary::default()
        };
        let mut values = Vec::with_capacity(readings.len());
        let mut current = CacheSet::new();

        for reading in &readings {
            let Some(spec) = find_spec(&specs, reading) else {
                debug!("{}: no metric declared for {}", self.plugin.name(), reading.name);
                summary.unmatched += 1;
                continue;
            };

            let baseline = current
                .get(&reading.name)
                .or_else(|| previous.get(&reading.name));

            match rate::compute(spec, reading, baseline) {
                Some(value) => {
                    values.push(OutputValue {
                        name: reading.name.clone(),
                        value,
                        timestamp: reading.timestamp,
                        unit: spec.unit,
                    });
                    summary.emitted += 1;
                }
                None => {
                    debug!("{}: suppressed {} this cycle", self.plugin.name(), reading.name);
                    summary.suppressed += 1;
                }
            }

            if spec.is_counter {
                current.insert(reading.name.clone(), CacheEntry::from(reading));
            }
        }

        if specs.iter().any(|s| s.is_counter) {
            match self.store.save(&key, &current) {
                Ok(()) => summary.cache_saved = true,
                Err(e) => warn!("{}: {} (values of this run are still reported)", self.plugin.name(), e),
            }
        }

        info!(
            "{}: {} values emitted, {} suppressed, {} unmatched",
            self.plugin.name(),
            summary.emitted,
            summary.suppressed,
            summary.unmatched
        );

        Ok((values, summary))
    }
}

fn find_spec<'a>(specs: &'a [MetricSpec], reading: &Reading) -> Option<&'a MetricSpec> {
    specs.iter().find(|s| s.matches(&reading.name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Graph, GraphMetric};
    use crate::reading::Unit;
    use crate::state_store::CacheKey;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::tempdir;

    /// Plugin returning canned readings, one batch per call.
    struct CannedPlugin {
        batches: Mutex<Vec<Vec<Reading>>>,
    }

    impl CannedPlugin {
        fn new(batches: Vec<Vec<Reading>>) -> Self {
            Self {
                batches: Mutex::new(batches),
            }
        }
    }

    #[async_trait]
    impl Plugin for CannedPlugin {
        fn name(&self) -> &str {
            "canned"
        }

        fn cache_key(&self) -> CacheKey {
            CacheKey::derive("canned", &[])
        }

        fn graph_definition(&self) -> Vec<Graph> {
            vec![
                Graph::new("dom.traffic.#", "Traffic", Unit::Bytes)
                    .metric(GraphMetric::new("tx", "tx").diff()),
                Graph::new("dom.load", "Load", Unit::Float).metric(GraphMetric::new("avg", "avg")),
            ]
        }

        async fn fetch(&self, _now: i64) -> Result<Vec<Reading>> {
            let mut batches = self.batches.lock().unwrap();
            if batches.is_empty() {
                return Err(PluginError::Fetch("no more batches".to_string()));
            }
            Ok(batches.remove(0))
        }
    }

    struct SlowPlugin;

    #[async_trait]
    impl Plugin for SlowPlugin {
        fn name(&self) -> &str {
            "slow"
        }

        fn cache_key(&self) -> CacheKey {
            CacheKey::derive("slow", &[])
        }

        fn graph_definition(&self) -> Vec<Graph> {
            Vec::new()
        }

        async fn fetch(&self, _now: i64) -> Result<Vec<Reading>> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_wildcard_counters_and_gauges() {
        let dir = tempdir().unwrap();
        let plugin = CannedPlugin::new(vec![
            vec![
                Reading::new("dom.traffic.web1.tx", 100.0, 100),
                Reading::new("dom.load.avg", 0.5, 100),
            ],
            vec![
                Reading::new("dom.traffic.web1.tx", 700.0, 160),
                Reading::new("dom.traffic.web2.tx", 10.0, 160),
                Reading::new("dom.load.avg", 0.75, 160),
                Reading::new("unknown.metric", 1.0, 160),
            ],
        ]);
        let driver = Driver::new(plugin, StateStore::new(dir.path()));

        let mut first = Vec::new();
        let summary = driver.run_at(Mode::Values, 100, &mut first).await.unwrap();
        assert_eq!(String::from_utf8(first).unwrap(), "dom.load.avg\t0.500000\t100\n");
        assert_eq!(summary.suppressed, 1);
        assert!(!summary.history_found);
        assert!(summary.cache_saved);

        let mut second = Vec::new();
        let summary = driver.run_at(Mode::Values, 160, &mut second).await.unwrap();
        assert_eq!(
            String::from_utf8(second).unwrap(),
            "dom.load.avg\t0.750000\t160\ndom.traffic.web1.tx\t10\t160\n"
        );
        assert_eq!(summary.emitted, 2);
        assert_eq!(summary.suppressed, 1);
        assert_eq!(summary.unmatched, 1);
        assert!(summary.history_found);
    }

    #[tokio::test]
    async fn test_readings_within_one_batch_are_differenced_in_order() {
        let dir = tempdir().unwrap();
        let plugin = CannedPlugin::new(vec![vec![
            Reading::new("dom.traffic.a.tx", 300.0, 20),
            Reading::new("dom.traffic.a.tx", 100.0, 10),
        ]]);
        let driver = Driver::new(plugin, StateStore::new(dir.path()));

        let (values, _) = driver.collect(20).await.unwrap();
        assert_eq!(values.len(), 1);
        assert_eq!(values[0].value, 20.0);
        assert_eq!(values[0].timestamp, 20);

        let (cached, _) = driver.store.load(&driver.plugin().cache_key());
        assert_eq!(cached["dom.traffic.a.tx"].value, 300.0);
    }

    #[tokio::test]
    async fn test_fetch_failure_prints_nothing() {
        let dir = tempdir().unwrap();
        let driver = Driver::new(CannedPlugin::new(Vec::new()), StateStore::new(dir.path()));

        let mut out = Vec::new();
        let result = driver.run_at(Mode::Values, 100, &mut out).await;
        assert!(matches!(result, Err(PluginError::Fetch(_))));
        assert!(out.is_empty());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_slow_fetch_times_out() {
        let dir = tempdir().unwrap();
        let driver = Driver::new(SlowPlugin, StateStore::new(dir.path()))
            .with_timeout(Duration::from_millis(50));

        let mut out = Vec::new();
        let result = driver.run_at(Mode::Values, 100, &mut out).await;
        assert!(matches!(result, Err(PluginError::Timeout(_))));
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_unwritable_cache_does_not_fail_the_run() {
        let dir = tempdir().unwrap();
        // A regular file where the cache directory should be.
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"").unwrap();
        let store = StateStore::new(blocker.join("cache"));
        let plugin = CannedPlugin::new(vec![vec![Reading::new("dom.load.avg", 1.0, 5)]]);
        let driver = Driver::new(plugin, store);

        let mut out = Vec::new();
        let summary = driver.run_at(Mode::Values, 5, &mut out).await.unwrap();
        assert!(!summary.cache_saved);
        assert_eq!(String::from_utf8(out).unwrap(), "dom.load.avg\t1.000000\t5\n");
    }

    #[test]
    fn test_mode_from_env() {
        let var = "METRIC_PLUGINS_TEST_MODE_FROM_ENV";
        std::env::remove_var(var);
        assert_eq!(Mode::from_env(var), Mode::Values);
        std::env::set_var(var, "");
        assert_eq!(Mode::from_env(var), Mode::Values);
        std::env::set_var(var, "1");
        assert_eq!(Mode::from_env(var), Mode::Definitions);
        std::env::remove_var(var);
    }
}
