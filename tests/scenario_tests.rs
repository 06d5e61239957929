//! Integration tests for the differencing engine across invocations.
//!
//! Each "invocation" builds a fresh driver over the same cache directory,
//! the way the agent runs a new plugin process on every poll.

use async_trait::async_trait;
use metric_plugins::output::DEFINITIONS_HEADER;
use metric_plugins::{
    CacheKey, Driver, Graph, GraphMetric, MetricSpec, Mode, Plugin, Reading, Result, StateStore, Unit,
};
use std::collections::BTreeMap;
use std::path::Path;
use tempfile::tempdir;

/// Reports a single `bytesSent` counter with a fixed value.
struct TrafficPlugin {
    value: f64,
}

#[async_trait]
impl Plugin for TrafficPlugin {
    fn name(&self) -> &str {
        "traffic"
    }

    fn cache_key(&self) -> CacheKey {
        CacheKey::derive("traffic", &["eth0"])
    }

    fn graph_definition(&self) -> Vec<Graph> {
        vec![Graph::new("traffic", "Traffic", Unit::Integer).metric(GraphMetric::new("bytesSent", "Sent").diff())]
    }

    fn metric_specs(&self) -> Vec<MetricSpec> {
        vec![MetricSpec::counter("bytesSent", "Sent", Unit::Integer)]
    }

    async fn fetch(&self, now: i64) -> Result<Vec<Reading>> {
        Ok(vec![Reading::new("bytesSent", self.value, now)])
    }
}

async fn invoke(dir: &Path, mode: Mode, value: f64, now: i64) -> String {
    let driver = Driver::new(TrafficPlugin { value }, StateStore::new(dir));
    let mut out = Vec::new();
    driver.run_at(mode, now, &mut out).await.unwrap();
    String::from_utf8(out).unwrap()
}

fn cached(dir: &Path) -> Option<(f64, i64)> {
    let store = StateStore::new(dir);
    let (entries, found) = store.load(&CacheKey::derive("traffic", &["eth0"]));
    if !found {
        return None;
    }
    entries.get("bytesSent").map(|e| (e.value, e.timestamp))
}

#[tokio::test]
async fn test_first_run_second_run_and_reset() {
    let dir = tempdir().unwrap();

    // First-ever run: no baseline, nothing printed.
    let out = invoke(dir.path(), Mode::Values, 1000.0, 1000).await;
    assert_eq!(out, "");
    assert_eq!(cached(dir.path()), Some((1000.0, 1000)));

    // 600 bytes in 60 seconds.
    let out = invoke(dir.path(), Mode::Values, 1600.0, 1060).await;
    assert_eq!(out, "bytesSent\t10\t1060\n");
    assert_eq!(cached(dir.path()), Some((1600.0, 1060)));

    // Counter reset: suppressed, but becomes the new baseline.
    let out = invoke(dir.path(), Mode::Values, 400.0, 1120).await;
    assert_eq!(out, "");
    assert_eq!(cached(dir.path()), Some((400.0, 1120)));

    let out = invoke(dir.path(), Mode::Values, 1000.0, 1180).await;
    assert_eq!(out, "bytesSent\t10\t1180\n");
}

#[tokio::test]
async fn test_definitions_mode_touches_no_cache() {
    let dir = tempdir().unwrap();

    let out = invoke(dir.path(), Mode::Definitions, 1000.0, 1000).await;
    let mut lines = out.lines();
    assert_eq!(lines.next(), Some(DEFINITIONS_HEADER));

    let doc: serde_json::Value = serde_json::from_str(lines.next().unwrap()).unwrap();
    assert_eq!(doc["graphs"]["traffic"]["label"], "Traffic");
    assert_eq!(doc["graphs"]["traffic"]["unit"], "integer");
    assert_eq!(doc["graphs"]["traffic"]["metrics"][0]["name"], "bytesSent");
    assert_eq!(lines.next(), None);

    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_same_second_rerun_is_suppressed() {
    let dir = tempdir().unwrap();
    invoke(dir.path(), Mode::Values, 1000.0, 1000).await;

    let out = invoke(dir.path(), Mode::Values, 1200.0, 1000).await;
    assert_eq!(out, "");
    assert_eq!(cached(dir.path()), Some((1200.0, 1000)));
}

#[tokio::test]
async fn test_corrupt_cache_is_treated_as_first_run() {
    let dir = tempdir().unwrap();
    let store = StateStore::new(dir.path());
    let path = store.path_for(&CacheKey::derive("traffic", &["eth0"]));
    std::fs::write(&path, b"{\"version\":1,\"entries\":").unwrap();

    let out = invoke(dir.path(), Mode::Values, 1000.0, 1000).await;
    assert_eq!(out, "");
    assert_eq!(cached(dir.path()), Some((1000.0, 1000)));
}

#[tokio::test]
async fn test_out_of_range_cached_timestamp_is_treated_as_no_history() {
    let dir = tempdir().unwrap();
    let store = StateStore::new(dir.path());
    let path = store.path_for(&CacheKey::derive("traffic", &["eth0"]));
    std::fs::write(
        &path,
        br#"{"version":1,"entries":{"bytesSent":{"name":"bytesSent","value":1000.0,"timestamp":-9223372036854775808}}}"#,
    )
    .unwrap();

    let out = invoke(dir.path(), Mode::Values, 1600.0, 1060).await;
    assert_eq!(out, "");
    assert_eq!(cached(dir.path()), Some((1600.0, 1060)));

    let out = invoke(dir.path(), Mode::Values, 2200.0, 1120).await;
    assert_eq!(out, "bytesSent\t10\t1120\n");
}

#[test]
fn test_concurrent_saves_leave_one_complete_set() {
    let dir = tempdir().unwrap();
    let store = StateStore::new(dir.path());
    let key = CacheKey::derive("traffic", &["eth0"]);

    std::thread::scope(|s| {
        for writer in 0..8 {
            let store = store.clone();
            let key = key.clone();
            s.spawn(move || {
                for round in 0..20 {
                    let mut set = BTreeMap::new();
                    for metric in 0..5 {
                        let name = format!("m{}", metric);
                        set.insert(
                            name.clone(),
                            metric_plugins::CacheEntry {
                                name,
                                value: writer as f64,
                                timestamp: round,
                            },
                        );
                    }
                    store.save(&key, &set).unwrap();
                }
            });
        }
    });

    let (entries, found) = store.load(&key);
    assert!(found);
    assert_eq!(entries.len(), 5);
    // All entries come from the same writer.
    let writer = entries["m0"].value;
    assert!(entries.values().all(|e| e.value == writer));

    // No temporary files are left behind.
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
}
