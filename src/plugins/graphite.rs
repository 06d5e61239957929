//! Carbon cache and relay self-metrics, read back through graphite-web.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, trace};

use crate::error::{PluginError, Result};
use crate::graph::{Graph, GraphMetric};
use crate::plugin::Plugin;
use crate::reading::{Reading, Unit};
use crate::state_store::CacheKey;

const CACHE_PREFIX: &str = "graphite-carbon.cache";
const RELAY_PREFIX: &str = "graphite-carbon.relay";

// carbon.agents.<host>-<instance>.<metric> and .cache.<metric>
static CACHE_TARGET: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^carbon\.agents\..*-(.*?)\.(.*)$").expect("valid cache regex"));

// carbon.relays.<host>-<instance>.<metric> and .destinations.<dest>.<metric>
static RELAY_TARGET: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^carbon\.relays\..*-.*?\.(.*)$").expect("valid relay regex"));

const CACHE_METRICS: &[(&str, &str, Unit)] = &[
    ("avgUpdateTime", "Average Update Time", Unit::Float),
    ("committedPoints", "Committed Points", Unit::Integer),
    ("cpuUsage", "CPU Usage", Unit::Float),
    ("creates", "Creates", Unit::Integer),
    ("errors", "Errors", Unit::Integer),
    ("memUsage", "Memory Usage", Unit::Integer),
    ("metricsReceived", "Metrics Received", Unit::Integer),
    ("pointsPerUpdate", "Points Per Update", Unit::Float),
    ("updateOperations", "Update Operations", Unit::Integer),
    ("cache_overflow", "Overflow", Unit::Integer),
    ("cache_queries", "Queries", Unit::Integer),
    ("cache_queues", "Queues", Unit::Integer),
    ("cache_size", "Size", Unit::Integer),
];

const RELAY_METRICS: &[(&str, &str, Unit)] = &[
    ("cpuUsage", "CPU Usage", Unit::Float),
    ("memUsage", "Memory Usage", Unit::Integer),
    ("metricsRecieved", "Metrics Recieved", Unit::Integer),
    ("destinations_attemptedRelays", "Attempted Relays", Unit::Integer),
    ("destinations_queuedUntilConnected", "Queued Until Connected", Unit::Integer),
    ("destinations_queuedUntilReady", "Queued Until Ready", Unit::Integer),
    ("destinations_sent", "Sent", Unit::Integer),
];

/// Which carbon daemon is monitored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CarbonType {
    Cache,
    Relay,
}

impl CarbonType {
    pub fn as_str(self) -> &'static str {
        match self {
            CarbonType::Cache => "cache",
            CarbonType::Relay => "relay",
        }
    }
}

impl std::str::FromStr for CarbonType {
    type Err = PluginError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "cache" => Ok(CarbonType::Cache),
            "relay" => Ok(CarbonType::Relay),
            other => Err(PluginError::Config(format!(
                "unknown carbon type {:?} (expected cache or relay)",
                other
            ))),
        }
    }
}

/// One series of the render API response.
#[derive(Debug, Deserialize)]
struct Series {
    target: String,
    datapoints: Vec<(Option<f64>, f64)>,
}

/// Maps a render target to the reported metric name.
///
/// Returns `None` for targets that do not follow the carbon naming scheme.
pub fn metric_key(target: &str) -> Option<String> {
    if let Some(caps) = CACHE_TARGET.captures(target) {
        let instance = &caps[1];
        let metric = caps[2].replace('.', "_");
        return Some(format!("{}.{}.{}", CACHE_PREFIX, metric, instance));
    }

    let caps = RELAY_TARGET.captures(target)?;
    let rest = &caps[1];
    let parts: Vec<&str> = rest.split('.').collect();
    match parts.as_slice() {
        [metric] => Some(format!("{}.{}.{}", RELAY_PREFIX, metric, metric)),
        [_, dest, metric, ..] => Some(format!(
            "{}.destinations_{}.{}",
            RELAY_PREFIX,
            metric,
            dest.replace(':', "-")
        )),
        _ => None,
    }
}

/// Reads the hostname the kernel reports.
fn system_hostname() -> Result<String> {
    let name = std::fs::read_to_string("/proc/sys/kernel/hostname")
        .map(|s| s.trim().to_string())
        .ok()
        .filter(|s| !s.is_empty())
        .or_else(|| std::env::var("HOSTNAME").ok().filter(|s| !s.is_empty()));

    name.ok_or_else(|| PluginError::Config("cannot determine hostname, pass --host".to_string()))
}

pub struct GraphitePlugin {
    host: String,
    web_host: String,
    web_port: u16,
    carbon_type: CarbonType,
    instance: String,
    label_prefix: String,
    url: String,
    client: Client,
}

impl GraphitePlugin {
    pub fn new(
        host: Option<&str>,
        web_host: &str,
        web_port: u16,
        carbon_type: CarbonType,
        instance: Option<&str>,
        label_prefix: &str,
    ) -> Result<Self> {
        let host = match host.filter(|h| !h.is_empty()) {
            Some(h) => h.to_string(),
            None => system_hostname()?,
        }
        .replace('.', "_");

        let instance = match (carbon_type, instance.filter(|i| !i.is_empty())) {
            (CarbonType::Cache, None) => "*".to_string(),
            (CarbonType::Relay, None) | (CarbonType::Relay, Some("*")) => {
                return Err(PluginError::Config(
                    "a concrete instance name is required for carbon-relay".to_string(),
                ))
            }
            (_, Some(i)) => i.to_string(),
        };

        let targets = match carbon_type {
            CarbonType::Cache => format!(
                "target=carbon.agents.{h}-{i}.*&target=carbon.agents.{h}-{i}.*.*",
                h = host,
                i = instance
            ),
            CarbonType::Relay => format!(
                "target=carbon.relays.{h}-{i}.*&target=carbon.relays.{h}-{i}.destinations.*.*",
                h = host,
                i = instance
            ),
        };
        let url = format!(
            "http://{}:{}/render/?{}&from=-15min&format=json",
            web_host, web_port, targets
        );

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            host,
            web_host: web_host.to_string(),
            web_port,
            carbon_type,
            instance,
            label_prefix: label_prefix.to_string(),
            url,
            client,
        })
    }

    /// Render API URL queried on every fetch.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Replaces the render URL, keeping everything else.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    async fn fetch_series(&self) -> Result<Vec<Series>> {
        debug!("GET {}", self.url);
        let response = self.client.get(&self.url).send().await?.error_for_status()?;
        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

#[async_trait]
impl Plugin for GraphitePlugin {
    fn name(&self) -> &str {
        "graphite"
    }

    fn cache_key(&self) -> CacheKey {
        CacheKey::derive(
            "graphite",
            &[
                &self.host.to_lowercase(),
                &self.web_host.to_lowercase(),
                &self.web_port.to_string(),
                self.carbon_type.as_str(),
                &self.instance,
            ],
        )
    }

    fn graph_definition(&self) -> Vec<Graph> {
        let (prefix, table) = match self.carbon_type {
            CarbonType::Cache => (CACHE_PREFIX, CACHE_METRICS),
            CarbonType::Relay => (RELAY_PREFIX, RELAY_METRICS),
        };

        table
            .iter()
            .map(|(metric, label, unit)| {
                Graph::new(
                    format!("{}.{}", prefix, metric),
                    format!("{} {}", self.label_prefix, label),
                    *unit,
                )
                .metric(GraphMetric::new("*", *metric))
            })
            .collect()
    }

    /// Every non-null datapoint of the last 15 minutes becomes a reading,
    /// stamped with its own time.
    async fn fetch(&self, _now: i64) -> Result<Vec<Reading>> {
        let series = self.fetch_series().await?;
        let mut readings = Vec::new();

        for s in series {
            let Some(key) = metric_key(&s.target) else {
                trace!("Skipping target {}", s.target);
                continue;
            };
            readings.extend(
                s.datapoints
                    .iter()
                    .filter_map(|(value, ts)| value.map(|v| Reading::new(key.clone(), v, *ts as i64))),
            );
        }

        Ok(readings)
    }
}
