//! AWS estimated charges from CloudWatch.
//!
//! Billing data only changes a few times a day, so CloudWatch is queried on
//! a schedule (see [`crate::schedule`]) and the result is kept in a snapshot
//! file next to the cache. Every invocation reports the snapshot.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::sigv4::{self, CanonicalRequest, Credentials};
use crate::error::{PluginError, Result};
use crate::graph::{Graph, GraphMetric};
use crate::plugin::Plugin;
use crate::reading::{Reading, Unit};
use crate::state_store::{write_atomic, CacheKey, StateStore};

pub const DEFAULT_REGION: &str = "us-east-1";
pub const DEFAULT_CURRENCY: &str = "USD";

const SERVICE: &str = "monitoring";
const TARGET_PREFIX: &str = "GraniteServiceVersion20100801";
const CONTENT_TYPE: &str = "application/x-amz-json-1.0";
const NAMESPACE: &str = "AWS/Billing";
const METRIC_NAME: &str = "EstimatedCharges";
const ALL_SERVICES: &str = "All";

/// Latest charge per service name, as stored between refreshes.
pub type Snapshot = BTreeMap<String, f64>;

#[derive(Debug, Serialize, Deserialize)]
struct Dimension {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Value")]
    value: String,
}

#[derive(Debug, Deserialize)]
struct Datapoint {
    #[serde(rename = "Timestamp")]
    timestamp: f64,
    #[serde(rename = "Maximum")]
    maximum: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct GetMetricStatisticsOutput {
    #[serde(rename = "Datapoints", default)]
    datapoints: Vec<Datapoint>,
}

#[derive(Debug, Deserialize)]
struct MetricDescriptor {
    #[serde(rename = "Dimensions", default)]
    dimensions: Vec<Dimension>,
}

#[derive(Debug, Deserialize)]
struct ListMetricsOutput {
    #[serde(rename = "Metrics", default)]
    metrics: Vec<MetricDescriptor>,
    #[serde(rename = "NextToken")]
    next_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(rename = "__type", default)]
    kind: String,
    #[serde(alias = "Message", default)]
    message: String,
}

/// Minimal CloudWatch client speaking the JSON 1.0 protocol.
pub struct CloudWatch {
    http: Client,
    url: Url,
    host: String,
    region: String,
    credentials: Credentials,
}

impl CloudWatch {
    pub fn new(region: &str, credentials: Credentials) -> Result<Self> {
        Self::with_endpoint(&format!("https://monitoring.{}.amazonaws.com/", region), region, credentials)
    }

    /// Client for a non-default endpoint (still signed for `region`).
    pub fn with_endpoint(endpoint: &str, region: &str, credentials: Credentials) -> Result<Self> {
        let url = Url::parse(endpoint)
            .map_err(|e| PluginError::Config(format!("invalid CloudWatch endpoint {:?}: {}", endpoint, e)))?;
        let host = match (url.host_str(), url.port()) {
            (Some(h), Some(p)) => format!("{}:{}", h, p),
            (Some(h), None) => h.to_string(),
            (None, _) => {
                return Err(PluginError::Config(format!("CloudWatch endpoint {:?} has no host", endpoint)))
            }
        };

        let http = Client::builder()
            .use_rustls_tls()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http,
            url,
            host,
            region: region.to_string(),
            credentials,
        })
    }

    async fn call<T: serde::de::DeserializeOwned>(&self, action: &str, body: serde_json::Value) -> Result<T> {
        let payload = serde_json::to_vec(&body)?;
        let now = Utc::now();
        let date = sigv4::amz_date(now);
        let target = format!("{}.{}", TARGET_PREFIX, action);

        let mut headers = vec![
            ("content-type", CONTENT_TYPE),
            ("host", self.host.as_str()),
            ("x-amz-date", date.as_str()),
            ("x-amz-target", target.as_str()),
        ];
        if let Some(token) = self.credentials.session_token.as_deref() {
            headers.push(("x-amz-security-token", token));
        }

        let authorization = sigv4::authorization(
            &self.credentials,
            &self.region,
            SERVICE,
            now,
            &CanonicalRequest {
                method: "POST",
                path: self.url.path(),
                query: "",
                headers: &headers,
                payload: &payload,
            },
        );

        let mut request = self.http.post(self.url.clone()).header("authorization", authorization);
        for (name, value) in headers.iter().filter(|(name, _)| *name != "host") {
            request = request.header(*name, *value);
        }

        debug!("CloudWatch {}", action);
        let response = request.body(payload).send().await?;
        let status = response.status();
        let body = response.bytes().await?;

        if !status.is_success() {
            let detail = serde_json::from_slice::<ApiError>(&body)
                .map(|e| format!("{} {}", e.kind, e.message))
                .unwrap_or_else(|_| String::from_utf8_lossy(&body).into_owned());
            return Err(PluginError::Fetch(format!("CloudWatch {} failed ({}): {}", action, status, detail.trim())));
        }

        Ok(serde_json::from_slice(&body)?)
    }

    /// Service names that report estimated charges.
    pub async fn list_services(&self) -> Result<Vec<String>> {
        let mut services = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let mut body = json!({ "Namespace": NAMESPACE, "MetricName": METRIC_NAME });
            if let Some(token) = &next_token {
                body["NextToken"] = json!(token);
            }

            let page: ListMetricsOutput = self.call("ListMetrics", body).await?;
            services.extend(
                page.metrics
                    .into_iter()
                    .flat_map(|m| m.dimensions)
                    .filter(|d| d.name == "ServiceName")
                    .map(|d| d.value),
            );

            match page.next_token {
                Some(token) if !token.is_empty() => next_token = Some(token),
                _ => break,
            }
        }

        services.sort();
        services.dedup();
        Ok(services)
    }

    /// Latest `Maximum` of the last 24 hours, or `None` without datapoints.
    pub async fn latest_charge(
        &self,
        currency: &str,
        service: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Option<f64>> {
        let mut dimensions = vec![Dimension {
            name: "Currency".to_string(),
            value: currency.to_string(),
        }];
        if let Some(service) = service {
            dimensions.push(Dimension {
                name: "ServiceName".to_string(),
                value: service.to_string(),
            });
        }

        let body = json!({
            "Namespace": NAMESPACE,
            "MetricName": METRIC_NAME,
            "Dimensions": dimensions,
            "StartTime": (now - ChronoDuration::hours(24)).timestamp(),
            "EndTime": now.timestamp(),
            "Period": 3600,
            "Statistics": ["Maximum"],
        });

        let out: GetMetricStatisticsOutput = self.call("GetMetricStatistics", body).await?;
        Ok(latest_maximum(&out.datapoints))
    }
}

fn latest_maximum(datapoints: &[Datapoint]) -> Option<f64> {
    datapoints
        .iter()
        .filter(|d| d.maximum.is_some())
        .max_by(|a, b| a.timestamp.total_cmp(&b.timestamp))
        .and_then(|d| d.maximum)
}

/// Snapshot location for a plugin whose cache file is `cache_path`.
pub fn snapshot_path_for(cache_path: &Path) -> PathBuf {
    cache_path.with_extension("snapshot.json")
}

/// Reads a snapshot written by [`AwsBillingPlugin::refresh`].
pub fn read_snapshot(path: &Path) -> Result<Snapshot> {
    let data = std::fs::read(path)?;
    serde_json::from_slice(&data).map_err(|e| {
        PluginError::Fetch(format!("corrupt billing snapshot {}: {}", path.display(), e))
    })
}

pub struct AwsBillingPlugin {
    cloudwatch: CloudWatch,
    currency: String,
    region: String,
    targets: Vec<String>,
    snapshot_path: PathBuf,
}

impl AwsBillingPlugin {
    /// `targets` empty means every service found via ListMetrics.
    ///
    /// The snapshot lives next to the plugin's cache file in `store`.
    pub fn new(cloudwatch: CloudWatch, currency: &str, targets: Vec<String>, store: &StateStore) -> Self {
        let region = cloudwatch.region.clone();
        let mut plugin = Self {
            cloudwatch,
            currency: currency.to_string(),
            region,
            targets: targets
                .into_iter()
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect(),
            snapshot_path: PathBuf::new(),
        };
        plugin.snapshot_path = snapshot_path_for(&store.path_for(&plugin.cache_key()));
        plugin
    }

    pub fn snapshot_path(&self) -> &Path {
        &self.snapshot_path
    }

    pub fn snapshot_exists(&self) -> bool {
        self.snapshot_path.is_file()
    }

    /// Queries CloudWatch and replaces the snapshot.
    ///
    /// Services without datapoints are skipped; a failing query for one
    /// service does not discard the others. The snapshot is only replaced
    /// when at least one service produced a value.
    pub async fn refresh(&self, now: DateTime<Utc>) -> Result<Snapshot> {
        let services = if self.targets.is_empty() {
            self.cloudwatch.list_services().await?
        } else {
            self.targets.clone()
        };

        let mut snapshot = Snapshot::new();
        let mut first_error = None;
        let queries = std::iter::once(ALL_SERVICES.to_string()).chain(services);
        for service in queries {
            let filter = (service != ALL_SERVICES).then_some(service.as_str());
            match self.cloudwatch.latest_charge(&self.currency, filter, now).await {
                Ok(Some(value)) => {
                    snapshot.insert(service, value);
                }
                Ok(None) => warn!("{}: fetched no datapoints", service),
                Err(e) => {
                    warn!("{}: {}", service, e);
                    first_error.get_or_insert(e);
                }
            }
        }

        if snapshot.is_empty() {
            return Err(first_error
                .unwrap_or_else(|| PluginError::Fetch(format!("no {} billing datapoints found", self.currency))));
        }

        write_atomic(&self.snapshot_path, &serde_json::to_vec(&snapshot)?)?;
        info!("Billing snapshot refreshed with {} services", snapshot.len());
        Ok(snapshot)
    }
}

#[async_trait]
impl Plugin for AwsBillingPlugin {
    fn name(&self) -> &str {
        "aws-billing"
    }

    fn cache_key(&self) -> CacheKey {
        let targets = self.targets.join(",");
        CacheKey::derive("aws-billing", &[&self.currency, &self.region, &targets])
    }

    fn graph_definition(&self) -> Vec<Graph> {
        vec![Graph::new("billing.all", "AWSBilling", Unit::Float).metric(GraphMetric::new("*", "Service"))]
    }

    async fn fetch(&self, now: i64) -> Result<Vec<Reading>> {
        let snapshot = read_snapshot(&self.snapshot_path)?;
        Ok(snapshot
            .into_iter()
            .map(|(service, value)| Reading::new(format!("billing.all.{}", service.replace('.', "_")), value, now))
            .collect())
    }
}
