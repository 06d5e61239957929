//! UptimeRobot monitor response time.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::error::{PluginError, Result};
use crate::graph::{Graph, GraphMetric};
use crate::plugin::Plugin;
use crate::reading::{Reading, Unit};
use crate::state_store::CacheKey;

pub const DEFAULT_ENDPOINT: &str = "https://api.uptimerobot.com/v2/getMonitors";

#[derive(Debug, Deserialize)]
struct MonitorsResponse {
    stat: String,
    #[serde(default)]
    error: Option<ApiError>,
    #[serde(default)]
    monitors: Vec<Monitor>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct Monitor {
    #[serde(default)]
    response_times: Vec<ResponseTime>,
}

#[derive(Debug, Deserialize)]
struct ResponseTime {
    value: f64,
}

pub struct UptimeRobotPlugin {
    api_key: String,
    monitor_id: u64,
    name: Option<String>,
    endpoint: String,
    client: Client,
}

impl UptimeRobotPlugin {
    /// Fails with a configuration error when the API key is empty.
    pub fn new(api_key: impl Into<String>, monitor_id: u64, name: Option<String>) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(PluginError::Config("UptimeRobot API key is required".to_string()));
        }

        let client = Client::builder()
            .use_rustls_tls()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            api_key,
            monitor_id,
            name: name.filter(|n| !n.is_empty()),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            client,
        })
    }

    /// Points the plugin at another API endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    async fn latest_response_time(&self) -> Result<f64> {
        let monitor_id = self.monitor_id.to_string();
        let form = [
            ("api_key", self.api_key.as_str()),
            ("monitors", monitor_id.as_str()),
            ("response_times", "1"),
            ("response_times_limit", "1"),
            ("format", "json"),
        ];

        let response = self
            .client
            .post(&self.endpoint)
            .form(&form)
            .send()
            .await?
            .error_for_status()?;
        let body: MonitorsResponse = response.json().await?;
        debug!("UptimeRobot answered with stat={}", body.stat);

        if body.stat != "ok" {
            let detail = body
                .error
                .map(|e| format!("{}: {}", e.kind, e.message))
                .unwrap_or_else(|| "unknown error".to_string());
            return Err(PluginError::Fetch(format!("UptimeRobot API error ({})", detail)));
        }

        body.monitors
            .first()
            .and_then(|m| m.response_times.first())
            .map(|rt| rt.value)
            .ok_or_else(|| {
                PluginError::Fetch(format!("no response times for monitor {}", self.monitor_id))
            })
    }
}

#[async_trait]
impl Plugin for UptimeRobotPlugin {
    fn name(&self) -> &str {
        "uptimerobot"
    }

    fn cache_key(&self) -> CacheKey {
        CacheKey::derive("uptimerobot", &[&self.monitor_id.to_string()])
    }

    fn graph_definition(&self) -> Vec<Graph> {
        let label = self.name.as_deref().unwrap_or("Response Time");
        vec![Graph::new("uptimerobot.ResponseTime", "Uptime Robot Response Time", Unit::Integer)
            .metric(GraphMetric::new("response_time", label))]
    }

    async fn fetch(&self, now: i64) -> Result<Vec<Reading>> {
        let value = self.latest_response_time().await?;
        Ok(vec![Reading::new("uptimerobot.ResponseTime.response_time", value, now)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_api_key_is_a_config_error() {
        let result = UptimeRobotPlugin::new("  ", 1, None);
        assert!(matches!(result, Err(PluginError::Config(_))));
    }

    #[test]
    fn test_graph_label_uses_name() {
        let plugin = UptimeRobotPlugin::new("key", 1, Some("example.com".to_string())).unwrap();
        let graphs = plugin.graph_definition();
        assert_eq!(graphs[0].metrics[0].label, "example.com");

        let plugin = UptimeRobotPlugin::new("key", 1, Some(String::new())).unwrap();
        assert_eq!(plugin.graph_definition()[0].metrics[0].label, "Response Time");
    }

    #[test]
    fn test_spec_covers_fetched_reading() {
        let plugin = UptimeRobotPlugin::new("key", 1, None).unwrap();
        let specs = plugin.metric_specs();
        assert!(specs[0].matches("uptimerobot.ResponseTime.response_time"));
        assert!(!specs[0].is_counter);
    }

    #[test]
    fn test_decode_error_response() {
        let body: MonitorsResponse = serde_json::from_str(
            r#"{"stat":"fail","error":{"type":"invalid_parameter","message":"api_key is invalid."}}"#,
        )
        .unwrap();
        assert_eq!(body.stat, "fail");
        assert_eq!(body.error.unwrap().kind, "invalid_parameter");
        assert!(body.monitors.is_empty());
    }
}
