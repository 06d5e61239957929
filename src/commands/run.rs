//! Plugin subcommands.
//!
//! Builds the selected plugin from its options, drives one invocation and
//! copies the rendered output to stdout in one piece.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, warn};

use metric_plugins::plugins::aws_billing::CloudWatch;
use metric_plugins::plugins::graphite::CarbonType;
use metric_plugins::plugins::sigv4::Credentials;
use metric_plugins::plugins::{AwsBillingPlugin, GraphitePlugin, MurmurPlugin, UptimeRobotPlugin, XentopPlugin};
use metric_plugins::{Driver, HourlyAt, Mode, Plugin, PluginError, RefreshSchedule, StateStore};

use crate::cli::{AwsBillingArgs, Commands};
use crate::config::Config;

/// Settings shared by every plugin run.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub store: StateStore,
    pub timeout: Duration,
    pub mode: Mode,
}

impl RunContext {
    pub fn new(config: &Config, tempfile: Option<PathBuf>) -> Self {
        Self {
            store: StateStore::new(config.temp_dir()).with_file_override(tempfile),
            timeout: config.fetch_timeout(),
            mode: Mode::from_env(config.meta_env()),
        }
    }
}

/// Runs the plugin selected by `command`.
pub async fn command_plugin(command: &Commands, config: &Config, ctx: &RunContext) -> Result<()> {
    match command {
        Commands::Murmur(a) => {
            let plugin = MurmurPlugin::new(&a.host, a.port, Duration::from_millis(a.timeout));
            run(plugin, ctx).await
        }

        Commands::Graphite(a) => {
            let carbon_type: CarbonType = a.carbon_type.parse()?;
            let plugin = GraphitePlugin::new(
                a.host.as_deref(),
                &a.webhost,
                a.webport,
                carbon_type,
                a.instance.as_deref(),
                &a.metric_label_prefix,
            )?;
            run(plugin, ctx).await
        }

        Commands::Uptimerobot(a) => {
            let api_key = a
                .api_key
                .clone()
                .or_else(|| config.uptimerobot_api_key.clone())
                .unwrap_or_default();
            let plugin = UptimeRobotPlugin::new(api_key, a.monitor_id, a.name.clone())?;
            run(plugin, ctx).await
        }

        Commands::Xentop(a) => run(XentopPlugin::new(a.xen_version, a.command.clone()), ctx).await,

        Commands::AwsBilling(a) => aws_billing(a, config, ctx).await,

        Commands::Config { .. } => bail!("config is not a plugin command"),
    }
}

async fn run<P: Plugin>(plugin: P, ctx: &RunContext) -> Result<()> {
    let name = plugin.name().to_string();
    let driver = Driver::new(plugin, ctx.store.clone()).with_timeout(ctx.timeout);

    // Nothing reaches stdout unless the whole run succeeded.
    let mut rendered = Vec::new();
    let summary = driver
        .run(ctx.mode, &mut rendered)
        .await
        .with_context(|| format!("{} plugin failed", name))?;
    debug!("{}: {:?}", name, summary);

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    out.write_all(&rendered)?;
    out.flush()?;
    Ok(())
}

fn required(value: Option<&String>, fallback: Option<&String>, what: &str) -> Result<String, PluginError> {
    value
        .or(fallback)
        .filter(|v| !v.trim().is_empty())
        .cloned()
        .ok_or_else(|| PluginError::Config(format!("{} is required", what)))
}

async fn aws_billing(a: &AwsBillingArgs, config: &Config, ctx: &RunContext) -> Result<()> {
    let credentials = Credentials {
        access_key_id: required(
            a.access_key_id.as_ref(),
            config.aws_access_key_id.as_ref(),
            "AWS access key ID",
        )?,
        secret_access_key: required(
            a.secret_access_key.as_ref(),
            config.aws_secret_access_key.as_ref(),
            "AWS secret access key",
        )?,
        session_token: a.session_token.clone().filter(|t| !t.is_empty()),
    };

    let cloudwatch = match a.endpoint.as_deref() {
        Some(endpoint) => CloudWatch::with_endpoint(endpoint, &a.region, credentials)?,
        None => CloudWatch::new(&a.region, credentials)?,
    };
    let targets = a
        .target
        .as_deref()
        .map(|t| t.split(',').map(str::to_string).collect())
        .unwrap_or_default();

    let plugin = AwsBillingPlugin::new(cloudwatch, &a.currency, targets, &ctx.store);

    if ctx.mode == Mode::Values {
        let now = Utc::now();
        let schedule = HourlyAt::new(a.refresh_minute).forced(a.force_refresh);
        if schedule.should_refresh(now, plugin.snapshot_exists()) {
            // A stale snapshot is still worth reporting.
            if let Err(e) = plugin.refresh(now).await {
                warn!("Billing snapshot refresh failed: {}", e);
            }
        } else {
            debug!("Billing snapshot refresh due at minute {}", schedule.minute);
        }
    }

    run(plugin, ctx).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_prefers_cli_value() {
        let cli = "cli".to_string();
        let file = "file".to_string();
        assert_eq!(required(Some(&cli), Some(&file), "key").unwrap(), "cli");
        assert_eq!(required(None, Some(&file), "key").unwrap(), "file");
        assert!(matches!(required(None, None, "key"), Err(PluginError::Config(_))));

        let blank = " ".to_string();
        assert!(required(Some(&blank), None, "key").is_err());
    }

    #[test]
    fn test_context_uses_tempfile_override() {
        let config = Config {
            temp_dir: Some(PathBuf::from("/var/tmp/plugins")),
            ..Config::default()
        };
        let ctx = RunContext::new(&config, Some(PathBuf::from("/srv/cache.json")));
        let key = metric_plugins::CacheKey::derive("murmur", &["localhost"]);
        assert_eq!(ctx.store.path_for(&key), PathBuf::from("/srv/cache.json"));
        assert_eq!(ctx.timeout, Duration::from_secs(10));
    }
}
