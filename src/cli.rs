//! CLI arguments and subcommands for metric-plugin.
//!
//! Global options control logging, configuration and the state store; each
//! subcommand selects one plugin and carries its backend options.

use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Log level options for CLI parsing
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Configuration format options for output
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ConfigFormat {
    Yaml,
    Json,
    Toml,
}

/// Main CLI arguments structure
#[derive(Parser, Debug)]
#[command(
    name = "metric-plugin",
    about = "Metric plugins for a monitoring agent",
    long_about = "Metric plugins for a monitoring agent.\n\n\
                  Each invocation polls one backend and prints name/value/timestamp lines. \
                  Counter metrics are reported as per-second rates using the values stored \
                  by the previous invocation. Set MACKEREL_AGENT_PLUGIN_META to print graph \
                  definitions instead.",
    author = "Michael Moll <exporter@herakles.now>",
    version,
    propagate_version = true
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Log level (logs go to stderr)
    #[arg(long, value_enum, global = true)]
    pub log_level: Option<LogLevel>,

    /// Config file (YAML/JSON/TOML)
    #[arg(short = 'c', long, global = true)]
    pub config: Option<PathBuf>,

    /// Disable all config file loading
    #[arg(long, global = true)]
    pub no_config: bool,

    /// Print effective merged config and exit
    #[arg(long)]
    pub show_config: bool,

    /// Output format for --show-config
    #[arg(long, value_enum, default_value = "yaml")]
    pub config_format: ConfigFormat,

    /// Validate config and exit (return code 1 on error)
    #[arg(long)]
    pub check_config: bool,

    /// Directory for cache files
    #[arg(long, global = true)]
    pub tempdir: Option<PathBuf>,

    /// Explicit cache file, overrides the derived name
    #[arg(long, global = true)]
    pub tempfile: Option<PathBuf>,

    /// Upper bound for one backend fetch, in milliseconds
    #[arg(long, global = true)]
    pub timeout_ms: Option<u64>,

    /// Environment variable that selects definitions mode
    #[arg(long, global = true)]
    pub meta_env: Option<String>,
}

/// Subcommands: one per plugin, plus config generation
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Murmur (Mumble) server connections
    Murmur(MurmurArgs),

    /// Carbon cache/relay self-metrics via graphite-web
    Graphite(GraphiteArgs),

    /// UptimeRobot monitor response time
    Uptimerobot(UptimeRobotArgs),

    /// Xen domain statistics via xentop
    Xentop(XentopArgs),

    /// AWS estimated charges from CloudWatch
    AwsBilling(AwsBillingArgs),

    /// Generate configuration files
    Config {
        /// Output file path ("-" for stdout)
        #[arg(short = 'o', long)]
        output: Option<PathBuf>,

        /// Output format
        #[arg(long, value_enum, default_value = "yaml")]
        format: ConfigFormat,

        /// Include comments and examples
        #[arg(long)]
        commented: bool,
    },
}

#[derive(ClapArgs, Debug)]
pub struct MurmurArgs {
    /// Server hostname
    #[arg(long, default_value = "localhost")]
    pub host: String,

    /// Server port
    #[arg(long, default_value_t = metric_plugins::plugins::murmur::DEFAULT_PORT)]
    pub port: u16,

    /// Ping timeout in milliseconds
    #[arg(long, default_value_t = 1000)]
    pub timeout: u64,
}

#[derive(ClapArgs, Debug)]
pub struct GraphiteArgs {
    /// Hostname as registered in carbon (default: system hostname)
    #[arg(long)]
    pub host: Option<String>,

    /// graphite-web hostname
    #[arg(long)]
    pub webhost: String,

    /// graphite-web port
    #[arg(long)]
    pub webport: u16,

    /// Carbon type (cache or relay)
    #[arg(long = "type")]
    pub carbon_type: String,

    /// Carbon instance name
    #[arg(long)]
    pub instance: Option<String>,

    /// Graph label prefix
    #[arg(long, default_value = "Carbon")]
    pub metric_label_prefix: String,
}

#[derive(ClapArgs, Debug)]
pub struct UptimeRobotArgs {
    /// API key (falls back to uptimerobot_api_key in the config file)
    #[arg(long, env = "UPTIMEROBOT_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Monitor ID
    #[arg(long)]
    pub monitor_id: u64,

    /// Graph metric label
    #[arg(long)]
    pub name: Option<String>,
}

#[derive(ClapArgs, Debug)]
pub struct XentopArgs {
    /// Xen major version (4 adds -f for full domain names)
    #[arg(long, default_value_t = metric_plugins::plugins::xentop::DEFAULT_XEN_VERSION)]
    pub xen_version: u32,

    /// xentop command line
    #[arg(long, default_value = metric_plugins::plugins::xentop::DEFAULT_COMMAND)]
    pub command: String,
}

#[derive(ClapArgs, Debug)]
pub struct AwsBillingArgs {
    /// AWS access key ID
    #[arg(long, env = "AWS_ACCESS_KEY_ID", hide_env_values = true)]
    pub access_key_id: Option<String>,

    /// AWS secret access key
    #[arg(long, env = "AWS_SECRET_ACCESS_KEY", hide_env_values = true)]
    pub secret_access_key: Option<String>,

    /// AWS session token for temporary credentials
    #[arg(long, env = "AWS_SESSION_TOKEN", hide_env_values = true)]
    pub session_token: Option<String>,

    /// Billing currency
    #[arg(long, default_value = metric_plugins::plugins::aws_billing::DEFAULT_CURRENCY)]
    pub currency: String,

    /// Services to report (comma-separated; default: all services with charges)
    #[arg(long)]
    pub target: Option<String>,

    /// CloudWatch region
    #[arg(long, default_value = metric_plugins::plugins::aws_billing::DEFAULT_REGION)]
    pub region: String,

    /// CloudWatch endpoint override
    #[arg(long)]
    pub endpoint: Option<String>,

    /// Minute of the hour at which the billing snapshot is refreshed
    #[arg(long, default_value_t = 0)]
    pub refresh_minute: u32,

    /// Refresh the snapshot regardless of the schedule
    #[arg(long)]
    pub force_refresh: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_options_after_subcommand() {
        let args = Args::try_parse_from([
            "metric-plugin",
            "murmur",
            "--host",
            "voice.example",
            "--tempdir",
            "/var/tmp/plugins",
        ])
        .unwrap();

        assert_eq!(args.tempdir, Some(PathBuf::from("/var/tmp/plugins")));
        match args.command {
            Some(Commands::Murmur(m)) => {
                assert_eq!(m.host, "voice.example");
                assert_eq!(m.port, 64738);
                assert_eq!(m.timeout, 1000);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_graphite_requires_webhost() {
        let result = Args::try_parse_from(["metric-plugin", "graphite", "--type", "cache", "--webport", "80"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_aws_billing_defaults() {
        let args = Args::try_parse_from(["metric-plugin", "aws-billing", "--target", "AmazonEC2,AmazonS3"]).unwrap();
        match args.command {
            Some(Commands::AwsBilling(a)) => {
                assert_eq!(a.currency, "USD");
                assert_eq!(a.region, "us-east-1");
                assert_eq!(a.refresh_minute, 0);
                assert!(!a.force_refresh);
                assert_eq!(a.target.as_deref(), Some("AmazonEC2,AmazonS3"));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
