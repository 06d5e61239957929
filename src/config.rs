//! Configuration management for metric-plugin.
//!
//! This module handles loading, merging, and validating configuration from files
//! and CLI arguments. It supports YAML, JSON, and TOML formats.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, level_filters::LevelFilter};

use crate::cli::{Args, ConfigFormat, LogLevel};
use metric_plugins::driver::{DEFAULT_FETCH_TIMEOUT, DEFAULT_META_ENV};

pub const DEFAULT_LOG_LEVEL: &str = "warn";

const DEFAULT_CONFIG_PATHS: [&str; 6] = [
    "/etc/metric-plugins/config.yaml",
    "/etc/metric-plugins/config.yml",
    "/etc/metric-plugins/config.json",
    "./metric-plugins.yaml",
    "./metric-plugins.yml",
    "./metric-plugins.json",
];

const REDACTED: &str = "<redacted>";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory for cache files (default: system temp dir)
    #[serde(alias = "temp-dir")]
    pub temp_dir: Option<PathBuf>,

    /// Upper bound for one backend fetch
    #[serde(alias = "fetch-timeout-ms")]
    pub fetch_timeout_ms: Option<u64>,

    // Logging
    #[serde(alias = "log-level")]
    pub log_level: Option<String>,

    /// Environment variable that selects definitions mode
    #[serde(alias = "meta-env")]
    pub meta_env: Option<String>,

    // Credentials, used when not given on the command line
    #[serde(alias = "uptimerobot-api-key")]
    pub uptimerobot_api_key: Option<String>,
    #[serde(alias = "aws-access-key-id")]
    pub aws_access_key_id: Option<String>,
    #[serde(alias = "aws-secret-access-key")]
    pub aws_secret_access_key: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            temp_dir: None,
            fetch_timeout_ms: Some(DEFAULT_FETCH_TIMEOUT.as_millis() as u64),
            log_level: Some(DEFAULT_LOG_LEVEL.into()),
            meta_env: Some(DEFAULT_META_ENV.into()),
            uptimerobot_api_key: None,
            aws_access_key_id: None,
            aws_secret_access_key: None,
        }
    }
}

impl Config {
    pub fn temp_dir(&self) -> PathBuf {
        self.temp_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    pub fn fetch_timeout(&self) -> Duration {
        self.fetch_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_FETCH_TIMEOUT)
    }

    pub fn meta_env(&self) -> &str {
        self.meta_env.as_deref().unwrap_or(DEFAULT_META_ENV)
    }

    pub fn log_filter(&self) -> LevelFilter {
        self.log_level
            .as_deref()
            .and_then(parse_log_level)
            .unwrap_or(LevelFilter::WARN)
    }

    /// Copy with credentials masked, for display.
    fn redacted(&self) -> Self {
        let mask = |v: &Option<String>| v.as_ref().map(|_| REDACTED.to_string());
        Self {
            uptimerobot_api_key: mask(&self.uptimerobot_api_key),
            aws_access_key_id: mask(&self.aws_access_key_id),
            aws_secret_access_key: mask(&self.aws_secret_access_key),
            ..self.clone()
        }
    }
}

fn parse_log_level(level: &str) -> Option<LevelFilter> {
    match level.to_ascii_lowercase().as_str() {
        "off" => Some(LevelFilter::OFF),
        "error" => Some(LevelFilter::ERROR),
        "warn" | "warning" => Some(LevelFilter::WARN),
        "info" => Some(LevelFilter::INFO),
        "debug" => Some(LevelFilter::DEBUG),
        "trace" => Some(LevelFilter::TRACE),
        _ => None,
    }
}

fn log_level_name(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Off => "off",
        LogLevel::Error => "error",
        LogLevel::Warn => "warn",
        LogLevel::Info => "info",
        LogLevel::Debug => "debug",
        LogLevel::Trace => "trace",
    }
}

/// Validate effective config (used by --check-config and before every run)
pub fn validate_effective_config(cfg: &Config) -> Result<()> {
    if cfg.fetch_timeout_ms == Some(0) {
        bail!("fetch_timeout_ms must be greater than 0");
    }

    if let Some(level) = cfg.log_level.as_deref() {
        if parse_log_level(level).is_none() {
            bail!(
                "Invalid log_level '{}', expected off, error, warn, info, debug or trace",
                level
            );
        }
    }

    if let Some(var) = cfg.meta_env.as_deref() {
        if var.is_empty() || var.contains('=') || var.contains('\0') {
            bail!("Invalid meta_env '{}': not a valid environment variable name", var);
        }
    }

    if let Some(dir) = cfg.temp_dir.as_deref() {
        if dir.exists() && !dir.is_dir() {
            bail!("temp_dir {} exists but is not a directory", dir.display());
        }
    }

    Ok(())
}

/// Resolves configuration from CLI args, config file, and defaults.
/// This enforces precedence: CLI (if provided) > config file > default.
pub fn resolve_config(args: &Args) -> Result<Config> {
    let mut config = if args.no_config {
        Config::default()
    } else {
        load_config(args.config.as_deref())?
    };

    if let Some(level) = args.log_level {
        config.log_level = Some(log_level_name(level).to_string());
    }
    if let Some(dir) = &args.tempdir {
        config.temp_dir = Some(dir.clone());
    }
    if let Some(ms) = args.timeout_ms {
        config.fetch_timeout_ms = Some(ms);
    }
    if let Some(var) = &args.meta_env {
        config.meta_env = Some(var.clone());
    }

    Ok(config)
}

/// Loads the config file, or defaults when none is found.
///
/// An explicitly given path must exist; default locations are optional.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = match path {
        Some(p) => {
            if !p.exists() {
                bail!("Config file not found: {}", p.display());
            }
            p.to_path_buf()
        }
        None => match DEFAULT_CONFIG_PATHS.iter().map(Path::new).find(|p| p.exists()) {
            Some(p) => p.to_path_buf(),
            None => return Ok(Config::default()),
        },
    };

    let content = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;

    // Missing keys keep their defaults.
    let defaults = Config::default();
    let mut config: Config = match path.extension().and_then(|s| s.to_str()) {
        Some("json") => serde_json::from_str(&content)
            .with_context(|| format!("Invalid JSON in {}", path.display()))?,
        Some("toml") => toml::from_str(&content)
            .with_context(|| format!("Invalid TOML in {}", path.display()))?,
        _ => serde_yaml::from_str(&content)
            .with_context(|| format!("Invalid YAML in {}", path.display()))?,
    };
    config.fetch_timeout_ms = config.fetch_timeout_ms.or(defaults.fetch_timeout_ms);
    config.log_level = config.log_level.or(defaults.log_level);
    config.meta_env = config.meta_env.or(defaults.meta_env);

    info!("Loaded configuration from: {}", path.display());
    Ok(config)
}

/// Renders configuration in requested format, credentials masked
pub fn render_config(config: &Config, format: ConfigFormat) -> Result<String> {
    let config = config.redacted();
    Ok(match format {
        ConfigFormat::Json => serde_json::to_string_pretty(&config)?,
        ConfigFormat::Toml => toml::to_string_pretty(&config)?,
        ConfigFormat::Yaml => serde_yaml::to_string(&config)?,
    })
}

/// Shows configuration in requested format
pub fn show_config(config: &Config, format: ConfigFormat) -> Result<()> {
    println!("{}", render_config(config, format)?);
    Ok(())
}
