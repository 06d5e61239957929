//! Config command implementation.
//!
//! Generates configuration files in various formats.

use anyhow::Result;
use std::fs;
use std::path::PathBuf;

use crate::cli::ConfigFormat;
use crate::config::Config;

/// Generates configuration files.
pub fn command_config(output: Option<PathBuf>, format: ConfigFormat, commented: bool) -> Result<()> {
    let config = Config::default();
    let output = output.unwrap_or_else(|| PathBuf::from("metric-plugins.yaml"));

    let content = match format {
        ConfigFormat::Json => serde_json::to_string_pretty(&config)?,
        ConfigFormat::Toml => toml::to_string_pretty(&config)?,
        ConfigFormat::Yaml => {
            let mut content = serde_yaml::to_string(&config)?;
            if commented {
                content = add_config_comments(content);
            }
            content
        }
    };

    if output.to_string_lossy() == "-" {
        print!("{}", content);
    } else {
        fs::write(&output, content)?;
        println!("✅ Configuration written to: {}", output.display());
    }

    Ok(())
}

/// Adds comments to YAML configuration.
fn add_config_comments(yaml: String) -> String {
    let comments = r#"# Metric Plugins Configuration
# ============================
#
# State
# -----
# temp_dir: null               # Cache directory (null = system temp dir)
# fetch_timeout_ms: 10000      # Upper bound for one backend fetch
#
# Agent Protocol
# --------------
# meta_env: MACKEREL_AGENT_PLUGIN_META  # Non-empty value selects definitions mode
#
# Logging (stderr)
# ----------------
# log_level: "warn"            # off, error, warn, info, debug, trace
#
# Credentials (command line and environment take precedence)
# -----------------------------------------------------------
# uptimerobot_api_key: null
# aws_access_key_id: null
# aws_secret_access_key: null
"#;

    format!("{comments}\n{yaml}")
}
