//! metric-plugin - version 0.1.0
//!
//! Runs one metric plugin per invocation for a monitoring agent.
//! This is the main entry point that sets up logging and dispatches subcommands.

mod cli;
mod commands;
mod config;

use anyhow::{bail, Result};
use clap::Parser;
use std::process::ExitCode;
use tracing::{debug, level_filters::LevelFilter};

use cli::{Args, Commands};
use commands::{command_config, command_plugin, run::RunContext};
use config::{resolve_config, show_config, validate_effective_config, Config};

/// Initializes tracing on stderr; stdout carries the agent protocol only.
fn setup_logging(level: LevelFilter) {
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .finish();

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("⚠️  Tracing subscriber already installed");
    }

    debug!(
        "Logging initialized with level: {} (build {})",
        level,
        option_env!("VERGEN_GIT_SHA").unwrap_or("unknown")
    );
}

/// Resolves and validates configuration.
fn load_validated_config(args: &Args) -> Result<Config> {
    let config = resolve_config(args)?;
    if let Err(e) = validate_effective_config(&config) {
        bail!("Configuration invalid: {}", e);
    }
    Ok(config)
}

async fn run(args: Args) -> Result<()> {
    // Early config resolution for show/check modes
    if args.show_config || args.check_config {
        let config = load_validated_config(&args)?;

        if args.check_config {
            println!("✅ Configuration is valid");
            return Ok(());
        }
        return show_config(&config, args.config_format);
    }

    let Some(command) = &args.command else {
        bail!("No plugin given, see --help");
    };

    if let Commands::Config {
        output,
        format,
        commented,
    } = command
    {
        return command_config(output.clone(), *format, *commented);
    }

    let config = load_validated_config(&args)?;
    setup_logging(config.log_filter());

    let ctx = RunContext::new(&config, args.tempfile.clone());
    debug!("Mode {:?}, cache dir {}", ctx.mode, config.temp_dir().display());
    command_plugin(command, &config, &ctx).await
}

/// Main application entry point.
#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("❌ {:#}", e);
            ExitCode::FAILURE
        }
    }
}
