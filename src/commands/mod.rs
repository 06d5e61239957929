//! CLI command implementations for metric-plugin.
//!
//! - `config`: Configuration file generation
//! - `run`: One plugin invocation (all plugin subcommands)

pub mod config;
pub mod run;

// Re-export command functions
pub use config::command_config;
pub use run::command_plugin;
