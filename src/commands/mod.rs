//! CLI command implementations for paas-prometheus-exporter.
//!
//! This module provides implementations for all CLI subcommands:
//! - `apps`: One-off application list fetch
//! - `config`: Configuration file generation

pub mod apps;
pub mod config;

// Re-export command functions
pub use apps::command_apps;
pub use config::command_config;
