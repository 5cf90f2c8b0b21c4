//! CLI arguments and subcommands for paas-prometheus-exporter.
//!
//! This module defines the command-line interface structure using the clap library,
//! including all flags, options, and subcommands.

use clap::{Parser, Subcommand, ValueEnum};
use std::net::IpAddr;
use std::path::PathBuf;

/// Log level options for CLI parsing
#[derive(Debug, Clone, ValueEnum)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Configuration format options for output
#[derive(Debug, Clone, ValueEnum)]
pub enum ConfigFormat {
    Yaml,
    Json,
    Toml,
}

/// Output format for the `apps` subcommand
#[derive(Debug, Clone, ValueEnum)]
pub enum AppsFormat {
    Table,
    Json,
    Yaml,
}

/// Main CLI arguments structure
#[derive(Parser, Debug)]
#[command(
    name = "paas-prometheus-exporter",
    about = "Prometheus exporter for Cloud Foundry application instances",
    long_about = "Prometheus exporter for Cloud Foundry application instances.\n\n\
                  Polls the Cloud Foundry API for the applications visible to the configured \
                  credentials and keeps exactly one metrics watcher per started application, \
                  creating, resizing and removing watchers as applications change.",
    version,
    propagate_version = true
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// HTTP listen port
    #[arg(short = 'p', long)]
    pub port: Option<u16>,

    /// Bind to specific interface/IP
    #[arg(long)]
    pub bind: Option<IpAddr>,

    /// Log level (overrides config file, default: info)
    #[arg(long, value_enum)]
    pub log_level: Option<LogLevel>,

    /// Config file (YAML/JSON/TOML)
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Disable all config file loading
    #[arg(long)]
    pub no_config: bool,

    /// Print effective merged config (secrets redacted) and exit
    #[arg(long)]
    pub show_config: bool,

    /// Output format for --show-config
    #[arg(long, value_enum, default_value = "yaml")]
    pub config_format: ConfigFormat,

    /// Validate config and exit (return code 1 on error)
    #[arg(long)]
    pub check_config: bool,

    /// Cloud Foundry API endpoint, e.g. https://api.example.com
    #[arg(long, env = "API_ENDPOINT")]
    pub api_endpoint: Option<String>,

    /// Cloud Foundry username (password grant)
    #[arg(long, env = "CF_USERNAME")]
    pub username: Option<String>,

    /// Cloud Foundry password (password grant)
    #[arg(long, env = "CF_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// OAuth client id (client credentials grant, or password grant client)
    #[arg(long, env = "CF_CLIENT_ID")]
    pub client_id: Option<String>,

    /// OAuth client secret
    #[arg(long, env = "CF_CLIENT_SECRET", hide_env_values = true)]
    pub client_secret: Option<String>,

    /// Pre-issued bearer token
    #[arg(long, env = "CF_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Seconds between application list polls
    #[arg(long)]
    pub update_frequency: Option<u64>,

    /// Cloud Foundry `q` filter for the application list (repeatable)
    #[arg(long = "app-query", value_name = "FILTER")]
    pub app_query: Vec<String>,

    /// Timeout in seconds for each platform request
    #[arg(long)]
    pub request_timeout: Option<u64>,

    /// Do not verify the platform's TLS certificate
    #[arg(long)]
    pub skip_ssl_validation: bool,

    /// Disable /health endpoint
    #[arg(long)]
    pub disable_health: bool,
}

/// Subcommands for additional functionality
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Fetch the application list once and print it
    Apps {
        /// Only list started applications (those that would be watched)
        #[arg(long)]
        started_only: bool,

        /// Output format
        #[arg(long, value_enum, default_value = "table")]
        format: AppsFormat,
    },

    /// Generate configuration files
    Config {
        /// Output file path
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
