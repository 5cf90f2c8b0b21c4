//! Config command implementation.
//!
//! Writes a default configuration file in YAML, JSON or TOML.

use anyhow::Result;
use std::fs;
use std::path::PathBuf;

use crate::cli::ConfigFormat;
use crate::config::{render_config, Config};

/// Generates configuration files
pub fn command_config(output: Option<PathBuf>, format: ConfigFormat, commented: bool) -> Result<()> {
    let content = generate_config(&format, commented)?;

    match output {
        Some(path) if path.to_string_lossy() != "-" => {
            fs::write(&path, content)?;
            println!("Configuration written to: {}", path.display());
        }
        _ => print!("{content}"),
    }

    Ok(())
}

fn generate_config(format: &ConfigFormat, commented: bool) -> Result<String> {
    let content = render_config(&Config::default(), format)?;
    Ok(match format {
        ConfigFormat::Yaml if commented => add_config_comments(content),
        _ => content,
    })
}

/// Adds comments to YAML configuration
fn add_config_comments(yaml: String) -> String {
    let comments = r#"# PaaS Prometheus Exporter Configuration
# ======================================
#
# Server Configuration
# --------------------
# bind: "0.0.0.0"              # Bind IP (0.0.0.0 = all interfaces)
# port: 8080                   # HTTP port
#
# Platform Connection
# -------------------
# api_endpoint: "https://api.example.com"
# username: null               # Password grant
# password: null
# client_id: null              # Client credentials grant (or password grant client, default "cf")
# client_secret: null
# token: null                  # Pre-issued bearer token, excludes all other credentials
# skip_ssl_validation: false
# request_timeout: 30          # Seconds per platform request
#
# Reconcile Loop
# --------------
# update_frequency: 300        # Seconds between application list polls
# app_query: null              # Cloud Foundry q filters, e.g. ["space_guid:<guid>"]
#
# Feature Flags
# -------------
# enable_health: true          # Enable /health endpoint
#
# Logging
# -------
# log_level: "info"            # off, error, warn, info, debug, trace
"#;

    format!("{comments}\n{yaml}")
}
