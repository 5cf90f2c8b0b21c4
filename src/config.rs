//! Configuration management for paas-prometheus-exporter.
//!
//! Configuration is merged from defaults, an optional YAML/JSON/TOML file and
//! CLI flags (which also read credentials from the environment). CLI wins over
//! the file, the file wins over defaults.

use anyhow::{anyhow, bail, Context, Result};
use paas_prometheus_exporter::cf::{CfClientConfig, Credentials, DEFAULT_CLIENT_ID, DEFAULT_RESULTS_PER_PAGE};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::cli::{Args, ConfigFormat};

// Default configuration constants
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_UPDATE_FREQUENCY: u64 = 300;
pub const DEFAULT_REQUEST_TIMEOUT: u64 = 30;

const REDACTED: &str = "<redacted>";

/// Default config file locations, checked in order.
const DEFAULT_CONFIG_PATHS: &[&str] = &[
    "/etc/paas-prometheus-exporter/config.yaml",
    "/etc/paas-prometheus-exporter/config.yml",
    "/etc/paas-prometheus-exporter/config.json",
    "/etc/paas-prometheus-exporter/config.toml",
    "./paas-prometheus-exporter.yaml",
    "./paas-prometheus-exporter.yml",
    "./paas-prometheus-exporter.json",
    "./paas-prometheus-exporter.toml",
];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    // Server configuration
    pub port: Option<u16>,
    pub bind: Option<String>,

    // Platform connection
    #[serde(alias = "api-endpoint")]
    pub api_endpoint: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    #[serde(alias = "client-id")]
    pub client_id: Option<String>,
    #[serde(alias = "client-secret")]
    pub client_secret: Option<String>,
    pub token: Option<String>,
    #[serde(alias = "skip-ssl-validation")]
    pub skip_ssl_validation: Option<bool>,
    /// Seconds per platform request
    #[serde(alias = "request-timeout")]
    pub request_timeout: Option<u64>,

    // Reconcile loop
    /// Seconds between application list polls
    #[serde(alias = "update-frequency")]
    pub update_frequency: Option<u64>,
    /// Cloud Foundry `q` filters, e.g. `space_guid:<guid>`
    #[serde(alias = "app-query")]
    pub app_query: Option<Vec<String>>,

    // Feature flags
    #[serde(alias = "enable-health")]
    pub enable_health: Option<bool>,

    // Logging
    #[serde(alias = "log-level")]
    pub log_level: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: Some(DEFAULT_PORT),
            bind: Some(DEFAULT_BIND_ADDR.to_string()),
            api_endpoint: None,
            username: None,
            password: None,
            client_id: None,
            client_secret: None,
            token: None,
            skip_ssl_validation: Some(false),
            request_timeout: Some(DEFAULT_REQUEST_TIMEOUT),
            update_frequency: Some(DEFAULT_UPDATE_FREQUENCY),
            app_query: None,
            enable_health: Some(true),
            log_level: Some("info".into()),
        }
    }
}

impl Config {
    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_frequency.unwrap_or(DEFAULT_UPDATE_FREQUENCY))
    }

    /// Picks the single configured credential style.
    ///
    /// A token excludes every other credential. With username and password,
    /// `client_id`/`client_secret` name the OAuth client of the password grant
    /// (default `cf`); without them they form a client credentials grant.
    pub fn credentials(&self) -> Result<Credentials> {
        if let Some(token) = self.token.as_ref().filter(|t| !t.is_empty()) {
            if self.username.is_some()
                || self.password.is_some()
                || self.client_id.is_some()
                || self.client_secret.is_some()
            {
                bail!("token cannot be combined with username/password or client_id/client_secret");
            }
            return Ok(Credentials::Token(token.clone()));
        }
        match (&self.username, &self.password, &self.client_id, &self.client_secret) {
            (Some(username), Some(password), client_id, client_secret) => Ok(Credentials::Password {
                username: username.clone(),
                password: password.clone(),
                client_id: client_id.clone().unwrap_or_else(|| DEFAULT_CLIENT_ID.to_string()),
                client_secret: client_secret.clone().unwrap_or_default(),
            }),
            (None, None, Some(client_id), Some(client_secret)) => Ok(Credentials::ClientCredentials {
                client_id: client_id.clone(),
                client_secret: client_secret.clone(),
            }),
            (Some(_), None, _, _) | (None, Some(_), _, _) => {
                Err(anyhow!("username and password must be set together"))
            }
            _ => Err(anyhow!(
                "no usable credentials: set token, username+password, or client_id+client_secret"
            )),
        }
    }

    pub fn cf_client_config(&self) -> Result<CfClientConfig> {
        Ok(CfClientConfig {
            api_endpoint: self
                .api_endpoint
                .clone()
                .ok_or_else(|| anyhow!("api_endpoint is required"))?,
            credentials: self.credentials()?,
            app_query: self.app_query.clone().unwrap_or_default(),
            request_timeout: Duration::from_secs(
                self.request_timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT),
            ),
            skip_ssl_validation: self.skip_ssl_validation.unwrap_or(false),
            results_per_page: DEFAULT_RESULTS_PER_PAGE,
        })
    }

    /// Copy with secrets replaced, for display.
    pub fn redacted(&self) -> Self {
        let hide = |v: &Option<String>| v.as_ref().map(|_| REDACTED.to_string());
        Self {
            password: hide(&self.password),
            client_secret: hide(&self.client_secret),
            token: hide(&self.token),
            ..self.clone()
        }
    }
}

/// Validate effective config (used by --check-config and at startup)
pub fn validate_effective_config(cfg: &Config) -> Result<()> {
    match cfg.api_endpoint.as_deref() {
        None | Some("") => bail!("api_endpoint is required"),
        Some(endpoint) if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) => {
            bail!("api_endpoint '{}' must start with http:// or https://", endpoint)
        }
        Some(_) => {}
    }

    cfg.credentials()?;

    if cfg.update_frequency == Some(0) {
        bail!("update_frequency must be greater than 0");
    }
    if cfg.request_timeout == Some(0) {
        bail!("request_timeout must be greater than 0");
    }
    if cfg.port == Some(0) {
        bail!("port must not be 0");
    }
    if let Some(bind) = cfg.bind.as_deref() {
        bind.parse::<std::net::IpAddr>()
            .with_context(|| format!("invalid bind address '{bind}'"))?;
    }

    Ok(())
}

/// Resolves configuration from CLI args, config file, and defaults
pub fn resolve_config(args: &Args) -> Result<Config> {
    let mut config = if args.no_config {
        Config::default()
    } else {
        load_config(args.config.as_deref())?
    };

    if let Some(bind_ip) = args.bind {
        config.bind = Some(bind_ip.to_string());
    }
    if let Some(port) = args.port {
        config.port = Some(port);
    }

    // Platform connection
    if args.api_endpoint.is_some() {
        config.api_endpoint = args.api_endpoint.clone();
    }
    if args.username.is_some() {
        config.username = args.username.clone();
    }
    if args.password.is_some() {
        config.password = args.password.clone();
    }
    if args.client_id.is_some() {
        config.client_id = args.client_id.clone();
    }
    if args.client_secret.is_some() {
        config.client_secret = args.client_secret.clone();
    }
    if args.token.is_some() {
        config.token = args.token.clone();
    }
    if args.request_timeout.is_some() {
        config.request_timeout = args.request_timeout;
    }
    if args.skip_ssl_validation {
        config.skip_ssl_validation = Some(true);
    }

    // Reconcile loop
    if args.update_frequency.is_some() {
        config.update_frequency = args.update_frequency;
    }
    if !args.app_query.is_empty() {
        config.app_query = Some(args.app_query.clone());
    }

    if args.disable_health {
        config.enable_health = Some(false);
    }

    Ok(config)
}

/// Loads the config file at `path`, or the first default location that exists.
///
/// Missing fields fall back to defaults; no file at all yields `Config::default()`.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = match path {
        Some(p) => {
            if !p.exists() {
                bail!("config file {} does not exist", p.display());
            }
            p.to_path_buf()
        }
        None => match DEFAULT_CONFIG_PATHS
            .iter()
            .map(PathBuf::from)
            .find(|p| p.exists())
        {
            Some(p) => p,
            None => return Ok(Config::default()),
        },
    };

    let content = fs::read_to_string(&path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;

    let loaded: Config = match path.extension().and_then(|s| s.to_str()) {
        Some("json") => serde_json::from_str(&content)
            .with_context(|| format!("invalid JSON in {}", path.display()))?,
        Some("toml") => toml::from_str(&content)
            .with_context(|| format!("invalid TOML in {}", path.display()))?,
        _ => serde_yaml::from_str(&content)
            .with_context(|| format!("invalid YAML in {}", path.display()))?,
    };
    info!("Loaded configuration from: {}", path.display());

    Ok(merge_defaults(loaded))
}

/// Fills every field the file left out with its default.
fn merge_defaults(loaded: Config) -> Config {
    let d = Config::default();
    Config {
        port: loaded.port.or(d.port),
        bind: loaded.bind.or(d.bind),
        api_endpoint: loaded.api_endpoint,
        username: loaded.username,
        password: loaded.password,
        client_id: loaded.client_id,
        client_secret: loaded.client_secret,
        token: loaded.token,
        skip_ssl_validation: loaded.skip_ssl_validation.or(d.skip_ssl_validation),
        request_timeout: loaded.request_timeout.or(d.request_timeout),
        update_frequency: loaded.update_frequency.or(d.update_frequency),
        app_query: loaded.app_query,
        enable_health: loaded.enable_health.or(d.enable_health),
        log_level: loaded.log_level.or(d.log_level),
    }
}

/// Serializes a configuration in the requested format.
pub fn render_config(config: &Config, format: &ConfigFormat) -> Result<String> {
    Ok(match format {
        ConfigFormat::Json => serde_json::to_string_pretty(config)?,
        ConfigFormat::Toml => toml::to_string_pretty(config)?,
        ConfigFormat::Yaml => serde_yaml::to_string(config)?,
    })
}

/// Shows configuration in requested format, with secrets redacted
pub fn show_config(config: &Config, format: &ConfigFormat) -> Result<()> {
    println!("{}", render_config(&config.redacted(), format)?);
    Ok(())
}
