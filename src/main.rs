// paas-prometheus-exporter - version 0.1.0
// Keeps one metrics watcher per running Cloud Foundry application
use anyhow::{Context, Result};
use axum::{routing::get, Router};
use clap::Parser;
use paas_prometheus_exporter::{
    AppMetrics, CfClient, InstanceWatcherManager, Reconciler, ReconcilerMetrics,
};
use prometheus::{Gauge, Registry};
use std::{net::SocketAddr, str::FromStr, sync::Arc};
use tokio::{net::TcpListener, signal};
use tracing::{debug, error, info, level_filters::LevelFilter, warn};

mod cli;
mod commands;
mod config;
mod handlers;
mod state;

use cli::{Args, Commands, LogLevel};
use config::{resolve_config, show_config, validate_effective_config, Config, DEFAULT_BIND_ADDR, DEFAULT_PORT};
use handlers::{apps_handler, doc_handler, health_handler, metrics_handler};
use state::AppState;

/// Initializes tracing logging subsystem (CLI level > config level > info)
fn setup_logging(config: &Config, args: &Args) {
    let level = match &args.log_level {
        Some(LogLevel::Off) => LevelFilter::OFF,
        Some(LogLevel::Error) => LevelFilter::ERROR,
        Some(LogLevel::Warn) => LevelFilter::WARN,
        Some(LogLevel::Info) => LevelFilter::INFO,
        Some(LogLevel::Debug) => LevelFilter::DEBUG,
        Some(LogLevel::Trace) => LevelFilter::TRACE,
        None => config
            .log_level
            .as_deref()
            .and_then(|l| LevelFilter::from_str(l).ok())
            .unwrap_or(LevelFilter::INFO),
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");

    info!("Logging initialized with level: {}", level);
}

/// Resolves and validates config, exiting with code 1 when it is invalid
fn effective_config(args: &Args) -> Result<Config> {
    let config = resolve_config(args)?;
    if let Err(e) = validate_effective_config(&config) {
        eprintln!("Configuration invalid: {e:#}");
        std::process::exit(1);
    }
    Ok(config)
}

/// Completes on SIGINT or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C), shutting down gracefully...");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down gracefully...");
        }
    }
}

/// -------------------------------------------------------------------
/// MAIN APPLICATION ENTRY POINT
/// -------------------------------------------------------------------
#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.check_config {
        effective_config(&args)?;
        println!("Configuration is valid");
        return Ok(());
    }

    if args.show_config {
        let config = resolve_config(&args)?;
        return show_config(&config, &args.config_format);
    }

    // Handle subcommands
    if let Some(command) = &args.command {
        return match command {
            Commands::Apps {
                started_only,
                format,
            } => {
                let config = effective_config(&args)?;
                setup_logging(&config, &args);
                commands::command_apps(&config, *started_only, format.clone()).await
            }
            Commands::Config {
                output,
                format,
                commented,
            } => commands::command_config(output.clone(), format.clone(), *commented),
        };
    }

    // Load configuration for main server mode
    let config = effective_config(&args)?;

    // Setup logging subsystem first to enable proper logging
    setup_logging(&config, &args);

    info!("Starting paas-prometheus-exporter");

    let bind_ip_str = config.bind.as_deref().unwrap_or(DEFAULT_BIND_ADDR);
    let port = config.port.unwrap_or(DEFAULT_PORT);

    // Initialize Prometheus metrics registry
    let registry = Registry::new();
    let reconciler_metrics = ReconcilerMetrics::new(&registry)?;
    let app_metrics = AppMetrics::new(&registry)?;
    let scrape_duration = Gauge::new(
        "paas_exporter_scrape_duration_seconds",
        "Time spent serving the previous /metrics request",
    )?;
    registry.register(Box::new(scrape_duration.clone()))?;
    debug!("All metrics registered successfully");

    // Platform client and watcher manager
    let client = CfClient::new(config.cf_client_config()?)
        .context("failed to build Cloud Foundry API client")?;
    let manager = InstanceWatcherManager::new(app_metrics);

    let reconciler = Reconciler::new(client, manager).with_metrics(reconciler_metrics);

    // Create shared application state
    let state = Arc::new(AppState {
        registry,
        scrape_duration,
        watched: reconciler.watched_set(),
        health_stats: reconciler.stats(),
        config: Arc::new(config.clone()),
    });

    let interval = config.update_interval();
    info!(
        "Polling {} every {}s (first poll after one interval)",
        config.api_endpoint.as_deref().unwrap_or_default(),
        interval.as_secs()
    );
    let reconciler = reconciler.spawn(interval);

    // Configure HTTP server routes and start listening
    let addr: SocketAddr = format!("{}:{}", bind_ip_str, port).parse()?;

    let mut app = Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/apps", get(apps_handler))
        .route("/doc", get(doc_handler));

    // Conditionally add health endpoint
    if config.enable_health.unwrap_or(true) {
        app = app.route("/health", get(health_handler));
    }

    let app = app.with_state(state.clone());

    let listener = TcpListener::bind(addr).await?;
    info!(
        "paas-prometheus-exporter listening on http://{}:{}",
        bind_ip_str, port
    );

    let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal());
    let served = server.await;
    if let Err(e) = &served {
        error!("Server error: {}", e);
    }

    // Let the in-flight tick, if any, finish before exiting
    match reconciler.stop().await {
        Ok(r) => info!(watched = r.watched_len(), "Reconcile loop finished"),
        Err(e) => warn!("Reconcile task ended abnormally: {}", e),
    }

    info!("paas-prometheus-exporter stopped gracefully");
    served.map_err(Into::into)
}
