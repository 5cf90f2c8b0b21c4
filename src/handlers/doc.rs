//! Documentation endpoint handler.
//!
//! This module provides the `/doc` endpoint handler that displays
//! documentation for the exporter.

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use tracing::{debug, instrument};

use crate::config::{DEFAULT_PORT, DEFAULT_UPDATE_FREQUENCY};
use crate::state::SharedState;

/// Handler for the /doc endpoint.
#[instrument(skip(state))]
pub async fn doc_handler(State(state): State<SharedState>) -> impl IntoResponse {
    debug!("Processing /doc request");

    let version = env!("CARGO_PKG_VERSION");
    let interval = state.config.update_interval().as_secs();
    let doc = format!(
        r#"PAAS PROMETHEUS EXPORTER - DOCUMENTATION
========================================

VERSION: {version}
DESCRIPTION: Prometheus exporter for Cloud Foundry application instances

HTTP ENDPOINTS
--------------
GET /metrics     - Prometheus metrics endpoint
GET /health      - Outcome of the last reconcile tick with statistics (plain text)
GET /apps        - Currently watched applications (plain text)
GET /doc         - This documentation (plain text)

AVAILABLE METRICS
-----------------
paas_app_instances{{guid,app,space}}            - Running instances per watched application
paas_app_info{{guid,app,space}}                 - 1 for every watched application

paas_exporter_reconcile_ticks_total           - Completed reconcile ticks
paas_exporter_snapshot_fetch_errors_total     - Ticks skipped because the app list fetch failed
paas_exporter_watcher_actions_total{{action}}   - Successful create/update/delete actions
paas_exporter_watcher_action_errors_total{{action}} - Failed create/update/delete actions
paas_exporter_watched_apps                    - Applications currently watched
paas_exporter_last_tick_duration_seconds      - Duration of the last tick
paas_exporter_last_tick_success               - 1 if the last fetch succeeded, else 0
paas_exporter_scrape_duration_seconds         - Duration of the previous /metrics request

RECONCILE LOOP
--------------
Every {interval}s (default {DEFAULT_UPDATE_FREQUENCY}s) the exporter lists the applications
visible to its credentials. The first poll happens one interval after startup.
A watcher is created for every STARTED application, resized when its instance
count changes and removed when the application is stopped or deleted. A rename
replaces the watcher. A failed poll changes nothing; the next poll retries.

CONFIGURATION
-------------
Config file locations (in order):
1. CLI specified: -c /path/to/config.yaml
2. System config: /etc/paas-prometheus-exporter/config.{{yaml,yml,json,toml}}
3. Current directory: ./paas-prometheus-exporter.{{yaml,yml,json,toml}}

Key configuration options:
- port: HTTP listen port (default: {DEFAULT_PORT})
- api_endpoint: Cloud Foundry API URL (required)
- username/password, client_id/client_secret or token: credentials
- update_frequency: Seconds between polls (default: {DEFAULT_UPDATE_FREQUENCY})
- app_query: List of Cloud Foundry q filters
"#
    );

    (
        StatusCode::OK,
        [("Content-Type", "text/plain; charset=utf-8")],
        doc,
    )
}
