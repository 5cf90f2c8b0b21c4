//! Application state management for the exporter.
//!
//! This module defines the shared application state that is passed
//! to HTTP handlers. The reconcile loop publishes into `watched` and
//! `health_stats`; handlers only read.

use paas_prometheus_exporter::{HealthStats, SharedWatchedSet};
use prometheus::{Gauge, Registry};
use std::sync::Arc;

use crate::config::Config;

/// Type alias for shared application state.
pub type SharedState = Arc<AppState>;

/// Global application state shared across requests.
pub struct AppState {
    pub registry: Registry,
    pub scrape_duration: Gauge,
    /// Watched applications as of the last completed tick.
    pub watched: SharedWatchedSet,
    pub health_stats: Arc<HealthStats>,
    pub config: Arc<Config>,
}
