//! Prometheus metrics definitions for paas-prometheus-exporter.
//!
//! This module defines the exporter's own reconcile telemetry and the
//! per-application series that watchers publish.

use prometheus::{Gauge, GaugeVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry};

use crate::watcher::WatcherAction;

/// Label names shared by all per-application series.
pub const APP_LABELS: &[&str] = &["guid", "app", "space"];

/// Telemetry about the reconcile loop itself.
#[derive(Clone)]
pub struct ReconcilerMetrics {
    pub ticks_total: IntCounter,
    pub fetch_errors_total: IntCounter,
    pub actions_total: IntCounterVec,
    pub action_errors_total: IntCounterVec,
    pub watched_apps: IntGauge,
    pub last_tick_duration: Gauge,
    pub last_tick_success: Gauge,
}

impl ReconcilerMetrics {
    /// Creates and registers the reconcile metrics with the registry.
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let ticks_total = IntCounter::new(
            "paas_exporter_reconcile_ticks_total",
            "Number of completed reconcile ticks",
        )?;
        let fetch_errors_total = IntCounter::new(
            "paas_exporter_snapshot_fetch_errors_total",
            "Number of ticks abandoned because the application list could not be fetched",
        )?;
        let actions_total = IntCounterVec::new(
            Opts::new(
                "paas_exporter_watcher_actions_total",
                "Successful watcher actions by kind",
            ),
            &["action"],
        )?;
        let action_errors_total = IntCounterVec::new(
            Opts::new(
                "paas_exporter_watcher_action_errors_total",
                "Failed watcher actions by kind",
            ),
            &["action"],
        )?;
        let watched_apps = IntGauge::new(
            "paas_exporter_watched_apps",
            "Number of applications currently watched",
        )?;
        let last_tick_duration = Gauge::new(
            "paas_exporter_last_tick_duration_seconds",
            "Time spent in the most recent reconcile tick",
        )?;
        let last_tick_success = Gauge::new(
            "paas_exporter_last_tick_success",
            "Whether the most recent application list fetch succeeded (1) or failed (0)",
        )?;

        registry.register(Box::new(ticks_total.clone()))?;
        registry.register(Box::new(fetch_errors_total.clone()))?;
        registry.register(Box::new(actions_total.clone()))?;
        registry.register(Box::new(action_errors_total.clone()))?;
        registry.register(Box::new(watched_apps.clone()))?;
        registry.register(Box::new(last_tick_duration.clone()))?;
        registry.register(Box::new(last_tick_success.clone()))?;

        Ok(Self {
            ticks_total,
            fetch_errors_total,
            actions_total,
            action_errors_total,
            watched_apps,
            last_tick_duration,
            last_tick_success,
        })
    }

    pub fn record_action(&self, action: WatcherAction, ok: bool) {
        let vec = if ok {
            &self.actions_total
        } else {
            &self.action_errors_total
        };
        vec.with_label_values(&[action.as_str()]).inc();
    }
}

/// Per-application series published by watchers.
#[derive(Clone)]
pub struct AppMetrics {
    pub instances: GaugeVec,
    pub info: GaugeVec,
}

impl AppMetrics {
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let instances = GaugeVec::new(
            Opts::new("paas_app_instances", "Number of running instances per application"),
            APP_LABELS,
        )?;
        let info = GaugeVec::new(
            Opts::new(
                "paas_app_info",
                "Constant 1 for every application that is currently watched",
            ),
            APP_LABELS,
        )?;

        registry.register(Box::new(instances.clone()))?;
        registry.register(Box::new(info.clone()))?;

        Ok(Self { instances, info })
    }

    pub fn set_app(&self, labels: &[&str; 3], instances: u32) {
        self.instances.with_label_values(labels).set(instances as f64);
        self.info.with_label_values(labels).set(1.0);
    }

    pub fn set_instances(&self, labels: &[&str; 3], instances: u32) {
        self.instances.with_label_values(labels).set(instances as f64);
    }

    /// Drops all series of one application.
    pub fn remove_app(&self, labels: &[&str; 3]) -> Result<(), prometheus::Error> {
        self.instances.remove_label_values(labels)?;
        self.info.remove_label_values(labels)?;
        Ok(())
    }
}
