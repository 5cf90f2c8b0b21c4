//! paas-prometheus-exporter library.
//!
//! Keeps one watcher per running Cloud Foundry application. The
//! [`reconciler::Reconciler`] polls a [`source::SnapshotSource`] and drives a
//! [`watcher::WatcherManager`]; the binary wires it to the Cloud Foundry API
//! client and the Prometheus-backed watcher manager.

pub mod app;
pub mod app_watcher;
pub mod cf;
pub mod health;
pub mod metrics;
pub mod reconciler;
pub mod source;
pub mod watcher;

pub use app::{ApplicationRecord, LifecycleState, WatchKey};
pub use app_watcher::{AppHandle, InstanceWatcherManager};
pub use cf::{CfClient, CfClientConfig, CfError, Credentials};
pub use health::HealthStats;
pub use metrics::{AppMetrics, ReconcilerMetrics};
pub use reconciler::{
    Reconciler, ReconcilerHandle, SharedWatchedSet, TickReport, WatchedApp, WatchedSet,
};
pub use source::{SnapshotError, SnapshotSource};
pub use watcher::{WatcherAction, WatcherError, WatcherManager};
