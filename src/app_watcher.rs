//! Prometheus-backed watcher manager.
//!
//! Each watcher publishes the instance count and an info series for one
//! application. Deleting a watcher removes its series so a scrape never
//! reports applications that are gone.

use ahash::AHashSet as HashSet;
use async_trait::async_trait;
use std::sync::Mutex;
use tracing::debug;

use crate::app::{ApplicationRecord, WatchKey};
use crate::metrics::AppMetrics;
use crate::watcher::{WatcherError, WatcherManager};

/// Handle to one application watcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppHandle {
    guid: String,
    name: String,
    space: String,
}

impl AppHandle {
    fn labels(&self) -> [&str; 3] {
        [self.guid.as_str(), self.name.as_str(), self.space.as_str()]
    }

    fn key(&self) -> WatchKey {
        WatchKey {
            guid: self.guid.clone(),
            name: self.name.clone(),
        }
    }
}

/// Watcher manager exposing per-application gauges on a registry.
pub struct InstanceWatcherManager {
    metrics: AppMetrics,
    active: Mutex<HashSet<WatchKey>>,
}

impl InstanceWatcherManager {
    pub fn new(metrics: AppMetrics) -> Self {
        Self {
            metrics,
            active: Mutex::new(HashSet::new()),
        }
    }

    fn lock_active(&self) -> Result<std::sync::MutexGuard<'_, HashSet<WatchKey>>, WatcherError> {
        self.active
            .lock()
            .map_err(|_| WatcherError::Other("watcher table lock poisoned".into()))
    }
}

#[async_trait]
impl WatcherManager for InstanceWatcherManager {
    type Handle = AppHandle;

    async fn add_watcher(&self, record: &ApplicationRecord) -> Result<AppHandle, WatcherError> {
        let key = record.watch_key();
        let mut active = self.lock_active()?;
        if active.contains(&key) {
            return Err(WatcherError::AlreadyWatched(key.to_string()));
        }

        let handle = AppHandle {
            guid: record.guid.clone(),
            name: record.name.clone(),
            space: record.space.clone(),
        };
        self.metrics.set_app(&handle.labels(), record.instances);
        active.insert(key);

        debug!(guid = %handle.guid, app = %handle.name, "Watcher registered");
        Ok(handle)
    }

    async fn update_instance_count(
        &self,
        handle: &AppHandle,
        instances: u32,
    ) -> Result<(), WatcherError> {
        let key = handle.key();
        if !self.lock_active()?.contains(&key) {
            return Err(WatcherError::UnknownWatcher(key.to_string()));
        }
        self.metrics.set_instances(&handle.labels(), instances);
        Ok(())
    }

    async fn delete_watcher(&self, handle: &AppHandle) -> Result<(), WatcherError> {
        let key = handle.key();
        let mut active = self.lock_active()?;
        if !active.contains(&key) {
            return Err(WatcherError::UnknownWatcher(key.to_string()));
        }
        // Forget the watcher only after its series are removed.
        self.metrics.remove_app(&handle.labels())?;
        active.remove(&key);

        debug!(guid = %handle.guid, app = %handle.name, "Watcher removed");
        Ok(())
    }
}
