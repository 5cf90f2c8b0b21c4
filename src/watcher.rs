//! Watcher manager interface.
//!
//! A watcher manager owns the per-application watchers. The reconciler only
//! creates, updates and destroys them through this trait and never looks
//! inside the handles it gets back.

use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

use crate::app::ApplicationRecord;

/// Kind of action the reconciler issues against a watcher manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatcherAction {
    Create,
    Update,
    Delete,
}

impl WatcherAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            WatcherAction::Create => "create",
            WatcherAction::Update => "update",
            WatcherAction::Delete => "delete",
        }
    }
}

impl fmt::Display for WatcherAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of a single watcher action.
#[derive(Debug, Error)]
pub enum WatcherError {
    #[error("a watcher for {0} already exists")]
    AlreadyWatched(String),

    #[error("no watcher registered for {0}")]
    UnknownWatcher(String),

    #[error("metrics registration failed: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("{0}")]
    Other(String),
}

/// Lifecycle operations on per-application watchers.
///
/// `add_watcher` is called at most once per watch key between a create and
/// the matching delete. `update_instance_count` and `delete_watcher` are
/// only ever called with handles returned by `add_watcher` that have not
/// been deleted yet.
#[async_trait]
pub trait WatcherManager: Send + Sync {
    type Handle: Send + Sync + 'static;

    async fn add_watcher(&self, record: &ApplicationRecord) -> Result<Self::Handle, WatcherError>;

    async fn update_instance_count(
        &self,
        handle: &Self::Handle,
        instances: u32,
    ) -> Result<(), WatcherError>;

    async fn delete_watcher(&self, handle: &Self::Handle) -> Result<(), WatcherError>;
}

#[async_trait]
impl<T: WatcherManager + ?Sized> WatcherManager for std::sync::Arc<T> {
    type Handle = T::Handle;

    async fn add_watcher(&self, record: &ApplicationRecord) -> Result<Self::Handle, WatcherError> {
        (**self).add_watcher(record).await
    }

    async fn update_instance_count(
        &self,
        handle: &Self::Handle,
        instances: u32,
    ) -> Result<(), WatcherError> {
        (**self).update_instance_count(handle, instances).await
    }

    async fn delete_watcher(&self, handle: &Self::Handle) -> Result<(), WatcherError> {
        (**self).delete_watcher(handle).await
    }
}
