//! Application snapshot source.

use async_trait::async_trait;
use thiserror::Error;

use crate::app::ApplicationRecord;

/// Failure to obtain an application snapshot.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("platform request failed: {0}")]
    Request(String),

    #[error("platform request timed out")]
    Timeout,

    #[error("platform authentication failed: {0}")]
    Auth(String),

    #[error("unexpected platform response: {0}")]
    InvalidResponse(String),
}

/// Supplies the current full list of applications matching a fixed,
/// previously configured query.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn list_applications(&self) -> Result<Vec<ApplicationRecord>, SnapshotError>;
}

#[async_trait]
impl<T: SnapshotSource + ?Sized> SnapshotSource for std::sync::Arc<T> {
    async fn list_applications(&self) -> Result<Vec<ApplicationRecord>, SnapshotError> {
        (**self).list_applications().await
    }
}
