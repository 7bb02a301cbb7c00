use crate::models::{ClickMetadata, Feedback, Link};
use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("short code already exists")]
    Conflict,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

#[async_trait]
pub trait Storage: Send + Sync {
    /// Initialize the storage (create tables and indexes)
    async fn init(&self) -> Result<()>;

    /// Atomically advance the named sequence and return the new value.
    /// The first call for a name returns 1.
    async fn next_sequence(&self, name: &str) -> Result<u64>;

    /// Persist a new link with zeroed click aggregates.
    /// Fails with [`StorageError::Conflict`] when the short code is taken.
    async fn create(&self, link: &Link) -> StorageResult<Link>;

    async fn find_by_code(&self, short_code: &str) -> Result<Option<Link>>;

    /// All links created by `owner_id`, newest first
    async fn find_by_owner(&self, owner_id: i64) -> Result<Vec<Link>>;

    /// Delete a link only if `owner_id` created it. Returns whether a row was removed.
    async fn delete_by_code_and_owner(&self, short_code: &str, owner_id: i64) -> Result<bool>;

    /// Fold one click into the link's aggregates as a single atomic update:
    /// increment the counter, widen the first/last-click window to include
    /// `metadata.clicked_at` and union the metadata into the facet sets.
    ///
    /// Clicks may be recorded out of the order they were observed in, so
    /// first-click is the earliest observation time, not the first write.
    ///
    /// Returns `false` when no link has this code.
    async fn record_click(&self, short_code: &str, metadata: &ClickMetadata) -> Result<bool>;

    async fn latest_feedback_at(&self, owner_id: i64) -> Result<Option<i64>>;

    async fn insert_feedback(&self, feedback: &Feedback) -> Result<()>;
}
