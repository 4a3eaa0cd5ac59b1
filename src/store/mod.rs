//! Row store for scraped episodes and bulk job state.
//!
//! Allows swapping between in-memory (tests, one-off runs) and SQLite
//! (chunk runs that survive restarts).

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use crate::bulk::{BulkJobProgress, EpisodeLogEntry};

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors from store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),
    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

/// A scraped, playable episode.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EpisodeRecord {
    pub anime_id: String,
    pub episode_number: u32,
    pub stream_url: String,
    pub title: String,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait ScrapeStore: Send + Sync {
    async fn upsert_episode(
        &self,
        anime_id: &str,
        episode_number: u32,
        stream_url: &str,
        title: &str,
    ) -> StoreResult<()>;

    async fn episode(&self, anime_id: &str, episode_number: u32)
        -> StoreResult<Option<EpisodeRecord>>;

    async fn upsert_job_progress(&self, progress: &BulkJobProgress) -> StoreResult<()>;

    async fn job_progress(&self, job_id: &str) -> StoreResult<Option<BulkJobProgress>>;

    async fn upsert_episode_log(&self, entry: &EpisodeLogEntry) -> StoreResult<()>;

    /// All log entries of a job, ordered by episode number.
    async fn episode_logs(&self, job_id: &str) -> StoreResult<Vec<EpisodeLogEntry>>;

    /// Drop every log entry of a job and insert `entries` in their place.
    async fn replace_episode_logs(
        &self,
        job_id: &str,
        entries: &[EpisodeLogEntry],
    ) -> StoreResult<()>;
}

/// Persist a successful scrape. Failures are logged, never returned: the
/// scrape itself already succeeded.
pub async fn save_episode_result(
    store: &dyn ScrapeStore,
    anime_id: &str,
    episode_number: u32,
    stream_url: &str,
    title: &str,
) -> bool {
    match store
        .upsert_episode(anime_id, episode_number, stream_url, title)
        .await
    {
        Ok(()) => true,
        Err(e) => {
            warn!(
                "Failed to save episode {} of {}: {}",
                episode_number, anime_id, e
            );
            false
        }
    }
}
