//! In-memory store. State is not persisted across restarts.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use super::{EpisodeRecord, ScrapeStore, StoreResult};
use crate::bulk::{BulkJobProgress, EpisodeLogEntry};

#[derive(Default)]
pub struct MemoryStore {
    episodes: RwLock<HashMap<(String, u32), EpisodeRecord>>,
    jobs: RwLock<HashMap<String, BulkJobProgress>>,
    /// job id -> episode number -> entry
    logs: RwLock<HashMap<String, BTreeMap<u32, EpisodeLogEntry>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn episode_count(&self) -> usize {
        self.episodes.read().await.len()
    }
}

#[async_trait]
impl ScrapeStore for MemoryStore {
    async fn upsert_episode(
        &self,
        anime_id: &str,
        episode_number: u32,
        stream_url: &str,
        title: &str,
    ) -> StoreResult<()> {
        let record = EpisodeRecord {
            anime_id: anime_id.to_string(),
            episode_number,
            stream_url: stream_url.to_string(),
            title: title.to_string(),
            updated_at: Utc::now(),
        };
        self.episodes
            .write()
            .await
            .insert((anime_id.to_string(), episode_number), record);
        Ok(())
    }

    async fn episode(
        &self,
        anime_id: &str,
        episode_number: u32,
    ) -> StoreResult<Option<EpisodeRecord>> {
        Ok(self
            .episodes
            .read()
            .await
            .get(&(anime_id.to_string(), episode_number))
            .cloned())
    }

    async fn upsert_job_progress(&self, progress: &BulkJobProgress) -> StoreResult<()> {
        self.jobs
            .write()
            .await
            .insert(progress.job_id.clone(), progress.clone());
        Ok(())
    }

    async fn job_progress(&self, job_id: &str) -> StoreResult<Option<BulkJobProgress>> {
        Ok(self.jobs.read().await.get(job_id).cloned())
    }

    async fn upsert_episode_log(&self, entry: &EpisodeLogEntry) -> StoreResult<()> {
        self.logs
            .write()
            .await
            .entry(entry.job_id.clone())
            .or_default()
            .insert(entry.episode_number, entry.clone());
        Ok(())
    }

    async fn episode_logs(&self, job_id: &str) -> StoreResult<Vec<EpisodeLogEntry>> {
        Ok(self
            .logs
            .read()
            .await
            .get(job_id)
            .map(|entries| entries.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn replace_episode_logs(
        &self,
        job_id: &str,
        entries: &[EpisodeLogEntry],
    ) -> StoreResult<()> {
        let fresh: BTreeMap<u32, EpisodeLogEntry> = entries
            .iter()
            .map(|e| (e.episode_number, e.clone()))
            .collect();
        self.logs.write().await.insert(job_id.to_string(), fresh);
        Ok(())
    }
}
