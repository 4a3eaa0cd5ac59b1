//! Chunked bulk scraping for long series.
//!
//! A job covers episodes `1..=total` split into fixed-size chunks. Each
//! `scrape_chunk` call runs one chunk sequentially with a fixed delay
//! between episodes; the caller decides when to run the next chunk.

mod models;

pub use models::{
    job_id_for, total_chunks, BulkEvent, BulkJobProgress, ChunkResult, EpisodeLogEntry,
    EpisodeStatus, JobStatus, JobStatusReport,
};

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::pipeline::{EpisodeScraper, ScrapeOptions};
use crate::store::{save_episode_result, ScrapeStore, StoreError};

#[derive(Debug, Error)]
pub enum JobError {
    #[error("job not found: {0}")]
    NotFound(String),
    #[error("chunk {chunk} out of range (job has {total_chunks} chunks)")]
    InvalidChunk { chunk: u32, total_chunks: u32 },
    #[error("invalid job parameters: {0}")]
    InvalidInput(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct BulkJobOrchestrator {
    scraper: Arc<dyn EpisodeScraper>,
    store: Arc<dyn ScrapeStore>,
    episode_delay: Duration,
    options: ScrapeOptions,
    events: Option<mpsc::Sender<BulkEvent>>,
}

impl BulkJobOrchestrator {
    pub fn new(scraper: Arc<dyn EpisodeScraper>, store: Arc<dyn ScrapeStore>) -> Self {
        Self {
            scraper,
            store,
            episode_delay: Duration::from_secs(3),
            options: ScrapeOptions::default(),
            events: None,
        }
    }

    /// Pause between consecutive episodes of a chunk.
    pub fn with_episode_delay(mut self, delay: Duration) -> Self {
        self.episode_delay = delay;
        self
    }

    pub fn with_scrape_options(mut self, options: ScrapeOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_events(mut self, events: mpsc::Sender<BulkEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Create (or reset) the job for an anime. Returns the job id.
    pub async fn start_job(
        &self,
        anime_id: &str,
        title: &str,
        total_episodes: u32,
        chunk_size: u32,
    ) -> Result<String, JobError> {
        if anime_id.trim().is_empty() {
            return Err(JobError::InvalidInput("anime id is empty".to_string()));
        }
        if total_episodes == 0 {
            return Err(JobError::InvalidInput("total episodes must be at least 1".to_string()));
        }
        if chunk_size == 0 {
            return Err(JobError::InvalidInput("chunk size must be at least 1".to_string()));
        }

        let progress = BulkJobProgress::new(anime_id, title, total_episodes, chunk_size);
        let entries: Vec<EpisodeLogEntry> = (1..=total_episodes)
            .map(|ep| EpisodeLogEntry::pending(&progress.job_id, ep, progress.chunk_of(ep)))
            .collect();

        self.store
            .replace_episode_logs(&progress.job_id, &entries)
            .await?;
        self.store.upsert_job_progress(&progress).await?;

        info!(
            "Started bulk job {} for {:?}: {} episodes in {} chunks of {}",
            progress.job_id, title, total_episodes, progress.total_chunks, chunk_size
        );
        Ok(progress.job_id)
    }

    /// Run one chunk. Episodes already scraped successfully are skipped.
    pub async fn scrape_chunk(&self, job_id: &str, chunk: u32) -> Result<ChunkResult, JobError> {
        let mut progress = self
            .store
            .job_progress(job_id)
            .await?
            .ok_or_else(|| JobError::NotFound(job_id.to_string()))?;
        let range = progress
            .chunk_range(chunk)
            .ok_or(JobError::InvalidChunk {
                chunk,
                total_chunks: progress.total_chunks,
            })?;

        let mut logs: BTreeMap<u32, EpisodeLogEntry> = self
            .store
            .episode_logs(job_id)
            .await?
            .into_iter()
            .map(|e| (e.episode_number, e))
            .collect();

        let range_len = range.end() - range.start() + 1;
        let targets: Vec<u32> = range
            .filter(|ep| logs.get(ep).map_or(true, |e| e.status.needs_scrape()))
            .collect();
        let skipped = range_len - targets.len() as u32;

        progress.current_chunk = chunk;
        progress.updated_at = Utc::now();
        self.save_progress(&progress).await;

        info!(
            "Job {} chunk {}/{}: {} to scrape, {} already done",
            job_id,
            chunk,
            progress.total_chunks,
            targets.len(),
            skipped
        );

        let mut scraped = 0;
        let mut failed = 0;
        for (i, &episode) in targets.iter().enumerate() {
            if i > 0 && !self.episode_delay.is_zero() {
                tokio::time::sleep(self.episode_delay).await;
            }

            let mut entry = logs
                .remove(&episode)
                .unwrap_or_else(|| EpisodeLogEntry::pending(job_id, episode, chunk));
            entry.status = EpisodeStatus::Scraping;
            self.save_log(&entry).await;
            self.emit(BulkEvent::EpisodeStarted {
                job_id: job_id.to_string(),
                chunk,
                episode,
            })
            .await;

            let result = self
                .scraper
                .scrape_episode(&progress.title, episode, self.options)
                .await;

            let succeeded = result.success && result.stream_url.is_some();
            let detail = match (&result.stream_url, result.success) {
                (Some(stream_url), true) => {
                    save_episode_result(
                        self.store.as_ref(),
                        &progress.anime_id,
                        episode,
                        stream_url,
                        &progress.title,
                    )
                    .await;
                    entry.status = EpisodeStatus::Success;
                    entry.stream_url = Some(stream_url.clone());
                    entry.error_message = None;
                    entry.scraped_at = Some(Utc::now());
                    scraped += 1;
                    debug!("Job {} episode {} scraped: {}", job_id, episode, stream_url);
                    Some(stream_url.clone())
                }
                _ => {
                    let message = result
                        .error
                        .as_ref()
                        .map(|e| e.to_string())
                        .unwrap_or_else(|| "no stream URL".to_string());
                    entry.status = EpisodeStatus::Failed;
                    entry.error_message = Some(message.clone());
                    failed += 1;
                    warn!("Job {} episode {} failed: {}", job_id, episode, message);
                    Some(message)
                }
            };
            self.save_log(&entry).await;
            logs.insert(episode, entry);

            let (completed_count, failed_count) = count_outcomes(&logs);
            progress.apply_counts(completed_count, failed_count);
            self.save_progress(&progress).await;

            self.emit(BulkEvent::EpisodeFinished {
                job_id: job_id.to_string(),
                chunk,
                episode,
                success: succeeded,
                detail,
            })
            .await;
        }

        self.emit(BulkEvent::ChunkCompleted {
            job_id: job_id.to_string(),
            chunk,
            scraped,
            failed,
        })
        .await;
        info!(
            "Job {} chunk {} done: {} scraped, {} failed ({:.1}% overall)",
            job_id,
            chunk,
            scraped,
            failed,
            progress.percent()
        );
        if progress.status.is_terminal() {
            info!("Job {} finished as {}", job_id, progress.status.as_str());
        }

        Ok(ChunkResult {
            job_id: job_id.to_string(),
            chunk_number: chunk,
            total_episodes: range_len,
            scraped_episodes: scraped,
            failed_episodes: failed,
            skipped_episodes: skipped,
            progress: report(progress, &logs),
        })
    }

    /// Stored progress plus percentage, ETA and the next unfinished chunk.
    pub async fn job_status(&self, job_id: &str) -> Result<JobStatusReport, JobError> {
        let progress = self
            .store
            .job_progress(job_id)
            .await?
            .ok_or_else(|| JobError::NotFound(job_id.to_string()))?;
        let logs: BTreeMap<u32, EpisodeLogEntry> = self
            .store
            .episode_logs(job_id)
            .await?
            .into_iter()
            .map(|e| (e.episode_number, e))
            .collect();
        Ok(report(progress, &logs))
    }

    async fn save_log(&self, entry: &EpisodeLogEntry) {
        if let Err(e) = self.store.upsert_episode_log(entry).await {
            warn!(
                "Failed to save log for {} episode {}: {}",
                entry.job_id, entry.episode_number, e
            );
        }
    }

    async fn save_progress(&self, progress: &BulkJobProgress) {
        if let Err(e) = self.store.upsert_job_progress(progress).await {
            warn!("Failed to save progress of {}: {}", progress.job_id, e);
        }
    }

    async fn emit(&self, event: BulkEvent) {
        if let Some(events) = &self.events {
            // A gone receiver only means nobody is watching
            let _ = events.send(event).await;
        }
    }
}

fn count_outcomes(logs: &BTreeMap<u32, EpisodeLogEntry>) -> (u32, u32) {
    logs.values().fold((0, 0), |(ok, bad), e| match e.status {
        EpisodeStatus::Success => (ok + 1, bad),
        EpisodeStatus::Failed => (ok, bad + 1),
        _ => (ok, bad),
    })
}

fn report(progress: BulkJobProgress, logs: &BTreeMap<u32, EpisodeLogEntry>) -> JobStatusReport {
    let next_chunk = (1..=progress.total_chunks).find(|&chunk| {
        progress.chunk_range(chunk).is_some_and(|mut range| {
            range.any(|ep| logs.get(&ep).map_or(true, |e| e.status.needs_scrape()))
        })
    });
    JobStatusReport {
        percent: progress.percent(),
        eta_secs: progress.eta(Utc::now()).map(|d| d.as_secs()),
        next_chunk,
        progress,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ScrapeError;
    use crate::pipeline::EpisodeScrapeResult;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::Mutex;

    /// Succeeds unless the episode is in `failing`.
    #[derive(Default)]
    struct ScriptedScraper {
        failing: Mutex<HashSet<u32>>,
        calls: Mutex<Vec<u32>>,
    }

    impl ScriptedScraper {
        fn failing(episodes: &[u32]) -> Self {
            Self {
                failing: Mutex::new(episodes.iter().copied().collect()),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn heal(&self) {
            self.failing.lock().unwrap().clear();
        }

        fn calls(&self) -> Vec<u32> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl EpisodeScraper for ScriptedScraper {
        async fn scrape_episode(
            &self,
            title: &str,
            episode: u32,
            _options: ScrapeOptions,
        ) -> EpisodeScrapeResult {
            self.calls.lock().unwrap().push(episode);
            if self.failing.lock().unwrap().contains(&episode) {
                return EpisodeScrapeResult::failure(
                    title,
                    episode,
                    1,
                    ScrapeError::NotFound("no iframe".into()),
                );
            }
            EpisodeScrapeResult {
                success: true,
                title: title.to_string(),
                episode_number: episode,
                anime_id: Some("a1".into()),
                episode_url: Some(format!("https://site.example/a1-episode-{}/", episode)),
                stream_url: Some(format!("https://cdn.example/a1/{}.m3u8", episode)),
                protection: None,
                attempts: 1,
                error: None,
            }
        }
    }

    fn orchestrator(
        scraper: Arc<ScriptedScraper>,
        store: Arc<MemoryStore>,
    ) -> BulkJobOrchestrator {
        BulkJobOrchestrator::new(scraper, store).with_episode_delay(Duration::ZERO)
    }

    #[tokio::test]
    async fn first_chunk_of_long_series() {
        let scraper = Arc::new(ScriptedScraper::default());
        let store = Arc::new(MemoryStore::new());
        let bulk = orchestrator(scraper.clone(), store.clone());

        let job_id = bulk.start_job("a1", "Example Show", 120, 50).await.unwrap();
        assert_eq!(job_id, "a1-job");
        let status = bulk.job_status(&job_id).await.unwrap();
        assert_eq!(status.progress.total_chunks, 3);
        assert_eq!(status.next_chunk, Some(1));

        let result = bulk.scrape_chunk(&job_id, 1).await.unwrap();
        assert_eq!(result.total_episodes, 50);
        assert_eq!(result.scraped_episodes, 50);
        assert_eq!(scraper.calls(), (1..=50).collect::<Vec<_>>());
        assert_eq!(result.progress.progress.completed_episodes, 50);
        assert_eq!(result.progress.progress.status, JobStatus::InProgress);
        assert_eq!(result.progress.progress.current_chunk, 1);
        assert_eq!(result.progress.next_chunk, Some(2));
        assert_eq!(store.episode_count().await, 50);
    }

    #[tokio::test]
    async fn rerun_only_touches_failed_episodes() {
        let scraper = Arc::new(ScriptedScraper::failing(&[2, 4]));
        let store = Arc::new(MemoryStore::new());
        let bulk = orchestrator(scraper.clone(), store.clone());
        let job_id = bulk.start_job("a1", "Example Show", 5, 5).await.unwrap();

        let first = bulk.scrape_chunk(&job_id, 1).await.unwrap();
        assert_eq!((first.scraped_episodes, first.failed_episodes), (3, 2));
        let progress = &first.progress.progress;
        assert_eq!((progress.completed_episodes, progress.failed_episodes), (3, 2));
        // Every episode is accounted for and something succeeded
        assert_eq!(progress.status, JobStatus::Completed);

        scraper.heal();
        let second = bulk.scrape_chunk(&job_id, 1).await.unwrap();
        assert_eq!(second.skipped_episodes, 3);
        assert_eq!(second.scraped_episodes, 2);
        assert_eq!(&scraper.calls()[5..], &[2, 4]);
        let progress = &second.progress.progress;
        assert_eq!((progress.completed_episodes, progress.failed_episodes), (5, 0));
        assert_eq!(second.progress.next_chunk, None);

        let logs = store.episode_logs(&job_id).await.unwrap();
        assert!(logs.iter().all(|e| e.status == EpisodeStatus::Success));
        assert!(logs.iter().all(|e| e.error_message.is_none()));
    }

    #[tokio::test]
    async fn all_failed_job_is_failed() {
        let scraper = Arc::new(ScriptedScraper::failing(&[1, 2]));
        let bulk = orchestrator(scraper, Arc::new(MemoryStore::new()));
        let job_id = bulk.start_job("a1", "Example Show", 2, 10).await.unwrap();
        let result = bulk.scrape_chunk(&job_id, 1).await.unwrap();
        assert_eq!(result.progress.progress.status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn counters_never_exceed_total() {
        let scraper = Arc::new(ScriptedScraper::failing(&[3]));
        let bulk = orchestrator(scraper.clone(), Arc::new(MemoryStore::new()));
        let job_id = bulk.start_job("a1", "Example Show", 7, 3).await.unwrap();
        for chunk in [1, 2, 1, 3, 3] {
            let result = bulk.scrape_chunk(&job_id, chunk).await.unwrap();
            let p = &result.progress.progress;
            assert!(p.completed_episodes + p.failed_episodes <= p.total_episodes);
            if p.status == JobStatus::Completed {
                assert_eq!(p.completed_episodes + p.failed_episodes, p.total_episodes);
            }
        }
    }

    #[tokio::test]
    async fn chunk_and_job_validation() {
        let bulk = orchestrator(Arc::new(ScriptedScraper::default()), Arc::new(MemoryStore::new()));
        assert!(matches!(
            bulk.scrape_chunk("nope-job", 1).await,
            Err(JobError::NotFound(_))
        ));
        let job_id = bulk.start_job("a1", "Example Show", 10, 5).await.unwrap();
        assert!(matches!(
            bulk.scrape_chunk(&job_id, 3).await,
            Err(JobError::InvalidChunk { chunk: 3, total_chunks: 2 })
        ));
        assert!(matches!(
            bulk.scrape_chunk(&job_id, 0).await,
            Err(JobError::InvalidChunk { .. })
        ));
        assert!(matches!(
            bulk.start_job("a1", "Example Show", 10, 0).await,
            Err(JobError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn restart_resets_progress() {
        let scraper = Arc::new(ScriptedScraper::default());
        let store = Arc::new(MemoryStore::new());
        let bulk = orchestrator(scraper, store.clone());
        let job_id = bulk.start_job("a1", "Example Show", 4, 2).await.unwrap();
        bulk.scrape_chunk(&job_id, 1).await.unwrap();

        bulk.start_job("a1", "Example Show", 4, 2).await.unwrap();
        let status = bulk.job_status(&job_id).await.unwrap();
        assert_eq!(status.progress.completed_episodes, 0);
        let logs = store.episode_logs(&job_id).await.unwrap();
        assert!(logs.iter().all(|e| e.status == EpisodeStatus::Pending));
    }

    #[tokio::test]
    async fn events_follow_episode_lifecycle() {
        let (tx, mut rx) = mpsc::channel(16);
        let bulk = orchestrator(Arc::new(ScriptedScraper::failing(&[2])), Arc::new(MemoryStore::new()))
            .with_events(tx);
        let job_id = bulk.start_job("a1", "Example Show", 2, 2).await.unwrap();
        bulk.scrape_chunk(&job_id, 1).await.unwrap();
        drop(bulk);

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        assert_eq!(events.len(), 5);
        assert!(matches!(events[0], BulkEvent::EpisodeStarted { episode: 1, .. }));
        assert!(matches!(
            events[3],
            BulkEvent::EpisodeFinished { episode: 2, success: false, .. }
        ));
        assert_eq!(
            events[4],
            BulkEvent::ChunkCompleted {
                job_id: job_id.clone(),
                chunk: 1,
                scraped: 1,
                failed: 1
            }
        );
    }

    #[tokio::test]
    async fn episodes_are_spaced_by_the_delay() {
        let bulk = BulkJobOrchestrator::new(
            Arc::new(ScriptedScraper::default()),
            Arc::new(MemoryStore::new()),
        )
        .with_episode_delay(Duration::from_millis(30));
        let job_id = bulk.start_job("a1", "Example Show", 3, 3).await.unwrap();

        let started = std::time::Instant::now();
        bulk.scrape_chunk(&job_id, 1).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(60));
    }
}
