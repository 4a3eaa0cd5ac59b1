//! Bulk job records and the arithmetic over them.

use std::ops::RangeInclusive;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EpisodeStatus {
    Pending,
    Scraping,
    Success,
    Failed,
}

impl EpisodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Scraping => "scraping",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "scraping" => Some(Self::Scraping),
            "success" => Some(Self::Success),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Whether a chunk run should (re)process this entry.
    ///
    /// `Scraping` only survives when a previous run was interrupted mid-episode.
    pub fn needs_scrape(&self) -> bool {
        !matches!(self, Self::Success)
    }
}

/// Persistent progress of one bulk job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkJobProgress {
    pub job_id: String,
    pub anime_id: String,
    pub title: String,
    pub total_episodes: u32,
    pub completed_episodes: u32,
    pub failed_episodes: u32,
    /// Last chunk a run was started for (0 before any).
    pub current_chunk: u32,
    pub total_chunks: u32,
    pub chunk_size: u32,
    pub status: JobStatus,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Deterministic job id for an anime.
pub fn job_id_for(anime_id: &str) -> String {
    format!("{}-job", anime_id)
}

/// Number of chunks needed to cover `total` episodes.
pub fn total_chunks(total: u32, chunk_size: u32) -> u32 {
    if chunk_size == 0 {
        return 0;
    }
    total.div_ceil(chunk_size)
}

impl BulkJobProgress {
    pub fn new(anime_id: &str, title: &str, total_episodes: u32, chunk_size: u32) -> Self {
        let now = Utc::now();
        Self {
            job_id: job_id_for(anime_id),
            anime_id: anime_id.to_string(),
            title: title.to_string(),
            total_episodes,
            completed_episodes: 0,
            failed_episodes: 0,
            current_chunk: 0,
            total_chunks: total_chunks(total_episodes, chunk_size),
            chunk_size,
            status: JobStatus::InProgress,
            started_at: now,
            updated_at: now,
        }
    }

    /// Episodes covered by a 1-based chunk, or `None` when out of range.
    pub fn chunk_range(&self, chunk: u32) -> Option<RangeInclusive<u32>> {
        if chunk == 0 || chunk > self.total_chunks {
            return None;
        }
        let start = (chunk - 1) * self.chunk_size + 1;
        let end = (chunk * self.chunk_size).min(self.total_episodes);
        Some(start..=end)
    }

    /// 1-based chunk containing an episode.
    pub fn chunk_of(&self, episode: u32) -> u32 {
        if self.chunk_size == 0 || episode == 0 {
            return 0;
        }
        (episode - 1) / self.chunk_size + 1
    }

    pub fn processed(&self) -> u32 {
        self.completed_episodes + self.failed_episodes
    }

    /// Apply freshly counted totals, keeping the counters within bounds.
    ///
    /// Completed never goes down. Once every episode is accounted for the job
    /// is `Completed` if anything succeeded, otherwise `Failed`.
    pub fn apply_counts(&mut self, completed: u32, failed: u32) {
        let completed = completed
            .max(self.completed_episodes)
            .min(self.total_episodes);
        let failed = failed.min(self.total_episodes - completed);
        self.completed_episodes = completed;
        self.failed_episodes = failed;
        self.status = if self.processed() == self.total_episodes {
            if completed > 0 {
                JobStatus::Completed
            } else {
                JobStatus::Failed
            }
        } else {
            JobStatus::InProgress
        };
        self.updated_at = Utc::now();
    }

    pub fn percent(&self) -> f64 {
        if self.total_episodes == 0 {
            return 100.0;
        }
        f64::from(self.processed()) * 100.0 / f64::from(self.total_episodes)
    }

    /// Estimated time left, from the average time per processed episode so far.
    pub fn eta(&self, now: DateTime<Utc>) -> Option<Duration> {
        let processed = self.processed();
        if processed == 0 {
            return None;
        }
        let remaining = self.total_episodes.saturating_sub(processed);
        if remaining == 0 {
            return Some(Duration::ZERO);
        }
        let elapsed = (now - self.started_at).to_std().ok()?;
        Some(elapsed.mul_f64(f64::from(remaining) / f64::from(processed)))
    }
}

/// One episode's state within a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpisodeLogEntry {
    pub job_id: String,
    pub episode_number: u32,
    pub chunk_number: u32,
    pub status: EpisodeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scraped_at: Option<DateTime<Utc>>,
}

impl EpisodeLogEntry {
    pub fn pending(job_id: &str, episode_number: u32, chunk_number: u32) -> Self {
        Self {
            job_id: job_id.to_string(),
            episode_number,
            chunk_number,
            status: EpisodeStatus::Pending,
            error_message: None,
            stream_url: None,
            scraped_at: None,
        }
    }
}

/// Progress plus derived figures, as reported to callers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusReport {
    #[serde(flatten)]
    pub progress: BulkJobProgress,
    pub percent: f64,
    pub eta_secs: Option<u64>,
    /// First chunk that still has unfinished episodes.
    pub next_chunk: Option<u32>,
}

/// Outcome of one `scrape_chunk` call.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkResult {
    pub job_id: String,
    pub chunk_number: u32,
    /// Episodes in the chunk's range.
    pub total_episodes: u32,
    pub scraped_episodes: u32,
    pub failed_episodes: u32,
    /// Episodes already successful before this run.
    pub skipped_episodes: u32,
    pub progress: JobStatusReport,
}

/// Progress notifications emitted while a chunk runs.
#[derive(Debug, Clone, PartialEq)]
pub enum BulkEvent {
    EpisodeStarted {
        job_id: String,
        chunk: u32,
        episode: u32,
    },
    EpisodeFinished {
        job_id: String,
        chunk: u32,
        episode: u32,
        success: bool,
        detail: Option<String>,
    },
    ChunkCompleted {
        job_id: String,
        chunk: u32,
        scraped: u32,
        failed: u32,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_arithmetic() {
        let progress = BulkJobProgress::new("a1", "Example Show", 120, 50);
        assert_eq!(progress.job_id, "a1-job");
        assert_eq!(progress.total_chunks, 3);
        assert_eq!(progress.chunk_range(1), Some(1..=50));
        assert_eq!(progress.chunk_range(3), Some(101..=120));
        assert_eq!(progress.chunk_range(0), None);
        assert_eq!(progress.chunk_range(4), None);
        assert_eq!(progress.chunk_of(50), 1);
        assert_eq!(progress.chunk_of(51), 2);
        assert_eq!(progress.chunk_of(120), 3);
    }

    #[test]
    fn counts_stay_within_total() {
        let mut progress = BulkJobProgress::new("a1", "Show", 10, 5);
        progress.apply_counts(4, 3);
        assert_eq!(progress.processed(), 7);
        assert_eq!(progress.status, JobStatus::InProgress);

        progress.apply_counts(12, 9);
        assert_eq!(progress.completed_episodes, 10);
        assert_eq!(progress.failed_episodes, 0);
        assert_eq!(progress.status, JobStatus::Completed);
    }

    #[test]
    fn completed_never_decreases() {
        let mut progress = BulkJobProgress::new("a1", "Show", 10, 5);
        progress.apply_counts(5, 0);
        progress.apply_counts(3, 2);
        assert_eq!(progress.completed_episodes, 5);
        assert_eq!(progress.failed_episodes, 2);
    }

    #[test]
    fn rerun_success_moves_count_out_of_failed() {
        let mut progress = BulkJobProgress::new("a1", "Show", 10, 5);
        progress.apply_counts(3, 2);
        let before = progress.processed();

        progress.apply_counts(5, 0);
        assert_eq!(progress.completed_episodes, 5);
        assert_eq!(progress.failed_episodes, 0);
        assert!(progress.processed() >= before);
    }

    #[test]
    fn all_failed_is_failed() {
        let mut progress = BulkJobProgress::new("a1", "Show", 3, 5);
        progress.apply_counts(0, 3);
        assert_eq!(progress.status, JobStatus::Failed);
        assert!(progress.status.is_terminal());
    }

    #[test]
    fn percent_and_eta() {
        let mut progress = BulkJobProgress::new("a1", "Show", 4, 2);
        assert!(progress.eta(Utc::now()).is_none());

        progress.started_at = Utc::now() - chrono::Duration::seconds(10);
        progress.apply_counts(1, 0);
        assert_eq!(progress.percent(), 25.0);
        let eta = progress.eta(Utc::now()).unwrap();
        // 10s per episode, 3 left
        assert!(eta >= Duration::from_secs(29) && eta <= Duration::from_secs(31));
    }

    #[test]
    fn status_strings_round_trip() {
        for status in [
            JobStatus::Pending,
            JobStatus::InProgress,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            assert_eq!(JobStatus::from_str(status.as_str()), Some(status));
        }
        assert_eq!(EpisodeStatus::from_str("scraping"), Some(EpisodeStatus::Scraping));
        assert!(EpisodeStatus::Failed.needs_scrape());
        assert!(!EpisodeStatus::Success.needs_scrape());
    }
}
