//! SQLite store for episode and job state that outlives the process.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::debug;

use super::{EpisodeRecord, ScrapeStore, StoreError, StoreResult};
use crate::bulk::{BulkJobProgress, EpisodeLogEntry, EpisodeStatus, JobStatus};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS episodes (
    anime_id TEXT NOT NULL,
    episode_number INTEGER NOT NULL,
    stream_url TEXT NOT NULL,
    title TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (anime_id, episode_number)
);

CREATE TABLE IF NOT EXISTS bulk_jobs (
    job_id TEXT PRIMARY KEY,
    anime_id TEXT NOT NULL,
    title TEXT NOT NULL,
    total_episodes INTEGER NOT NULL,
    completed_episodes INTEGER NOT NULL DEFAULT 0,
    failed_episodes INTEGER NOT NULL DEFAULT 0,
    current_chunk INTEGER NOT NULL DEFAULT 0,
    total_chunks INTEGER NOT NULL,
    chunk_size INTEGER NOT NULL,
    status TEXT NOT NULL,
    started_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS episode_logs (
    job_id TEXT NOT NULL,
    episode_number INTEGER NOT NULL,
    chunk_number INTEGER NOT NULL,
    status TEXT NOT NULL,
    error_message TEXT,
    stream_url TEXT,
    scraped_at TEXT,
    PRIMARY KEY (job_id, episode_number)
);

CREATE INDEX IF NOT EXISTS idx_episode_logs_chunk ON episode_logs(job_id, chunk_number);
"#;

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

fn parse_datetime(s: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("bad timestamp {:?}: {}", s, e)))
}

impl SqliteStore {
    /// Open (or create) a database file and apply the schema.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StoreError::Database(format!("{}: {}", parent.display(), e)))?;
            }
        }
        let conn = Connection::open(path)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
        debug!("Opened store at {}", path.display());
        Self::init(conn)
    }

    pub fn in_memory() -> StoreResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> StoreResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn row_to_progress(row: &Row) -> rusqlite::Result<(BulkJobProgress, String, String, String)> {
        let status: String = row.get("status")?;
        let started_at: String = row.get("started_at")?;
        let updated_at: String = row.get("updated_at")?;
        Ok((
            BulkJobProgress {
                job_id: row.get("job_id")?,
                anime_id: row.get("anime_id")?,
                title: row.get("title")?,
                total_episodes: row.get("total_episodes")?,
                completed_episodes: row.get("completed_episodes")?,
                failed_episodes: row.get("failed_episodes")?,
                current_chunk: row.get("current_chunk")?,
                total_chunks: row.get("total_chunks")?,
                chunk_size: row.get("chunk_size")?,
                status: JobStatus::Pending,
                started_at: Utc::now(),
                updated_at: Utc::now(),
            },
            status,
            started_at,
            updated_at,
        ))
    }

    fn row_to_log(row: &Row) -> rusqlite::Result<(EpisodeLogEntry, String, Option<String>)> {
        let status: String = row.get("status")?;
        let scraped_at: Option<String> = row.get("scraped_at")?;
        Ok((
            EpisodeLogEntry {
                job_id: row.get("job_id")?,
                episode_number: row.get("episode_number")?,
                chunk_number: row.get("chunk_number")?,
                status: EpisodeStatus::Pending,
                error_message: row.get("error_message")?,
                stream_url: row.get("stream_url")?,
                scraped_at: None,
            },
            status,
            scraped_at,
        ))
    }

    fn finish_log(
        (mut entry, status, scraped_at): (EpisodeLogEntry, String, Option<String>),
    ) -> StoreResult<EpisodeLogEntry> {
        entry.status = EpisodeStatus::from_str(&status)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown episode status {:?}", status)))?;
        entry.scraped_at = scraped_at.as_deref().map(parse_datetime).transpose()?;
        Ok(entry)
    }

    fn insert_log(conn: &Connection, entry: &EpisodeLogEntry) -> rusqlite::Result<usize> {
        conn.execute(
            "INSERT INTO episode_logs
                (job_id, episode_number, chunk_number, status, error_message, stream_url, scraped_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(job_id, episode_number) DO UPDATE SET
                chunk_number = excluded.chunk_number,
                status = excluded.status,
                error_message = excluded.error_message,
                stream_url = excluded.stream_url,
                scraped_at = excluded.scraped_at",
            params![
                entry.job_id,
                entry.episode_number,
                entry.chunk_number,
                entry.status.as_str(),
                entry.error_message,
                entry.stream_url,
                entry.scraped_at.map(|t| t.to_rfc3339()),
            ],
        )
    }
}

#[async_trait]
impl ScrapeStore for SqliteStore {
    async fn upsert_episode(
        &self,
        anime_id: &str,
        episode_number: u32,
        stream_url: &str,
        title: &str,
    ) -> StoreResult<()> {
        self.conn().execute(
            "INSERT INTO episodes (anime_id, episode_number, stream_url, title, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(anime_id, episode_number) DO UPDATE SET
                stream_url = excluded.stream_url,
                title = excluded.title,
                updated_at = excluded.updated_at",
            params![
                anime_id,
                episode_number,
                stream_url,
                title,
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }

    async fn episode(
        &self,
        anime_id: &str,
        episode_number: u32,
    ) -> StoreResult<Option<EpisodeRecord>> {
        let row = self
            .conn()
            .query_row(
                "SELECT anime_id, episode_number, stream_url, title, updated_at
                 FROM episodes WHERE anime_id = ?1 AND episode_number = ?2",
                params![anime_id, episode_number],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, u32>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()?;

        row.map(|(anime_id, episode_number, stream_url, title, updated_at)| {
            Ok(EpisodeRecord {
                anime_id,
                episode_number,
                stream_url,
                title,
                updated_at: parse_datetime(&updated_at)?,
            })
        })
        .transpose()
    }

    async fn upsert_job_progress(&self, progress: &BulkJobProgress) -> StoreResult<()> {
        self.conn().execute(
            "INSERT INTO bulk_jobs
                (job_id, anime_id, title, total_episodes, completed_episodes, failed_episodes,
                 current_chunk, total_chunks, chunk_size, status, started_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
             ON CONFLICT(job_id) DO UPDATE SET
                anime_id = excluded.anime_id,
                title = excluded.title,
                total_episodes = excluded.total_episodes,
                completed_episodes = excluded.completed_episodes,
                failed_episodes = excluded.failed_episodes,
                current_chunk = excluded.current_chunk,
                total_chunks = excluded.total_chunks,
                chunk_size = excluded.chunk_size,
                status = excluded.status,
                started_at = excluded.started_at,
                updated_at = excluded.updated_at",
            params![
                progress.job_id,
                progress.anime_id,
                progress.title,
                progress.total_episodes,
                progress.completed_episodes,
                progress.failed_episodes,
                progress.current_chunk,
                progress.total_chunks,
                progress.chunk_size,
                progress.status.as_str(),
                progress.started_at.to_rfc3339(),
                progress.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    async fn job_progress(&self, job_id: &str) -> StoreResult<Option<BulkJobProgress>> {
        let row = self
            .conn()
            .query_row(
                "SELECT * FROM bulk_jobs WHERE job_id = ?1",
                params![job_id],
                Self::row_to_progress,
            )
            .optional()?;

        row.map(|(mut progress, status, started_at, updated_at)| {
            progress.status = JobStatus::from_str(&status)
                .ok_or_else(|| StoreError::Corrupt(format!("unknown job status {:?}", status)))?;
            progress.started_at = parse_datetime(&started_at)?;
            progress.updated_at = parse_datetime(&updated_at)?;
            Ok(progress)
        })
        .transpose()
    }

    async fn upsert_episode_log(&self, entry: &EpisodeLogEntry) -> StoreResult<()> {
        Self::insert_log(&self.conn(), entry)?;
        Ok(())
    }

    async fn episode_logs(&self, job_id: &str) -> StoreResult<Vec<EpisodeLogEntry>> {
        let rows = {
            let conn = self.conn();
            let mut stmt = conn.prepare(
                "SELECT * FROM episode_logs WHERE job_id = ?1 ORDER BY episode_number",
            )?;
            let rows = stmt
                .query_map(params![job_id], Self::row_to_log)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };
        rows.into_iter().map(Self::finish_log).collect()
    }

    async fn replace_episode_logs(
        &self,
        job_id: &str,
        entries: &[EpisodeLogEntry],
    ) -> StoreResult<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM episode_logs WHERE job_id = ?1", params![job_id])?;
        for entry in entries {
            Self::insert_log(&tx, entry)?;
        }
        tx.commit()?;
        Ok(())
    }
}
