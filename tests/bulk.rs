//! Bulk jobs driven through the real pipeline and a SQLite store.

mod common;

use std::sync::Arc;

use animescrape::bulk::{BulkJobOrchestrator, EpisodeStatus, JobStatus};
use animescrape::store::{ScrapeStore, SqliteStore};

use common::{player_url_for, quick, FakeBrowser, FakeSite, BASE};

#[tokio::test]
async fn large_series_first_chunk() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(SqliteStore::open(&dir.path().join("scrape.db")).unwrap());
    let site = Arc::new(FakeSite::serving_episodes());
    let browser = Arc::new(FakeBrowser::new());
    let pipeline = Arc::new(common::pipeline(&common::settings(), site, browser.clone()));

    let bulk = BulkJobOrchestrator::new(pipeline, store.clone())
        .with_episode_delay(std::time::Duration::ZERO)
        .with_scrape_options(quick(1));

    let job_id = bulk.start_job("a1", "Example Show", 120, 50).await.unwrap();
    assert_eq!(job_id, "a1-job");
    assert_eq!(bulk.job_status(&job_id).await.unwrap().progress.total_chunks, 3);

    let result = bulk.scrape_chunk("a1-job", 1).await.unwrap();
    assert_eq!(result.total_episodes, 50);
    assert_eq!(result.scraped_episodes, 50);
    assert_eq!(result.failed_episodes, 0);
    assert_eq!(browser.renders(), 50);

    let progress = &result.progress.progress;
    assert_eq!(progress.completed_episodes, 50);
    assert_eq!(progress.status, JobStatus::InProgress);
    assert_eq!(result.progress.next_chunk, Some(2));
    assert!((result.progress.percent - 41.666).abs() < 0.01);

    let saved = store.episode("a1", 50).await.unwrap().unwrap();
    let page = format!("{}/example-show-episode-50/", BASE);
    assert_eq!(saved.stream_url, player_url_for(&page));
    assert!(store.episode("a1", 51).await.unwrap().is_none());

    let logs = store.episode_logs("a1-job").await.unwrap();
    assert_eq!(logs.len(), 120);
    assert!(logs[..50].iter().all(|e| e.status == EpisodeStatus::Success));
    assert!(logs[50..].iter().all(|e| e.status == EpisodeStatus::Pending));
}

#[tokio::test]
async fn progress_survives_reopening_the_database() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("scrape.db");
    let site = Arc::new(FakeSite::serving_episodes());
    let browser = Arc::new(FakeBrowser::new());
    let pipeline = Arc::new(common::pipeline(&common::settings(), site, browser));

    {
        let store = Arc::new(SqliteStore::open(&path).unwrap());
        let bulk = BulkJobOrchestrator::new(pipeline.clone(), store)
            .with_episode_delay(std::time::Duration::ZERO)
            .with_scrape_options(quick(1));
        bulk.start_job("a2", "Example Show", 4, 2).await.unwrap();
        bulk.scrape_chunk("a2-job", 1).await.unwrap();
    }

    let store = Arc::new(SqliteStore::open(&path).unwrap());
    let bulk = BulkJobOrchestrator::new(pipeline, store)
        .with_episode_delay(std::time::Duration::ZERO)
        .with_scrape_options(quick(1));
    let status = bulk.job_status("a2-job").await.unwrap();
    assert_eq!(status.progress.completed_episodes, 2);
    assert_eq!(status.next_chunk, Some(2));

    let result = bulk.scrape_chunk("a2-job", 2).await.unwrap();
    assert_eq!(result.progress.progress.status, JobStatus::Completed);
    assert_eq!(result.progress.next_chunk, None);
}
