//! animescrape - episode stream scrape orchestration.
//!
//! Locates an episode page on a streaming site, renders it in a headless
//! browser to find the playable stream URL, and flags anti-embedding
//! protection. Browser work is gated by a bounded FIFO admission queue with
//! a circuit breaker; long series are scraped in resumable chunks.

pub mod admission;
pub mod browser;
pub mod bulk;
pub mod cache;
pub mod config;
pub mod error;
pub mod extractor;
pub mod fetch;
pub mod pipeline;
pub mod store;

pub use error::ScrapeError;
