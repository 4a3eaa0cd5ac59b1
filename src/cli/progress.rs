//! Progress bar for chunk runs, fed by bulk events.

use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::mpsc;

use animescrape::bulk::BulkEvent;

pub struct ChunkProgress {
    bar: ProgressBar,
}

impl ChunkProgress {
    pub fn new(episodes: u32) -> Self {
        let bar = ProgressBar::new(u64::from(episodes));
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:30.cyan/blue}] {pos}/{len} {wide_msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("█▓░"),
        );
        Self { bar }
    }

    /// Drain events until the sender is dropped.
    pub async fn run(self, mut events: mpsc::Receiver<BulkEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                BulkEvent::EpisodeStarted { episode, .. } => {
                    self.bar.set_message(format!("Episode {}", episode));
                }
                BulkEvent::EpisodeFinished {
                    episode,
                    success,
                    detail,
                    ..
                } => {
                    if !success {
                        self.bar.println(format!(
                            "  {} Episode {}: {}",
                            style("✗").red(),
                            episode,
                            detail.unwrap_or_default()
                        ));
                    }
                    self.bar.inc(1);
                }
                BulkEvent::ChunkCompleted {
                    chunk,
                    scraped,
                    failed,
                    ..
                } => {
                    self.bar.finish_and_clear();
                    eprintln!(
                        "{} Chunk {} complete: {} scraped",
                        style("✓").green(),
                        chunk,
                        scraped
                    );
                    if failed > 0 {
                        eprintln!("  {} {} episodes failed", style("!").yellow(), failed);
                    }
                }
            }
        }
        if !self.bar.is_finished() {
            self.bar.finish_and_clear();
        }
    }
}
