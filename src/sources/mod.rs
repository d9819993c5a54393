pub mod envato;
pub mod framer;
pub mod listing;
pub mod webflow;

use std::time::Duration;

use async_trait::async_trait;
use indicatif::{ProgressBar, ProgressStyle};

use crate::fetch::Fetch;
use crate::model::{Platform, Template};

/// A marketplace that can be turned into normalized templates.
#[async_trait]
pub trait Source: Send + Sync {
    fn platform(&self) -> Platform;

    /// Fetch and normalize everything this source is configured for. Failed queries/pages
    /// are skipped; the result is already deduplicated by id.
    async fn collect(&self, fetcher: &dyn Fetch) -> Vec<Template>;
}

/// Sleep between units of work, never after the last one.
async fn pause(delay: Duration, index: usize, total: usize) {
    if !delay.is_zero() && index + 1 < total {
        tokio::time::sleep(delay).await;
    }
}

fn progress(len: usize) -> ProgressBar {
    let pb = ProgressBar::new(len as u64);
    if let Ok(style) =
        ProgressStyle::default_bar().template("[{elapsed_precise}] {bar:40} {pos}/{len} {msg}")
    {
        pb.set_style(style.progress_chars("=> "));
    }
    pb
}
