use crate::downloader::sanitize_filename;
use crate::logok;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Final hand-off of a rendered short.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Takes `rendered` under a name derived from `title` and returns where it
    /// ended up. `rendered` no longer exists locally after a successful call.
    async fn publish(&self, rendered: &Path, title: &str) -> Result<PathBuf>;
}

/// Moves finished shorts into the local output directory.
#[derive(Debug, Clone)]
pub struct LocalPublisher {
    dir: PathBuf,
}

impl LocalPublisher {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl Publisher for LocalPublisher {
    async fn publish(&self, rendered: &Path, title: &str) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create dir {}", self.dir.display()))?;

        let dest = unique_output_path(&self.dir, title, chrono::Utc::now().timestamp());
        if fs::rename(rendered, &dest).await.is_err() {
            // rename fails across filesystems
            fs::copy(rendered, &dest)
                .await
                .with_context(|| format!("Failed to copy render to {}", dest.display()))?;
            fs::remove_file(rendered).await.ok();
        }
        logok(format!("Published: {}", dest.display()));
        Ok(dest)
    }
}

/// `<dir>/<title>.mp4`, falling back to `Clip_<timestamp>` for titles that
/// sanitize to nothing, with `_1`, `_2`... appended until the name is free.
pub fn unique_output_path(dir: &Path, title: &str, timestamp: i64) -> PathBuf {
    let mut stem = sanitize_filename(title);
    if stem.is_empty() {
        stem = format!("Clip_{}", timestamp);
    }

    let mut candidate = dir.join(format!("{}.mp4", stem));
    let mut counter = 1;
    while candidate.exists() {
        candidate = dir.join(format!("{}_{}.mp4", stem, counter));
        counter += 1;
    }
    candidate
}
