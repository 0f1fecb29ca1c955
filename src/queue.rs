use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::fs;

/// Line-oriented work queue of source URLs, one per line.
///
/// Blank lines are ignored. A missing file reads as an empty queue.
#[derive(Debug, Clone)]
pub struct UrlQueue {
    path: PathBuf,
}

impl UrlQueue {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn urls(&self) -> Result<Vec<String>> {
        if fs::metadata(&self.path).await.is_err() {
            return Ok(Vec::new());
        }
        let text = fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        Ok(text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Drops every occurrence of `url`.
    pub async fn remove(&self, url: &str) -> Result<()> {
        let kept: Vec<String> = self
            .urls()
            .await?
            .into_iter()
            .filter(|u| u != url)
            .collect();
        self.write(&kept).await
    }

    /// Appends new URLs, skipping blanks and ones already queued. Returns how
    /// many were added.
    pub async fn add(&self, urls: &[String]) -> Result<usize> {
        let mut all = self.urls().await?;
        let before = all.len();
        for url in urls {
            let url = url.trim();
            if !url.is_empty() && !all.iter().any(|u| u == url) {
                all.push(url.to_string());
            }
        }
        let added = all.len() - before;
        if added > 0 {
            self.write(&all).await?;
        }
        Ok(added)
    }

    pub async fn clear(&self) -> Result<()> {
        self.write(&[]).await
    }

    async fn write(&self, urls: &[String]) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }
        let mut body = urls.join("\n");
        if !body.is_empty() {
            body.push('\n');
        }
        fs::write(&self.path, body)
            .await
            .with_context(|| format!("Failed to write {}", self.path.display()))
    }
}

/// Accepts only YouTube and TikTok links.
pub fn is_supported_url(url: &str) -> bool {
    let url = url.trim().to_ascii_lowercase();
    ["youtube.com", "youtu.be", "tiktok.com"]
        .iter()
        .any(|host| url.contains(host))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(v: &[&str]) -> Vec<String> {
        v.iter().map(|x| x.to_string()).collect()
    }

    #[tokio::test]
    async fn missing_file_is_empty_queue() {
        let dir = tempfile::tempdir().unwrap();
        let q = UrlQueue::new(dir.path().join("urls.txt"));
        assert!(q.urls().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn add_dedupes_and_remove_drops() {
        let dir = tempfile::tempdir().unwrap();
        let q = UrlQueue::new(dir.path().join("urls.txt"));

        let added = q.add(&s(&["https://youtu.be/a", " https://youtu.be/b ", "", "https://youtu.be/a"])).await.unwrap();
        assert_eq!(added, 2);
        assert_eq!(q.add(&s(&["https://youtu.be/b"])).await.unwrap(), 0);
        assert_eq!(q.urls().await.unwrap(), s(&["https://youtu.be/a", "https://youtu.be/b"]));

        q.remove("https://youtu.be/a").await.unwrap();
        assert_eq!(q.urls().await.unwrap(), s(&["https://youtu.be/b"]));

        q.clear().await.unwrap();
        assert!(q.urls().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn blank_lines_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("urls.txt");
        std::fs::write(&path, "\n  https://tiktok.com/x \n\n").unwrap();
        let q = UrlQueue::new(&path);
        assert_eq!(q.urls().await.unwrap(), s(&["https://tiktok.com/x"]));
    }

    #[test]
    fn only_youtube_and_tiktok_are_supported() {
        assert!(is_supported_url("https://www.youtube.com/shorts/abc"));
        assert!(is_supported_url("https://youtu.be/abc"));
        assert!(is_supported_url("https://www.TikTok.com/@u/video/1"));
        assert!(!is_supported_url("https://vimeo.com/1"));
    }
}
