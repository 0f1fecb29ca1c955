use crate::{logi, logok, logw};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::process::Command;

const FORMAT: &str = "best[ext=mp4]/best";
const OUTPUT_TEMPLATE: &str = "%(title).100s.%(ext)s";
const MAX_NAME_CHARS: usize = 50;

/// Fetches source videos through the `yt-dlp` command-line tool.
#[derive(Debug, Clone)]
pub struct Downloader {
    output_dir: PathBuf,
    cookies: Option<PathBuf>,
}

impl Downloader {
    /// `cookies` is used only when the file exists at download time.
    pub fn new(output_dir: impl Into<PathBuf>, cookies: Option<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            cookies,
        }
    }

    fn args(&self, url: &str, use_cookies: bool) -> Vec<String> {
        let mut args = vec![
            "-f".to_string(),
            FORMAT.to_string(),
            "--no-playlist".to_string(),
            "--restrict-filenames".to_string(),
            "--no-check-certificates".to_string(),
            "--quiet".to_string(),
            "--no-warnings".to_string(),
            "-o".to_string(),
            self.output_dir.join(OUTPUT_TEMPLATE).display().to_string(),
            "--print".to_string(),
            "after_move:filepath".to_string(),
        ];
        if use_cookies {
            if let Some(cookies) = &self.cookies {
                args.extend(["--cookies".to_string(), cookies.display().to_string()]);
            }
        }
        args.push(url.to_string());
        args
    }

    /// Downloads `url`, returning the local file, or `None` when yt-dlp failed.
    pub async fn download(&self, url: &str) -> Result<Option<PathBuf>> {
        fs::create_dir_all(&self.output_dir)
            .await
            .with_context(|| format!("Failed to create dir {}", self.output_dir.display()))?;

        let use_cookies = match &self.cookies {
            Some(path) => fs::metadata(path).await.is_ok(),
            None => false,
        };

        logi(format!("Downloading: {}", url));
        let output = Command::new("yt-dlp")
            .args(self.args(url, use_cookies))
            .output()
            .await
            .context("Failed to run yt-dlp")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            logw(format!("Download error: {}", stderr.trim()));
            return Ok(None);
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let Some(line) = stdout.lines().rev().map(str::trim).find(|l| !l.is_empty()) else {
            logw("yt-dlp reported success but printed no file path");
            return Ok(None);
        };

        let path = PathBuf::from(line);
        if !path.exists() {
            logw(format!("Downloaded file not found: {}", path.display()));
            return Ok(None);
        }
        logok(format!("Downloaded: {}", file_label(&path)));
        Ok(Some(path))
    }
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Filesystem-safe name: strips `\/*?:"<>|`, trims, turns spaces into
/// underscores and keeps at most 50 characters.
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .filter(|c| !matches!(c, '\\' | '/' | '*' | '?' | ':' | '"' | '<' | '>' | '|'))
        .collect::<String>()
        .trim()
        .replace(' ', "_")
        .chars()
        .take(MAX_NAME_CHARS)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_reserved_characters() {
        assert_eq!(sanitize_filename("  What? A \"cat\": <3 |/\\ "), "What_A_cat_3");
        assert_eq!(sanitize_filename("แมว กระโดด"), "แมว_กระโดด");
    }

    #[test]
    fn sanitize_limits_to_fifty_chars() {
        let long = "ก".repeat(80);
        assert_eq!(sanitize_filename(&long).chars().count(), 50);
        assert_eq!(sanitize_filename("???"), "");
    }

    #[test]
    fn args_select_single_file_mp4_and_print_path() {
        let d = Downloader::new("/in", Some(PathBuf::from("/cookies.txt")));
        let args = d.args("https://youtu.be/x", true);
        assert!(args.windows(2).any(|w| w[0] == "-f" && w[1] == "best[ext=mp4]/best"));
        assert!(args.contains(&"--no-playlist".to_string()));
        assert!(args.windows(2).any(|w| w[0] == "--cookies" && w[1] == "/cookies.txt"));
        assert!(args.iter().any(|a| a.ends_with("%(title).100s.%(ext)s")));
        assert_eq!(args.last().map(String::as_str), Some("https://youtu.be/x"));

        let without = d.args("https://youtu.be/x", false);
        assert!(!without.contains(&"--cookies".to_string()));
    }
}
