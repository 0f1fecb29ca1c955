use crate::config::PathsConfig;
use crate::logi;
use anyhow::{Context, Result};
use std::path::PathBuf;
use tokio::fs;

/// External programs the factory shells out to, with the flag that makes each
/// print its version and exit.
pub const REQUIRED_TOOLS: &[(&str, &str)] = &[
    ("ffmpeg", "-version"),
    ("ffprobe", "-version"),
    ("yt-dlp", "--version"),
    ("edge-tts", "--help"),
];

fn required_dirs(paths: &PathsConfig) -> [PathBuf; 4] {
    [
        paths.input_dir(),
        paths.assets_dir(),
        paths.output_dir(),
        paths.temp_dir(),
    ]
}

pub async fn ensure_directories(paths: &PathsConfig) -> Result<()> {
    for dir in required_dirs(paths) {
        if fs::metadata(&dir).await.is_err() {
            fs::create_dir_all(&dir)
                .await
                .with_context(|| format!("Failed to create dir {}", dir.display()))?;
            logi(format!("Created directory: {}", dir.display()));
        }
    }
    Ok(())
}

pub async fn check_tool(program: &str, version_flag: &str) -> bool {
    match tokio::process::Command::new(program)
        .arg(version_flag)
        .output()
        .await
    {
        Ok(output) => output.status.success(),
        Err(_) => false,
    }
}

/// Names of required tools that are not runnable.
pub async fn missing_tools() -> Vec<&'static str> {
    let mut missing = Vec::new();
    for (program, flag) in REQUIRED_TOOLS {
        if !check_tool(program, flag).await {
            missing.push(*program);
        }
    }
    missing
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn creates_every_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        let paths = PathsConfig {
            base_dir: dir.path().to_path_buf(),
            ..PathsConfig::default()
        };
        ensure_directories(&paths).await.unwrap();
        for d in required_dirs(&paths) {
            assert!(d.is_dir(), "{} missing", d.display());
        }
        ensure_directories(&paths).await.unwrap();
    }

    #[tokio::test]
    async fn unknown_program_is_reported_missing() {
        assert!(!check_tool("definitely-not-a-real-tool-xyz", "--version").await);
    }
}
