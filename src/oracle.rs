use crate::api::SpeechSynthesizer;
use crate::logw;
use anyhow::{Context, Result};
use std::path::PathBuf;
use tokio::fs;

/// Measures how long the speech engine takes to say a text.
///
/// Each measurement synthesizes into a scratch file that is removed when the
/// call returns, whichever way it returns. A failed measurement reads as
/// `0.0`, which callers must treat as "unmeasured".
pub struct DurationOracle<'a> {
    synthesizer: &'a dyn SpeechSynthesizer,
    scratch_dir: PathBuf,
}

impl<'a> DurationOracle<'a> {
    pub fn new(synthesizer: &'a dyn SpeechSynthesizer, scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            synthesizer,
            scratch_dir: scratch_dir.into(),
        }
    }

    pub async fn measure(&self, text: &str) -> f64 {
        if text.trim().is_empty() {
            return 0.0;
        }
        match self.try_measure(text).await {
            Ok(secs) if secs.is_finite() && secs > 0.0 => secs,
            Ok(secs) => {
                logw(format!("Measured a non-positive duration ({secs}); treating as unmeasured"));
                0.0
            }
            Err(err) => {
                logw(format!("Error measuring audio: {:#}", err));
                0.0
            }
        }
    }

    async fn try_measure(&self, text: &str) -> Result<f64> {
        fs::create_dir_all(&self.scratch_dir)
            .await
            .with_context(|| format!("Failed to create dir {}", self.scratch_dir.display()))?;

        let scratch = tempfile::Builder::new()
            .prefix("measure_")
            .suffix(".mp3")
            .tempfile_in(&self.scratch_dir)
            .context("Failed to create scratch audio file")?;

        let asset = self.synthesizer.synthesize(text, scratch.path()).await?;
        Ok(asset.duration_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::SpeechAsset;
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::Mutex;

    struct FakeTts {
        fail: bool,
        seen: Mutex<Vec<PathBuf>>,
    }

    #[async_trait]
    impl SpeechSynthesizer for FakeTts {
        async fn synthesize(&self, text: &str, out_path: &Path) -> Result<SpeechAsset> {
            self.seen.lock().unwrap().push(out_path.to_path_buf());
            std::fs::write(out_path, text.as_bytes())?;
            if self.fail {
                anyhow::bail!("synthesis exploded");
            }
            Ok(SpeechAsset {
                path: out_path.to_path_buf(),
                duration_secs: text.split_whitespace().count() as f64 * 0.5,
            })
        }
    }

    #[tokio::test]
    async fn measures_and_removes_scratch() {
        let dir = tempfile::tempdir().unwrap();
        let tts = FakeTts { fail: false, seen: Mutex::new(Vec::new()) };
        let oracle = DurationOracle::new(&tts, dir.path());

        let secs = oracle.measure("one two three four").await;
        assert_eq!(secs, 2.0);

        let seen = tts.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(!seen[0].exists());
    }

    #[tokio::test]
    async fn failure_reads_as_zero_and_still_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let tts = FakeTts { fail: true, seen: Mutex::new(Vec::new()) };
        let oracle = DurationOracle::new(&tts, dir.path());

        assert_eq!(oracle.measure("some words").await, 0.0);
        assert!(!tts.seen.lock().unwrap()[0].exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn empty_text_skips_synthesis() {
        let dir = tempfile::tempdir().unwrap();
        let tts = FakeTts { fail: false, seen: Mutex::new(Vec::new()) };
        let oracle = DurationOracle::new(&tts, dir.path());

        assert_eq!(oracle.measure("   ").await, 0.0);
        assert!(tts.seen.lock().unwrap().is_empty());
    }
}
