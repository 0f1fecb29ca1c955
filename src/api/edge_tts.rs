use crate::api::{SpeechAsset, SpeechSynthesizer};
use crate::config::VoiceParams;
use crate::ffmpeg;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::Path;
use tokio::fs;
use tokio::process::Command;

/// Anything smaller is a failed synthesis, not narration.
pub const MIN_AUDIO_BYTES: u64 = 1024;

pub struct EdgeTts {
    program: String,
    voice: VoiceParams,
}

impl EdgeTts {
    pub fn new(voice: VoiceParams) -> Self {
        Self {
            program: "edge-tts".to_string(),
            voice,
        }
    }

    fn args(&self, text: &str, out_path: &Path) -> Vec<String> {
        vec![
            "--voice".to_string(),
            self.voice.name.clone(),
            format!("--rate={}", self.voice.rate),
            format!("--pitch={}", self.voice.pitch),
            format!("--volume={}", self.voice.volume),
            "--text".to_string(),
            text.to_string(),
            "--write-media".to_string(),
            out_path.display().to_string(),
        ]
    }
}

#[async_trait]
impl SpeechSynthesizer for EdgeTts {
    async fn synthesize(&self, text: &str, out_path: &Path) -> Result<SpeechAsset> {
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create dir {}", parent.display()))?;
        }

        let output = Command::new(&self.program)
            .args(self.args(text, out_path))
            .output()
            .await
            .context("edge-tts execution failed")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("edge-tts failed: {}", stderr.trim());
        }

        let size = fs::metadata(out_path).await.map(|m| m.len()).unwrap_or(0);
        if size < MIN_AUDIO_BYTES {
            anyhow::bail!("edge-tts produced an unreadably small file ({} bytes)", size);
        }

        let duration_secs = ffmpeg::ffprobe_duration_seconds(out_path).await?;
        Ok(SpeechAsset {
            path: out_path.to_path_buf(),
            duration_secs,
        })
    }
}
