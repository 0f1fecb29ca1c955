pub mod edge_tts;
pub mod gemini;

use crate::error::{GenerationError, UploadError};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Remote reference to an uploaded source video.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaHandle {
    pub name: String,
    pub uri: String,
    pub mime_type: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Model,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Part {
    Text(String),
    Media(MediaHandle),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Turn {
    pub role: Role,
    pub parts: Vec<Part>,
}

impl Turn {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            parts: vec![Part::Text(text.into())],
        }
    }

    pub fn user_with_media(media: MediaHandle, text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            parts: vec![Part::Media(media), Part::Text(text.into())],
        }
    }

    pub fn model_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::Model,
            parts: vec![Part::Text(text.into())],
        }
    }

    /// Concatenated text parts, media parts skipped.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::Text(t) => Some(t.as_str()),
                Part::Media(_) => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Stateless multi-turn text generation. The caller owns the conversation and
/// names the credential and model on every call.
#[async_trait]
pub trait GenerationService: Send + Sync {
    async fn generate(
        &self,
        credential: &str,
        model: &str,
        turns: &[Turn],
    ) -> Result<String, GenerationError>;

    async fn upload_media(&self, credential: &str, path: &Path) -> Result<MediaHandle, UploadError>;

    async fn release_media(&self, credential: &str, media: &MediaHandle) -> Result<(), GenerationError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpeechAsset {
    pub path: PathBuf,
    pub duration_secs: f64,
}

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Writes narration for `text` to `out_path` and reports its duration.
    async fn synthesize(&self, text: &str, out_path: &Path) -> anyhow::Result<SpeechAsset>;
}
