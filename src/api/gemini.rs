use crate::api::{GenerationService, MediaHandle, Part, Role, Turn};
use crate::config::{GeminiConfig, ProcessingSettings};
use crate::error::{GenerationError, UploadError};
use crate::{logi, logok, logw};
use async_trait::async_trait;
use bytes::Bytes;
use rand::Rng;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::fs;

const GENERATE_TIMEOUT_SECS: u64 = 300;
const UPLOAD_TIMEOUT_SECS: u64 = 900;
const POLL_BASE_SECS: f64 = 4.0;
const POLL_JITTER_SECS: f64 = 3.0;
const BACKOFF_JITTER_SECS: f64 = 3.0;

#[derive(Debug, Deserialize)]
struct FileResource {
    name: String,
    #[serde(default)]
    uri: Option<String>,
    #[serde(rename = "mimeType", default)]
    mime_type: Option<String>,
    #[serde(default)]
    state: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    file: FileResource,
}

enum UploadAttemptError {
    Transient(String),
    Fatal(UploadError),
}

impl From<reqwest::Error> for UploadAttemptError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() || err.is_request() || err.is_body() {
            UploadAttemptError::Transient(err.to_string())
        } else {
            UploadAttemptError::Fatal(UploadError::Rejected(err.to_string()))
        }
    }
}

pub struct GeminiClient {
    client: Client,
    base_url: String,
    max_upload_attempts: u32,
    processing_timeout: Duration,
}

impl GeminiClient {
    pub fn new(client: Client, cfg: &GeminiConfig, processing: &ProcessingSettings) -> Self {
        Self {
            client,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            max_upload_attempts: processing.max_upload_attempts.max(1),
            processing_timeout: Duration::from_secs(processing.upload_timeout_secs),
        }
    }

    async fn upload_once(
        &self,
        credential: &str,
        bytes: &Bytes,
        display_name: &str,
        mime_type: &str,
    ) -> Result<MediaHandle, UploadAttemptError> {
        let start = self
            .client
            .post(format!("{}/upload/v1beta/files", self.base_url))
            .query(&[("key", credential)])
            .header("X-Goog-Upload-Protocol", "resumable")
            .header("X-Goog-Upload-Command", "start")
            .header("X-Goog-Upload-Header-Content-Length", bytes.len().to_string())
            .header("X-Goog-Upload-Header-Content-Type", mime_type)
            .json(&json!({"file": {"display_name": display_name}}))
            .timeout(Duration::from_secs(60))
            .send()
            .await?;

        let status = start.status();
        if !status.is_success() {
            let raw = start.text().await.unwrap_or_default();
            return Err(http_failure(status.as_u16(), &raw));
        }

        let upload_url = start
            .headers()
            .get("x-goog-upload-url")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| {
                UploadAttemptError::Fatal(UploadError::Rejected(
                    "upload session missing x-goog-upload-url".to_string(),
                ))
            })?;

        let resp = self
            .client
            .post(upload_url)
            .header("X-Goog-Upload-Offset", "0")
            .header("X-Goog-Upload-Command", "upload, finalize")
            .body(bytes.clone())
            .timeout(Duration::from_secs(UPLOAD_TIMEOUT_SECS))
            .send()
            .await?;

        let status = resp.status();
        let raw = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(http_failure(status.as_u16(), &raw));
        }

        let uploaded: UploadResponse = serde_json::from_str(&raw).map_err(|e| {
            UploadAttemptError::Fatal(UploadError::Rejected(format!("bad upload response: {e}")))
        })?;

        let file = self.wait_until_active(credential, uploaded.file).await?;
        Ok(MediaHandle {
            uri: file.uri.unwrap_or_default(),
            mime_type: file.mime_type.unwrap_or_else(|| mime_type.to_string()),
            name: file.name,
        })
    }

    async fn wait_until_active(
        &self,
        credential: &str,
        mut file: FileResource,
    ) -> Result<FileResource, UploadAttemptError> {
        let started = Instant::now();
        while file.state.as_deref() == Some("PROCESSING") {
            let elapsed = started.elapsed();
            if elapsed > self.processing_timeout {
                return Err(UploadAttemptError::Fatal(UploadError::Timeout(
                    self.processing_timeout.as_secs(),
                )));
            }

            let pause: f64 = POLL_BASE_SECS + rand::thread_rng().gen_range(0.0..POLL_JITTER_SECS);
            logi(format!("Media processing... ({:.0}s)", elapsed.as_secs_f64()));
            tokio::time::sleep(Duration::from_secs_f64(pause)).await;

            match self.get_file(credential, &file.name).await {
                Ok(next) => file = next,
                Err(err) => logw(format!("Media state poll failed (will retry): {}", err)),
            }
        }

        if file.state.as_deref() == Some("FAILED") {
            return Err(UploadAttemptError::Fatal(UploadError::Rejected(
                "remote processing failed".to_string(),
            )));
        }
        Ok(file)
    }

    async fn get_file(&self, credential: &str, name: &str) -> anyhow::Result<FileResource> {
        let resp = self
            .client
            .get(format!("{}/v1beta/{}", self.base_url, name))
            .query(&[("key", credential)])
            .timeout(Duration::from_secs(30))
            .send()
            .await?;
        let status = resp.status();
        let raw = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            anyhow::bail!("HTTP {}: {}", status.as_u16(), error_message(&raw));
        }
        Ok(serde_json::from_str(&raw)?)
    }
}

#[async_trait]
impl GenerationService for GeminiClient {
    async fn generate(
        &self,
        credential: &str,
        model: &str,
        turns: &[Turn],
    ) -> Result<String, GenerationError> {
        let body = json!({ "contents": contents_json(turns) });

        let resp = self
            .client
            .post(format!("{}/v1beta/models/{}:generateContent", self.base_url, model))
            .query(&[("key", credential)])
            .json(&body)
            .timeout(Duration::from_secs(GENERATE_TIMEOUT_SECS))
            .send()
            .await
            .map_err(|e| GenerationError::Other(format!("request failed: {e}")))?;

        let status = resp.status();
        let raw = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(GenerationError::classify(
                Some(status.as_u16()),
                &error_message(&raw),
            ));
        }

        let root: Value = serde_json::from_str(&raw)
            .map_err(|e| GenerationError::Other(format!("bad response JSON: {e}")))?;
        extract_candidate_text(&root)
            .ok_or_else(|| GenerationError::Other("response carried no text".to_string()))
    }

    async fn upload_media(&self, credential: &str, path: &Path) -> Result<MediaHandle, UploadError> {
        let bytes = read_media(path).await?;
        let display_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "source".to_string());
        let mime_type = guess_video_mime(path);

        let mut attempt = 0;
        loop {
            attempt += 1;
            logi(format!("Uploading {} ({}/{})", display_name, attempt, self.max_upload_attempts));
            match self.upload_once(credential, &bytes, &display_name, mime_type).await {
                Ok(handle) => {
                    logok(format!("Upload ready: {}", handle.name));
                    return Ok(handle);
                }
                Err(UploadAttemptError::Fatal(err)) => return Err(err),
                Err(UploadAttemptError::Transient(msg)) => {
                    logw(format!("Upload connection issue: {}", truncate_chars(&msg, 80)));
                    if attempt >= self.max_upload_attempts {
                        return Err(UploadError::Exhausted { attempts: attempt, last: msg });
                    }
                    let jitter: f64 = rand::thread_rng().gen_range(0.0..BACKOFF_JITTER_SECS);
                    let delay = backoff_delay(attempt, jitter);
                    logi(format!("Retrying upload in {:.1}s", delay.as_secs_f64()));
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn release_media(&self, credential: &str, media: &MediaHandle) -> Result<(), GenerationError> {
        let resp = self
            .client
            .delete(format!("{}/v1beta/{}", self.base_url, media.name))
            .query(&[("key", credential)])
            .timeout(Duration::from_secs(30))
            .send()
            .await
            .map_err(|e| GenerationError::Other(format!("delete failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let raw = resp.text().await.unwrap_or_default();
            return Err(GenerationError::classify(Some(status.as_u16()), &error_message(&raw)));
        }
        Ok(())
    }
}

/// Reads the video once; retries clone the handle, not the buffer.
async fn read_media(path: &Path) -> Result<Bytes, UploadError> {
    Ok(Bytes::from(fs::read(path).await?))
}

fn http_failure(status: u16, raw: &str) -> UploadAttemptError {
    let message = format!("HTTP {}: {}", status, error_message(raw));
    if status == 408 || status == 429 || status >= 500 {
        UploadAttemptError::Transient(message)
    } else {
        UploadAttemptError::Fatal(UploadError::Rejected(message))
    }
}

/// `2^attempt` seconds plus jitter.
pub fn backoff_delay(attempt: u32, jitter_secs: f64) -> Duration {
    let base = 2f64.powi(attempt.min(16) as i32);
    Duration::from_secs_f64(base + jitter_secs.max(0.0))
}

fn guess_video_mime(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("webm") => "video/webm",
        Some("mov") => "video/quicktime",
        Some("mkv") => "video/x-matroska",
        _ => "video/mp4",
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

fn contents_json(turns: &[Turn]) -> Value {
    let contents: Vec<Value> = turns
        .iter()
        .map(|turn| {
            let role = match turn.role {
                Role::User => "user",
                Role::Model => "model",
            };
            let parts: Vec<Value> = turn
                .parts
                .iter()
                .map(|part| match part {
                    Part::Text(text) => json!({ "text": text }),
                    Part::Media(media) => json!({
                        "file_data": { "mime_type": media.mime_type, "file_uri": media.uri }
                    }),
                })
                .collect();
            json!({ "role": role, "parts": parts })
        })
        .collect();
    Value::Array(contents)
}

fn extract_candidate_text(root: &Value) -> Option<String> {
    let parts = root
        .get("candidates")?
        .as_array()?
        .first()?
        .get("content")?
        .get("parts")?
        .as_array()?;

    let text: String = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
        .collect::<Vec<_>>()
        .join("");
    let text = text.trim();
    if text.is_empty() { None } else { Some(text.to_string()) }
}

/// Message and status from a Google error envelope, or the raw body.
fn error_message(raw: &str) -> String {
    let parsed: Option<Value> = serde_json::from_str(raw).ok();
    if let Some(err) = parsed.as_ref().and_then(|v| v.get("error")) {
        let message = err.get("message").and_then(|v| v.as_str()).unwrap_or("");
        let status = err.get("status").and_then(|v| v.as_str()).unwrap_or("");
        return format!("{} {}", status, message).trim().to_string();
    }
    truncate_chars(raw, 400)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn media() -> MediaHandle {
        MediaHandle {
            name: "files/abc".to_string(),
            uri: "https://example.invalid/files/abc".to_string(),
            mime_type: "video/mp4".to_string(),
        }
    }

    #[test]
    fn contents_carry_roles_and_media() {
        let turns = vec![
            Turn::user_with_media(media(), "narrate"),
            Turn::model_text("Title: x"),
            Turn::user_text("longer please"),
        ];
        let v = contents_json(&turns);
        assert_eq!(v[0]["role"], "user");
        assert_eq!(v[0]["parts"][0]["file_data"]["file_uri"], "https://example.invalid/files/abc");
        assert_eq!(v[0]["parts"][1]["text"], "narrate");
        assert_eq!(v[1]["role"], "model");
        assert_eq!(v[2]["parts"][0]["text"], "longer please");
    }

    #[test]
    fn candidate_text_joins_parts() {
        let root = json!({
            "candidates": [{"content": {"parts": [{"text": "Title: a\n"}, {"text": "---\nbody"}]}}]
        });
        assert_eq!(extract_candidate_text(&root).as_deref(), Some("Title: a\n---\nbody"));
        assert_eq!(extract_candidate_text(&json!({"candidates": []})), None);
    }

    #[test]
    fn error_envelope_feeds_classification() {
        let raw = r#"{"error":{"code":429,"message":"Quota exceeded","status":"RESOURCE_EXHAUSTED"}}"#;
        let msg = error_message(raw);
        assert_eq!(msg, "RESOURCE_EXHAUSTED Quota exceeded");
        assert!(matches!(
            GenerationError::classify(Some(400), &msg),
            GenerationError::RateLimited(_)
        ));
        assert_eq!(error_message("plain body"), "plain body");
    }

    #[test]
    fn backoff_doubles() {
        assert_eq!(backoff_delay(1, 0.0), Duration::from_secs(2));
        assert_eq!(backoff_delay(3, 0.5), Duration::from_secs_f64(8.5));
    }

    #[test]
    fn server_errors_are_transient() {
        assert!(matches!(http_failure(503, ""), UploadAttemptError::Transient(_)));
        assert!(matches!(
            http_failure(400, "bad"),
            UploadAttemptError::Fatal(UploadError::Rejected(_))
        ));
    }

    #[test]
    fn mime_from_extension() {
        assert_eq!(guess_video_mime(Path::new("a.MOV")), "video/quicktime");
        assert_eq!(guess_video_mime(Path::new("a.mp4")), "video/mp4");
        assert_eq!(guess_video_mime(Path::new("a")), "video/mp4");
    }

    #[tokio::test]
    async fn media_buffer_is_shared_across_retries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mp4");
        std::fs::write(&path, vec![7u8; 4096]).unwrap();

        let bytes = read_media(&path).await.unwrap();
        let retry = bytes.clone();
        assert_eq!(retry.len(), 4096);
        assert_eq!(retry.as_ptr(), bytes.as_ptr());

        let missing = read_media(&dir.path().join("gone.mp4")).await;
        assert!(matches!(missing, Err(UploadError::Io(_))));
    }
}
