use crate::api::edge_tts::EdgeTts;
use crate::api::gemini::GeminiClient;
use crate::api::{GenerationService, SpeechSynthesizer};
use crate::calibration::ScriptCalibrator;
use crate::config::Config;
use crate::downloader::Downloader;
use crate::error::CalibrationError;
use crate::ffmpeg;
use crate::init;
use crate::oracle::DurationOracle;
use crate::publish::{LocalPublisher, Publisher};
use crate::queue::UrlQueue;
use crate::response::word_count;
use crate::rotation::RotationManager;
use crate::sync::plan_audio_sync;
use crate::{logi, logok, logw};
use anyhow::{Context, Result};
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use walkdir::WalkDir;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FactoryReport {
    pub succeeded: usize,
    pub failed: usize,
}

impl FactoryReport {
    pub fn exit_code(&self) -> i32 {
        if self.failed == 0 { 0 } else { 1 }
    }
}

async fn file_exists(path: &Path) -> bool {
    fs::metadata(path).await.map(|m| m.is_file()).unwrap_or(false)
}

async fn remove_if_present(path: &Path) {
    if file_exists(path).await {
        if let Err(err) = fs::remove_file(path).await {
            logw(format!("Could not delete {}: {}", path.display(), err));
        }
    }
}

pub async fn clear_directory_contents(dir_path: &Path) -> Result<bool> {
    if fs::metadata(dir_path).await.is_err() {
        return Ok(true);
    }

    for entry in WalkDir::new(dir_path).min_depth(1).contents_first(true) {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            fs::remove_dir(path).await.ok();
        } else {
            fs::remove_file(path).await.ok();
        }
    }

    Ok(true)
}

pub fn build_gemini_client(cfg: &Config) -> Result<GeminiClient> {
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(300))
        .build()
        .context("Failed to build HTTP client")?;
    Ok(GeminiClient::new(http, &cfg.gemini, &cfg.processing))
}

/// Probes every configured key; an empty working set is fatal.
pub async fn validate_credentials(
    cfg: &Config,
    service: &dyn GenerationService,
) -> Result<RotationManager, CalibrationError> {
    RotationManager::validate_all(service, &cfg.gemini.api_keys, cfg.gemini.models.clone()).await
}

struct Pipeline<'a> {
    cfg: &'a Config,
    calibrator: ScriptCalibrator<'a>,
    tts: &'a dyn SpeechSynthesizer,
    publisher: &'a dyn Publisher,
    downloader: Downloader,
}

impl Pipeline<'_> {
    /// Downloads, renders and publishes one URL. The downloaded source and
    /// temporary narration and render files are deleted whatever the outcome.
    async fn process_single_video(&self, rotation: &mut RotationManager, url: &str) -> Result<bool> {
        let Some(source) = self.downloader.download(url).await? else {
            return Ok(false);
        };

        let temp = self.cfg.paths.temp_dir();
        let raw_audio = temp.join("narration_raw.mp3");
        let synced_audio = temp.join("narration_synced.mp3");
        let rendered = temp.join("short_render.mp4");

        let outcome = self
            .render_source(rotation, &source, &raw_audio, &synced_audio, &rendered)
            .await;

        remove_if_present(&source).await;
        remove_if_present(&raw_audio).await;
        remove_if_present(&synced_audio).await;
        remove_if_present(&rendered).await;
        outcome
    }

    async fn render_source(
        &self,
        rotation: &mut RotationManager,
        source: &Path,
        raw_audio: &Path,
        synced_audio: &Path,
        rendered: &Path,
    ) -> Result<bool> {
        let duration = ffmpeg::ffprobe_duration_seconds(source)
            .await
            .with_context(|| format!("Could not read duration of {}", source.display()))?;
        match ffmpeg::ffprobe_video_dimensions(source).await {
            Ok((w, h)) => logi(format!("Video: {}x{}, {:.2}s", w, h, duration)),
            Err(_) => logi(format!("Video duration: {:.2}s", duration)),
        }

        let script = self.calibrator.calibrate(rotation, source, duration).await?;
        let words = word_count(&script.script);
        if words < self.cfg.processing.min_script_words {
            logw(format!("Narration too short to use ({} words)", words));
            return Ok(false);
        }
        logi(format!("Title: {}", script.title));

        let speech = self
            .tts
            .synthesize(&script.script, raw_audio)
            .await
            .context("Narration synthesis failed")?;
        logi(format!(
            "Narration {:.2}s vs video {:.2}s",
            speech.duration_secs, duration
        ));

        let plan = plan_audio_sync(speech.duration_secs, duration);
        if !ffmpeg::ffmpeg_sync_audio(&speech.path, &plan, synced_audio).await? {
            logw("Audio sync produced no file");
            return Ok(false);
        }

        let paths = &self.cfg.paths;
        let keyed = paths.avatar_keyed();
        let avatar_ready =
            ffmpeg::ffmpeg_prepare_avatar(&paths.avatar_file(), duration, &paths.avatar_looped(), &keyed)
                .await?;
        let avatar = avatar_ready.then_some(keyed.as_path());

        logi(format!("Rendering -> {}", rendered.display()));
        if !ffmpeg::ffmpeg_render_short(source, synced_audio, avatar, duration, &self.cfg.render, rendered)
            .await?
        {
            logw("Render produced no file");
            return Ok(false);
        }

        self.publisher
            .publish(rendered, &script.title)
            .await
            .context("Publishing the rendered short failed")?;
        Ok(true)
    }
}

/// Drains the URL queue with already-validated credentials.
pub async fn process_queue(
    cfg: &Config,
    service: &dyn GenerationService,
    tts: &dyn SpeechSynthesizer,
    publisher: &dyn Publisher,
    rotation: &mut RotationManager,
) -> Result<FactoryReport> {
    let queue = UrlQueue::new(cfg.paths.url_file());
    let urls = queue.urls().await?;
    let mut report = FactoryReport::default();
    if urls.is_empty() {
        logw(format!("No URLs queued in {}", queue.path().display()));
        return Ok(report);
    }

    let oracle = DurationOracle::new(tts, cfg.paths.temp_dir());
    let pipeline = Pipeline {
        cfg,
        calibrator: ScriptCalibrator::new(service, &oracle, &cfg.calibration),
        tts,
        publisher,
        downloader: Downloader::new(cfg.paths.input_dir(), Some(cfg.paths.cookies_file())),
    };

    let total = urls.len();
    for (idx, url) in urls.iter().enumerate() {
        logi(format!("\n=== [{}/{}] {} ===", idx + 1, total, url));
        rotation.reset_model();

        match pipeline.process_single_video(rotation, url).await {
            Ok(true) => {
                report.succeeded += 1;
                if let Err(err) = queue.remove(url).await {
                    logw(format!("Could not update URL queue: {:#}", err));
                }
                logok(format!("DONE: {}", url));
            }
            Ok(false) => {
                report.failed += 1;
                logw(format!("FAILED: {}", url));
            }
            Err(err) => {
                report.failed += 1;
                logw(format!("FAILED: {} ({:#})", url, err));
            }
        }

        if idx + 1 < total && cfg.processing.delay_between_videos_secs > 0 {
            logi(format!(
                "Waiting {}s before the next video...",
                cfg.processing.delay_between_videos_secs
            ));
            tokio::time::sleep(Duration::from_secs(cfg.processing.delay_between_videos_secs)).await;
        }
    }

    Ok(report)
}

pub async fn run_factory(cfg: &Config) -> Result<FactoryReport> {
    init::ensure_directories(&cfg.paths).await?;
    let missing = init::missing_tools().await;
    if !missing.is_empty() {
        logw(format!("Missing tools: {}", missing.join(", ")));
    }

    let gemini = build_gemini_client(cfg)?;
    let mut rotation = validate_credentials(cfg, &gemini).await?;
    let tts = EdgeTts::new(cfg.voice.clone());
    let publisher = LocalPublisher::new(cfg.paths.output_dir());

    let report = process_queue(cfg, &gemini, &tts, &publisher, &mut rotation).await?;

    logi("Clearing temp folder...");
    if let Err(err) = clear_directory_contents(&cfg.paths.temp_dir()).await {
        logw(format!("Failed to fully clear temp folder: {:#}", err));
    }

    logi(format!(
        "\nAll done. Succeeded: {} | Failed: {}",
        report.succeeded, report.failed
    ));
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn clearing_removes_nested_entries_but_keeps_root() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a/b");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join("f.mp3"), b"x").unwrap();
        std::fs::write(dir.path().join("g.mov"), b"x").unwrap();

        assert!(clear_directory_contents(dir.path()).await.unwrap());
        assert!(dir.path().is_dir());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
        assert!(clear_directory_contents(&dir.path().join("missing")).await.unwrap());
    }

    #[test]
    fn any_failure_sets_exit_code() {
        assert_eq!(FactoryReport { succeeded: 3, failed: 0 }.exit_code(), 0);
        assert_eq!(FactoryReport { succeeded: 3, failed: 1 }.exit_code(), 1);
    }
}
