use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub gemini: GeminiConfig,
    #[serde(default)]
    pub voice: VoiceParams,
    #[serde(default)]
    pub calibration: CalibrationSettings,
    #[serde(default)]
    pub render: RenderSettings,
    #[serde(default)]
    pub processing: ProcessingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,
    pub input_dir: Option<PathBuf>,
    pub assets_dir: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
}

fn default_base_dir() -> PathBuf {
    PathBuf::from(".")
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
            input_dir: None,
            assets_dir: None,
            output_dir: None,
        }
    }
}

impl PathsConfig {
    pub fn input_dir(&self) -> PathBuf {
        self.input_dir
            .clone()
            .unwrap_or_else(|| self.base_dir.join("1_Input_Raw"))
    }

    pub fn assets_dir(&self) -> PathBuf {
        self.assets_dir
            .clone()
            .unwrap_or_else(|| self.base_dir.join("2_Assets"))
    }

    pub fn output_dir(&self) -> PathBuf {
        self.output_dir
            .clone()
            .unwrap_or_else(|| self.base_dir.join("3_Output_Ready"))
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.base_dir.join("temp")
    }

    pub fn url_file(&self) -> PathBuf {
        self.base_dir.join("urls.txt")
    }

    pub fn cookies_file(&self) -> PathBuf {
        self.assets_dir().join("cookies.txt")
    }

    pub fn avatar_file(&self) -> PathBuf {
        self.assets_dir().join("avatar_talking.mp4")
    }

    pub fn avatar_looped(&self) -> PathBuf {
        self.temp_dir().join("avatar_looped_ready.mp4")
    }

    pub fn avatar_keyed(&self) -> PathBuf {
        self.temp_dir().join("avatar_no_green.mov")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiConfig {
    #[serde(default)]
    pub api_keys: Vec<String>,
    /// Most capable first.
    #[serde(default = "default_models")]
    pub models: Vec<String>,
    #[serde(default = "default_gemini_base_url")]
    pub base_url: String,
}

fn default_models() -> Vec<String> {
    vec!["gemini-2.5-flash".to_string(), "gemini-2.0-flash".to_string()]
}

fn default_gemini_base_url() -> String {
    "https://generativelanguage.googleapis.com".to_string()
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_keys: Vec::new(),
            models: default_models(),
            base_url: default_gemini_base_url(),
        }
    }
}

/// Styling passed straight through to the speech engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VoiceParams {
    #[serde(default = "default_voice_name")]
    pub name: String,
    #[serde(default = "default_voice_rate")]
    pub rate: String,
    #[serde(default = "default_voice_pitch")]
    pub pitch: String,
    #[serde(default = "default_voice_volume")]
    pub volume: String,
}

fn default_voice_name() -> String {
    "th-TH-NiwatNeural".to_string()
}

fn default_voice_rate() -> String {
    "+5%".to_string()
}

fn default_voice_pitch() -> String {
    "+3Hz".to_string()
}

fn default_voice_volume() -> String {
    "+10%".to_string()
}

impl Default for VoiceParams {
    fn default() -> Self {
        Self {
            name: default_voice_name(),
            rate: default_voice_rate(),
            pitch: default_voice_pitch(),
            volume: default_voice_volume(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationSettings {
    /// Baseline speech tempo for the configured voice/language pairing.
    #[serde(default = "default_words_per_second")]
    pub words_per_second: f64,
    /// Accept a round as soon as `|target - measured|` is within this many seconds.
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_title")]
    pub default_title: String,
    #[serde(default = "default_rate_limit_pause_ms")]
    pub rate_limit_pause_ms: u64,
    #[serde(default = "default_error_pause_ms")]
    pub error_pause_ms: u64,
}

fn default_words_per_second() -> f64 {
    2.2
}

fn default_tolerance() -> f64 {
    3.0
}

fn default_max_attempts() -> u32 {
    3
}

fn default_language() -> String {
    "Thai".to_string()
}

fn default_title() -> String {
    "คลิปเด็ด".to_string()
}

fn default_rate_limit_pause_ms() -> u64 {
    2_000
}

fn default_error_pause_ms() -> u64 {
    1_000
}

impl Default for CalibrationSettings {
    fn default() -> Self {
        Self {
            words_per_second: default_words_per_second(),
            tolerance: default_tolerance(),
            max_attempts: default_max_attempts(),
            language: default_language(),
            default_title: default_title(),
            rate_limit_pause_ms: default_rate_limit_pause_ms(),
            error_pause_ms: default_error_pause_ms(),
        }
    }
}

impl CalibrationSettings {
    pub fn rate_limit_pause(&self) -> Duration {
        Duration::from_millis(self.rate_limit_pause_ms)
    }

    pub fn error_pause(&self) -> Duration {
        Duration::from_millis(self.error_pause_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderSettings {
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_fps")]
    pub fps: u32,
    #[serde(default = "default_bitrate")]
    pub bitrate: String,
    #[serde(default = "default_preset")]
    pub preset: String,
}

fn default_width() -> u32 {
    1080
}

fn default_height() -> u32 {
    1920
}

fn default_fps() -> u32 {
    30
}

fn default_bitrate() -> String {
    "5000k".to_string()
}

fn default_preset() -> String {
    "medium".to_string()
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            fps: default_fps(),
            bitrate: default_bitrate(),
            preset: default_preset(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingSettings {
    #[serde(default = "default_delay_between_videos")]
    pub delay_between_videos_secs: u64,
    #[serde(default = "default_max_upload_attempts")]
    pub max_upload_attempts: u32,
    #[serde(default = "default_upload_timeout")]
    pub upload_timeout_secs: u64,
    #[serde(default = "default_min_script_words")]
    pub min_script_words: usize,
}

fn default_delay_between_videos() -> u64 {
    10
}

fn default_max_upload_attempts() -> u32 {
    5
}

fn default_upload_timeout() -> u64 {
    600
}

fn default_min_script_words() -> usize {
    5
}

impl Default for ProcessingSettings {
    fn default() -> Self {
        Self {
            delay_between_videos_secs: default_delay_between_videos(),
            max_upload_attempts: default_max_upload_attempts(),
            upload_timeout_secs: default_upload_timeout(),
            min_script_words: default_min_script_words(),
        }
    }
}

/// Comma separated, blanks dropped.
pub fn parse_key_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .collect()
}

impl Config {
    /// Reads `path` when it exists, then layers environment overrides on top.
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if fs::metadata(path).await.is_ok() {
            let content = fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read config: {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse config: {}", path.display()))?
        } else {
            Config::default()
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(keys) = lookup("GEMINI_API_KEYS") {
            let keys = parse_key_list(&keys);
            if !keys.is_empty() {
                self.gemini.api_keys = keys;
            }
        }
        if let Some(dir) = lookup("BASE_DIR") {
            self.paths.base_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("INPUT_DIR") {
            self.paths.input_dir = Some(PathBuf::from(dir));
        }
        if let Some(dir) = lookup("ASSETS_DIR") {
            self.paths.assets_dir = Some(PathBuf::from(dir));
        }
        if let Some(dir) = lookup("OUTPUT_DIR") {
            self.paths.output_dir = Some(PathBuf::from(dir));
        }
        if let Some(v) = lookup("VOICE_NAME") {
            self.voice.name = v;
        }
        if let Some(v) = lookup("VOICE_RATE") {
            self.voice.rate = v;
        }
        if let Some(v) = lookup("VOICE_PITCH") {
            self.voice.pitch = v;
        }
        if let Some(v) = lookup("VOICE_VOLUME") {
            self.voice.volume = v;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.gemini.api_keys.is_empty() {
            anyhow::bail!("GEMINI_API_KEYS missing (comma separated list in .env or config.json)");
        }
        if self.gemini.models.is_empty() {
            anyhow::bail!("config: gemini.models must list at least one model");
        }
        if !(self.calibration.words_per_second > 0.0) {
            anyhow::bail!("config: calibration.words_per_second must be positive");
        }
        if !(self.calibration.tolerance >= 0.0) {
            anyhow::bail!("config: calibration.tolerance must not be negative");
        }
        if self.calibration.max_attempts == 0 {
            anyhow::bail!("config: calibration.max_attempts must be at least 1");
        }
        Ok(())
    }

    /// Secret-free view for `--status`.
    pub fn summary(&self) -> serde_json::Value {
        serde_json::json!({
            "base_dir": self.paths.base_dir.display().to_string(),
            "gemini_keys_count": self.gemini.api_keys.len(),
            "voice": self.voice.name,
            "models": self.gemini.models,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_match_voice_and_calibration_baseline() {
        let cfg = Config::default();
        assert_eq!(cfg.voice.name, "th-TH-NiwatNeural");
        assert_eq!(cfg.calibration.words_per_second, 2.2);
        assert_eq!(cfg.calibration.tolerance, 3.0);
        assert_eq!(cfg.calibration.max_attempts, 3);
        assert_eq!(cfg.gemini.models[0], "gemini-2.5-flash");
        assert_eq!(cfg.paths.url_file(), PathBuf::from("./urls.txt"));
    }

    #[test]
    fn env_overrides_win() {
        let env: HashMap<&str, &str> = [
            ("GEMINI_API_KEYS", " k1, ,k2 "),
            ("BASE_DIR", "/srv/factory"),
            ("VOICE_RATE", "+0%"),
        ]
        .into_iter()
        .collect();

        let mut cfg = Config::default();
        cfg.apply_overrides(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(cfg.gemini.api_keys, vec!["k1", "k2"]);
        assert_eq!(cfg.paths.output_dir(), PathBuf::from("/srv/factory/3_Output_Ready"));
        assert_eq!(cfg.voice.rate, "+0%");
        assert_eq!(cfg.voice.pitch, "+3Hz");
    }

    #[test]
    fn validate_rejects_missing_keys() {
        let cfg = Config::default();
        assert!(cfg.validate().is_err());

        let mut ok = Config::default();
        ok.gemini.api_keys = vec!["k".to_string()];
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let cfg: Config =
            serde_json::from_str(r#"{"calibration":{"tolerance":1.5},"gemini":{"api_keys":["a"]}}"#)
                .unwrap();
        assert_eq!(cfg.calibration.tolerance, 1.5);
        assert_eq!(cfg.calibration.max_attempts, 3);
        assert_eq!(cfg.gemini.models.len(), 2);
        assert_eq!(cfg.render.width, 1080);
    }

    #[test]
    fn summary_hides_keys() {
        let mut cfg = Config::default();
        cfg.gemini.api_keys = vec!["secret-key".to_string()];
        let text = cfg.summary().to_string();
        assert!(!text.contains("secret-key"));
        assert!(text.contains("\"gemini_keys_count\":1"));
    }
}
