use once_cell::sync::Lazy;
use std::sync::{Arc, Mutex};

pub mod api;
pub mod calibration;
pub mod config;
pub mod downloader;
pub mod error;
pub mod factory;
pub mod ffmpeg;
pub mod init;
pub mod oracle;
pub mod publish;
pub mod queue;
pub mod response;
pub mod rotation;
pub mod sync;

pub type PipelineLogHook = Arc<Mutex<dyn Fn(&str) + Send + Sync + 'static>>;

static LOG_HOOK: Lazy<Mutex<Option<PipelineLogHook>>> = Lazy::new(|| Mutex::new(None));

/// Mirrors every tagged pipeline log line to `hook` until it is replaced or cleared.
pub fn set_log_hook(hook: Option<PipelineLogHook>) {
    if let Ok(mut guard) = LOG_HOOK.lock() {
        *guard = hook;
    }
}

pub(crate) fn logv(tag: &str, message: &str) {
    match tag {
        "WARN" => tracing::warn!("{}", message),
        _ => tracing::info!("[{}] {}", tag, message),
    }

    if let Ok(guard) = LOG_HOOK.lock() {
        if let Some(hook) = guard.as_ref() {
            if let Ok(callback) = hook.lock() {
                let line = format!("[{}] {}", tag, message);
                callback(&line);
            }
        }
    }
}

pub(crate) fn logi(message: impl AsRef<str>) {
    logv("INFO", message.as_ref());
}

pub(crate) fn logok(message: impl AsRef<str>) {
    logv("OK", message.as_ref());
}

pub(crate) fn logw(message: impl AsRef<str>) {
    logv("WARN", message.as_ref());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hook_receives_tagged_lines() {
        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let hook: PipelineLogHook = Arc::new(Mutex::new(move |line: &str| {
            sink.lock().unwrap().push(line.to_string());
        }));

        set_log_hook(Some(hook));
        logok("hook-probe-line");
        set_log_hook(None);
        logw("after-clear-line");

        let lines = seen.lock().unwrap();
        assert!(lines.iter().any(|l| l == "[OK] hook-probe-line"));
        assert!(!lines.iter().any(|l| l.contains("after-clear-line")));
    }
}
