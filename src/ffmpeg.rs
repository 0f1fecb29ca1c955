use crate::config::RenderSettings;
use crate::sync::SyncPlan;
use crate::{logi, logw};
use anyhow::{Context, Result};
use std::path::Path;
use tokio::process::Command;

/// Extra avatar footage beyond the video length, so the overlay never runs dry.
const AVATAR_SLACK_SECS: f64 = 2.0;
const AVATAR_WIDTH: u32 = 700;
const CHROMA_KEY: &str = "chromakey=0x00FF00:0.33:0.05";

async fn run_cmd(args: &[String]) -> Result<()> {
    if args.is_empty() {
        return Ok(());
    }

    let mut cmd = Command::new(&args[0]);
    if args.len() > 1 {
        cmd.args(&args[1..]);
    }

    let output = cmd.output().await.context("Command execution failed")?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let tail: String = stderr.trim().chars().rev().take(400).collect::<Vec<_>>().into_iter().rev().collect();
        return Err(anyhow::anyhow!("Command failed: {} ({})", args[0], tail));
    }

    Ok(())
}

fn base_args() -> Vec<String> {
    vec![
        "ffmpeg".to_string(),
        "-y".to_string(),
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
    ]
}

pub async fn ffprobe_video_dimensions(path: &Path) -> Result<(i32, i32)> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=width,height",
            "-of",
            "csv=s=x:p=0",
        ])
        .arg(path)
        .output()
        .await
        .context("ffprobe execution failed")?;

    if !output.status.success() {
        return Err(anyhow::anyhow!("ffprobe failed"));
    }

    let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    let mut parts = text.split('x');
    let w = parts
        .next()
        .and_then(|v| v.parse::<i32>().ok())
        .unwrap_or(0);
    let h = parts
        .next()
        .and_then(|v| v.parse::<i32>().ok())
        .unwrap_or(0);

    if w <= 0 || h <= 0 {
        return Err(anyhow::anyhow!("Invalid dimensions"));
    }

    Ok((w, h))
}

pub async fn ffprobe_duration_seconds(path: &Path) -> Result<f64> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ])
        .arg(path)
        .output()
        .await
        .context("ffprobe duration failed")?;

    if !output.status.success() {
        return Err(anyhow::anyhow!("ffprobe failed"));
    }

    let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    let duration = text.parse::<f64>().unwrap_or(-1.0);
    if duration <= 0.1 {
        return Err(anyhow::anyhow!("Invalid duration"));
    }
    Ok(duration)
}

fn sync_audio_args(in_audio: &Path, plan: &SyncPlan, out_audio: &Path) -> Vec<String> {
    let mut args = base_args();
    args.extend(["-i".to_string(), in_audio.display().to_string()]);
    if let Some(filter) = plan.audio_filter() {
        args.extend(["-af".to_string(), filter]);
    }
    args.extend([
        "-t".to_string(),
        format!("{:.3}", plan.output_secs()),
        "-c:a".to_string(),
        "libmp3lame".to_string(),
        "-b:a".to_string(),
        "192k".to_string(),
        out_audio.display().to_string(),
    ]);
    args
}

/// Writes `in_audio` fitted to the plan's length.
pub async fn ffmpeg_sync_audio(in_audio: &Path, plan: &SyncPlan, out_audio: &Path) -> Result<bool> {
    run_cmd(&sync_audio_args(in_audio, plan, out_audio)).await?;
    Ok(out_audio.exists())
}

/// Loops the talking avatar to cover `duration_needed` and keys out the green
/// screen into an alpha-capable `.mov`.
pub async fn ffmpeg_prepare_avatar(
    avatar: &Path,
    duration_needed: f64,
    looped_out: &Path,
    keyed_out: &Path,
) -> Result<bool> {
    if !avatar.exists() {
        logw(format!("Avatar not found at {}; rendering without overlay", avatar.display()));
        return Ok(false);
    }

    let mut loop_args = base_args();
    loop_args.extend([
        "-stream_loop".to_string(),
        "-1".to_string(),
        "-i".to_string(),
        avatar.display().to_string(),
        "-t".to_string(),
        format!("{:.3}", duration_needed + AVATAR_SLACK_SECS),
        "-vf".to_string(),
        "fps=30".to_string(),
        "-c:v".to_string(),
        "libx264".to_string(),
        "-preset".to_string(),
        "ultrafast".to_string(),
        "-an".to_string(),
        looped_out.display().to_string(),
    ]);
    if let Err(err) = run_cmd(&loop_args).await {
        logw(format!("Avatar loop failed: {}", err));
        return Ok(false);
    }

    let mut key_args = base_args();
    key_args.extend([
        "-i".to_string(),
        looped_out.display().to_string(),
        "-filter_complex".to_string(),
        format!("[0:v]{},scale={}:-1[out]", CHROMA_KEY, AVATAR_WIDTH),
        "-map".to_string(),
        "[out]".to_string(),
        "-c:v".to_string(),
        "qtrle".to_string(),
        "-pix_fmt".to_string(),
        "argb".to_string(),
        keyed_out.display().to_string(),
    ]);
    if let Err(err) = run_cmd(&key_args).await {
        logw(format!("Avatar chroma-key failed: {}", err));
        return Ok(false);
    }

    logi("Avatar ready".to_string());
    Ok(keyed_out.exists())
}

/// Cover-scale and centre-crop to the output frame, optionally overlaying the
/// keyed avatar centred at the bottom.
fn render_filter(render: &RenderSettings, with_avatar: bool) -> String {
    let base = format!(
        "[0:v]scale={w}:{h}:force_original_aspect_ratio=increase,crop={w}:{h},setsar=1,fps={fps}",
        w = render.width,
        h = render.height,
        fps = render.fps
    );
    if with_avatar {
        format!("{base}[bg];[bg][2:v]overlay=(W-w)/2:H-h:shortest=1[v]")
    } else {
        format!("{base}[v]")
    }
}

fn render_args(
    video: &Path,
    audio: &Path,
    avatar: Option<&Path>,
    duration: f64,
    render: &RenderSettings,
    out_mp4: &Path,
) -> Vec<String> {
    let mut args = base_args();
    args.extend([
        "-i".to_string(),
        video.display().to_string(),
        "-i".to_string(),
        audio.display().to_string(),
    ]);
    if let Some(avatar) = avatar {
        args.extend(["-i".to_string(), avatar.display().to_string()]);
    }
    args.extend([
        "-filter_complex".to_string(),
        render_filter(render, avatar.is_some()),
        "-map".to_string(),
        "[v]".to_string(),
        "-map".to_string(),
        "1:a".to_string(),
        "-t".to_string(),
        format!("{:.3}", duration),
        "-c:v".to_string(),
        "libx264".to_string(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
        "-preset".to_string(),
        render.preset.clone(),
        "-b:v".to_string(),
        render.bitrate.clone(),
        "-r".to_string(),
        render.fps.to_string(),
        "-c:a".to_string(),
        "aac".to_string(),
        "-b:a".to_string(),
        "192k".to_string(),
        "-movflags".to_string(),
        "+faststart".to_string(),
        out_mp4.display().to_string(),
    ]);
    args
}

/// Renders the vertical short: source picture, synced narration, optional avatar.
pub async fn ffmpeg_render_short(
    video: &Path,
    audio: &Path,
    avatar: Option<&Path>,
    duration: f64,
    render: &RenderSettings,
    out_mp4: &Path,
) -> Result<bool> {
    if let Some(parent) = out_mp4.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create dir {}", parent.display()))?;
    }
    run_cmd(&render_args(video, audio, avatar, duration, render, out_mp4)).await?;
    Ok(out_mp4.exists())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn padded_sync_has_no_fade() {
        let plan = SyncPlan::Pad {
            silence_secs: 2.0,
            target_secs: 30.0,
        };
        let args = sync_audio_args(Path::new("in.mp3"), &plan, Path::new("out.mp3"));
        let joined = args.join(" ");
        assert!(joined.contains("-af apad=pad_dur=2.000"));
        assert!(joined.contains("-t 30.000"));
        assert!(!joined.contains("afade"));
    }

    #[test]
    fn exact_sync_skips_filter() {
        let plan = SyncPlan::Exact { target_secs: 12.0 };
        let args = sync_audio_args(Path::new("in.mp3"), &plan, Path::new("out.mp3"));
        assert!(!args.iter().any(|a| a == "-af"));
    }

    #[test]
    fn render_filter_covers_frame_and_overlays_avatar() {
        let render = RenderSettings::default();
        let plain = render_filter(&render, false);
        assert!(plain.contains("scale=1080:1920:force_original_aspect_ratio=increase"));
        assert!(plain.contains("crop=1080:1920"));
        assert!(plain.ends_with("[v]"));
        assert!(!plain.contains("overlay"));

        let layered = render_filter(&render, true);
        assert!(layered.contains("[bg][2:v]overlay=(W-w)/2:H-h"));
    }

    #[test]
    fn render_args_map_narration_and_avatar() {
        let render = RenderSettings::default();
        let args = render_args(
            Path::new("src.mp4"),
            Path::new("voice.mp3"),
            Some(Path::new("avatar.mov")),
            30.0,
            &render,
            Path::new("out.mp4"),
        );
        let inputs: Vec<&String> = args
            .iter()
            .zip(args.iter().skip(1))
            .filter(|(flag, _)| flag.as_str() == "-i")
            .map(|(_, v)| v)
            .collect();
        assert_eq!(inputs, ["src.mp4", "voice.mp3", "avatar.mov"]);
        assert!(args.windows(2).any(|w| w[0] == "-map" && w[1] == "1:a"));
        assert!(args.windows(2).any(|w| w[0] == "-b:v" && w[1] == "5000k"));
        assert_eq!(args.last().map(String::as_str), Some("out.mp4"));
    }
}
