use crate::{logi, logw};

/// Differences inside this band are absorbed quietly; outside it they are reported.
pub const SYNC_BAND_SECS: f64 = 0.5;
pub const FADE_OUT_SECS: f64 = 0.5;
const EXACT_EPSILON_SECS: f64 = 0.001;

/// How narration audio is fitted to the video length.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SyncPlan {
    Exact { target_secs: f64 },
    /// Append `silence_secs` of silence after the narration.
    Pad { silence_secs: f64, target_secs: f64 },
    /// Cut to `target_secs` and fade out over the trailing `fade_secs`.
    Trim { target_secs: f64, fade_secs: f64 },
}

pub fn plan_audio_sync(audio_secs: f64, video_secs: f64) -> SyncPlan {
    let diff = video_secs - audio_secs;

    let plan = if diff.abs() < EXACT_EPSILON_SECS {
        SyncPlan::Exact { target_secs: video_secs }
    } else if diff > 0.0 {
        SyncPlan::Pad {
            silence_secs: diff,
            target_secs: video_secs,
        }
    } else {
        SyncPlan::Trim {
            target_secs: video_secs,
            fade_secs: FADE_OUT_SECS.min(video_secs.max(0.0)),
        }
    };

    if diff.abs() > SYNC_BAND_SECS {
        match plan {
            SyncPlan::Pad { .. } => logw(format!("Narration is {:.2}s short; padding with silence", diff)),
            _ => logw(format!("Narration is {:.2}s long; trimming", -diff)),
        }
    } else {
        logi(format!("Narration within {:.1}s of video ({:+.2}s)", SYNC_BAND_SECS, diff));
    }
    plan
}

impl SyncPlan {
    pub fn output_secs(&self) -> f64 {
        match *self {
            SyncPlan::Exact { target_secs }
            | SyncPlan::Pad { target_secs, .. }
            | SyncPlan::Trim { target_secs, .. } => target_secs,
        }
    }

    /// ffmpeg `-af` chain, `None` when the audio is used as-is.
    pub fn audio_filter(&self) -> Option<String> {
        match *self {
            SyncPlan::Exact { .. } => None,
            SyncPlan::Pad { silence_secs, .. } => Some(format!("apad=pad_dur={:.3}", silence_secs)),
            SyncPlan::Trim {
                target_secs,
                fade_secs,
            } => Some(format!(
                "atrim=0:{:.3},afade=t=out:st={:.3}:d={:.3}",
                target_secs,
                (target_secs - fade_secs).max(0.0),
                fade_secs
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_audio_gets_exact_trailing_silence() {
        let plan = plan_audio_sync(28.0, 30.0);
        assert_eq!(
            plan,
            SyncPlan::Pad {
                silence_secs: 2.0,
                target_secs: 30.0
            }
        );
        assert_eq!(plan.output_secs(), 30.0);
        let filter = plan.audio_filter().unwrap();
        assert_eq!(filter, "apad=pad_dur=2.000");
        assert!(!filter.contains("afade"));
    }

    #[test]
    fn long_audio_is_trimmed_with_fade() {
        let plan = plan_audio_sync(33.0, 30.0);
        assert_eq!(
            plan,
            SyncPlan::Trim {
                target_secs: 30.0,
                fade_secs: 0.5
            }
        );
        assert_eq!(
            plan.audio_filter().unwrap(),
            "atrim=0:30.000,afade=t=out:st=29.500:d=0.500"
        );
    }

    #[test]
    fn small_differences_use_the_same_branches() {
        assert!(matches!(plan_audio_sync(29.8, 30.0), SyncPlan::Pad { .. }));
        assert!(matches!(plan_audio_sync(30.3, 30.0), SyncPlan::Trim { .. }));
        assert!(matches!(plan_audio_sync(30.0, 30.0), SyncPlan::Exact { .. }));
        assert_eq!(plan_audio_sync(30.0, 30.0).audio_filter(), None);
    }
}
