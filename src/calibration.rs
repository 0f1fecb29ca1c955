//! Script-length calibration.
//!
//! A session asks the model for a narration, measures how long the speech
//! engine takes to say it, and feeds the measured words-per-second back into
//! the next request until the spoken length lands within tolerance of the
//! video, or the attempt budget runs out and the closest round is used.

use crate::api::{GenerationService, MediaHandle, Role, Turn};
use crate::config::CalibrationSettings;
use crate::error::{CalibrationError, GenerationError};
use crate::oracle::DurationOracle;
use crate::response::{normalize_script, parse_response, word_count};
use crate::rotation::RotationManager;
use crate::{logi, logok, logw};
use std::path::Path;

/// One generate-then-measure cycle. Never mutated after it is recorded.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRound {
    pub title: String,
    pub script: String,
    pub measured_secs: f64,
    pub word_count: usize,
    /// `target - measured`; positive means the narration ran short.
    pub diff_secs: f64,
}

impl GenerationRound {
    pub fn abs_diff(&self) -> f64 {
        self.diff_secs.abs()
    }

    pub fn is_measured(&self) -> bool {
        self.measured_secs > 0.0
    }
}

#[derive(Debug, Clone, Default)]
pub struct RoundHistory {
    rounds: Vec<GenerationRound>,
}

impl RoundHistory {
    pub fn push(&mut self, round: GenerationRound) {
        self.rounds.push(round);
    }

    pub fn last(&self) -> Option<&GenerationRound> {
        self.rounds.last()
    }

    pub fn len(&self) -> usize {
        self.rounds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rounds.is_empty()
    }

    pub fn rounds(&self) -> &[GenerationRound] {
        &self.rounds
    }

    /// Round closest to the target; the earliest one wins a tie.
    pub fn best_fit(&self) -> Option<&GenerationRound> {
        self.rounds
            .iter()
            .min_by(|a, b| a.abs_diff().total_cmp(&b.abs_diff()))
    }
}

/// Ordered exchange with the model. The first user turn carries the media.
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    turns: Vec<Turn>,
}

impl Conversation {
    pub fn is_open(&self) -> bool {
        !self.turns.is_empty()
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn send(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    pub fn record_reply(&mut self, text: &str) {
        self.turns.push(Turn::model_text(text));
    }

    /// Drops an unanswered user turn so a retry does not repeat it.
    pub fn discard_pending(&mut self) {
        if self.turns.last().is_some_and(|t| t.role == Role::User) {
            self.turns.pop();
        }
    }

    pub fn reset(&mut self) {
        self.turns.clear();
    }
}

/// Uploaded media and the credential it belongs to.
#[derive(Debug, Clone)]
struct MediaLease {
    credential: String,
    handle: MediaHandle,
}

pub struct CalibrationSession {
    pub target_secs: f64,
    pub history: RoundHistory,
    pub conversation: Conversation,
    media: Option<MediaLease>,
}

impl CalibrationSession {
    pub fn new(target_secs: f64) -> Self {
        Self {
            target_secs,
            history: RoundHistory::default(),
            conversation: Conversation::default(),
            media: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CalibratedScript {
    pub title: String,
    pub script: String,
    pub measured_secs: f64,
    pub converged: bool,
    pub rounds: usize,
}

impl CalibratedScript {
    fn from_round(round: &GenerationRound, converged: bool, rounds: usize) -> Self {
        Self {
            title: round.title.clone(),
            script: round.script.clone(),
            measured_secs: round.measured_secs,
            converged,
            rounds,
        }
    }
}

pub fn initial_target_words(target_secs: f64, words_per_second: f64) -> usize {
    (target_secs * words_per_second).round().max(1.0) as usize
}

/// ±10% around the target.
pub fn word_bounds(target_words: usize) -> (usize, usize) {
    let t = target_words as f64;
    ((t * 0.9).round() as usize, (t * 1.1).round() as usize)
}

/// Secant-style correction from the previous round's observed tempo.
///
/// `prev + round((target - prev_secs) * prev / prev_secs)`, with the baseline
/// rate standing in when the previous round was unmeasured.
pub fn next_target_words(
    prev_words: usize,
    prev_secs: f64,
    target_secs: f64,
    base_words_per_second: f64,
) -> usize {
    let rate = if prev_secs > 0.0 && prev_words > 0 {
        prev_words as f64 / prev_secs
    } else {
        base_words_per_second
    };
    let adjustment = ((target_secs - prev_secs) * rate).round();
    (prev_words as f64 + adjustment).max(1.0) as usize
}

fn opening_prompt(settings: &CalibrationSettings, target_secs: f64, target_words: usize) -> String {
    let (min_words, max_words) = word_bounds(target_words);
    format!(
        "You are a professional voice-over narrator. Watch the attached video and write a {lang} narration that fits {secs:.0} seconds when spoken.\n\
         \n\
         Length (very important):\n\
         - Target: about {target_words} words (minimum {min_words}, maximum {max_words}).\n\
         - Spoken pace is about {wps:.1} words per second.\n\
         \n\
         Rules:\n\
         1. Describe what happens in the video in chronological order.\n\
         2. Write one continuous paragraph of short sentences with natural pauses.\n\
         3. Do not greet the audience and never refer to \"this clip\" or \"this video\".\n\
         4. No stage directions, brackets or markdown.\n\
         \n\
         Answer in exactly this format:\n\
         Title: <short {lang} title, 3-5 words>\n\
         ---\n\
         <the narration, about {target_words} words>",
        lang = settings.language,
        secs = target_secs,
        wps = settings.words_per_second,
    )
}

fn follow_up_prompt(prev: &GenerationRound, target_secs: f64, target_words: usize) -> String {
    let (verdict, direction) = if prev.diff_secs >= 0.0 {
        (
            "too short",
            "longer: describe every scene, the emotions, and the people and objects in more detail",
        )
    } else {
        ("too long", "shorter and tighter, keeping only the key moments")
    };
    format!(
        "The previous narration was {words} words and ran {measured:.1} seconds, but the video is {target:.0} seconds ({verdict} by {gap:.1} seconds).\n\
         Rewrite it {direction}. Use about {target_words} words.\n\
         Reply with the narration only, no title and no labels.",
        words = prev.word_count,
        measured = prev.measured_secs,
        target = target_secs,
        gap = prev.abs_diff(),
    )
}

pub struct ScriptCalibrator<'a> {
    service: &'a dyn GenerationService,
    oracle: &'a DurationOracle<'a>,
    settings: &'a CalibrationSettings,
}

impl<'a> ScriptCalibrator<'a> {
    pub fn new(
        service: &'a dyn GenerationService,
        oracle: &'a DurationOracle<'a>,
        settings: &'a CalibrationSettings,
    ) -> Self {
        Self {
            service,
            oracle,
            settings,
        }
    }

    /// Produces a narration for `video` sized to `target_secs`.
    ///
    /// Uploaded media is released before returning on every path.
    pub async fn calibrate(
        &self,
        rotation: &mut RotationManager,
        video: &Path,
        target_secs: f64,
    ) -> Result<CalibratedScript, CalibrationError> {
        logi(format!("AI: analysing video (target {:.2}s)...", target_secs));
        let mut session = CalibrationSession::new(target_secs);
        let outcome = self.run_rounds(&mut session, rotation, video).await;
        self.release_media(&mut session).await;
        outcome
    }

    async fn run_rounds(
        &self,
        session: &mut CalibrationSession,
        rotation: &mut RotationManager,
        video: &Path,
    ) -> Result<CalibratedScript, CalibrationError> {
        let max_attempts = self.settings.max_attempts.max(1);
        let target_secs = session.target_secs;

        for attempt in 1..=max_attempts {
            let target_words = match session.history.last() {
                None => initial_target_words(target_secs, self.settings.words_per_second),
                Some(prev) => {
                    let next = next_target_words(
                        prev.word_count,
                        prev.measured_secs,
                        target_secs,
                        self.settings.words_per_second,
                    );
                    logi(format!(
                        "Calibration: {} words = {:.1}s, asking for {} words ({:+})",
                        prev.word_count,
                        prev.measured_secs,
                        next,
                        next as i64 - prev.word_count as i64
                    ));
                    next
                }
            };

            if session.conversation.is_open() {
                let prompt = match session.history.last() {
                    Some(prev) => follow_up_prompt(prev, target_secs, target_words),
                    None => format!(
                        "Rewrite the narration to about {target_words} words. Reply with the narration only."
                    ),
                };
                session.conversation.send(Turn::user_text(prompt));
            } else {
                let media = match self.ensure_media(session, rotation, video).await {
                    Ok(media) => media,
                    Err(err) if session.history.is_empty() => return Err(err),
                    Err(err) => {
                        logw(format!("Re-upload failed ({}); keeping earlier rounds", err));
                        break;
                    }
                };
                logi(format!("Using model {}", rotation.current_model()));
                let prompt = opening_prompt(self.settings, target_secs, target_words);
                session.conversation.send(Turn::user_with_media(media, prompt));
            }

            let reply = self
                .service
                .generate(
                    rotation.current_credential(),
                    rotation.current_model(),
                    session.conversation.turns(),
                )
                .await;

            match reply {
                Ok(text) => {
                    session.conversation.record_reply(&text);
                    let round = match self.evaluate(session, &text).await {
                        Ok(round) => round,
                        Err(err) => {
                            logw(format!("Round {} could not be evaluated: {:#}", attempt, err));
                            continue;
                        }
                    };
                    logi(format!(
                        ">> Round {}: {} words = {:.2}s | target {:.2}s | diff {:+.2}s",
                        attempt, round.word_count, round.measured_secs, target_secs, round.diff_secs
                    ));
                    let converged = round.is_measured() && round.abs_diff() <= self.settings.tolerance;
                    if converged {
                        let accepted =
                            CalibratedScript::from_round(&round, true, session.history.len() + 1);
                        session.history.push(round);
                        logok("Narration length within tolerance; accepting");
                        return Ok(accepted);
                    }
                    session.history.push(round);
                }
                Err(err) => {
                    session.conversation.discard_pending();
                    self.absorb_failure(session, rotation, err).await;
                }
            }
        }

        match session.history.best_fit() {
            Some(best) => {
                logok(format!(
                    "Best of {} rounds: {} words = {:.1}s (diff {:+.1}s)",
                    session.history.len(),
                    best.word_count,
                    best.measured_secs,
                    best.diff_secs
                ));
                Ok(CalibratedScript::from_round(best, false, session.history.len()))
            }
            None => Err(CalibrationError::NoUsableScript {
                attempts: max_attempts,
            }),
        }
    }

    async fn evaluate(&self, session: &CalibrationSession, reply: &str) -> anyhow::Result<GenerationRound> {
        let parsed = parse_response(reply);
        let fallback_title = session
            .history
            .last()
            .map(|r| r.title.clone())
            .unwrap_or_else(|| self.settings.default_title.clone());
        let (title, body) = parsed.into_parts(&fallback_title);

        let script = normalize_script(&body)?;
        let words = word_count(&script);
        let measured = self.oracle.measure(&script).await;

        Ok(GenerationRound {
            title: title.trim().to_string(),
            script,
            measured_secs: measured,
            word_count: words,
            diff_secs: session.target_secs - measured,
        })
    }

    async fn absorb_failure(
        &self,
        session: &mut CalibrationSession,
        rotation: &mut RotationManager,
        err: GenerationError,
    ) {
        logw(format!("Generation error: {}", truncate(&err.to_string(), 120)));
        match err {
            GenerationError::RateLimited(_) => {
                logw("Rate limited; switching key");
                rotation.rotate_credential();
                session.conversation.reset();
                tokio::time::sleep(self.settings.rate_limit_pause()).await;
            }
            GenerationError::ModelUnavailable(_) => {
                let failed = rotation.current_model().to_string();
                let next = rotation.advance_model();
                logw(format!("Model {} unavailable; falling back to {}", failed, next));
                session.conversation.reset();
            }
            GenerationError::Other(_) => {
                tokio::time::sleep(self.settings.error_pause()).await;
            }
        }
    }

    /// Media bound to the current credential, uploading it when needed.
    async fn ensure_media(
        &self,
        session: &mut CalibrationSession,
        rotation: &RotationManager,
        video: &Path,
    ) -> Result<MediaHandle, CalibrationError> {
        let credential = rotation.current_credential();
        if let Some(lease) = &session.media {
            if lease.credential == credential {
                return Ok(lease.handle.clone());
            }
        }

        self.release_media(session).await;
        let handle = self.service.upload_media(credential, video).await?;
        session.media = Some(MediaLease {
            credential: credential.to_string(),
            handle: handle.clone(),
        });
        Ok(handle)
    }

    async fn release_media(&self, session: &mut CalibrationSession) {
        if let Some(lease) = session.media.take() {
            if let Err(err) = self.service.release_media(&lease.credential, &lease.handle).await {
                logw(format!("Could not release remote media {}: {}", lease.handle.name, err));
            }
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round(measured: f64, target: f64) -> GenerationRound {
        GenerationRound {
            title: format!("t{measured}"),
            script: "x".to_string(),
            measured_secs: measured,
            word_count: 1,
            diff_secs: target - measured,
        }
    }

    #[test]
    fn initial_words_from_baseline() {
        assert_eq!(initial_target_words(30.0, 2.2), 66);
        assert_eq!(word_bounds(66), (59, 73));
    }

    #[test]
    fn next_words_uses_observed_rate() {
        assert_eq!(next_target_words(50, 25.0, 30.0, 2.2), 60);
        assert_eq!(next_target_words(80, 40.0, 30.0, 2.2), 60);
        assert_eq!(next_target_words(70, 32.0, 30.0, 2.2), 66);
    }

    #[test]
    fn next_words_falls_back_when_unmeasured() {
        assert_eq!(next_target_words(40, 0.0, 30.0, 2.2), 40 + 66);
        assert_eq!(next_target_words(0, 0.0, 10.0, 2.0), 20);
    }

    #[test]
    fn best_fit_prefers_smallest_gap_then_earliest() {
        let mut h = RoundHistory::default();
        assert!(h.best_fit().is_none());
        h.push(round(25.0, 30.0));
        h.push(round(33.0, 30.0));
        h.push(round(27.0, 30.0));
        h.push(round(36.0, 30.0));
        assert_eq!(h.best_fit().unwrap().title, "t33");

        let mut tie = RoundHistory::default();
        tie.push(round(28.0, 30.0));
        tie.push(round(32.0, 30.0));
        assert_eq!(tie.best_fit().unwrap().title, "t28");
    }

    #[test]
    fn conversation_discards_only_unanswered_turns() {
        let mut c = Conversation::default();
        c.send(Turn::user_text("a"));
        c.record_reply("b");
        c.discard_pending();
        assert_eq!(c.turns().len(), 2);
        c.send(Turn::user_text("c"));
        c.discard_pending();
        assert_eq!(c.turns().len(), 2);
        c.reset();
        assert!(!c.is_open());
    }

    #[test]
    fn prompts_carry_word_targets() {
        let settings = CalibrationSettings::default();
        let opening = opening_prompt(&settings, 30.0, 66);
        assert!(opening.contains("about 66 words (minimum 59, maximum 73)"));
        assert!(opening.contains("Title:"));
        assert!(opening.contains("---"));

        let short = follow_up_prompt(&round(25.0, 30.0), 30.0, 60);
        assert!(short.contains("too short by 5.0 seconds"));
        assert!(short.contains("about 60 words"));
        let long = follow_up_prompt(&round(34.0, 30.0), 30.0, 55);
        assert!(long.contains("too long"));
    }
}
