use crate::api::{GenerationService, Turn};
use crate::error::{CalibrationError, GenerationError};
use crate::{logi, logok, logw};

const PROBE_PROMPT: &str = "Reply with the single word: hello";

/// Working credentials and the model hierarchy, each with its own cursor.
///
/// Credential exhaustion and model unavailability are separate failure axes,
/// so the two cursors never move together.
#[derive(Debug, Clone)]
pub struct RotationManager {
    credentials: Vec<String>,
    credential_cursor: usize,
    models: Vec<String>,
    model_cursor: usize,
}

impl RotationManager {
    /// Builds a manager over an already-validated working set.
    pub fn new(credentials: Vec<String>, models: Vec<String>) -> Result<Self, CalibrationError> {
        if credentials.is_empty() {
            return Err(CalibrationError::NoWorkingCredentials);
        }
        if models.is_empty() {
            return Err(CalibrationError::NoModels);
        }
        Ok(Self {
            credentials,
            credential_cursor: 0,
            models,
            model_cursor: 0,
        })
    }

    /// Probes every candidate with the top model and keeps the ones that answer.
    pub async fn validate_all(
        service: &dyn GenerationService,
        candidates: &[String],
        models: Vec<String>,
    ) -> Result<Self, CalibrationError> {
        let probe_model = models.first().ok_or(CalibrationError::NoModels)?.clone();
        logi(format!("Validating {} API key(s) against {}...", candidates.len(), probe_model));

        let probe = [Turn::user_text(PROBE_PROMPT)];
        let mut working = Vec::new();
        for (idx, key) in candidates.iter().enumerate() {
            match service.generate(key, &probe_model, &probe).await {
                Ok(text) if !text.trim().is_empty() => {
                    logok(format!("Key {} works", idx + 1));
                    working.push(key.clone());
                }
                Ok(_) => logw(format!("Key {} returned an empty probe reply", idx + 1)),
                Err(GenerationError::RateLimited(msg)) => {
                    logw(format!("Key {} failed: quota exhausted ({})", idx + 1, msg))
                }
                Err(err) => logw(format!("Key {} failed: {}", idx + 1, err)),
            }
        }

        if working.is_empty() {
            return Err(CalibrationError::NoWorkingCredentials);
        }
        logok(format!("{} key(s) ready", working.len()));
        Self::new(working, models)
    }

    pub fn current_credential(&self) -> &str {
        &self.credentials[self.credential_cursor]
    }

    pub fn current_model(&self) -> &str {
        &self.models[self.model_cursor]
    }

    pub fn credential_index(&self) -> usize {
        self.credential_cursor
    }

    pub fn model_index(&self) -> usize {
        self.model_cursor
    }

    pub fn working_count(&self) -> usize {
        self.credentials.len()
    }

    pub fn models(&self) -> &[String] {
        &self.models
    }

    pub fn rotate_credential(&mut self) {
        if self.credentials.len() <= 1 {
            return;
        }
        self.credential_cursor = (self.credential_cursor + 1) % self.credentials.len();
        logi(format!("Switched to key {}", self.credential_cursor + 1));
    }

    pub fn advance_model(&mut self) -> &str {
        self.model_cursor = (self.model_cursor + 1) % self.models.len();
        self.current_model()
    }

    pub fn reset_model(&mut self) {
        self.model_cursor = 0;
    }
}
