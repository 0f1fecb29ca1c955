use thiserror::Error;

/// Classified failure of a single generation request.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GenerationError {
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),
    #[error("generation failed: {0}")]
    Other(String),
}

impl GenerationError {
    /// Sorts a raw HTTP status and error body into one of the three retry classes.
    pub fn classify(status: Option<u16>, message: &str) -> Self {
        let lower = message.to_lowercase();
        if status == Some(429) || lower.contains("quota") || lower.contains("resource_exhausted") {
            return GenerationError::RateLimited(message.to_string());
        }
        if status == Some(404) || lower.contains("not found") || lower.contains("not_found") {
            return GenerationError::ModelUnavailable(message.to_string());
        }
        GenerationError::Other(message.to_string())
    }
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("media processing did not finish within {0}s")]
    Timeout(u64),
    #[error("media rejected: {0}")]
    Rejected(String),
    #[error("upload gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: String },
    #[error("failed to read media: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error("no working API credentials")]
    NoWorkingCredentials,
    #[error("model hierarchy is empty")]
    NoModels,
    #[error("no usable script after {attempts} attempts")]
    NoUsableScript { attempts: u32 },
    #[error(transparent)]
    Upload(#[from] UploadError),
}
