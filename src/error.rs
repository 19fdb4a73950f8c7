/// Error types for the content pipeline
use crate::jobs::JobStatus;

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    /// Generation or transcription call failed in a way worth retrying
    #[error("Provider error: {0}")]
    TransientProvider(String),

    /// Provider answered, but not in the expected shape
    #[error("Malformed provider response: {0}")]
    StructuralParse(String),

    /// Too few chunks refined, zero paragraphs, or unusable timestamps
    #[error("Processing failed: {0}")]
    ProcessingFailed(String),

    #[error("Transcript unavailable for {subject_id}: {reason}")]
    TranscriptUnavailable { subject_id: String, reason: String },

    #[error("{0}")]
    NotFound(String),

    #[error("{message}")]
    InvalidState { status: JobStatus, message: String },

    #[error("Job cancelled by user")]
    Cancelled,

    #[error("Media error: {0}")]
    Media(String),
}

impl PipelineError {
    /// Whether the retry loop should try the same call again
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PipelineError::TransientProvider(_) | PipelineError::Http(_) | PipelineError::Io(_)
        )
    }
}
