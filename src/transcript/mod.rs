/// Transcript acquisition: primary source, speech-to-text fallback, truncation
pub mod chunker;
pub mod document;
pub mod whisper;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{PipelineError, Result};

pub use chunker::{chunk_segments, Chunk};
pub use document::{word_bounded_chunks, DocumentTranscriptSource};
pub use whisper::WhisperTranscriber;

/// A timestamped piece of raw transcript text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    #[serde(alias = "start")]
    pub start_time: f64,
    pub text: String,
}

impl TranscriptSegment {
    pub fn new(start_time: f64, text: impl Into<String>) -> Self {
        Self {
            start_time,
            text: text.into(),
        }
    }
}

/// Primary transcript lookup (captions, pre-existing transcript files, ...)
#[async_trait]
pub trait TranscriptSource: Send + Sync {
    async fn get_transcript(&self, subject_id: &str) -> Result<Vec<TranscriptSegment>>;
}

/// Speech-to-text used when the primary source has nothing
#[async_trait]
pub trait TranscriptionProvider: Send + Sync {
    async fn transcribe(&self, subject_id: &str) -> Result<Vec<TranscriptSegment>>;
}

/// Try the primary source, then transcription. Both failing is fatal.
pub async fn acquire_transcript(
    source: &dyn TranscriptSource,
    transcriber: &dyn TranscriptionProvider,
    subject_id: &str,
) -> Result<Vec<TranscriptSegment>> {
    let primary_error = match source.get_transcript(subject_id).await {
        Ok(segments) => {
            debug!("Transcript source returned {} segments for {}", segments.len(), subject_id);
            return Ok(segments);
        }
        Err(e) => e,
    };

    warn!("Transcript source failed for {}: {}; falling back to transcription", subject_id, primary_error);

    match transcriber.transcribe(subject_id).await {
        Ok(segments) => {
            info!("🎙️ Transcribed {} segments for {}", segments.len(), subject_id);
            Ok(segments)
        }
        Err(fallback_error) => Err(PipelineError::TranscriptUnavailable {
            subject_id: subject_id.to_string(),
            reason: format!("source: {}; transcription: {}", primary_error, fallback_error),
        }),
    }
}

/// Keep whole segments while their text fits in `max_chars`
pub fn truncate_segments(segments: Vec<TranscriptSegment>, max_chars: usize) -> Vec<TranscriptSegment> {
    let total = segments.len();
    let mut used = 0usize;
    let kept: Vec<TranscriptSegment> = segments
        .into_iter()
        .take_while(|segment| {
            used += segment.text.chars().count();
            used <= max_chars
        })
        .collect();

    if kept.len() < total {
        warn!(
            "✂️ Transcript truncated to {} of {} segments ({} char budget)",
            kept.len(),
            total,
            max_chars
        );
    }
    kept
}

/// Reject segments whose start time is negative or not a number
pub fn validate_timestamps(segments: &[TranscriptSegment]) -> Result<()> {
    match segments
        .iter()
        .position(|s| !s.start_time.is_finite() || s.start_time < 0.0)
    {
        Some(index) => Err(PipelineError::ProcessingFailed(format!(
            "transcript segment {} has no usable start time",
            index
        ))),
        None => Ok(()),
    }
}

/// Reads `{dir}/{subject_id}.json` holding an array of `{start_time|start, text}`
pub struct FileTranscriptSource {
    dir: PathBuf,
}

impl FileTranscriptSource {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }
}

#[async_trait]
impl TranscriptSource for FileTranscriptSource {
    async fn get_transcript(&self, subject_id: &str) -> Result<Vec<TranscriptSegment>> {
        let path = self.dir.join(format!("{}.json", subject_id));
        if !path.exists() {
            return Err(PipelineError::NotFound(format!(
                "no transcript file at {}",
                path.display()
            )));
        }

        let content = tokio::fs::read_to_string(&path).await?;
        let segments: Vec<TranscriptSegment> = serde_json::from_str(&content)?;
        debug!("Loaded {} segments from {}", segments.len(), path.display());
        Ok(segments)
    }
}

/// Asks each source in turn; the first transcript found wins
pub struct ChainedTranscriptSource {
    sources: Vec<Arc<dyn TranscriptSource>>,
}

impl ChainedTranscriptSource {
    pub fn new(sources: Vec<Arc<dyn TranscriptSource>>) -> Self {
        Self { sources }
    }
}

#[async_trait]
impl TranscriptSource for ChainedTranscriptSource {
    async fn get_transcript(&self, subject_id: &str) -> Result<Vec<TranscriptSegment>> {
        let mut reasons = Vec::new();
        for source in &self.sources {
            match source.get_transcript(subject_id).await {
                Ok(segments) => return Ok(segments),
                Err(e) => reasons.push(e.to_string()),
            }
        }
        Err(PipelineError::NotFound(format!(
            "no transcript for {}: {}",
            subject_id,
            reasons.join("; ")
        )))
    }
}
