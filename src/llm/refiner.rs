use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::pricing::PriceTable;
use super::{Completion, CompletionRequest, TextGenerator};
use crate::chapters::{Paragraph, ProcessingStats};
use crate::config::ProcessingConfig;
use crate::error::{PipelineError, Result};
use crate::transcript::{Chunk, TranscriptSegment};

const REFINE_PROMPT: &str = "Process this transcript into clean, well-structured paragraphs. \
Remove verbal tics, add proper punctuation, and organize the content logically. \
Maintain the original meaning and key information. \
Separate paragraphs with a blank line.";

/// Share of a detailed job's progress taken by refinement
pub const REFINE_PROGRESS_SHARE: f64 = 0.5;

/// Receives refinement progress in `[0, REFINE_PROGRESS_SHARE]`
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn report(&self, progress: f64);
}

/// Sink that drops progress updates
pub struct NoProgress;

#[async_trait]
impl ProgressSink for NoProgress {
    async fn report(&self, _progress: f64) {}
}

/// Paragraphs produced by refinement plus what they cost
#[derive(Debug, Clone, Default)]
pub struct RefineOutput {
    pub paragraphs: Vec<Paragraph>,
    pub stats: ProcessingStats,
}

/// Turns transcript chunks into clean paragraphs with the text generator
pub struct TextRefiner {
    generator: Arc<dyn TextGenerator>,
    prices: PriceTable,
    max_retries: u32,
    retry_delay: Duration,
    max_tokens: u32,
}

impl TextRefiner {
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        prices: PriceTable,
        processing: &ProcessingConfig,
        max_tokens: u32,
    ) -> Self {
        Self {
            generator,
            prices,
            max_retries: processing.max_retries.max(1),
            retry_delay: processing.retry_delay(),
            max_tokens,
        }
    }

    /// Refine each chunk independently.
    ///
    /// A chunk that fails every attempt is dropped. Fails when fewer than half
    /// of the chunks produced paragraphs, or when nothing came back at all.
    pub async fn refine(&self, chunks: &[Chunk], progress: &dyn ProgressSink) -> Result<RefineOutput> {
        let total = chunks.len();
        let mut output = RefineOutput::default();
        let mut successful = 0usize;

        for (i, chunk) in chunks.iter().enumerate() {
            match self.call_with_retry(&chunk.text, i).await {
                Ok(completion) => {
                    output.stats.add(self.stats_for(&completion));
                    let pieces = split_paragraphs(&completion.text);
                    if pieces.is_empty() {
                        warn!("Chunk {} came back empty", i);
                    } else {
                        successful += 1;
                        for text in pieces {
                            let index = output.paragraphs.len();
                            output.paragraphs.push(Paragraph::new(index, text, chunk.start_time));
                        }
                    }
                }
                Err(e) => warn!("Dropping chunk {} after {} attempts: {}", i, self.max_retries, e),
            }

            progress
                .report((i + 1) as f64 / total as f64 * REFINE_PROGRESS_SHARE)
                .await;
        }

        if (successful as f64) < total as f64 * 0.5 {
            return Err(PipelineError::ProcessingFailed(format!(
                "Failed to process too many chunks ({}/{})",
                successful, total
            )));
        }

        if output.paragraphs.is_empty() {
            return Err(PipelineError::ProcessingFailed("No paragraphs were generated".into()));
        }

        info!(
            "✅ Refined {}/{} chunks into {} paragraphs",
            successful,
            total,
            output.paragraphs.len()
        );
        Ok(output)
    }

    /// Single call over the whole transcript, yielding one paragraph
    pub async fn refine_whole(&self, segments: &[TranscriptSegment]) -> Result<RefineOutput> {
        let first = segments.first().ok_or_else(|| {
            PipelineError::ProcessingFailed("No paragraphs were generated: transcript is empty".into())
        })?;

        let full_text = segments
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");

        let completion = self.call_with_retry(&full_text, 0).await.map_err(|e| {
            PipelineError::ProcessingFailed(format!("Failed to process too many chunks (0/1): {}", e))
        })?;

        let text = completion.text.trim();
        if text.is_empty() {
            return Err(PipelineError::ProcessingFailed("No paragraphs were generated".into()));
        }

        Ok(RefineOutput {
            paragraphs: vec![Paragraph::new(0, text, first.start_time)],
            stats: self.stats_for(&completion),
        })
    }

    async fn call_with_retry(&self, text: &str, chunk_index: usize) -> Result<Completion> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let request = CompletionRequest {
                system_prompt: REFINE_PROMPT.to_string(),
                user_text: text.to_string(),
                max_tokens: self.output_budget(text),
                json_response: false,
            };

            match self.generator.complete(request).await {
                Ok(completion) => {
                    debug!("Chunk {} refined on attempt {}", chunk_index, attempt);
                    return Ok(completion);
                }
                Err(e) => {
                    warn!("Error processing chunk {} (attempt {}): {}", chunk_index, attempt, e);
                    if attempt >= self.max_retries || !e.is_transient() {
                        return Err(e);
                    }
                    tokio::time::sleep(self.retry_delay).await;
                }
            }
        }
    }

    /// One and a half tokens per input character, within the configured ceiling
    fn output_budget(&self, text: &str) -> u32 {
        let wanted = (text.chars().count() as f64 * 1.5).ceil() as u32;
        wanted.clamp(1, self.max_tokens.max(1))
    }

    fn stats_for(&self, completion: &Completion) -> ProcessingStats {
        ProcessingStats::new(
            completion.input_tokens,
            completion.output_tokens,
            self.prices
                .price(self.generator.model(), completion.input_tokens, completion.output_tokens),
        )
    }
}

/// Blank-line separated pieces, trimmed, empties dropped
pub fn split_paragraphs(text: &str) -> Vec<String> {
    text.trim()
        .replace("\r\n", "\n")
        .split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}
