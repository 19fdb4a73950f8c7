/// Plain documents (PDF or text) used as transcripts without timing
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::{TranscriptSegment, TranscriptSource};
use crate::error::{PipelineError, Result};
use crate::media::sanitize;

/// Looked up in order for `{dir}/{subject_id}.{ext}`
const EXTENSIONS: [&str; 2] = ["pdf", "txt"];

/// Reads `{dir}/{subject_id}.pdf` (or `.txt`) and cuts the text into
/// word-bounded segments.
///
/// Documents carry no timing, so each segment's start time is its ordinal
/// position.
pub struct DocumentTranscriptSource {
    dir: PathBuf,
    max_chars: usize,
    chunk_chars: usize,
}

impl DocumentTranscriptSource {
    pub fn new(dir: PathBuf, max_chars: usize, chunk_chars: usize) -> Self {
        Self {
            dir,
            max_chars,
            chunk_chars,
        }
    }

    fn find_document(&self, subject_id: &str) -> Option<PathBuf> {
        let stem = sanitize(subject_id);
        EXTENSIONS
            .iter()
            .map(|ext| self.dir.join(format!("{}.{}", stem, ext)))
            .find(|path| path.exists())
    }
}

#[async_trait]
impl TranscriptSource for DocumentTranscriptSource {
    async fn get_transcript(&self, subject_id: &str) -> Result<Vec<TranscriptSegment>> {
        let path = self.find_document(subject_id).ok_or_else(|| {
            PipelineError::NotFound(format!("no document for {} in {}", subject_id, self.dir.display()))
        })?;

        let text = read_document(&path).await?;
        let text = cap_chars(&text, self.max_chars);
        if text.trim().is_empty() {
            return Err(PipelineError::ProcessingFailed(format!(
                "no text extracted from {}",
                path.display()
            )));
        }

        let segments: Vec<TranscriptSegment> = word_bounded_chunks(text, self.chunk_chars)
            .into_iter()
            .enumerate()
            .map(|(position, chunk)| TranscriptSegment::new(position as f64, chunk))
            .collect();

        info!("📄 Loaded {} document segments from {}", segments.len(), path.display());
        Ok(segments)
    }
}

async fn read_document(path: &Path) -> Result<String> {
    let is_pdf = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));

    if !is_pdf {
        return Ok(tokio::fs::read_to_string(path).await?);
    }

    let owned = path.to_path_buf();
    let extracted = match tokio::task::spawn_blocking(move || pdf_extract::extract_text(&owned)).await {
        Ok(result) => result.map_err(|e| e.to_string()),
        // malformed input can panic inside the extractor
        Err(join_error) => Err(join_error.to_string()),
    };

    extracted.map_err(|e| {
        warn!("PDF extraction failed for {}: {}", path.display(), e);
        PipelineError::ProcessingFailed(format!("error processing PDF {}: {}", path.display(), e))
    })
}

/// Longest prefix of `text` holding at most `max_chars` characters
fn cap_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => {
            debug!("Document text capped at {} characters", max_chars);
            &text[..cut]
        }
        None => text,
    }
}

/// Greedy word packing: a chunk grows while its words plus one separator
/// each stay within `chunk_chars`. A single word longer than the budget
/// becomes a chunk of its own.
pub fn word_bounded_chunks(text: &str, chunk_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut current_len = 0usize;

    for word in text.split_whitespace() {
        let word_len = word.chars().count() + 1;
        if current_len + word_len > chunk_chars && !current.is_empty() {
            chunks.push(current.join(" "));
            current.clear();
            current_len = 0;
        }
        current.push(word);
        current_len += word_len;
    }

    if !current.is_empty() {
        chunks.push(current.join(" "));
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_word_bounded_chunks() {
        // "alpha " and "beta " fill 11 of 12; "gamma " starts a new chunk
        let chunks = word_bounded_chunks("alpha beta\n gamma", 12);
        assert_eq!(chunks, vec!["alpha beta", "gamma"]);

        assert_eq!(word_bounded_chunks("supercalifragilistic go", 5), vec!["supercalifragilistic", "go"]);
        assert!(word_bounded_chunks("   \n ", 10).is_empty());
    }

    #[test]
    fn test_cap_chars_respects_char_boundaries() {
        assert_eq!(cap_chars("héllo wörld", 5), "héllo");
        assert_eq!(cap_chars("short", 100), "short");
    }

    #[tokio::test]
    async fn test_text_document_becomes_ordinal_segments() {
        let temp_dir = TempDir::new().unwrap();
        tokio::fs::write(temp_dir.path().join("notes.txt"), "one two three four five six")
            .await
            .unwrap();

        let source = DocumentTranscriptSource::new(temp_dir.path().to_path_buf(), 1000, 10);
        let segments = source.get_transcript("notes").await.unwrap();

        assert_eq!(
            segments,
            vec![
                TranscriptSegment::new(0.0, "one two"),
                TranscriptSegment::new(1.0, "three"),
                TranscriptSegment::new(2.0, "four five"),
                TranscriptSegment::new(3.0, "six"),
            ]
        );
    }

    #[tokio::test]
    async fn test_max_chars_caps_document() {
        let temp_dir = TempDir::new().unwrap();
        tokio::fs::write(temp_dir.path().join("notes.txt"), "keep this part drop the rest")
            .await
            .unwrap();

        let source = DocumentTranscriptSource::new(temp_dir.path().to_path_buf(), 14, 100);
        let segments = source.get_transcript("notes").await.unwrap();
        assert_eq!(segments, vec![TranscriptSegment::new(0.0, "keep this part")]);
    }

    #[tokio::test]
    async fn test_missing_and_empty_documents() {
        let temp_dir = TempDir::new().unwrap();
        let source = DocumentTranscriptSource::new(temp_dir.path().to_path_buf(), 1000, 100);
        assert!(matches!(source.get_transcript("absent").await, Err(PipelineError::NotFound(_))));

        tokio::fs::write(temp_dir.path().join("blank.txt"), "  \n").await.unwrap();
        assert!(matches!(
            source.get_transcript("blank").await,
            Err(PipelineError::ProcessingFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_unreadable_pdf_is_a_processing_error() {
        let temp_dir = TempDir::new().unwrap();
        tokio::fs::write(temp_dir.path().join("scan.pdf"), b"not really a pdf").await.unwrap();
        tokio::fs::write(temp_dir.path().join("scan.txt"), "text fallback").await.unwrap();

        // the pdf is found first and its failure is reported
        let source = DocumentTranscriptSource::new(temp_dir.path().to_path_buf(), 1000, 100);
        assert!(matches!(
            source.get_transcript("scan").await,
            Err(PipelineError::ProcessingFailed(_))
        ));
    }
}
