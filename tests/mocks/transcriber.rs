use async_trait::async_trait;
use chapterizer::{PipelineError, TranscriptSegment, TranscriptionProvider};
use std::sync::{Arc, Mutex};

#[derive(Clone)]
pub struct MockTranscriber {
    pub segments: Vec<TranscriptSegment>,
    pub calls: Arc<Mutex<Vec<String>>>,
    pub fail_with: Option<String>,
}

impl MockTranscriber {
    pub fn new(segments: Vec<TranscriptSegment>) -> Self {
        Self {
            segments,
            calls: Arc::new(Mutex::new(Vec::new())),
            fail_with: None,
        }
    }

    pub fn failing(msg: &str) -> Self {
        Self {
            segments: Vec::new(),
            calls: Arc::new(Mutex::new(Vec::new())),
            fail_with: Some(msg.to_string()),
        }
    }
}

#[async_trait]
impl TranscriptionProvider for MockTranscriber {
    async fn transcribe(&self, subject_id: &str) -> chapterizer::Result<Vec<TranscriptSegment>> {
        self.calls.lock().unwrap().push(subject_id.to_string());
        if let Some(ref msg) = self.fail_with {
            return Err(PipelineError::Media(msg.clone()));
        }
        Ok(self.segments.clone())
    }
}
