use async_trait::async_trait;
use chapterizer::{Completion, CompletionRequest, PipelineError, TextGenerator};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Echoes refinement input back as one paragraph and answers TOC requests
/// with a canned JSON body
#[derive(Clone)]
pub struct MockGenerator {
    pub toc_reply: String,
    pub calls: Arc<Mutex<Vec<CompletionRequest>>>,
    pub fail_with: Option<String>,
    pub delay: Option<Duration>,
}

impl MockGenerator {
    pub const INPUT_TOKENS: u64 = 100;
    pub const OUTPUT_TOKENS: u64 = 200;

    pub fn new(toc_reply: &str) -> Self {
        Self {
            toc_reply: toc_reply.to_string(),
            calls: Arc::new(Mutex::new(Vec::new())),
            fail_with: None,
            delay: None,
        }
    }

    pub fn failing(msg: &str) -> Self {
        Self {
            toc_reply: String::new(),
            calls: Arc::new(Mutex::new(Vec::new())),
            fail_with: Some(msg.to_string()),
            delay: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn refine_calls(&self) -> usize {
        self.calls.lock().unwrap().iter().filter(|r| !r.json_response).count()
    }

    pub fn toc_calls(&self) -> usize {
        self.calls.lock().unwrap().iter().filter(|r| r.json_response).count()
    }
}

#[async_trait]
impl TextGenerator for MockGenerator {
    async fn complete(&self, request: CompletionRequest) -> chapterizer::Result<Completion> {
        self.calls.lock().unwrap().push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(ref msg) = self.fail_with {
            return Err(PipelineError::TransientProvider(msg.clone()));
        }

        let text = if request.json_response {
            self.toc_reply.clone()
        } else {
            request.user_text.trim().to_string()
        };
        Ok(Completion {
            text,
            input_tokens: Self::INPUT_TOKENS,
            output_tokens: Self::OUTPUT_TOKENS,
        })
    }

    fn model(&self) -> &str {
        "mock-model"
    }
}
