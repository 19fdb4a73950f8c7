use async_trait::async_trait;
use chapterizer::chapters::DescriptionSource;
use chapterizer::PipelineError;
use std::sync::{Arc, Mutex};

#[derive(Clone)]
pub struct MockDescriptionSource {
    pub description: String,
    pub calls: Arc<Mutex<Vec<String>>>,
    pub fail_with: Option<String>,
}

impl MockDescriptionSource {
    pub fn new(description: &str) -> Self {
        Self {
            description: description.to_string(),
            calls: Arc::new(Mutex::new(Vec::new())),
            fail_with: None,
        }
    }

    pub fn failing(msg: &str) -> Self {
        Self {
            description: String::new(),
            calls: Arc::new(Mutex::new(Vec::new())),
            fail_with: Some(msg.to_string()),
        }
    }
}

#[async_trait]
impl DescriptionSource for MockDescriptionSource {
    async fn get_description(&self, subject_id: &str) -> chapterizer::Result<String> {
        self.calls.lock().unwrap().push(subject_id.to_string());
        if let Some(ref msg) = self.fail_with {
            return Err(PipelineError::Media(msg.clone()));
        }
        Ok(self.description.clone())
    }
}
