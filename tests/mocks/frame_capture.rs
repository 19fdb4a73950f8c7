use async_trait::async_trait;
use chapterizer::screenshots::screenshot_name;
use chapterizer::{FrameCapture, Screenshot};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

/// Writes a placeholder file per requested timestamp
#[derive(Clone)]
pub struct MockFrameCapture {
    pub output_dir: PathBuf,
    pub calls: Arc<Mutex<Vec<Vec<f64>>>>,
    pub fail_with: Option<String>,
}

impl MockFrameCapture {
    pub fn new(output_dir: PathBuf) -> Self {
        Self {
            output_dir,
            calls: Arc::new(Mutex::new(Vec::new())),
            fail_with: None,
        }
    }

    pub fn failing(msg: &str) -> Self {
        Self {
            output_dir: PathBuf::new(),
            calls: Arc::new(Mutex::new(Vec::new())),
            fail_with: Some(msg.to_string()),
        }
    }
}

#[async_trait]
impl FrameCapture for MockFrameCapture {
    async fn capture(&self, subject_id: &str, timestamps: &[f64], _cancel: &CancellationToken) -> Vec<Screenshot> {
        self.calls.lock().unwrap().push(timestamps.to_vec());
        if self.fail_with.is_some() {
            return Vec::new();
        }

        tokio::fs::create_dir_all(&self.output_dir).await.unwrap();
        let mut shots = Vec::new();
        for &time in timestamps {
            let path = self.output_dir.join(screenshot_name(subject_id, time));
            tokio::fs::write(&path, b"jpeg").await.unwrap();
            shots.push(Screenshot {
                path: path.to_string_lossy().into_owned(),
                time,
            });
        }
        shots
    }
}
