use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{TranscriptSegment, TranscriptionProvider};
use crate::config::SourceConfig;
use crate::error::{PipelineError, Result};
use crate::media::MediaDownloader;

/// Speech-to-text through an OpenAI-compatible `/audio/transcriptions` endpoint
pub struct WhisperTranscriber {
    sources: SourceConfig,
    downloader: MediaDownloader,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct VerboseTranscription {
    #[serde(default)]
    text: String,
    #[serde(default)]
    segments: Vec<WhisperSegment>,
}

#[derive(Debug, Deserialize)]
struct WhisperSegment {
    start: f64,
    text: String,
}

impl WhisperTranscriber {
    pub fn new(sources: SourceConfig, download_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(sources.transcription_timeout_seconds))
            .build()?;
        let downloader = MediaDownloader::new(sources.clone(), download_timeout);

        Ok(Self {
            sources,
            downloader,
            client,
        })
    }

    /// Extract 16 kHz mono PCM audio for upload
    async fn extract_audio(&self, media_path: &Path, audio_path: &Path) -> Result<()> {
        let status = Command::new(&self.sources.ffmpeg_path)
            .arg("-i")
            .arg(media_path)
            .args(["-vn", "-acodec", "pcm_s16le", "-ar", "16000", "-ac", "1", "-f", "wav", "-y"])
            .arg(audio_path)
            .kill_on_drop(true)
            .status()
            .await?;

        if !status.success() {
            return Err(PipelineError::Media(format!(
                "audio extraction failed for {}",
                media_path.display()
            )));
        }
        Ok(())
    }

    async fn upload(&self, audio_path: &Path) -> Result<VerboseTranscription> {
        let audio_data = tokio::fs::read(audio_path).await?;

        let form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(audio_data)
                    .file_name("audio.wav")
                    .mime_str("audio/wav")?,
            )
            .text("model", self.sources.transcription_model.clone())
            .text("response_format", "verbose_json");

        let mut request = self.client.post(&self.sources.transcription_endpoint).multipart(form);
        if let Some(api_key) = &self.sources.transcription_api_key {
            request = request.header("Authorization", format!("Bearer {}", api_key));
        }

        let response = request
            .send()
            .await
            .map_err(|e| PipelineError::TransientProvider(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(PipelineError::TransientProvider(format!(
                "transcription API error {}: {}",
                status, text
            )));
        }

        response
            .json()
            .await
            .map_err(|e| PipelineError::StructuralParse(e.to_string()))
    }
}

#[async_trait]
impl TranscriptionProvider for WhisperTranscriber {
    async fn transcribe(&self, subject_id: &str) -> Result<Vec<TranscriptSegment>> {
        info!("🤖 Transcribing {} with {}", subject_id, self.sources.transcription_model);

        let work_dir = tempfile::TempDir::new()?;
        let media_path = self
            .downloader
            .download(subject_id, work_dir.path(), &CancellationToken::new())
            .await?;
        let audio_path = work_dir.path().join("audio.wav");
        self.extract_audio(&media_path, &audio_path).await?;

        let transcription = self.upload(&audio_path).await?;
        let segments = into_segments(transcription);
        info!("✅ Transcription completed: {} segments", segments.len());
        Ok(segments)
    }
}

fn into_segments(transcription: VerboseTranscription) -> Vec<TranscriptSegment> {
    if transcription.segments.is_empty() {
        debug!("Transcription carried no segments; using full text at 0s");
        if transcription.text.trim().is_empty() {
            return Vec::new();
        }
        return vec![TranscriptSegment::new(0.0, transcription.text.trim())];
    }

    transcription
        .segments
        .into_iter()
        .map(|s| TranscriptSegment::new(s.start, s.text.trim()))
        .collect()
}
