/// Media download shared by frame capture and transcription
use futures::{Stream, StreamExt};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::remove_if_exists;
use crate::config::{DownloadMethod, SourceConfig};
use crate::error::{PipelineError, Result};

#[derive(Debug, Clone)]
pub struct MediaDownloader {
    sources: SourceConfig,
    timeout: Duration,
    client: reqwest::Client,
}

impl MediaDownloader {
    pub fn new(sources: SourceConfig, timeout: Duration) -> Self {
        Self {
            sources,
            timeout,
            client: reqwest::Client::new(),
        }
    }

    /// Location of the subject's media
    pub fn media_url(&self, subject_id: &str) -> String {
        self.sources
            .media_url_template
            .replace("{subject_id}", &urlencoding::encode(subject_id))
    }

    /// Download the subject's media into `dest_dir`, reusing an earlier download.
    ///
    /// Bounded by the configured timeout and aborted when `cancel` fires; a
    /// partial file is removed on any failure.
    pub async fn download(
        &self,
        subject_id: &str,
        dest_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<PathBuf> {
        tokio::fs::create_dir_all(dest_dir).await?;
        let output_path = dest_dir.join(format!("{}.mp4", sanitize(subject_id)));

        if output_path.exists() {
            info!("📼 Media for {} already downloaded", subject_id);
            return Ok(output_path);
        }

        let url = self.media_url(subject_id);
        debug!("Downloading {} via {:?}", url, self.sources.download_method);

        let fetch = async {
            match self.sources.download_method {
                DownloadMethod::YtDlp => self.fetch_with_ytdlp(&url, &output_path).await,
                DownloadMethod::Http => self.fetch_with_http(&url, &output_path).await,
            }
        };

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(PipelineError::Cancelled),
            timed = tokio::time::timeout(self.timeout, fetch) => match timed {
                Ok(result) => result,
                Err(_) => Err(PipelineError::Media(format!(
                    "download of {} timed out after {}s",
                    subject_id,
                    self.timeout.as_secs()
                ))),
            },
        };

        match outcome {
            Ok(()) if output_path.exists() => {
                info!("✅ Downloaded media for {}", subject_id);
                Ok(output_path)
            }
            Ok(()) => Err(PipelineError::Media(format!(
                "media file for {} not found after download",
                subject_id
            ))),
            Err(e) => {
                for leftover in [output_path.clone(), partial_path(&output_path)] {
                    if let Err(remove_err) = remove_if_exists(&leftover).await {
                        warn!("Failed to remove partial download {}: {}", leftover.display(), remove_err);
                    }
                }
                Err(e)
            }
        }
    }

    async fn fetch_with_ytdlp(&self, url: &str, output_path: &Path) -> Result<()> {
        let output = Command::new(&self.sources.ytdlp_path)
            .args(["--quiet", "--no-warnings", "-f", "best[ext=mp4]/best", "--retries", "3", "-o"])
            .arg(output_path)
            .arg(url)
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            return Err(PipelineError::Media(format!(
                "yt-dlp failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }

    async fn fetch_with_http(&self, url: &str, output_path: &Path) -> Result<()> {
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(PipelineError::Media(format!("GET {} returned {}", url, response.status())));
        }

        write_through_partial(response.bytes_stream(), output_path).await
    }
}

/// Sibling file a transfer is written to before it is renamed into place
fn partial_path(output_path: &Path) -> PathBuf {
    let mut name = output_path.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

/// Stream a body to `output_path`; the final path only appears once the
/// whole body is on disk
async fn write_through_partial<S, B, E>(mut stream: S, output_path: &Path) -> Result<()>
where
    S: Stream<Item = std::result::Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    PipelineError: From<E>,
{
    let partial = partial_path(output_path);
    let written = async {
        let mut file = tokio::fs::File::create(&partial).await?;
        while let Some(chunk) = stream.next().await {
            file.write_all(chunk?.as_ref()).await?;
        }
        file.flush().await?;
        Ok::<(), PipelineError>(())
    }
    .await;

    match written {
        Ok(()) => {
            tokio::fs::rename(&partial, output_path).await?;
            Ok(())
        }
        Err(e) => {
            remove_if_exists(&partial).await?;
            Err(e)
        }
    }
}

/// File-system safe form of a subject id
pub fn sanitize(subject_id: &str) -> String {
    let clean: String = subject_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if clean == subject_id && !clean.is_empty() {
        clean
    } else {
        format!("{}_{:x}", clean, md5::compute(subject_id.as_bytes()))
    }
}
