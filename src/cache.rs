/// File-keyed cache of pipeline artifacts and job snapshots
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

use crate::chapters::ContentResult;
use crate::error::{PipelineError, Result};
use crate::jobs::{ChapterSource, ProcessingMode};
use crate::media::sanitize;

const JOBS_DIR: &str = "jobs";

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// What an artifact is; determines which parts of the job key it depends on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    /// Raw transcript, shared by every mode
    Transcript,
    /// Refined (and possibly annotated) paragraphs
    Paragraphs(ProcessingMode),
    /// Final result
    Final(ProcessingMode, ChapterSource),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactKey {
    pub subject_id: String,
    pub kind: ArtifactKind,
}

impl ArtifactKey {
    pub fn new(subject_id: &str, kind: ArtifactKind) -> Self {
        Self {
            subject_id: subject_id.to_string(),
            kind,
        }
    }

    pub fn file_name(&self) -> String {
        let subject = sanitize(&self.subject_id);
        match self.kind {
            ArtifactKind::Transcript => format!("{}_transcript.json", subject),
            ArtifactKind::Paragraphs(mode) => format!("{}_{}_paragraphs.json", subject, mode.as_str()),
            ArtifactKind::Final(mode, source) => {
                format!("{}_{}_{}_final.json", subject, mode.as_str(), source.as_str())
            }
        }
    }
}

/// Whole-file JSON store rooted at one directory.
///
/// Writes land in a temp file that is renamed over the target, so readers see
/// either the old or the new payload. Concurrent writers to one key: last
/// rename wins.
#[derive(Debug, Clone)]
pub struct CacheStore {
    root: PathBuf,
}

impl CacheStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Create the cache and job snapshot directories
    pub async fn initialize(&self) -> Result<()> {
        tokio::fs::create_dir_all(self.root.join(JOBS_DIR)).await?;
        info!("📁 Cache directory initialized: {}", self.root.display());
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn artifact_path(&self, key: &ArtifactKey) -> PathBuf {
        self.root.join(key.file_name())
    }

    pub fn job_path(&self, job_id: &str) -> PathBuf {
        self.root.join(JOBS_DIR).join(format!("{}.json", sanitize(job_id)))
    }

    /// Artifact payload, or `None` when absent or unreadable
    pub async fn get<T: DeserializeOwned>(&self, key: &ArtifactKey) -> Option<T> {
        read_json(&self.artifact_path(key)).await
    }

    pub async fn put<T: Serialize>(&self, key: &ArtifactKey, payload: &T) -> Result<()> {
        let path = self.artifact_path(key);
        write_json(&path, payload).await?;
        debug!("💾 Cached {}", path.display());
        Ok(())
    }

    /// Final result for a job key; a malformed entry counts as a miss
    pub async fn get_final(
        &self,
        subject_id: &str,
        mode: ProcessingMode,
        source: ChapterSource,
    ) -> Option<ContentResult> {
        let key = ArtifactKey::new(subject_id, ArtifactKind::Final(mode, source));
        let result: ContentResult = self.get(&key).await?;
        if result.is_well_formed() && result.subject_id == subject_id {
            Some(result)
        } else {
            warn!("Ignoring malformed cached result {}", key.file_name());
            None
        }
    }

    pub async fn put_final(&self, mode: ProcessingMode, source: ChapterSource, result: &ContentResult) -> Result<()> {
        let key = ArtifactKey::new(&result.subject_id, ArtifactKind::Final(mode, source));
        self.put(&key, result).await
    }

    pub async fn get_job<T: DeserializeOwned>(&self, job_id: &str) -> Option<T> {
        read_json(&self.job_path(job_id)).await
    }

    pub async fn put_job<T: Serialize>(&self, job_id: &str, snapshot: &T) -> Result<()> {
        write_json(&self.job_path(job_id), snapshot).await
    }

    /// Remove a job snapshot; `false` when there was none
    pub async fn remove_job(&self, job_id: &str) -> Result<bool> {
        remove_if_exists(&self.job_path(job_id)).await
    }

    /// Ids (file stems) of every persisted job snapshot
    pub async fn list_job_ids(&self) -> Result<Vec<String>> {
        let dir = self.root.join(JOBS_DIR);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut ids = Vec::new();
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().map_or(false, |ext| ext == "json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    ids.push(stem.to_string());
                }
            }
        }
        Ok(ids)
    }

    /// Delete cached files not modified within `retention`
    pub async fn sweep_expired(&self, retention: Duration) -> Result<usize> {
        sweep_directory(self.root.clone(), retention).await
    }
}

/// Delete files under `dir` not modified within `retention`; a missing
/// directory counts as empty
pub async fn sweep_directory(dir: PathBuf, retention: Duration) -> Result<usize> {
    let removed = tokio::task::spawn_blocking(move || sweep_dir(&dir, retention))
        .await
        .map_err(|e| PipelineError::Io(std::io::Error::other(e)))?;

    if removed > 0 {
        info!("🧹 Cleaned up {} expired cache files", removed);
    }
    Ok(removed)
}

fn sweep_dir(root: &Path, retention: Duration) -> usize {
    let Some(cutoff) = SystemTime::now().checked_sub(retention) else {
        return 0;
    };

    let mut removed = 0;
    for entry in walkdir::WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let expired = entry
            .metadata()
            .ok()
            .and_then(|m| m.modified().ok())
            .map_or(false, |modified| modified < cutoff);
        if !expired {
            continue;
        }
        match std::fs::remove_file(entry.path()) {
            Ok(()) => {
                removed += 1;
                debug!("🗑️ Removed expired cache: {}", entry.path().display());
            }
            Err(e) => warn!("Failed to remove {}: {}", entry.path().display(), e),
        }
    }
    removed
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Option<T> {
    if !path.exists() {
        return None;
    }

    match tokio::fs::read_to_string(path).await {
        Ok(content) => match serde_json::from_str(&content) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Failed to parse cache file {}: {}", path.display(), e);
                None
            }
        },
        Err(e) => {
            warn!("Failed to read cache file {}: {}", path.display(), e);
            None
        }
    }
}

async fn write_json<T: Serialize>(path: &Path, payload: &T) -> Result<()> {
    let json_content = serde_json::to_string_pretty(payload)?;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let temp_path = path.with_extension(format!(
        "tmp-{}-{}",
        std::process::id(),
        TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));
    tokio::fs::write(&temp_path, json_content).await?;
    if let Err(e) = tokio::fs::rename(&temp_path, path).await {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(e.into());
    }
    Ok(())
}

/// Remove a file, treating a missing one as success
pub async fn remove_if_exists(path: &Path) -> Result<bool> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}
