/// Processing jobs: records, persistence and orchestration
pub mod orchestrator;
pub mod store;

pub use orchestrator::{JobOrchestrator, PipelineComponents};
pub use store::JobStore;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::chapters::ContentResult;
use crate::media::sanitize;

pub const CANCELLED_MESSAGE: &str = "Job cancelled by user";

const JOB_ID_PREFIX: &str = "job";
const JOB_ID_TIME_FORMAT: &str = "%Y%m%d_%H%M%S_%6f";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingMode {
    /// One refinement call over the whole transcript, one chapter
    Simple,
    /// Chunked refinement plus chapter planning
    Detailed,
    /// Detailed plus keyframe screenshots
    DetailedWithScreenshots,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChapterSource {
    #[default]
    Auto,
    Description,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl ProcessingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingMode::Simple => "simple",
            ProcessingMode::Detailed => "detailed",
            ProcessingMode::DetailedWithScreenshots => "detailed_with_screenshots",
        }
    }
}

impl ChapterSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChapterSource::Auto => "auto",
            ChapterSource::Description => "description",
        }
    }
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled)
    }
}

impl fmt::Display for ProcessingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for ChapterSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "simple" => Ok(ProcessingMode::Simple),
            "detailed" => Ok(ProcessingMode::Detailed),
            "detailed_with_screenshots" => Ok(ProcessingMode::DetailedWithScreenshots),
            other => Err(format!("unknown processing mode: {}", other)),
        }
    }
}

impl FromStr for ChapterSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(ChapterSource::Auto),
            "description" => Ok(ChapterSource::Description),
            other => Err(format!("unknown chapter source: {}", other)),
        }
    }
}

/// Snapshot of one processing request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub job_id: String,
    pub subject_id: String,
    pub mode: ProcessingMode,
    pub chapter_source: ChapterSource,
    pub status: JobStatus,
    pub progress: f64,
    #[serde(default)]
    pub result: Option<ContentResult>,
    #[serde(default)]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new(subject_id: &str, mode: ProcessingMode, chapter_source: ChapterSource) -> Self {
        let now = Utc::now();
        Self {
            job_id: make_job_id(subject_id, now),
            subject_id: subject_id.to_string(),
            mode,
            chapter_source,
            status: JobStatus::Pending,
            progress: 0.0,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Raise progress; lower values are ignored
    pub fn advance(&mut self, progress: f64) {
        self.progress = self.progress.max(progress.clamp(0.0, 1.0));
        self.touch();
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// `job_{YYYYMMDD}_{HHMMSS}_{micros}_{subject}`
pub fn make_job_id(subject_id: &str, at: DateTime<Utc>) -> String {
    format!(
        "{}_{}_{}",
        JOB_ID_PREFIX,
        at.format(JOB_ID_TIME_FORMAT),
        sanitize(subject_id)
    )
}

/// Creation time embedded in a job id, if it has one
pub fn parse_job_time(job_id: &str) -> Option<NaiveDateTime> {
    let rest = job_id.strip_prefix(JOB_ID_PREFIX)?.strip_prefix('_')?;
    let mut parts = rest.splitn(4, '_');
    let stamp = format!("{}_{}_{}", parts.next()?, parts.next()?, parts.next()?);
    parts.next()?;
    NaiveDateTime::parse_from_str(&stamp, JOB_ID_TIME_FORMAT).ok()
}
