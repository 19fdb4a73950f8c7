/// Chapterizer
///
/// Turns a subject's time-coded transcript into refined paragraphs, a chapter
/// structure and optional keyframe screenshots, run as tracked background jobs.

pub mod cache;
pub mod chapters;
pub mod config;
pub mod error;
pub mod jobs;
pub mod llm;
pub mod media;
pub mod screenshots;
pub mod transcript;

// Re-export main types for easy access
pub use crate::cache::{ArtifactKey, ArtifactKind, CacheStore};
pub use crate::chapters::{Chapter, ChapterPlanEntry, ChapterPlanner, ContentResult, Paragraph, ProcessingStats};
pub use crate::config::{Config, ConfigBuilder};
pub use crate::error::{PipelineError, Result};
pub use crate::jobs::{ChapterSource, Job, JobOrchestrator, JobStatus, JobStore, PipelineComponents, ProcessingMode};
pub use crate::llm::{CompletionRequest, Completion, TextGenerator, TextRefiner};
pub use crate::screenshots::{FrameCapture, Screenshot};
pub use crate::transcript::{TranscriptSegment, TranscriptSource, TranscriptionProvider};
