/// Chapter planning and structuring
///
/// Refined paragraphs are turned into a chapter plan (break points with
/// titles), either proposed by the text generator or read from chapter
/// markers in the subject's own description, and the plan is then mapped
/// onto paragraph and time ranges.

pub mod description;
pub mod planner;
pub mod structurer;

pub use description::{parse_description_chapters, DescriptionSource, YtDlpDescriptionSource};
pub use planner::{ChapterPlan, ChapterPlanner, PlanError};
pub use structurer::structure_chapters;

use serde::{Deserialize, Serialize};

use crate::llm::pricing::round6;

pub const FALLBACK_TITLE: &str = "Complete Content";

/// One unit of refined, timestamped text
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Paragraph {
    pub index: usize,
    pub text: String,
    pub start_time: f64,
    /// Nearest captured screenshot, when screenshots were taken
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,
}

impl Paragraph {
    pub fn new(index: usize, text: impl Into<String>, start_time: f64) -> Self {
        Self {
            index,
            text: text.into(),
            start_time,
            screenshot: None,
        }
    }
}

/// Where a planned chapter begins
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanAnchor {
    /// Index into the refined paragraphs (generator plans)
    Paragraph(usize),
    /// Seconds from the start (description plans)
    Timestamp(f64),
}

/// A planned chapter before structuring
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChapterPlanEntry {
    pub anchor: PlanAnchor,
    pub title: String,
}

impl ChapterPlanEntry {
    pub fn at_paragraph(index: usize, title: impl Into<String>) -> Self {
        Self {
            anchor: PlanAnchor::Paragraph(index),
            title: title.into(),
        }
    }

    pub fn at_timestamp(seconds: f64, title: impl Into<String>) -> Self {
        Self {
            anchor: PlanAnchor::Timestamp(seconds),
            title: title.into(),
        }
    }
}

/// Final chapter record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chapter {
    pub num: usize,
    pub title: String,
    pub start_paragraph: usize,
    pub end_paragraph: usize,
    pub start_time: f64,
    pub end_time: f64,
    pub paragraphs: Vec<String>,
    pub paragraph_timestamps: Vec<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshots: Option<Vec<String>>,
}

/// Token usage and cost accumulated over a job
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct ProcessingStats {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub price: f64,
}

impl ProcessingStats {
    pub fn new(input_tokens: u64, output_tokens: u64, price: f64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            price: round6(price),
        }
    }

    pub fn add(&mut self, other: ProcessingStats) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.price = round6(self.price + other.price);
    }
}

/// Final output of a job
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContentResult {
    pub subject_id: String,
    pub chapters: Vec<Chapter>,
    pub stats: ProcessingStats,
}

impl ContentResult {
    /// Checks a deserialized result is usable
    pub fn is_well_formed(&self) -> bool {
        !self.subject_id.is_empty()
            && !self.chapters.is_empty()
            && self
                .chapters
                .iter()
                .all(|c| c.paragraphs.len() == c.paragraph_timestamps.len())
    }

    /// Every screenshot path referenced by any chapter
    pub fn screenshot_paths(&self) -> impl Iterator<Item = &str> {
        self.chapters
            .iter()
            .filter_map(|c| c.screenshots.as_ref())
            .flatten()
            .map(String::as_str)
    }
}
