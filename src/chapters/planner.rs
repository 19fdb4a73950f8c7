use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::description::{parse_description_chapters, DescriptionSource};
use super::{ChapterPlanEntry, Paragraph, ProcessingStats, FALLBACK_TITLE};
use crate::error::PipelineError;
use crate::jobs::ChapterSource;
use crate::llm::pricing::PriceTable;
use crate::llm::{CompletionRequest, TextGenerator};

const TOC_MAX_TOKENS: u32 = 1000;

/// Ordered break points plus what it cost to obtain them
#[derive(Debug, Clone, PartialEq)]
pub struct ChapterPlan {
    pub entries: Vec<ChapterPlanEntry>,
    pub stats: ProcessingStats,
}

impl ChapterPlan {
    /// Single entry covering everything
    pub fn fallback(stats: ProcessingStats) -> Self {
        Self {
            entries: vec![ChapterPlanEntry::at_paragraph(0, FALLBACK_TITLE)],
            stats,
        }
    }
}

/// Why the generator path produced no usable plan
#[derive(thiserror::Error, Debug)]
pub enum PlanError {
    #[error("table of contents call failed: {0}")]
    Call(#[source] PipelineError),

    #[error("table of contents was not valid JSON: {reason}")]
    Parse { reason: String, stats: ProcessingStats },

    #[error("table of contents had no valid entries")]
    NoValidEntries { stats: ProcessingStats },
}

impl PlanError {
    /// Usage already spent before the failure
    pub fn spent(&self) -> ProcessingStats {
        match self {
            PlanError::Call(_) => ProcessingStats::default(),
            PlanError::Parse { stats, .. } | PlanError::NoValidEntries { stats } => *stats,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TocResponse {
    #[serde(default)]
    chapters: Vec<TocEntry>,
}

#[derive(Debug, Deserialize)]
struct TocEntry {
    #[serde(default)]
    start_paragraph_number: Value,
    #[serde(default)]
    title: Option<String>,
}

/// Produces a chapter plan for refined paragraphs
pub struct ChapterPlanner {
    generator: Arc<dyn TextGenerator>,
    descriptions: Arc<dyn DescriptionSource>,
    prices: PriceTable,
}

impl ChapterPlanner {
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        descriptions: Arc<dyn DescriptionSource>,
        prices: PriceTable,
    ) -> Self {
        Self {
            generator,
            descriptions,
            prices,
        }
    }

    /// Plan chapters; never fails, falling back to a single chapter
    pub async fn plan(&self, subject_id: &str, paragraphs: &[Paragraph], source: ChapterSource) -> ChapterPlan {
        if source == ChapterSource::Description {
            match self.descriptions.get_description(subject_id).await {
                Ok(text) => {
                    let entries = parse_description_chapters(&text);
                    if !entries.is_empty() {
                        info!("📖 Using {} chapters from description of {}", entries.len(), subject_id);
                        return ChapterPlan {
                            entries,
                            stats: ProcessingStats::default(),
                        };
                    }
                    warn!("No chapters found in description, falling back to auto-generation");
                }
                Err(e) => {
                    warn!("Could not read description of {}: {}; falling back to auto-generation", subject_id, e);
                }
            }
        }

        if paragraphs.len() <= 1 {
            debug!("Single paragraph, nothing to split into chapters");
            return ChapterPlan::fallback(ProcessingStats::default());
        }

        match self.generate_toc(paragraphs).await {
            Ok(plan) => plan,
            Err(e) => {
                warn!("Using single-chapter plan: {}", e);
                ChapterPlan::fallback(e.spent())
            }
        }
    }

    /// Ask the generator for 3-7 break points over the paragraphs
    pub async fn generate_toc(&self, paragraphs: &[Paragraph]) -> Result<ChapterPlan, PlanError> {
        let text = paragraphs
            .iter()
            .map(|p| p.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        let request = CompletionRequest {
            system_prompt: toc_prompt(paragraphs.len()),
            user_text: text,
            max_tokens: TOC_MAX_TOKENS,
            json_response: true,
        };

        let completion = self.generator.complete(request).await.map_err(PlanError::Call)?;
        let stats = ProcessingStats::new(
            completion.input_tokens,
            completion.output_tokens,
            self.prices
                .price(self.generator.model(), completion.input_tokens, completion.output_tokens),
        );

        let toc: TocResponse = serde_json::from_str(strip_code_fence(&completion.text))
            .map_err(|e| PlanError::Parse {
                reason: e.to_string(),
                stats,
            })?;

        let entries = validate_entries(toc.chapters, paragraphs.len());
        if entries.is_empty() {
            return Err(PlanError::NoValidEntries { stats });
        }

        info!("📑 Generated {} chapters", entries.len());
        Ok(ChapterPlan { entries, stats })
    }
}

/// Keep entries with a title and a strictly ascending in-range index
fn validate_entries(candidates: Vec<TocEntry>, total_paragraphs: usize) -> Vec<ChapterPlanEntry> {
    let mut accepted = Vec::new();
    let mut last_accepted: Option<usize> = None;

    for candidate in candidates {
        let title = candidate.title.as_deref().map(str::trim).unwrap_or_default();
        if title.is_empty() {
            continue;
        }

        let index = match paragraph_index(&candidate.start_paragraph_number) {
            Some(index) if index < total_paragraphs && last_accepted.map_or(true, |last| index > last) => index,
            _ => {
                warn!("Skipping invalid TOC entry: {} {:?}", candidate.start_paragraph_number, title);
                continue;
            }
        };

        accepted.push(ChapterPlanEntry::at_paragraph(index, title));
        last_accepted = Some(index);
    }
    accepted
}

/// Non-negative whole number, however the generator spelled it
fn paragraph_index(value: &Value) -> Option<usize> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0 && f.fract() == 0.0).map(|f| f as u64))
            .map(|n| n as usize),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

fn toc_prompt(total_paragraphs: usize) -> String {
    format!(
        "Create a detailed table of contents for this content.\n\n\
        Instructions:\n\
        1. Identify 3-7 major topics or natural break points\n\
        2. Each chapter should represent a coherent section of content\n\
        3. Make chapter titles clear and descriptive\n\
        4. Ensure chapters are evenly distributed\n\n\
        Format your response as a JSON object with this exact structure:\n\
        {{\"chapters\": [{{\"start_paragraph_number\": 0, \"title\": \"Introduction\"}}, \
        {{\"start_paragraph_number\": N, \"title\": \"Chapter Title\"}}]}}\n\n\
        Rules:\n\
        - start_paragraph_number must be between 0 and {}\n\
        - Chapters must be in ascending order\n\
        - The first chapter should always start at paragraph 0",
        total_paragraphs.saturating_sub(1)
    )
}
