/// Chapter markers embedded in a subject's description text
use async_trait::async_trait;
use regex::Regex;
use std::sync::OnceLock;
use tokio::process::Command;
use tracing::debug;

use super::ChapterPlanEntry;
use crate::config::SourceConfig;
use crate::error::{PipelineError, Result};

/// Fetches the free-form description of a subject
#[async_trait]
pub trait DescriptionSource: Send + Sync {
    async fn get_description(&self, subject_id: &str) -> Result<String>;
}

fn timestamp_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"\b(?:(\d{1,2}):)?(\d{1,2}):(\d{2})\b").ok())
        .as_ref()
}

/// Parse `MM:SS Title` / `HH:MM:SS Title` markers into timestamp plan entries.
///
/// A title runs to the next timestamp token or the end of input, and only its
/// first line is kept. Markers with no title are skipped.
pub fn parse_description_chapters(text: &str) -> Vec<ChapterPlanEntry> {
    let Some(pattern) = timestamp_pattern() else {
        return Vec::new();
    };
    let tokens: Vec<regex::Captures> = pattern.captures_iter(text).collect();
    let mut entries = Vec::new();

    for (i, caps) in tokens.iter().enumerate() {
        let Some(whole) = caps.get(0) else { continue };
        let title_end = tokens
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map(|m| m.start())
            .unwrap_or(text.len());

        let title = text[whole.end()..title_end]
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .unwrap_or_default()
            .trim_matches(['-', '–', '|', ':'])
            .trim();

        if title.is_empty() {
            continue;
        }

        let number = |idx: usize| -> f64 {
            caps.get(idx)
                .and_then(|m| m.as_str().parse::<u32>().ok())
                .unwrap_or(0) as f64
        };
        let seconds = number(1) * 3600.0 + number(2) * 60.0 + number(3);
        entries.push(ChapterPlanEntry::at_timestamp(seconds, title));
    }

    debug!("Parsed {} chapter markers from description", entries.len());
    entries
}

/// Reads the description through `yt-dlp --print description`
pub struct YtDlpDescriptionSource {
    sources: SourceConfig,
}

impl YtDlpDescriptionSource {
    pub fn new(sources: SourceConfig) -> Self {
        Self { sources }
    }
}

#[async_trait]
impl DescriptionSource for YtDlpDescriptionSource {
    async fn get_description(&self, subject_id: &str) -> Result<String> {
        let url = self
            .sources
            .media_url_template
            .replace("{subject_id}", &urlencoding::encode(subject_id));

        let output = Command::new(&self.sources.ytdlp_path)
            .args(["--skip-download", "--no-warnings", "--print", "description"])
            .arg(&url)
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            return Err(PipelineError::Media(format!(
                "yt-dlp could not read description: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chapters::PlanAnchor;

    fn seconds(entries: &[ChapterPlanEntry]) -> Vec<f64> {
        entries
            .iter()
            .map(|e| match e.anchor {
                PlanAnchor::Timestamp(t) => t,
                PlanAnchor::Paragraph(_) => panic!("expected timestamp anchor"),
            })
            .collect()
    }

    #[test]
    fn test_line_per_marker() {
        let text = "Great video!\n\n00:00 Intro\n02:30 Setting up\n1:05:09 Wrap up\n\nSubscribe";
        let entries = parse_description_chapters(text);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].title, "Intro");
        assert_eq!(entries[1].title, "Setting up");
        assert_eq!(seconds(&entries), vec![0.0, 150.0, 3909.0]);
    }

    #[test]
    fn test_markers_on_one_line() {
        let entries = parse_description_chapters("0:00 Intro 1:30 Setup - 12:00 Finish");
        assert_eq!(
            entries.iter().map(|e| e.title.as_str()).collect::<Vec<_>>(),
            vec!["Intro", "Setup", "Finish"]
        );
        assert_eq!(seconds(&entries), vec![0.0, 90.0, 720.0]);
    }

    #[test]
    fn test_title_keeps_first_line_only() {
        let entries = parse_description_chapters("00:00 Intro\nFollow me on socials\n");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].title, "Intro");
    }

    #[test]
    fn test_no_markers() {
        assert!(parse_description_chapters("Just a plain description.").is_empty());
        assert!(parse_description_chapters("").is_empty());
        // a bare timestamp with nothing after it
        assert!(parse_description_chapters("see 03:00").is_empty());
    }
}
