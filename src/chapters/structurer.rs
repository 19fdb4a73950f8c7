use tracing::debug;

use super::{Chapter, ChapterPlanEntry, Paragraph, PlanAnchor, FALLBACK_TITLE};

/// Map a chapter plan onto paragraph and time ranges.
///
/// Paragraph anchors resolve to that paragraph's start time (clamped to the
/// last paragraph); the entries are then ordered by time. Entry `i` owns every
/// paragraph with `start_time` in `[t_i, t_{i+1})`, the last window being open
/// ended. Windows that match nothing are dropped. An empty plan, or one where
/// every window is empty, yields a single chapter over all paragraphs.
pub fn structure_chapters(paragraphs: &[Paragraph], plan: &[ChapterPlanEntry]) -> Vec<Chapter> {
    if paragraphs.is_empty() {
        return Vec::new();
    }

    let mut breakpoints: Vec<(f64, &str)> = plan
        .iter()
        .map(|entry| (anchor_time(paragraphs, entry.anchor), entry.title.as_str()))
        .collect();
    breakpoints.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mut chapters = Vec::new();
    for (i, (start, title)) in breakpoints.iter().enumerate() {
        let next_start = breakpoints.get(i + 1).map(|(t, _)| *t);
        let members: Vec<&Paragraph> = paragraphs
            .iter()
            .filter(|p| p.start_time >= *start && next_start.map_or(true, |next| p.start_time < next))
            .collect();

        let Some(first) = members.first() else {
            debug!("Dropping empty chapter {:?} at {}s", title, start);
            continue;
        };

        let end_time = match next_start {
            Some(next) => next,
            None => members.iter().map(|p| p.start_time).fold(*start, f64::max),
        };

        chapters.push(Chapter {
            num: chapters.len(),
            title: title.to_string(),
            start_paragraph: first.index,
            end_paragraph: first.index + members.len(),
            start_time: *start,
            end_time,
            paragraphs: members.iter().map(|p| p.text.clone()).collect(),
            paragraph_timestamps: members.iter().map(|p| p.start_time).collect(),
            screenshots: None,
        });
    }

    if chapters.is_empty() {
        return vec![whole_content_chapter(paragraphs)];
    }
    chapters
}

/// One chapter spanning every paragraph
pub fn whole_content_chapter(paragraphs: &[Paragraph]) -> Chapter {
    let start_time = paragraphs.first().map(|p| p.start_time).unwrap_or_default();
    let end_time = paragraphs
        .iter()
        .map(|p| p.start_time)
        .fold(start_time, f64::max);

    Chapter {
        num: 0,
        title: FALLBACK_TITLE.to_string(),
        start_paragraph: 0,
        end_paragraph: paragraphs.len(),
        start_time,
        end_time,
        paragraphs: paragraphs.iter().map(|p| p.text.clone()).collect(),
        paragraph_timestamps: paragraphs.iter().map(|p| p.start_time).collect(),
        screenshots: None,
    }
}

fn anchor_time(paragraphs: &[Paragraph], anchor: PlanAnchor) -> f64 {
    match anchor {
        PlanAnchor::Timestamp(seconds) => seconds,
        PlanAnchor::Paragraph(index) => {
            let clamped = index.min(paragraphs.len().saturating_sub(1));
            paragraphs.get(clamped).map(|p| p.start_time).unwrap_or_default()
        }
    }
}
