/// Keyframe selection, capture and assignment
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::chapters::{Chapter, Paragraph};
use crate::media::{sanitize, MediaDownloader};

/// A captured frame and the time it was taken at
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Screenshot {
    pub path: String,
    pub time: f64,
}

impl Screenshot {
    /// Whole seconds, as used in the file name
    pub fn second(&self) -> u64 {
        self.time.max(0.0).floor() as u64
    }
}

/// File name for a frame of `subject_id` at `time`
pub fn screenshot_name(subject_id: &str, time: f64) -> String {
    format!("{}_{}.jpg", sanitize(subject_id), time.max(0.0).floor() as u64)
}

/// Greedy selection: the first time, then any time at least `interval` past
/// the last pick. Over `max` picks are thinned by a fixed stride.
pub fn select_timestamps(times: &[f64], interval: f64, max: usize) -> Vec<f64> {
    let mut selected: Vec<f64> = Vec::new();
    for &time in times {
        match selected.last() {
            Some(&last) if time - last < interval => {}
            _ => selected.push(time),
        }
    }

    if max > 0 && selected.len() > max {
        let step = selected.len() / max;
        selected = selected.into_iter().step_by(step).take(max).collect();
    }
    selected
}

/// Extracts frames for the given times; failures only shrink the result
#[async_trait]
pub trait FrameCapture: Send + Sync {
    async fn capture(&self, subject_id: &str, timestamps: &[f64], cancel: &CancellationToken) -> Vec<Screenshot>;
}

/// Tag each paragraph with the nearest screenshot (earliest wins ties)
pub fn annotate_paragraphs(paragraphs: &mut [Paragraph], screenshots: &[Screenshot]) {
    for paragraph in paragraphs.iter_mut() {
        let mut nearest: Option<&Screenshot> = None;
        for shot in screenshots {
            let closer = nearest.map_or(true, |best| {
                (shot.time - paragraph.start_time).abs() < (best.time - paragraph.start_time).abs()
            });
            if closer {
                nearest = Some(shot);
            }
        }
        paragraph.screenshot = nearest.map(|s| s.path.clone());
    }
}

/// Give each chapter the screenshots whose second falls in its time range
pub fn attach_to_chapters(chapters: &mut [Chapter], screenshots: &[Screenshot]) {
    for chapter in chapters.iter_mut() {
        let inside: Vec<String> = screenshots
            .iter()
            .filter(|s| {
                let second = s.second() as f64;
                second >= chapter.start_time && second <= chapter.end_time
            })
            .map(|s| s.path.clone())
            .collect();
        chapter.screenshots = Some(inside);
    }
}

/// Downloads the media once, then grabs one ffmpeg frame per timestamp
pub struct FfmpegFrameCapture {
    downloader: MediaDownloader,
    download_dir: PathBuf,
    output_dir: PathBuf,
    ffmpeg_path: String,
}

impl FfmpegFrameCapture {
    pub fn new(downloader: MediaDownloader, download_dir: PathBuf, output_dir: PathBuf, ffmpeg_path: String) -> Self {
        Self {
            downloader,
            download_dir,
            output_dir,
            ffmpeg_path,
        }
    }
}

#[async_trait]
impl FrameCapture for FfmpegFrameCapture {
    async fn capture(&self, subject_id: &str, timestamps: &[f64], cancel: &CancellationToken) -> Vec<Screenshot> {
        if timestamps.is_empty() {
            return Vec::new();
        }

        let media_path = match self.downloader.download(subject_id, &self.download_dir, cancel).await {
            Ok(path) => path,
            Err(e) => {
                warn!("Skipping screenshots for {}: {}", subject_id, e);
                return Vec::new();
            }
        };

        if let Err(e) = tokio::fs::create_dir_all(&self.output_dir).await {
            warn!("Cannot create screenshot directory {}: {}", self.output_dir.display(), e);
            return Vec::new();
        }

        let mut frames = Vec::new();
        for &time in timestamps {
            if cancel.is_cancelled() {
                debug!("Frame capture for {} cancelled", subject_id);
                break;
            }

            let frame_path = self.output_dir.join(screenshot_name(subject_id, time));
            let status = Command::new(&self.ffmpeg_path)
                .args(["-loglevel", "error", "-ss", &format!("{:.2}", time), "-i"])
                .arg(&media_path)
                .args(["-frames:v", "1", "-q:v", "2", "-y"])
                .arg(&frame_path)
                .kill_on_drop(true)
                .status()
                .await;

            match status {
                Ok(status) if status.success() && frame_path.exists() => {
                    debug!("Captured frame at {}s", time);
                    frames.push(Screenshot {
                        path: frame_path.to_string_lossy().into_owned(),
                        time,
                    });
                }
                Ok(status) => warn!("Failed to capture frame at {}s: ffmpeg exited with {}", time, status),
                Err(e) => warn!("Failed to capture frame at {}s: {}", time, e),
            }
        }

        info!("📸 Captured {}/{} frames for {}", frames.len(), timestamps.len(), subject_id);
        frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shot(time: f64) -> Screenshot {
        Screenshot {
            path: format!("shots/v_{}.jpg", time as u64),
            time,
        }
    }

    #[test]
    fn test_interval_selection() {
        let selected = select_timestamps(&[0.0, 10.0, 30.0, 65.0, 70.0, 140.0], 60.0, 50);
        assert_eq!(selected, vec![0.0, 65.0, 140.0]);
    }

    #[test]
    fn test_downsample_by_stride() {
        let times: Vec<f64> = (0..10).map(|i| i as f64 * 100.0).collect();
        let selected = select_timestamps(&times, 60.0, 3);
        // stride 10 / 3 = 3 -> 0, 300, 600, 900 then capped at 3
        assert_eq!(selected, vec![0.0, 300.0, 600.0]);
    }

    #[test]
    fn test_empty_times() {
        assert!(select_timestamps(&[], 60.0, 5).is_empty());
    }

    #[test]
    fn test_nearest_screenshot_per_paragraph() {
        let mut paragraphs = vec![
            Paragraph::new(0, "a", 0.0),
            Paragraph::new(1, "b", 40.0),
            Paragraph::new(2, "c", 50.0),
            Paragraph::new(3, "d", 200.0),
        ];
        annotate_paragraphs(&mut paragraphs, &[shot(0.0), shot(100.0)]);
        let refs: Vec<&str> = paragraphs.iter().map(|p| p.screenshot.as_deref().unwrap()).collect();
        // 50s is equidistant, the earlier frame wins
        assert_eq!(refs, vec!["shots/v_0.jpg", "shots/v_0.jpg", "shots/v_0.jpg", "shots/v_100.jpg"]);
    }

    #[test]
    fn test_no_screenshots_leaves_paragraphs_bare() {
        let mut paragraphs = vec![Paragraph::new(0, "a", 0.0)];
        annotate_paragraphs(&mut paragraphs, &[]);
        assert!(paragraphs[0].screenshot.is_none());
    }

    #[test]
    fn test_chapter_ranges_are_inclusive() {
        let chapter = |start: f64, end: f64| Chapter {
            num: 0,
            title: "t".into(),
            start_paragraph: 0,
            end_paragraph: 1,
            start_time: start,
            end_time: end,
            paragraphs: vec!["p".into()],
            paragraph_timestamps: vec![start],
            screenshots: None,
        };
        let mut chapters = vec![chapter(0.0, 65.0), chapter(65.0, 140.0)];
        attach_to_chapters(&mut chapters, &[shot(0.0), shot(65.7), shot(140.0)]);

        // 65.7 is encoded as 65 and sits on the shared boundary
        assert_eq!(chapters[0].screenshots.as_ref().unwrap().len(), 2);
        assert_eq!(chapters[1].screenshots.as_ref().unwrap().len(), 2);
    }

    #[test]
    fn test_screenshot_name() {
        assert_eq!(screenshot_name("abc", 65.9), "abc_65.jpg");
    }
}
