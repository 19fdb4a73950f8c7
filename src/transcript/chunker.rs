use super::TranscriptSegment;

/// Merged run of segments submitted as one refinement call
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub text: String,
    pub start_time: f64,
}

/// Greedily pack segments into chunks of at most `max_chars` characters.
///
/// Segments are trimmed and joined with a single space; the separator counts
/// toward the budget. A segment is never split, so one longer than
/// `max_chars` becomes a chunk of its own. Each chunk takes the start time of
/// its first segment.
pub fn chunk_segments(segments: &[TranscriptSegment], max_chars: usize) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut current: Option<Chunk> = None;
    // chars in current chunk plus one trailing separator
    let mut current_length = 0usize;

    for segment in segments {
        let text = segment.text.trim();
        if text.is_empty() {
            continue;
        }
        let len = text.chars().count();

        match current.as_mut() {
            Some(chunk) if current_length + len <= max_chars => {
                chunk.text.push(' ');
                chunk.text.push_str(text);
                current_length += len + 1;
            }
            _ => {
                if let Some(done) = current.take() {
                    chunks.push(done);
                }
                current = Some(Chunk {
                    text: text.to_string(),
                    start_time: segment.start_time,
                });
                current_length = len + 1;
            }
        }
    }

    if let Some(done) = current {
        chunks.push(done);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(start: f64, text: &str) -> TranscriptSegment {
        TranscriptSegment::new(start, text)
    }

    #[test]
    fn test_small_transcript_is_one_chunk() {
        let chunks = chunk_segments(&[seg(0.0, "hello"), seg(5.0, "world"), seg(61.0, "next")], 100);
        assert_eq!(
            chunks,
            vec![Chunk {
                text: "hello world next".to_string(),
                start_time: 0.0
            }]
        );
    }

    #[test]
    fn test_budget_splits_and_inherits_first_start() {
        // "aaaa bbbb" is 9 chars; adding " cccc" would make 14
        let chunks = chunk_segments(
            &[seg(0.0, "aaaa"), seg(2.0, "bbbb"), seg(4.0, "cccc"), seg(6.0, "dd")],
            10,
        );
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].text, "aaaa bbbb");
        assert_eq!(chunks[1].text, "cccc dd");
        assert_eq!(chunks[1].start_time, 4.0);
    }

    #[test]
    fn test_exact_fit_stays_in_chunk() {
        let chunks = chunk_segments(&[seg(0.0, "aaaa"), seg(1.0, "bbbbb")], 10);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text.len(), 10);
    }

    #[test]
    fn test_blank_segments_are_skipped() {
        let chunks = chunk_segments(&[seg(0.0, "   "), seg(3.0, " hi "), seg(4.0, "")], 100);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "hi");
        assert_eq!(chunks[0].start_time, 3.0);
    }

    #[test]
    fn test_oversized_segment_stands_alone() {
        let long = "x".repeat(50);
        let chunks = chunk_segments(&[seg(0.0, "a"), seg(1.0, &long), seg(2.0, "b")], 10);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[1].text, long);
    }

    #[test]
    fn test_concatenation_and_bound_hold() {
        let segments: Vec<TranscriptSegment> = (0..200)
            .map(|i| seg(i as f64, &"w".repeat(1 + (i * 7) % 13)))
            .collect();
        let chunks = chunk_segments(&segments, 40);

        let joined: String = chunks.iter().map(|c| c.text.replace(' ', "")).collect();
        let expected: String = segments.iter().map(|s| s.text.clone()).collect();
        assert_eq!(joined, expected);
        assert!(chunks.iter().all(|c| c.text.chars().count() <= 40));
    }

    #[test]
    fn test_empty_input() {
        assert!(chunk_segments(&[], 10).is_empty());
    }
}
