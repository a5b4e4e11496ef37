//! Transcript text assembly.
//!
//! The canonical transcript is the final segments in (timestamp, sequence)
//! order, one `"{speaker}: {text}"` line each. Interim segments never
//! contribute. The SHA-256 of that text identifies a content snapshot for
//! the finalization guard.

use crate::models::TranscriptSegment;
use sha2::{Digest, Sha256};

/// Running concatenation of final segments for one meeting.
///
/// Segments usually arrive in order, so appends are cheap; an out-of-order
/// timestamp triggers a rebuild from the sorted buffer.
#[derive(Debug, Clone, Default)]
pub struct TranscriptBuffer {
    finals: Vec<TranscriptSegment>,
    content: String,
}

fn line(segment: &TranscriptSegment) -> String {
    format!("{}: {}", segment.speaker, segment.text)
}

impl TranscriptBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from stored segments, in any order.
    pub fn from_segments<'a>(segments: impl IntoIterator<Item = &'a TranscriptSegment>) -> Self {
        let mut buffer = Self::new();
        for segment in segments {
            buffer.push(segment.clone());
        }
        buffer
    }

    /// Add a segment. Returns true when it was final and changed the content.
    pub fn push(&mut self, segment: TranscriptSegment) -> bool {
        if !segment.is_final {
            return false;
        }

        let key = (segment.timestamp, segment.sequence);
        let in_order = self
            .finals
            .last()
            .map_or(true, |last| (last.timestamp, last.sequence) <= key);

        if in_order {
            if !self.content.is_empty() {
                self.content.push('\n');
            }
            self.content.push_str(&line(&segment));
            self.finals.push(segment);
        } else {
            self.finals.push(segment);
            self.finals
                .sort_by(|a, b| (a.timestamp, a.sequence).cmp(&(b.timestamp, b.sequence)));
            self.content = self.finals.iter().map(line).collect::<Vec<_>>().join("\n");
        }
        true
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn final_count(&self) -> usize {
        self.finals.len()
    }

    pub fn speakers(&self) -> Vec<String> {
        speakers(&self.finals)
    }

    pub fn content_hash(&self) -> String {
        content_hash(&self.content)
    }

    /// Immutable copy of the current content for summarization or saving.
    pub fn snapshot(&self) -> TranscriptSnapshot {
        TranscriptSnapshot {
            content: self.content.clone(),
            speakers: self.speakers(),
            content_hash: self.content_hash(),
            final_segment_count: self.final_count(),
        }
    }
}

/// Transcript content at one point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptSnapshot {
    pub content: String,
    pub speakers: Vec<String>,
    pub content_hash: String,
    pub final_segment_count: usize,
}

/// SHA-256 of `content`, lowercase hex.
pub fn content_hash(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

/// Distinct speaker labels in order of first appearance.
pub fn speakers(segments: &[TranscriptSegment]) -> Vec<String> {
    let mut seen: Vec<String> = Vec::new();
    for segment in segments {
        if !seen.iter().any(|s| s == &segment.speaker) {
            seen.push(segment.speaker.clone());
        }
    }
    seen
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use common::types::MeetingId;
    use uuid::Uuid;

    fn segment(
        sequence: i64,
        offset_secs: i64,
        speaker: &str,
        text: &str,
        is_final: bool,
    ) -> TranscriptSegment {
        let base = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();
        TranscriptSegment {
            segment_id: Uuid::new_v4(),
            meeting_id: MeetingId(Uuid::nil()),
            sequence,
            speaker: speaker.to_string(),
            text: text.to_string(),
            is_final,
            timestamp: base + Duration::seconds(offset_secs),
            created_at: base,
        }
    }

    #[test]
    fn test_interim_segments_excluded() {
        let mut buffer = TranscriptBuffer::new();
        assert!(buffer.push(segment(1, 0, "Alice", "Good morning", true)));
        assert!(!buffer.push(segment(2, 1, "Bob", "Mor", false)));
        assert!(buffer.push(segment(3, 2, "Bob", "Morning all", true)));

        assert_eq!(buffer.content(), "Alice: Good morning\nBob: Morning all");
        assert_eq!(buffer.final_count(), 2);
        assert_eq!(buffer.speakers(), vec!["Alice", "Bob"]);
    }

    #[test]
    fn test_out_of_order_timestamp_rebuilds_canonical_order() {
        let mut buffer = TranscriptBuffer::new();
        buffer.push(segment(1, 10, "Alice", "second", true));
        buffer.push(segment(2, 5, "Bob", "first", true));
        buffer.push(segment(3, 10, "Carol", "third", true));

        assert_eq!(buffer.content(), "Bob: first\nAlice: second\nCarol: third");
    }

    #[test]
    fn test_rehydrated_buffer_matches_live_buffer() {
        let segments = vec![
            segment(1, 0, "Alice", "one", true),
            segment(2, 1, "Bob", "two", false),
            segment(3, 2, "Bob", "three", true),
        ];

        let mut live = TranscriptBuffer::new();
        for s in segments.iter().cloned() {
            live.push(s);
        }
        let rehydrated = TranscriptBuffer::from_segments(segments.iter().rev());

        assert_eq!(live.content(), rehydrated.content());
        assert_eq!(live.content_hash(), rehydrated.content_hash());
    }

    #[test]
    fn test_content_hash_is_sha256_hex() {
        assert_eq!(
            content_hash(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_ne!(content_hash("a"), content_hash("b"));
    }
}
