//! Session coordinator models.
//!
//! Domain rows, the typed transcript artifact, and HTTP request/response types.

use chrono::{DateTime, Duration, Utc};
use common::types::{MeetingId, ParticipantIdentity};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum display name length (characters).
pub const MAX_DISPLAY_NAME_LENGTH: usize = 64;

/// Maximum speaker label length (characters).
pub const MAX_SPEAKER_LENGTH: usize = 128;

/// Maximum text length of a single transcript segment (characters).
pub const MAX_SEGMENT_TEXT_LENGTH: usize = 10_000;

// ============================================================================
// Meeting
// ============================================================================

/// Meeting lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MeetingStatus {
    /// Scheduled, nobody has joined yet.
    Scheduled,

    /// At least one join or transcript auto-save happened.
    InProgress,

    /// Ended normally, by request or by the expiry sweep.
    Completed,

    /// Cancelled.
    Cancelled,
}

impl MeetingStatus {
    /// Storage representation of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            MeetingStatus::Scheduled => "scheduled",
            MeetingStatus::InProgress => "in_progress",
            MeetingStatus::Completed => "completed",
            MeetingStatus::Cancelled => "cancelled",
        }
    }

    /// Parse the storage representation.
    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "scheduled" => Some(MeetingStatus::Scheduled),
            "in_progress" => Some(MeetingStatus::InProgress),
            "completed" => Some(MeetingStatus::Completed),
            "cancelled" => Some(MeetingStatus::Cancelled),
            _ => None,
        }
    }

    /// Completed and cancelled meetings accept no further joins or segments.
    pub fn is_terminal(&self) -> bool {
        matches!(self, MeetingStatus::Completed | MeetingStatus::Cancelled)
    }

    /// States from which `self` may be entered.
    ///
    /// Nothing re-enters `Scheduled`, and nothing leaves a terminal state.
    pub fn allowed_predecessors(&self) -> &'static [MeetingStatus] {
        match self {
            MeetingStatus::Scheduled => &[],
            MeetingStatus::InProgress => &[MeetingStatus::Scheduled],
            MeetingStatus::Completed | MeetingStatus::Cancelled => {
                &[MeetingStatus::Scheduled, MeetingStatus::InProgress]
            }
        }
    }

    /// Whether moving from `self` to `target` is a legal forward transition.
    pub fn can_transition_to(&self, target: MeetingStatus) -> bool {
        target.allowed_predecessors().contains(self)
    }
}

/// Meeting record.
///
/// Created by the project layer; mutated here only through the state machine
/// and the share token columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Meeting {
    pub meeting_id: MeetingId,

    /// Owning organization (external reference).
    pub org_id: String,

    pub title: String,

    /// Scheduled start.
    pub scheduled_at: DateTime<Utc>,

    /// Scheduled duration in minutes.
    pub duration_minutes: i32,

    pub status: MeetingStatus,

    /// Public share token, if one was ever generated.
    pub share_token: Option<String>,

    /// Whether the share token currently grants access.
    pub is_public: bool,

    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Meeting {
    /// End of the scheduling window.
    pub fn scheduled_end(&self) -> DateTime<Utc> {
        self.scheduled_at + Duration::minutes(i64::from(self.duration_minutes))
    }

    /// Whether the scheduling window has elapsed at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.scheduled_end() <= now
    }
}

/// Input for creating a meeting.
#[derive(Debug, Clone)]
pub struct NewMeeting {
    pub org_id: String,
    pub title: String,
    pub scheduled_at: DateTime<Utc>,
    pub duration_minutes: i32,
}

// ============================================================================
// Participant
// ============================================================================

/// Presence status of a participant row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParticipantStatus {
    Joined,
    Left,
}

impl ParticipantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParticipantStatus::Joined => "joined",
            ParticipantStatus::Left => "left",
        }
    }

    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "joined" => Some(ParticipantStatus::Joined),
            "left" => Some(ParticipantStatus::Left),
            _ => None,
        }
    }
}

/// Whether a participant authenticated or joined through a share link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantKind {
    Member,
    Guest,
}

impl ParticipantKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParticipantKind::Member => "member",
            ParticipantKind::Guest => "guest",
        }
    }

    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "member" => Some(ParticipantKind::Member),
            "guest" => Some(ParticipantKind::Guest),
            _ => None,
        }
    }
}

/// Participant row keyed by (meeting, identity).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub meeting_id: MeetingId,
    pub identity: ParticipantIdentity,
    pub display_name: String,
    pub kind: ParticipantKind,
    pub status: ParticipantStatus,
    pub joined_at: DateTime<Utc>,

    /// Non-null iff `status` is `Left`.
    pub left_at: Option<DateTime<Utc>>,
}

// ============================================================================
// Transcript
// ============================================================================

/// Immutable transcript segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TranscriptSegment {
    pub segment_id: Uuid,
    pub meeting_id: MeetingId,

    /// Per-meeting monotonically increasing sequence, tie-break for equal timestamps.
    pub sequence: i64,

    pub speaker: String,
    pub text: String,
    pub is_final: bool,
    pub timestamp: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Input for appending a segment; the sequence is assigned by the meeting actor.
#[derive(Debug, Clone)]
pub struct NewSegment {
    pub meeting_id: MeetingId,
    pub sequence: i64,
    pub speaker: String,
    pub text: String,
    pub is_final: bool,
    pub timestamp: DateTime<Utc>,
}

/// Whether a summary came from the model or from deterministic fallback logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Provenance {
    Ai,
    Fallback,
}

impl Provenance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provenance::Ai => "ai",
            Provenance::Fallback => "fallback",
        }
    }

    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "ai" => Some(Provenance::Ai),
            "fallback" => Some(Provenance::Fallback),
            _ => None,
        }
    }
}

/// Structured output of the summarization worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub summary: String,
    pub highlights: Vec<String>,
    pub action_items: Vec<String>,
    pub follow_ups: Vec<String>,
    pub provenance: Provenance,
}

/// Capture source recorded for live transcription artifacts.
pub const LIVE_TRANSCRIPTION_SOURCE: &str = "live_transcription";

/// Artifact metadata, stored as a JSON document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    /// Capture source.
    pub source: String,

    /// When the current content or summary was produced.
    pub generated_at: DateTime<Utc>,

    pub is_partial: bool,

    /// Number of partial saves that have touched this artifact.
    pub auto_save_count: u32,

    /// SHA-256 of the content the summary was produced from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,

    /// Final segments included in `content`.
    #[serde(default)]
    pub final_segment_count: usize,
}

/// Finalization guard persisted with the artifact row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FinalizationState {
    /// No terminal pass has been claimed.
    None,

    /// A terminal pass is claimed and running.
    Processing,

    /// The terminal artifact has been written.
    Processed,
}

impl FinalizationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            FinalizationState::None => "none",
            FinalizationState::Processing => "processing",
            FinalizationState::Processed => "processed",
        }
    }

    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "none" => Some(FinalizationState::None),
            "processing" => Some(FinalizationState::Processing),
            "processed" => Some(FinalizationState::Processed),
            _ => None,
        }
    }
}

/// Transcript artifact. At most one per meeting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptArtifact {
    pub meeting_id: MeetingId,

    /// Concatenated final segments.
    pub content: String,

    /// Speaker labels in order of first appearance.
    pub speakers: Vec<String>,

    /// Absent for raw auto-saves that never went through summarization.
    pub summary: Option<Summary>,

    pub is_partial: bool,
    pub metadata: ArtifactMetadata,
    pub finalization_state: FinalizationState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Artifact write produced by the summarization pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactWrite {
    pub meeting_id: MeetingId,
    pub content: String,
    pub speakers: Vec<String>,
    pub summary: Summary,
    pub content_hash: String,
    pub final_segment_count: usize,
}

// ============================================================================
// HTTP API Models
// ============================================================================

/// Validate and normalize a display name.
pub fn normalize_display_name(raw: &str) -> Result<String, &'static str> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err("Display name is required");
    }
    if trimmed.chars().count() > MAX_DISPLAY_NAME_LENGTH {
        return Err("Display name must be at most 64 characters");
    }
    Ok(trimmed.to_string())
}

/// Request body for an authenticated join.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JoinMeetingRequest {
    /// Overrides the display name from the identity provider.
    #[serde(default)]
    pub display_name: Option<String>,
}

/// Response for joining a meeting (members and guests).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinMeetingResponse {
    /// Signed room credential.
    pub credential: String,

    /// Media-room service endpoint.
    pub server_endpoint: String,

    /// Room name (the meeting id).
    pub room_name: String,

    pub display_name: String,

    /// Participant identity embedded in the credential.
    pub identity: String,

    /// Credential lifetime in seconds.
    pub expires_in: u64,
}

/// Request body for a guest join through a share link.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GuestJoinRequest {
    pub display_name: String,
}

/// Presence update from a room participant.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PresenceRequest {
    pub status: ParticipantStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceResponse {
    /// False when a LEFT update names an identity that never joined.
    pub success: bool,
}

/// Segment ingestion request.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppendSegmentRequest {
    pub speaker: String,
    pub text: String,
    pub is_final: bool,
    pub timestamp: DateTime<Utc>,
}

impl AppendSegmentRequest {
    /// Validate the request.
    ///
    /// # Errors
    ///
    /// Returns an error message if validation fails.
    pub fn validate(&self) -> Result<(), &'static str> {
        let speaker = self.speaker.trim();
        if speaker.is_empty() {
            return Err("Speaker is required");
        }
        if speaker.chars().count() > MAX_SPEAKER_LENGTH {
            return Err("Speaker must be at most 128 characters");
        }
        if self.text.trim().is_empty() {
            return Err("Segment text is required");
        }
        if self.text.chars().count() > MAX_SEGMENT_TEXT_LENGTH {
            return Err("Segment text must be at most 10000 characters");
        }
        Ok(())
    }
}

/// Segment ingestion acknowledgement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentAck {
    pub accepted: bool,
    pub segment_id: Uuid,
    pub sequence: i64,
}

/// Status transition request.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransitionRequest {
    pub target_status: MeetingStatus,
}

/// Meeting record returned to authenticated callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeetingResponse {
    pub meeting_id: MeetingId,
    pub title: String,
    pub scheduled_at: DateTime<Utc>,
    pub duration_minutes: i32,
    pub status: MeetingStatus,
    pub is_public: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    pub active_participants: i64,
    pub total_participants: i64,
}

impl MeetingResponse {
    pub fn from_meeting(meeting: &Meeting, active: i64, total: i64) -> Self {
        Self {
            meeting_id: meeting.meeting_id,
            title: meeting.title.clone(),
            scheduled_at: meeting.scheduled_at,
            duration_minutes: meeting.duration_minutes,
            status: meeting.status,
            is_public: meeting.is_public,
            started_at: meeting.started_at,
            ended_at: meeting.ended_at,
            active_participants: active,
            total_participants: total,
        }
    }
}

/// Share token returned to the meeting owner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShareTokenResponse {
    pub token: String,
    pub is_public: bool,
}

/// Read-only meeting view for anonymous callers.
///
/// Carries no organization id, share token, or participant identities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicMeetingSummary {
    pub meeting_id: MeetingId,
    pub title: String,
    pub scheduled_at: DateTime<Utc>,
    pub duration_minutes: i32,
    pub status: MeetingStatus,
    pub active_participants: i64,
}

/// Segment as returned by the segments listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentResponse {
    pub segment_id: Uuid,
    pub sequence: i64,
    pub speaker: String,
    pub text: String,
    pub is_final: bool,
    pub timestamp: DateTime<Utc>,
}

impl From<&TranscriptSegment> for SegmentResponse {
    fn from(segment: &TranscriptSegment) -> Self {
        Self {
            segment_id: segment.segment_id,
            sequence: segment.sequence,
            speaker: segment.speaker.clone(),
            text: segment.text.clone(),
            is_final: segment.is_final,
            timestamp: segment.timestamp,
        }
    }
}

/// Transcript artifact as returned to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactResponse {
    pub meeting_id: MeetingId,
    pub content: String,
    pub speakers: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub highlights: Vec<String>,
    pub action_items: Vec<String>,
    pub follow_ups: Vec<String>,

    /// Absent until a summarization pass has run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provenance: Option<Provenance>,

    pub is_partial: bool,
    pub auto_save_count: u32,
    pub generated_at: DateTime<Utc>,
}

impl From<&TranscriptArtifact> for ArtifactResponse {
    fn from(artifact: &TranscriptArtifact) -> Self {
        let summary = artifact.summary.as_ref();
        Self {
            meeting_id: artifact.meeting_id,
            content: artifact.content.clone(),
            speakers: artifact.speakers.clone(),
            summary: summary.map(|s| s.summary.clone()),
            highlights: summary.map(|s| s.highlights.clone()).unwrap_or_default(),
            action_items: summary.map(|s| s.action_items.clone()).unwrap_or_default(),
            follow_ups: summary.map(|s| s.follow_ups.clone()).unwrap_or_default(),
            provenance: summary.map(|s| s.provenance),
            is_partial: artifact.is_partial,
            auto_save_count: artifact.metadata.auto_save_count,
            generated_at: artifact.metadata.generated_at,
        }
    }
}

/// Readiness response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    /// "ready" or "not_ready".
    pub status: String,

    /// Storage connectivity ("healthy" or "unhealthy").
    pub storage: String,

    /// Meeting actors currently registered.
    pub active_meetings: usize,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn meeting(duration_minutes: i32) -> Meeting {
        let scheduled_at = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();
        Meeting {
            meeting_id: MeetingId::new(),
            org_id: "org-1".to_string(),
            title: "Sprint planning".to_string(),
            scheduled_at,
            duration_minutes,
            status: MeetingStatus::Scheduled,
            share_token: None,
            is_public: false,
            started_at: None,
            ended_at: None,
            created_at: scheduled_at,
            updated_at: scheduled_at,
        }
    }

    #[test]
    fn test_status_storage_roundtrip() {
        for status in [
            MeetingStatus::Scheduled,
            MeetingStatus::InProgress,
            MeetingStatus::Completed,
            MeetingStatus::Cancelled,
        ] {
            assert_eq!(MeetingStatus::from_db(status.as_str()), Some(status));
        }
        assert_eq!(MeetingStatus::from_db("active"), None);
    }

    #[test]
    fn test_status_wire_format() {
        let json = serde_json::to_string(&MeetingStatus::InProgress).unwrap();
        assert_eq!(json, "\"IN_PROGRESS\"");

        let parsed: ParticipantStatus = serde_json::from_str("\"LEFT\"").unwrap();
        assert_eq!(parsed, ParticipantStatus::Left);
    }

    #[test]
    fn test_transitions_only_move_forward() {
        use MeetingStatus::*;

        assert!(Scheduled.can_transition_to(InProgress));
        assert!(Scheduled.can_transition_to(Completed));
        assert!(Scheduled.can_transition_to(Cancelled));
        assert!(InProgress.can_transition_to(Completed));
        assert!(InProgress.can_transition_to(Cancelled));

        assert!(!InProgress.can_transition_to(Scheduled));
        assert!(!Completed.can_transition_to(Scheduled));
        assert!(!Completed.can_transition_to(InProgress));
        assert!(!Cancelled.can_transition_to(Completed));
        assert!(!Scheduled.can_transition_to(Scheduled));
    }

    #[test]
    fn test_terminal_states() {
        assert!(MeetingStatus::Completed.is_terminal());
        assert!(MeetingStatus::Cancelled.is_terminal());
        assert!(!MeetingStatus::Scheduled.is_terminal());
        assert!(!MeetingStatus::InProgress.is_terminal());
    }

    #[test]
    fn test_meeting_expiry_window() {
        let m = meeting(30);
        assert!(!m.is_expired_at(m.scheduled_at + Duration::minutes(29)));
        assert!(m.is_expired_at(m.scheduled_at + Duration::minutes(30)));
        assert!(m.is_expired_at(m.scheduled_at + Duration::minutes(31)));
    }

    #[test]
    fn test_normalize_display_name() {
        assert_eq!(normalize_display_name("  Grace  ").unwrap(), "Grace");
        assert!(normalize_display_name("   ").is_err());
        assert!(normalize_display_name(&"x".repeat(65)).is_err());
        assert!(normalize_display_name(&"é".repeat(64)).is_ok());
    }

    #[test]
    fn test_append_segment_validation() {
        let mut request = AppendSegmentRequest {
            speaker: "Alice".to_string(),
            text: "Let's start with the roadmap.".to_string(),
            is_final: true,
            timestamp: Utc::now(),
        };
        assert!(request.validate().is_ok());

        request.text = "  ".to_string();
        assert_eq!(request.validate(), Err("Segment text is required"));

        request.text = "ok".to_string();
        request.speaker = String::new();
        assert_eq!(request.validate(), Err("Speaker is required"));
    }

    #[test]
    fn test_segment_request_rejects_unknown_fields() {
        let json = r#"{"speaker":"A","text":"hi","is_final":true,"timestamp":"2026-03-02T09:00:00Z","extra":1}"#;
        assert!(serde_json::from_str::<AppendSegmentRequest>(json).is_err());
    }

    #[test]
    fn test_artifact_response_without_summary() {
        let now = Utc::now();
        let artifact = TranscriptArtifact {
            meeting_id: MeetingId::new(),
            content: "Alice: hello".to_string(),
            speakers: vec!["Alice".to_string()],
            summary: None,
            is_partial: true,
            metadata: ArtifactMetadata {
                source: LIVE_TRANSCRIPTION_SOURCE.to_string(),
                generated_at: now,
                is_partial: true,
                auto_save_count: 2,
                content_hash: None,
                final_segment_count: 1,
            },
            finalization_state: FinalizationState::None,
            created_at: now,
            updated_at: now,
        };

        let response = ArtifactResponse::from(&artifact);
        assert!(response.summary.is_none());
        assert!(response.provenance.is_none());
        assert!(response.highlights.is_empty());
        assert_eq!(response.auto_save_count, 2);

        let json = serde_json::to_value(&response).unwrap();
        assert!(json.get("provenance").is_none());
    }

    #[test]
    fn test_metadata_tolerates_missing_optional_fields() {
        let json = r#"{"source":"live_transcription","generated_at":"2026-03-02T09:00:00Z","is_partial":true,"auto_save_count":4}"#;
        let metadata: ArtifactMetadata = serde_json::from_str(json).unwrap();
        assert_eq!(metadata.auto_save_count, 4);
        assert_eq!(metadata.final_segment_count, 0);
        assert!(metadata.content_hash.is_none());
    }
}
