//! Storage for meetings, participants, transcript segments and artifacts.
//!
//! Every mutation that can race is a single atomic statement keyed by the
//! row's primary key: status compare-and-set, participant upsert on
//! (meeting, identity), artifact upsert on meeting id. Two backends implement
//! the traits:
//!
//! - [`postgres::PgStore`] for deployments
//! - [`memory::InMemoryStore`] for development and tests

pub mod memory;
pub mod postgres;

use crate::errors::CoordinatorError;
use crate::models::{
    ArtifactMetadata, ArtifactWrite, Meeting, MeetingStatus, NewMeeting, NewSegment, Participant,
    ParticipantKind, TranscriptArtifact, TranscriptSegment,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::types::{MeetingId, ParticipantIdentity};
use std::time::Duration;

pub use memory::InMemoryStore;
pub use postgres::PgStore;

/// Meeting rows. Status changes go through `transition_status` only.
#[async_trait]
pub trait MeetingsRepository: Send + Sync {
    /// Insert a meeting (project layer and tests).
    async fn insert_meeting(&self, meeting: NewMeeting) -> Result<Meeting, CoordinatorError>;

    async fn get_meeting(&self, meeting_id: MeetingId)
        -> Result<Option<Meeting>, CoordinatorError>;

    /// Compare-and-set the status column.
    ///
    /// Applies only when the current status is one of `from`. Sets
    /// `started_at` on entering `InProgress` and `ended_at` on entering a
    /// terminal state. Returns `None` when the guard did not match.
    async fn transition_status(
        &self,
        meeting_id: MeetingId,
        from: &[MeetingStatus],
        to: MeetingStatus,
        now: DateTime<Utc>,
    ) -> Result<Option<Meeting>, CoordinatorError>;

    /// Complete every non-terminal meeting whose scheduling window ended at or
    /// before `now`. Returns the ids that changed.
    async fn complete_expired(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<MeetingId>, CoordinatorError>;

    /// Publish the meeting's share token.
    ///
    /// Keeps the current token while the meeting is public, otherwise stores
    /// `candidate`. Returns the meeting with the effective token.
    async fn publish_share_token(
        &self,
        meeting_id: MeetingId,
        candidate: &str,
    ) -> Result<Option<Meeting>, CoordinatorError>;

    /// Clear `is_public`. Returns false for unknown meetings.
    async fn revoke_share_token(&self, meeting_id: MeetingId) -> Result<bool, CoordinatorError>;

    /// Look up a meeting by a token that is currently public.
    async fn find_by_share_token(&self, token: &str)
        -> Result<Option<Meeting>, CoordinatorError>;
}

/// Participant rows, keyed by (meeting, identity).
#[async_trait]
pub trait ParticipantsRepository: Send + Sync {
    /// Insert or rejoin: status JOINED, `left_at` cleared, `joined_at` refreshed.
    async fn upsert_joined(
        &self,
        meeting_id: MeetingId,
        identity: &ParticipantIdentity,
        display_name: &str,
        kind: ParticipantKind,
        now: DateTime<Utc>,
    ) -> Result<Participant, CoordinatorError>;

    /// Mark an existing row LEFT. Returns `None` when the identity never joined.
    async fn mark_left(
        &self,
        meeting_id: MeetingId,
        identity: &ParticipantIdentity,
        now: DateTime<Utc>,
    ) -> Result<Option<Participant>, CoordinatorError>;

    async fn count_active(&self, meeting_id: MeetingId) -> Result<i64, CoordinatorError>;

    async fn count_total(&self, meeting_id: MeetingId) -> Result<i64, CoordinatorError>;

    async fn list_participants(
        &self,
        meeting_id: MeetingId,
    ) -> Result<Vec<Participant>, CoordinatorError>;
}

/// Append-only transcript segments.
#[async_trait]
pub trait SegmentsRepository: Send + Sync {
    async fn append_segment(
        &self,
        segment: NewSegment,
    ) -> Result<TranscriptSegment, CoordinatorError>;

    /// All segments in canonical order (timestamp, then sequence).
    async fn list_segments(
        &self,
        meeting_id: MeetingId,
    ) -> Result<Vec<TranscriptSegment>, CoordinatorError>;
}

/// Raw content captured by a partial save.
#[derive(Debug, Clone)]
pub struct AutoSaveInput {
    pub meeting_id: MeetingId,
    pub content: String,
    pub speakers: Vec<String>,
    pub final_segment_count: usize,
}

/// Result of a partial save.
#[derive(Debug, Clone)]
pub enum AutoSaveOutcome {
    /// Row written; `count_reset` is set when stored metadata was unreadable.
    Saved {
        artifact: TranscriptArtifact,
        count_reset: bool,
    },

    /// A terminal artifact already exists and is left untouched.
    AlreadyFinal(TranscriptArtifact),
}

/// Transcript artifact rows, one per meeting.
#[async_trait]
pub trait ArtifactsRepository: Send + Sync {
    async fn get_artifact(
        &self,
        meeting_id: MeetingId,
    ) -> Result<Option<TranscriptArtifact>, CoordinatorError>;

    /// Persist raw content and increment `auto_save_count`, serialized on the row.
    async fn record_auto_save(
        &self,
        input: AutoSaveInput,
        now: DateTime<Utc>,
    ) -> Result<AutoSaveOutcome, CoordinatorError>;

    /// Write an enrichment summary with `is_partial = true`.
    ///
    /// Returns false without writing when the artifact is already terminal.
    async fn write_partial(
        &self,
        write: ArtifactWrite,
        now: DateTime<Utc>,
    ) -> Result<bool, CoordinatorError>;

    /// Atomically claim the terminal pass (NONE -> PROCESSING).
    ///
    /// A PROCESSING claim older than `stale_after` may be retaken. Returns
    /// false if another attempt holds or completed the claim.
    async fn claim_finalization(
        &self,
        meeting_id: MeetingId,
        now: DateTime<Utc>,
        stale_after: Duration,
    ) -> Result<bool, CoordinatorError>;

    /// Write the terminal artifact (`is_partial = false`, PROCESSED).
    async fn write_terminal(
        &self,
        write: ArtifactWrite,
        now: DateTime<Utc>,
    ) -> Result<TranscriptArtifact, CoordinatorError>;

    /// Terminal meetings whose artifact has not reached PROCESSED.
    async fn pending_finalizations(&self) -> Result<Vec<MeetingId>, CoordinatorError>;
}

/// Everything the coordinator persists.
#[async_trait]
pub trait Store:
    MeetingsRepository + ParticipantsRepository + SegmentsRepository + ArtifactsRepository
{
    /// Connectivity probe for readiness.
    async fn ping(&self) -> Result<(), CoordinatorError>;
}

/// Compute the next `auto_save_count` from previously stored metadata.
///
/// Stored metadata that cannot be parsed resets the count to 1. The reset is
/// reported to the caller and logged so it can be reviewed: it may hide a lost
/// history of saves.
pub fn next_auto_save_count(previous: Option<&serde_json::Value>) -> (u32, bool) {
    let Some(value) = previous else {
        return (1, false);
    };

    match serde_json::from_value::<ArtifactMetadata>(value.clone()) {
        Ok(metadata) => (metadata.auto_save_count.saturating_add(1), false),
        Err(e) => {
            tracing::warn!(
                target: "sc.repo.artifacts",
                error = %e,
                "Stored artifact metadata is unreadable, resetting auto_save_count to 1"
            );
            (1, true)
        }
    }
}
