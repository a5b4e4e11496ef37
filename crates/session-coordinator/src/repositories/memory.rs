//! Process-local store.
//!
//! All tables live behind one mutex that is never held across an await, so
//! each trait method is a single atomic step, matching the per-row atomic
//! statements of the Postgres store. State is lost on restart.

use super::{
    next_auto_save_count, ArtifactsRepository, AutoSaveInput, AutoSaveOutcome,
    MeetingsRepository, ParticipantsRepository, SegmentsRepository, Store,
};
use crate::errors::CoordinatorError;
use crate::models::{
    ArtifactMetadata, ArtifactWrite, FinalizationState, Meeting, MeetingStatus, NewMeeting,
    NewSegment, Participant, ParticipantKind, ParticipantStatus, TranscriptArtifact,
    TranscriptSegment, LIVE_TRANSCRIPTION_SOURCE,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::types::{MeetingId, ParticipantIdentity};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug)]
struct StoredArtifact {
    artifact: TranscriptArtifact,
    claimed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct Tables {
    meetings: HashMap<MeetingId, Meeting>,
    participants: HashMap<(MeetingId, ParticipantIdentity), Participant>,
    segments: HashMap<MeetingId, Vec<TranscriptSegment>>,
    artifacts: HashMap<MeetingId, StoredArtifact>,
}

/// In-memory implementation of [`Store`].
#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: Mutex<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>, CoordinatorError> {
        self.tables
            .lock()
            .map_err(|_| CoordinatorError::Internal("in-memory store lock poisoned".to_string()))
    }
}

fn empty_artifact(meeting_id: MeetingId, now: DateTime<Utc>) -> TranscriptArtifact {
    TranscriptArtifact {
        meeting_id,
        content: String::new(),
        speakers: Vec::new(),
        summary: None,
        is_partial: true,
        metadata: ArtifactMetadata {
            source: LIVE_TRANSCRIPTION_SOURCE.to_string(),
            generated_at: now,
            is_partial: true,
            auto_save_count: 0,
            content_hash: None,
            final_segment_count: 0,
        },
        finalization_state: FinalizationState::None,
        created_at: now,
        updated_at: now,
    }
}

fn apply_write(
    artifact: &mut TranscriptArtifact,
    write: ArtifactWrite,
    is_partial: bool,
    now: DateTime<Utc>,
) {
    artifact.content = write.content;
    artifact.speakers = write.speakers;
    artifact.summary = Some(write.summary);
    artifact.is_partial = is_partial;
    artifact.metadata.generated_at = now;
    artifact.metadata.is_partial = is_partial;
    artifact.metadata.content_hash = Some(write.content_hash);
    artifact.metadata.final_segment_count = write.final_segment_count;
    artifact.updated_at = now;
}

#[async_trait]
impl MeetingsRepository for InMemoryStore {
    async fn insert_meeting(&self, meeting: NewMeeting) -> Result<Meeting, CoordinatorError> {
        let now = Utc::now();
        let row = Meeting {
            meeting_id: MeetingId::new(),
            org_id: meeting.org_id,
            title: meeting.title,
            scheduled_at: meeting.scheduled_at,
            duration_minutes: meeting.duration_minutes,
            status: MeetingStatus::Scheduled,
            share_token: None,
            is_public: false,
            started_at: None,
            ended_at: None,
            created_at: now,
            updated_at: now,
        };
        self.lock()?.meetings.insert(row.meeting_id, row.clone());
        Ok(row)
    }

    async fn get_meeting(
        &self,
        meeting_id: MeetingId,
    ) -> Result<Option<Meeting>, CoordinatorError> {
        Ok(self.lock()?.meetings.get(&meeting_id).cloned())
    }

    async fn transition_status(
        &self,
        meeting_id: MeetingId,
        from: &[MeetingStatus],
        to: MeetingStatus,
        now: DateTime<Utc>,
    ) -> Result<Option<Meeting>, CoordinatorError> {
        let mut tables = self.lock()?;
        let Some(meeting) = tables.meetings.get_mut(&meeting_id) else {
            return Ok(None);
        };
        if !from.contains(&meeting.status) {
            return Ok(None);
        }

        meeting.status = to;
        if to == MeetingStatus::InProgress && meeting.started_at.is_none() {
            meeting.started_at = Some(now);
        }
        if to.is_terminal() {
            meeting.ended_at = Some(now);
        }
        meeting.updated_at = now;
        Ok(Some(meeting.clone()))
    }

    async fn complete_expired(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<MeetingId>, CoordinatorError> {
        let mut tables = self.lock()?;
        let mut changed = Vec::new();
        for meeting in tables.meetings.values_mut() {
            if !meeting.status.is_terminal() && meeting.is_expired_at(now) {
                meeting.status = MeetingStatus::Completed;
                meeting.ended_at = Some(now);
                meeting.updated_at = now;
                changed.push(meeting.meeting_id);
            }
        }
        changed.sort();
        Ok(changed)
    }

    async fn publish_share_token(
        &self,
        meeting_id: MeetingId,
        candidate: &str,
    ) -> Result<Option<Meeting>, CoordinatorError> {
        let mut tables = self.lock()?;
        let Some(meeting) = tables.meetings.get_mut(&meeting_id) else {
            return Ok(None);
        };
        if !(meeting.is_public && meeting.share_token.is_some()) {
            meeting.share_token = Some(candidate.to_string());
            meeting.is_public = true;
            meeting.updated_at = Utc::now();
        }
        Ok(Some(meeting.clone()))
    }

    async fn revoke_share_token(&self, meeting_id: MeetingId) -> Result<bool, CoordinatorError> {
        let mut tables = self.lock()?;
        let Some(meeting) = tables.meetings.get_mut(&meeting_id) else {
            return Ok(false);
        };
        meeting.is_public = false;
        meeting.updated_at = Utc::now();
        Ok(true)
    }

    async fn find_by_share_token(
        &self,
        token: &str,
    ) -> Result<Option<Meeting>, CoordinatorError> {
        Ok(self
            .lock()?
            .meetings
            .values()
            .find(|m| m.is_public && m.share_token.as_deref() == Some(token))
            .cloned())
    }
}

#[async_trait]
impl ParticipantsRepository for InMemoryStore {
    async fn upsert_joined(
        &self,
        meeting_id: MeetingId,
        identity: &ParticipantIdentity,
        display_name: &str,
        kind: ParticipantKind,
        now: DateTime<Utc>,
    ) -> Result<Participant, CoordinatorError> {
        let mut tables = self.lock()?;
        let row = tables
            .participants
            .entry((meeting_id, identity.clone()))
            .or_insert_with(|| Participant {
                meeting_id,
                identity: identity.clone(),
                display_name: display_name.to_string(),
                kind,
                status: ParticipantStatus::Joined,
                joined_at: now,
                left_at: None,
            });

        row.display_name = display_name.to_string();
        row.status = ParticipantStatus::Joined;
        row.joined_at = now;
        row.left_at = None;
        Ok(row.clone())
    }

    async fn mark_left(
        &self,
        meeting_id: MeetingId,
        identity: &ParticipantIdentity,
        now: DateTime<Utc>,
    ) -> Result<Option<Participant>, CoordinatorError> {
        let mut tables = self.lock()?;
        let Some(row) = tables.participants.get_mut(&(meeting_id, identity.clone())) else {
            return Ok(None);
        };
        if row.status != ParticipantStatus::Left {
            row.status = ParticipantStatus::Left;
            row.left_at = Some(now);
        }
        Ok(Some(row.clone()))
    }

    async fn count_active(&self, meeting_id: MeetingId) -> Result<i64, CoordinatorError> {
        let tables = self.lock()?;
        let count = tables
            .participants
            .values()
            .filter(|p| {
                p.meeting_id == meeting_id
                    && p.status == ParticipantStatus::Joined
                    && p.left_at.is_none()
            })
            .count();
        Ok(count as i64)
    }

    async fn count_total(&self, meeting_id: MeetingId) -> Result<i64, CoordinatorError> {
        let tables = self.lock()?;
        let count = tables
            .participants
            .keys()
            .filter(|(m, _)| *m == meeting_id)
            .count();
        Ok(count as i64)
    }

    async fn list_participants(
        &self,
        meeting_id: MeetingId,
    ) -> Result<Vec<Participant>, CoordinatorError> {
        let tables = self.lock()?;
        let mut rows: Vec<Participant> = tables
            .participants
            .values()
            .filter(|p| p.meeting_id == meeting_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            a.joined_at
                .cmp(&b.joined_at)
                .then_with(|| a.identity.cmp(&b.identity))
        });
        Ok(rows)
    }
}

#[async_trait]
impl SegmentsRepository for InMemoryStore {
    async fn append_segment(
        &self,
        segment: NewSegment,
    ) -> Result<TranscriptSegment, CoordinatorError> {
        let mut tables = self.lock()?;
        let rows = tables.segments.entry(segment.meeting_id).or_default();
        if rows.iter().any(|s| s.sequence == segment.sequence) {
            return Err(CoordinatorError::Database(format!(
                "duplicate segment sequence {} for meeting",
                segment.sequence
            )));
        }

        let row = TranscriptSegment {
            segment_id: Uuid::new_v4(),
            meeting_id: segment.meeting_id,
            sequence: segment.sequence,
            speaker: segment.speaker,
            text: segment.text,
            is_final: segment.is_final,
            timestamp: segment.timestamp,
            created_at: Utc::now(),
        };
        rows.push(row.clone());
        Ok(row)
    }

    async fn list_segments(
        &self,
        meeting_id: MeetingId,
    ) -> Result<Vec<TranscriptSegment>, CoordinatorError> {
        let tables = self.lock()?;
        let mut rows = tables.segments.get(&meeting_id).cloned().unwrap_or_default();
        rows.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.sequence.cmp(&b.sequence))
        });
        Ok(rows)
    }
}

#[async_trait]
impl ArtifactsRepository for InMemoryStore {
    async fn get_artifact(
        &self,
        meeting_id: MeetingId,
    ) -> Result<Option<TranscriptArtifact>, CoordinatorError> {
        Ok(self
            .lock()?
            .artifacts
            .get(&meeting_id)
            .map(|stored| stored.artifact.clone()))
    }

    async fn record_auto_save(
        &self,
        input: AutoSaveInput,
        now: DateTime<Utc>,
    ) -> Result<AutoSaveOutcome, CoordinatorError> {
        let mut tables = self.lock()?;
        let stored = tables
            .artifacts
            .entry(input.meeting_id)
            .or_insert_with(|| StoredArtifact {
                artifact: empty_artifact(input.meeting_id, now),
                claimed_at: None,
            });

        if !stored.artifact.is_partial {
            return Ok(AutoSaveOutcome::AlreadyFinal(stored.artifact.clone()));
        }

        let previous = if stored.artifact.metadata.auto_save_count == 0 {
            None
        } else {
            serde_json::to_value(&stored.artifact.metadata).ok()
        };
        let (count, count_reset) = next_auto_save_count(previous.as_ref());

        let artifact = &mut stored.artifact;
        artifact.content = input.content;
        artifact.speakers = input.speakers;
        artifact.metadata.generated_at = now;
        artifact.metadata.auto_save_count = count;
        artifact.metadata.final_segment_count = input.final_segment_count;
        artifact.updated_at = now;

        Ok(AutoSaveOutcome::Saved {
            artifact: artifact.clone(),
            count_reset,
        })
    }

    async fn write_partial(
        &self,
        write: ArtifactWrite,
        now: DateTime<Utc>,
    ) -> Result<bool, CoordinatorError> {
        let mut tables = self.lock()?;
        let stored = tables
            .artifacts
            .entry(write.meeting_id)
            .or_insert_with(|| StoredArtifact {
                artifact: empty_artifact(write.meeting_id, now),
                claimed_at: None,
            });

        if !stored.artifact.is_partial {
            return Ok(false);
        }
        apply_write(&mut stored.artifact, write, true, now);
        Ok(true)
    }

    async fn claim_finalization(
        &self,
        meeting_id: MeetingId,
        now: DateTime<Utc>,
        stale_after: Duration,
    ) -> Result<bool, CoordinatorError> {
        let mut tables = self.lock()?;
        let stored = tables
            .artifacts
            .entry(meeting_id)
            .or_insert_with(|| StoredArtifact {
                artifact: empty_artifact(meeting_id, now),
                claimed_at: None,
            });

        let stale_before = now
            - chrono::Duration::from_std(stale_after).unwrap_or_else(|_| chrono::Duration::zero());
        let claimable = match stored.artifact.finalization_state {
            FinalizationState::None => true,
            FinalizationState::Processing => {
                stored.claimed_at.map_or(true, |at| at < stale_before)
            }
            FinalizationState::Processed => false,
        };

        if claimable {
            stored.artifact.finalization_state = FinalizationState::Processing;
            stored.claimed_at = Some(now);
        }
        Ok(claimable)
    }

    async fn write_terminal(
        &self,
        write: ArtifactWrite,
        now: DateTime<Utc>,
    ) -> Result<TranscriptArtifact, CoordinatorError> {
        let mut tables = self.lock()?;
        let stored = tables
            .artifacts
            .entry(write.meeting_id)
            .or_insert_with(|| StoredArtifact {
                artifact: empty_artifact(write.meeting_id, now),
                claimed_at: None,
            });

        apply_write(&mut stored.artifact, write, false, now);
        stored.artifact.finalization_state = FinalizationState::Processed;
        Ok(stored.artifact.clone())
    }

    async fn pending_finalizations(&self) -> Result<Vec<MeetingId>, CoordinatorError> {
        let tables = self.lock()?;
        let mut pending: Vec<MeetingId> = tables
            .meetings
            .values()
            .filter(|m| m.status.is_terminal())
            .filter(|m| {
                tables.artifacts.get(&m.meeting_id).map_or(true, |stored| {
                    stored.artifact.finalization_state != FinalizationState::Processed
                })
            })
            .map(|m| m.meeting_id)
            .collect();
        pending.sort();
        Ok(pending)
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn ping(&self) -> Result<(), CoordinatorError> {
        self.lock().map(|_| ())
    }
}
