//! PostgreSQL store.
//!
//! # Security
//!
//! - All queries use parameterized statements
//! - Transcript content and display names are never logged
//! - Races are resolved inside single statements (`UPDATE ... WHERE`,
//!   `INSERT ... ON CONFLICT`) or a `SELECT ... FOR UPDATE` transaction

use super::{
    next_auto_save_count, ArtifactsRepository, AutoSaveInput, AutoSaveOutcome,
    MeetingsRepository, ParticipantsRepository, SegmentsRepository, Store,
};
use crate::errors::CoordinatorError;
use crate::models::{
    ArtifactMetadata, ArtifactWrite, FinalizationState, Meeting, MeetingStatus, NewMeeting,
    NewSegment, Participant, ParticipantKind, ParticipantStatus, Provenance, Summary,
    TranscriptArtifact, TranscriptSegment, LIVE_TRANSCRIPTION_SOURCE,
};
use crate::observability::metrics;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::types::{MeetingId, ParticipantIdentity};
use sqlx::types::Json;
use sqlx::PgPool;
use std::time::{Duration, Instant};
use tracing::instrument;
use uuid::Uuid;

const MEETING_COLUMNS: &str = "meeting_id, org_id, title, scheduled_at, duration_minutes, \
     status, share_token, is_public, started_at, ended_at, created_at, updated_at";

const PARTICIPANT_COLUMNS: &str =
    "meeting_id, identity, display_name, kind, status, joined_at, left_at";

const SEGMENT_COLUMNS: &str =
    "segment_id, meeting_id, sequence, speaker, text, is_final, timestamp, created_at";

const ARTIFACT_COLUMNS: &str = "meeting_id, content, speakers, summary, highlights, \
     action_items, follow_ups, provenance, is_partial, metadata, finalization_state, \
     created_at, updated_at";

/// Postgres-backed [`Store`].
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Times one query and records it under `sc_db_query_*`.
struct QueryTimer {
    operation: &'static str,
    start: Instant,
}

impl QueryTimer {
    fn start(operation: &'static str) -> Self {
        Self {
            operation,
            start: Instant::now(),
        }
    }

    fn finish<T>(self, result: Result<T, sqlx::Error>) -> Result<T, CoordinatorError> {
        let status = if result.is_ok() { "success" } else { "error" };
        metrics::record_db_query(self.operation, status, self.start.elapsed());
        result.map_err(|e| CoordinatorError::Database(format!("{} failed: {}", self.operation, e)))
    }
}

// ============================================================================
// Row mapping
// ============================================================================

#[derive(Debug, sqlx::FromRow)]
struct MeetingRow {
    meeting_id: Uuid,
    org_id: String,
    title: String,
    scheduled_at: DateTime<Utc>,
    duration_minutes: i32,
    status: String,
    share_token: Option<String>,
    is_public: bool,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<MeetingRow> for Meeting {
    type Error = CoordinatorError;

    fn try_from(row: MeetingRow) -> Result<Self, Self::Error> {
        let status = MeetingStatus::from_db(&row.status).ok_or_else(|| {
            CoordinatorError::Database(format!("unknown meeting status '{}'", row.status))
        })?;

        Ok(Meeting {
            meeting_id: MeetingId(row.meeting_id),
            org_id: row.org_id,
            title: row.title,
            scheduled_at: row.scheduled_at,
            duration_minutes: row.duration_minutes,
            status,
            share_token: row.share_token,
            is_public: row.is_public,
            started_at: row.started_at,
            ended_at: row.ended_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ParticipantRow {
    meeting_id: Uuid,
    identity: String,
    display_name: String,
    kind: String,
    status: String,
    joined_at: DateTime<Utc>,
    left_at: Option<DateTime<Utc>>,
}

impl TryFrom<ParticipantRow> for Participant {
    type Error = CoordinatorError;

    fn try_from(row: ParticipantRow) -> Result<Self, Self::Error> {
        let kind = ParticipantKind::from_db(&row.kind).ok_or_else(|| {
            CoordinatorError::Database(format!("unknown participant kind '{}'", row.kind))
        })?;
        let status = ParticipantStatus::from_db(&row.status).ok_or_else(|| {
            CoordinatorError::Database(format!("unknown participant status '{}'", row.status))
        })?;

        Ok(Participant {
            meeting_id: MeetingId(row.meeting_id),
            identity: ParticipantIdentity::from_stored(row.identity),
            display_name: row.display_name,
            kind,
            status,
            joined_at: row.joined_at,
            left_at: row.left_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SegmentRow {
    segment_id: Uuid,
    meeting_id: Uuid,
    sequence: i64,
    speaker: String,
    text: String,
    is_final: bool,
    timestamp: DateTime<Utc>,
    created_at: DateTime<Utc>,
}

impl From<SegmentRow> for TranscriptSegment {
    fn from(row: SegmentRow) -> Self {
        TranscriptSegment {
            segment_id: row.segment_id,
            meeting_id: MeetingId(row.meeting_id),
            sequence: row.sequence,
            speaker: row.speaker,
            text: row.text,
            is_final: row.is_final,
            timestamp: row.timestamp,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ArtifactRow {
    meeting_id: Uuid,
    content: String,
    speakers: Vec<String>,
    summary: Option<String>,
    highlights: Vec<String>,
    action_items: Vec<String>,
    follow_ups: Vec<String>,
    provenance: Option<String>,
    is_partial: bool,
    metadata: serde_json::Value,
    finalization_state: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ArtifactRow> for TranscriptArtifact {
    type Error = CoordinatorError;

    fn try_from(row: ArtifactRow) -> Result<Self, Self::Error> {
        let finalization_state =
            FinalizationState::from_db(&row.finalization_state).ok_or_else(|| {
                CoordinatorError::Database(format!(
                    "unknown finalization state '{}'",
                    row.finalization_state
                ))
            })?;

        // Metadata is a free-form document; an unreadable one is served with
        // defaults and repaired by the next write.
        let metadata = serde_json::from_value::<ArtifactMetadata>(row.metadata).unwrap_or_else(
            |e| {
                tracing::warn!(
                    target: "sc.repo.artifacts",
                    meeting_id = %row.meeting_id,
                    error = %e,
                    "Stored artifact metadata is unreadable, serving defaults"
                );
                fresh_metadata(row.updated_at, row.is_partial)
            },
        );

        let summary = match (row.summary, row.provenance.as_deref().and_then(Provenance::from_db)) {
            (Some(summary), Some(provenance)) => Some(Summary {
                summary,
                highlights: row.highlights,
                action_items: row.action_items,
                follow_ups: row.follow_ups,
                provenance,
            }),
            _ => None,
        };

        Ok(TranscriptArtifact {
            meeting_id: MeetingId(row.meeting_id),
            content: row.content,
            speakers: row.speakers,
            summary,
            is_partial: row.is_partial,
            metadata,
            finalization_state,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn fresh_metadata(now: DateTime<Utc>, is_partial: bool) -> ArtifactMetadata {
    ArtifactMetadata {
        source: LIVE_TRANSCRIPTION_SOURCE.to_string(),
        generated_at: now,
        is_partial,
        auto_save_count: 0,
        content_hash: None,
        final_segment_count: 0,
    }
}

fn write_metadata(write: &ArtifactWrite, now: DateTime<Utc>, is_partial: bool) -> ArtifactMetadata {
    ArtifactMetadata {
        content_hash: Some(write.content_hash.clone()),
        final_segment_count: write.final_segment_count,
        ..fresh_metadata(now, is_partial)
    }
}

// ============================================================================
// Meetings
// ============================================================================

#[async_trait]
impl MeetingsRepository for PgStore {
    #[instrument(skip_all, fields(org_id = %meeting.org_id))]
    async fn insert_meeting(&self, meeting: NewMeeting) -> Result<Meeting, CoordinatorError> {
        let timer = QueryTimer::start("insert_meeting");
        let row: MeetingRow = timer.finish(
            sqlx::query_as(&format!(
                r#"
                INSERT INTO meetings (meeting_id, org_id, title, scheduled_at, duration_minutes)
                VALUES ($1, $2, $3, $4, $5)
                RETURNING {MEETING_COLUMNS}
                "#
            ))
            .bind(Uuid::new_v4())
            .bind(&meeting.org_id)
            .bind(&meeting.title)
            .bind(meeting.scheduled_at)
            .bind(meeting.duration_minutes)
            .fetch_one(&self.pool)
            .await,
        )?;

        row.try_into()
    }

    #[instrument(skip_all, fields(meeting_id = %meeting_id))]
    async fn get_meeting(
        &self,
        meeting_id: MeetingId,
    ) -> Result<Option<Meeting>, CoordinatorError> {
        let timer = QueryTimer::start("get_meeting");
        let row: Option<MeetingRow> = timer.finish(
            sqlx::query_as(&format!(
                "SELECT {MEETING_COLUMNS} FROM meetings WHERE meeting_id = $1"
            ))
            .bind(meeting_id.0)
            .fetch_optional(&self.pool)
            .await,
        )?;

        row.map(Meeting::try_from).transpose()
    }

    #[instrument(skip_all, fields(meeting_id = %meeting_id, to = to.as_str()))]
    async fn transition_status(
        &self,
        meeting_id: MeetingId,
        from: &[MeetingStatus],
        to: MeetingStatus,
        now: DateTime<Utc>,
    ) -> Result<Option<Meeting>, CoordinatorError> {
        let from: Vec<&str> = from.iter().map(MeetingStatus::as_str).collect();

        let timer = QueryTimer::start("transition_status");
        let row: Option<MeetingRow> = timer.finish(
            sqlx::query_as(&format!(
                r#"
                UPDATE meetings
                SET status = $2,
                    started_at = CASE WHEN $2 = 'in_progress'
                                      THEN COALESCE(started_at, $3) ELSE started_at END,
                    ended_at = CASE WHEN $2 IN ('completed', 'cancelled')
                                    THEN $3 ELSE ended_at END,
                    updated_at = $3
                WHERE meeting_id = $1
                  AND status = ANY($4)
                RETURNING {MEETING_COLUMNS}
                "#
            ))
            .bind(meeting_id.0)
            .bind(to.as_str())
            .bind(now)
            .bind(from)
            .fetch_optional(&self.pool)
            .await,
        )?;

        row.map(Meeting::try_from).transpose()
    }

    #[instrument(skip_all)]
    async fn complete_expired(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<MeetingId>, CoordinatorError> {
        let timer = QueryTimer::start("complete_expired");
        let ids: Vec<Uuid> = timer.finish(
            sqlx::query_scalar(
                r#"
                UPDATE meetings
                SET status = 'completed', ended_at = $1, updated_at = $1
                WHERE status IN ('scheduled', 'in_progress')
                  AND scheduled_at + make_interval(mins => duration_minutes) <= $1
                RETURNING meeting_id
                "#,
            )
            .bind(now)
            .fetch_all(&self.pool)
            .await,
        )?;

        let mut ids: Vec<MeetingId> = ids.into_iter().map(MeetingId).collect();
        ids.sort();
        Ok(ids)
    }

    #[instrument(skip_all, fields(meeting_id = %meeting_id))]
    async fn publish_share_token(
        &self,
        meeting_id: MeetingId,
        candidate: &str,
    ) -> Result<Option<Meeting>, CoordinatorError> {
        // The row lock taken by UPDATE makes concurrent publishes agree on one token
        let timer = QueryTimer::start("publish_share_token");
        let row: Option<MeetingRow> = timer.finish(
            sqlx::query_as(&format!(
                r#"
                UPDATE meetings
                SET share_token = CASE WHEN is_public AND share_token IS NOT NULL
                                       THEN share_token ELSE $2 END,
                    is_public = TRUE,
                    updated_at = NOW()
                WHERE meeting_id = $1
                RETURNING {MEETING_COLUMNS}
                "#
            ))
            .bind(meeting_id.0)
            .bind(candidate)
            .fetch_optional(&self.pool)
            .await,
        )?;

        row.map(Meeting::try_from).transpose()
    }

    #[instrument(skip_all, fields(meeting_id = %meeting_id))]
    async fn revoke_share_token(&self, meeting_id: MeetingId) -> Result<bool, CoordinatorError> {
        let timer = QueryTimer::start("revoke_share_token");
        let result = timer.finish(
            sqlx::query(
                "UPDATE meetings SET is_public = FALSE, updated_at = NOW() WHERE meeting_id = $1",
            )
            .bind(meeting_id.0)
            .execute(&self.pool)
            .await,
        )?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip_all)]
    async fn find_by_share_token(
        &self,
        token: &str,
    ) -> Result<Option<Meeting>, CoordinatorError> {
        let timer = QueryTimer::start("find_by_share_token");
        let row: Option<MeetingRow> = timer.finish(
            sqlx::query_as(&format!(
                "SELECT {MEETING_COLUMNS} FROM meetings WHERE share_token = $1 AND is_public"
            ))
            .bind(token)
            .fetch_optional(&self.pool)
            .await,
        )?;

        row.map(Meeting::try_from).transpose()
    }
}

// ============================================================================
// Participants
// ============================================================================

#[async_trait]
impl ParticipantsRepository for PgStore {
    #[instrument(skip_all, fields(meeting_id = %meeting_id, kind = kind.as_str()))]
    async fn upsert_joined(
        &self,
        meeting_id: MeetingId,
        identity: &ParticipantIdentity,
        display_name: &str,
        kind: ParticipantKind,
        now: DateTime<Utc>,
    ) -> Result<Participant, CoordinatorError> {
        let timer = QueryTimer::start("upsert_participant");
        let row: ParticipantRow = timer.finish(
            sqlx::query_as(&format!(
                r#"
                INSERT INTO participants
                    (meeting_id, identity, display_name, kind, status, joined_at, left_at)
                VALUES ($1, $2, $3, $4, 'joined', $5, NULL)
                ON CONFLICT (meeting_id, identity) DO UPDATE
                SET display_name = EXCLUDED.display_name,
                    status = 'joined',
                    joined_at = EXCLUDED.joined_at,
                    left_at = NULL
                RETURNING {PARTICIPANT_COLUMNS}
                "#
            ))
            .bind(meeting_id.0)
            .bind(identity.as_str())
            .bind(display_name)
            .bind(kind.as_str())
            .bind(now)
            .fetch_one(&self.pool)
            .await,
        )?;

        row.try_into()
    }

    #[instrument(skip_all, fields(meeting_id = %meeting_id))]
    async fn mark_left(
        &self,
        meeting_id: MeetingId,
        identity: &ParticipantIdentity,
        now: DateTime<Utc>,
    ) -> Result<Option<Participant>, CoordinatorError> {
        let timer = QueryTimer::start("mark_participant_left");
        let row: Option<ParticipantRow> = timer.finish(
            sqlx::query_as(&format!(
                r#"
                UPDATE participants
                SET status = 'left', left_at = COALESCE(left_at, $3)
                WHERE meeting_id = $1 AND identity = $2
                RETURNING {PARTICIPANT_COLUMNS}
                "#
            ))
            .bind(meeting_id.0)
            .bind(identity.as_str())
            .bind(now)
            .fetch_optional(&self.pool)
            .await,
        )?;

        row.map(Participant::try_from).transpose()
    }

    #[instrument(skip_all, fields(meeting_id = %meeting_id))]
    async fn count_active(&self, meeting_id: MeetingId) -> Result<i64, CoordinatorError> {
        let timer = QueryTimer::start("count_active_participants");
        timer.finish(
            sqlx::query_scalar(
                r#"
                SELECT COUNT(*) FROM participants
                WHERE meeting_id = $1 AND status = 'joined' AND left_at IS NULL
                "#,
            )
            .bind(meeting_id.0)
            .fetch_one(&self.pool)
            .await,
        )
    }

    #[instrument(skip_all, fields(meeting_id = %meeting_id))]
    async fn count_total(&self, meeting_id: MeetingId) -> Result<i64, CoordinatorError> {
        let timer = QueryTimer::start("count_total_participants");
        timer.finish(
            sqlx::query_scalar("SELECT COUNT(*) FROM participants WHERE meeting_id = $1")
                .bind(meeting_id.0)
                .fetch_one(&self.pool)
                .await,
        )
    }

    #[instrument(skip_all, fields(meeting_id = %meeting_id))]
    async fn list_participants(
        &self,
        meeting_id: MeetingId,
    ) -> Result<Vec<Participant>, CoordinatorError> {
        let timer = QueryTimer::start("list_participants");
        let rows: Vec<ParticipantRow> = timer.finish(
            sqlx::query_as(&format!(
                r#"
                SELECT {PARTICIPANT_COLUMNS} FROM participants
                WHERE meeting_id = $1
                ORDER BY joined_at, identity
                "#
            ))
            .bind(meeting_id.0)
            .fetch_all(&self.pool)
            .await,
        )?;

        rows.into_iter().map(Participant::try_from).collect()
    }
}

// ============================================================================
// Segments
// ============================================================================

#[async_trait]
impl SegmentsRepository for PgStore {
    #[instrument(skip_all, fields(meeting_id = %segment.meeting_id, sequence = segment.sequence))]
    async fn append_segment(
        &self,
        segment: NewSegment,
    ) -> Result<TranscriptSegment, CoordinatorError> {
        let timer = QueryTimer::start("append_segment");
        let row: SegmentRow = timer.finish(
            sqlx::query_as(&format!(
                r#"
                INSERT INTO transcript_segments
                    (segment_id, meeting_id, sequence, speaker, text, is_final, timestamp)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                RETURNING {SEGMENT_COLUMNS}
                "#
            ))
            .bind(Uuid::new_v4())
            .bind(segment.meeting_id.0)
            .bind(segment.sequence)
            .bind(&segment.speaker)
            .bind(&segment.text)
            .bind(segment.is_final)
            .bind(segment.timestamp)
            .fetch_one(&self.pool)
            .await,
        )?;

        Ok(row.into())
    }

    #[instrument(skip_all, fields(meeting_id = %meeting_id))]
    async fn list_segments(
        &self,
        meeting_id: MeetingId,
    ) -> Result<Vec<TranscriptSegment>, CoordinatorError> {
        let timer = QueryTimer::start("list_segments");
        let rows: Vec<SegmentRow> = timer.finish(
            sqlx::query_as(&format!(
                r#"
                SELECT {SEGMENT_COLUMNS} FROM transcript_segments
                WHERE meeting_id = $1
                ORDER BY timestamp, sequence
                "#
            ))
            .bind(meeting_id.0)
            .fetch_all(&self.pool)
            .await,
        )?;

        Ok(rows.into_iter().map(TranscriptSegment::from).collect())
    }
}

// ============================================================================
// Artifacts
// ============================================================================

#[async_trait]
impl ArtifactsRepository for PgStore {
    #[instrument(skip_all, fields(meeting_id = %meeting_id))]
    async fn get_artifact(
        &self,
        meeting_id: MeetingId,
    ) -> Result<Option<TranscriptArtifact>, CoordinatorError> {
        let timer = QueryTimer::start("get_artifact");
        let row: Option<ArtifactRow> = timer.finish(
            sqlx::query_as(&format!(
                "SELECT {ARTIFACT_COLUMNS} FROM transcripts WHERE meeting_id = $1"
            ))
            .bind(meeting_id.0)
            .fetch_optional(&self.pool)
            .await,
        )?;

        row.map(TranscriptArtifact::try_from).transpose()
    }

    #[instrument(skip_all, fields(meeting_id = %input.meeting_id))]
    async fn record_auto_save(
        &self,
        input: AutoSaveInput,
        now: DateTime<Utc>,
    ) -> Result<AutoSaveOutcome, CoordinatorError> {
        let timer = QueryTimer::start("record_auto_save");
        let result: Result<(ArtifactRow, Option<bool>), sqlx::Error> = async {
            let mut tx = self.pool.begin().await?;

            sqlx::query(
                r#"
                INSERT INTO transcripts (meeting_id, metadata)
                VALUES ($1, $2)
                ON CONFLICT (meeting_id) DO NOTHING
                "#,
            )
            .bind(input.meeting_id.0)
            .bind(Json(fresh_metadata(now, true)))
            .execute(&mut *tx)
            .await?;

            // Row lock serializes concurrent saves on the counter
            let current: ArtifactRow = sqlx::query_as(&format!(
                "SELECT {ARTIFACT_COLUMNS} FROM transcripts WHERE meeting_id = $1 FOR UPDATE"
            ))
            .bind(input.meeting_id.0)
            .fetch_one(&mut *tx)
            .await?;

            if !current.is_partial {
                tx.commit().await?;
                return Ok((current, None));
            }

            let (count, count_reset) = next_auto_save_count(Some(&current.metadata));
            let mut metadata = serde_json::from_value::<ArtifactMetadata>(current.metadata)
                .unwrap_or_else(|_| fresh_metadata(now, true));
            metadata.generated_at = now;
            metadata.is_partial = true;
            metadata.auto_save_count = count;
            metadata.final_segment_count = input.final_segment_count;

            let updated: ArtifactRow = sqlx::query_as(&format!(
                r#"
                UPDATE transcripts
                SET content = $2, speakers = $3, metadata = $4, updated_at = $5
                WHERE meeting_id = $1
                RETURNING {ARTIFACT_COLUMNS}
                "#
            ))
            .bind(input.meeting_id.0)
            .bind(&input.content)
            .bind(&input.speakers)
            .bind(Json(&metadata))
            .bind(now)
            .fetch_one(&mut *tx)
            .await?;

            tx.commit().await?;
            Ok((updated, Some(count_reset)))
        }
        .await;

        let (row, count_reset) = timer.finish(result)?;
        let artifact = TranscriptArtifact::try_from(row)?;
        Ok(match count_reset {
            Some(count_reset) => AutoSaveOutcome::Saved {
                artifact,
                count_reset,
            },
            None => AutoSaveOutcome::AlreadyFinal(artifact),
        })
    }

    #[instrument(skip_all, fields(meeting_id = %write.meeting_id))]
    async fn write_partial(
        &self,
        write: ArtifactWrite,
        now: DateTime<Utc>,
    ) -> Result<bool, CoordinatorError> {
        let metadata = write_metadata(&write, now, true);

        // Existing auto_save_count survives the merge
        let timer = QueryTimer::start("write_partial_artifact");
        let written: Option<Uuid> = timer.finish(
            sqlx::query_scalar(
                r#"
                INSERT INTO transcripts
                    (meeting_id, content, speakers, summary, highlights, action_items,
                     follow_ups, provenance, is_partial, metadata, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, TRUE, $9, $10, $10)
                ON CONFLICT (meeting_id) DO UPDATE
                SET content = EXCLUDED.content,
                    speakers = EXCLUDED.speakers,
                    summary = EXCLUDED.summary,
                    highlights = EXCLUDED.highlights,
                    action_items = EXCLUDED.action_items,
                    follow_ups = EXCLUDED.follow_ups,
                    provenance = EXCLUDED.provenance,
                    metadata = transcripts.metadata || (EXCLUDED.metadata - 'auto_save_count'),
                    updated_at = EXCLUDED.updated_at
                WHERE transcripts.is_partial
                RETURNING meeting_id
                "#,
            )
            .bind(write.meeting_id.0)
            .bind(&write.content)
            .bind(&write.speakers)
            .bind(&write.summary.summary)
            .bind(&write.summary.highlights)
            .bind(&write.summary.action_items)
            .bind(&write.summary.follow_ups)
            .bind(write.summary.provenance.as_str())
            .bind(Json(&metadata))
            .bind(now)
            .fetch_optional(&self.pool)
            .await,
        )?;

        Ok(written.is_some())
    }

    #[instrument(skip_all, fields(meeting_id = %meeting_id))]
    async fn claim_finalization(
        &self,
        meeting_id: MeetingId,
        now: DateTime<Utc>,
        stale_after: Duration,
    ) -> Result<bool, CoordinatorError> {
        let stale_before = now
            - chrono::Duration::from_std(stale_after).unwrap_or_else(|_| chrono::Duration::zero());

        let timer = QueryTimer::start("claim_finalization");
        let claimed: Option<Uuid> = timer.finish(
            sqlx::query_scalar(
                r#"
                INSERT INTO transcripts
                    (meeting_id, metadata, finalization_state, finalization_claimed_at)
                VALUES ($1, $2, 'processing', $3)
                ON CONFLICT (meeting_id) DO UPDATE
                SET finalization_state = 'processing',
                    finalization_claimed_at = EXCLUDED.finalization_claimed_at
                WHERE transcripts.finalization_state = 'none'
                   OR (transcripts.finalization_state = 'processing'
                       AND transcripts.finalization_claimed_at < $4)
                RETURNING meeting_id
                "#,
            )
            .bind(meeting_id.0)
            .bind(Json(fresh_metadata(now, true)))
            .bind(now)
            .bind(stale_before)
            .fetch_optional(&self.pool)
            .await,
        )?;

        Ok(claimed.is_some())
    }

    #[instrument(skip_all, fields(meeting_id = %write.meeting_id))]
    async fn write_terminal(
        &self,
        write: ArtifactWrite,
        now: DateTime<Utc>,
    ) -> Result<TranscriptArtifact, CoordinatorError> {
        let metadata = write_metadata(&write, now, false);

        let timer = QueryTimer::start("write_terminal_artifact");
        let row: ArtifactRow = timer.finish(
            sqlx::query_as(&format!(
                r#"
                INSERT INTO transcripts
                    (meeting_id, content, speakers, summary, highlights, action_items,
                     follow_ups, provenance, is_partial, metadata, finalization_state,
                     created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, FALSE, $9, 'processed', $10, $10)
                ON CONFLICT (meeting_id) DO UPDATE
                SET content = EXCLUDED.content,
                    speakers = EXCLUDED.speakers,
                    summary = EXCLUDED.summary,
                    highlights = EXCLUDED.highlights,
                    action_items = EXCLUDED.action_items,
                    follow_ups = EXCLUDED.follow_ups,
                    provenance = EXCLUDED.provenance,
                    is_partial = FALSE,
                    metadata = transcripts.metadata || (EXCLUDED.metadata - 'auto_save_count'),
                    finalization_state = 'processed',
                    updated_at = EXCLUDED.updated_at
                RETURNING {ARTIFACT_COLUMNS}
                "#
            ))
            .bind(write.meeting_id.0)
            .bind(&write.content)
            .bind(&write.speakers)
            .bind(&write.summary.summary)
            .bind(&write.summary.highlights)
            .bind(&write.summary.action_items)
            .bind(&write.summary.follow_ups)
            .bind(write.summary.provenance.as_str())
            .bind(Json(&metadata))
            .bind(now)
            .fetch_one(&self.pool)
            .await,
        )?;

        row.try_into()
    }

    #[instrument(skip_all)]
    async fn pending_finalizations(&self) -> Result<Vec<MeetingId>, CoordinatorError> {
        let timer = QueryTimer::start("pending_finalizations");
        let ids: Vec<Uuid> = timer.finish(
            sqlx::query_scalar(
                r#"
                SELECT m.meeting_id
                FROM meetings m
                LEFT JOIN transcripts t ON t.meeting_id = m.meeting_id
                WHERE m.status IN ('completed', 'cancelled')
                  AND (t.meeting_id IS NULL OR t.finalization_state <> 'processed')
                ORDER BY m.meeting_id
                "#,
            )
            .fetch_all(&self.pool)
            .await,
        )?;

        Ok(ids.into_iter().map(MeetingId).collect())
    }
}

#[async_trait]
impl Store for PgStore {
    async fn ping(&self) -> Result<(), CoordinatorError> {
        let timer = QueryTimer::start("ping");
        timer
            .finish(sqlx::query("SELECT 1").execute(&self.pool).await)
            .map(|_| ())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn artifact_row(metadata: serde_json::Value) -> ArtifactRow {
        ArtifactRow {
            meeting_id: Uuid::nil(),
            content: "Alice: hello".to_string(),
            speakers: vec!["Alice".to_string()],
            summary: Some("Greeting".to_string()),
            highlights: vec!["Said hello".to_string()],
            action_items: vec![],
            follow_ups: vec![],
            provenance: Some("ai".to_string()),
            is_partial: false,
            metadata,
            finalization_state: "processed".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_artifact_row_maps_summary_columns() {
        let metadata = serde_json::to_value(fresh_metadata(Utc::now(), false)).unwrap();
        let artifact = TranscriptArtifact::try_from(artifact_row(metadata)).unwrap();

        let summary = artifact.summary.expect("summary columns present");
        assert_eq!(summary.summary, "Greeting");
        assert_eq!(summary.provenance, Provenance::Ai);
        assert_eq!(artifact.finalization_state, FinalizationState::Processed);
    }

    #[test]
    fn test_artifact_row_tolerates_corrupt_metadata() {
        let artifact =
            TranscriptArtifact::try_from(artifact_row(serde_json::json!("garbage"))).unwrap();
        assert_eq!(artifact.metadata.auto_save_count, 0);
        assert!(!artifact.metadata.is_partial);
    }

    #[test]
    fn test_unknown_status_is_a_database_error() {
        let row = MeetingRow {
            meeting_id: Uuid::nil(),
            org_id: "org".to_string(),
            title: "t".to_string(),
            scheduled_at: Utc::now(),
            duration_minutes: 30,
            status: "archived".to_string(),
            share_token: None,
            is_public: false,
            started_at: None,
            ended_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert!(matches!(
            Meeting::try_from(row),
            Err(CoordinatorError::Database(_))
        ));
    }

    // Store-level races below run against a real database per test.

    async fn seeded(
        store: &PgStore,
        scheduled_at: DateTime<Utc>,
    ) -> Result<Meeting, anyhow::Error> {
        Ok(store
            .insert_meeting(NewMeeting {
                org_id: "org-1".to_string(),
                title: "Design review".to_string(),
                scheduled_at,
                duration_minutes: 30,
            })
            .await?)
    }

    fn write(meeting_id: MeetingId, content: &str) -> ArtifactWrite {
        ArtifactWrite {
            meeting_id,
            content: content.to_string(),
            speakers: vec!["Alice".to_string()],
            summary: Summary {
                summary: "Reviewed the design".to_string(),
                highlights: vec!["Agreed on the API".to_string()],
                action_items: vec![],
                follow_ups: vec![],
                provenance: Provenance::Ai,
            },
            content_hash: "abc".to_string(),
            final_segment_count: 1,
        }
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_claim_retaken_only_when_stale(pool: PgPool) -> Result<(), anyhow::Error> {
        let store = PgStore::new(pool);
        let meeting = seeded(&store, Utc::now()).await?;
        let stale_after = Duration::from_secs(600);
        let now = Utc::now();

        assert!(store.claim_finalization(meeting.meeting_id, now, stale_after).await?);
        assert!(!store.claim_finalization(meeting.meeting_id, now, stale_after).await?);

        let later = now + ChronoDuration::seconds(601);
        assert!(store.claim_finalization(meeting.meeting_id, later, stale_after).await?);

        let artifact = store
            .get_artifact(meeting.meeting_id)
            .await?
            .expect("claim creates the artifact row");
        assert_eq!(artifact.finalization_state, FinalizationState::Processing);
        assert!(artifact.is_partial);

        store
            .write_terminal(write(meeting.meeting_id, "done"), later)
            .await?;
        let much_later = later + ChronoDuration::hours(2);
        assert!(!store
            .claim_finalization(meeting.meeting_id, much_later, stale_after)
            .await?);

        Ok(())
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_concurrent_auto_saves_all_count(pool: PgPool) -> Result<(), anyhow::Error> {
        let store = PgStore::new(pool);
        let meeting = seeded(&store, Utc::now()).await?;
        let input = || AutoSaveInput {
            meeting_id: meeting.meeting_id,
            content: "Alice: hi".to_string(),
            speakers: vec!["Alice".to_string()],
            final_segment_count: 1,
        };

        let saves = (0..10).map(|_| store.record_auto_save(input(), Utc::now()));
        let mut counts = Vec::new();
        for outcome in futures::future::try_join_all(saves).await? {
            assert!(matches!(outcome, AutoSaveOutcome::Saved { count_reset: false, .. }));
            if let AutoSaveOutcome::Saved { artifact, .. } = outcome {
                counts.push(artifact.metadata.auto_save_count);
            }
        }
        counts.sort_unstable();
        assert_eq!(counts, (1..=10).collect::<Vec<u32>>());

        let stored = store
            .get_artifact(meeting.meeting_id)
            .await?
            .expect("auto-save creates the artifact row");
        assert_eq!(stored.metadata.auto_save_count, 10);
        assert!(stored.is_partial);

        Ok(())
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_partial_after_terminal_is_noop(pool: PgPool) -> Result<(), anyhow::Error> {
        let store = PgStore::new(pool);
        let meeting = seeded(&store, Utc::now()).await?;

        assert!(store
            .write_partial(write(meeting.meeting_id, "first"), Utc::now())
            .await?);
        let terminal = store
            .write_terminal(write(meeting.meeting_id, "final"), Utc::now())
            .await?;
        assert!(!terminal.is_partial);
        assert_eq!(terminal.finalization_state, FinalizationState::Processed);

        assert!(!store
            .write_partial(write(meeting.meeting_id, "late"), Utc::now())
            .await?);
        let outcome = store
            .record_auto_save(
                AutoSaveInput {
                    meeting_id: meeting.meeting_id,
                    content: "late".to_string(),
                    speakers: vec![],
                    final_segment_count: 0,
                },
                Utc::now(),
            )
            .await?;
        assert!(matches!(outcome, AutoSaveOutcome::AlreadyFinal(ref a) if !a.is_partial));

        let artifact = store
            .get_artifact(meeting.meeting_id)
            .await?
            .expect("terminal artifact present");
        assert_eq!(artifact.content, "final");
        assert!(!artifact.is_partial);

        Ok(())
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_complete_expired_sweeps_once(pool: PgPool) -> Result<(), anyhow::Error> {
        let store = PgStore::new(pool);
        let overdue = seeded(&store, Utc::now() - ChronoDuration::minutes(31)).await?;
        let upcoming = seeded(&store, Utc::now() + ChronoDuration::minutes(30)).await?;
        let now = Utc::now();

        assert_eq!(store.complete_expired(now).await?, vec![overdue.meeting_id]);
        assert!(store.complete_expired(now).await?.is_empty());

        let swept = store
            .get_meeting(overdue.meeting_id)
            .await?
            .expect("meeting exists");
        assert_eq!(swept.status, MeetingStatus::Completed);
        assert!(swept.ended_at.is_some());

        let untouched = store
            .get_meeting(upcoming.meeting_id)
            .await?
            .expect("meeting exists");
        assert_eq!(untouched.status, MeetingStatus::Scheduled);

        // Completed without a processed artifact until the terminal write lands
        assert_eq!(store.pending_finalizations().await?, vec![overdue.meeting_id]);
        store
            .write_terminal(write(overdue.meeting_id, "done"), now)
            .await?;
        assert!(store.pending_finalizations().await?.is_empty());

        Ok(())
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_interleaved_presence_keeps_one_row(pool: PgPool) -> Result<(), anyhow::Error> {
        let store = PgStore::new(pool);
        let meeting_id = seeded(&store, Utc::now()).await?.meeting_id;
        let identity = ParticipantIdentity::user("user-ada");
        store
            .upsert_joined(
                meeting_id,
                &identity,
                "Ada",
                ParticipantKind::Member,
                Utc::now(),
            )
            .await?;

        let updates = (0..20).map(|i| {
            let store = store.clone();
            let identity = identity.clone();
            async move {
                if i % 2 == 0 {
                    store
                        .mark_left(meeting_id, &identity, Utc::now())
                        .await
                        .map(|_| ())
                } else {
                    store
                        .upsert_joined(
                            meeting_id,
                            &identity,
                            "Ada",
                            ParticipantKind::Member,
                            Utc::now(),
                        )
                        .await
                        .map(|_| ())
                }
            }
        });
        futures::future::try_join_all(updates).await?;

        let rows = store.list_participants(meeting_id).await?;
        assert_eq!(rows.len(), 1);
        let total = store.count_total(meeting_id).await?;
        let active = store.count_active(meeting_id).await?;
        assert_eq!(total, 1);
        assert!((0..=total).contains(&active));

        Ok(())
    }
}
