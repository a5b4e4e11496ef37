//! Transcript handlers.
//!
//! - `POST /api/v1/meetings/:id/segments` - Ingest one segment
//! - `GET /api/v1/meetings/:id/segments` - Segments in canonical order
//! - `POST /api/v1/meetings/:id/transcript/auto-save` - Partial save, no AI
//! - `GET /api/v1/meetings/:id/transcript` - Current artifact

use crate::errors::CoordinatorError;
use crate::handlers::parse_body;
use crate::models::{AppendSegmentRequest, ArtifactResponse, SegmentAck, SegmentResponse};
use crate::routes::AppState;
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use common::jwt::UserClaims;
use common::types::MeetingId;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

/// Handler for POST /api/v1/meetings/:id/segments
///
/// # Response
///
/// - 201 Created: Segment persisted with its assigned sequence
/// - 400 Bad Request: Missing speaker or text, or over-long fields
/// - 410 Gone: Meeting ended or transcript already finalized
#[instrument(
    skip_all,
    name = "sc.transcript.append",
    fields(method = "POST", endpoint = "/api/v1/meetings/{id}/segments", meeting_id = %meeting_id)
)]
pub async fn append_segment(
    State(state): State<Arc<AppState>>,
    Path(meeting_id): Path<Uuid>,
    Extension(claims): Extension<UserClaims>,
    body: Bytes,
) -> Result<(StatusCode, Json<SegmentAck>), CoordinatorError> {
    let request: AppendSegmentRequest = parse_body(&body, "append_segment")?;

    let segment = state
        .meetings
        .append_segment(MeetingId::from(meeting_id), &claims, request)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(SegmentAck {
            accepted: true,
            segment_id: segment.segment_id,
            sequence: segment.sequence,
        }),
    ))
}

/// Handler for GET /api/v1/meetings/:id/segments
#[instrument(
    skip_all,
    name = "sc.transcript.list",
    fields(method = "GET", endpoint = "/api/v1/meetings/{id}/segments", meeting_id = %meeting_id)
)]
pub async fn list_segments(
    State(state): State<Arc<AppState>>,
    Path(meeting_id): Path<Uuid>,
    Extension(claims): Extension<UserClaims>,
) -> Result<Json<Vec<SegmentResponse>>, CoordinatorError> {
    let segments = state
        .meetings
        .list_segments(MeetingId::from(meeting_id), &claims)
        .await?;
    Ok(Json(segments.iter().map(SegmentResponse::from).collect()))
}

/// Handler for POST /api/v1/meetings/:id/transcript/auto-save
///
/// Safe to retry. Once the transcript is final, returns the final artifact
/// unchanged.
#[instrument(
    skip_all,
    name = "sc.transcript.auto_save",
    fields(
        method = "POST",
        endpoint = "/api/v1/meetings/{id}/transcript/auto-save",
        meeting_id = %meeting_id
    )
)]
pub async fn auto_save(
    State(state): State<Arc<AppState>>,
    Path(meeting_id): Path<Uuid>,
    Extension(claims): Extension<UserClaims>,
) -> Result<Json<ArtifactResponse>, CoordinatorError> {
    let artifact = state
        .meetings
        .auto_save(MeetingId::from(meeting_id), &claims)
        .await?;
    Ok(Json(ArtifactResponse::from(&artifact)))
}

/// Handler for GET /api/v1/meetings/:id/transcript
#[instrument(
    skip_all,
    name = "sc.transcript.get",
    fields(method = "GET", endpoint = "/api/v1/meetings/{id}/transcript", meeting_id = %meeting_id)
)]
pub async fn get_transcript(
    State(state): State<Arc<AppState>>,
    Path(meeting_id): Path<Uuid>,
    Extension(claims): Extension<UserClaims>,
) -> Result<Json<ArtifactResponse>, CoordinatorError> {
    let artifact = state
        .meetings
        .get_artifact(MeetingId::from(meeting_id), &claims)
        .await?;
    Ok(Json(ArtifactResponse::from(&artifact)))
}
