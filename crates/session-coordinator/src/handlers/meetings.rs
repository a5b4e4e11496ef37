//! Meeting handlers.
//!
//! - `POST /api/v1/meetings/:id/join` - Join as a member
//! - `GET /api/v1/meetings/:id` - Meeting record with presence counts
//! - `POST /api/v1/meetings/:id/status` - Request a status transition
//! - `POST /api/v1/meetings/:id/end` - End the meeting and finalize its transcript
//!
//! All routes require a user token (`require_user_auth`) and membership in
//! the meeting's organization.

use crate::errors::CoordinatorError;
use crate::handlers::parse_body;
use crate::models::{JoinMeetingRequest, JoinMeetingResponse, MeetingResponse, TransitionRequest};
use crate::routes::AppState;
use crate::services::token_issuer::IssuedCredential;
use axum::{
    body::Bytes,
    extract::{Path, State},
    Extension, Json,
};
use common::jwt::UserClaims;
use common::types::MeetingId;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

impl From<IssuedCredential> for JoinMeetingResponse {
    fn from(issued: IssuedCredential) -> Self {
        Self {
            credential: issued.credential,
            server_endpoint: issued.server_endpoint,
            room_name: issued.room_name,
            display_name: issued.display_name,
            identity: issued.identity.as_str().to_string(),
            expires_in: issued.expires_in,
        }
    }
}

/// Handler for POST /api/v1/meetings/:id/join
///
/// The body is optional; `display_name` overrides the name from the token.
///
/// # Response
///
/// - 200 OK: Credential issued, meeting IN_PROGRESS, presence recorded
/// - 400 Bad Request: Invalid body or display name
/// - 401 Unauthorized: Invalid token or foreign organization
/// - 404 Not Found: Unknown meeting
/// - 410 Gone: Meeting COMPLETED or CANCELLED
/// - 500 Internal Server Error: Media credentials not configured
#[instrument(
    skip_all,
    name = "sc.meeting.join",
    fields(method = "POST", endpoint = "/api/v1/meetings/{id}/join", meeting_id = %meeting_id)
)]
pub async fn join_meeting(
    State(state): State<Arc<AppState>>,
    Path(meeting_id): Path<Uuid>,
    Extension(claims): Extension<UserClaims>,
    body: Bytes,
) -> Result<Json<JoinMeetingResponse>, CoordinatorError> {
    let request: JoinMeetingRequest = if body.is_empty() {
        JoinMeetingRequest::default()
    } else {
        parse_body(&body, "join_meeting")?
    };

    let issued = state
        .meetings
        .join(
            MeetingId::from(meeting_id),
            &claims,
            request.display_name.as_deref(),
        )
        .await?;

    Ok(Json(issued.into()))
}

/// Handler for GET /api/v1/meetings/:id
#[instrument(
    skip_all,
    name = "sc.meeting.get",
    fields(method = "GET", endpoint = "/api/v1/meetings/{id}", meeting_id = %meeting_id)
)]
pub async fn get_meeting(
    State(state): State<Arc<AppState>>,
    Path(meeting_id): Path<Uuid>,
    Extension(claims): Extension<UserClaims>,
) -> Result<Json<MeetingResponse>, CoordinatorError> {
    let meeting = state
        .meetings
        .get(MeetingId::from(meeting_id), &claims)
        .await?;
    Ok(Json(meeting))
}

/// Handler for POST /api/v1/meetings/:id/status
///
/// # Response
///
/// - 200 OK: Meeting record after the transition
/// - 409 Conflict: Backward move or move out of a terminal state
#[instrument(
    skip_all,
    name = "sc.meeting.status",
    fields(method = "POST", endpoint = "/api/v1/meetings/{id}/status", meeting_id = %meeting_id)
)]
pub async fn update_status(
    State(state): State<Arc<AppState>>,
    Path(meeting_id): Path<Uuid>,
    Extension(claims): Extension<UserClaims>,
    body: Bytes,
) -> Result<Json<MeetingResponse>, CoordinatorError> {
    let request: TransitionRequest = parse_body(&body, "update_status")?;

    let meeting = state
        .meetings
        .transition(MeetingId::from(meeting_id), &claims, request.target_status)
        .await?;
    Ok(Json(meeting))
}

/// Handler for POST /api/v1/meetings/:id/end
///
/// Returns once the meeting is COMPLETED; the transcript pass runs in the
/// background.
#[instrument(
    skip_all,
    name = "sc.meeting.end",
    fields(method = "POST", endpoint = "/api/v1/meetings/{id}/end", meeting_id = %meeting_id)
)]
pub async fn end_meeting(
    State(state): State<Arc<AppState>>,
    Path(meeting_id): Path<Uuid>,
    Extension(claims): Extension<UserClaims>,
) -> Result<Json<MeetingResponse>, CoordinatorError> {
    let meeting = state
        .meetings
        .end(MeetingId::from(meeting_id), &claims)
        .await?;
    Ok(Json(meeting))
}
