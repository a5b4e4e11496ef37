//! Public sharing handlers.
//!
//! - `POST /api/v1/meetings/:id/share` - Publish a share token (user authenticated)
//! - `DELETE /api/v1/meetings/:id/share` - Revoke it (user authenticated)
//! - `GET /api/v1/share/:token` - Sanitized meeting summary (public)
//! - `POST /api/v1/share/:token/join` - Join as a guest (public)
//!
//! # Security
//!
//! - Public responses never carry the organization id, the share token, or
//!   participant identities
//! - Unknown, malformed and revoked tokens are indistinguishable (404)

use crate::errors::{CoordinatorError, ErrorDetail};
use crate::handlers::parse_body;
use crate::models::{
    GuestJoinRequest, JoinMeetingResponse, PublicMeetingSummary, ShareTokenResponse,
};
use crate::routes::AppState;
use crate::services::sharing::ShareResolution;
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension, Json,
};
use common::jwt::UserClaims;
use common::types::MeetingId;
use serde::Serialize;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

/// 410 body for a share link whose meeting has ended.
#[derive(Serialize)]
struct EndedShareResponse {
    error: ErrorDetail,
    meeting: PublicMeetingSummary,
}

/// Handler for POST /api/v1/meetings/:id/share
///
/// Returns the current token while the meeting is public, otherwise a new one.
#[instrument(
    skip_all,
    name = "sc.share.create",
    fields(method = "POST", endpoint = "/api/v1/meetings/{id}/share", meeting_id = %meeting_id)
)]
pub async fn create_share(
    State(state): State<Arc<AppState>>,
    Path(meeting_id): Path<Uuid>,
    Extension(claims): Extension<UserClaims>,
) -> Result<Json<ShareTokenResponse>, CoordinatorError> {
    let meeting_id = MeetingId::from(meeting_id);
    state.meetings.authorize(meeting_id, &claims).await?;

    let token = state.sharing.generate_share_token(meeting_id).await?;
    Ok(Json(ShareTokenResponse {
        token,
        is_public: true,
    }))
}

/// Handler for DELETE /api/v1/meetings/:id/share
#[instrument(
    skip_all,
    name = "sc.share.revoke",
    fields(method = "DELETE", endpoint = "/api/v1/meetings/{id}/share", meeting_id = %meeting_id)
)]
pub async fn revoke_share(
    State(state): State<Arc<AppState>>,
    Path(meeting_id): Path<Uuid>,
    Extension(claims): Extension<UserClaims>,
) -> Result<StatusCode, CoordinatorError> {
    let meeting_id = MeetingId::from(meeting_id);
    state.meetings.authorize(meeting_id, &claims).await?;

    state.sharing.revoke_share_token(meeting_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Handler for GET /api/v1/share/:token
///
/// # Response
///
/// - 200 OK: Meeting can still be joined
/// - 404 Not Found: Unknown or revoked token
/// - 410 Gone: Meeting ended; the sanitized summary is attached as `meeting`
#[instrument(
    skip_all,
    name = "sc.share.resolve",
    fields(method = "GET", endpoint = "/api/v1/share/{token}")
)]
pub async fn resolve_share(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
) -> Result<Response, CoordinatorError> {
    let response = match state.sharing.resolve_share_token(&token).await? {
        ShareResolution::Joinable(summary) => Json(summary).into_response(),
        ShareResolution::Ended(summary) => (
            StatusCode::GONE,
            Json(EndedShareResponse {
                error: ErrorDetail {
                    code: "MEETING_ENDED".to_string(),
                    message: "Meeting has ended".to_string(),
                },
                meeting: summary,
            }),
        )
            .into_response(),
    };
    Ok(response)
}

/// Handler for POST /api/v1/share/:token/join
///
/// # Response
///
/// - 200 OK: Guest credential issued
/// - 400 Bad Request: Missing or over-long display name
/// - 404 Not Found: Unknown or revoked token
/// - 410 Gone: Meeting ended
#[instrument(
    skip_all,
    name = "sc.share.join",
    fields(method = "POST", endpoint = "/api/v1/share/{token}/join")
)]
pub async fn join_by_share(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
    body: Bytes,
) -> Result<Json<JoinMeetingResponse>, CoordinatorError> {
    let request: GuestJoinRequest = parse_body(&body, "join_by_share")?;

    let issued = state
        .sharing
        .join_by_share_token(&token, &request.display_name)
        .await?;

    Ok(Json(issued.into()))
}
