//! Presence handler.
//!
//! - `POST /api/v1/rooms/:id/presence` - Report JOINED or LEFT
//!
//! Authenticated with the caller's room credential (`require_room_credential`).
//! The identity comes from the credential, never from the body, and the
//! credential must be scoped to the room in the path.

use crate::errors::CoordinatorError;
use crate::handlers::parse_body;
use crate::models::{ParticipantStatus, PresenceRequest, PresenceResponse};
use crate::observability::metrics;
use crate::routes::AppState;
use crate::services::token_issuer::RoomClaims;
use axum::{
    body::Bytes,
    extract::{Path, State},
    Extension, Json,
};
use common::types::MeetingId;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

/// Handler for POST /api/v1/rooms/:id/presence
///
/// # Response
///
/// - 200 OK: `success` is false for a LEFT from an identity that never joined
/// - 401 Unauthorized: Credential invalid or issued for another room
#[instrument(
    skip_all,
    name = "sc.presence.update",
    fields(method = "POST", endpoint = "/api/v1/rooms/{id}/presence", meeting_id = %meeting_id)
)]
pub async fn update_presence(
    State(state): State<Arc<AppState>>,
    Path(meeting_id): Path<Uuid>,
    Extension(claims): Extension<RoomClaims>,
    body: Bytes,
) -> Result<Json<PresenceResponse>, CoordinatorError> {
    let meeting_id = MeetingId::from(meeting_id);
    if claims.video.room != meeting_id.room_name() {
        tracing::debug!(
            target: "sc.handlers.presence",
            meeting_id = %meeting_id,
            "Room credential scoped to a different room"
        );
        return Err(CoordinatorError::Unauthorized(
            "The room credential is invalid or expired".to_string(),
        ));
    }

    let request: PresenceRequest = parse_body(&body, "update_presence")?;
    let identity = claims.identity();

    let success = match request.status {
        ParticipantStatus::Joined => {
            state
                .presence
                .mark_joined(meeting_id, &identity, &claims.name, claims.kind())
                .await?;
            true
        }
        ParticipantStatus::Left => state.presence.mark_left(meeting_id, &identity).await?,
    };

    metrics::record_presence_update(request.status.as_str(), success);

    Ok(Json(PresenceResponse { success }))
}
