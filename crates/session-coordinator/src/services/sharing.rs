//! Public share links.
//!
//! A share token is 32 CSPRNG bytes, hex encoded, bound to one meeting. It
//! lets anonymous callers read a sanitized meeting summary and join as a
//! guest with a short-lived credential. Revocation clears `is_public`; the
//! next publish mints a fresh token.

use crate::errors::CoordinatorError;
use crate::models::{normalize_display_name, Meeting, ParticipantKind, PublicMeetingSummary};
use crate::observability::metrics;
use crate::repositories::Store;
use crate::services::presence::PresenceTracker;
use crate::services::state_machine::SessionStateMachine;
use crate::services::token_issuer::{AccessTokenIssuer, IssuedCredential};
use common::types::{MeetingId, ParticipantIdentity};
use ring::rand::{SecureRandom, SystemRandom};
use std::sync::Arc;
use tracing::instrument;

/// Random bytes in a share token.
const SHARE_TOKEN_BYTES: usize = 32;

/// Hex length of a share token.
pub const SHARE_TOKEN_LENGTH: usize = SHARE_TOKEN_BYTES * 2;

/// Outcome of resolving a share token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShareResolution {
    /// The meeting can still be joined.
    Joinable(PublicMeetingSummary),

    /// The meeting is COMPLETED or CANCELLED; the summary stays readable.
    Ended(PublicMeetingSummary),
}

impl ShareResolution {
    pub fn summary(&self) -> &PublicMeetingSummary {
        match self {
            ShareResolution::Joinable(summary) | ShareResolution::Ended(summary) => summary,
        }
    }
}

/// Generate a share token from the system CSPRNG.
///
/// # Errors
///
/// Returns `CoordinatorError::Internal` if the CSPRNG fails.
pub fn generate_share_token(rng: &SystemRandom) -> Result<String, CoordinatorError> {
    let mut bytes = [0u8; SHARE_TOKEN_BYTES];
    rng.fill(&mut bytes).map_err(|e| {
        tracing::error!(
            target: "sc.service.sharing",
            error = ?e,
            "CSPRNG failure generating share token"
        );
        CoordinatorError::Internal("Failed to generate share token".to_string())
    })?;
    Ok(hex::encode(bytes))
}

/// Generate a guest identity (`guest-<uuid>`) from CSPRNG bytes.
///
/// # Errors
///
/// Returns `CoordinatorError::Internal` if the CSPRNG fails.
pub fn generate_guest_identity(
    rng: &SystemRandom,
) -> Result<ParticipantIdentity, CoordinatorError> {
    let mut bytes = [0u8; 16];
    rng.fill(&mut bytes).map_err(|e| {
        tracing::error!(
            target: "sc.service.sharing",
            error = ?e,
            "CSPRNG failure generating guest id"
        );
        CoordinatorError::Internal("Failed to generate guest identity".to_string())
    })?;
    Ok(ParticipantIdentity::guest(
        uuid::Builder::from_random_bytes(bytes).into_uuid(),
    ))
}

fn looks_like_share_token(token: &str) -> bool {
    token.len() == SHARE_TOKEN_LENGTH && token.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Anonymous, link-based access to meetings.
#[derive(Clone)]
pub struct SharingGateway {
    store: Arc<dyn Store>,
    state_machine: SessionStateMachine,
    presence: PresenceTracker,
    issuer: AccessTokenIssuer,
    rng: SystemRandom,
}

impl SharingGateway {
    pub fn new(
        store: Arc<dyn Store>,
        state_machine: SessionStateMachine,
        presence: PresenceTracker,
        issuer: AccessTokenIssuer,
    ) -> Self {
        Self {
            store,
            state_machine,
            presence,
            issuer,
            rng: SystemRandom::new(),
        }
    }

    /// Publish the meeting's share token, reusing the current one while it
    /// is public. Returns the effective token.
    #[instrument(skip_all, fields(meeting_id = %meeting_id))]
    pub async fn generate_share_token(
        &self,
        meeting_id: MeetingId,
    ) -> Result<String, CoordinatorError> {
        let candidate = generate_share_token(&self.rng)?;
        let meeting = self
            .store
            .publish_share_token(meeting_id, &candidate)
            .await?
            .ok_or_else(|| CoordinatorError::NotFound("Meeting not found".to_string()))?;

        meeting.share_token.ok_or_else(|| {
            CoordinatorError::Internal("Share token missing after publish".to_string())
        })
    }

    /// Stop the current token from granting access.
    #[instrument(skip_all, fields(meeting_id = %meeting_id))]
    pub async fn revoke_share_token(&self, meeting_id: MeetingId) -> Result<(), CoordinatorError> {
        if self.store.revoke_share_token(meeting_id).await? {
            Ok(())
        } else {
            Err(CoordinatorError::NotFound("Meeting not found".to_string()))
        }
    }

    async fn find_public(&self, token: &str) -> Result<Meeting, CoordinatorError> {
        let not_found = || CoordinatorError::NotFound("Share link not found".to_string());
        if !looks_like_share_token(token) {
            return Err(not_found());
        }
        self.store
            .find_by_share_token(token)
            .await?
            .ok_or_else(not_found)
    }

    /// Resolve a token to a sanitized meeting summary.
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown or revoked tokens.
    #[instrument(skip_all)]
    pub async fn resolve_share_token(
        &self,
        token: &str,
    ) -> Result<ShareResolution, CoordinatorError> {
        let meeting = self.find_public(token).await?;
        let active_participants = self.presence.active_count(meeting.meeting_id).await?;

        let summary = PublicMeetingSummary {
            meeting_id: meeting.meeting_id,
            title: meeting.title,
            scheduled_at: meeting.scheduled_at,
            duration_minutes: meeting.duration_minutes,
            status: meeting.status,
            active_participants,
        };

        Ok(if meeting.status.is_terminal() {
            ShareResolution::Ended(summary)
        } else {
            ShareResolution::Joinable(summary)
        })
    }

    /// Join a meeting as an anonymous guest.
    ///
    /// # Errors
    ///
    /// - `BadRequest` for an empty or over-long display name
    /// - `NotFound` for unknown or revoked tokens
    /// - `MeetingEnded` for COMPLETED or CANCELLED meetings
    #[instrument(skip_all)]
    pub async fn join_by_share_token(
        &self,
        token: &str,
        display_name: &str,
    ) -> Result<IssuedCredential, CoordinatorError> {
        let result = self.join_guest(token, display_name).await;
        match &result {
            Ok(_) => metrics::record_join(ParticipantKind::Guest.as_str(), "success", None),
            Err(e) => metrics::record_join(
                ParticipantKind::Guest.as_str(),
                "error",
                Some(e.metric_label()),
            ),
        }
        result
    }

    async fn join_guest(
        &self,
        token: &str,
        display_name: &str,
    ) -> Result<IssuedCredential, CoordinatorError> {
        let display_name = normalize_display_name(display_name)
            .map_err(|msg| CoordinatorError::BadRequest(msg.to_string()))?;

        let meeting = self.find_public(token).await?;
        if meeting.status.is_terminal() {
            return Err(CoordinatorError::MeetingEnded(
                "Meeting has ended".to_string(),
            ));
        }

        let identity = generate_guest_identity(&self.rng)?;

        // Sign first so a misconfigured issuer leaves no side effects
        let issued = self.issuer.issue_token(
            &meeting,
            &identity,
            &display_name,
            ParticipantKind::Guest,
        )?;

        self.state_machine
            .ensure_in_progress(meeting.meeting_id, "guest_join")
            .await?;
        self.presence
            .mark_joined(
                meeting.meeting_id,
                &identity,
                &display_name,
                ParticipantKind::Guest,
            )
            .await?;

        tracing::info!(
            target: "sc.service.sharing",
            meeting_id = %meeting.meeting_id,
            "Guest joined through share link"
        );
        Ok(issued)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::models::{MeetingStatus, NewMeeting};
    use crate::repositories::{InMemoryStore, MeetingsRepository, ParticipantsRepository};
    use chrono::Utc;
    use common::secret::SecretString;

    async fn setup() -> (SharingGateway, Arc<InMemoryStore>, MeetingId) {
        let store = Arc::new(InMemoryStore::new());
        let meeting = store
            .insert_meeting(NewMeeting {
                org_id: "org-secret".to_string(),
                title: "Town hall".to_string(),
                scheduled_at: Utc::now(),
                duration_minutes: 60,
            })
            .await
            .unwrap();

        let dyn_store: Arc<dyn Store> = store.clone();
        let gateway = SharingGateway::new(
            dyn_store.clone(),
            SessionStateMachine::new(dyn_store.clone()),
            PresenceTracker::new(dyn_store),
            AccessTokenIssuer::new(
                Some("key".to_string()),
                Some(SecretString::from("a-long-enough-room-signing-secret".to_string())),
                "wss://media".to_string(),
                3600,
                900,
            ),
        );
        (gateway, store, meeting.meeting_id)
    }

    #[test]
    fn test_share_token_format() {
        let rng = SystemRandom::new();
        let token = generate_share_token(&rng).unwrap();
        assert_eq!(token.len(), 64);
        assert!(looks_like_share_token(&token));
        assert_ne!(token, generate_share_token(&rng).unwrap());
    }

    #[test]
    fn test_guest_identity_format() {
        let identity = generate_guest_identity(&SystemRandom::new()).unwrap();
        assert!(identity.is_guest());
        assert_eq!(identity.as_str().len(), "guest-".len() + 36);
    }

    #[tokio::test]
    async fn test_generate_is_idempotent_until_revoked() {
        let (gateway, _, meeting_id) = setup().await;

        let first = gateway.generate_share_token(meeting_id).await.unwrap();
        let second = gateway.generate_share_token(meeting_id).await.unwrap();
        assert_eq!(first, second);

        gateway.revoke_share_token(meeting_id).await.unwrap();
        assert!(matches!(
            gateway.resolve_share_token(&first).await,
            Err(CoordinatorError::NotFound(_))
        ));

        let third = gateway.generate_share_token(meeting_id).await.unwrap();
        assert_ne!(first, third);
    }

    #[tokio::test]
    async fn test_resolve_returns_sanitized_summary() {
        let (gateway, _, meeting_id) = setup().await;
        let token = gateway.generate_share_token(meeting_id).await.unwrap();

        let resolution = gateway.resolve_share_token(&token).await.unwrap();
        assert!(matches!(resolution, ShareResolution::Joinable(_)));
        let summary = resolution.summary();
        assert_eq!(summary.meeting_id, meeting_id);
        assert_eq!(summary.title, "Town hall");

        let json = serde_json::to_string(summary).unwrap();
        assert!(!json.contains("org-secret"));
        assert!(!json.contains(&token));
    }

    #[tokio::test]
    async fn test_unknown_and_malformed_tokens_not_found() {
        let (gateway, _, _) = setup().await;
        let unknown = "ab".repeat(32);
        for token in ["nope", unknown.as_str()] {
            assert!(matches!(
                gateway.resolve_share_token(token).await,
                Err(CoordinatorError::NotFound(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_ended_meeting_resolves_but_rejects_join() {
        let (gateway, store, meeting_id) = setup().await;
        let token = gateway.generate_share_token(meeting_id).await.unwrap();
        store
            .transition_status(
                meeting_id,
                &[MeetingStatus::Scheduled],
                MeetingStatus::Completed,
                Utc::now(),
            )
            .await
            .unwrap();

        let resolution = gateway.resolve_share_token(&token).await.unwrap();
        assert!(matches!(resolution, ShareResolution::Ended(_)));
        assert_eq!(resolution.summary().status, MeetingStatus::Completed);

        let join = gateway.join_by_share_token(&token, "Visitor").await;
        assert!(matches!(join, Err(CoordinatorError::MeetingEnded(_))));
    }

    #[tokio::test]
    async fn test_guest_join_starts_meeting_and_records_presence() {
        let (gateway, store, meeting_id) = setup().await;
        let token = gateway.generate_share_token(meeting_id).await.unwrap();

        let issued = gateway
            .join_by_share_token(&token, "  Visitor  ")
            .await
            .unwrap();
        assert_eq!(issued.display_name, "Visitor");
        assert!(issued.identity.is_guest());
        assert_eq!(issued.expires_in, 900);

        let meeting = store.get_meeting(meeting_id).await.unwrap().unwrap();
        assert_eq!(meeting.status, MeetingStatus::InProgress);
        assert_eq!(store.count_active(meeting_id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_guests_get_distinct_rows() {
        let (gateway, store, meeting_id) = setup().await;
        let token = gateway.generate_share_token(meeting_id).await.unwrap();

        let (a, b) = tokio::join!(
            gateway.join_by_share_token(&token, "Guest A"),
            gateway.join_by_share_token(&token, "Guest B"),
        );
        assert_ne!(a.unwrap().identity, b.unwrap().identity);
        assert_eq!(store.count_total(meeting_id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_display_name_validation() {
        let (gateway, _, meeting_id) = setup().await;
        let token = gateway.generate_share_token(meeting_id).await.unwrap();

        let too_long = "x".repeat(65);
        for name in ["", "   ", too_long.as_str()] {
            assert!(matches!(
                gateway.join_by_share_token(&token, name).await,
                Err(CoordinatorError::BadRequest(_))
            ));
        }
        assert!(gateway
            .join_by_share_token(&token, &"x".repeat(64))
            .await
            .is_ok());
    }
}
