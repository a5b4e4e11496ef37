//! Room access credentials.
//!
//! Credentials are HS256 JWTs signed with the media-room API secret and
//! scoped to a single room. The media server verifies them on connect; this
//! service verifies them again when a room participant reports presence.
//!
//! # Security
//!
//! - The signing secret is held as `SecretString` and never logged
//! - Credentials are size-checked before parsing
//! - Verification failures return one generic message

use crate::config::{Config, MAX_TOKEN_TTL_SECONDS};
use crate::errors::CoordinatorError;
use crate::models::{Meeting, ParticipantKind};
use chrono::Utc;
use common::jwt::check_token_shape;
use common::secret::{ExposeSecret, SecretString};
use common::types::ParticipantIdentity;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::instrument;
use uuid::Uuid;

const INVALID_CREDENTIAL: &str = "The room credential is invalid or expired";

/// Permissions granted inside one room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoGrant {
    pub room: String,
    pub room_join: bool,
    pub can_publish: bool,
    pub can_subscribe: bool,
    pub can_publish_data: bool,
}

/// Participant metadata embedded in the credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialMetadata {
    pub kind: ParticipantKind,
}

/// Claims of a room credential.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomClaims {
    /// Media API key the credential was issued under.
    pub iss: String,

    /// Participant identity.
    pub sub: String,

    /// Display name.
    pub name: String,

    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
    pub jti: String,
    pub video: VideoGrant,

    /// JSON-encoded [`CredentialMetadata`].
    pub metadata: String,
}

impl RoomClaims {
    pub fn identity(&self) -> ParticipantIdentity {
        ParticipantIdentity::from_stored(self.sub.clone())
    }

    /// Participant kind from the metadata claim. Identities with the guest
    /// prefix are guests even when the metadata is unreadable.
    pub fn kind(&self) -> ParticipantKind {
        serde_json::from_str::<CredentialMetadata>(&self.metadata)
            .map(|m| m.kind)
            .unwrap_or_else(|_| {
                if self.identity().is_guest() {
                    ParticipantKind::Guest
                } else {
                    ParticipantKind::Member
                }
            })
    }
}

/// A freshly minted credential and everything a client needs to connect.
#[derive(Debug, Clone)]
pub struct IssuedCredential {
    pub credential: String,
    pub server_endpoint: String,
    pub room_name: String,
    pub display_name: String,
    pub identity: ParticipantIdentity,
    pub expires_in: u64,
}

/// Mints and verifies room credentials.
#[derive(Clone)]
pub struct AccessTokenIssuer {
    api_key: Option<String>,
    api_secret: Option<SecretString>,
    server_endpoint: String,
    member_ttl_seconds: u64,
    guest_ttl_seconds: u64,
}

impl AccessTokenIssuer {
    /// Build an issuer. Guest TTL is capped at the member TTL and both at 24 hours.
    pub fn new(
        api_key: Option<String>,
        api_secret: Option<SecretString>,
        server_endpoint: String,
        member_ttl_seconds: u64,
        guest_ttl_seconds: u64,
    ) -> Self {
        let member_ttl_seconds = member_ttl_seconds.min(MAX_TOKEN_TTL_SECONDS);
        Self {
            api_key,
            api_secret,
            server_endpoint,
            member_ttl_seconds,
            guest_ttl_seconds: guest_ttl_seconds.min(member_ttl_seconds),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.media_api_key.clone(),
            config.media_api_secret.clone(),
            config.media_server_url.clone(),
            config.member_token_ttl_seconds,
            config.guest_token_ttl_seconds,
        )
    }

    pub fn ttl_for(&self, kind: ParticipantKind) -> u64 {
        match kind {
            ParticipantKind::Member => self.member_ttl_seconds,
            ParticipantKind::Guest => self.guest_ttl_seconds,
        }
    }

    fn signing_material(&self) -> Result<(&str, &SecretString), CoordinatorError> {
        match (self.api_key.as_deref(), self.api_secret.as_ref()) {
            (Some(key), Some(secret)) => Ok((key, secret)),
            _ => {
                tracing::error!(
                    target: "sc.service.token_issuer",
                    "MEDIA_API_KEY and MEDIA_API_SECRET must both be configured to issue credentials"
                );
                Err(CoordinatorError::Configuration(
                    "Media credentials are not configured".to_string(),
                ))
            }
        }
    }

    /// Mint a room credential for `identity` in `meeting`.
    ///
    /// # Errors
    ///
    /// - `MeetingEnded` when the meeting is COMPLETED or CANCELLED
    /// - `Configuration` when the media API key or secret is missing
    #[instrument(skip_all, fields(meeting_id = %meeting.meeting_id, kind = kind.as_str()))]
    pub fn issue_token(
        &self,
        meeting: &Meeting,
        identity: &ParticipantIdentity,
        display_name: &str,
        kind: ParticipantKind,
    ) -> Result<IssuedCredential, CoordinatorError> {
        if meeting.status.is_terminal() {
            return Err(CoordinatorError::MeetingEnded(
                "Meeting has ended".to_string(),
            ));
        }

        let (api_key, api_secret) = self.signing_material()?;
        let ttl = self.ttl_for(kind);
        let now = Utc::now().timestamp();
        let room_name = meeting.meeting_id.room_name();

        let metadata = serde_json::to_string(&CredentialMetadata { kind }).map_err(|e| {
            CoordinatorError::Internal(format!("Failed to encode credential metadata: {e}"))
        })?;

        let claims = RoomClaims {
            iss: api_key.to_string(),
            sub: identity.as_str().to_string(),
            name: display_name.to_string(),
            iat: now,
            nbf: now,
            exp: now + i64::try_from(ttl).unwrap_or(i64::MAX / 2),
            jti: Uuid::new_v4().to_string(),
            video: VideoGrant {
                room: room_name.clone(),
                room_join: true,
                can_publish: true,
                can_subscribe: true,
                can_publish_data: true,
            },
            metadata,
        };

        let credential = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(api_secret.expose_secret().as_bytes()),
        )
        .map_err(|e| CoordinatorError::Internal(format!("Failed to sign room credential: {e}")))?;

        tracing::debug!(target: "sc.service.token_issuer", ttl_seconds = ttl, "Room credential issued");

        Ok(IssuedCredential {
            credential,
            server_endpoint: self.server_endpoint.clone(),
            room_name,
            display_name: display_name.to_string(),
            identity: identity.clone(),
            expires_in: ttl,
        })
    }

    /// Verify a credential minted by [`issue_token`](Self::issue_token).
    ///
    /// # Errors
    ///
    /// - `Unauthorized` for any signature, issuer, or expiry failure
    /// - `Configuration` when the media API key or secret is missing
    #[instrument(skip_all)]
    pub fn verify_credential(&self, token: &str) -> Result<RoomClaims, CoordinatorError> {
        check_token_shape(token).map_err(|e| {
            tracing::debug!(target: "sc.service.token_issuer", error = ?e, "Credential shape rejected");
            CoordinatorError::Unauthorized(INVALID_CREDENTIAL.to_string())
        })?;

        let (api_key, api_secret) = self.signing_material()?;

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.validate_nbf = true;
        validation.set_issuer(&[api_key]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);

        let data = decode::<RoomClaims>(
            token,
            &DecodingKey::from_secret(api_secret.expose_secret().as_bytes()),
            &validation,
        )
        .map_err(|e| {
            tracing::debug!(target: "sc.service.token_issuer", error = %e, "Credential verification failed");
            CoordinatorError::Unauthorized(INVALID_CREDENTIAL.to_string())
        })?;

        Ok(data.claims)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::models::MeetingStatus;
    use common::types::MeetingId;

    fn issuer() -> AccessTokenIssuer {
        AccessTokenIssuer::new(
            Some("APIkey123".to_string()),
            Some(SecretString::from("media-secret-at-least-32-bytes-long!!".to_string())),
            "wss://media.example.com".to_string(),
            21_600,
            900,
        )
    }

    fn meeting(status: MeetingStatus) -> Meeting {
        let now = Utc::now();
        Meeting {
            meeting_id: MeetingId::new(),
            org_id: "org-1".to_string(),
            title: "Planning".to_string(),
            scheduled_at: now,
            duration_minutes: 60,
            status,
            share_token: None,
            is_public: false,
            started_at: None,
            ended_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_issue_and_verify_member_credential() {
        let issuer = issuer();
        let meeting = meeting(MeetingStatus::Scheduled);
        let identity = ParticipantIdentity::user("user-1");

        let issued = issuer
            .issue_token(&meeting, &identity, "Alice", ParticipantKind::Member)
            .unwrap();
        assert_eq!(issued.expires_in, 21_600);
        assert_eq!(issued.room_name, meeting.meeting_id.to_string());
        assert_eq!(issued.server_endpoint, "wss://media.example.com");

        let claims = issuer.verify_credential(&issued.credential).unwrap();
        assert_eq!(claims.iss, "APIkey123");
        assert_eq!(claims.sub, "user-1");
        assert_eq!(claims.name, "Alice");
        assert_eq!(claims.video.room, meeting.meeting_id.room_name());
        assert!(claims.video.room_join && claims.video.can_publish_data);
        assert_eq!(claims.kind(), ParticipantKind::Member);
        assert_eq!(claims.exp - claims.iat, 21_600);
    }

    #[test]
    fn test_video_grant_uses_camel_case() {
        let grant = VideoGrant {
            room: "r".to_string(),
            room_join: true,
            can_publish: true,
            can_subscribe: true,
            can_publish_data: false,
        };
        let json = serde_json::to_value(&grant).unwrap();
        assert_eq!(json["roomJoin"], true);
        assert_eq!(json["canPublishData"], false);
    }

    #[test]
    fn test_guest_ttl_is_shorter_and_capped() {
        let issuer = issuer();
        assert_eq!(issuer.ttl_for(ParticipantKind::Guest), 900);

        let capped = AccessTokenIssuer::new(None, None, String::new(), 1_000_000, 2_000_000);
        assert_eq!(capped.ttl_for(ParticipantKind::Member), MAX_TOKEN_TTL_SECONDS);
        assert_eq!(capped.ttl_for(ParticipantKind::Guest), MAX_TOKEN_TTL_SECONDS);
    }

    #[test]
    fn test_terminal_meeting_rejected() {
        let issuer = issuer();
        for status in [MeetingStatus::Completed, MeetingStatus::Cancelled] {
            let result = issuer.issue_token(
                &meeting(status),
                &ParticipantIdentity::user("user-1"),
                "Alice",
                ParticipantKind::Member,
            );
            assert!(matches!(result, Err(CoordinatorError::MeetingEnded(_))));
        }
    }

    #[test]
    fn test_missing_secret_is_configuration_error() {
        let issuer = AccessTokenIssuer::new(
            Some("key".to_string()),
            None,
            "wss://media".to_string(),
            60,
            60,
        );
        let result = issuer.issue_token(
            &meeting(MeetingStatus::Scheduled),
            &ParticipantIdentity::user("user-1"),
            "Alice",
            ParticipantKind::Member,
        );
        assert!(matches!(result, Err(CoordinatorError::Configuration(_))));
    }

    #[test]
    fn test_credential_from_other_secret_rejected() {
        let other = AccessTokenIssuer::new(
            Some("APIkey123".to_string()),
            Some(SecretString::from("a-completely-different-secret-value".to_string())),
            "wss://media".to_string(),
            60,
            60,
        );
        let issued = other
            .issue_token(
                &meeting(MeetingStatus::InProgress),
                &ParticipantIdentity::guest(Uuid::new_v4()),
                "Guest",
                ParticipantKind::Guest,
            )
            .unwrap();

        let result = issuer().verify_credential(&issued.credential);
        assert!(matches!(result, Err(CoordinatorError::Unauthorized(_))));
    }

    #[test]
    fn test_guest_kind_round_trips_through_metadata() {
        let issuer = issuer();
        let issued = issuer
            .issue_token(
                &meeting(MeetingStatus::InProgress),
                &ParticipantIdentity::guest(Uuid::new_v4()),
                "Visitor",
                ParticipantKind::Guest,
            )
            .unwrap();

        let claims = issuer.verify_credential(&issued.credential).unwrap();
        assert_eq!(claims.kind(), ParticipantKind::Guest);
        assert!(claims.identity().is_guest());
        assert_eq!(claims.exp - claims.iat, 900);
    }
}
