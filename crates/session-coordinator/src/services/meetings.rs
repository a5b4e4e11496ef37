//! Authenticated meeting operations.
//!
//! Every call first loads the meeting and checks that the caller belongs to
//! its organization. Writes to the transcript stream go through the meeting's
//! actor; finalization is requested from the registry and never awaited.

use crate::actors::{FinalizeTrigger, MeetingRegistryHandle, SegmentInput};
use crate::errors::CoordinatorError;
use crate::models::{
    normalize_display_name, AppendSegmentRequest, Meeting, MeetingResponse, MeetingStatus,
    ParticipantKind, TranscriptArtifact, TranscriptSegment,
};
use crate::observability::metrics;
use crate::repositories::Store;
use crate::services::presence::PresenceTracker;
use crate::services::state_machine::SessionStateMachine;
use crate::services::token_issuer::{AccessTokenIssuer, IssuedCredential};
use common::jwt::UserClaims;
use common::types::{MeetingId, ParticipantIdentity};
use std::sync::Arc;
use tracing::instrument;

#[derive(Clone)]
pub struct MeetingService {
    store: Arc<dyn Store>,
    state_machine: SessionStateMachine,
    presence: PresenceTracker,
    issuer: AccessTokenIssuer,
    registry: MeetingRegistryHandle,
}

impl MeetingService {
    pub fn new(
        store: Arc<dyn Store>,
        state_machine: SessionStateMachine,
        presence: PresenceTracker,
        issuer: AccessTokenIssuer,
        registry: MeetingRegistryHandle,
    ) -> Self {
        Self {
            store,
            state_machine,
            presence,
            issuer,
            registry,
        }
    }

    /// Load a meeting the caller's organization owns.
    ///
    /// # Errors
    ///
    /// - `NotFound` for unknown meetings
    /// - `Unauthorized` when the caller belongs to another organization
    pub async fn authorize(
        &self,
        meeting_id: MeetingId,
        claims: &UserClaims,
    ) -> Result<Meeting, CoordinatorError> {
        let meeting = self
            .store
            .get_meeting(meeting_id)
            .await?
            .ok_or_else(|| CoordinatorError::NotFound("Meeting not found".to_string()))?;

        if !claims.is_member_of(&meeting.org_id) {
            tracing::debug!(
                target: "sc.service.meetings",
                meeting_id = %meeting_id,
                "Caller is not a member of the meeting's organization"
            );
            return Err(CoordinatorError::Unauthorized(
                "Not a member of this organization".to_string(),
            ));
        }

        Ok(meeting)
    }

    /// Join as an authenticated member.
    ///
    /// The display name defaults to the token's `name`, then to the user id.
    #[instrument(skip_all, fields(meeting_id = %meeting_id))]
    pub async fn join(
        &self,
        meeting_id: MeetingId,
        claims: &UserClaims,
        display_name: Option<&str>,
    ) -> Result<IssuedCredential, CoordinatorError> {
        let result = self.join_member(meeting_id, claims, display_name).await;
        match &result {
            Ok(_) => metrics::record_join(ParticipantKind::Member.as_str(), "success", None),
            Err(e) => metrics::record_join(
                ParticipantKind::Member.as_str(),
                "error",
                Some(e.metric_label()),
            ),
        }
        result
    }

    async fn join_member(
        &self,
        meeting_id: MeetingId,
        claims: &UserClaims,
        display_name: Option<&str>,
    ) -> Result<IssuedCredential, CoordinatorError> {
        let meeting = self.authorize(meeting_id, claims).await?;

        let requested = display_name
            .or(claims.name.as_deref())
            .unwrap_or(claims.sub.as_str());
        let display_name = normalize_display_name(requested)
            .map_err(|msg| CoordinatorError::BadRequest(msg.to_string()))?;

        let identity = ParticipantIdentity::user(&claims.sub);

        let issued = self.issuer.issue_token(
            &meeting,
            &identity,
            &display_name,
            ParticipantKind::Member,
        )?;

        self.state_machine
            .ensure_in_progress(meeting_id, "join")
            .await?;
        self.presence
            .mark_joined(meeting_id, &identity, &display_name, ParticipantKind::Member)
            .await?;

        tracing::info!(
            target: "sc.service.meetings",
            meeting_id = %meeting_id,
            "Member joined meeting"
        );
        Ok(issued)
    }

    /// Meeting record with presence counts.
    pub async fn get(
        &self,
        meeting_id: MeetingId,
        claims: &UserClaims,
    ) -> Result<MeetingResponse, CoordinatorError> {
        let meeting = self.authorize(meeting_id, claims).await?;
        let (active, total) = self.presence.counts(meeting_id).await?;
        Ok(MeetingResponse::from_meeting(&meeting, active, total))
    }

    /// Apply a requested status change. Entering a terminal state requests
    /// finalization without waiting for it.
    #[instrument(skip_all, fields(meeting_id = %meeting_id, target = target.as_str()))]
    pub async fn transition(
        &self,
        meeting_id: MeetingId,
        claims: &UserClaims,
        target: MeetingStatus,
    ) -> Result<MeetingResponse, CoordinatorError> {
        self.authorize(meeting_id, claims).await?;

        let meeting = self
            .state_machine
            .transition(meeting_id, target, "api")
            .await?;

        if meeting.status.is_terminal() {
            self.request_finalization(meeting_id, FinalizeTrigger::StatusChange)
                .await;
        }

        let (active, total) = self.presence.counts(meeting_id).await?;
        Ok(MeetingResponse::from_meeting(&meeting, active, total))
    }

    /// End the meeting: COMPLETED (unless already terminal) plus a terminal pass.
    #[instrument(skip_all, fields(meeting_id = %meeting_id))]
    pub async fn end(
        &self,
        meeting_id: MeetingId,
        claims: &UserClaims,
    ) -> Result<MeetingResponse, CoordinatorError> {
        let meeting = self.authorize(meeting_id, claims).await?;

        let meeting = if meeting.status.is_terminal() {
            meeting
        } else {
            self.state_machine
                .transition(meeting_id, MeetingStatus::Completed, "end_meeting")
                .await?
        };

        self.request_finalization(meeting_id, FinalizeTrigger::EndMeeting)
            .await;

        let (active, total) = self.presence.counts(meeting_id).await?;
        Ok(MeetingResponse::from_meeting(&meeting, active, total))
    }

    /// Failures are logged only: the status change already happened and
    /// the sweep's recovery pass picks up anything left unfinished.
    async fn request_finalization(&self, meeting_id: MeetingId, trigger: FinalizeTrigger) {
        match self.registry.finalize(meeting_id, trigger).await {
            Ok(outcome) => {
                tracing::debug!(
                    target: "sc.service.meetings",
                    meeting_id = %meeting_id,
                    trigger = trigger.as_str(),
                    outcome = ?outcome,
                    "Finalization requested"
                );
            }
            Err(e) => {
                tracing::warn!(
                    target: "sc.service.meetings",
                    meeting_id = %meeting_id,
                    trigger = trigger.as_str(),
                    error = %e,
                    "Failed to request finalization"
                );
            }
        }
    }

    /// Append one transcript segment through the meeting's actor.
    #[instrument(skip_all, fields(meeting_id = %meeting_id, is_final = request.is_final))]
    pub async fn append_segment(
        &self,
        meeting_id: MeetingId,
        claims: &UserClaims,
        request: AppendSegmentRequest,
    ) -> Result<TranscriptSegment, CoordinatorError> {
        request
            .validate()
            .map_err(|msg| CoordinatorError::BadRequest(msg.to_string()))?;

        let meeting = self.authorize(meeting_id, claims).await?;
        if meeting.status.is_terminal() {
            return Err(CoordinatorError::MeetingEnded(
                "Meeting has ended".to_string(),
            ));
        }

        let actor = self.registry.start(meeting_id).await?;
        actor
            .append_segment(SegmentInput {
                speaker: request.speaker,
                text: request.text,
                is_final: request.is_final,
                timestamp: request.timestamp,
            })
            .await
    }

    /// All segments in canonical order.
    pub async fn list_segments(
        &self,
        meeting_id: MeetingId,
        claims: &UserClaims,
    ) -> Result<Vec<TranscriptSegment>, CoordinatorError> {
        self.authorize(meeting_id, claims).await?;
        self.store.list_segments(meeting_id).await
    }

    /// Partial save of the raw transcript.
    #[instrument(skip_all, fields(meeting_id = %meeting_id))]
    pub async fn auto_save(
        &self,
        meeting_id: MeetingId,
        claims: &UserClaims,
    ) -> Result<TranscriptArtifact, CoordinatorError> {
        let meeting = self.authorize(meeting_id, claims).await?;
        if meeting.status.is_terminal() {
            return Err(CoordinatorError::MeetingEnded(
                "Meeting has ended".to_string(),
            ));
        }

        self.registry.start(meeting_id).await?.auto_save().await
    }

    /// Current artifact, partial or final.
    pub async fn get_artifact(
        &self,
        meeting_id: MeetingId,
        claims: &UserClaims,
    ) -> Result<TranscriptArtifact, CoordinatorError> {
        self.authorize(meeting_id, claims).await?;
        self.store
            .get_artifact(meeting_id)
            .await?
            .ok_or_else(|| CoordinatorError::NotFound("Transcript not found".to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::actors::{MeetingContext, MeetingRegistry, PipelineSettings};
    use crate::models::{NewMeeting, ParticipantStatus, Provenance};
    use crate::repositories::{
        ArtifactsRepository, InMemoryStore, MeetingsRepository, ParticipantsRepository,
    };
    use crate::services::summarizer::AiSummarizer;
    use crate::services::text_generator::mock::MockTextGenerator;
    use chrono::Utc;
    use common::secret::SecretString;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    struct Harness {
        service: MeetingService,
        store: Arc<InMemoryStore>,
        generator: Arc<MockTextGenerator>,
    }

    fn issuer() -> AccessTokenIssuer {
        AccessTokenIssuer::new(
            Some("APIkey".to_string()),
            Some(SecretString::from("media-secret".to_string())),
            "ws://media.test".to_string(),
            3600,
            600,
        )
    }

    fn harness() -> Harness {
        let store = Arc::new(InMemoryStore::new());
        let generator = Arc::new(MockTextGenerator::summarizing());
        let state_machine = SessionStateMachine::new(store.clone());
        let ctx = MeetingContext {
            store: store.clone(),
            state_machine: state_machine.clone(),
            summarizer: Arc::new(AiSummarizer::new(generator.clone(), Duration::from_secs(5))),
            settings: PipelineSettings {
                min_final_segments: 5,
                refresh_interval_segments: 20,
                finalization_stale_after: Duration::from_secs(600),
            },
        };
        let (registry, _task) = MeetingRegistry::spawn(ctx, CancellationToken::new());

        let service = MeetingService::new(
            store.clone(),
            state_machine,
            PresenceTracker::new(store.clone()),
            issuer(),
            registry,
        );
        Harness {
            service,
            store,
            generator,
        }
    }

    fn claims(sub: &str, org_id: &str) -> UserClaims {
        let now = Utc::now().timestamp();
        UserClaims {
            sub: sub.to_string(),
            org_id: org_id.to_string(),
            name: Some(format!("User {sub}")),
            exp: now + 3600,
            iat: now,
        }
    }

    async fn meeting(store: &InMemoryStore) -> MeetingId {
        store
            .insert_meeting(NewMeeting {
                org_id: "org-1".to_string(),
                title: "Planning".to_string(),
                scheduled_at: Utc::now(),
                duration_minutes: 30,
            })
            .await
            .unwrap()
            .meeting_id
    }

    fn segment(text: &str) -> AppendSegmentRequest {
        AppendSegmentRequest {
            speaker: "Alice".to_string(),
            text: text.to_string(),
            is_final: true,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_member_join_starts_meeting_and_records_presence() {
        let h = harness();
        let id = meeting(&h.store).await;

        let issued = h.service.join(id, &claims("u1", "org-1"), None).await.unwrap();
        assert_eq!(issued.display_name, "User u1");
        assert_eq!(issued.room_name, id.room_name());
        assert_eq!(issued.expires_in, 3600);

        let record = h.service.get(id, &claims("u1", "org-1")).await.unwrap();
        assert_eq!(record.status, MeetingStatus::InProgress);
        assert_eq!((record.active_participants, record.total_participants), (1, 1));

        let rows = h.store.list_participants(id).await.unwrap();
        assert_eq!(rows.first().unwrap().status, ParticipantStatus::Joined);
    }

    #[tokio::test]
    async fn test_other_org_is_unauthorized() {
        let h = harness();
        let id = meeting(&h.store).await;

        let result = h.service.join(id, &claims("u2", "org-2"), None).await;
        assert!(matches!(result, Err(CoordinatorError::Unauthorized(_))));
        assert_eq!(h.store.count_total(id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_completed_meeting_rejects_join() {
        let h = harness();
        let id = meeting(&h.store).await;
        h.service.end(id, &claims("u1", "org-1")).await.unwrap();

        let result = h.service.join(id, &claims("u1", "org-1"), None).await;
        assert!(matches!(result, Err(CoordinatorError::MeetingEnded(_))));
    }

    #[tokio::test]
    async fn test_backward_transition_rejected() {
        let h = harness();
        let id = meeting(&h.store).await;
        let caller = claims("u1", "org-1");

        h.service
            .transition(id, &caller, MeetingStatus::InProgress)
            .await
            .unwrap();
        let result = h
            .service
            .transition(id, &caller, MeetingStatus::Scheduled)
            .await;
        assert!(matches!(result, Err(CoordinatorError::InvalidTransition(_))));
    }

    #[tokio::test]
    async fn test_end_after_five_segments_writes_ai_artifact() {
        let h = harness();
        let id = meeting(&h.store).await;
        let caller = claims("u1", "org-1");

        for i in 0..5 {
            h.service
                .append_segment(id, &caller, segment(&format!("item {i}")))
                .await
                .unwrap();
        }
        let ended = h.service.end(id, &caller).await.unwrap();
        assert_eq!(ended.status, MeetingStatus::Completed);

        let mut artifact = None;
        for _ in 0..200 {
            match h.store.get_artifact(id).await.unwrap() {
                Some(a) if !a.is_partial => {
                    artifact = Some(a);
                    break;
                }
                _ => tokio::time::sleep(Duration::from_millis(10)).await,
            }
        }
        let artifact = artifact.expect("terminal artifact");
        let summary = artifact.summary.unwrap();
        assert_eq!(summary.provenance, Provenance::Ai);
        assert!(!summary.highlights.is_empty());
        assert_eq!(h.generator.call_count(), 1);

        let late = h.service.append_segment(id, &caller, segment("late")).await;
        assert!(matches!(late, Err(CoordinatorError::MeetingEnded(_))));
    }

    #[tokio::test]
    async fn test_append_validates_before_touching_actor() {
        let h = harness();
        let id = meeting(&h.store).await;

        let result = h
            .service
            .append_segment(id, &claims("u1", "org-1"), segment("   "))
            .await;
        assert!(matches!(result, Err(CoordinatorError::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_artifact_not_found_before_any_save() {
        let h = harness();
        let id = meeting(&h.store).await;
        let caller = claims("u1", "org-1");

        let result = h.service.get_artifact(id, &caller).await;
        assert!(matches!(result, Err(CoordinatorError::NotFound(_))));

        h.service.append_segment(id, &caller, segment("draft")).await.unwrap();
        let saved = h.service.auto_save(id, &caller).await.unwrap();
        assert!(saved.is_partial);
        assert_eq!(
            h.service.get_artifact(id, &caller).await.unwrap().metadata.auto_save_count,
            1
        );
    }
}
