//! Participant presence.
//!
//! Storage rows are the only source of truth; there is no in-memory counter
//! to drift. Every write is a single upsert or update on (meeting, identity).

use crate::errors::CoordinatorError;
use crate::models::{Participant, ParticipantKind};
use crate::repositories::Store;
use chrono::Utc;
use common::types::{MeetingId, ParticipantIdentity};
use std::sync::Arc;
use tracing::instrument;

#[derive(Clone)]
pub struct PresenceTracker {
    store: Arc<dyn Store>,
}

impl PresenceTracker {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Record a join. Rejoining clears `left_at` and refreshes `joined_at`.
    #[instrument(skip_all, fields(meeting_id = %meeting_id, kind = kind.as_str()))]
    pub async fn mark_joined(
        &self,
        meeting_id: MeetingId,
        identity: &ParticipantIdentity,
        display_name: &str,
        kind: ParticipantKind,
    ) -> Result<Participant, CoordinatorError> {
        self.store
            .upsert_joined(meeting_id, identity, display_name, kind, Utc::now())
            .await
    }

    /// Record a leave. Returns false when the identity never joined.
    #[instrument(skip_all, fields(meeting_id = %meeting_id))]
    pub async fn mark_left(
        &self,
        meeting_id: MeetingId,
        identity: &ParticipantIdentity,
    ) -> Result<bool, CoordinatorError> {
        let updated = self
            .store
            .mark_left(meeting_id, identity, Utc::now())
            .await?;

        if updated.is_none() {
            tracing::debug!(
                target: "sc.service.presence",
                "Leave reported for an identity that never joined"
            );
        }
        Ok(updated.is_some())
    }

    pub async fn active_count(&self, meeting_id: MeetingId) -> Result<i64, CoordinatorError> {
        self.store.count_active(meeting_id).await
    }

    pub async fn total_count(&self, meeting_id: MeetingId) -> Result<i64, CoordinatorError> {
        self.store.count_total(meeting_id).await
    }

    /// Active and total counts together.
    pub async fn counts(&self, meeting_id: MeetingId) -> Result<(i64, i64), CoordinatorError> {
        let active = self.active_count(meeting_id).await?;
        let total = self.total_count(meeting_id).await?;
        Ok((active.min(total), total))
    }
}
