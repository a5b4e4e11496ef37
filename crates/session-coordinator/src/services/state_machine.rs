//! Meeting lifecycle state machine.
//!
//! ```text
//! SCHEDULED ──► IN_PROGRESS ──► COMPLETED
//!     │              │
//!     ├──────────────┴────────► CANCELLED
//!     └───────────────────────► COMPLETED (sweep)
//! ```
//!
//! Every change is a compare-and-set on the status column. A lost race is
//! retried against the freshly read row, which either already holds the
//! target (idempotent success) or has moved somewhere the target can no
//! longer be reached from (`InvalidTransition`).

use crate::errors::CoordinatorError;
use crate::models::{Meeting, MeetingStatus};
use crate::observability::metrics;
use crate::repositories::Store;
use chrono::{DateTime, Utc};
use common::types::MeetingId;
use std::sync::Arc;
use tracing::instrument;

/// Upper bound on compare-and-set retries. Status only moves forward, so a
/// meeting can change under us at most three times.
const MAX_TRANSITION_ATTEMPTS: usize = 4;

/// Result of one expiry sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepOutcome {
    pub updated_count: usize,
    pub meeting_ids: Vec<MeetingId>,
}

/// Owns legal status transitions for meetings.
#[derive(Clone)]
pub struct SessionStateMachine {
    store: Arc<dyn Store>,
}

impl SessionStateMachine {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    async fn load(&self, meeting_id: MeetingId) -> Result<Meeting, CoordinatorError> {
        self.store
            .get_meeting(meeting_id)
            .await?
            .ok_or_else(|| CoordinatorError::NotFound("Meeting not found".to_string()))
    }

    /// Move a meeting to `target`.
    ///
    /// Requesting the status the meeting already holds returns the current
    /// record unchanged.
    ///
    /// # Errors
    ///
    /// - `NotFound` for unknown meetings
    /// - `InvalidTransition` for backward moves or moves out of a terminal state
    #[instrument(
        skip_all,
        fields(meeting_id = %meeting_id, target = target.as_str(), source = source)
    )]
    pub async fn transition(
        &self,
        meeting_id: MeetingId,
        target: MeetingStatus,
        source: &'static str,
    ) -> Result<Meeting, CoordinatorError> {
        for _ in 0..MAX_TRANSITION_ATTEMPTS {
            let current = self.load(meeting_id).await?;

            if current.status == target {
                return Ok(current);
            }
            if !current.status.can_transition_to(target) {
                return Err(CoordinatorError::InvalidTransition(format!(
                    "Cannot move meeting from {} to {}",
                    current.status.as_str(),
                    target.as_str()
                )));
            }

            if let Some(updated) = self
                .store
                .transition_status(meeting_id, &[current.status], target, Utc::now())
                .await?
            {
                tracing::info!(
                    target: "sc.service.state_machine",
                    from = current.status.as_str(),
                    "Meeting status changed"
                );
                metrics::record_transition(target.as_str(), source);
                return Ok(updated);
            }

            tracing::debug!(
                target: "sc.service.state_machine",
                "Concurrent status change, retrying against fresh row"
            );
        }

        Err(CoordinatorError::Internal(format!(
            "Meeting {meeting_id} status kept changing during transition"
        )))
    }

    /// Make sure a joinable meeting is IN_PROGRESS.
    ///
    /// Moves SCHEDULED meetings forward; IN_PROGRESS is returned as is.
    ///
    /// # Errors
    ///
    /// - `NotFound` for unknown meetings
    /// - `MeetingEnded` for COMPLETED or CANCELLED meetings
    #[instrument(skip_all, fields(meeting_id = %meeting_id, source = source))]
    pub async fn ensure_in_progress(
        &self,
        meeting_id: MeetingId,
        source: &'static str,
    ) -> Result<Meeting, CoordinatorError> {
        for _ in 0..MAX_TRANSITION_ATTEMPTS {
            let current = self.load(meeting_id).await?;

            match current.status {
                MeetingStatus::InProgress => return Ok(current),
                MeetingStatus::Completed | MeetingStatus::Cancelled => {
                    return Err(CoordinatorError::MeetingEnded(
                        "Meeting has ended".to_string(),
                    ))
                }
                MeetingStatus::Scheduled => {}
            }

            if let Some(updated) = self
                .store
                .transition_status(
                    meeting_id,
                    &[MeetingStatus::Scheduled],
                    MeetingStatus::InProgress,
                    Utc::now(),
                )
                .await?
            {
                tracing::info!(target: "sc.service.state_machine", "Meeting started");
                metrics::record_transition(MeetingStatus::InProgress.as_str(), source);
                return Ok(updated);
            }
        }

        Err(CoordinatorError::Internal(format!(
            "Meeting {meeting_id} status kept changing while starting"
        )))
    }

    /// Complete every meeting whose scheduling window elapsed by `now`.
    ///
    /// Idempotent: a second run at the same instant returns zero.
    #[instrument(skip_all)]
    pub async fn sweep_expired(
        &self,
        now: DateTime<Utc>,
    ) -> Result<SweepOutcome, CoordinatorError> {
        let meeting_ids = self.store.complete_expired(now).await?;
        for _ in &meeting_ids {
            metrics::record_transition(MeetingStatus::Completed.as_str(), "sweep");
        }

        Ok(SweepOutcome {
            updated_count: meeting_ids.len(),
            meeting_ids,
        })
    }
}
