//! Actor mailbox messages.
//!
//! Requests carry a `respond_to` oneshot; notifications from spawned
//! summarization jobs do not.

use crate::errors::CoordinatorError;
use crate::models::{Summary, TranscriptArtifact, TranscriptSegment};
use chrono::{DateTime, Utc};
use common::types::MeetingId;
use tokio::sync::oneshot;

use super::meeting::MeetingActorHandle;

/// What asked for the terminal pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeTrigger {
    /// Explicit end-meeting request.
    EndMeeting,

    /// Status transition to COMPLETED or CANCELLED.
    StatusChange,

    /// Expiry sweep.
    Sweep,

    /// Recovery of unfinished finalizations, at startup and on each sweep.
    Recovery,
}

impl FinalizeTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            FinalizeTrigger::EndMeeting => "end_meeting",
            FinalizeTrigger::StatusChange => "status_change",
            FinalizeTrigger::Sweep => "sweep",
            FinalizeTrigger::Recovery => "recovery",
        }
    }
}

/// Reply to a finalize request. The terminal write itself happens later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeOutcome {
    /// This request claimed the terminal pass.
    Started,

    /// Another trigger already claimed or completed it.
    AlreadyFinalized,
}

/// Segment fields supplied by the caller; the actor assigns the sequence.
#[derive(Debug, Clone)]
pub struct SegmentInput {
    pub speaker: String,
    pub text: String,
    pub is_final: bool,
    pub timestamp: DateTime<Utc>,
}

/// Messages handled by a [`MeetingActor`](super::meeting::MeetingActor).
#[derive(Debug)]
pub enum MeetingMessage {
    /// Persist one segment and fold it into the running transcript.
    AppendSegment {
        segment: SegmentInput,
        respond_to: oneshot::Sender<Result<TranscriptSegment, CoordinatorError>>,
    },

    /// Partial save of the raw transcript, no AI.
    AutoSave {
        respond_to: oneshot::Sender<Result<TranscriptArtifact, CoordinatorError>>,
    },

    /// Request the terminal pass.
    Finalize {
        trigger: FinalizeTrigger,
        respond_to: oneshot::Sender<Result<FinalizeOutcome, CoordinatorError>>,
    },

    /// Snapshot of actor state.
    GetState {
        respond_to: oneshot::Sender<MeetingActorState>,
    },

    /// An enrichment job finished.
    EnrichmentDone {
        content_hash: String,
        summary: Summary,
    },

    /// The terminal write finished (or failed).
    TerminalDone {
        result: Result<TranscriptArtifact, CoordinatorError>,
    },
}

/// Observable state of a meeting actor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeetingActorState {
    pub meeting_id: MeetingId,
    pub next_sequence: i64,
    pub final_segments: usize,
    pub content_hash: String,
    pub enrichment_in_flight: bool,
    pub terminal_requested: bool,
}

/// Messages handled by the [`MeetingRegistry`](super::registry::MeetingRegistry).
#[derive(Debug)]
pub enum RegistryMessage {
    /// Return the running actor for a meeting, spawning one if needed.
    Start {
        meeting_id: MeetingId,
        respond_to: oneshot::Sender<Result<MeetingActorHandle, CoordinatorError>>,
    },

    /// Cancel and remove a meeting's actor. Replies false if none was running.
    Stop {
        meeting_id: MeetingId,
        respond_to: oneshot::Sender<bool>,
    },

    /// Return the running actor without spawning.
    Get {
        meeting_id: MeetingId,
        respond_to: oneshot::Sender<Option<MeetingActorHandle>>,
    },

    GetStatus {
        respond_to: oneshot::Sender<RegistryStatus>,
    },

    /// Stop accepting new meetings and wind every actor down.
    Shutdown {
        deadline: std::time::Duration,
        respond_to: oneshot::Sender<()>,
    },
}

/// Registry status for readiness and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryStatus {
    pub active_meetings: usize,
    pub accepting_new: bool,
}
