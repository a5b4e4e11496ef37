//! MeetingActor - one per active meeting.
//!
//! The actor is the single writer for a meeting's transcript stream. It owns:
//!
//! - The segment sequence counter
//! - The ordered buffer of final segments and its running concatenation
//! - The in-memory side of the finalization guard
//!
//! Summarization never runs inside the message loop. Enrichment and terminal
//! passes are spawned and report back through the mailbox, so appends keep
//! flowing while the model is working. At most one summarization job is in
//! flight at a time.
//!
//! # Lifecycle
//!
//! 1. Spawned by the registry, rehydrates from storage before reading mail
//! 2. Serves appends, auto-saves and enrichment passes
//! 3. On finalize, claims the persisted guard and runs the terminal pass
//! 4. Stops itself after the terminal write; late requests are answered
//!    from the drained mailbox

use crate::config::Config;
use crate::errors::CoordinatorError;
use crate::models::{
    ArtifactWrite, FinalizationState, NewSegment, Summary, TranscriptArtifact, TranscriptSegment,
};
use crate::observability::metrics;
use crate::repositories::{AutoSaveInput, AutoSaveOutcome, Store};
use crate::services::state_machine::SessionStateMachine;
use crate::services::summarizer::{FallbackSummarizer, Summarizer};
use crate::services::transcript::{TranscriptBuffer, TranscriptSnapshot};
use chrono::Utc;
use common::types::MeetingId;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, instrument, warn, Instrument};

use super::messages::{
    FinalizeOutcome, FinalizeTrigger, MeetingActorState, MeetingMessage, SegmentInput,
};

/// Default channel buffer size for the meeting actor mailbox.
const MEETING_CHANNEL_BUFFER: usize = 256;

/// Thresholds that drive enrichment and finalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineSettings {
    /// Final segments required before any AI pass.
    pub min_final_segments: usize,

    /// Further final segments between enrichment passes.
    pub refresh_interval_segments: usize,

    /// Age after which a PROCESSING claim may be retaken.
    pub finalization_stale_after: Duration,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            min_final_segments: config.summary_min_final_segments,
            refresh_interval_segments: config.summary_refresh_interval_segments,
            finalization_stale_after: config.finalization_stale_after,
        }
    }
}

/// Shared collaborators handed to every meeting actor.
#[derive(Clone)]
pub struct MeetingContext {
    pub store: Arc<dyn Store>,
    pub state_machine: SessionStateMachine,
    pub summarizer: Arc<dyn Summarizer>,
    pub settings: PipelineSettings,
}

/// Handle to a MeetingActor.
#[derive(Debug, Clone)]
pub struct MeetingActorHandle {
    sender: mpsc::Sender<MeetingMessage>,
    cancel_token: CancellationToken,
    meeting_id: MeetingId,
}

impl MeetingActorHandle {
    pub fn meeting_id(&self) -> MeetingId {
        self.meeting_id
    }

    /// Whether the actor has stopped reading its mailbox.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Cancel the actor.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// A mailbox that is gone means the actor stopped after its terminal
    /// write (or the process is shutting down), so delivery failures surface
    /// as `MeetingEnded` rather than an internal error.
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> MeetingMessage,
    ) -> Result<T, CoordinatorError> {
        let (tx, rx) = oneshot::channel();
        if self.sender.send(build(tx)).await.is_err() {
            debug!(
                target: "sc.actor.meeting",
                meeting_id = %self.meeting_id,
                "Request sent to a stopped meeting actor"
            );
            return Err(meeting_ended());
        }

        rx.await.map_err(|_| {
            debug!(
                target: "sc.actor.meeting",
                meeting_id = %self.meeting_id,
                "Meeting actor stopped before responding"
            );
            meeting_ended()
        })
    }

    /// Append a segment. The actor assigns its sequence.
    pub async fn append_segment(
        &self,
        segment: SegmentInput,
    ) -> Result<TranscriptSegment, CoordinatorError> {
        self.request(|respond_to| MeetingMessage::AppendSegment {
            segment,
            respond_to,
        })
        .await?
    }

    /// Save the raw transcript without AI.
    pub async fn auto_save(&self) -> Result<TranscriptArtifact, CoordinatorError> {
        self.request(|respond_to| MeetingMessage::AutoSave { respond_to })
            .await?
    }

    /// Request the terminal pass. Returns once the guard is claimed; the
    /// artifact is written asynchronously.
    pub async fn finalize(
        &self,
        trigger: FinalizeTrigger,
    ) -> Result<FinalizeOutcome, CoordinatorError> {
        self.request(|respond_to| MeetingMessage::Finalize {
            trigger,
            respond_to,
        })
        .await?
    }

    pub async fn get_state(&self) -> Result<MeetingActorState, CoordinatorError> {
        self.request(|respond_to| MeetingMessage::GetState { respond_to })
            .await
    }
}

/// The meeting actor implementation.
pub struct MeetingActor {
    meeting_id: MeetingId,
    receiver: mpsc::Receiver<MeetingMessage>,
    /// Used by spawned summarization jobs to report back.
    self_sender: mpsc::Sender<MeetingMessage>,
    cancel_token: CancellationToken,
    ctx: MeetingContext,
    buffer: TranscriptBuffer,
    next_sequence: i64,
    /// Final-segment count that triggers the next enrichment pass.
    next_enrichment_at: usize,
    /// Content hash of the running enrichment job.
    enrichment_in_flight: Option<String>,
    /// Most recent summary and the content hash it was produced from.
    cached_summary: Option<(String, Summary)>,
    /// The meeting was already terminal when the actor started.
    meeting_ended: bool,
    /// This actor holds the terminal claim.
    terminal_requested: bool,
    /// Terminal pass is waiting for the running enrichment job.
    terminal_waiting: bool,
    /// The terminal artifact exists (or another attempt owns it).
    finalized: bool,
    stopping: bool,
}

impl MeetingActor {
    /// Spawn a new meeting actor.
    ///
    /// Returns a handle and the task join handle.
    pub fn spawn(
        meeting_id: MeetingId,
        ctx: MeetingContext,
        cancel_token: CancellationToken,
    ) -> (MeetingActorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(MEETING_CHANNEL_BUFFER);

        let actor = Self {
            meeting_id,
            receiver,
            self_sender: sender.clone(),
            cancel_token: cancel_token.clone(),
            next_enrichment_at: ctx.settings.min_final_segments,
            ctx,
            buffer: TranscriptBuffer::new(),
            next_sequence: 1,
            enrichment_in_flight: None,
            cached_summary: None,
            meeting_ended: false,
            terminal_requested: false,
            terminal_waiting: false,
            finalized: false,
            stopping: false,
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = MeetingActorHandle {
            sender,
            cancel_token,
            meeting_id,
        };

        (handle, task_handle)
    }

    /// Run the actor message loop.
    #[instrument(skip_all, name = "sc.actor.meeting", fields(meeting_id = %self.meeting_id))]
    async fn run(mut self) {
        if let Err(e) = self.rehydrate().await {
            error!(
                target: "sc.actor.meeting",
                meeting_id = %self.meeting_id,
                error = %e,
                "Failed to rehydrate meeting state, actor exiting"
            );
            return;
        }

        info!(
            target: "sc.actor.meeting",
            meeting_id = %self.meeting_id,
            final_segments = self.buffer.final_count(),
            next_sequence = self.next_sequence,
            finalized = self.finalized,
            "MeetingActor started"
        );

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "sc.actor.meeting",
                        meeting_id = %self.meeting_id,
                        "MeetingActor received cancellation signal"
                    );
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.handle_message(message).await;
                            if self.stopping {
                                self.drain().await;
                                break;
                            }
                        }
                        None => break,
                    }
                }
            }
        }

        if self.enrichment_in_flight.is_some() || (self.terminal_requested && !self.finalized) {
            warn!(
                target: "sc.actor.meeting",
                meeting_id = %self.meeting_id,
                terminal_requested = self.terminal_requested,
                "MeetingActor stopped with summarization still running"
            );
        }

        info!(
            target: "sc.actor.meeting",
            meeting_id = %self.meeting_id,
            final_segments = self.buffer.final_count(),
            "MeetingActor stopped"
        );
    }

    /// Answer whatever is already queued, then let the mailbox close.
    async fn drain(&mut self) {
        self.receiver.close();
        while let Some(message) = self.receiver.recv().await {
            self.handle_message(message).await;
        }
    }

    async fn rehydrate(&mut self) -> Result<(), CoordinatorError> {
        let store = &self.ctx.store;

        let meeting = store
            .get_meeting(self.meeting_id)
            .await?
            .ok_or_else(|| CoordinatorError::NotFound("Meeting not found".to_string()))?;
        self.meeting_ended = meeting.status.is_terminal();

        let segments = store.list_segments(self.meeting_id).await?;
        self.next_sequence = segments
            .iter()
            .map(|s| s.sequence)
            .max()
            .map_or(1, |max| max + 1);
        self.buffer = TranscriptBuffer::from_segments(&segments);

        if let Some(artifact) = store.get_artifact(self.meeting_id).await? {
            self.finalized = artifact.finalization_state == FinalizationState::Processed;

            if let (Some(summary), Some(hash)) = (artifact.summary, artifact.metadata.content_hash)
            {
                if hash == self.buffer.content_hash() {
                    self.cached_summary = Some((hash, summary));
                }
            }
        }

        Ok(())
    }

    /// Handle a single message.
    async fn handle_message(&mut self, message: MeetingMessage) {
        match message {
            MeetingMessage::AppendSegment {
                segment,
                respond_to,
            } => {
                let result = self.append_segment(segment).await;
                let _ = respond_to.send(result);
            }

            MeetingMessage::AutoSave { respond_to } => {
                let result = self.auto_save().await;
                let _ = respond_to.send(result);
            }

            MeetingMessage::Finalize {
                trigger,
                respond_to,
            } => {
                let result = self.finalize(trigger).await;
                let _ = respond_to.send(result);
            }

            MeetingMessage::GetState { respond_to } => {
                let _ = respond_to.send(self.state());
            }

            MeetingMessage::EnrichmentDone {
                content_hash,
                summary,
            } => {
                self.enrichment_in_flight = None;
                self.cached_summary = Some((content_hash, summary));

                if self.terminal_waiting {
                    self.terminal_waiting = false;
                    self.start_terminal();
                } else {
                    self.maybe_start_enrichment();
                }
            }

            MeetingMessage::TerminalDone { result } => {
                match result {
                    Ok(artifact) => {
                        info!(
                            target: "sc.actor.meeting",
                            meeting_id = %self.meeting_id,
                            provenance = artifact.summary.as_ref().map(|s| s.provenance.as_str()),
                            final_segments = artifact.metadata.final_segment_count,
                            "Terminal transcript artifact written"
                        );
                        metrics::record_finalization("terminal", "written");
                    }
                    Err(e) => {
                        // The claim stays PROCESSING and is retaken once stale
                        error!(
                            target: "sc.actor.meeting",
                            meeting_id = %self.meeting_id,
                            error = %e,
                            "Failed to write terminal transcript artifact"
                        );
                        metrics::record_finalization("terminal", "error");
                    }
                }
                self.finalized = true;
                self.stopping = true;
            }
        }
    }

    fn accepts_writes(&self) -> bool {
        !(self.meeting_ended || self.terminal_requested || self.finalized)
    }

    async fn append_segment(
        &mut self,
        input: SegmentInput,
    ) -> Result<TranscriptSegment, CoordinatorError> {
        if !self.accepts_writes() {
            return Err(meeting_ended());
        }

        let sequence = self.next_sequence;
        // Burn the sequence even on failure so a retry never collides
        self.next_sequence += 1;

        let stored = self
            .ctx
            .store
            .append_segment(NewSegment {
                meeting_id: self.meeting_id,
                sequence,
                speaker: input.speaker.trim().to_string(),
                text: input.text,
                is_final: input.is_final,
                timestamp: input.timestamp,
            })
            .await?;

        metrics::record_segment_appended(stored.is_final);

        if self.buffer.push(stored.clone()) {
            self.maybe_start_enrichment();
        }

        Ok(stored)
    }

    async fn auto_save(&mut self) -> Result<TranscriptArtifact, CoordinatorError> {
        if !self.accepts_writes() {
            return Err(meeting_ended());
        }

        let result = self.persist_auto_save().await;
        match &result {
            Ok((_, count_reset)) => metrics::record_auto_save("saved", *count_reset),
            Err(_) => metrics::record_auto_save("error", false),
        }
        result.map(|(artifact, _)| artifact)
    }

    async fn persist_auto_save(&mut self) -> Result<(TranscriptArtifact, bool), CoordinatorError> {
        self.ctx
            .state_machine
            .ensure_in_progress(self.meeting_id, "auto_save")
            .await?;

        let input = AutoSaveInput {
            meeting_id: self.meeting_id,
            content: self.buffer.content().to_string(),
            speakers: self.buffer.speakers(),
            final_segment_count: self.buffer.final_count(),
        };

        match self.ctx.store.record_auto_save(input, Utc::now()).await? {
            AutoSaveOutcome::Saved {
                artifact,
                count_reset,
            } => {
                if count_reset {
                    warn!(
                        target: "sc.actor.meeting",
                        meeting_id = %self.meeting_id,
                        "auto_save_count was reset after unreadable metadata"
                    );
                }
                debug!(
                    target: "sc.actor.meeting",
                    meeting_id = %self.meeting_id,
                    auto_save_count = artifact.metadata.auto_save_count,
                    "Transcript auto-saved"
                );
                Ok((artifact, count_reset))
            }
            AutoSaveOutcome::AlreadyFinal(artifact) => {
                self.finalized = true;
                Ok((artifact, false))
            }
        }
    }

    async fn finalize(
        &mut self,
        trigger: FinalizeTrigger,
    ) -> Result<FinalizeOutcome, CoordinatorError> {
        if self.finalized {
            self.stopping = true;
            return Ok(FinalizeOutcome::AlreadyFinalized);
        }
        if self.terminal_requested {
            debug!(
                target: "sc.actor.meeting",
                meeting_id = %self.meeting_id,
                trigger = trigger.as_str(),
                "Terminal pass already running"
            );
            return Ok(FinalizeOutcome::AlreadyFinalized);
        }

        let claimed = self
            .ctx
            .store
            .claim_finalization(
                self.meeting_id,
                Utc::now(),
                self.ctx.settings.finalization_stale_after,
            )
            .await?;

        if !claimed {
            info!(
                target: "sc.actor.meeting",
                meeting_id = %self.meeting_id,
                trigger = trigger.as_str(),
                "Finalization already claimed elsewhere"
            );
            metrics::record_finalization("terminal", "already_claimed");
            self.finalized = true;
            self.stopping = true;
            return Ok(FinalizeOutcome::AlreadyFinalized);
        }

        info!(
            target: "sc.actor.meeting",
            meeting_id = %self.meeting_id,
            trigger = trigger.as_str(),
            final_segments = self.buffer.final_count(),
            "Finalization claimed"
        );
        self.terminal_requested = true;

        if self.enrichment_in_flight.is_some() {
            self.terminal_waiting = true;
        } else {
            self.start_terminal();
        }

        Ok(FinalizeOutcome::Started)
    }

    fn state(&self) -> MeetingActorState {
        MeetingActorState {
            meeting_id: self.meeting_id,
            next_sequence: self.next_sequence,
            final_segments: self.buffer.final_count(),
            content_hash: self.buffer.content_hash(),
            enrichment_in_flight: self.enrichment_in_flight.is_some(),
            terminal_requested: self.terminal_requested,
        }
    }

    fn cached_summary_for(&self, content_hash: &str) -> Option<Summary> {
        self.cached_summary
            .as_ref()
            .filter(|(hash, _)| hash == content_hash)
            .map(|(_, summary)| summary.clone())
    }

    fn maybe_start_enrichment(&mut self) {
        if !self.accepts_writes() || self.enrichment_in_flight.is_some() {
            return;
        }

        let final_count = self.buffer.final_count();
        if final_count < self.next_enrichment_at {
            return;
        }

        let snapshot = self.buffer.snapshot();
        if self.cached_summary_for(&snapshot.content_hash).is_some() {
            return;
        }

        self.next_enrichment_at = final_count + self.ctx.settings.refresh_interval_segments;
        self.enrichment_in_flight = Some(snapshot.content_hash.clone());

        debug!(
            target: "sc.actor.meeting",
            meeting_id = %self.meeting_id,
            final_segments = final_count,
            "Starting enrichment pass"
        );

        let ctx = self.ctx.clone();
        let sender = self.self_sender.clone();
        let meeting_id = self.meeting_id;

        tokio::spawn(
            async move {
                let summary = ctx.summarizer.summarize(&snapshot).await;

                let write = artifact_write(meeting_id, &snapshot, summary.clone());
                match ctx.store.write_partial(write, Utc::now()).await {
                    Ok(true) => metrics::record_finalization("threshold", "written"),
                    Ok(false) => metrics::record_finalization("threshold", "skipped_terminal"),
                    Err(e) => {
                        warn!(
                            target: "sc.actor.meeting",
                            meeting_id = %meeting_id,
                            error = %e,
                            "Failed to write partial transcript artifact"
                        );
                        metrics::record_finalization("threshold", "error");
                    }
                }

                let _ = sender
                    .send(MeetingMessage::EnrichmentDone {
                        content_hash: snapshot.content_hash,
                        summary,
                    })
                    .await;
            }
            .instrument(info_span!("sc.actor.meeting.enrichment", meeting_id = %meeting_id)),
        );
    }

    fn start_terminal(&mut self) {
        let snapshot = self.buffer.snapshot();
        let reuse = self.cached_summary_for(&snapshot.content_hash);
        let min_final_segments = self.ctx.settings.min_final_segments;

        let ctx = self.ctx.clone();
        let sender = self.self_sender.clone();
        let meeting_id = self.meeting_id;

        tokio::spawn(
            async move {
                let summary = match reuse {
                    Some(summary) => {
                        debug!(
                            target: "sc.actor.meeting",
                            meeting_id = %meeting_id,
                            "Reusing enrichment summary for unchanged transcript"
                        );
                        summary
                    }
                    None if snapshot.final_segment_count >= min_final_segments => {
                        ctx.summarizer.summarize(&snapshot).await
                    }
                    None => {
                        metrics::record_summary("fallback", "below_threshold");
                        FallbackSummarizer::summary()
                    }
                };

                let result = ctx
                    .store
                    .write_terminal(artifact_write(meeting_id, &snapshot, summary), Utc::now())
                    .await;

                let _ = sender.send(MeetingMessage::TerminalDone { result }).await;
            }
            .instrument(info_span!("sc.actor.meeting.terminal", meeting_id = %meeting_id)),
        );
    }
}

fn meeting_ended() -> CoordinatorError {
    CoordinatorError::MeetingEnded("Meeting has ended".to_string())
}

fn artifact_write(
    meeting_id: MeetingId,
    snapshot: &TranscriptSnapshot,
    summary: Summary,
) -> ArtifactWrite {
    ArtifactWrite {
        meeting_id,
        content: snapshot.content.clone(),
        speakers: snapshot.speakers.clone(),
        summary,
        content_hash: snapshot.content_hash.clone(),
        final_segment_count: snapshot.final_segment_count,
    }
}
