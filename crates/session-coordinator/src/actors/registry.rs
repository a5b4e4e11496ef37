//! MeetingRegistry - keyed table of running meeting actors.
//!
//! The registry is the only place meeting actors are created, so each meeting
//! has at most one writer in this process. It is ephemeral: nothing here is a
//! source of truth. [`recover_pending_finalizations`] re-derives outstanding
//! work from persisted meeting status, at startup and on every sweep tick.
//!
//! # Graceful Shutdown
//!
//! Cancelling the registry token (or sending `Shutdown`) stops new starts,
//! cancels every meeting actor through its child token and waits for each
//! task up to a deadline.

use crate::errors::CoordinatorError;
use crate::observability::metrics;
use crate::repositories::Store;
use common::types::MeetingId;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::meeting::{MeetingActor, MeetingActorHandle, MeetingContext};
use super::messages::{FinalizeOutcome, FinalizeTrigger, RegistryMessage, RegistryStatus};

/// Default channel buffer size for the registry mailbox.
const REGISTRY_CHANNEL_BUFFER: usize = 1000;

/// How long `stop` waits for a meeting actor to exit.
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Shutdown deadline used when the registry token is cancelled directly.
const DEFAULT_SHUTDOWN_DEADLINE: Duration = Duration::from_secs(30);

/// Handle to the MeetingRegistry.
#[derive(Debug, Clone)]
pub struct MeetingRegistryHandle {
    sender: mpsc::Sender<RegistryMessage>,
    cancel_token: CancellationToken,
}

impl MeetingRegistryHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> RegistryMessage,
    ) -> Result<T, CoordinatorError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|e| CoordinatorError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| CoordinatorError::Internal(format!("response receive failed: {e}")))
    }

    /// Get the meeting's actor, spawning and rehydrating it if needed.
    pub async fn start(
        &self,
        meeting_id: MeetingId,
    ) -> Result<MeetingActorHandle, CoordinatorError> {
        self.request(|respond_to| RegistryMessage::Start {
            meeting_id,
            respond_to,
        })
        .await?
    }

    /// Cancel and remove the meeting's actor. Returns false if none was running.
    pub async fn stop(&self, meeting_id: MeetingId) -> Result<bool, CoordinatorError> {
        self.request(|respond_to| RegistryMessage::Stop {
            meeting_id,
            respond_to,
        })
        .await
    }

    /// The running actor, if any.
    pub async fn get(
        &self,
        meeting_id: MeetingId,
    ) -> Result<Option<MeetingActorHandle>, CoordinatorError> {
        self.request(|respond_to| RegistryMessage::Get {
            meeting_id,
            respond_to,
        })
        .await
    }

    pub async fn status(&self) -> Result<RegistryStatus, CoordinatorError> {
        self.request(|respond_to| RegistryMessage::GetStatus { respond_to })
            .await
    }

    /// Stop every actor, waiting up to `deadline` for each.
    pub async fn shutdown(&self, deadline: Duration) -> Result<(), CoordinatorError> {
        self.request(|respond_to| RegistryMessage::Shutdown {
            deadline,
            respond_to,
        })
        .await
    }

    /// Ask the meeting's actor for its terminal pass.
    ///
    /// An actor can stop between lookup and delivery. The request is then
    /// retried once against a fresh actor, which rehydrates the persisted
    /// guard and answers for itself.
    pub async fn finalize(
        &self,
        meeting_id: MeetingId,
        trigger: FinalizeTrigger,
    ) -> Result<FinalizeOutcome, CoordinatorError> {
        let actor = self.start(meeting_id).await?;
        match actor.finalize(trigger).await {
            Err(CoordinatorError::MeetingEnded(_)) if actor.is_closed() => {
                debug!(
                    target: "sc.actor.registry",
                    meeting_id = %meeting_id,
                    "Meeting actor stopped before finalize was delivered, retrying"
                );
                self.start(meeting_id).await?.finalize(trigger).await
            }
            other => other,
        }
    }

    /// Cancel the registry and, through child tokens, every meeting actor.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }
}

struct ManagedMeeting {
    handle: MeetingActorHandle,
    task_handle: JoinHandle<()>,
    created_at: Instant,
}

impl ManagedMeeting {
    fn is_running(&self) -> bool {
        !self.task_handle.is_finished() && !self.handle.is_closed()
    }
}

/// The registry actor.
pub struct MeetingRegistry {
    receiver: mpsc::Receiver<RegistryMessage>,
    cancel_token: CancellationToken,
    ctx: MeetingContext,
    meetings: HashMap<MeetingId, ManagedMeeting>,
    accepting_new: bool,
}

impl MeetingRegistry {
    /// Spawn the registry.
    ///
    /// Meeting actors get child tokens of `cancel_token`.
    pub fn spawn(
        ctx: MeetingContext,
        cancel_token: CancellationToken,
    ) -> (MeetingRegistryHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(REGISTRY_CHANNEL_BUFFER);

        let registry = Self {
            receiver,
            cancel_token: cancel_token.clone(),
            ctx,
            meetings: HashMap::new(),
            accepting_new: true,
        };

        let task_handle = tokio::spawn(registry.run());

        (
            MeetingRegistryHandle {
                sender,
                cancel_token,
            },
            task_handle,
        )
    }

    #[instrument(skip_all, name = "sc.actor.registry")]
    async fn run(mut self) {
        info!(target: "sc.actor.registry", "MeetingRegistry started");

        loop {
            self.check_meeting_health().await;

            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "sc.actor.registry",
                        "MeetingRegistry received cancellation signal"
                    );
                    self.graceful_shutdown(DEFAULT_SHUTDOWN_DEADLINE).await;
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => self.handle_message(message).await,
                        None => {
                            info!(
                                target: "sc.actor.registry",
                                "MeetingRegistry channel closed, exiting"
                            );
                            self.graceful_shutdown(DEFAULT_SHUTDOWN_DEADLINE).await;
                            break;
                        }
                    }
                }
            }
        }

        info!(target: "sc.actor.registry", "MeetingRegistry stopped");
    }

    async fn handle_message(&mut self, message: RegistryMessage) {
        match message {
            RegistryMessage::Start {
                meeting_id,
                respond_to,
            } => {
                let result = self.start_meeting(meeting_id);
                let _ = respond_to.send(result);
            }

            RegistryMessage::Stop {
                meeting_id,
                respond_to,
            } => {
                let stopped = self.stop_meeting(meeting_id).await;
                let _ = respond_to.send(stopped);
            }

            RegistryMessage::Get {
                meeting_id,
                respond_to,
            } => {
                let handle = self
                    .meetings
                    .get(&meeting_id)
                    .filter(|managed| managed.is_running())
                    .map(|managed| managed.handle.clone());
                let _ = respond_to.send(handle);
            }

            RegistryMessage::GetStatus { respond_to } => {
                let _ = respond_to.send(RegistryStatus {
                    active_meetings: self.meetings.len(),
                    accepting_new: self.accepting_new,
                });
            }

            RegistryMessage::Shutdown {
                deadline,
                respond_to,
            } => {
                self.graceful_shutdown(deadline).await;
                let _ = respond_to.send(());
                // Leave the loop on the next iteration
                self.cancel_token.cancel();
            }
        }
    }

    fn start_meeting(
        &mut self,
        meeting_id: MeetingId,
    ) -> Result<MeetingActorHandle, CoordinatorError> {
        if let Some(managed) = self.meetings.get(&meeting_id) {
            if managed.is_running() {
                return Ok(managed.handle.clone());
            }
        }

        if !self.accepting_new {
            return Err(CoordinatorError::Internal(
                "Meeting registry is shutting down".to_string(),
            ));
        }

        // A finished actor is replaced; its task has already exited
        if self.meetings.remove(&meeting_id).is_some() {
            debug!(
                target: "sc.actor.registry",
                meeting_id = %meeting_id,
                "Replacing stopped meeting actor"
            );
        }

        let (handle, task_handle) = MeetingActor::spawn(
            meeting_id,
            self.ctx.clone(),
            self.cancel_token.child_token(),
        );

        self.meetings.insert(
            meeting_id,
            ManagedMeeting {
                handle: handle.clone(),
                task_handle,
                created_at: Instant::now(),
            },
        );
        metrics::set_meeting_actors_active(self.meetings.len());

        debug!(
            target: "sc.actor.registry",
            meeting_id = %meeting_id,
            active_meetings = self.meetings.len(),
            "Meeting actor started"
        );

        Ok(handle)
    }

    async fn stop_meeting(&mut self, meeting_id: MeetingId) -> bool {
        let Some(managed) = self.meetings.remove(&meeting_id) else {
            return false;
        };

        managed.handle.cancel();
        if tokio::time::timeout(STOP_TIMEOUT, managed.task_handle)
            .await
            .is_err()
        {
            warn!(
                target: "sc.actor.registry",
                meeting_id = %meeting_id,
                "Meeting actor did not stop in time"
            );
        }

        metrics::set_meeting_actors_active(self.meetings.len());
        info!(
            target: "sc.actor.registry",
            meeting_id = %meeting_id,
            lifetime_secs = managed.created_at.elapsed().as_secs(),
            "Meeting actor stopped"
        );
        true
    }

    /// Drop actors whose tasks have exited (terminal write done, or a failure).
    async fn check_meeting_health(&mut self) {
        let finished: Vec<MeetingId> = self
            .meetings
            .iter()
            .filter(|(_, managed)| managed.task_handle.is_finished())
            .map(|(meeting_id, _)| *meeting_id)
            .collect();

        if finished.is_empty() {
            return;
        }

        for meeting_id in finished {
            let Some(managed) = self.meetings.remove(&meeting_id) else {
                continue;
            };

            match managed.task_handle.await {
                Ok(()) => {
                    debug!(
                        target: "sc.actor.registry",
                        meeting_id = %meeting_id,
                        "Meeting actor exited"
                    );
                }
                Err(join_error) => {
                    if join_error.is_panic() {
                        error!(
                            target: "sc.actor.registry",
                            meeting_id = %meeting_id,
                            error = ?join_error,
                            "Meeting actor panicked"
                        );
                    }
                }
            }
        }

        metrics::set_meeting_actors_active(self.meetings.len());
    }

    async fn graceful_shutdown(&mut self, deadline: Duration) {
        info!(
            target: "sc.actor.registry",
            meeting_count = self.meetings.len(),
            "Performing graceful shutdown"
        );

        self.accepting_new = false;

        for managed in self.meetings.values() {
            managed.handle.cancel();
        }

        for (meeting_id, managed) in self.meetings.drain() {
            match tokio::time::timeout(deadline, managed.task_handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(
                        target: "sc.actor.registry",
                        meeting_id = %meeting_id,
                        error = ?e,
                        "Meeting actor task failed during shutdown"
                    );
                }
                Err(_) => {
                    warn!(
                        target: "sc.actor.registry",
                        meeting_id = %meeting_id,
                        "Meeting actor shutdown timed out"
                    );
                }
            }
        }

        metrics::set_meeting_actors_active(0);
        info!(target: "sc.actor.registry", "Graceful shutdown complete");
    }
}

/// Request terminal finalization for every terminal meeting that has no
/// PROCESSED artifact. Returns how many passes were started.
///
/// Meetings whose claim is held by a live attempt elsewhere report
/// `AlreadyFinalized` and are skipped.
pub async fn recover_pending_finalizations(
    store: &dyn Store,
    registry: &MeetingRegistryHandle,
) -> Result<usize, CoordinatorError> {
    let pending = store.pending_finalizations().await?;
    let mut started = 0;

    for meeting_id in &pending {
        match registry
            .finalize(*meeting_id, FinalizeTrigger::Recovery)
            .await
        {
            Ok(FinalizeOutcome::Started) => started += 1,
            Ok(FinalizeOutcome::AlreadyFinalized) => {}
            Err(e) => {
                warn!(
                    target: "sc.actor.registry",
                    meeting_id = %meeting_id,
                    error = %e,
                    "Failed to recover pending finalization"
                );
            }
        }
    }

    if !pending.is_empty() {
        info!(
            target: "sc.actor.registry",
            pending = pending.len(),
            started,
            "Pending finalizations recovered"
        );
    }
    Ok(started)
}
