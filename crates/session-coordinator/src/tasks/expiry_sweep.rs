//! Expiry sweep background task.
//!
//! Periodically moves every SCHEDULED or IN_PROGRESS meeting whose
//! `scheduled_at + duration` is in the past to COMPLETED, then asks each
//! swept meeting's actor to finalize its transcript. Every tick also retakes
//! terminal meetings that still lack a PROCESSED artifact, so a finalization
//! that failed or stalled mid-process is retried once its claim goes stale.
//!
//! # Graceful Shutdown
//!
//! The task supports graceful shutdown via a cancellation token. When the token
//! is cancelled, the task completes its current iteration and exits cleanly.

use crate::actors::{recover_pending_finalizations, FinalizeTrigger, MeetingRegistryHandle};
use crate::errors::CoordinatorError;
use crate::observability::metrics;
use crate::services::state_machine::{SessionStateMachine, SweepOutcome};
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

/// Default sweep interval in seconds.
pub const DEFAULT_SWEEP_INTERVAL_SECONDS: u64 = 60;

/// Start the expiry sweep.
///
/// Runs one sweep per `interval` tick (the first tick fires immediately) and
/// returns when the cancellation token is triggered.
#[instrument(skip_all, name = "sc.task.sweep")]
pub async fn start_expiry_sweep(
    state_machine: SessionStateMachine,
    registry: MeetingRegistryHandle,
    interval: Duration,
    cancel_token: CancellationToken,
) {
    info!(
        target: "sc.task.sweep",
        interval_seconds = interval.as_secs(),
        "Starting expiry sweep task"
    );

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                // Errors are logged and counted inside; the next tick retries.
                let _ = run_sweep_once(&state_machine, &registry, Utc::now()).await;
            }
            () = cancel_token.cancelled() => {
                info!(
                    target: "sc.task.sweep",
                    "Expiry sweep task received shutdown signal, exiting"
                );
                break;
            }
        }
    }

    info!(target: "sc.task.sweep", "Expiry sweep task stopped");
}

/// Run a single sweep at `now`.
///
/// Separated from the loop so it can be driven directly. Finalization
/// requests that fail are logged per meeting and do not fail the sweep; the
/// recovery pass at the end of this tick or the next one picks them up.
pub async fn run_sweep_once(
    state_machine: &SessionStateMachine,
    registry: &MeetingRegistryHandle,
    now: DateTime<Utc>,
) -> Result<SweepOutcome, CoordinatorError> {
    let outcome = match state_machine.sweep_expired(now).await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!(
                target: "sc.task.sweep",
                error = %e,
                "Failed to complete expired meetings"
            );
            metrics::record_sweep("error", 0);
            return Err(e);
        }
    };

    metrics::record_sweep("success", outcome.updated_count as u64);

    if outcome.updated_count > 0 {
        info!(
            target: "sc.task.sweep",
            updated_count = outcome.updated_count,
            "Completed expired meetings"
        );
    }

    for meeting_id in &outcome.meeting_ids {
        if let Err(e) = registry.finalize(*meeting_id, FinalizeTrigger::Sweep).await {
            warn!(
                target: "sc.task.sweep",
                meeting_id = %meeting_id,
                error = %e,
                "Failed to request finalization for swept meeting"
            );
        }
    }

    if let Err(e) = recover_pending_finalizations(state_machine.store().as_ref(), registry).await {
        warn!(
            target: "sc.task.sweep",
            error = %e,
            "Failed to recover pending finalizations"
        );
    }

    Ok(outcome)
}
