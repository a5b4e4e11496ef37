//! HTTP request handlers for the session coordinator.

pub mod health;
pub mod meetings;
pub mod metrics;
pub mod presence;
pub mod share;
pub mod transcripts;

pub use health::{health_check, readiness_check};
pub use meetings::{end_meeting, get_meeting, join_meeting, update_status};
pub use metrics::metrics_handler;
pub use presence::update_presence;
pub use share::{create_share, join_by_share, resolve_share, revoke_share};
pub use transcripts::{append_segment, auto_save, get_transcript, list_segments};

use crate::errors::CoordinatorError;
use serde::de::DeserializeOwned;

/// Deserialize a JSON body, returning 400 (not Axum's default 422) on failure.
pub(crate) fn parse_body<T: DeserializeOwned>(
    body: &[u8],
    target: &'static str,
) -> Result<T, CoordinatorError> {
    serde_json::from_slice(body).map_err(|e| {
        tracing::debug!(
            target: "sc.handlers",
            handler = target,
            error = %e,
            "Invalid request body"
        );
        CoordinatorError::BadRequest("Invalid request body".to_string())
    })
}
