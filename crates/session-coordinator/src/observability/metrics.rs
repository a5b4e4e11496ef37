//! Metrics definitions for the session coordinator.
//!
//! All metrics follow Prometheus naming conventions:
//! - `sc_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded:
//! - `endpoint`: parameterized paths, unknown paths collapse to `/other`
//! - `status`: success, error, timeout
//! - `operation`: bounded by code
//! - `kind`: member, guest
//! - `provenance`: ai, fallback

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize Prometheus metrics recorder and return the handle
/// for serving metrics via HTTP.
///
/// Must be called before any metrics are recorded.
///
/// # Errors
///
/// Returns error if Prometheus recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Prefix("sc_http_request".to_string()),
            &[
                0.005, 0.010, 0.025, 0.050, 0.100, 0.150, 0.200, 0.300, 0.500, 1.000, 2.000,
            ],
        )
        .map_err(|e| format!("Failed to set HTTP request buckets: {e}"))?
        .set_buckets_for_metric(
            Matcher::Prefix("sc_db_query".to_string()),
            &[
                0.001, 0.002, 0.005, 0.010, 0.020, 0.050, 0.100, 0.250, 0.500, 1.000,
            ],
        )
        .map_err(|e| format!("Failed to set DB query buckets: {e}"))?
        // Generative model calls take seconds, bounded by AI_TIMEOUT_SECONDS
        .set_buckets_for_metric(
            Matcher::Prefix("sc_ai_call".to_string()),
            &[0.25, 0.5, 1.0, 2.0, 5.0, 10.0, 20.0, 30.0, 60.0],
        )
        .map_err(|e| format!("Failed to set AI call buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {e}"))
}

// ============================================================================
// HTTP Request Metrics
// ============================================================================

/// Record HTTP request completion
///
/// Metric: `sc_http_requests_total`, `sc_http_request_duration_seconds`
/// Labels: `method`, `endpoint`, `status`
pub fn record_http_request(method: &str, endpoint: &str, status_code: u16, duration: Duration) {
    let normalized_endpoint = normalize_endpoint(endpoint);
    let status = categorize_status_code(status_code);

    histogram!("sc_http_request_duration_seconds",
        "method" => method.to_string(),
        "endpoint" => normalized_endpoint.clone(),
        "status" => status.to_string()
    )
    .record(duration.as_secs_f64());

    counter!("sc_http_requests_total",
        "method" => method.to_string(),
        "endpoint" => normalized_endpoint,
        "status_code" => status_code.to_string()
    )
    .increment(1);
}

/// Categorize HTTP status code into success/error/timeout
fn categorize_status_code(status_code: u16) -> &'static str {
    match status_code {
        200..=299 => "success",
        408 | 504 => "timeout",
        _ => "error",
    }
}

/// Normalize endpoint path to prevent label cardinality explosion.
///
/// Meeting ids and share tokens are replaced with placeholders.
fn normalize_endpoint(path: &str) -> String {
    match path {
        "/" | "/health" | "/ready" | "/metrics" => return path.to_string(),
        _ => {}
    }

    let parts: Vec<&str> = path.trim_end_matches('/').split('/').collect();
    let templated: Option<&str> = match parts.as_slice() {
        ["", "api", "v1", "meetings", _] => Some("/api/v1/meetings/{id}"),
        ["", "api", "v1", "meetings", _, "join"] => Some("/api/v1/meetings/{id}/join"),
        ["", "api", "v1", "meetings", _, "status"] => Some("/api/v1/meetings/{id}/status"),
        ["", "api", "v1", "meetings", _, "end"] => Some("/api/v1/meetings/{id}/end"),
        ["", "api", "v1", "meetings", _, "segments"] => Some("/api/v1/meetings/{id}/segments"),
        ["", "api", "v1", "meetings", _, "share"] => Some("/api/v1/meetings/{id}/share"),
        ["", "api", "v1", "meetings", _, "transcript"] => {
            Some("/api/v1/meetings/{id}/transcript")
        }
        ["", "api", "v1", "meetings", _, "transcript", "auto-save"] => {
            Some("/api/v1/meetings/{id}/transcript/auto-save")
        }
        ["", "api", "v1", "rooms", _, "presence"] => Some("/api/v1/rooms/{id}/presence"),
        ["", "api", "v1", "share", _] => Some("/api/v1/share/{token}"),
        ["", "api", "v1", "share", _, "join"] => Some("/api/v1/share/{token}/join"),
        _ => None,
    };

    templated.unwrap_or("/other").to_string()
}

// ============================================================================
// Database Metrics
// ============================================================================

/// Record database query execution
///
/// Metric: `sc_db_query_duration_seconds`, `sc_db_queries_total`
/// Labels: `operation`, `status`
pub fn record_db_query(operation: &str, status: &str, duration: Duration) {
    histogram!("sc_db_query_duration_seconds",
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());

    counter!("sc_db_queries_total",
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

// ============================================================================
// Session Metrics
// ============================================================================

/// Record a join attempt.
///
/// Metric: `sc_joins_total`
/// Labels: `kind` (member, guest), `status` (success, error), `error_type`
pub fn record_join(kind: &str, status: &str, error_type: Option<&str>) {
    counter!("sc_joins_total",
        "kind" => kind.to_string(),
        "status" => status.to_string(),
        "error_type" => error_type.unwrap_or("none").to_string()
    )
    .increment(1);
}

/// Record a presence update.
///
/// Metric: `sc_presence_updates_total`
/// Labels: `status` (joined, left), `applied`
pub fn record_presence_update(status: &str, applied: bool) {
    counter!("sc_presence_updates_total",
        "status" => status.to_string(),
        "applied" => applied.to_string()
    )
    .increment(1);
}

/// Record a state machine transition.
///
/// Metric: `sc_meeting_transitions_total`
/// Labels: `to`, `source` (request, join, auto_save, sweep)
pub fn record_transition(to: &str, source: &str) {
    counter!("sc_meeting_transitions_total",
        "to" => to.to_string(),
        "source" => source.to_string()
    )
    .increment(1);
}

// ============================================================================
// Transcript Metrics
// ============================================================================

/// Record an appended segment.
///
/// Metric: `sc_segments_appended_total`
/// Labels: `is_final`
pub fn record_segment_appended(is_final: bool) {
    counter!("sc_segments_appended_total",
        "is_final" => is_final.to_string()
    )
    .increment(1);
}

/// Record a partial auto-save.
///
/// Metric: `sc_auto_saves_total`
/// Labels: `status` (saved, skipped, error), `count_reset`
pub fn record_auto_save(status: &str, count_reset: bool) {
    counter!("sc_auto_saves_total",
        "status" => status.to_string(),
        "count_reset" => count_reset.to_string()
    )
    .increment(1);
}

/// Record a finalization outcome.
///
/// Metric: `sc_finalizations_total`
/// Labels: `trigger` (threshold, terminal), `outcome`
pub fn record_finalization(trigger: &str, outcome: &str) {
    counter!("sc_finalizations_total",
        "trigger" => trigger.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

// ============================================================================
// Summarization Metrics
// ============================================================================

/// Record a produced summary.
///
/// Metric: `sc_summaries_total`
/// Labels: `provenance` (ai, fallback), `reason`
pub fn record_summary(provenance: &str, reason: &str) {
    counter!("sc_summaries_total",
        "provenance" => provenance.to_string(),
        "reason" => reason.to_string()
    )
    .increment(1);
}

/// Record a call to the generative-text service.
///
/// Metric: `sc_ai_call_duration_seconds`, `sc_ai_calls_total`
/// Labels: `status` (success, error, timeout, malformed)
pub fn record_ai_call(status: &str, duration: Duration) {
    histogram!("sc_ai_call_duration_seconds",
        "status" => status.to_string()
    )
    .record(duration.as_secs_f64());

    counter!("sc_ai_calls_total",
        "status" => status.to_string()
    )
    .increment(1);
}

// ============================================================================
// Registry and Task Metrics
// ============================================================================

/// Set the number of registered meeting actors.
///
/// Metric: `sc_meeting_actors_active`
pub fn set_meeting_actors_active(count: usize) {
    gauge!("sc_meeting_actors_active").set(count as f64);
}

/// Record an expiry sweep run.
///
/// Metric: `sc_sweep_runs_total`, `sc_meetings_swept_total`
/// Labels: `status`
pub fn record_sweep(status: &str, swept: u64) {
    counter!("sc_sweep_runs_total",
        "status" => status.to_string()
    )
    .increment(1);

    counter!("sc_meetings_swept_total").increment(swept);
}

// ============================================================================
// Tests
// ============================================================================
