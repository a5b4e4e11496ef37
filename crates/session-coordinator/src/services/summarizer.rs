//! Transcript summarization.
//!
//! [`Summarizer::summarize`] never fails. The AI implementation converts
//! every upstream problem (transport error, timeout, malformed output) into
//! the deterministic fallback summary, so a finished meeting always ends up
//! with an artifact.

use crate::models::{Provenance, Summary};
use crate::observability::metrics;
use crate::services::text_generator::{TextGenerator, TextGeneratorError};
use crate::services::transcript::TranscriptSnapshot;
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::instrument;

const FALLBACK_SUMMARY: &str =
    "An automated summary is not available for this meeting. The full transcript has been saved.";

const FALLBACK_HIGHLIGHT: &str = "The complete transcript content is preserved for review.";

const SYSTEM_PROMPT: &str = "You summarize meeting transcripts. Respond with a single JSON object \
with the keys \"summary\" (a short paragraph), \"highlights\" (array of strings), \
\"actionItems\" (array of strings) and \"followUps\" (array of strings). \
Use only information present in the transcript.";

/// Why an AI summary could not be produced. Never leaves this module's callers
/// as an error; it is logged, counted, and replaced by the fallback.
#[derive(Debug, Error)]
pub enum SummarizeError {
    #[error("upstream AI failure: {0}")]
    UpstreamAiFailure(#[from] TextGeneratorError),

    #[error("AI call timed out after {0:?}")]
    Timeout(Duration),

    #[error("malformed AI output: {0}")]
    MalformedOutput(String),
}

impl SummarizeError {
    /// Metric label for the failure.
    pub fn reason(&self) -> &'static str {
        match self {
            SummarizeError::UpstreamAiFailure(_) => "upstream_error",
            SummarizeError::Timeout(_) => "timeout",
            SummarizeError::MalformedOutput(_) => "malformed_output",
        }
    }
}

/// Produces a structured summary of a transcript.
#[async_trait::async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, transcript: &TranscriptSnapshot) -> Summary;
}

/// Deterministic summary used whenever AI output is unavailable.
#[derive(Debug, Clone, Copy, Default)]
pub struct FallbackSummarizer;

impl FallbackSummarizer {
    pub fn summary() -> Summary {
        Summary {
            summary: FALLBACK_SUMMARY.to_string(),
            highlights: vec![FALLBACK_HIGHLIGHT.to_string()],
            action_items: Vec::new(),
            follow_ups: Vec::new(),
            provenance: Provenance::Fallback,
        }
    }
}

#[async_trait::async_trait]
impl Summarizer for FallbackSummarizer {
    async fn summarize(&self, _transcript: &TranscriptSnapshot) -> Summary {
        metrics::record_summary(Provenance::Fallback.as_str(), "ai_disabled");
        Self::summary()
    }
}

/// Summarizer backed by a generative-text service.
pub struct AiSummarizer<G: TextGenerator> {
    generator: Arc<G>,
    timeout: Duration,
}

impl<G: TextGenerator> AiSummarizer<G> {
    pub fn new(generator: Arc<G>, timeout: Duration) -> Self {
        Self { generator, timeout }
    }

    /// Run the AI step without the fallback.
    pub async fn try_summarize(
        &self,
        transcript: &TranscriptSnapshot,
    ) -> Result<Summary, SummarizeError> {
        let prompt = build_prompt(transcript);
        let start = Instant::now();

        let outcome =
            tokio::time::timeout(self.timeout, self.generator.generate(SYSTEM_PROMPT, &prompt))
                .await;

        let raw = match outcome {
            Ok(Ok(raw)) => {
                metrics::record_ai_call("success", start.elapsed());
                raw
            }
            Ok(Err(e)) => {
                metrics::record_ai_call("error", start.elapsed());
                return Err(e.into());
            }
            Err(_) => {
                metrics::record_ai_call("timeout", start.elapsed());
                return Err(SummarizeError::Timeout(self.timeout));
            }
        };

        parse_summary(&raw)
    }
}

#[async_trait::async_trait]
impl<G: TextGenerator> Summarizer for AiSummarizer<G> {
    #[instrument(
        skip_all,
        name = "sc.service.summarize",
        fields(final_segments = transcript.final_segment_count)
    )]
    async fn summarize(&self, transcript: &TranscriptSnapshot) -> Summary {
        match self.try_summarize(transcript).await {
            Ok(summary) => {
                metrics::record_summary(Provenance::Ai.as_str(), "ok");
                summary
            }
            Err(e) => {
                tracing::warn!(
                    target: "sc.service.summarizer",
                    error = %e,
                    "AI summarization failed, using fallback summary"
                );
                metrics::record_summary(Provenance::Fallback.as_str(), e.reason());
                FallbackSummarizer::summary()
            }
        }
    }
}

fn build_prompt(transcript: &TranscriptSnapshot) -> String {
    format!(
        "Participants: {}\n\nTranscript:\n{}",
        transcript.speakers.join(", "),
        transcript.content
    )
}

#[derive(Debug, Deserialize)]
struct RawSummary {
    #[serde(default)]
    summary: Option<String>,

    #[serde(default, alias = "keyPoints", alias = "key_points")]
    highlights: Vec<String>,

    #[serde(default, rename = "actionItems", alias = "action_items")]
    action_items: Vec<String>,

    #[serde(default, rename = "followUps", alias = "follow_ups")]
    follow_ups: Vec<String>,
}

/// Strip a Markdown code fence if the model wrapped its answer in one.
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string (e.g. "json") on the opening line
    let body = rest.split_once('\n').map_or("", |(_, body)| body);
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

fn clean_list(items: Vec<String>) -> Vec<String> {
    items
        .into_iter()
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect()
}

/// Parse and validate model output into a [`Summary`].
///
/// Accepts a bare JSON object, one wrapped in a code fence, or one surrounded
/// by prose. `summary` must be a non-empty string; list fields default to empty.
pub fn parse_summary(raw: &str) -> Result<Summary, SummarizeError> {
    let text = strip_code_fence(raw);

    let start = text
        .find('{')
        .ok_or_else(|| SummarizeError::MalformedOutput("no JSON object found".to_string()))?;
    let end = text
        .rfind('}')
        .filter(|end| *end > start)
        .ok_or_else(|| SummarizeError::MalformedOutput("unterminated JSON object".to_string()))?;
    let object = text
        .get(start..=end)
        .ok_or_else(|| SummarizeError::MalformedOutput("invalid JSON object bounds".to_string()))?;

    let parsed: RawSummary = serde_json::from_str(object)
        .map_err(|e| SummarizeError::MalformedOutput(e.to_string()))?;

    let summary = parsed
        .summary
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| SummarizeError::MalformedOutput("summary is missing or empty".to_string()))?;

    Ok(Summary {
        summary,
        highlights: clean_list(parsed.highlights),
        action_items: clean_list(parsed.action_items),
        follow_ups: clean_list(parsed.follow_ups),
        provenance: Provenance::Ai,
    })
}
