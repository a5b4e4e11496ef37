//! Generative-text service client.
//!
//! The model is an opaque text-in, text-out function. The HTTP client speaks
//! the OpenAI-compatible chat completions protocol with a bearer API key and
//! asks for a JSON object response.
//!
//! # Security
//!
//! - The API key is held as `SecretString` and never logged
//! - Transcript content is never logged; only sizes and status codes are

use crate::config::AiConfig;
use common::secret::{ExposeSecret, SecretString};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{error, instrument, warn};

/// Connect timeout for the generative-text service.
const CONNECT_TIMEOUT_SECS: u64 = 5;

#[derive(Debug, Error)]
pub enum TextGeneratorError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("service returned status {0}")]
    Status(u16),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Text generation seam.
#[async_trait::async_trait]
pub trait TextGenerator: Send + Sync {
    /// Generate a completion for the given prompts.
    async fn generate(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<String, TextGeneratorError>;
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    response_format: ResponseFormat,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

/// HTTP client for an OpenAI-compatible chat completions endpoint.
#[derive(Clone)]
pub struct HttpTextGenerator {
    client: Client,
    api_url: String,
    api_key: SecretString,
    model: String,
}

impl HttpTextGenerator {
    /// Create a client. `timeout` bounds each request end to end.
    ///
    /// # Errors
    ///
    /// Returns `TextGeneratorError::Request` if the HTTP client cannot be built.
    pub fn new(config: &AiConfig, timeout: Duration) -> Result<Self, TextGeneratorError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| {
                error!(target: "sc.service.text_generator", error = %e, "Failed to build HTTP client");
                TextGeneratorError::Request(e.to_string())
            })?;

        Ok(Self {
            client,
            api_url: config.api_url.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        })
    }
}

#[async_trait::async_trait]
impl TextGenerator for HttpTextGenerator {
    #[instrument(skip_all, fields(model = %self.model, prompt_bytes = user_prompt.len()))]
    async fn generate(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<String, TextGeneratorError> {
        let request = ChatCompletionRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: user_prompt,
                },
            ],
            response_format: ResponseFormat {
                kind: "json_object",
            },
            temperature: 0.2,
        };

        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(self.api_key.expose_secret())
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                warn!(target: "sc.service.text_generator", error = %e, "Text generation request failed");
                TextGeneratorError::Request(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            warn!(target: "sc.service.text_generator", status = %status, "Text generation service returned an error");
            return Err(TextGeneratorError::Status(status.as_u16()));
        }

        let body: ChatCompletionResponse = response.json().await.map_err(|e| {
            warn!(target: "sc.service.text_generator", error = %e, "Failed to parse completion response");
            TextGeneratorError::InvalidResponse(e.to_string())
        })?;

        body.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| TextGeneratorError::InvalidResponse("empty completion".to_string()))
    }
}

/// Mock implementations of the text generator for tests.
pub mod mock {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Mock text generator.
    pub struct MockTextGenerator {
        /// Completions to return (cycles through them).
        responses: Vec<String>,
        /// Number of calls made.
        call_count: AtomicUsize,
        /// Whether to return errors.
        return_error: bool,
        /// Artificial latency per call.
        delay: Option<Duration>,
    }

    impl MockTextGenerator {
        /// Always return `response`.
        pub fn returning(response: impl Into<String>) -> Self {
            Self::with_responses(vec![response.into()])
        }

        /// Return custom completions in sequence.
        pub fn with_responses(responses: Vec<String>) -> Self {
            Self {
                responses,
                call_count: AtomicUsize::new(0),
                return_error: false,
                delay: None,
            }
        }

        /// A well-formed summary completion.
        pub fn summarizing() -> Self {
            Self::returning(
                r#"{"summary":"The team reviewed progress.","highlights":["Progress reviewed"],"actionItems":["Send notes"],"followUps":["Check in next week"]}"#,
            )
        }

        /// Always fail.
        pub fn failing() -> Self {
            Self {
                responses: vec![],
                call_count: AtomicUsize::new(0),
                return_error: true,
                delay: None,
            }
        }

        /// Sleep for `delay` before answering.
        pub fn delayed(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        /// Get the number of calls made.
        pub fn call_count(&self) -> usize {
            self.call_count.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl TextGenerator for MockTextGenerator {
        async fn generate(
            &self,
            _system_prompt: &str,
            _user_prompt: &str,
        ) -> Result<String, TextGeneratorError> {
            let count = self.call_count.fetch_add(1, Ordering::SeqCst);

            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }

            if self.return_error {
                return Err(TextGeneratorError::Status(503));
            }

            if self.responses.is_empty() {
                return Err(TextGeneratorError::InvalidResponse(
                    "no scripted response".to_string(),
                ));
            }

            let idx = count % self.responses.len();
            self.responses
                .get(idx)
                .cloned()
                .ok_or_else(|| {
                    TextGeneratorError::InvalidResponse("no scripted response".to_string())
                })
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::mock::MockTextGenerator;
    use super::*;
    use wiremock::matchers::{bearer_token, body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(url: String) -> AiConfig {
        AiConfig {
            api_url: url,
            api_key: SecretString::from("sk-test".to_string()),
            model: "test-model".to_string(),
        }
    }

    #[tokio::test]
    async fn test_http_generator_reads_first_choice() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(bearer_token("sk-test"))
            .and(body_partial_json(serde_json::json!({
                "model": "test-model",
                "response_format": {"type": "json_object"}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"role": "assistant", "content": "{\"summary\":\"ok\"}"}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let generator = HttpTextGenerator::new(
            &config(format!("{}/v1/chat/completions", server.uri())),
            Duration::from_secs(5),
        )
        .unwrap();

        let text = generator.generate("system", "user").await.unwrap();
        assert_eq!(text, "{\"summary\":\"ok\"}");
    }

    #[tokio::test]
    async fn test_http_generator_maps_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let generator =
            HttpTextGenerator::new(&config(server.uri()), Duration::from_secs(5)).unwrap();

        let result = generator.generate("system", "user").await;
        assert!(matches!(result, Err(TextGeneratorError::Status(500))));
    }

    #[tokio::test]
    async fn test_http_generator_rejects_empty_choices() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"choices": []})),
            )
            .mount(&server)
            .await;

        let generator =
            HttpTextGenerator::new(&config(server.uri()), Duration::from_secs(5)).unwrap();

        let result = generator.generate("system", "user").await;
        assert!(matches!(result, Err(TextGeneratorError::InvalidResponse(_))));
    }

    #[tokio::test]
    async fn test_mock_cycles_and_counts() {
        let mock = MockTextGenerator::with_responses(vec!["a".to_string(), "b".to_string()]);
        assert_eq!(mock.generate("", "").await.unwrap(), "a");
        assert_eq!(mock.generate("", "").await.unwrap(), "b");
        assert_eq!(mock.generate("", "").await.unwrap(), "a");
        assert_eq!(mock.call_count(), 3);
    }

    #[tokio::test]
    async fn test_mock_failing() {
        let mock = MockTextGenerator::failing();
        assert!(mock.generate("", "").await.is_err());
        assert_eq!(mock.call_count(), 1);
    }
}
