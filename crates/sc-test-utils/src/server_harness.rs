//! Test server harness for E2E testing
//!
//! Provides `TestCoordinatorServer` for spawning real coordinator instances
//! backed by the in-memory store and a mock text generator.

use crate::token_builders::TEST_IDENTITY_SECRET;
use metrics_exporter_prometheus::PrometheusBuilder;
use session_coordinator::actors::{
    MeetingContext, MeetingRegistry, MeetingRegistryHandle, PipelineSettings,
};
use session_coordinator::config::Config;
use session_coordinator::repositories::InMemoryStore;
use session_coordinator::routes::{self, AppState};
use session_coordinator::services::state_machine::SessionStateMachine;
use session_coordinator::services::summarizer::AiSummarizer;
use session_coordinator::services::text_generator::mock::MockTextGenerator;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Media API key the test server signs room credentials with.
pub const TEST_MEDIA_API_KEY: &str = "APItestkey";

/// Media API secret the test server signs room credentials with.
pub const TEST_MEDIA_API_SECRET: &str = "sc-test-media-secret-at-least-32-bytes";

/// Knobs for a test server.
pub struct TestServerOptions {
    /// Text generator behind the AI summarizer.
    pub generator: MockTextGenerator,

    /// Final segments before any AI pass.
    pub min_final_segments: usize,

    /// Final segments between enrichment passes.
    pub refresh_interval_segments: usize,

    /// Whether media credentials are configured.
    pub media_configured: bool,
}

impl Default for TestServerOptions {
    fn default() -> Self {
        Self {
            generator: MockTextGenerator::summarizing(),
            min_final_segments: 5,
            refresh_interval_segments: 20,
            media_configured: true,
        }
    }
}

/// Test harness for spawning the session coordinator in E2E tests.
///
/// # Example
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_health() -> anyhow::Result<()> {
///     let server = TestCoordinatorServer::spawn().await?;
///     let response = reqwest::get(format!("{}/health", server.url())).await?;
///     assert_eq!(response.status(), 200);
///     Ok(())
/// }
/// ```
pub struct TestCoordinatorServer {
    addr: SocketAddr,
    config: Config,
    store: Arc<InMemoryStore>,
    generator: Arc<MockTextGenerator>,
    state_machine: SessionStateMachine,
    registry: MeetingRegistryHandle,
    cancel_token: CancellationToken,
    _handle: JoinHandle<()>,
}

impl TestCoordinatorServer {
    /// Spawn a server with default options.
    pub async fn spawn() -> Result<Self, anyhow::Error> {
        Self::spawn_with(TestServerOptions::default()).await
    }

    /// Spawn a server on 127.0.0.1 with a random port.
    pub async fn spawn_with(options: TestServerOptions) -> Result<Self, anyhow::Error> {
        let mut vars = HashMap::from([
            ("STORAGE_BACKEND".to_string(), "memory".to_string()),
            ("BIND_ADDRESS".to_string(), "127.0.0.1:0".to_string()),
            (
                "IDENTITY_JWT_SECRET".to_string(),
                TEST_IDENTITY_SECRET.to_string(),
            ),
            (
                "MEDIA_SERVER_URL".to_string(),
                "ws://media.test:7880".to_string(),
            ),
            (
                "SUMMARY_MIN_FINAL_SEGMENTS".to_string(),
                options.min_final_segments.to_string(),
            ),
            (
                "SUMMARY_REFRESH_INTERVAL_SEGMENTS".to_string(),
                options.refresh_interval_segments.to_string(),
            ),
            ("REQUEST_TIMEOUT_SECONDS".to_string(), "10".to_string()),
        ]);
        if options.media_configured {
            vars.insert("MEDIA_API_KEY".to_string(), TEST_MEDIA_API_KEY.to_string());
            vars.insert(
                "MEDIA_API_SECRET".to_string(),
                TEST_MEDIA_API_SECRET.to_string(),
            );
        }

        let config = Config::from_vars(&vars)
            .map_err(|e| anyhow::anyhow!("Failed to create config: {}", e))?;

        let store = Arc::new(InMemoryStore::new());
        let generator = Arc::new(options.generator);
        let state_machine = SessionStateMachine::new(store.clone());
        let cancel_token = CancellationToken::new();

        let ctx = MeetingContext {
            store: store.clone(),
            state_machine: state_machine.clone(),
            summarizer: Arc::new(AiSummarizer::new(generator.clone(), config.ai_timeout)),
            settings: PipelineSettings::from_config(&config),
        };
        let (registry, _registry_task) =
            MeetingRegistry::spawn(ctx, cancel_token.child_token());

        let state = Arc::new(AppState::new(
            config.clone(),
            store.clone(),
            registry.clone(),
        ));

        // Not installed globally; tests may spawn many servers per process
        let metrics_handle = PrometheusBuilder::new().build_recorder().handle();
        let app = routes::build_routes(state, metrics_handle);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;

        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                eprintln!("Test server error: {}", e);
            }
        });

        Ok(Self {
            addr,
            config,
            store,
            generator,
            state_machine,
            registry,
            cancel_token,
            _handle: handle,
        })
    }

    /// Get the base URL of the test server.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Get the socket address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Get reference to the server configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The store behind the server, for seeding and inspection.
    pub fn store(&self) -> &InMemoryStore {
        &self.store
    }

    /// The mock text generator, for call counts.
    pub fn generator(&self) -> &MockTextGenerator {
        &self.generator
    }

    pub fn state_machine(&self) -> &SessionStateMachine {
        &self.state_machine
    }

    pub fn registry(&self) -> &MeetingRegistryHandle {
        &self.registry
    }

    /// Time to wait for a request that should return promptly.
    pub fn request_timeout(&self) -> Duration {
        self.config.request_timeout
    }
}

impl Drop for TestCoordinatorServer {
    fn drop(&mut self) {
        self._handle.abort();
        self.cancel_token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_server_spawns_successfully() -> Result<(), anyhow::Error> {
        let server = TestCoordinatorServer::spawn().await?;

        assert!(server.url().starts_with("http://127.0.0.1:"));

        let response = reqwest::get(format!("{}/health", server.url())).await?;
        assert_eq!(response.status(), 200);
        assert_eq!(response.text().await?, "OK");

        Ok(())
    }

    #[tokio::test]
    async fn test_server_reports_ready() -> Result<(), anyhow::Error> {
        let server = TestCoordinatorServer::spawn().await?;

        let response = reqwest::get(format!("{}/ready", server.url())).await?;
        assert_eq!(response.status(), 200);

        let body: serde_json::Value = response.json().await?;
        assert_eq!(body["status"], "ready");
        assert_eq!(body["active_meetings"], 0);

        Ok(())
    }

    #[tokio::test]
    async fn test_server_provides_addr() -> Result<(), anyhow::Error> {
        let server = TestCoordinatorServer::spawn().await?;
        let addr = server.addr();

        assert!(addr.ip().is_loopback());
        assert!(addr.port() > 0);
        assert_eq!(server.url(), format!("http://{}", addr));

        Ok(())
    }
}
