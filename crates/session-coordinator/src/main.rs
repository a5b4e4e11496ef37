//! Session Coordinator
//!
//! Entry point for the meeting session coordinator service. Serves the HTTP
//! API, runs the expiry sweep, and recovers unfinished transcript
//! finalizations on startup.

use anyhow::Context;
use session_coordinator::actors::{
    recover_pending_finalizations, MeetingContext, MeetingRegistry, PipelineSettings,
};
use session_coordinator::config::{Config, StorageBackend};
use session_coordinator::observability::metrics::init_metrics_recorder;
use session_coordinator::repositories::{InMemoryStore, PgStore, Store};
use session_coordinator::routes::{self, AppState};
use session_coordinator::services::state_machine::SessionStateMachine;
use session_coordinator::services::summarizer::{AiSummarizer, FallbackSummarizer, Summarizer};
use session_coordinator::services::text_generator::HttpTextGenerator;
use session_coordinator::tasks::start_expiry_sweep;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How long background tasks get to stop after the server exits.
const TASK_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "session_coordinator=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Session Coordinator");

    let metrics_handle = init_metrics_recorder().map_err(|e| {
        error!("Failed to initialize metrics recorder: {}", e);
        anyhow::anyhow!(e)
    })?;

    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        bind_address = %config.bind_address,
        storage_backend = ?config.storage_backend,
        ai_enabled = config.ai.is_some(),
        "Configuration loaded successfully"
    );

    let store = build_store(&config).await?;
    let summarizer = build_summarizer(&config)?;
    let state_machine = SessionStateMachine::new(store.clone());

    let root_token = CancellationToken::new();

    let ctx = MeetingContext {
        store: store.clone(),
        state_machine: state_machine.clone(),
        summarizer,
        settings: PipelineSettings::from_config(&config),
    };
    let (registry, registry_task) = MeetingRegistry::spawn(ctx, root_token.child_token());

    match recover_pending_finalizations(store.as_ref(), &registry).await {
        Ok(count) if count > 0 => {
            info!(count = count, "Recovered pending transcript finalizations");
        }
        Ok(_) => {}
        Err(e) => {
            // Not fatal: the next restart retries, and stale claims can be retaken.
            warn!(error = %e, "Failed to recover pending finalizations");
        }
    }

    let sweep_token = root_token.child_token();
    let sweep_task = tokio::spawn(
        start_expiry_sweep(
            state_machine,
            registry.clone(),
            config.sweep_interval,
            sweep_token.clone(),
        )
        .instrument(info_span!("sc.task.sweep")),
    );

    let bind_address = config.bind_address.clone();
    let shutdown_drain = config.shutdown_drain;

    let state = Arc::new(AppState::new(config, store, registry.clone()));
    let app = routes::build_routes(state, metrics_handle);

    let addr: SocketAddr = bind_address.parse().map_err(|e| {
        error!("Invalid bind address: {}", e);
        e
    })?;

    info!("Session Coordinator listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_drain))
        .await?;

    info!("HTTP server stopped, shutting down background tasks");

    sweep_token.cancel();
    if tokio::time::timeout(TASK_SHUTDOWN_TIMEOUT, sweep_task)
        .await
        .is_err()
    {
        warn!("Expiry sweep did not stop in time");
    }

    if let Err(e) = registry.shutdown(shutdown_drain).await {
        warn!(error = %e, "Meeting registry shutdown failed");
    }
    root_token.cancel();
    if tokio::time::timeout(TASK_SHUTDOWN_TIMEOUT, registry_task)
        .await
        .is_err()
    {
        warn!("Meeting registry did not stop in time");
    }

    info!("Session Coordinator shutdown complete");

    Ok(())
}

/// Connect the configured storage backend.
async fn build_store(config: &Config) -> anyhow::Result<Arc<dyn Store>> {
    match config.storage_backend {
        StorageBackend::Postgres => {
            let database_url = config
                .database_url
                .as_deref()
                .context("DATABASE_URL is required for the postgres backend")?;

            info!("Connecting to database...");
            let pool = sqlx::postgres::PgPoolOptions::new()
                .max_connections(20)
                .min_connections(2)
                .acquire_timeout(Duration::from_secs(5))
                .idle_timeout(Duration::from_secs(600))
                .max_lifetime(Duration::from_secs(1800))
                .connect(&add_query_timeout(database_url, 5))
                .await
                .map_err(|e| {
                    error!("Failed to connect to database: {}", e);
                    e
                })?;

            sqlx::migrate!("../../migrations")
                .run(&pool)
                .await
                .context("failed to run database migrations")?;

            info!("Database connection established");
            Ok(Arc::new(PgStore::new(pool)))
        }
        StorageBackend::Memory => {
            warn!("Using the in-memory store: all state is lost on restart");
            Ok(Arc::new(InMemoryStore::new()))
        }
    }
}

/// AI summarizer when a generative-text service is configured, else fallback only.
fn build_summarizer(config: &Config) -> anyhow::Result<Arc<dyn Summarizer>> {
    match &config.ai {
        Some(ai) => {
            let generator = HttpTextGenerator::new(ai, config.ai_timeout)
                .context("failed to build text generator client")?;
            info!(model = %ai.model, "AI summarization enabled");
            Ok(Arc::new(AiSummarizer::new(
                Arc::new(generator),
                config.ai_timeout,
            )))
        }
        None => {
            warn!("AI_API_URL not configured: transcripts get fallback summaries only");
            Ok(Arc::new(FallbackSummarizer))
        }
    }
}

/// Listens for shutdown signals (SIGTERM, SIGINT).
/// Returns when a shutdown signal is received and the drain period is complete.
async fn shutdown_signal(drain: Duration) {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT, starting graceful shutdown..."),
            Err(e) => error!("Failed to listen for SIGINT: {}", e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received SIGTERM, starting graceful shutdown...");
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    if drain.is_zero() {
        info!("Skipping drain period (SHUTDOWN_DRAIN_SECONDS=0)");
    } else {
        warn!("Draining connections for {} seconds...", drain.as_secs());
        tokio::time::sleep(drain).await;
        info!("Drain period complete");
    }
}

/// Adds statement_timeout to the database URL so queries cannot hang indefinitely.
fn add_query_timeout(url: &str, timeout_secs: u32) -> String {
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{url}{separator}options=-c%20statement_timeout%3D{timeout_secs}s")
}
