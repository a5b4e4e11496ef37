//! HTTP routes for the session coordinator.
//!
//! Defines the Axum router and application state.

use crate::actors::MeetingRegistryHandle;
use crate::config::Config;
use crate::handlers;
use crate::middleware::{
    http_metrics_middleware, require_room_credential, require_user_auth, AuthState,
    UserTokenValidator,
};
use crate::repositories::Store;
use crate::services::meetings::MeetingService;
use crate::services::presence::PresenceTracker;
use crate::services::sharing::SharingGateway;
use crate::services::state_machine::SessionStateMachine;
use crate::services::token_issuer::AccessTokenIssuer;
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Service configuration.
    pub config: Config,

    /// Persistent store.
    pub store: Arc<dyn Store>,

    /// Per-meeting actors.
    pub registry: MeetingRegistryHandle,

    /// Mints and verifies room credentials.
    pub issuer: AccessTokenIssuer,

    pub meetings: MeetingService,
    pub sharing: SharingGateway,
    pub presence: PresenceTracker,
}

impl AppState {
    /// Wire the domain services over one store and registry.
    pub fn new(config: Config, store: Arc<dyn Store>, registry: MeetingRegistryHandle) -> Self {
        let state_machine = SessionStateMachine::new(store.clone());
        let presence = PresenceTracker::new(store.clone());
        let issuer = AccessTokenIssuer::from_config(&config);

        let meetings = MeetingService::new(
            store.clone(),
            state_machine.clone(),
            presence.clone(),
            issuer.clone(),
            registry.clone(),
        );
        let sharing = SharingGateway::new(
            store.clone(),
            state_machine,
            presence.clone(),
            issuer.clone(),
        );

        Self {
            config,
            store,
            registry,
            issuer,
            meetings,
            sharing,
            presence,
        }
    }
}

/// Build the application routes.
///
/// - `/health`, `/ready`, `/metrics` - public, unversioned
/// - `/api/v1/share/:token[/join]` - public share links
/// - `/api/v1/meetings/:id/...` - user token required
/// - `/api/v1/rooms/:id/presence` - room credential required
/// - TraceLayer for request logging
/// - HTTP metrics middleware (outermost)
/// - Request timeout from configuration
pub fn build_routes(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let auth_state = Arc::new(AuthState {
        user_tokens: Arc::new(UserTokenValidator::new(
            state.config.identity_jwt_secret.clone(),
            state.config.jwt_clock_skew,
        )),
        issuer: state.issuer.clone(),
    });
    let request_timeout = state.config.request_timeout;

    let public_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/api/v1/share/:token", get(handlers::resolve_share))
        .route("/api/v1/share/:token/join", post(handlers::join_by_share))
        .with_state(state.clone());

    let metrics_routes = Router::new()
        .route("/metrics", get(handlers::metrics_handler))
        .with_state(metrics_handle);

    let user_routes = Router::new()
        .route("/api/v1/meetings/:id", get(handlers::get_meeting))
        .route("/api/v1/meetings/:id/join", post(handlers::join_meeting))
        .route("/api/v1/meetings/:id/status", post(handlers::update_status))
        .route("/api/v1/meetings/:id/end", post(handlers::end_meeting))
        .route(
            "/api/v1/meetings/:id/segments",
            post(handlers::append_segment).get(handlers::list_segments),
        )
        .route(
            "/api/v1/meetings/:id/transcript",
            get(handlers::get_transcript),
        )
        .route(
            "/api/v1/meetings/:id/transcript/auto-save",
            post(handlers::auto_save),
        )
        .route(
            "/api/v1/meetings/:id/share",
            post(handlers::create_share).delete(handlers::revoke_share),
        )
        .route_layer(middleware::from_fn_with_state(
            auth_state.clone(),
            require_user_auth,
        ))
        .with_state(state.clone());

    let room_routes = Router::new()
        .route(
            "/api/v1/rooms/:id/presence",
            post(handlers::update_presence),
        )
        .route_layer(middleware::from_fn_with_state(
            auth_state,
            require_room_credential,
        ))
        .with_state(state);

    // Layer order (bottom-to-top execution):
    // 1. TimeoutLayer (innermost)
    // 2. TraceLayer
    // 3. http_metrics_middleware (outermost, sees framework rejections too)
    public_routes
        .merge(metrics_routes)
        .merge(user_routes)
        .merge(room_routes)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(request_timeout))
        .layer(middleware::from_fn(http_metrics_middleware))
}
