//! Middleware for the session coordinator.
//!
//! # Components
//!
//! - `auth` - User token and room credential authentication
//! - `http_metrics` - HTTP request metrics for every response

pub mod auth;
pub mod http_metrics;

pub use auth::{require_room_credential, require_user_auth, AuthState, UserTokenValidator};
pub use http_metrics::http_metrics_middleware;
