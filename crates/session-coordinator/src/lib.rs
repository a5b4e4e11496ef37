//! Session Coordinator Library
//!
//! The session coordinator owns the lifecycle of a meeting's media room:
//!
//! - Session state machine (scheduled, in progress, completed, cancelled)
//! - Room-scoped access credentials for members and guests
//! - Participant presence tracking
//! - Transcript segment ingestion with per-meeting serialization
//! - Exactly-once AI summarization with deterministic fallback
//! - Public share links for anonymous joins
//!
//! # Architecture
//!
//! Handler -> Service -> Repository, with a per-meeting actor owning the
//! transcript stream:
//!
//! ```text
//! routes/mod.rs -> handlers/*.rs -> services/*.rs -> repositories/*.rs
//!                                       |
//!                                       v
//!                         actors/registry.rs -> actors/meeting.rs
//! ```
//!
//! # Modules
//!
//! - `actors` - Meeting registry and per-meeting actors
//! - `config` - Service configuration from environment
//! - `errors` - Error types with HTTP status code mapping
//! - `handlers` - HTTP request handlers
//! - `middleware` - User and room credential authentication
//! - `models` - Data models
//! - `observability` - Prometheus metrics
//! - `repositories` - Storage trait with Postgres and in-memory backends
//! - `routes` - Axum router setup
//! - `services` - Domain services
//! - `tasks` - Background tasks

pub mod actors;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod observability;
pub mod repositories;
pub mod routes;
pub mod services;
pub mod tasks;
