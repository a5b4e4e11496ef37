//! Observability module for the session coordinator.
//!
//! Provides metrics definitions and recording helpers.

pub mod metrics;
