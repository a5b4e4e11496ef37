//! Background tasks for the session coordinator.
//!
//! # Tasks
//!
//! - `expiry_sweep` - Completes meetings whose scheduling window elapsed and
//!   hands them to their actors for the terminal transcript pass

pub mod expiry_sweep;

pub use expiry_sweep::{run_sweep_once, start_expiry_sweep};
