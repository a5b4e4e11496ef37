//! Domain services.
//!
//! - `state_machine` - legal meeting status transitions and the expiry sweep
//! - `token_issuer` - room-scoped credentials
//! - `presence` - participant join/leave bookkeeping
//! - `transcript` - canonical transcript assembly and content hashing
//! - `text_generator` - generative-text service client
//! - `summarizer` - AI summarization with deterministic fallback
//! - `sharing` - public share links and guest joins
//! - `meetings` - authenticated join, end, and status orchestration

pub mod meetings;
pub mod presence;
pub mod sharing;
pub mod state_machine;
pub mod summarizer;
pub mod text_generator;
pub mod token_issuer;
pub mod transcript;
