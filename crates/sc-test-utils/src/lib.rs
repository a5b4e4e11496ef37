//! # Session Coordinator Test Utilities
//!
//! Shared test utilities for the session coordinator.
//!
//! This crate provides:
//! - Server test harness (`TestCoordinatorServer` for E2E tests)
//! - User token builders signed with the harness identity secret
//! - Meeting fixtures for the in-memory store
//! - Eventual-consistency assertions for background work
//!
//! ## Usage
//!
//! ```rust,ignore
//! use sc_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() -> anyhow::Result<()> {
//!     let server = TestCoordinatorServer::spawn().await?;
//!     let meeting = MeetingFixture::new("org-1").insert(server.store()).await;
//!     let token = TestUserToken::new("user-1", "org-1").sign();
//!
//!     let response = reqwest::Client::new()
//!         .get(format!("{}/api/v1/meetings/{}", server.url(), meeting.meeting_id))
//!         .bearer_auth(token)
//!         .send()
//!         .await?;
//!
//!     assert_eq!(response.status(), 200);
//!     Ok(())
//! }
//! ```

pub mod eventual;
pub mod fixtures;
pub mod server_harness;
pub mod token_builders;

pub use eventual::*;
pub use fixtures::*;
pub use server_harness::*;
pub use token_builders::*;
