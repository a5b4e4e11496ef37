//! Secret types for keeping signing keys and API credentials out of logs.
//!
//! Re-exports [`secrecy`] so every crate in the workspace wraps sensitive
//! configuration the same way. `SecretString` implements `Debug` with
//! redaction, so a struct that derives `Debug` around one stays safe to log.
//!
//! # Example
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! #[derive(Debug)]
//! struct MediaCredentials {
//!     api_key: String,
//!     api_secret: SecretString,
//! }
//!
//! let creds = MediaCredentials {
//!     api_key: "APIkey123".to_string(),
//!     api_secret: SecretString::from("room-signing-secret"),
//! };
//!
//! assert!(!format!("{creds:?}").contains("room-signing-secret"));
//! assert_eq!(creds.api_secret.expose_secret(), "room-signing-secret");
//! ```
//!
//! Use `SecretString` for:
//! - Media-room API secrets (credential signing)
//! - Identity provider HMAC secrets
//! - Generative-text service API keys
//! - Database URLs carrying passwords

pub use secrecy::{ExposeSecret, SecretString};
