//! JWT utilities shared across session coordinator crates.
//!
//! User tokens and room credentials both pass through [`check_token_shape`]
//! before any decoding, and both reject an `iat` beyond the configured skew.
//! Every rejection carries the same message; the reason is only logged.
//!
//! [`UserClaims`] hides `sub` and `org_id` from `Debug`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

// =============================================================================
// Constants
// =============================================================================

/// Upper bound on an encoded token. User tokens and room credentials are a
/// few hundred bytes.
pub const MAX_JWT_SIZE_BYTES: usize = 8192;

/// Skew allowed on `iat` when none is configured.
pub const DEFAULT_CLOCK_SKEW: Duration = Duration::from_secs(300);

/// Largest skew configuration accepts.
pub const MAX_CLOCK_SKEW: Duration = Duration::from_secs(600);

// =============================================================================
// Error Types
// =============================================================================

/// Token rejection reasons. All variants display identically.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JwtValidationError {
    /// Longer than [`MAX_JWT_SIZE_BYTES`].
    #[error("The access token is invalid or expired")]
    TokenTooLarge,

    /// Not `header.payload.signature`.
    #[error("The access token is invalid or expired")]
    MalformedToken,

    /// Issued further in the future than the skew allows.
    #[error("The access token is invalid or expired")]
    IatTooFarInFuture,
}

// =============================================================================
// Claims Types
// =============================================================================

/// Claims carried by a user token from the identity provider.
///
/// - `sub`: stable user id
/// - `org_id`: organization the user is acting in
/// - `name`: optional display name used as the default room display name
#[derive(Clone, Serialize, Deserialize)]
pub struct UserClaims {
    /// Subject (user id) - redacted in Debug output.
    pub sub: String,

    /// Organization membership - redacted in Debug output.
    pub org_id: String,

    /// Display name, if the identity provider supplies one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Unix seconds.
    pub exp: i64,

    /// Unix seconds.
    pub iat: i64,
}

impl fmt::Debug for UserClaims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserClaims")
            .field("sub", &"[REDACTED]")
            .field("org_id", &"[REDACTED]")
            .field("name", &self.name)
            .field("exp", &self.exp)
            .field("iat", &self.iat)
            .finish()
    }
}

impl UserClaims {
    /// Check whether the caller belongs to the given organization.
    #[must_use]
    pub fn is_member_of(&self, org_id: &str) -> bool {
        !self.org_id.is_empty() && self.org_id == org_id
    }
}

// =============================================================================
// Functions
// =============================================================================

/// Reject tokens that are empty, oversized, or not three dot-separated parts.
///
/// # Errors
///
/// - `TokenTooLarge` - Token exceeds `MAX_JWT_SIZE_BYTES`
/// - `MalformedToken` - Token is not `header.payload.signature`
pub fn check_token_shape(token: &str) -> Result<(), JwtValidationError> {
    if token.len() > MAX_JWT_SIZE_BYTES {
        tracing::debug!(
            target: "common.jwt",
            token_size = token.len(),
            max_size = MAX_JWT_SIZE_BYTES,
            "Oversized token rejected"
        );
        return Err(JwtValidationError::TokenTooLarge);
    }

    let parts = token.split('.').count();
    if parts != 3 || token.split('.').any(str::is_empty) {
        tracing::debug!(
            target: "common.jwt",
            parts = parts,
            "Token without three non-empty segments rejected"
        );
        return Err(JwtValidationError::MalformedToken);
    }

    Ok(())
}

/// Reject an `iat` more than `clock_skew` ahead of the local clock.
///
/// # Errors
///
/// `IatTooFarInFuture` when the token claims to be issued later than
/// now plus `clock_skew`.
pub fn validate_iat(iat: i64, clock_skew: Duration) -> Result<(), JwtValidationError> {
    let now = chrono::Utc::now().timestamp();
    validate_iat_at(iat, clock_skew, now)
}

/// [`validate_iat`] with the clock passed in.
pub(crate) fn validate_iat_at(
    iat: i64,
    clock_skew: Duration,
    now: i64,
) -> Result<(), JwtValidationError> {
    // clock_skew is bounded to MAX_CLOCK_SKEW by configuration
    #[allow(clippy::cast_possible_wrap)]
    let latest_allowed = now + clock_skew.as_secs() as i64;

    if iat > latest_allowed {
        tracing::debug!(
            target: "common.jwt",
            iat,
            now,
            latest_allowed,
            "Token issued in the future rejected"
        );
        return Err(JwtValidationError::IatTooFarInFuture);
    }

    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::cast_possible_wrap)]
mod tests {
    use super::*;
    use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};

    fn claims() -> UserClaims {
        let now = chrono::Utc::now().timestamp();
        UserClaims {
            sub: "user-1234".to_string(),
            org_id: "org-acme".to_string(),
            name: Some("Ada".to_string()),
            exp: now + 3600,
            iat: now,
        }
    }

    #[test]
    fn test_token_at_size_limit_is_accepted() {
        let body = "a".repeat(MAX_JWT_SIZE_BYTES - 4);
        assert!(check_token_shape(&format!("{body}.b.c")).is_ok());
    }

    #[test]
    fn test_check_token_shape_accepts_three_parts() {
        assert!(check_token_shape("aaa.bbb.ccc").is_ok());
    }

    #[test]
    fn test_check_token_shape_rejects_malformed() {
        assert_eq!(
            check_token_shape("not-a-jwt"),
            Err(JwtValidationError::MalformedToken)
        );
        assert_eq!(
            check_token_shape("a..c"),
            Err(JwtValidationError::MalformedToken)
        );
        assert_eq!(check_token_shape(""), Err(JwtValidationError::MalformedToken));
    }

    #[test]
    fn test_check_token_shape_rejects_oversized() {
        let oversized = format!("{}.b.c", "a".repeat(MAX_JWT_SIZE_BYTES));
        assert_eq!(
            check_token_shape(&oversized),
            Err(JwtValidationError::TokenTooLarge)
        );
    }

    #[test]
    fn test_iat_skew_boundary() {
        let now = 1_772_442_000_i64;
        let skew = DEFAULT_CLOCK_SKEW;

        assert!(validate_iat_at(now - 3600, skew, now).is_ok());
        assert!(validate_iat_at(now + 300, skew, now).is_ok());
        assert_eq!(
            validate_iat_at(now + 301, skew, now),
            Err(JwtValidationError::IatTooFarInFuture)
        );
    }

    #[test]
    fn test_fresh_claims_pass_iat_check() {
        assert!(validate_iat(claims().iat, DEFAULT_CLOCK_SKEW).is_ok());
    }

    #[test]
    fn test_user_claims_debug_redacts_identity() {
        let rendered = format!("{:?}", claims());

        assert!(!rendered.contains("user-1234"));
        assert!(!rendered.contains("org-acme"));
        assert!(rendered.contains("Ada"));
    }

    #[test]
    fn test_user_claims_membership() {
        let claims = claims();
        assert!(claims.is_member_of("org-acme"));
        assert!(!claims.is_member_of("org-other"));

        let orphan = UserClaims {
            org_id: String::new(),
            ..claims
        };
        assert!(!orphan.is_member_of(""));
    }

    #[test]
    fn test_user_claims_hs256_roundtrip_without_name() {
        let secret = b"identity-secret-for-tests-32bytes";
        let mut claims = claims();
        claims.name = None;

        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(secret),
        )
        .unwrap();
        assert!(!token.contains("\"name\""));

        let decoded = decode::<UserClaims>(
            &token,
            &DecodingKey::from_secret(secret),
            &Validation::new(Algorithm::HS256),
        )
        .unwrap();
        assert_eq!(decoded.claims.sub, "user-1234");
        assert!(decoded.claims.name.is_none());
    }
}
