//! Builder patterns for identity provider user tokens.

use chrono::{Duration, Utc};
use common::jwt::UserClaims;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};

/// Identity secret the test server validates user tokens with.
pub const TEST_IDENTITY_SECRET: &str = "sc-test-identity-secret-do-not-use-in-production";

/// Builder for signed user tokens.
///
/// # Example
/// ```rust,ignore
/// let token = TestUserToken::new("alice", "org-1")
///     .named("Alice")
///     .expires_in(600)
///     .sign();
/// ```
pub struct TestUserToken {
    claims: UserClaims,
    secret: String,
}

impl TestUserToken {
    /// Token for `user_id` in `org_id`, valid for one hour.
    pub fn new(user_id: &str, org_id: &str) -> Self {
        let now = Utc::now();
        Self {
            claims: UserClaims {
                sub: user_id.to_string(),
                org_id: org_id.to_string(),
                name: None,
                exp: (now + Duration::seconds(3600)).timestamp(),
                iat: now.timestamp(),
            },
            secret: TEST_IDENTITY_SECRET.to_string(),
        }
    }

    /// Set the display name claim.
    pub fn named(mut self, name: &str) -> Self {
        self.claims.name = Some(name.to_string());
        self
    }

    /// Set expiration in seconds from now (negative for an expired token).
    pub fn expires_in(mut self, seconds: i64) -> Self {
        self.claims.exp = (Utc::now() + Duration::seconds(seconds)).timestamp();
        self
    }

    /// Set issued-at timestamp.
    pub fn issued_at(mut self, timestamp: i64) -> Self {
        self.claims.iat = timestamp;
        self
    }

    /// Sign with a different secret.
    pub fn signed_with(mut self, secret: &str) -> Self {
        self.secret = secret.to_string();
        self
    }

    /// The claims as they will be signed.
    pub fn claims(&self) -> &UserClaims {
        &self.claims
    }

    /// Produce the HS256 token.
    pub fn sign(self) -> String {
        encode(
            &Header::new(Algorithm::HS256),
            &self.claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .expect("HS256 signing with an in-memory key cannot fail")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let token = TestUserToken::new("alice", "org-1");
        assert_eq!(token.claims().sub, "alice");
        assert_eq!(token.claims().org_id, "org-1");
        assert!(token.claims().name.is_none());
        assert!(token.claims().exp > token.claims().iat);
    }

    #[test]
    fn test_signed_token_has_three_parts() {
        let token = TestUserToken::new("alice", "org-1").named("Alice").sign();
        assert_eq!(token.split('.').count(), 3);
    }

    #[test]
    fn test_expired_builder() {
        let token = TestUserToken::new("alice", "org-1").expires_in(-60);
        assert!(token.claims().exp < Utc::now().timestamp());
    }
}
