//! Authentication middleware for protected routes.
//!
//! Provides two middleware functions:
//! - `require_user_auth` - Identity provider user tokens (injects `UserClaims`)
//! - `require_room_credential` - Room credentials minted by this service
//!   (injects `RoomClaims`)
//!
//! Both extract the Bearer token from the Authorization header and reject
//! anything that fails validation with a generic 401.

use crate::errors::CoordinatorError;
use crate::services::token_issuer::AccessTokenIssuer;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::IntoResponse,
};
use common::jwt::{check_token_shape, validate_iat, UserClaims};
use common::secret::{ExposeSecret, SecretString};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

const INVALID_TOKEN: &str = "The access token is invalid or expired";

/// Validates HS256 user tokens issued by the identity provider.
pub struct UserTokenValidator {
    secret: SecretString,
    clock_skew: Duration,
}

impl UserTokenValidator {
    pub fn new(secret: SecretString, clock_skew: Duration) -> Self {
        Self { secret, clock_skew }
    }

    /// Validate a user token and return its claims.
    ///
    /// # Security Checks
    ///
    /// 1. Size and shape check before any decoding
    /// 2. HS256 signature
    /// 3. `exp` (expired tokens rejected)
    /// 4. `iat` with clock skew tolerance
    /// 5. Non-empty `sub` and `org_id`
    ///
    /// # Errors
    ///
    /// Returns `CoordinatorError::Unauthorized` with a generic message for
    /// every failure.
    #[instrument(skip_all)]
    pub fn validate(&self, token: &str) -> Result<UserClaims, CoordinatorError> {
        let invalid = || CoordinatorError::Unauthorized(INVALID_TOKEN.to_string());

        check_token_shape(token).map_err(|e| {
            tracing::debug!(target: "sc.middleware.auth", error = ?e, "Token shape rejected");
            invalid()
        })?;

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.set_required_spec_claims(&["exp", "sub"]);

        let claims = decode::<UserClaims>(
            token,
            &DecodingKey::from_secret(self.secret.expose_secret().as_bytes()),
            &validation,
        )
        .map_err(|e| {
            tracing::debug!(target: "sc.middleware.auth", error = %e, "Token verification failed");
            invalid()
        })?
        .claims;

        if let Err(e) = validate_iat(claims.iat, self.clock_skew) {
            tracing::debug!(
                target: "sc.middleware.auth",
                error = ?e,
                "Token iat validation failed"
            );
            return Err(invalid());
        }

        if claims.sub.trim().is_empty() || claims.org_id.trim().is_empty() {
            tracing::debug!(target: "sc.middleware.auth", "Token missing subject or organization");
            return Err(invalid());
        }

        Ok(claims)
    }
}

/// State for the authentication middleware.
#[derive(Clone)]
pub struct AuthState {
    /// User token validator.
    pub user_tokens: Arc<UserTokenValidator>,

    /// Verifies room credentials for presence callbacks.
    pub issuer: AccessTokenIssuer,
}

/// Extract Bearer token from the Authorization header.
pub(crate) fn extract_bearer_token(req: &Request) -> Result<&str, CoordinatorError> {
    let auth_header = req
        .headers()
        .get("authorization")
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| {
            tracing::debug!(target: "sc.middleware.auth", "Missing Authorization header");
            CoordinatorError::Unauthorized("Missing Authorization header".to_string())
        })?;

    auth_header.strip_prefix("Bearer ").ok_or_else(|| {
        tracing::debug!(target: "sc.middleware.auth", "Invalid Authorization header format");
        CoordinatorError::Unauthorized("Invalid Authorization header format".to_string())
    })
}

/// Authentication middleware for user tokens.
///
/// # Response
///
/// - Returns 401 Unauthorized if token is missing or invalid
/// - Continues to next handler with `UserClaims` in extensions if token is valid
#[instrument(skip_all, name = "sc.middleware.user_auth")]
pub async fn require_user_auth(
    State(state): State<Arc<AuthState>>,
    mut req: Request,
    next: Next,
) -> Result<impl IntoResponse, CoordinatorError> {
    let token = extract_bearer_token(&req)?;
    let claims = state.user_tokens.validate(token)?;

    req.extensions_mut().insert(claims);

    Ok(next.run(req).await)
}

/// Authentication middleware for room credentials.
///
/// # Response
///
/// - Returns 401 Unauthorized if the credential is missing or invalid
/// - Continues to next handler with `RoomClaims` in extensions if valid
#[instrument(skip_all, name = "sc.middleware.room_auth")]
pub async fn require_room_credential(
    State(state): State<Arc<AuthState>>,
    mut req: Request,
    next: Next,
) -> Result<impl IntoResponse, CoordinatorError> {
    let token = extract_bearer_token(&req)?;
    let claims = state.issuer.verify_credential(token)?;

    req.extensions_mut().insert(claims);

    Ok(next.run(req).await)
}
