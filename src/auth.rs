//! Bearer token authentication
//!
//! `BearerAuth` is a dispatch middleware: it reads `metadata.authorization`, verifies the token
//! through a [`TokenVerifier`] and forwards the request annotated with the caller's identity.

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::{
    middleware::{Middleware, MiddlewareError, MiddlewareOutcome, Rejection},
    protocol::{Identity, Request},
};

#[derive(Debug, Error)]
pub enum VerificationError {
    /// The token is malformed, expired or signed with another key.
    #[error("invalid token: {0}")]
    Invalid(String),
    /// Verification could not be attempted at all.
    #[error("token verification unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<Identity, VerificationError>;
}

/// HS256 verification against a shared secret.
///
/// `exp` is enforced when the token carries it but is not required.
#[derive(Clone)]
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn hs256(secret: &[u8]) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.required_spec_claims.clear();

        Self {
            key: DecodingKey::from_secret(secret),
            validation,
        }
    }
}

impl fmt::Debug for JwtVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtVerifier")
            .field("algorithms", &self.validation.algorithms)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl TokenVerifier for JwtVerifier {
    async fn verify(&self, token: &str) -> Result<Identity, VerificationError> {
        let data = decode::<Value>(token, &self.key, &self.validation)
            .map_err(|err| VerificationError::Invalid(err.to_string()))?;

        let subject = data
            .claims
            .get("sub")
            .and_then(Value::as_str)
            .map(str::to_string);

        Ok(Identity {
            subject,
            claims: data.claims,
        })
    }
}

/// Extracts the token from a `Bearer <token>` header value. The scheme is case-insensitive.
pub fn parse_bearer(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

#[derive(Clone)]
pub struct BearerAuth {
    verifier: Arc<dyn TokenVerifier>,
}

impl BearerAuth {
    pub fn new(verifier: impl TokenVerifier + 'static) -> Self {
        Self {
            verifier: Arc::new(verifier),
        }
    }
}

#[async_trait]
impl Middleware for BearerAuth {
    fn name(&self) -> &'static str {
        "bearer_auth"
    }

    async fn apply(&self, mut request: Request) -> Result<MiddlewareOutcome, MiddlewareError> {
        let Some(token) = request
            .metadata
            .authorization
            .as_deref()
            .and_then(parse_bearer)
        else {
            debug!(request_id = %request.id, "missing or malformed bearer token");
            return Ok(MiddlewareOutcome::Reject(Rejection::unauthorized(
                "invalid token",
            )));
        };

        match self.verifier.verify(token).await {
            Ok(identity) => {
                request.identity = Some(identity);
                Ok(MiddlewareOutcome::Proceed(request))
            }
            Err(VerificationError::Invalid(reason)) => {
                debug!(request_id = %request.id, reason = %reason, "bearer token rejected");
                Ok(MiddlewareOutcome::Reject(Rejection::unauthorized(
                    "invalid token",
                )))
            }
            Err(err @ VerificationError::Unavailable(_)) => Err(MiddlewareError::new(err.to_string())),
        }
    }
}


#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{test_support::*, *};
    use crate::errors::ErrorCode;

    fn auth() -> BearerAuth {
        BearerAuth::new(JwtVerifier::hs256(SECRET))
    }

    fn request(authorization: Option<String>) -> Request {
        let request = Request::tool_call(1, "add", json!({"a": 2, "b": 3}));
        match authorization {
            Some(value) => request.with_authorization(value),
            None => request,
        }
    }

    fn expect_unauthorized(outcome: MiddlewareOutcome) {
        match outcome {
            MiddlewareOutcome::Reject(rejection) => {
                assert_eq!(rejection.code, ErrorCode::Unauthorized);
                assert_eq!(rejection.message, "invalid token");
            }
            MiddlewareOutcome::Proceed(_) => panic!("request must be rejected"),
        }
    }

    #[test]
    fn parse_bearer_requires_scheme_and_token() {
        assert_eq!(parse_bearer("Bearer abc"), Some("abc"));
        assert_eq!(parse_bearer("bearer   abc "), Some("abc"));
        assert_eq!(parse_bearer("Basic abc"), None);
        assert_eq!(parse_bearer("Bearer "), None);
        assert_eq!(parse_bearer("abc"), None);
    }

    #[tokio::test]
    async fn valid_token_annotates_identity() {
        let header = bearer(&json!({"sub": "alice", "role": "admin"}));

        let outcome = auth().apply(request(Some(header))).await.expect("no failure");

        let MiddlewareOutcome::Proceed(forwarded) = outcome else {
            panic!("valid token must be accepted");
        };
        let identity = forwarded.identity.expect("identity attached");
        assert_eq!(identity.subject.as_deref(), Some("alice"));
        assert_eq!(identity.claims["role"], json!("admin"));
    }

    #[tokio::test]
    async fn missing_header_is_unauthorized() {
        let outcome = auth().apply(request(None)).await.expect("no failure");
        expect_unauthorized(outcome);
    }

    #[tokio::test]
    async fn wrong_scheme_is_unauthorized() {
        let token = mint(SECRET, &json!({"sub": "alice"}));
        let outcome = auth()
            .apply(request(Some(format!("Token {token}"))))
            .await
            .expect("no failure");
        expect_unauthorized(outcome);
    }

    #[tokio::test]
    async fn token_signed_with_another_key_is_unauthorized() {
        let token = mint(b"other-secret", &json!({"sub": "mallory"}));
        let outcome = auth()
            .apply(request(Some(format!("Bearer {token}"))))
            .await
            .expect("no failure");
        expect_unauthorized(outcome);
    }

    #[tokio::test]
    async fn expired_token_is_unauthorized() {
        let header = bearer(&json!({"sub": "alice", "exp": 1_000_000}));
        let outcome = auth().apply(request(Some(header))).await.expect("no failure");
        expect_unauthorized(outcome);
    }

    #[tokio::test]
    async fn unavailable_verifier_is_a_middleware_failure() {
        struct Offline;

        #[async_trait]
        impl TokenVerifier for Offline {
            async fn verify(&self, _token: &str) -> Result<Identity, VerificationError> {
                Err(VerificationError::Unavailable("key store offline".to_string()))
            }
        }

        let result = BearerAuth::new(Offline)
            .apply(request(Some("Bearer abc".to_string())))
            .await;
        assert!(result.is_err());
    }
}
