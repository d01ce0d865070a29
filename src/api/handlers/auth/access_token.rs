//! Stateless access tokens (HS256 JWT).
//!
//! Tokens are self-contained: nothing about an issued token is stored server
//! side, so validation touches no shared state. The flip side is that a leaked
//! token stays usable until `exp`; the short TTL is the only bound on that.

use chrono::Duration;
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use super::{clock::Clock, models::PrincipalKind};

pub const DEFAULT_ACCESS_TOKEN_TTL_SECONDS: i64 = 15 * 60;
pub const MIN_SECRET_BYTES: usize = 32;

const ALGORITHM: Algorithm = Algorithm::HS256;

#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
pub enum TokenError {
    #[error("token is malformed")]
    Malformed,
    #[error("token signature is invalid")]
    BadSignature,
    #[error("token has expired")]
    Expired,
    #[error("token could not be signed")]
    Signing,
    #[error("signing secret must be at least {MIN_SECRET_BYTES} bytes")]
    WeakSecret,
}

/// Identity embedded in an access token.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TokenSubject {
    pub principal_id: Uuid,
    pub email: String,
    pub principal_type: PrincipalKind,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    pub sub: Uuid,
    pub email: String,
    pub principal_type: PrincipalKind,
    pub iat: i64,
    pub exp: i64,
}

impl AccessTokenClaims {
    #[must_use]
    pub fn subject(&self) -> TokenSubject {
        TokenSubject {
            principal_id: self.sub,
            email: self.email.clone(),
            principal_type: self.principal_type,
        }
    }
}

pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    clock: Arc<dyn Clock>,
}

impl TokenIssuer {
    /// Build an issuer around a symmetric signing secret.
    ///
    /// # Errors
    /// Returns `TokenError::WeakSecret` if the secret is shorter than 32 bytes.
    pub fn new(secret: &SecretString, clock: Arc<dyn Clock>) -> Result<Self, TokenError> {
        let secret = secret.expose_secret().as_bytes();
        if secret.len() < MIN_SECRET_BYTES {
            return Err(TokenError::WeakSecret);
        }

        let mut validation = Validation::new(ALGORITHM);
        validation.algorithms = vec![ALGORITHM];
        // Expiry is checked against the injected clock with no leeway.
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.set_required_spec_claims(&["exp", "iat", "sub"]);

        Ok(Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
            clock,
        })
    }

    /// Sign a token for `subject` valid for `ttl` from now.
    ///
    /// # Errors
    /// Returns `TokenError::Signing` if encoding fails.
    pub fn issue(&self, subject: &TokenSubject, ttl: Duration) -> Result<String, TokenError> {
        let iat = self.clock.now().timestamp();
        let claims = AccessTokenClaims {
            sub: subject.principal_id,
            email: subject.email.clone(),
            principal_type: subject.principal_type,
            iat,
            exp: iat + ttl.num_seconds(),
        };
        encode(&Header::new(ALGORITHM), &claims, &self.encoding).map_err(|_| TokenError::Signing)
    }

    /// Verify integrity and expiry, returning the embedded claims.
    ///
    /// # Errors
    /// `Malformed` for anything that is not a well-formed HS256 token with the
    /// expected claims, `BadSignature` when the signature does not match and
    /// `Expired` once `now >= exp`.
    pub fn validate(&self, token: &str) -> Result<AccessTokenClaims, TokenError> {
        let data = decode::<AccessTokenClaims>(token, &self.decoding, &self.validation).map_err(
            |err| match err.kind() {
                ErrorKind::InvalidSignature => TokenError::BadSignature,
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Malformed,
            },
        )?;

        if self.clock.now().timestamp() >= data.claims.exp {
            return Err(TokenError::Expired);
        }

        Ok(data.claims)
    }
}
