use std::fmt;
use std::time::Duration;

use chrono::Utc;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use thiserror::Error;

use crate::models::{Claims, Role};

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("token signing failed: {0}")]
    Signing(jsonwebtoken::errors::Error),

    #[error("invalid token signature")]
    InvalidSignature,

    #[error("token has expired")]
    Expired,

    #[error("malformed token: {0}")]
    Malformed(String),
}

/// Issues and verifies HS256-signed session tokens.
///
/// Each instance carries its own secret and lifetime, so independently
/// configured services never accept each other's tokens.
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    ttl: Duration,
}

impl TokenService {
    pub fn new(secret: &[u8], ttl: Duration) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
            ttl,
        }
    }

    pub fn generate(&self, subject: &str, role: Role) -> Result<String, TokenError> {
        let now = Utc::now().timestamp().max(0) as u64;
        self.generate_at(subject, role, now)
    }

    pub(crate) fn generate_at(
        &self,
        subject: &str,
        role: Role,
        issued_at: u64,
    ) -> Result<String, TokenError> {
        let claims = Claims {
            sub: subject.to_owned(),
            role,
            iat: issued_at,
            exp: issued_at + self.ttl.as_secs(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding).map_err(TokenError::Signing)
    }

    pub fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        decode::<Claims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                ErrorKind::InvalidSignature => TokenError::InvalidSignature,
                _ => TokenError::Malformed(e.to_string()),
            })
    }
}

impl fmt::Debug for TokenService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenService")
            .field("secret", &"[REDACTED]")
            .field("ttl", &self.ttl)
            .finish()
    }
}
