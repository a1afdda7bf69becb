use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, error};

use memlane_types::api::{SESSION_AUDIENCE, SHARE_AUDIENCE, SessionClaims, ShareClaims};

use crate::error::ApiError;

/// Signs and verifies the two token kinds the API hands out.
///
/// Both are HS256 JWTs over the same secret; the audience claim keeps them
/// apart, so a share link can never be replayed as a bearer session.
#[derive(Clone)]
pub struct TokenKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    session_ttl: Duration,
    share_ttl: Duration,
}

impl TokenKeys {
    pub fn new(secret: &str, session_ttl: Duration, share_ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            session_ttl,
            share_ttl,
        }
    }

    pub fn issue_session(&self, user_id: i64, username: &str) -> Result<String, ApiError> {
        let now = Utc::now();
        let claims = SessionClaims {
            sub: user_id,
            username: username.to_string(),
            iat: now.timestamp(),
            exp: (now + self.session_ttl).timestamp(),
            aud: SESSION_AUDIENCE.to_string(),
        };
        self.sign(&claims)
    }

    pub fn verify_session(&self, token: &str) -> Result<SessionClaims, ApiError> {
        self.verify(token, SESSION_AUDIENCE)
    }

    /// Issue a read-only share token for `user_id`'s memories. Returns the
    /// token and its expiry.
    pub fn issue_share(&self, user_id: i64) -> Result<(String, DateTime<Utc>), ApiError> {
        let now = Utc::now();
        let expires_at = now + self.share_ttl;
        let claims = ShareClaims {
            sub: user_id,
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            aud: SHARE_AUDIENCE.to_string(),
        };
        Ok((self.sign(&claims)?, expires_at))
    }

    /// Returns the id of the user whose memories the token exposes.
    pub fn verify_share(&self, token: &str) -> Result<i64, ApiError> {
        self.verify::<ShareClaims>(token, SHARE_AUDIENCE)
            .map(|claims| claims.sub)
    }

    fn sign<C: Serialize>(&self, claims: &C) -> Result<String, ApiError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding).map_err(|e| {
            error!("Failed to sign token: {}", e);
            ApiError::Internal
        })
    }

    fn verify<C: DeserializeOwned>(&self, token: &str, audience: &str) -> Result<C, ApiError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&[audience]);

        decode::<C>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|e| {
                debug!("Rejected {} token: {}", audience, e);
                match e.kind() {
                    ErrorKind::ExpiredSignature => ApiError::Forbidden("Token has expired".into()),
                    _ => ApiError::Forbidden("Invalid token".into()),
                }
            })
    }
}
