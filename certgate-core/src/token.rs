//! Session tokens handed out after a successful login
//!
//! Tokens are HS256 JWTs. The client may decode the claims to show who is
//! logged in and when the session ends, but only [`verify_session_token`]
//! establishes that the server issued them.

use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::Result;

/// How long a session token stays valid
pub const SESSION_LIFETIME_DAYS: i64 = 7;

/// Claims carried by a session token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    /// User id, as a decimal string
    pub sub: String,
    pub email: String,
    /// Issued-at (Unix timestamp)
    pub iat: i64,
    /// Expiration (Unix timestamp)
    pub exp: i64,
}

impl SessionClaims {
    pub fn new(user_id: i64, email: &str, issued_at: DateTime<Utc>, lifetime: Duration) -> Self {
        Self {
            sub: user_id.to_string(),
            email: email.to_string(),
            iat: issued_at.timestamp(),
            exp: (issued_at + lifetime).timestamp(),
        }
    }

    /// Claims for a session starting now with the default lifetime
    pub fn for_user(user_id: i64, email: &str) -> Self {
        Self::new(
            user_id,
            email,
            Utc::now(),
            Duration::days(SESSION_LIFETIME_DAYS),
        )
    }

    /// User id carried in `sub`
    pub fn user_id(&self) -> Result<i64> {
        self.sub
            .parse()
            .map_err(|_| Error::InvalidToken(format!("subject is not a user id: {}", self.sub)))
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.exp, 0)
            .single()
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now.timestamp() >= self.exp
    }
}

/// Sign claims into a session token
pub fn issue_session_token(claims: &SessionClaims, secret: &[u8]) -> Result<String> {
    let token = jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        claims,
        &EncodingKey::from_secret(secret),
    )?;
    Ok(token)
}

/// Check signature and expiry, returning the claims
pub fn verify_session_token(token: &str, secret: &[u8]) -> Result<SessionClaims> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = 0;
    validation.set_required_spec_claims(&["sub", "exp"]);

    jsonwebtoken::decode::<SessionClaims>(token, &DecodingKey::from_secret(secret), &validation)
        .map(|data| data.claims)
        .map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => Error::TokenExpired,
            _ => Error::InvalidToken(e.to_string()),
        })
}

/// Decode claims without checking the signature or expiry
///
/// Only for display on the client. Never base an authorization decision on
/// the result.
pub fn peek_claims(token: &str) -> Result<SessionClaims> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.required_spec_claims.clear();

    jsonwebtoken::decode::<SessionClaims>(token, &DecodingKey::from_secret(&[]), &validation)
        .map(|data| data.claims)
        .map_err(|e| Error::InvalidToken(e.to_string()))
}
