//! Top-level owner sessions
//!
//! The gateway never logs users in itself; an upstream login page issues a
//! session token and the gateway only validates it. [`JwtSessionValidator`]
//! is the bundled implementation (HS256 with a shared secret) and also
//! mints tokens for `homeport token`.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_ISSUER: &str = "homeport";

/// Claims carried by a session token
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionClaims {
    /// Subject (user name)
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
}

impl SessionClaims {
    pub fn new(subject: impl Into<String>, issuer: impl Into<String>, validity: Duration) -> Self {
        let now = Utc::now();
        Self {
            sub: subject.into(),
            iat: now.timestamp(),
            exp: (now + validity).timestamp(),
            iss: issuer.into(),
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now().timestamp() >= self.exp
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session token missing")]
    Missing,

    #[error("Session token expired")]
    Expired,

    #[error("Invalid session token: {0}")]
    Invalid(String),

    #[error("Session token encoding error: {0}")]
    Encoding(String),
}

/// Decides whether a presented token is a valid top-level session
pub trait SessionValidator: Send + Sync {
    /// Validate a session token taken from the session cookie or a bearer header
    ///
    /// # Returns
    /// * `Ok(SessionClaims)` - The token is valid and unexpired
    /// * `Err(SessionError)` - Missing, expired or otherwise invalid
    fn validate(&self, token: &str) -> Result<SessionClaims, SessionError>;
}

/// HS256 session tokens with a fixed issuer
pub struct JwtSessionValidator {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    issuer: String,
}

impl JwtSessionValidator {
    pub fn new(secret: &[u8]) -> Self {
        Self::with_issuer(secret, DEFAULT_ISSUER)
    }

    pub fn with_issuer(secret: &[u8], issuer: impl Into<String>) -> Self {
        let issuer = issuer.into();
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.validate_aud = false;
        validation.validate_nbf = false;
        validation.leeway = 0;
        validation.set_issuer(&[issuer.as_str()]);

        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
            issuer,
        }
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Mint a session token for `subject`
    ///
    /// # Arguments
    /// * `subject` - Owner name stored in the `sub` claim
    /// * `validity` - How long the token stays valid from now
    ///
    /// # Returns
    /// * `Ok(String)` - Encoded HS256 JWT
    /// * `Err(SessionError::Encoding)` - If signing fails
    ///
    /// # Example
    /// ```
    /// use homeport_auth::{JwtSessionValidator, SessionValidator};
    ///
    /// let sessions = JwtSessionValidator::new(b"session-secret");
    /// let token = sessions.issue("owner", chrono::Duration::hours(1)).unwrap();
    /// assert_eq!(sessions.validate(&token).unwrap().sub, "owner");
    /// ```
    pub fn issue(&self, subject: &str, validity: Duration) -> Result<String, SessionError> {
        let claims = SessionClaims::new(subject, self.issuer.clone(), validity);
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| SessionError::Encoding(e.to_string()))
    }
}

impl SessionValidator for JwtSessionValidator {
    fn validate(&self, token: &str) -> Result<SessionClaims, SessionError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(SessionError::Missing);
        }

        let data = decode::<SessionClaims>(token, &self.decoding_key, &self.validation).map_err(
            |e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => SessionError::Expired,
                _ => SessionError::Invalid(e.to_string()),
            },
        )?;

        if data.claims.is_expired() {
            return Err(SessionError::Expired);
        }

        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_and_validate() {
        let validator = JwtSessionValidator::new(b"session-secret");
        let token = validator.issue("alice", Duration::hours(1)).unwrap();

        let claims = validator.validate(&token).unwrap();
        assert_eq!(claims.sub, "alice");
        assert_eq!(claims.iss, DEFAULT_ISSUER);
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let token = JwtSessionValidator::new(b"one")
            .issue("alice", Duration::hours(1))
            .unwrap();
        let result = JwtSessionValidator::new(b"two").validate(&token);
        assert!(matches!(result, Err(SessionError::Invalid(_))));
    }

    #[test]
    fn test_wrong_issuer_rejected() {
        let token = JwtSessionValidator::with_issuer(b"secret", "someone-else")
            .issue("alice", Duration::hours(1))
            .unwrap();
        let result = JwtSessionValidator::new(b"secret").validate(&token);
        assert!(matches!(result, Err(SessionError::Invalid(_))));
    }

    #[test]
    fn test_expired_token_rejected() {
        let validator = JwtSessionValidator::new(b"session-secret");
        let token = validator.issue("alice", Duration::seconds(-10)).unwrap();
        assert!(matches!(
            validator.validate(&token),
            Err(SessionError::Expired)
        ));
    }

    #[test]
    fn test_empty_and_garbage_tokens() {
        let validator = JwtSessionValidator::new(b"session-secret");
        assert!(matches!(validator.validate(""), Err(SessionError::Missing)));
        assert!(matches!(
            validator.validate("not.a.jwt"),
            Err(SessionError::Invalid(_))
        ));
    }
}
