//! Stateless per-port proof cookies
//!
//! A successful password challenge yields a cookie named
//! `homeport_auth_{port}` whose value is
//!
//! ```text
//! base64url("{port}:{expires_at_unix}:{base64url(hmac_sha256)}")
//! ```
//!
//! Validity is fully determined by the signature and the expiry; nothing is
//! stored server side. The MAC input also covers a SHA-256 fingerprint of the
//! port's password hash at issuance, so changing the password invalidates
//! every cookie issued under the previous one.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CookieError {
    #[error("cookie signing key must not be empty")]
    InvalidKey,

    #[error("malformed auth cookie")]
    Malformed,

    #[error("auth cookie issued for port {found}, not {expected}")]
    WrongPort { expected: u16, found: u16 },

    #[error("auth cookie expired")]
    Expired,

    #[error("auth cookie signature mismatch")]
    BadSignature,
}

/// A freshly issued proof cookie
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthCookie {
    pub port: u16,
    pub value: String,
    pub expires_at: DateTime<Utc>,
}

impl AuthCookie {
    pub fn name(&self) -> String {
        homeport_proto::auth_cookie_name(self.port)
    }

    /// Seconds until expiry, for the `Max-Age` attribute
    pub fn max_age(&self, now: DateTime<Utc>) -> i64 {
        (self.expires_at - now).num_seconds().max(0)
    }
}

/// Issues and checks proof cookies with a process-wide secret
#[derive(Clone)]
pub struct CookieSigner {
    key: Vec<u8>,
    ttl: Duration,
}

impl std::fmt::Debug for CookieSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CookieSigner")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl CookieSigner {
    pub fn new(key: impl Into<Vec<u8>>, ttl: Duration) -> Result<Self, CookieError> {
        let key = key.into();
        if key.is_empty() {
            return Err(CookieError::InvalidKey);
        }
        Ok(Self { key, ttl })
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn issue(&self, port: u16, password_hash: &str, now: DateTime<Utc>) -> AuthCookie {
        let expires_at = now + self.ttl;
        let exp = expires_at.timestamp();
        let signature = self.sign(port, exp, password_hash);
        let raw = format!("{}:{}:{}", port, exp, URL_SAFE_NO_PAD.encode(signature));

        AuthCookie {
            port,
            value: URL_SAFE_NO_PAD.encode(raw),
            expires_at,
        }
    }

    /// Check a presented cookie value for `port`.
    ///
    /// Returns the cookie's expiry when it is valid.
    pub fn verify(
        &self,
        value: &str,
        port: u16,
        password_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, CookieError> {
        let decoded = URL_SAFE_NO_PAD
            .decode(value.trim())
            .map_err(|_| CookieError::Malformed)?;
        let raw = String::from_utf8(decoded).map_err(|_| CookieError::Malformed)?;

        let mut parts = raw.splitn(3, ':');
        let (Some(port_str), Some(exp_str), Some(sig_str)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(CookieError::Malformed);
        };

        let found: u16 = port_str.parse().map_err(|_| CookieError::Malformed)?;
        let exp: i64 = exp_str.parse().map_err(|_| CookieError::Malformed)?;
        let signature = URL_SAFE_NO_PAD
            .decode(sig_str)
            .map_err(|_| CookieError::Malformed)?;

        if found != port {
            return Err(CookieError::WrongPort {
                expected: port,
                found,
            });
        }

        self.mac(found, exp, password_hash)
            .verify_slice(&signature)
            .map_err(|_| CookieError::BadSignature)?;

        let expires_at = DateTime::from_timestamp(exp, 0).ok_or(CookieError::Malformed)?;
        if expires_at <= now {
            return Err(CookieError::Expired);
        }

        Ok(expires_at)
    }

    fn sign(&self, port: u16, exp: i64, password_hash: &str) -> Vec<u8> {
        self.mac(port, exp, password_hash)
            .finalize()
            .into_bytes()
            .to_vec()
    }

    fn mac(&self, port: u16, exp: i64, password_hash: &str) -> HmacSha256 {
        // HMAC accepts keys of any length; emptiness is rejected in `new`.
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.key)
            .unwrap_or_else(|_| unreachable!("HMAC accepts keys of any length"));
        mac.update(format!("{}:{}:", port, exp).as_bytes());
        mac.update(&Sha256::digest(password_hash.as_bytes()));
        mac
    }
}
