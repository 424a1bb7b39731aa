//! Authentication primitives for the homeport gateway
//!
//! - [`password`]: Argon2id hashing of share passwords
//! - [`cookie`]: stateless HMAC-signed per-port proof cookies
//! - [`session`]: validation of top-level owner sessions (JWT)
//! - [`rate_limit`]: per-IP failed challenge tracking

pub mod cookie;
pub mod password;
pub mod rate_limit;
pub mod session;

pub use cookie::{AuthCookie, CookieError, CookieSigner};
pub use password::{hash_password, verify_password, PasswordError};
pub use rate_limit::{AttemptPermit, RateLimitStatus, RateLimiter};
pub use session::{JwtSessionValidator, SessionClaims, SessionError, SessionValidator};
