//! API Middleware

pub mod session;

pub use session::{require_session, session_token, SessionState, SessionUser};
