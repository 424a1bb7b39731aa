//! Shared types for the homeport port exposure gateway
//!
//! This crate defines the data model that the prober, the registry and the
//! HTTP gateway agree on: observed listening ports, persisted port records
//! with their sharing mode, the configured port range, and the duration
//! syntax used by configuration and share expiry.

pub mod duration;
pub mod record;

pub use duration::{parse_duration, DurationParseError};
pub use record::{
    ObservedPort, PortRange, PortRangeError, PortRecord, ShareMode, ShareModeError, ShareSettings,
};

/// Cookie carrying the last port a page was served from
pub const CONTEXT_COOKIE: &str = "homeport_ctx";

/// Cookie carrying the top-level session token
pub const SESSION_COOKIE: &str = "homeport_session";

/// Prefix of the per-port password proof cookie (`homeport_auth_{port}`)
pub const AUTH_COOKIE_PREFIX: &str = "homeport_auth_";

/// Sub-path that receives password challenge submissions
pub const AUTH_SUBPATH: &str = "/_auth";

/// Name of the per-port password proof cookie
pub fn auth_cookie_name(port: u16) -> String {
    format!("{}{}", AUTH_COOKIE_PREFIX, port)
}
