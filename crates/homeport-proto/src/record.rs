//! Port records and sharing modes

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;
use thiserror::Error;

/// How traffic to a port is authorized
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "lowercase")]
pub enum ShareMode {
    /// Only the owner's top-level session may reach the port
    #[default]
    Private,
    /// Anyone holding the port password may reach the port
    Password,
    /// Anyone may reach the port
    Public,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid share mode '{0}': expected private, password or public")]
pub struct ShareModeError(pub String);

impl ShareMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShareMode::Private => "private",
            ShareMode::Password => "password",
            ShareMode::Public => "public",
        }
    }

    /// Decode a mode read back from storage.
    ///
    /// Unknown or corrupt values fail closed to `Private`.
    pub fn from_stored(value: &str) -> Self {
        value.parse().unwrap_or(ShareMode::Private)
    }
}

impl FromStr for ShareMode {
    type Err = ShareModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "private" => Ok(ShareMode::Private),
            "password" => Ok(ShareMode::Password),
            "public" => Ok(ShareMode::Public),
            other => Err(ShareModeError(other.to_string())),
        }
    }
}

impl fmt::Display for ShareMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A listening socket discovered by one probe cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedPort {
    pub port: u16,
    pub process_id: Option<u32>,
    pub process_name: Option<String>,
    /// First path segment of the process cwd under the projects root
    pub owner_project_id: Option<String>,
}

impl ObservedPort {
    /// An observation whose owning process could not be resolved
    pub fn unresolved(port: u16) -> Self {
        Self {
            port,
            process_id: None,
            process_name: None,
            owner_project_id: None,
        }
    }
}

/// Requested sharing state for a port
///
/// Construction enforces that a password hash travels with `Password` mode
/// and with no other mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareSettings {
    mode: ShareMode,
    password_hash: Option<String>,
    expires_at: Option<DateTime<Utc>>,
}

impl ShareSettings {
    pub fn private() -> Self {
        Self {
            mode: ShareMode::Private,
            password_hash: None,
            expires_at: None,
        }
    }

    pub fn public(expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            mode: ShareMode::Public,
            password_hash: None,
            expires_at,
        }
    }

    /// Returns `None` when the hash is empty
    pub fn password(password_hash: String, expires_at: Option<DateTime<Utc>>) -> Option<Self> {
        if password_hash.is_empty() {
            return None;
        }
        Some(Self {
            mode: ShareMode::Password,
            password_hash: Some(password_hash),
            expires_at,
        })
    }

    pub fn mode(&self) -> ShareMode {
        self.mode
    }

    pub fn password_hash(&self) -> Option<&str> {
        self.password_hash.as_deref()
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }
}

/// Persisted metadata for one observed port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct PortRecord {
    pub port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_project_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process_id: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process_name: Option<String>,
    pub share_mode: ShareMode,
    /// Never leaves the process through the API
    #[serde(skip)]
    pub password_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl PortRecord {
    /// A fresh private record for a port seen for the first time
    pub fn from_observation(observed: &ObservedPort, now: DateTime<Utc>) -> Self {
        Self {
            port: observed.port,
            owner_project_id: observed.owner_project_id.clone(),
            process_id: observed.process_id,
            process_name: observed.process_name.clone(),
            share_mode: ShareMode::Private,
            password_hash: None,
            expires_at: None,
            first_seen: now,
            last_seen: now,
        }
    }

    /// A record created by an explicit share on a port the prober has not reported yet
    pub fn unobserved(port: u16, now: DateTime<Utc>) -> Self {
        Self::from_observation(&ObservedPort::unresolved(port), now)
    }

    /// Refresh process metadata and `last_seen` from a new observation.
    ///
    /// Sharing state and `first_seen` are left untouched.
    pub fn refresh(&mut self, observed: &ObservedPort, now: DateTime<Utc>) {
        self.owner_project_id = observed.owner_project_id.clone();
        self.process_id = observed.process_id;
        self.process_name = observed.process_name.clone();
        self.last_seen = now;
    }

    pub fn apply_share(&mut self, settings: &ShareSettings) {
        self.share_mode = settings.mode;
        self.password_hash = settings.password_hash.clone();
        self.expires_at = settings.expires_at;
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// The mode used for authorization decisions at `now`.
    ///
    /// Expired shares and password shares without a hash read as private;
    /// the stored mode is only rewritten by the next explicit share/unshare.
    pub fn effective_mode(&self, now: DateTime<Utc>) -> ShareMode {
        if self.is_expired(now) {
            return ShareMode::Private;
        }
        match self.share_mode {
            ShareMode::Password if self.password_hash.as_deref().unwrap_or("").is_empty() => {
                ShareMode::Private
            }
            mode => mode,
        }
    }

    pub fn is_stale(&self, cutoff: DateTime<Utc>) -> bool {
        self.last_seen < cutoff
    }

    pub fn is_private_at_rest(&self) -> bool {
        self.share_mode == ShareMode::Private
            && self.password_hash.is_none()
            && self.expires_at.is_none()
    }
}

/// Inclusive range of ports the prober reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRange {
    start: u16,
    end: u16,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PortRangeError {
    #[error("invalid port range '{0}': expected START-END")]
    Format(String),

    #[error("port range start {start} is greater than end {end}")]
    Inverted { start: u16, end: u16 },

    #[error("port 0 cannot be probed")]
    ZeroPort,
}

impl PortRange {
    pub fn new(start: u16, end: u16) -> Result<Self, PortRangeError> {
        if start == 0 {
            return Err(PortRangeError::ZeroPort);
        }
        if start > end {
            return Err(PortRangeError::Inverted { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> u16 {
        self.start
    }

    pub fn end(&self) -> u16 {
        self.end
    }

    pub fn contains(&self, port: u16) -> bool {
        (self.start..=self.end).contains(&port)
    }

    pub fn as_range(&self) -> RangeInclusive<u16> {
        self.start..=self.end
    }
}

impl Default for PortRange {
    fn default() -> Self {
        Self {
            start: 3000,
            end: 9999,
        }
    }
}

impl FromStr for PortRange {
    type Err = PortRangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (start, end) = s
            .split_once('-')
            .ok_or_else(|| PortRangeError::Format(s.to_string()))?;
        let start = start
            .trim()
            .parse::<u16>()
            .map_err(|_| PortRangeError::Format(s.to_string()))?;
        let end = end
            .trim()
            .parse::<u16>()
            .map_err(|_| PortRangeError::Format(s.to_string()))?;
        Self::new(start, end)
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}
