//! API request and response models

use chrono::{DateTime, Utc};
use homeport_proto::{PortRecord, ShareMode};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Request to change how a port is shared
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ShareRequest {
    /// `private`, `password` or `public`
    pub mode: String,
    /// Required for `password` mode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// `1h`, `24h`, `7d`, `30d` or any `<n><s|m|h|d>`; omitted means no expiry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<String>,
}

/// Result of a share or unshare call
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ShareResponse {
    pub status: String,
    pub mode: ShareMode,
    /// URL the port is reachable at through the gateway
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Tracked ports
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PortList {
    pub ports: Vec<PortRecord>,
    pub total: usize,
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Error response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    /// Error message
    pub error: String,
    /// Error code
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, code: &str) -> Self {
        Self {
            error: error.into(),
            code: Some(code.to_string()),
        }
    }
}
