//! Access logging for forwarded requests

use axum::http::Method;
use homeport_proto::ShareMode;
use std::net::IpAddr;
use tracing::info;

/// One allowed request through the gateway
#[derive(Debug, Clone)]
pub struct AccessEntry {
    pub port: u16,
    pub method: Method,
    pub path: String,
    pub client_ip: IpAddr,
    pub mode: Option<ShareMode>,
    pub authenticated: bool,
}

/// Sink for access entries
pub trait AccessLog: Send + Sync {
    fn record(&self, entry: &AccessEntry);
}

/// Emits each entry as a structured event on the `homeport::access` target
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAccessLog;

impl AccessLog for TracingAccessLog {
    fn record(&self, entry: &AccessEntry) {
        info!(
            target: "homeport::access",
            port = entry.port,
            method = %entry.method,
            path = %entry.path,
            client_ip = %entry.client_ip,
            mode = entry.mode.map(|m| m.as_str()).unwrap_or("unregistered"),
            authenticated = entry.authenticated,
            "access"
        );
    }
}
