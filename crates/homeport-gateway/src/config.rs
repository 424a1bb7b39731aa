//! Gateway configuration

use std::collections::BTreeSet;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

/// Settings for the HTTP gateway
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Address to bind the gateway
    pub bind_addr: SocketAddr,
    /// Secret for signing per-port password cookies
    pub cookie_secret: Vec<u8>,
    /// Lifetime of a password cookie
    pub auth_cookie_ttl: Duration,
    /// Lifetime of the routing-context cookie
    pub context_cookie_ttl: Duration,
    /// Skip top-level session checks for private ports and the API
    pub dev_mode: bool,
    /// Where private-port navigations are sent when no session is present
    pub login_path: String,
    /// Public origin used to build share URLs (e.g. `https://dev.example.com`)
    pub public_url: Option<String>,
    /// Port of the embedded editor, never a fallback target
    pub editor_port: Option<u16>,
    /// Additional ports the fallback router must never resolve to
    pub reserved_ports: BTreeSet<u16>,
    /// Socket peers whose `X-Forwarded-*` headers are honoured
    pub trusted_proxies: Vec<IpAddr>,
    /// Proxy ports that have no registry record instead of answering 404
    pub forward_unregistered: bool,
    /// Failed password attempts allowed per IP inside one window
    pub rate_limit_attempts: u32,
    pub rate_limit_window: Duration,
    /// Timeout for dialing a backend
    pub connect_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            cookie_secret: Vec::new(),
            auth_cookie_ttl: Duration::from_secs(24 * 60 * 60),
            context_cookie_ttl: Duration::from_secs(5 * 60),
            dev_mode: false,
            login_path: "/login".to_string(),
            public_url: None,
            editor_port: None,
            reserved_ports: BTreeSet::new(),
            trusted_proxies: Vec::new(),
            forward_unregistered: true,
            rate_limit_attempts: 5,
            rate_limit_window: Duration::from_secs(15 * 60),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl GatewayConfig {
    /// Whether the fallback router must discard `port`
    pub fn is_reserved(&self, port: u16) -> bool {
        port == self.bind_addr.port()
            || self.editor_port == Some(port)
            || self.reserved_ports.contains(&port)
    }

    /// Public URL of a shared port
    pub fn share_url(&self, port: u16) -> String {
        match &self.public_url {
            Some(base) => format!("{}/{}/", base.trim_end_matches('/'), port),
            None => format!("/{}/", port),
        }
    }
}
