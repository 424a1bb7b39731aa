//! Caller identity behind an optional fronting proxy
//!
//! `X-Forwarded-*` headers are only read when the socket peer is one of the
//! configured trusted proxies. The client address is then the rightmost
//! `X-Forwarded-For` hop that is not itself a trusted proxy; everything to
//! its left was written by the client and is ignored.

use axum::http::{HeaderMap, HeaderName};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

pub static X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
pub static X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");
pub static X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");

/// Who sent a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientAddr {
    /// Address used for rate limiting and access logs
    pub ip: IpAddr,
    /// Socket peer of the connection
    pub peer: IpAddr,
    /// The peer is a trusted proxy, so its `X-Forwarded-*` headers count
    pub via_trusted_proxy: bool,
}

impl ClientAddr {
    /// A caller connected directly, with no proxy in front
    pub fn direct(ip: IpAddr) -> Self {
        Self {
            ip,
            peer: ip,
            via_trusted_proxy: false,
        }
    }

    /// Resolve the caller of a request received from `peer`
    pub fn resolve(headers: &HeaderMap, peer: Option<SocketAddr>, trusted: &[IpAddr]) -> Self {
        let peer = peer
            .map(|addr| addr.ip())
            .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        if !trusted.contains(&peer) {
            return Self::direct(peer);
        }

        let hops: Vec<IpAddr> = headers
            .get_all(&X_FORWARDED_FOR)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .map(str::trim)
            .map(|hop| hop.parse::<IpAddr>().ok())
            .collect::<Option<Vec<_>>>()
            .unwrap_or_default();

        let ip = hops
            .into_iter()
            .rev()
            .find(|hop| !trusted.contains(hop))
            .unwrap_or(peer);

        Self {
            ip,
            peer,
            via_trusted_proxy: true,
        }
    }
}

/// Scheme the caller used to reach the gateway
pub fn forwarded_proto(headers: &HeaderMap, via_trusted_proxy: bool) -> &'static str {
    if via_trusted_proxy {
        let proto = headers
            .get(&X_FORWARDED_PROTO)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim().to_ascii_lowercase());
        if proto.as_deref() == Some("https") {
            return "https";
        }
    }
    "http"
}
