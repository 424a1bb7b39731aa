//! Port resolution for requests outside `/{port}/...`
//!
//! Apps that emit absolute asset paths (`/main.js`, `/@vite/client`) leak
//! out of their prefix. Such requests are attributed to a port by the
//! `Referer` path, then by the routing-context cookie. Reserved internal
//! ports are never returned.

use axum::http::{header, HeaderMap};
use homeport_proto::CONTEXT_COOKIE;
use regex_lite::Regex;
use std::sync::OnceLock;

use crate::config::GatewayConfig;
use crate::cookies::cookie_value;

fn port_segment() -> &'static Regex {
    static PORT_SEGMENT: OnceLock<Regex> = OnceLock::new();
    PORT_SEGMENT.get_or_init(|| Regex::new(r"/(\d+)(?:/|$)").expect("static regex is valid"))
}

/// Where a resolved port came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortSource {
    Referer,
    ContextCookie,
}

/// First numeric path segment of a `Referer` URL
///
/// `https://host/3000/app.js` → 3000. Query and fragment are ignored.
pub fn port_from_referer(referer: &str) -> Option<u16> {
    let path = match referer.find("://") {
        Some(scheme_end) => {
            let after_scheme = &referer[scheme_end + 3..];
            match after_scheme.find('/') {
                Some(slash) => &after_scheme[slash..],
                None => return None,
            }
        }
        None => referer,
    };
    let path = path.split(['?', '#']).next().unwrap_or_default();

    port_segment()
        .captures(path)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<u16>().ok())
        .filter(|port| *port > 0)
}

/// Port named by the routing-context cookie
pub fn port_from_context(headers: &HeaderMap) -> Option<u16> {
    cookie_value(headers, CONTEXT_COOKIE)
        .and_then(|v| v.parse::<u16>().ok())
        .filter(|port| *port > 0)
}

/// Resolve the target port of an orphan request, or `None` for the UI
pub fn resolve_port(headers: &HeaderMap, config: &GatewayConfig) -> Option<(u16, PortSource)> {
    let from_referer = headers
        .get(header::REFERER)
        .and_then(|v| v.to_str().ok())
        .and_then(port_from_referer)
        .map(|port| (port, PortSource::Referer));

    from_referer
        .or_else(|| port_from_context(headers).map(|port| (port, PortSource::ContextCookie)))
        .filter(|(port, _)| !config.is_reserved(*port))
}
