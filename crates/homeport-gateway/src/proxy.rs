//! Reverse proxy to `http://localhost:<port>`
//!
//! Each forwarded request gets its own HTTP/1.1 connection to the backend,
//! driven by a spawned task with upgrades enabled. Request and response
//! bodies are streamed. WebSocket and other `Upgrade` handshakes keep their
//! hop-by-hop headers; on `101 Switching Protocols` both sides are upgraded
//! and piped until either end closes.

use axum::{
    body::Body,
    http::{
        header::{self, HeaderName},
        HeaderMap, HeaderValue, Request, Response, StatusCode, Uri, Version,
    },
    response::IntoResponse,
};
use homeport_proto::{AUTH_COOKIE_PREFIX, CONTEXT_COOKIE, SESSION_COOKIE};
use hyper::client::conn::http1;
use hyper_util::rt::TokioIo;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tracing::{debug, trace, warn};

use crate::cookies::set_cookie;
use crate::forwarded::{
    forwarded_proto, ClientAddr, X_FORWARDED_FOR, X_FORWARDED_HOST, X_FORWARDED_PROTO,
};

/// Headers that describe one hop and are not forwarded
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardMode {
    /// `/{port}/rest` is sent to the backend as `/rest`
    StripPrefix,
    /// The path is forwarded unchanged
    Direct,
}

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("Failed to connect to localhost:{port}: {reason}")]
    Connect { port: u16, reason: String },

    #[error("Timed out connecting to localhost:{0}")]
    ConnectTimeout(u16),

    #[error("HTTP handshake with localhost:{port} failed: {reason}")]
    Handshake { port: u16, reason: String },

    #[error("Backend request failed: {0}")]
    Request(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

#[derive(Debug, Clone)]
pub struct ProxyEngine {
    connect_timeout: Duration,
    context_cookie_ttl: Duration,
}

impl ProxyEngine {
    pub fn new(connect_timeout: Duration, context_cookie_ttl: Duration) -> Self {
        Self {
            connect_timeout,
            context_cookie_ttl,
        }
    }

    /// Forward `request` to `localhost:port`.
    ///
    /// Backend failures become a `502 Bad Gateway` with a short text body.
    pub async fn forward(
        &self,
        request: Request<Body>,
        port: u16,
        mode: ForwardMode,
        client: ClientAddr,
    ) -> Response<Body> {
        match self.try_forward(request, port, mode, client).await {
            Ok(response) => response,
            Err(ProxyError::InvalidRequest(reason)) => {
                debug!(port, %reason, "Rejected request before forwarding");
                (StatusCode::BAD_REQUEST, reason).into_response()
            }
            Err(e) => {
                warn!(port, error = %e, "Backend unavailable");
                (
                    StatusCode::BAD_GATEWAY,
                    format!("Nothing is answering on port {}: {}", port, e),
                )
                    .into_response()
            }
        }
    }

    async fn try_forward(
        &self,
        mut request: Request<Body>,
        port: u16,
        mode: ForwardMode,
        client: ClientAddr,
    ) -> Result<Response<Body>, ProxyError> {
        let target = backend_uri(request.uri(), port, mode)?;
        let upgrade = is_upgrade(request.headers());
        let client_upgrade = upgrade.then(|| hyper::upgrade::on(&mut request));

        let (parts, body) = request.into_parts();
        let mut outbound = Request::builder()
            .method(parts.method.clone())
            .uri(target.clone())
            .version(Version::HTTP_11)
            .body(body)
            .map_err(|e| ProxyError::InvalidRequest(e.to_string()))?;
        *outbound.headers_mut() = outbound_headers(&parts.headers, port, client, upgrade);

        trace!(port, method = %parts.method, uri = %target, upgrade, "Forwarding");

        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(("localhost", port)))
            .await
            .map_err(|_| ProxyError::ConnectTimeout(port))?
            .map_err(|e| ProxyError::Connect {
                port,
                reason: e.to_string(),
            })?;

        let (mut sender, conn) = http1::handshake(TokioIo::new(stream))
            .await
            .map_err(|e| ProxyError::Handshake {
                port,
                reason: e.to_string(),
            })?;

        // Spawn connection driver
        tokio::spawn(async move {
            if let Err(e) = conn.with_upgrades().await {
                debug!(port, "Backend connection closed: {}", e);
            }
        });

        let mut response = sender
            .send_request(outbound)
            .await
            .map_err(|e| ProxyError::Request(e.to_string()))?;

        if response.status() == StatusCode::SWITCHING_PROTOCOLS {
            if let Some(client_upgrade) = client_upgrade {
                let backend_upgrade = hyper::upgrade::on(&mut response);
                tokio::spawn(async move {
                    match tokio::try_join!(client_upgrade, backend_upgrade) {
                        Ok((client, backend)) => {
                            debug!(port, "Upgraded connection established");
                            let mut client = TokioIo::new(client);
                            let mut backend = TokioIo::new(backend);
                            if let Err(e) =
                                tokio::io::copy_bidirectional(&mut client, &mut backend).await
                            {
                                debug!(port, "Upgraded connection ended: {}", e);
                            }
                        }
                        Err(e) => warn!(port, "Failed to upgrade connections: {}", e),
                    }
                });
            }

            let (parts, _) = response.into_parts();
            return Ok(Response::from_parts(parts, Body::empty()));
        }

        let mut response = response.map(Body::new);
        strip_hop_by_hop(response.headers_mut());

        if mode == ForwardMode::StripPrefix {
            if let Some(rewritten) = response
                .headers()
                .get(header::LOCATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|loc| rewrite_location(loc, port))
                .and_then(|loc| HeaderValue::from_str(&loc).ok())
            {
                response.headers_mut().insert(header::LOCATION, rewritten);
            }

            if let Some(cookie) = set_cookie(
                CONTEXT_COOKIE,
                &port.to_string(),
                self.context_cookie_ttl.as_secs(),
            ) {
                response.headers_mut().append(header::SET_COOKIE, cookie);
            }
        }

        Ok(response)
    }
}

/// Request headers as the backend sees them.
///
/// The gateway's credentials (a bearer `Authorization`, the session cookie
/// and the per-port password cookies) are removed. Prior `X-Forwarded-*` values survive only when the
/// request arrived through a trusted proxy.
fn outbound_headers(inbound: &HeaderMap, port: u16, client: ClientAddr, upgrade: bool) -> HeaderMap {
    let mut headers = inbound.clone();
    if !upgrade {
        strip_hop_by_hop(&mut headers);
    }
    strip_gateway_credentials(&mut headers);

    let original_host = headers.remove(header::HOST);
    if let Ok(host) = HeaderValue::from_str(&format!("localhost:{}", port)) {
        headers.insert(header::HOST, host);
    }

    let prior_for = if client.via_trusted_proxy {
        let hops: Vec<&str> = inbound
            .get_all(&X_FORWARDED_FOR)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect();
        (!hops.is_empty()).then(|| hops.join(", "))
    } else {
        None
    };
    let forwarded_for = match prior_for {
        Some(prior) => format!("{}, {}", prior, client.peer),
        None => client.peer.to_string(),
    };
    if let Ok(value) = HeaderValue::from_str(&forwarded_for) {
        headers.insert(&X_FORWARDED_FOR, value);
    }

    let forwarded_host = if client.via_trusted_proxy {
        inbound.get(&X_FORWARDED_HOST).cloned().or(original_host)
    } else {
        original_host
    };
    match forwarded_host {
        Some(host) => {
            headers.insert(&X_FORWARDED_HOST, host);
        }
        None => {
            headers.remove(&X_FORWARDED_HOST);
        }
    }

    headers.insert(
        &X_FORWARDED_PROTO,
        HeaderValue::from_static(forwarded_proto(inbound, client.via_trusted_proxy)),
    );

    headers
}

fn is_gateway_credential(cookie_pair: &str) -> bool {
    let name = cookie_pair.split('=').next().unwrap_or_default().trim();
    name == SESSION_COOKIE || name.starts_with(AUTH_COOKIE_PREFIX)
}

fn strip_gateway_credentials(headers: &mut HeaderMap) {
    // Bearer is the form the gateway reads sessions from; other schemes belong to the app
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("Bearer "));
    if bearer {
        headers.remove(header::AUTHORIZATION);
    }

    let kept: Vec<String> = headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .map(str::trim)
        .filter(|pair| !pair.is_empty() && !is_gateway_credential(pair))
        .map(str::to_string)
        .collect();

    headers.remove(header::COOKIE);
    if kept.is_empty() {
        return;
    }
    if let Ok(value) = HeaderValue::from_str(&kept.join("; ")) {
        headers.insert(header::COOKIE, value);
    }
}

/// Path and query to request from the backend
pub fn backend_uri(uri: &Uri, port: u16, mode: ForwardMode) -> Result<Uri, ProxyError> {
    let path = match mode {
        ForwardMode::Direct => uri.path().to_string(),
        ForwardMode::StripPrefix => strip_port_prefix(uri.path(), port),
    };
    let path_and_query = match uri.query() {
        Some(query) => format!("{}?{}", path, query),
        None => path,
    };

    path_and_query
        .parse()
        .map_err(|e| ProxyError::InvalidRequest(format!("invalid path '{}': {}", path_and_query, e)))
}

/// `/3000/app/main.js` → `/app/main.js`, `/3000` → `/`
pub fn strip_port_prefix(path: &str, port: u16) -> String {
    let prefix = format!("/{}", port);
    match path.strip_prefix(prefix.as_str()) {
        Some("") => "/".to_string(),
        Some(rest) if rest.starts_with('/') => rest.to_string(),
        _ => path.to_string(),
    }
}

/// Keep backend redirects inside `/{port}`.
///
/// Relative paths (`/login`) and absolute URLs pointing back at the backend
/// itself (`http://localhost:3000/login`) are rewritten; anything else,
/// including protocol-relative `//host/...`, is left alone.
pub fn rewrite_location(location: &str, port: u16) -> Option<String> {
    if location.starts_with('/') && !location.starts_with("//") {
        return Some(format!("/{}{}", port, location));
    }

    for scheme in ["http://", "https://"] {
        for host in ["localhost", "127.0.0.1", "[::1]"] {
            let origin = format!("{}{}:{}", scheme, host, port);
            if let Some(rest) = location.strip_prefix(origin.as_str()) {
                if rest.is_empty() {
                    return Some(format!("/{}/", port));
                }
                if rest.starts_with('/') || rest.starts_with('?') {
                    let rest = if rest.starts_with('?') {
                        format!("/{}", rest)
                    } else {
                        rest.to_string()
                    };
                    return Some(format!("/{}{}", port, rest));
                }
            }
        }
    }

    None
}

fn is_upgrade(headers: &HeaderMap) -> bool {
    headers.contains_key(header::UPGRADE)
        && headers
            .get_all(header::CONNECTION)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .any(|token| token.trim().eq_ignore_ascii_case("upgrade"))
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    // Headers named by Connection are hop-by-hop too
    let named: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|token| HeaderName::from_bytes(token.trim().as_bytes()).ok())
        .collect();
    for name in named {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
    headers.remove(header::UPGRADE);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_port_prefix() {
        assert_eq!(strip_port_prefix("/3000", 3000), "/");
        assert_eq!(strip_port_prefix("/3000/", 3000), "/");
        assert_eq!(strip_port_prefix("/3000/app/main.js", 3000), "/app/main.js");
        assert_eq!(strip_port_prefix("/30001/x", 3000), "/30001/x");
    }

    #[test]
    fn test_backend_uri_keeps_query() {
        let uri: Uri = "/3000/search?q=rust&page=2".parse().unwrap();
        assert_eq!(
            backend_uri(&uri, 3000, ForwardMode::StripPrefix).unwrap(),
            "/search?q=rust&page=2"
        );
        assert_eq!(
            backend_uri(&uri, 3000, ForwardMode::Direct).unwrap(),
            "/3000/search?q=rust&page=2"
        );
    }

    #[test]
    fn test_rewrite_location() {
        assert_eq!(rewrite_location("/login", 3000).as_deref(), Some("/3000/login"));
        assert_eq!(rewrite_location("/", 3000).as_deref(), Some("/3000/"));
        assert_eq!(
            rewrite_location("http://localhost:3000/done?ok=1", 3000).as_deref(),
            Some("/3000/done?ok=1")
        );
        assert_eq!(
            rewrite_location("http://127.0.0.1:3000", 3000).as_deref(),
            Some("/3000/")
        );
        assert_eq!(rewrite_location("//cdn.example.com/x", 3000), None);
        assert_eq!(rewrite_location("https://github.com/login", 3000), None);
        assert_eq!(rewrite_location("http://localhost:30001/x", 3000), None);
        assert_eq!(rewrite_location("relative/path", 3000), None);
    }

    #[test]
    fn test_upgrade_detection() {
        let mut headers = HeaderMap::new();
        headers.insert(header::UPGRADE, HeaderValue::from_static("websocket"));
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive, Upgrade"));
        assert!(is_upgrade(&headers));

        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
        assert!(!is_upgrade(&headers));
    }

    fn client(ip: &str, via_trusted_proxy: bool) -> ClientAddr {
        let peer = ip.parse().unwrap();
        ClientAddr {
            ip: peer,
            peer,
            via_trusted_proxy,
        }
    }

    #[test]
    fn test_outbound_headers_through_trusted_proxy() {
        let mut inbound = HeaderMap::new();
        inbound.insert(header::HOST, HeaderValue::from_static("dev.example.com"));
        inbound.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
        inbound.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        inbound.insert(&X_FORWARDED_FOR, HeaderValue::from_static("203.0.113.9"));
        inbound.insert(&X_FORWARDED_PROTO, HeaderValue::from_static("https"));
        inbound.insert(header::ACCEPT, HeaderValue::from_static("text/html"));

        let out = outbound_headers(&inbound, 3000, client("10.0.0.2", true), false);

        assert_eq!(out[header::HOST], "localhost:3000");
        assert_eq!(out[&X_FORWARDED_FOR], "203.0.113.9, 10.0.0.2");
        assert_eq!(out[&X_FORWARDED_HOST], "dev.example.com");
        assert_eq!(out[&X_FORWARDED_PROTO], "https");
        assert_eq!(out[header::ACCEPT], "text/html");
        assert!(!out.contains_key(header::CONNECTION));
        assert!(!out.contains_key("keep-alive"));
    }

    #[test]
    fn test_outbound_headers_replace_untrusted_forwarding() {
        let mut inbound = HeaderMap::new();
        inbound.insert(header::HOST, HeaderValue::from_static("dev.example.com"));
        inbound.insert(&X_FORWARDED_FOR, HeaderValue::from_static("1.2.3.4"));
        inbound.insert(&X_FORWARDED_HOST, HeaderValue::from_static("evil.example"));
        inbound.insert(&X_FORWARDED_PROTO, HeaderValue::from_static("https"));

        let out = outbound_headers(&inbound, 3000, client("192.0.2.8", false), false);

        assert_eq!(out[&X_FORWARDED_FOR], "192.0.2.8");
        assert_eq!(out[&X_FORWARDED_HOST], "dev.example.com");
        assert_eq!(out[&X_FORWARDED_PROTO], "http");
    }

    #[test]
    fn test_outbound_headers_keep_upgrade() {
        let mut inbound = HeaderMap::new();
        inbound.insert(header::CONNECTION, HeaderValue::from_static("Upgrade"));
        inbound.insert(header::UPGRADE, HeaderValue::from_static("websocket"));
        inbound.insert(&X_FORWARDED_FOR, HeaderValue::from_static("203.0.113.9"));

        let out = outbound_headers(&inbound, 5173, client("10.0.0.2", false), true);

        assert_eq!(out[header::CONNECTION], "Upgrade");
        assert_eq!(out[header::UPGRADE], "websocket");
        assert_eq!(out[&X_FORWARDED_FOR], "10.0.0.2");
    }

    #[test]
    fn test_outbound_headers_drop_gateway_credentials() {
        let mut inbound = HeaderMap::new();
        inbound.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc.def"));
        inbound.insert(
            header::COOKIE,
            HeaderValue::from_static("homeport_session=jwt; theme=dark; homeport_auth_3000=proof"),
        );
        inbound.append(header::COOKIE, HeaderValue::from_static("homeport_ctx=3000; sid=42"));

        let out = outbound_headers(&inbound, 3000, client("10.0.0.2", false), false);

        assert!(!out.contains_key(header::AUTHORIZATION));
        assert_eq!(out.get_all(header::COOKIE).iter().count(), 1);
        assert_eq!(out[header::COOKIE], "theme=dark; homeport_ctx=3000; sid=42");

        // Only gateway cookies present
        let mut inbound = HeaderMap::new();
        inbound.insert(header::COOKIE, HeaderValue::from_static("homeport_auth_3000=proof"));
        inbound.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic dXNlcjpwYXNz"));
        let out = outbound_headers(&inbound, 3000, client("10.0.0.2", false), false);
        assert!(!out.contains_key(header::COOKIE));
        assert_eq!(out[header::AUTHORIZATION], "Basic dXNlcjpwYXNz");
    }
}
