//! Gateway entry: everything that is not the management API
//!
//! `/{port}/...` is the primary entry and forwards with the prefix stripped.
//! Any other path goes through the fallback router and, when a port is
//! resolved, is forwarded unchanged. Unresolved requests get the UI.

use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::access_log::AccessEntry;
use crate::challenge::{challenge_response, rate_limited_response};
use crate::cookies::set_cookie;
use crate::fallback::resolve_port;
use crate::forwarded::ClientAddr;
use crate::models::ErrorResponse;
use crate::policy::{AccessRequest, Decision, EntryPoint, PasswordOutcome};
use crate::portal::serve_ui;
use crate::proxy::ForwardMode;
use crate::AppState;

/// Largest accepted password form body
const MAX_AUTH_FORM_BYTES: usize = 64 * 1024;

#[derive(Debug, Deserialize)]
struct PasswordForm {
    password: Option<String>,
}

/// What the first path segment says about the target port
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortSegment {
    Port(u16),
    /// All digits, but not a canonical port number (`/0`, `/03000`, `/70000`)
    Invalid(String),
    /// Not numeric; left to the fallback router
    Absent,
}

/// Classify the first path segment.
///
/// Only the canonical decimal form of 1..=65535 names a port, so the
/// prefix stripped before forwarding is exactly the one that was matched.
pub fn parse_port_path(path: &str) -> PortSegment {
    let segment = path
        .strip_prefix('/')
        .and_then(|p| p.split('/').next())
        .unwrap_or_default();
    if segment.is_empty() || !segment.bytes().all(|b| b.is_ascii_digit()) {
        return PortSegment::Absent;
    }
    match segment.parse::<u16>() {
        Ok(port) if port > 0 && !segment.starts_with('0') => PortSegment::Port(port),
        _ => PortSegment::Invalid(segment.to_string()),
    }
}

/// Router fallback for every non-API path
pub async fn gateway_entry(State(state): State<Arc<AppState>>, request: Request) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let client = ClientAddr::resolve(request.headers(), peer, &state.config.trusted_proxies);

    match parse_port_path(request.uri().path()) {
        PortSegment::Port(port) => {
            return port_entry(&state, request, port, EntryPoint::Primary, client).await;
        }
        PortSegment::Invalid(segment) => {
            debug!(%segment, "Rejected invalid port segment");
            return (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse::new(
                    format!("Invalid port: {}", segment),
                    "INVALID_PORT",
                )),
            )
                .into_response();
        }
        PortSegment::Absent => {}
    }

    match resolve_port(request.headers(), &state.config) {
        Some((port, source)) => {
            debug!(port, ?source, path = %request.uri().path(), "Fallback resolved port");
            port_entry(&state, request, port, EntryPoint::Asset, client).await
        }
        None => serve_ui(request.uri().path()),
    }
}

async fn port_entry(
    state: &AppState,
    request: Request,
    port: u16,
    entry: EntryPoint,
    client: ClientAddr,
) -> Response {
    let record = match state.registry.get(port).await {
        Ok(record) => record,
        Err(e) => {
            error!(port, "Registry lookup failed: {}", e);
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                "Port registry unavailable",
            )
                .into_response();
        }
    };

    let now = Utc::now();
    let decision = state.policy.evaluate(
        &AccessRequest {
            port,
            entry,
            method: request.method(),
            uri: request.uri(),
            headers: request.headers(),
            client_ip: client.ip,
        },
        record.as_ref(),
        now,
    );
    debug!(port, ?entry, "Evaluated sharing policy");

    match decision {
        Decision::Allow { authenticated } => {
            state.access_log.record(&AccessEntry {
                port,
                method: request.method().clone(),
                path: request.uri().path().to_string(),
                client_ip: client.ip,
                mode: record.as_ref().map(|r| r.effective_mode(now)),
                authenticated,
            });
            let mode = match entry {
                EntryPoint::Primary => ForwardMode::StripPrefix,
                EntryPoint::Asset => ForwardMode::Direct,
            };
            state.proxy.forward(request, port, mode, client).await
        }
        Decision::RedirectToLogin { location } => {
            (StatusCode::FOUND, [(header::LOCATION, location)]).into_response()
        }
        Decision::Deny => (StatusCode::UNAUTHORIZED, "Authentication required").into_response(),
        Decision::Challenge => challenge_response(port, None),
        Decision::RateLimited { retry_after } => rate_limited_response(port, retry_after),
        Decision::VerifyPassword { password_hash } => {
            verify_submission(state, request.into_body(), port, password_hash, client).await
        }
        Decision::NotRegistered => {
            (StatusCode::NOT_FOUND, format!("Port {} is not registered", port)).into_response()
        }
    }
}

async fn verify_submission(
    state: &AppState,
    body: Body,
    port: u16,
    password_hash: String,
    client: ClientAddr,
) -> Response {
    let bytes = match axum::body::to_bytes(body, MAX_AUTH_FORM_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => {
            debug!(port, "Unreadable password form: {}", e);
            return (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse::new("Unreadable form body", "INVALID_FORM")),
            )
                .into_response();
        }
    };

    let submitted = serde_urlencoded::from_bytes::<PasswordForm>(&bytes)
        .ok()
        .and_then(|form| form.password)
        .filter(|p| !p.is_empty());
    let Some(submitted) = submitted else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new(
                "Form field 'password' is required",
                "MISSING_PASSWORD",
            )),
        )
            .into_response();
    };

    let now = Utc::now();
    match state
        .policy
        .submit_password(port, password_hash, submitted, client.ip, now)
        .await
    {
        Ok(PasswordOutcome::Granted(cookie)) => {
            let mut response = (
                StatusCode::SEE_OTHER,
                [(header::LOCATION, format!("/{}/", port))],
            )
                .into_response();
            let max_age = u64::try_from(cookie.max_age(now)).unwrap_or_default();
            if let Some(value) = set_cookie(&cookie.name(), &cookie.value, max_age) {
                response.headers_mut().append(header::SET_COOKIE, value);
            }
            response
        }
        Ok(PasswordOutcome::Rejected { .. }) => challenge_response(port, Some("Incorrect password")),
        Ok(PasswordOutcome::Limited { retry_after }) => rate_limited_response(port, retry_after),
        Err(e) => {
            warn!(port, "Password verification error: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Password verification failed",
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_port_path() {
        assert_eq!(parse_port_path("/3000"), PortSegment::Port(3000));
        assert_eq!(parse_port_path("/3000/"), PortSegment::Port(3000));
        assert_eq!(parse_port_path("/3000/app/main.js"), PortSegment::Port(3000));
        assert_eq!(parse_port_path("/65535/"), PortSegment::Port(65535));
        assert_eq!(parse_port_path("/"), PortSegment::Absent);
        assert_eq!(parse_port_path("/main.js"), PortSegment::Absent);
        assert_eq!(parse_port_path("/3000abc/x"), PortSegment::Absent);
        assert_eq!(parse_port_path("/+3000"), PortSegment::Absent);
    }

    #[test]
    fn test_non_canonical_port_segments_are_invalid() {
        assert_eq!(parse_port_path("/0"), PortSegment::Invalid("0".to_string()));
        assert_eq!(
            parse_port_path("/03000/x"),
            PortSegment::Invalid("03000".to_string())
        );
        assert_eq!(
            parse_port_path("/70000/"),
            PortSegment::Invalid("70000".to_string())
        );
        assert_eq!(
            parse_port_path("/99999999999999999999"),
            PortSegment::Invalid("99999999999999999999".to_string())
        );
    }
}
