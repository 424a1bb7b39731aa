use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use homeport_auth::hash_password;
use homeport_proto::{parse_duration, ShareMode, ShareSettings, CONTEXT_COOKIE};
use std::sync::Arc;
use tracing::{debug, error, info};
use utoipa::OpenApi;

use crate::cookies::clear_cookie;
use crate::models::*;
use crate::portal::index_html;
use crate::{ApiDoc, AppState};

type ApiError = (StatusCode, Json<ErrorResponse>);

fn bad_request(message: impl Into<String>, code: &str) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse::new(message, code)),
    )
}

fn internal_error(message: impl Into<String>, code: &str) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse::new(message, code)),
    )
}

fn parse_port(raw: &str) -> Result<u16, ApiError> {
    raw.parse::<u16>()
        .ok()
        .filter(|port| *port > 0)
        .ok_or_else(|| bad_request(format!("Invalid port: {}", raw), "INVALID_PORT"))
}

/// Change how a port is shared
#[utoipa::path(
    post,
    path = "/api/share/{port}",
    params(
        ("port" = u16, Path, description = "Port number")
    ),
    request_body = ShareRequest,
    responses(
        (status = 200, description = "Sharing updated", body = ShareResponse),
        (status = 400, description = "Invalid port, mode, password or expiry", body = ErrorResponse),
        (status = 401, description = "Missing or invalid session", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "sharing"
)]
pub async fn share_port(
    State(state): State<Arc<AppState>>,
    Path(port): Path<String>,
    body: Result<Json<ShareRequest>, JsonRejection>,
) -> Result<Json<ShareResponse>, ApiError> {
    let port = parse_port(&port)?;
    let Json(req) = body.map_err(|e| bad_request(e.body_text(), "INVALID_REQUEST"))?;

    let mode = req
        .mode
        .parse::<ShareMode>()
        .map_err(|e| bad_request(e.to_string(), "INVALID_MODE"))?;

    let now = Utc::now();
    let expires_at = match req.expires_in.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => {
            let ttl = parse_duration(raw)
                .map_err(|e| bad_request(format!("Invalid expires_in: {}", e), "INVALID_EXPIRY"))?;
            let ttl = chrono::Duration::from_std(ttl)
                .map_err(|_| bad_request("expires_in is too large", "INVALID_EXPIRY"))?;
            Some(now + ttl)
        }
    };

    let settings = match mode {
        ShareMode::Private => ShareSettings::private(),
        ShareMode::Public => ShareSettings::public(expires_at),
        ShareMode::Password => {
            let password = req.password.filter(|p| !p.is_empty()).ok_or_else(|| {
                bad_request("Password mode requires a password", "PASSWORD_REQUIRED")
            })?;
            let hash = tokio::task::spawn_blocking(move || hash_password(&password))
                .await
                .map_err(|e| internal_error(e.to_string(), "HASH_ERROR"))?
                .map_err(|e| internal_error(e.to_string(), "HASH_ERROR"))?;
            ShareSettings::password(hash, expires_at).ok_or_else(|| {
                bad_request("Password mode requires a password", "PASSWORD_REQUIRED")
            })?
        }
    };

    let record = state
        .registry
        .set_share(port, &settings, now)
        .await
        .map_err(|e| {
            error!(port, "Failed to update sharing: {}", e);
            internal_error(format!("Failed to update sharing: {}", e), "REGISTRY_ERROR")
        })?;

    info!(port, mode = record.share_mode.as_str(), expires_at = ?record.expires_at, "Sharing updated");

    Ok(Json(ShareResponse {
        status: "ok".to_string(),
        mode: record.share_mode,
        url: state.config.share_url(port),
        expires_at: record.expires_at,
    }))
}

/// Reset a port to private
#[utoipa::path(
    delete,
    path = "/api/share/{port}",
    params(
        ("port" = u16, Path, description = "Port number")
    ),
    responses(
        (status = 200, description = "Port is private", body = ShareResponse),
        (status = 400, description = "Invalid port", body = ErrorResponse),
        (status = 401, description = "Missing or invalid session", body = ErrorResponse),
        (status = 404, description = "Port not tracked", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "sharing"
)]
pub async fn unshare_port(
    State(state): State<Arc<AppState>>,
    Path(port): Path<String>,
) -> Result<Json<ShareResponse>, ApiError> {
    let port = parse_port(&port)?;

    let record = state
        .registry
        .unshare(port)
        .await
        .map_err(|e| {
            error!(port, "Failed to unshare: {}", e);
            internal_error(format!("Failed to unshare: {}", e), "REGISTRY_ERROR")
        })?
        .ok_or_else(|| {
            (
                StatusCode::NOT_FOUND,
                Json(ErrorResponse::new(
                    format!("Port {} is not tracked", port),
                    "PORT_NOT_FOUND",
                )),
            )
        })?;

    info!(port, "Sharing reset to private");

    Ok(Json(ShareResponse {
        status: "ok".to_string(),
        mode: record.share_mode,
        url: state.config.share_url(port),
        expires_at: None,
    }))
}

/// List tracked ports
#[utoipa::path(
    get,
    path = "/api/ports",
    responses(
        (status = 200, description = "Tracked ports", body = PortList),
        (status = 401, description = "Missing or invalid session", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "ports"
)]
pub async fn list_ports(
    State(state): State<Arc<AppState>>,
) -> Result<Json<PortList>, ApiError> {
    debug!("Listing ports");

    let ports = state.registry.list().await.map_err(|e| {
        error!("Failed to list ports: {}", e);
        internal_error(format!("Failed to list ports: {}", e), "REGISTRY_ERROR")
    })?;
    let total = ports.len();

    Ok(Json(PortList { ports, total }))
}

/// Health check
#[utoipa::path(
    get,
    path = "/api/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    ),
    tag = "system"
)]
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// OpenAPI document
#[utoipa::path(
    get,
    path = "/api/openapi.json",
    responses(
        (status = 200, description = "OpenAPI document")
    ),
    tag = "system"
)]
pub async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Gateway UI root; leaving an app clears its routing context
pub async fn ui_root() -> Response {
    let mut response = index_html()
        .unwrap_or_else(|| (StatusCode::NOT_FOUND, "Not Found").into_response());
    if let Some(cookie) = clear_cookie(CONTEXT_COOKIE) {
        response.headers_mut().append(header::SET_COOKIE, cookie);
    }
    response
}
