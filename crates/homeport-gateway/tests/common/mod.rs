//! Shared helpers for gateway integration tests

#![allow(dead_code)]

use axum::{
    body::Body,
    extract::{ConnectInfo, Request},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use homeport_auth::JwtSessionValidator;
use homeport_gateway::{GatewayConfig, GatewayServer};
use homeport_proto::ShareSettings;
use homeport_registry::{MemoryRegistry, PortRegistry};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

pub const SESSION_SECRET: &[u8] = b"integration-session-secret";

pub struct Harness {
    pub app: Router,
    pub registry: Arc<MemoryRegistry>,
    pub server: GatewayServer,
}

pub fn test_config() -> GatewayConfig {
    GatewayConfig {
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        cookie_secret: b"integration-cookie-secret".to_vec(),
        ..Default::default()
    }
}

pub fn harness() -> Harness {
    harness_with(test_config())
}

pub fn harness_with(config: GatewayConfig) -> Harness {
    let registry = Arc::new(MemoryRegistry::new());
    let server = GatewayServer::new(
        config,
        registry.clone(),
        Arc::new(JwtSessionValidator::new(SESSION_SECRET)),
    )
    .unwrap();
    let app = server.build_router();
    Harness {
        app,
        registry,
        server,
    }
}

/// Socket peer as seen through `into_make_service_with_connect_info`
pub fn peer(ip: &str) -> ConnectInfo<SocketAddr> {
    ConnectInfo(SocketAddr::new(ip.parse().unwrap(), 40000))
}

pub fn session_token(subject: &str) -> String {
    JwtSessionValidator::new(SESSION_SECRET)
        .issue(subject, chrono::Duration::hours(1))
        .unwrap()
}

pub async fn share(registry: &MemoryRegistry, port: u16, settings: ShareSettings) {
    registry.set_share(port, &settings, Utc::now()).await.unwrap();
}

pub async fn body_bytes(response: Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

pub async fn body_string(response: Response) -> String {
    String::from_utf8(body_bytes(response).await).unwrap()
}

pub async fn body_json(response: Response) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

pub fn set_cookies(headers: &HeaderMap) -> Vec<String> {
    headers
        .get_all(header::SET_COOKIE)
        .iter()
        .map(|v| v.to_str().unwrap().to_string())
        .collect()
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Reports what the backend received
async fn echo(request: Request) -> Json<Value> {
    let (parts, body) = request.into_parts();
    let body = axum::body::to_bytes(body, usize::MAX).await.unwrap();
    Json(json!({
        "method": parts.method.as_str(),
        "path": parts.uri.path(),
        "query": parts.uri.query(),
        "host": header_string(&parts.headers, "host"),
        "x_forwarded_for": header_string(&parts.headers, "x-forwarded-for"),
        "x_forwarded_host": header_string(&parts.headers, "x-forwarded-host"),
        "x_forwarded_proto": header_string(&parts.headers, "x-forwarded-proto"),
        "cookie": header_string(&parts.headers, "cookie"),
        "authorization": header_string(&parts.headers, "authorization"),
        "body": String::from_utf8_lossy(&body),
    }))
}

async fn redirect_relative() -> Response {
    (StatusCode::FOUND, [(header::LOCATION, "/login?from=redirect")]).into_response()
}

async fn redirect_absolute(request: Request) -> Response {
    let host = header_string(request.headers(), "host").unwrap_or_default();
    (
        StatusCode::FOUND,
        [(header::LOCATION, format!("http://{}/done", host))],
    )
        .into_response()
}

/// Accepts `Upgrade: echo` and echoes raw bytes on the upgraded stream
async fn upgrade_echo(mut request: Request) -> Response {
    let on_upgrade = hyper::upgrade::on(&mut request);
    tokio::spawn(async move {
        if let Ok(upgraded) = on_upgrade.await {
            let mut io = hyper_util::rt::TokioIo::new(upgraded);
            let mut buf = [0u8; 1024];
            loop {
                match io.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if io.write_all(&buf[..n]).await.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    });

    Response::builder()
        .status(StatusCode::SWITCHING_PROTOCOLS)
        .header(header::CONNECTION, "upgrade")
        .header(header::UPGRADE, "echo")
        .body(Body::empty())
        .unwrap()
}

/// Start a loopback backend and return its port
pub async fn spawn_backend() -> u16 {
    let app = Router::new()
        .route("/redirect", get(redirect_relative))
        .route("/redirect-absolute", get(redirect_absolute))
        .route("/upgrade", get(upgrade_echo))
        .fallback(echo);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    port
}

/// A port with nothing listening on it
pub async fn unused_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}
