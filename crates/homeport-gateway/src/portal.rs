//! Embedded gateway UI

use axum::{
    body::Body,
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use rust_embed::RustEmbed;

#[derive(RustEmbed)]
#[folder = "ui"]
struct PortalAssets;

/// Serve an embedded asset, falling back to `index.html` for non-API paths
pub fn serve_ui(path: &str) -> Response {
    let path = path.trim_start_matches('/');

    if !path.is_empty() {
        if let Some(content) = PortalAssets::get(path) {
            let mime = mime_guess::from_path(path).first_or_octet_stream();
            let mut response = Response::new(Body::from(content.data.into_owned()));
            if let Ok(value) = HeaderValue::from_str(mime.as_ref()) {
                response.headers_mut().insert(header::CONTENT_TYPE, value);
            }
            return response;
        }
    }

    if !path.starts_with("api") {
        if let Some(index) = index_html() {
            return index;
        }
    }

    (StatusCode::NOT_FOUND, "Not Found").into_response()
}

pub fn index_html() -> Option<Response> {
    let content = PortalAssets::get("index.html")?;
    let mut response = Response::new(Body::from(content.data.into_owned()));
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/html; charset=utf-8"),
    );
    Some(response)
}
