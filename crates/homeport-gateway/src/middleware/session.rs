//! Top-level session middleware
//!
//! Protects the management API. The session token is read from the
//! `homeport_session` cookie or an `Authorization: Bearer <token>` header and
//! checked by the configured [`SessionValidator`]. In dev mode every request
//! passes as the `dev` user.

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
    Json,
};
use homeport_auth::SessionValidator;
use homeport_proto::SESSION_COOKIE;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::cookies::cookie_value;
use crate::models::ErrorResponse;

/// Authenticated caller, inserted into request extensions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionUser {
    pub subject: String,
}

#[derive(Clone)]
pub struct SessionState {
    pub validator: Arc<dyn SessionValidator>,
    pub dev_mode: bool,
}

/// Session token from the session cookie, falling back to a Bearer header
pub fn session_token(headers: &HeaderMap) -> Option<String> {
    if let Some(token) = cookie_value(headers, SESSION_COOKIE).filter(|t| !t.is_empty()) {
        return Some(token.to_string());
    }

    headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

pub async fn require_session(
    State(state): State<SessionState>,
    mut request: Request,
    next: Next,
) -> Result<Response, (StatusCode, Json<ErrorResponse>)> {
    if state.dev_mode {
        request.extensions_mut().insert(SessionUser {
            subject: "dev".to_string(),
        });
        return Ok(next.run(request).await);
    }

    let token = session_token(request.headers()).ok_or_else(|| {
        (
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponse::new(
                "Missing session token (cookie or Authorization header)",
                "MISSING_AUTH",
            )),
        )
    })?;

    let claims = state.validator.validate(&token).map_err(|e| {
        (
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponse::new(
                format!("Invalid or expired session: {}", e),
                "INVALID_TOKEN",
            )),
        )
    })?;

    request
        .extensions_mut()
        .insert(SessionUser { subject: claims.sub });

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request, middleware, routing::get, Extension, Router};
    use chrono::Duration;
    use homeport_auth::JwtSessionValidator;
    use tower::ServiceExt;

    const SECRET: &[u8] = b"test-session-secret";

    async fn whoami(Extension(user): Extension<SessionUser>) -> String {
        user.subject
    }

    fn app(dev_mode: bool) -> Router {
        let state = SessionState {
            validator: Arc::new(JwtSessionValidator::new(SECRET)),
            dev_mode,
        };
        Router::new()
            .route("/protected", get(whoami))
            .layer(middleware::from_fn_with_state(state, require_session))
    }

    async fn body_string(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_bearer_token_accepted() {
        let token = JwtSessionValidator::new(SECRET)
            .issue("alice", Duration::hours(1))
            .unwrap();
        let response = app(false)
            .oneshot(
                Request::builder()
                    .uri("/protected")
                    .header("Authorization", format!("Bearer {}", token))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "alice");
    }

    #[tokio::test]
    async fn test_session_cookie_accepted() {
        let token = JwtSessionValidator::new(SECRET)
            .issue("bob", Duration::hours(1))
            .unwrap();
        let response = app(false)
            .oneshot(
                Request::builder()
                    .uri("/protected")
                    .header("Cookie", format!("other=1; homeport_session={}", token))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "bob");
    }

    #[tokio::test]
    async fn test_missing_token_rejected() {
        let response = app(false)
            .oneshot(
                Request::builder()
                    .uri("/protected")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let error: ErrorResponse = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(error.code.as_deref(), Some("MISSING_AUTH"));
    }

    #[tokio::test]
    async fn test_invalid_token_rejected() {
        let response = app(false)
            .oneshot(
                Request::builder()
                    .uri("/protected")
                    .header("Authorization", "Bearer nope")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_dev_mode_bypasses_session() {
        let response = app(true)
            .oneshot(
                Request::builder()
                    .uri("/protected")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "dev");
    }
}
