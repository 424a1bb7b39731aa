//! Password challenge page

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{Html, IntoResponse, Response},
};
use homeport_proto::AUTH_SUBPATH;
use std::time::Duration;

const TEMPLATE: &str = r#"<!doctype html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>Port {port} is password protected · homeport</title>
<style>
  body { font-family: system-ui, sans-serif; background: #0f172a; color: #e2e8f0; display: flex; min-height: 100vh; align-items: center; justify-content: center; margin: 0; }
  form { background: #1e293b; padding: 2rem; border-radius: 12px; width: 100%; max-width: 22rem; box-shadow: 0 10px 30px rgba(0,0,0,.4); }
  h1 { font-size: 1.1rem; margin: 0 0 1rem; }
  input { width: 100%; box-sizing: border-box; padding: .6rem; border-radius: 6px; border: 1px solid #334155; background: #0f172a; color: inherit; }
  button { margin-top: 1rem; width: 100%; padding: .6rem; border: 0; border-radius: 6px; background: #6366f1; color: white; font-weight: 600; cursor: pointer; }
  button:disabled { background: #475569; cursor: not-allowed; }
  .error { color: #fca5a5; margin: 0 0 1rem; font-size: .9rem; }
</style>
</head>
<body>
<form method="post" action="/{port}{auth_path}">
  <h1>Port {port} is password protected</h1>
  {error}
  <input type="password" name="password" placeholder="Password" autocomplete="current-password" autofocus required {disabled}>
  <button type="submit" {disabled}>Continue</button>
</form>
</body>
</html>
"#;

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

pub fn render(port: u16, error: Option<&str>, locked: bool) -> String {
    let error = error
        .map(|e| format!(r#"<p class="error">{}</p>"#, escape(e)))
        .unwrap_or_default();

    TEMPLATE
        .replace("{port}", &port.to_string())
        .replace("{auth_path}", AUTH_SUBPATH)
        .replace("{error}", &error)
        .replace("{disabled}", if locked { "disabled" } else { "" })
}

/// 401 with the form, optionally showing an error
pub fn challenge_response(port: u16, error: Option<&str>) -> Response {
    (StatusCode::UNAUTHORIZED, Html(render(port, error, false))).into_response()
}

/// 429 with the form locked and a `Retry-After` header
pub fn rate_limited_response(port: u16, retry_after: Duration) -> Response {
    let secs = retry_after.as_secs().max(1);
    let minutes = secs.div_ceil(60);
    let message = format!(
        "Too many failed attempts. Try again in {} minute{}.",
        minutes,
        if minutes == 1 { "" } else { "s" }
    );

    let mut response = (
        StatusCode::TOO_MANY_REQUESTS,
        Html(render(port, Some(&message), true)),
    )
        .into_response();
    response
        .headers_mut()
        .insert(header::RETRY_AFTER, HeaderValue::from(secs));
    response
}
