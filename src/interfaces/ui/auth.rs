//! HTTP Basic authentication for the UI control plane (§4.13). Optional:
//! `UiConfig.basic_auth` being `None` disables the check entirely, which
//! suits a simulator run on a trusted network during development.

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::json;

use super::UiState;

pub async fn basic_auth_middleware(
    State(state): State<UiState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let Some(expected) = state.config.basic_auth.as_ref() else {
        return next.run(request).await;
    };

    let header_value = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    match header_value.and_then(decode_basic) {
        Some((username, password)) if username == expected.username && password == expected.password => {
            next.run(request).await
        }
        _ => unauthorized(),
    }
}

fn decode_basic(header_value: &str) -> Option<(String, String)> {
    let encoded = header_value.strip_prefix("Basic ")?;
    let decoded = BASE64.decode(encoded).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, password) = decoded.split_once(':')?;
    Some((username.to_string(), password.to_string()))
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, "Basic realm=\"ocpp-simulator\"")],
        axum::Json(json!({"status": "failure", "error": "missing or invalid credentials"})),
    )
        .into_response()
}
