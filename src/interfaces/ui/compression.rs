//! Response gzip compression above `UiConfig.gzip_threshold_bytes`.
//!
//! `tower-http`'s compression feature isn't enabled (the rest of the stack
//! has no other use for it), so this buffers the response body and encodes
//! it by hand with `flate2` when the client sends `Accept-Encoding: gzip`.

use std::io::Write;

use axum::body::{to_bytes, Body};
use axum::extract::State;
use axum::http::{header, HeaderValue, Request};
use axum::middleware::Next;
use axum::response::Response;
use flate2::write::GzEncoder;
use flate2::Compression;

use super::UiState;

pub async fn gzip_middleware(State(state): State<UiState>, request: Request<Body>, next: Next) -> Response {
    let accepts_gzip = request
        .headers()
        .get(header::ACCEPT_ENCODING)
        .and_then(|h| h.to_str().ok())
        .is_some_and(|v| v.contains("gzip"));

    let response = next.run(request).await;
    if !accepts_gzip {
        return response;
    }

    let (mut parts, body) = response.into_parts();
    let bytes = match to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(_) => return Response::from_parts(parts, Body::empty()),
    };
    if bytes.len() < state.config.gzip_threshold_bytes {
        return Response::from_parts(parts, Body::from(bytes));
    }

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    if encoder.write_all(&bytes).is_err() {
        return Response::from_parts(parts, Body::from(bytes));
    }
    let Ok(compressed) = encoder.finish() else {
        return Response::from_parts(parts, Body::from(bytes));
    };

    parts.headers.insert(header::CONTENT_ENCODING, HeaderValue::from_static("gzip"));
    parts.headers.insert(header::VARY, HeaderValue::from_static("Accept-Encoding"));
    parts.headers.remove(header::CONTENT_LENGTH);
    Response::from_parts(parts, Body::from(compressed))
}
