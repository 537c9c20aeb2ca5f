//! POST endpoint for the `[uuid, procedure, payload]` request envelope
//! (§4.13). The persistent WebSocket in `ws.rs` speaks the same envelope and
//! shares this module's dispatch, so the two transports never drift.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};

use super::dispatch;
use super::dto::{envelope, Procedure, RawRequest, ResponseBody};
use super::UiState;

pub async fn handle_procedure(State(state): State<UiState>, Json(body): Json<Value>) -> Response {
    let request = match RawRequest::from_envelope(body) {
        Ok(request) => request,
        Err(error) => return (StatusCode::BAD_REQUEST, Json(json!({"error": error}))).into_response(),
    };

    let procedure = match Procedure::parse(&request.procedure, request.payload) {
        Ok(procedure) => procedure,
        Err(error) => return Json(envelope(request.id, ResponseBody::failure(error))).into_response(),
    };

    let response_body = dispatch::execute(&state, procedure).await;
    Json(envelope(request.id, response_body)).into_response()
}
