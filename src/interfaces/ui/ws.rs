//! Persistent WebSocket transport for the UI control plane (§4.13),
//! subprotocol `ui0.0.1`. Carries the same `[uuid, procedure, payload]` /
//! `[uuid, {status, ...}]` envelope as the HTTP endpoint for requests, and
//! additionally pushes station lifecycle events from `EVENTS_CHANNEL` —
//! the genuine multi-subscriber fan-out this control plane has, mirrored on
//! the teacher's event-bus notification socket.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::select;
use tracing::{debug, warn};

use super::dispatch;
use super::dto::{envelope, Procedure, RawRequest, ResponseBody};
use super::{UiState, EVENTS_CHANNEL};

pub const SUBPROTOCOL: &str = "ui0.0.1";

pub async fn upgrade(ws: WebSocketUpgrade, State(state): State<UiState>) -> impl IntoResponse {
    ws.protocols([SUBPROTOCOL]).on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: UiState) {
    let (mut sender, mut receiver) = socket.split();
    let mut events = state.broadcast.subscribe(EVENTS_CHANNEL);

    loop {
        select! {
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        let response = handle_request(&state, &text).await;
                        if let Err(e) = sender.send(Message::Text(response.into())).await {
                            warn!(error = %e, "failed to send UI response");
                            break;
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "UI websocket error");
                        break;
                    }
                }
            }

            event = events.recv() => {
                match event {
                    Some(message) => {
                        let push = json!({"event": message.payload});
                        if sender.send(Message::Text(push.to_string().into())).await.is_err() {
                            break;
                        }
                    }
                    None => {
                        debug!("ui events channel closed");
                        break;
                    }
                }
            }
        }
    }
}

async fn handle_request(state: &UiState, text: &str) -> String {
    let value: serde_json::Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => return json!({"error": format!("invalid json: {e}")}).to_string(),
    };

    let request = match RawRequest::from_envelope(value) {
        Ok(r) => r,
        Err(e) => return json!({"error": e}).to_string(),
    };

    let body = match Procedure::parse(&request.procedure, request.payload) {
        Ok(procedure) => dispatch::execute(state, procedure).await,
        Err(e) => ResponseBody::failure(e),
    };

    envelope(request.id, body).to_string()
}
