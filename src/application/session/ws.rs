//! Session (C2): owns one duplex WebSocket transport to the CSMS endpoint.
//!
//! Runs as a background task per station. Reconnects on any abnormal close
//! with full-jitter exponential backoff; a new session id is minted on each
//! reconnect and all requests pending against the old session are rejected
//! by the correlator (C3), which observes `SessionEvent::Disconnected`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::Message;
use tracing::{info, warn};

use crate::domain::ocpp::OcppVersion;
use crate::support::errors::TransportError;
use crate::support::ocpp_frame::OcppFrame;
use crate::support::retry::ReconnectBackoff;

const OUTBOUND_BUFFER_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub enum SessionEvent {
    Open { session_id: u64 },
    Frame { session_id: u64, frame: OcppFrame },
    Disconnected { session_id: u64 },
}

/// Handle given to the owner (the station FSM) to drive and observe a session.
pub struct SessionHandle {
    outbound: mpsc::Sender<String>,
    stop: Arc<AtomicBool>,
    force_reconnect: Arc<AtomicBool>,
}

impl SessionHandle {
    /// `send(frame)` — fails `NotOpen`/`Backpressure` per §4.2.
    pub fn send(&self, frame: &OcppFrame) -> Result<(), TransportError> {
        let text = frame.serialize();
        self.outbound
            .try_send(text)
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => TransportError::Backpressure,
                mpsc::error::TrySendError::Closed(_) => TransportError::NotOpen,
            })
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Force the current connection closed; the run loop reconnects with
    /// backoff as usual rather than halting (used for Reset/reboot effects
    /// that must re-establish the session instead of ending it).
    pub fn reconnect(&self) {
        self.force_reconnect.store(true, Ordering::SeqCst);
    }
}

pub struct Session;

impl Session {
    /// Spawn the reconnecting session loop. Inbound frames and lifecycle
    /// events are delivered on `events`; `SessionHandle::send` enqueues
    /// outbound frames.
    pub fn spawn(
        supervision_url: String,
        ocpp_version: OcppVersion,
        ping_interval: Duration,
        reconnect_max: Duration,
        events: mpsc::Sender<SessionEvent>,
    ) -> SessionHandle {
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_BUFFER_CAPACITY);
        let stop = Arc::new(AtomicBool::new(false));
        let force_reconnect = Arc::new(AtomicBool::new(false));

        let handle = SessionHandle {
            outbound: outbound_tx,
            stop: stop.clone(),
            force_reconnect: force_reconnect.clone(),
        };

        tokio::spawn(run_loop(
            supervision_url,
            ocpp_version,
            ping_interval,
            reconnect_max,
            events,
            outbound_rx,
            stop,
            force_reconnect,
        ));

        handle
    }
}

async fn run_loop(
    url: String,
    ocpp_version: OcppVersion,
    ping_interval: Duration,
    reconnect_max: Duration,
    events: mpsc::Sender<SessionEvent>,
    mut outbound_rx: mpsc::Receiver<String>,
    stop: Arc<AtomicBool>,
    force_reconnect: Arc<AtomicBool>,
) {
    let mut backoff = ReconnectBackoff::new(Duration::from_millis(500), reconnect_max);
    let mut session_id: u64 = 0;

    while !stop.load(Ordering::SeqCst) {
        session_id += 1;
        match connect_and_serve(
            &url,
            ocpp_version,
            session_id,
            ping_interval,
            &events,
            &mut outbound_rx,
            &stop,
            &force_reconnect,
        )
        .await
        {
            Ok(()) => backoff.reset(),
            Err(e) => warn!(session_id, error = %e, "session closed abnormally"),
        }

        if events
            .send(SessionEvent::Disconnected { session_id })
            .await
            .is_err()
        {
            return;
        }
        if stop.load(Ordering::SeqCst) {
            return;
        }

        let delay = backoff.next();
        info!(session_id, delay_ms = delay.as_millis() as u64, "reconnecting");
        tokio::time::sleep(delay).await;
    }
}

async fn connect_and_serve(
    url: &str,
    ocpp_version: OcppVersion,
    session_id: u64,
    ping_interval: Duration,
    events: &mpsc::Sender<SessionEvent>,
    outbound_rx: &mut mpsc::Receiver<String>,
    stop: &Arc<AtomicBool>,
    force_reconnect: &Arc<AtomicBool>,
) -> Result<(), TransportError> {
    let mut request = url
        .into_client_request()
        .map_err(|e| TransportError::WebSocket(e.to_string()))?;
    request.headers_mut().insert(
        SEC_WEBSOCKET_PROTOCOL,
        ocpp_version
            .subprotocol()
            .parse()
            .map_err(|_| TransportError::WebSocket("invalid subprotocol header".into()))?,
    );

    let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
        .await
        .map_err(|e| TransportError::ConnectRefused.context(e))?;
    let (mut write, mut read) = ws_stream.split();

    if events.send(SessionEvent::Open { session_id }).await.is_err() {
        return Ok(());
    }
    metrics::gauge!("ocpp_connected_stations").increment(1.0);
    let _connected_gauge = DecrementOnDrop;

    let mut missed_pongs: u32 = 0;
    let mut ping_timer = tokio::time::interval(ping_interval);
    ping_timer.tick().await; // first tick fires immediately

    loop {
        if stop.load(Ordering::SeqCst) {
            let _ = write.close().await;
            return Ok(());
        }
        if force_reconnect.swap(false, Ordering::SeqCst) {
            let _ = write.close().await;
            return Err(TransportError::Disconnected);
        }

        tokio::select! {
            _ = ping_timer.tick() => {
                if missed_pongs >= 2 {
                    warn!(session_id, "missed pong twice, forcing close");
                    let _ = write.close().await;
                    return Err(TransportError::Timeout("ping".into()));
                }
                missed_pongs += 1;
                if write.send(Message::Ping(Vec::new())).await.is_err() {
                    return Err(TransportError::WebSocket("ping send failed".into()));
                }
            }
            outbound = outbound_rx.recv() => {
                match outbound {
                    Some(text) => {
                        if write.send(Message::Text(text)).await.is_err() {
                            return Err(TransportError::WebSocket("send failed".into()));
                        }
                    }
                    None => {
                        let _ = write.close().await;
                        return Ok(());
                    }
                }
            }
            incoming = read.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        match OcppFrame::parse(&text) {
                            Ok(frame) => {
                                if events.send(SessionEvent::Frame { session_id, frame }).await.is_err() {
                                    return Ok(());
                                }
                            }
                            Err(e) => warn!(session_id, error = %e, "dropping unparseable frame"),
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        missed_pongs = 0;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        return Err(TransportError::Disconnected);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(TransportError::WebSocket(e.to_string())),
                }
            }
        }
    }
}

/// Keeps `ocpp_connected_stations` accurate across every exit path out of
/// the connected loop (clean close, ping timeout, force reconnect, read error).
struct DecrementOnDrop;

impl Drop for DecrementOnDrop {
    fn drop(&mut self) {
        metrics::gauge!("ocpp_connected_stations").decrement(1.0);
    }
}

trait ContextExt {
    fn context(self, err: impl std::fmt::Display) -> TransportError;
}

impl ContextExt for TransportError {
    fn context(self, err: impl std::fmt::Display) -> TransportError {
        match self {
            TransportError::ConnectRefused => TransportError::WebSocket(format!("connect failed: {err}")),
            other => other,
        }
    }
}
