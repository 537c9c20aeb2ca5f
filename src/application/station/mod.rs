//! Station lifecycle state machine (C10).
//!
//! One instance owns a single simulated charging station end to end: the
//! session (C2), correlator (C3), incoming dispatcher (C8), outgoing builders
//! (C9), the ATG (C11) and the certificate manager (C15), driven through the
//! lifecycle in §4.10.

pub mod auth;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use rust_decimal::Decimal;
use rust_ocpp::v1_6::messages::boot_notification::BootNotificationResponse as BootResponseV16;
use rust_ocpp::v1_6::messages::start_transaction::StartTransactionResponse;
use rust_ocpp::v1_6::types::{AuthorizationStatus, RegistrationStatus};
use rust_ocpp::v2_0_1::enumerations::boot_reason_enum_type::BootReasonEnumType;
use rust_ocpp::v2_0_1::enumerations::registration_status_enum_type::RegistrationStatusEnumType;
use rust_ocpp::v2_0_1::enumerations::trigger_reason_enum_type::TriggerReasonEnumType;
use rust_ocpp::v2_0_1::messages::boot_notification::BootNotificationResponse as BootResponseV201;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};
use tracing::{info, warn};

use crate::application::atg::{self, AtgConfig, AtgHandle, TransactionDriver};
use crate::application::commands::{v16, v201};
use crate::application::correlator::Correlator;
use crate::application::handlers::{HandlerContext, HandlerDispatcher, SideEffect};
use crate::application::session::{Session, SessionEvent, SessionHandle};
use crate::application::station::auth::Authorizer;
use crate::domain::auth::pipeline::AuthContext;
use crate::domain::auth::{AuthCache, AuthPipeline, LocalAuthList};
use crate::domain::certificate::CertificateManager;
use crate::domain::configuration::ConfigurationStore;
use crate::domain::connector::ConnectorStatus;
use crate::domain::ocpp::{Identifier, IdentifierType, OcppVersion};
use crate::domain::station::{BootStatus, ConnectionState, Station, SupervisionUrls};
use crate::domain::transaction::{StopReason, Transaction, TransactionId};
use crate::support::ocpp_frame::OcppFrame;

const DISPATCH_CHANNEL_CAPACITY: usize = 64;
const EVENTS_CHANNEL_CAPACITY: usize = 64;
const METER_SAMPLE_TICK: Duration = Duration::from_secs(1);
const SIDE_EFFECT_GRACE: Duration = Duration::from_millis(150);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StationFsmState {
    Stopped,
    Starting,
    Registering,
    Running,
    Reconnecting,
    Stopping,
}

/// Everything the FSM needs to run one station, supplied by the supervisor
/// (analogous to a worker constructing one connection handler per client).
pub struct StationDeps {
    pub hash_id: String,
    pub station: Arc<AsyncMutex<Station>>,
    pub config: Arc<AsyncMutex<ConfigurationStore>>,
    pub auth_cache: Arc<AuthCache>,
    pub local_list: Arc<LocalAuthList>,
    pub auth_pipeline: Arc<AuthPipeline>,
    pub certificates: Arc<CertificateManager>,
    pub ping_interval: Duration,
    pub reconnect_max: Duration,
    pub action_timeout: Duration,
    pub auth_cache_lifetime_secs: u64,
    /// Per real connector id; absent entries mean the ATG is disabled there.
    pub atg: std::collections::HashMap<u32, AtgConfig>,
}

#[derive(Clone)]
pub struct StationHandle {
    pub hash_id: String,
    control: mpsc::Sender<ControlMsg>,
}

/// Outcome of a UI control-plane command against a running station.
pub type ControlOutcome = Result<(), String>;

enum ControlMsg {
    Stop(oneshot::Sender<()>),
    OpenConnection(oneshot::Sender<ControlOutcome>),
    CloseConnection(oneshot::Sender<ControlOutcome>),
    StartTransaction {
        connector_id: u32,
        id_tag: String,
        reply: oneshot::Sender<ControlOutcome>,
    },
    StopTransaction {
        connector_id: u32,
        reply: oneshot::Sender<ControlOutcome>,
    },
    StartAtg(oneshot::Sender<ControlOutcome>),
    StopAtg(oneshot::Sender<ControlOutcome>),
    SetSupervisionUrl {
        url: String,
        reply: oneshot::Sender<ControlOutcome>,
    },
}

impl StationHandle {
    pub async fn stop(&self) {
        let (tx, rx) = oneshot::channel();
        if self.control.send(ControlMsg::Stop(tx)).await.is_ok() {
            let _ = rx.await;
        }
    }

    async fn call(&self, build: impl FnOnce(oneshot::Sender<ControlOutcome>) -> ControlMsg) -> ControlOutcome {
        let (tx, rx) = oneshot::channel();
        if self.control.send(build(tx)).await.is_err() {
            return Err("station is not running".to_string());
        }
        rx.await.unwrap_or_else(|_| Err("station dropped the request".to_string()))
    }

    /// Reconnect the session (§4.13 `OpenConnection`).
    pub async fn open_connection(&self) -> ControlOutcome {
        self.call(ControlMsg::OpenConnection).await
    }

    /// Close the session without stopping the station (§4.13 `CloseConnection`).
    pub async fn close_connection(&self) -> ControlOutcome {
        self.call(ControlMsg::CloseConnection).await
    }

    pub async fn start_transaction(&self, connector_id: u32, id_tag: String) -> ControlOutcome {
        let (tx, rx) = oneshot::channel();
        if self
            .control
            .send(ControlMsg::StartTransaction { connector_id, id_tag, reply: tx })
            .await
            .is_err()
        {
            return Err("station is not running".to_string());
        }
        rx.await.unwrap_or_else(|_| Err("station dropped the request".to_string()))
    }

    pub async fn stop_transaction(&self, connector_id: u32) -> ControlOutcome {
        let (tx, rx) = oneshot::channel();
        if self
            .control
            .send(ControlMsg::StopTransaction { connector_id, reply: tx })
            .await
            .is_err()
        {
            return Err("station is not running".to_string());
        }
        rx.await.unwrap_or_else(|_| Err("station dropped the request".to_string()))
    }

    pub async fn start_atg(&self) -> ControlOutcome {
        self.call(ControlMsg::StartAtg).await
    }

    pub async fn stop_atg(&self) -> ControlOutcome {
        self.call(ControlMsg::StopAtg).await
    }

    /// Replace the station's supervision URL with a single fixed endpoint
    /// (§4.13 `SetSupervisionUrl`). Takes effect on the next reconnect, since
    /// the session only re-selects a URL when it dials.
    pub async fn set_supervision_url(&self, url: String) -> ControlOutcome {
        let (tx, rx) = oneshot::channel();
        if self
            .control
            .send(ControlMsg::SetSupervisionUrl { url, reply: tx })
            .await
            .is_err()
        {
            return Err("station is not running".to_string());
        }
        rx.await.unwrap_or_else(|_| Err("station dropped the request".to_string()))
    }
}

/// Shared, version-agnostic plumbing the FSM task and the ATG driver both
/// reach into. Cloned behind an `Arc` rather than re-derived per call.
struct Shared {
    hash_id: String,
    ocpp_version: OcppVersion,
    station: Arc<AsyncMutex<Station>>,
    config: Arc<AsyncMutex<ConfigurationStore>>,
    auth_cache: Arc<AuthCache>,
    local_list: Arc<LocalAuthList>,
    auth_pipeline: Arc<AuthPipeline>,
    certificates: Arc<CertificateManager>,
    auth_cache_lifetime_secs: u64,
    correlator: Arc<Correlator>,
    session: Arc<SessionHandle>,
    action_timeout: Duration,
    disconnect_on_idle: AtomicBool,
    seq_counters: DashMap<u32, i32>,
}

impl Shared {
    fn authorizer(&self) -> Authorizer<'_> {
        Authorizer {
            pipeline: &self.auth_pipeline,
            local_list: &self.local_list,
            cache: &self.auth_cache,
            cache_lifetime_secs: self.auth_cache_lifetime_secs,
            certificates: &self.certificates,
            correlator: &self.correlator,
            station_hash_id: &self.hash_id,
            ocpp_version: self.ocpp_version,
            action_timeout: self.action_timeout,
        }
    }

    fn next_seq_no(&self, connector_id: u32) -> i32 {
        let mut entry = self.seq_counters.entry(connector_id).or_insert(0);
        let value = *entry;
        *entry += 1;
        value
    }

    async fn emit_status_notification(&self, connector_id: u32) {
        let correlator = self.correlator.clone();
        let action_timeout = self.action_timeout;
        match self.ocpp_version {
            OcppVersion::V16 => {
                let station = self.station.lock().await;
                let Some(connector) = station.connector(connector_id) else { return };
                let req = v16::status_notification_request(connector, connector.fault.as_deref());
                let payload = serde_json::to_value(req).unwrap_or_default();
                drop(station);
                tokio::spawn(async move {
                    if let Err(e) = correlator.request(v16::ACTION_STATUS_NOTIFICATION, payload, action_timeout).await {
                        warn!(connector_id, error = %e, "StatusNotification failed");
                    }
                });
            }
            OcppVersion::V201 => {
                let station = self.station.lock().await;
                let Some(connector) = station.connector(connector_id) else { return };
                let status = connector.status;
                drop(station);
                let req = v201::status_notification_request(connector_id, connector_id, status);
                let payload = serde_json::to_value(req).unwrap_or_default();
                tokio::spawn(async move {
                    if let Err(e) = correlator.request(v201::ACTION_STATUS_NOTIFICATION, payload, action_timeout).await {
                        warn!(connector_id, error = %e, "StatusNotification failed");
                    }
                });
            }
        }
    }

    /// Drives the `Authorize -> StartTransaction -> (assigned id) -> settle`
    /// round trip required by 1.6, since the CSMS — not the station —
    /// assigns the transaction id.
    async fn begin_transaction_v16(&self, connector_id: u32, id_tag: &str) -> bool {
        let identifier = Identifier::from_id_tag(id_tag);
        let verdict = self.authorizer().authorize(&identifier, AuthContext::TransactionStart).await;
        if verdict.status != crate::domain::auth::AuthStatus::Accepted {
            return false;
        }

        {
            let mut station = self.station.lock().await;
            let Some(connector) = station.connector_mut(connector_id) else { return false };
            if connector.has_active_transaction() || connector.begin_preparing().is_err() {
                return false;
            }
        }
        self.emit_status_notification(connector_id).await;

        let req = v16::start_transaction_request(connector_id, id_tag, 0);
        let payload = serde_json::to_value(req).unwrap_or_default();
        let result = self
            .correlator
            .request(v16::ACTION_START_TRANSACTION, payload, self.action_timeout)
            .await;

        let response: StartTransactionResponse = match result.and_then(|v| {
            serde_json::from_value(v).map_err(|_| crate::application::correlator::CorrelatorError::Timeout)
        }) {
            Ok(r) => r,
            Err(_) => {
                self.revert_to_available(connector_id).await;
                return false;
            }
        };
        if !matches!(response.id_tag_info.status, AuthorizationStatus::Accepted) {
            self.revert_to_available(connector_id).await;
            return false;
        }

        let tx = Transaction::new_local(response.transaction_id as i64, connector_id, id_tag, 0);
        {
            let mut station = self.station.lock().await;
            if let Some(connector) = station.connector_mut(connector_id) {
                if connector.start_transaction(tx).is_ok() {
                    station.counters.transactions_started += 1;
                    metrics::counter!("ocpp_transactions_total", "status" => "started").increment(1);
                }
            }
        }
        self.emit_status_notification(connector_id).await;
        true
    }

    async fn begin_transaction_v201(&self, connector_id: u32, id_tag: &str) -> bool {
        let identifier = Identifier::from_id_token(IdentifierType::Central, id_tag);
        let verdict = self.authorizer().authorize(&identifier, AuthContext::TransactionStart).await;
        if verdict.status != crate::domain::auth::AuthStatus::Accepted {
            return false;
        }

        {
            let mut station = self.station.lock().await;
            let Some(connector) = station.connector_mut(connector_id) else { return false };
            if connector.has_active_transaction() || connector.begin_preparing().is_err() {
                return false;
            }
        }
        self.emit_status_notification(connector_id).await;

        let tx = Transaction::new_v201(connector_id, id_tag, Decimal::ZERO);
        {
            let mut station = self.station.lock().await;
            if let Some(connector) = station.connector_mut(connector_id) {
                if connector.start_transaction(tx.clone()).is_ok() {
                    station.counters.transactions_started += 1;
                    metrics::counter!("ocpp_transactions_total", "status" => "started").increment(1);
                }
            }
        }
        self.emit_status_notification(connector_id).await;

        let seq_no = self.next_seq_no(connector_id);
        let req = v201::transaction_event_started(&tx, connector_id, &identifier, seq_no, TriggerReasonEnumType::Authorized);
        let payload = serde_json::to_value(req).unwrap_or_default();
        if let Err(e) = self.correlator.request(v201::ACTION_TRANSACTION_EVENT, payload, self.action_timeout).await {
            warn!(connector_id, error = %e, "TransactionEvent(Started) failed");
        }
        true
    }

    async fn revert_to_available(&self, connector_id: u32) {
        let mut station = self.station.lock().await;
        if let Some(connector) = station.connector_mut(connector_id) {
            connector.status = ConnectorStatus::Available;
        }
    }

    async fn end_transaction(&self, connector_id: u32, reason: StopReason) {
        let tx = {
            let mut station = self.station.lock().await;
            let Some(connector) = station.connector_mut(connector_id) else { return };
            match connector.stop_transaction(reason) {
                Ok(tx) => {
                    station.counters.transactions_stopped += 1;
                    metrics::counter!("ocpp_transactions_total", "status" => "stopped").increment(1);
                    tx
                }
                Err(_) => return,
            }
        };
        self.emit_status_notification(connector_id).await;

        match &tx.id {
            TransactionId::Local(_) => {
                let req = v16::stop_transaction_request(&tx, reason);
                let payload = serde_json::to_value(req).unwrap_or_default();
                if let Err(e) = self.correlator.request(v16::ACTION_STOP_TRANSACTION, payload, self.action_timeout).await {
                    warn!(connector_id, error = %e, "StopTransaction failed");
                }
            }
            TransactionId::V201(_) => {
                let seq_no = self.next_seq_no(connector_id);
                let req = v201::transaction_event_ended(&tx, connector_id, seq_no, stop_trigger_reason(reason));
                let payload = serde_json::to_value(req).unwrap_or_default();
                if let Err(e) = self.correlator.request(v201::ACTION_TRANSACTION_EVENT, payload, self.action_timeout).await {
                    warn!(connector_id, error = %e, "TransactionEvent(Ended) failed");
                }
            }
        }

        {
            let mut station = self.station.lock().await;
            if let Some(connector) = station.connector_mut(connector_id) {
                connector.settle();
            }
        }
        self.emit_status_notification(connector_id).await;
        self.maybe_disconnect_on_idle().await;
    }

    async fn maybe_disconnect_on_idle(&self) {
        if !self.disconnect_on_idle.load(Ordering::SeqCst) {
            return;
        }
        let idle = {
            let station = self.station.lock().await;
            !station.has_any_active_transaction()
        };
        if idle {
            self.disconnect_on_idle.store(false, Ordering::SeqCst);
            self.session.stop();
        }
    }
}

/// `triggerReason` for a `TransactionEvent(Ended)`, matching the stop's
/// actual cause instead of always reporting a locally-authorized stop — a
/// CSMS-issued `RequestStopTransaction` must be reported as `RemoteStop`.
fn stop_trigger_reason(reason: StopReason) -> TriggerReasonEnumType {
    match reason {
        StopReason::Remote => TriggerReasonEnumType::RemoteStop,
        _ => TriggerReasonEnumType::StopAuthorized,
    }
}

#[async_trait]
impl TransactionDriver for Shared {
    async fn begin(&self, connector_id: u32, id_tag: &str) -> bool {
        match self.ocpp_version {
            OcppVersion::V16 => self.begin_transaction_v16(connector_id, id_tag).await,
            OcppVersion::V201 => self.begin_transaction_v201(connector_id, id_tag).await,
        }
    }

    async fn end(&self, connector_id: u32, reason: StopReason) {
        self.end_transaction(connector_id, reason).await;
    }
}

/// Spawn the lifecycle task for one station and return a handle to control it.
pub fn spawn(deps: StationDeps) -> StationHandle {
    let (control_tx, control_rx) = mpsc::channel(4);
    let handle = StationHandle {
        hash_id: deps.hash_id.clone(),
        control: control_tx,
    };
    tokio::spawn(run(deps, control_rx));
    handle
}

async fn run(deps: StationDeps, mut control_rx: mpsc::Receiver<ControlMsg>) {
    let hash_id = deps.hash_id.clone();
    let (ocpp_version, supervision_url) = {
        let station = deps.station.lock().await;
        (
            station.ocpp_version,
            station.supervision_urls.select().to_string(),
        )
    };

    let (events_tx, mut events_rx) = mpsc::channel(EVENTS_CHANNEL_CAPACITY);
    let (dispatch_tx, mut dispatch_rx) = mpsc::channel::<OcppFrame>(DISPATCH_CHANNEL_CAPACITY);

    let session = Session::spawn(
        supervision_url,
        ocpp_version,
        Duration::from_secs(30),
        deps.reconnect_max,
        events_tx,
    );
    let session = Arc::new(session);
    let correlator = Arc::new(Correlator::new(session.clone(), dispatch_tx));

    let ctx = Arc::new(HandlerContext {
        station: deps.station.clone(),
        config: deps.config.clone(),
        auth_cache: deps.auth_cache.clone(),
        local_list: deps.local_list.clone(),
        auth_pipeline: deps.auth_pipeline.clone(),
        certificates: deps.certificates.clone(),
        station_hash_id: hash_id.clone(),
    });
    let dispatcher = HandlerDispatcher::new(ctx);

    let shared = Arc::new(Shared {
        hash_id: hash_id.clone(),
        ocpp_version,
        station: deps.station.clone(),
        config: deps.config.clone(),
        auth_cache: deps.auth_cache.clone(),
        local_list: deps.local_list.clone(),
        auth_pipeline: deps.auth_pipeline.clone(),
        certificates: deps.certificates.clone(),
        auth_cache_lifetime_secs: deps.auth_cache_lifetime_secs,
        correlator: correlator.clone(),
        session: session.clone(),
        action_timeout: deps.action_timeout,
        disconnect_on_idle: AtomicBool::new(false),
        seq_counters: DashMap::new(),
    });

    let mut state = StationFsmState::Starting;
    let mut heartbeat = tokio::time::interval(Duration::from_secs(60));
    heartbeat.tick().await;
    let mut sampler = tokio::time::interval(METER_SAMPLE_TICK);
    sampler.tick().await;

    let atg_handles: Arc<AsyncMutex<Vec<AtgHandle>>> = Arc::new(AsyncMutex::new(Vec::new()));

    loop {
        tokio::select! {
            Some(event) = events_rx.recv() => {
                match event {
                    SessionEvent::Open { session_id } => {
                        info!(hash_id = %hash_id, session_id, "session open, sending BootNotification");
                        let reason = if state == StationFsmState::Reconnecting {
                            BootReason::Triggered
                        } else {
                            BootReason::PowerUp
                        };
                        state = StationFsmState::Registering;
                        let heartbeat_secs = run_boot_cycle(&shared, reason).await;
                        heartbeat = tokio::time::interval(Duration::from_secs(heartbeat_secs.max(1)));
                        heartbeat.tick().await;
                        state = StationFsmState::Running;
                        start_atg(&shared, &deps.atg, &atg_handles).await;
                    }
                    SessionEvent::Frame { frame, .. } => {
                        correlator.on_incoming(frame).await;
                    }
                    SessionEvent::Disconnected { session_id } => {
                        warn!(hash_id = %hash_id, session_id, "session disconnected");
                        state = StationFsmState::Reconnecting;
                        correlator.disconnect_all();
                        {
                            let mut station = deps.station.lock().await;
                            station.connection_state = ConnectionState::Reconnecting;
                            station.counters.reconnect_count += 1;
                        }
                    }
                }
            }
            Some(frame) = dispatch_rx.recv() => {
                if let OcppFrame::Call { unique_id, action, payload } = frame {
                    let (result, effect) = dispatcher.dispatch(ocpp_version, &action, payload).await;
                    let response = match result {
                        Ok(value) => OcppFrame::CallResult { unique_id, payload: value },
                        Err(info) => OcppFrame::error_response(unique_id, info.error_code, info.error_description),
                    };
                    if let Err(e) = session.send(&response) {
                        warn!(hash_id = %hash_id, error = %e, "failed to send CallResult/CallError");
                    }
                    apply_side_effect(&shared, effect).await;
                }
            }
            _ = heartbeat.tick(), if state == StationFsmState::Running => {
                let (payload, action) = match ocpp_version {
                    OcppVersion::V16 => (
                        serde_json::to_value(v16::heartbeat_request()).unwrap_or_default(),
                        v16::ACTION_HEARTBEAT,
                    ),
                    OcppVersion::V201 => (
                        serde_json::to_value(v201::heartbeat_request()).unwrap_or_default(),
                        v201::ACTION_HEARTBEAT,
                    ),
                };
                metrics::counter!("ocpp_heartbeats_total").increment(1);
                let correlator = correlator.clone();
                let timeout = deps.action_timeout;
                tokio::spawn(async move {
                    let _ = correlator.request(action, payload, timeout).await;
                });
            }
            _ = sampler.tick(), if state == StationFsmState::Running => {
                sample_meter_values(&shared).await;
            }
            Some(msg) = control_rx.recv() => {
                match msg {
                    ControlMsg::Stop(done) => {
                        state = StationFsmState::Stopping;
                        run_stop_sequence(&shared, &atg_handles).await;
                        state = StationFsmState::Stopped;
                        let _ = done.send(());
                        return;
                    }
                    ControlMsg::OpenConnection(reply) => {
                        shared.session.reconnect();
                        let _ = reply.send(Ok(()));
                    }
                    ControlMsg::CloseConnection(reply) => {
                        shared.session.stop();
                        let _ = reply.send(Ok(()));
                    }
                    ControlMsg::StartTransaction { connector_id, id_tag, reply } => {
                        if state != StationFsmState::Running {
                            let _ = reply.send(Err("station is not running".to_string()));
                        } else {
                            let accepted = shared.begin(connector_id, &id_tag).await;
                            let _ = reply.send(if accepted {
                                Ok(())
                            } else {
                                Err("transaction start rejected".to_string())
                            });
                        }
                    }
                    ControlMsg::StopTransaction { connector_id, reply } => {
                        let active = {
                            let station = shared.station.lock().await;
                            station.connector(connector_id).map(|c| c.has_active_transaction()).unwrap_or(false)
                        };
                        if !active {
                            let _ = reply.send(Err("no active transaction on connector".to_string()));
                        } else {
                            shared.end(connector_id, StopReason::Local).await;
                            let _ = reply.send(Ok(()));
                        }
                    }
                    ControlMsg::StartAtg(reply) => {
                        start_atg(&shared, &deps.atg, &atg_handles).await;
                        let _ = reply.send(Ok(()));
                    }
                    ControlMsg::StopAtg(reply) => {
                        stop_atg(&atg_handles).await;
                        let _ = reply.send(Ok(()));
                    }
                    ControlMsg::SetSupervisionUrl { url, reply } => {
                        let mut station = shared.station.lock().await;
                        let distribution = station.supervision_urls.distribution;
                        station.supervision_urls = SupervisionUrls::new(vec![url], distribution);
                        let _ = reply.send(Ok(()));
                    }
                }
            }
        }
    }
}

enum BootReason {
    PowerUp,
    Triggered,
}

/// Runs BootNotification to completion per §4.10: retries on `Pending`
/// after the returned interval, holds-and-retries on `Rejected` without
/// sending any other traffic. Returns the heartbeat interval to use.
async fn run_boot_cycle(shared: &Arc<Shared>, reason: BootReason) -> u64 {
    {
        let mut station = shared.station.lock().await;
        station.boot_status = BootStatus::Booting;
        station.connection_state = ConnectionState::Connecting;
    }

    loop {
        let (payload, action) = {
            let station = shared.station.lock().await;
            match shared.ocpp_version {
                OcppVersion::V16 => {
                    let req = v16::boot_notification_request(&station);
                    (serde_json::to_value(req).unwrap_or_default(), v16::ACTION_BOOT_NOTIFICATION)
                }
                OcppVersion::V201 => {
                    let wire_reason = match reason {
                        BootReason::PowerUp => BootReasonEnumType::PowerUp,
                        BootReason::Triggered => BootReasonEnumType::Triggered,
                    };
                    let req = v201::boot_notification_request(&station, wire_reason);
                    (serde_json::to_value(req).unwrap_or_default(), v201::ACTION_BOOT_NOTIFICATION)
                }
            }
        };

        let result = shared.correlator.request(action, payload, shared.action_timeout).await;
        let (accepted, pending, interval, heartbeat_secs) = match (shared.ocpp_version, result) {
            (OcppVersion::V16, Ok(value)) => match serde_json::from_value::<BootResponseV16>(value) {
                Ok(r) => (
                    matches!(r.status, RegistrationStatus::Accepted),
                    matches!(r.status, RegistrationStatus::Pending),
                    r.interval.max(1) as u64,
                    r.interval.max(1) as u64,
                ),
                Err(_) => (false, true, 30, 60),
            },
            (OcppVersion::V201, Ok(value)) => match serde_json::from_value::<BootResponseV201>(value) {
                Ok(r) => (
                    matches!(r.status, RegistrationStatusEnumType::Accepted),
                    matches!(r.status, RegistrationStatusEnumType::Pending),
                    r.interval.max(1) as u64,
                    r.interval.max(1) as u64,
                ),
                Err(_) => (false, true, 30, 60),
            },
            (_, Err(e)) => {
                warn!(error = %e, "BootNotification transport error, retrying with backoff");
                (false, true, 10, 60)
            }
        };

        if accepted {
            let mut station = shared.station.lock().await;
            station.boot_status = BootStatus::Accepted;
            station.connection_state = ConnectionState::Connected;
            station.heartbeat_interval_secs = heartbeat_secs as u32;
            return heartbeat_secs;
        }

        {
            let mut station = shared.station.lock().await;
            station.boot_status = if pending { BootStatus::Pending } else { BootStatus::Rejected };
        }
        tokio::time::sleep(Duration::from_secs(interval)).await;
    }
}

async fn start_atg(
    shared: &Arc<Shared>,
    configs: &std::collections::HashMap<u32, AtgConfig>,
    atg_handles: &Arc<AsyncMutex<Vec<AtgHandle>>>,
) {
    let mut handles = atg_handles.lock().await;
    if !handles.is_empty() {
        return;
    }
    for (&connector_id, config) in configs {
        let driver: Arc<dyn TransactionDriver> = shared.clone();
        handles.push(atg::spawn(connector_id, config.clone(), driver));
    }
}

async fn stop_atg(atg_handles: &Arc<AsyncMutex<Vec<AtgHandle>>>) {
    let mut handles = atg_handles.lock().await;
    for handle in handles.drain(..) {
        handle.stop();
    }
}

async fn sample_meter_values(shared: &Arc<Shared>) {
    let now = Utc::now();
    let ids: Vec<u32> = {
        let station = shared.station.lock().await;
        station.real_connector_ids()
    };
    for connector_id in ids {
        let due = {
            let station = shared.station.lock().await;
            station.connector(connector_id).map(|c| c.due_for_sample(now)).unwrap_or(false)
        };
        if !due {
            continue;
        }
        let (payload, action, tx_id_v16) = {
            let mut station = shared.station.lock().await;
            let Some(connector) = station.connector_mut(connector_id) else { continue };
            // Fixed-rate ramp: no electrical model, just a monotonic register (§1 non-goal).
            if let Some(tx) = connector.transaction.as_mut() {
                let next = tx.meter_latest_wh + Decimal::from(connector.meter_value_sample_interval) * Decimal::from(10);
                tx.record_meter(next);
            }
            connector.last_sample_at = Some(now);
            match shared.ocpp_version {
                OcppVersion::V16 => {
                    let register = connector.transaction.as_ref().map(|t| t.meter_latest_wh).unwrap_or_default();
                    let tx_id = connector.transaction.as_ref().and_then(|t| match t.id {
                        TransactionId::Local(id) => Some(id as i32),
                        TransactionId::V201(_) => None,
                    });
                    let req = v16::meter_values_request(connector, register, tx_id);
                    (serde_json::to_value(req).unwrap_or_default(), v16::ACTION_METER_VALUES, true)
                }
                OcppVersion::V201 => {
                    let register = connector.transaction.as_ref().map(|t| t.meter_latest_wh).unwrap_or_default();
                    let req = v201::meter_values_request(connector_id, register);
                    (serde_json::to_value(req).unwrap_or_default(), v201::ACTION_METER_VALUES, false)
                }
            }
        };
        let _ = tx_id_v16;
        let correlator = shared.correlator.clone();
        let timeout = shared.action_timeout;
        tokio::spawn(async move {
            let _ = correlator.request(action, payload, timeout).await;
        });
    }
}

async fn apply_side_effect(shared: &Arc<Shared>, effect: SideEffect) {
    match effect {
        SideEffect::None => {}
        SideEffect::DisconnectImmediately => {
            let session = shared.session.clone();
            tokio::spawn(async move {
                tokio::time::sleep(SIDE_EFFECT_GRACE).await;
                session.reconnect();
            });
        }
        SideEffect::DisconnectOnIdle => {
            shared.disconnect_on_idle.store(true, Ordering::SeqCst);
            shared.maybe_disconnect_on_idle().await;
        }
        SideEffect::RebootRequired => {
            let session = shared.session.clone();
            tokio::spawn(async move {
                tokio::time::sleep(SIDE_EFFECT_GRACE).await;
                session.reconnect();
            });
        }
        SideEffect::EmitStatusNotification { connector_id } => {
            shared.emit_status_notification(connector_id).await;
        }
        SideEffect::EmitTransactionEventStarted { connector_id } => {
            let tx = {
                let station = shared.station.lock().await;
                station.connector(connector_id).and_then(|c| c.transaction.clone())
            };
            if let Some(tx) = tx {
                let identifier = Identifier::from_id_token(IdentifierType::Central, &tx.id_tag);
                let seq_no = shared.next_seq_no(connector_id);
                let req = v201::transaction_event_started(&tx, connector_id, &identifier, seq_no, TriggerReasonEnumType::RemoteStart);
                let payload = serde_json::to_value(req).unwrap_or_default();
                let correlator = shared.correlator.clone();
                let timeout = shared.action_timeout;
                tokio::spawn(async move {
                    let _ = correlator.request(v201::ACTION_TRANSACTION_EVENT, payload, timeout).await;
                });
            }
        }
        SideEffect::EmitTransactionEventEnded { connector_id, reason } => {
            shared.end_transaction(connector_id, reason).await;
        }
        SideEffect::EmitNotifyReport { request_id, pages } => {
            let total = pages.len() as i32;
            for (index, report_data) in pages.into_iter().enumerate() {
                let payload = serde_json::json!({
                    "requestId": request_id,
                    "generatedAt": chrono::Utc::now(),
                    "seqNo": index as i32,
                    "tbc": (index as i32) + 1 < total,
                    "reportData": report_data,
                });
                let correlator = shared.correlator.clone();
                let timeout = shared.action_timeout;
                tokio::spawn(async move {
                    let _ = correlator.request("NotifyReport", payload, timeout).await;
                });
            }
        }
        SideEffect::BeginLocalTransaction { connector_id, id_tag } => {
            let shared = shared.clone();
            tokio::spawn(async move {
                shared.begin_transaction_v16(connector_id, &id_tag).await;
            });
        }
    }
}

/// `stop()` per §4.10: cancel ATG, end active transactions as `Local`, send
/// best-effort `StatusNotification(Unavailable)` per connector, close the
/// session.
async fn run_stop_sequence(shared: &Arc<Shared>, atg_handles: &Arc<AsyncMutex<Vec<AtgHandle>>>) {
    stop_atg(atg_handles).await;

    let active: Vec<u32> = {
        let station = shared.station.lock().await;
        station
            .real_connector_ids()
            .into_iter()
            .filter(|id| station.connector(*id).map(|c| c.has_active_transaction()).unwrap_or(false))
            .collect()
    };
    for connector_id in active {
        shared.end_transaction(connector_id, StopReason::Local).await;
    }

    let ids: Vec<u32> = {
        let station = shared.station.lock().await;
        station.real_connector_ids()
    };
    for connector_id in ids {
        {
            let mut station = shared.station.lock().await;
            if let Some(connector) = station.connector_mut(connector_id) {
                connector.status = ConnectorStatus::Unavailable;
            }
        }
        shared.emit_status_notification(connector_id).await;
    }

    shared.session.stop();
}
