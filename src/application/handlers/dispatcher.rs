//! Incoming command dispatcher (C8).
//!
//! Maps an action name to a handler for the station's negotiated OCPP
//! version. A handler panic is caught here and turned into a CallError
//! instead of taking the session down (§4.8).

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use serde_json::Value;
use tokio::sync::Mutex as AsyncMutex;

use crate::domain::auth::{AuthCache, AuthPipeline, LocalAuthList};
use crate::domain::certificate::CertificateManager;
use crate::domain::configuration::ConfigurationStore;
use crate::domain::ocpp::OcppVersion;
use crate::domain::station::Station;
use crate::domain::transaction::StopReason;

use super::{v16, v201};

/// Outbound work the station FSM (C10) should perform after a handler
/// returns its response, once the CallResult has been sent.
#[derive(Debug, Clone)]
pub enum SideEffect {
    None,
    DisconnectImmediately,
    DisconnectOnIdle,
    RebootRequired,
    EmitStatusNotification { connector_id: u32 },
    /// v2.0.1 only: the handler already created the domain `Transaction`
    /// (2.0.1 assigns the transaction id itself); the FSM just emits the event.
    EmitTransactionEventStarted { connector_id: u32 },
    EmitTransactionEventEnded { connector_id: u32, reason: StopReason },
    EmitNotifyReport { request_id: i32, pages: Vec<Value> },
    /// v1.6 only: CSMS assigns the transaction id in the `StartTransaction`
    /// response, so the handler can't create the domain `Transaction` yet —
    /// the FSM runs the full authorize/StartTransaction round trip.
    BeginLocalTransaction { connector_id: u32, id_tag: String },
}

#[derive(Debug, Clone)]
pub struct CallErrorInfo {
    pub error_code: &'static str,
    pub error_description: String,
}

pub type HandlerResult = Result<Value, CallErrorInfo>;

/// Shared state available to every incoming-command handler.
pub struct HandlerContext {
    pub station: Arc<AsyncMutex<Station>>,
    pub config: Arc<AsyncMutex<ConfigurationStore>>,
    pub auth_cache: Arc<AuthCache>,
    pub local_list: Arc<LocalAuthList>,
    pub auth_pipeline: Arc<AuthPipeline>,
    pub certificates: Arc<CertificateManager>,
    pub station_hash_id: String,
}

pub struct HandlerDispatcher {
    ctx: Arc<HandlerContext>,
}

impl HandlerDispatcher {
    pub fn new(ctx: Arc<HandlerContext>) -> Self {
        Self { ctx }
    }

    pub async fn dispatch(
        &self,
        version: OcppVersion,
        action: &str,
        payload: Value,
    ) -> (HandlerResult, SideEffect) {
        let ctx = self.ctx.clone();
        let action_owned = action.to_string();
        let outcome = AssertUnwindSafe(async move {
            match version {
                OcppVersion::V16 => v16::handle(&ctx, &action_owned, payload).await,
                OcppVersion::V201 => v201::handle(&ctx, &action_owned, payload).await,
            }
        })
        .catch_unwind()
        .await;

        match outcome {
            Ok((result, effect)) => (result, effect),
            Err(_) => (
                Err(CallErrorInfo {
                    error_code: "InternalError",
                    error_description: format!("handler for action '{action}' panicked"),
                }),
                SideEffect::None,
            ),
        }
    }
}

pub(super) fn not_implemented(action: &str) -> HandlerResult {
    Err(CallErrorInfo {
        error_code: "NotImplemented",
        error_description: format!("action '{action}' is not supported"),
    })
}

pub(super) fn unsupported(reason: impl Into<String>) -> CallErrorInfo {
    CallErrorInfo {
        error_code: "NotSupported",
        error_description: reason.into(),
    }
}
