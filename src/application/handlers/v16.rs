//! Incoming OCPP 1.6 command handlers (C8).

use rust_ocpp::v1_6::messages::change_availability::{
    ChangeAvailabilityRequest, ChangeAvailabilityResponse,
};
use rust_ocpp::v1_6::messages::change_configuration::{
    ChangeConfigurationRequest, ChangeConfigurationResponse,
};
use rust_ocpp::v1_6::messages::clear_cache::ClearCacheResponse;
use rust_ocpp::v1_6::messages::get_configuration::{
    GetConfigurationRequest, GetConfigurationResponse,
};
use rust_ocpp::v1_6::messages::remote_start_transaction::{
    RemoteStartTransactionRequest, RemoteStartTransactionResponse,
};
use rust_ocpp::v1_6::messages::remote_stop_transaction::{
    RemoteStopTransactionRequest, RemoteStopTransactionResponse,
};
use rust_ocpp::v1_6::messages::reset::{ResetRequest, ResetResponse};
use rust_ocpp::v1_6::messages::unlock_connector::{
    UnlockConnectorRequest, UnlockConnectorResponse,
};
use rust_ocpp::v1_6::types::{
    AvailabilityStatus, AvailabilityType, ClearCacheStatus, ConfigurationStatus, KeyValue,
    RemoteStartStopStatus, ResetRequestStatus, ResetStatus, UnlockStatus,
};
use serde_json::Value;

use crate::domain::connector::{AvailabilityChangeOutcome, Availability as DomainAvailability};

use super::dispatcher::{not_implemented, CallErrorInfo, HandlerContext, HandlerResult, SideEffect};

pub async fn handle(ctx: &HandlerContext, action: &str, payload: Value) -> (HandlerResult, SideEffect) {
    match action {
        "Reset" => handle_reset(ctx, payload).await,
        "ChangeAvailability" => handle_change_availability(ctx, payload).await,
        "RemoteStartTransaction" => handle_remote_start(ctx, payload).await,
        "RemoteStopTransaction" => handle_remote_stop(ctx, payload).await,
        "GetConfiguration" => handle_get_configuration(ctx, payload).await,
        "ChangeConfiguration" => handle_change_configuration(ctx, payload).await,
        "ClearCache" => handle_clear_cache(ctx, payload).await,
        "UnlockConnector" => handle_unlock_connector(ctx, payload).await,
        other => (not_implemented(other), SideEffect::None),
    }
}

fn bad_payload(action: &str, err: impl std::fmt::Display) -> CallErrorInfo {
    CallErrorInfo {
        error_code: "FormationViolation",
        error_description: format!("{action}: {err}"),
    }
}

async fn handle_reset(ctx: &HandlerContext, payload: Value) -> (HandlerResult, SideEffect) {
    let req: ResetRequest = match serde_json::from_value(payload) {
        Ok(r) => r,
        Err(e) => return (Err(bad_payload("Reset", e)), SideEffect::None),
    };
    let station = ctx.station.lock().await;
    let has_active = station.has_any_active_transaction();
    drop(station);

    match req.kind {
        ResetRequestStatus::Hard => (
            Ok(serde_json::to_value(ResetResponse {
                status: ResetStatus::Accepted,
            })
            .unwrap()),
            SideEffect::DisconnectImmediately,
        ),
        ResetRequestStatus::Soft if has_active => (
            Ok(serde_json::to_value(ResetResponse {
                status: ResetStatus::Accepted,
            })
            .unwrap()),
            SideEffect::DisconnectOnIdle,
        ),
        ResetRequestStatus::Soft => (
            Ok(serde_json::to_value(ResetResponse {
                status: ResetStatus::Accepted,
            })
            .unwrap()),
            SideEffect::DisconnectImmediately,
        ),
    }
}

async fn handle_change_availability(ctx: &HandlerContext, payload: Value) -> (HandlerResult, SideEffect) {
    let req: ChangeAvailabilityRequest = match serde_json::from_value(payload) {
        Ok(r) => r,
        Err(e) => return (Err(bad_payload("ChangeAvailability", e)), SideEffect::None),
    };
    let target = match req.kind {
        AvailabilityType::Operative => DomainAvailability::Operative,
        AvailabilityType::Inoperative => DomainAvailability::Inoperative,
    };

    let mut station = ctx.station.lock().await;
    let connector_ids: Vec<u32> = if req.connector_id == 0 {
        station.real_connector_ids()
    } else {
        vec![req.connector_id]
    };

    let mut any_scheduled = false;
    let mut any_rejected = connector_ids.is_empty();
    for id in &connector_ids {
        let Some(connector) = station.connector_mut(*id) else {
            any_rejected = true;
            continue;
        };
        match connector.change_availability(target) {
            AvailabilityChangeOutcome::Scheduled => any_scheduled = true,
            AvailabilityChangeOutcome::Accepted => {}
            AvailabilityChangeOutcome::Rejected => any_rejected = true,
        }
    }

    let status = if any_rejected {
        AvailabilityStatus::Rejected
    } else if any_scheduled {
        AvailabilityStatus::Scheduled
    } else {
        AvailabilityStatus::Accepted
    };

    (
        Ok(serde_json::to_value(ChangeAvailabilityResponse { status }).unwrap()),
        SideEffect::None,
    )
}

async fn handle_remote_start(ctx: &HandlerContext, payload: Value) -> (HandlerResult, SideEffect) {
    let req: RemoteStartTransactionRequest = match serde_json::from_value(payload) {
        Ok(r) => r,
        Err(e) => return (Err(bad_payload("RemoteStartTransaction", e)), SideEffect::None),
    };

    let Some(connector_id) = req.connector_id else {
        return (
            Ok(serde_json::to_value(RemoteStartTransactionResponse {
                status: RemoteStartStopStatus::Rejected,
            })
            .unwrap()),
            SideEffect::None,
        );
    };

    let mut station = ctx.station.lock().await;
    let accepted = match station.connector_mut(connector_id) {
        Some(connector) if !connector.has_active_transaction() => {
            connector.begin_preparing().is_ok()
        }
        _ => false,
    };

    if accepted {
        (
            Ok(serde_json::to_value(RemoteStartTransactionResponse {
                status: RemoteStartStopStatus::Accepted,
            })
            .unwrap()),
            SideEffect::BeginLocalTransaction {
                connector_id,
                id_tag: req.id_tag.clone(),
            },
        )
    } else {
        (
            Ok(serde_json::to_value(RemoteStartTransactionResponse {
                status: RemoteStartStopStatus::Rejected,
            })
            .unwrap()),
            SideEffect::None,
        )
    }
}

async fn handle_remote_stop(ctx: &HandlerContext, payload: Value) -> (HandlerResult, SideEffect) {
    use crate::domain::transaction::TransactionId;

    let req: RemoteStopTransactionRequest = match serde_json::from_value(payload) {
        Ok(r) => r,
        Err(e) => return (Err(bad_payload("RemoteStopTransaction", e)), SideEffect::None),
    };

    let mut station = ctx.station.lock().await;
    let target = station
        .real_connector_ids()
        .into_iter()
        .find(|id| {
            station
                .connector(*id)
                .and_then(|c| c.transaction.as_ref())
                .map(|tx| tx.id == TransactionId::Local(req.transaction_id as i64))
                .unwrap_or(false)
        });

    match target {
        Some(connector_id) => {
            let connector = station.connector_mut(connector_id).unwrap();
            let _ = connector.stop_transaction(crate::domain::transaction::StopReason::Remote);
            (
                Ok(serde_json::to_value(RemoteStopTransactionResponse {
                    status: RemoteStartStopStatus::Accepted,
                })
                .unwrap()),
                SideEffect::EmitTransactionEventEnded {
                    connector_id,
                    reason: crate::domain::transaction::StopReason::Remote,
                },
            )
        }
        None => (
            Ok(serde_json::to_value(RemoteStopTransactionResponse {
                status: RemoteStartStopStatus::Rejected,
            })
            .unwrap()),
            SideEffect::None,
        ),
    }
}

async fn handle_get_configuration(ctx: &HandlerContext, payload: Value) -> (HandlerResult, SideEffect) {
    let req: GetConfigurationRequest = match serde_json::from_value(payload) {
        Ok(r) => r,
        Err(e) => return (Err(bad_payload("GetConfiguration", e)), SideEffect::None),
    };
    let config = ctx.config.lock().await;

    let (configuration_key, unknown_key) = match req.key {
        None => (config.snapshot(), Vec::new()),
        Some(keys) => {
            let mut found = Vec::new();
            let mut unknown = Vec::new();
            for key in keys {
                match config.get(&key, false) {
                    Some(entry) => found.push(entry.clone()),
                    None => unknown.push(key),
                }
            }
            (found, unknown)
        }
    };

    let response = GetConfigurationResponse {
        configuration_key: Some(
            configuration_key
                .into_iter()
                .map(|k| KeyValue {
                    key: k.key,
                    readonly: k.readonly,
                    value: Some(k.value),
                })
                .collect(),
        ),
        unknown_key: Some(unknown_key),
    };
    (Ok(serde_json::to_value(response).unwrap()), SideEffect::None)
}

async fn handle_change_configuration(ctx: &HandlerContext, payload: Value) -> (HandlerResult, SideEffect) {
    let req: ChangeConfigurationRequest = match serde_json::from_value(payload) {
        Ok(r) => r,
        Err(e) => return (Err(bad_payload("ChangeConfiguration", e)), SideEffect::None),
    };
    let mut config = ctx.config.lock().await;
    let reboot_required = config
        .get(&req.key, false)
        .map(|k| k.reboot_required)
        .unwrap_or(false);

    let status = match config.set(&req.key, &req.value) {
        Ok(()) if reboot_required => ConfigurationStatus::RebootRequired,
        Ok(()) => ConfigurationStatus::Accepted,
        Err(crate::domain::error::DomainError::ReadOnly(_)) => ConfigurationStatus::Rejected,
        Err(crate::domain::error::DomainError::UnknownKey(_)) => ConfigurationStatus::NotSupported,
        Err(_) => ConfigurationStatus::Rejected,
    };
    drop(config);

    let effect = if status == ConfigurationStatus::RebootRequired {
        SideEffect::RebootRequired
    } else {
        SideEffect::None
    };
    (
        Ok(serde_json::to_value(ChangeConfigurationResponse { status }).unwrap()),
        effect,
    )
}

async fn handle_clear_cache(ctx: &HandlerContext, _payload: Value) -> (HandlerResult, SideEffect) {
    ctx.auth_cache.clear();
    (
        Ok(serde_json::to_value(ClearCacheResponse {
            status: ClearCacheStatus::Accepted,
        })
        .unwrap()),
        SideEffect::None,
    )
}

async fn handle_unlock_connector(ctx: &HandlerContext, payload: Value) -> (HandlerResult, SideEffect) {
    let req: UnlockConnectorRequest = match serde_json::from_value(payload) {
        Ok(r) => r,
        Err(e) => return (Err(bad_payload("UnlockConnector", e)), SideEffect::None),
    };
    let station = ctx.station.lock().await;
    let status = if station.connector(req.connector_id).is_some() {
        UnlockStatus::Unlocked
    } else {
        UnlockStatus::NotSupported
    };
    (
        Ok(serde_json::to_value(UnlockConnectorResponse { status }).unwrap()),
        SideEffect::None,
    )
}
