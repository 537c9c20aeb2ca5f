//! Incoming OCPP 2.0.1 command handlers (C8).

use rust_ocpp::v2_0_1::datatypes::get_variable_result_type::GetVariableResultType;
use rust_ocpp::v2_0_1::datatypes::set_variable_result_type::SetVariableResultType;
use rust_ocpp::v2_0_1::enumerations::change_availability_status_enum_type::ChangeAvailabilityStatusEnumType;
use rust_ocpp::v2_0_1::enumerations::clear_cache_status_enum_type::ClearCacheStatusEnumType;
use rust_ocpp::v2_0_1::enumerations::generic_device_model_status_enum_type::GenericDeviceModelStatusEnumType;
use rust_ocpp::v2_0_1::enumerations::get_variable_status_enum_type::GetVariableStatusEnumType;
use rust_ocpp::v2_0_1::enumerations::operational_status_enum_type::OperationalStatusEnumType;
use rust_ocpp::v2_0_1::enumerations::report_base_enum_type::ReportBaseEnumType;
use rust_ocpp::v2_0_1::enumerations::request_start_stop_status_enum_type::RequestStartStopStatusEnumType;
use rust_ocpp::v2_0_1::enumerations::reset_enum_type::ResetEnumType;
use rust_ocpp::v2_0_1::enumerations::reset_status_enum_type::ResetStatusEnumType;
use rust_ocpp::v2_0_1::enumerations::set_variable_status_enum_type::SetVariableStatusEnumType;
use rust_ocpp::v2_0_1::messages::change_availability::{
    ChangeAvailabilityRequest, ChangeAvailabilityResponse,
};
use rust_ocpp::v2_0_1::messages::clear_cache::ClearCacheResponse;
use rust_ocpp::v2_0_1::messages::get_base_report::{GetBaseReportRequest, GetBaseReportResponse};
use rust_ocpp::v2_0_1::messages::get_variables::{GetVariablesRequest, GetVariablesResponse};
use rust_ocpp::v2_0_1::messages::request_start_transaction::{
    RequestStartTransactionRequest, RequestStartTransactionResponse,
};
use rust_ocpp::v2_0_1::messages::request_stop_transaction::{
    RequestStopTransactionRequest, RequestStopTransactionResponse,
};
use rust_ocpp::v2_0_1::messages::reset::{ResetRequest, ResetResponse};
use rust_ocpp::v2_0_1::messages::set_variables::{SetVariablesRequest, SetVariablesResponse};
use serde_json::{json, Value};

use crate::domain::certificate::CertificateUse;
use crate::domain::connector::{AvailabilityChangeOutcome, Availability as DomainAvailability};
use crate::domain::transaction::{StopReason, Transaction, TransactionId};

use super::dispatcher::{not_implemented, CallErrorInfo, HandlerContext, HandlerResult, SideEffect};

/// Variables reported per `reportBase=ConfigurationInventory`, paginated at
/// this many entries per `NotifyReport` part (§4.8).
const REPORT_PAGE_SIZE: usize = 25;

pub async fn handle(ctx: &HandlerContext, action: &str, payload: Value) -> (HandlerResult, SideEffect) {
    match action {
        "Reset" => handle_reset(ctx, payload).await,
        "ChangeAvailability" => handle_change_availability(ctx, payload).await,
        "GetVariables" => handle_get_variables(ctx, payload).await,
        "SetVariables" => handle_set_variables(ctx, payload).await,
        "GetBaseReport" => handle_get_base_report(ctx, payload).await,
        "RequestStartTransaction" => handle_request_start(ctx, payload).await,
        "RequestStopTransaction" => handle_request_stop(ctx, payload).await,
        "ClearCache" => handle_clear_cache(ctx, payload).await,
        "InstallCertificate" => handle_install_certificate(ctx, payload).await,
        "DeleteCertificate" => handle_delete_certificate(ctx, payload).await,
        "GetInstalledCertificateIds" => handle_get_installed_certificate_ids(ctx, payload).await,
        "Get15118EVCertificate" => handle_15118_passthrough(ctx, payload).await,
        "GetCertificateStatus" => handle_certificate_status_passthrough(ctx, payload).await,
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
    let has_active = match req.evse_id {
        Some(evse) => station
            .connector(evse as u32)
            .map(|c| c.has_active_transaction())
            .unwrap_or(false),
        None => station.has_any_active_transaction(),
    };
    drop(station);

    match (req.request_type, has_active) {
        (ResetEnumType::Immediate, _) => (
            Ok(serde_json::to_value(ResetResponse {
                status: ResetStatusEnumType::Accepted,
            })
            .unwrap()),
            SideEffect::DisconnectImmediately,
        ),
        (ResetEnumType::OnIdle, true) => (
            Ok(serde_json::to_value(ResetResponse {
                status: ResetStatusEnumType::Scheduled,
            })
            .unwrap()),
            SideEffect::DisconnectOnIdle,
        ),
        (ResetEnumType::OnIdle, false) => (
            Ok(serde_json::to_value(ResetResponse {
                status: ResetStatusEnumType::Accepted,
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
    let target = match req.operational_status {
        OperationalStatusEnumType::Operative => DomainAvailability::Operative,
        OperationalStatusEnumType::Inoperative => DomainAvailability::Inoperative,
    };

    let mut station = ctx.station.lock().await;
    let evse_id = req.evse.as_ref().map(|e| e.id as u32).unwrap_or(0);
    let connector_ids: Vec<u32> = if evse_id == 0 {
        station.real_connector_ids()
    } else {
        vec![evse_id]
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
        ChangeAvailabilityStatusEnumType::Rejected
    } else if any_scheduled {
        ChangeAvailabilityStatusEnumType::Scheduled
    } else {
        ChangeAvailabilityStatusEnumType::Accepted
    };
    (
        Ok(serde_json::to_value(ChangeAvailabilityResponse { status }).unwrap()),
        SideEffect::None,
    )
}

async fn handle_get_variables(ctx: &HandlerContext, payload: Value) -> (HandlerResult, SideEffect) {
    let req: GetVariablesRequest = match serde_json::from_value(payload) {
        Ok(r) => r,
        Err(e) => return (Err(bad_payload("GetVariables", e)), SideEffect::None),
    };
    let config = ctx.config.lock().await;

    let get_variable_result = req
        .get_variable_data
        .into_iter()
        .map(|item| {
            let key = format!("{}.{}", item.component.name, item.variable.name);
            match config.get(&item.component.name, false).or_else(|| config.get(&item.variable.name, false)).or_else(|| config.get(&key, false)) {
                Some(entry) => GetVariableResultType {
                    attribute_status: GetVariableStatusEnumType::Accepted,
                    attribute_type: item.attribute_type,
                    attribute_value: Some(entry.value.clone()),
                    component: item.component,
                    variable: item.variable,
                },
                None => GetVariableResultType {
                    attribute_status: GetVariableStatusEnumType::UnknownVariable,
                    attribute_type: item.attribute_type,
                    attribute_value: None,
                    component: item.component,
                    variable: item.variable,
                },
            }
        })
        .collect();

    (
        Ok(serde_json::to_value(GetVariablesResponse {
            get_variable_result,
        })
        .unwrap()),
        SideEffect::None,
    )
}

async fn handle_set_variables(ctx: &HandlerContext, payload: Value) -> (HandlerResult, SideEffect) {
    let req: SetVariablesRequest = match serde_json::from_value(payload) {
        Ok(r) => r,
        Err(e) => return (Err(bad_payload("SetVariables", e)), SideEffect::None),
    };
    let mut config = ctx.config.lock().await;
    let mut reboot_required = false;

    let set_variable_result = req
        .set_variable_data
        .into_iter()
        .map(|item| {
            let key = item.variable.name.clone();
            let wants_reboot = config.get(&key, false).map(|k| k.reboot_required).unwrap_or(false);
            let status = match config.set(&key, &item.attribute_value) {
                Ok(()) if wants_reboot => {
                    reboot_required = true;
                    SetVariableStatusEnumType::RebootRequired
                }
                Ok(()) => SetVariableStatusEnumType::Accepted,
                Err(crate::domain::error::DomainError::ReadOnly(_)) => SetVariableStatusEnumType::Rejected,
                Err(crate::domain::error::DomainError::UnknownKey(_)) => {
                    SetVariableStatusEnumType::UnknownVariable
                }
                Err(_) => SetVariableStatusEnumType::Rejected,
            };
            SetVariableResultType {
                attribute_status: status,
                attribute_type: item.attribute_type,
                component: item.component,
                variable: item.variable,
            }
        })
        .collect();
    drop(config);

    let effect = if reboot_required {
        SideEffect::RebootRequired
    } else {
        SideEffect::None
    };
    (
        Ok(serde_json::to_value(SetVariablesResponse {
            set_variable_result,
        })
        .unwrap()),
        effect,
    )
}

async fn handle_get_base_report(ctx: &HandlerContext, payload: Value) -> (HandlerResult, SideEffect) {
    let req: GetBaseReportRequest = match serde_json::from_value(payload) {
        Ok(r) => r,
        Err(e) => return (Err(bad_payload("GetBaseReport", e)), SideEffect::None),
    };

    if !matches!(
        req.report_base,
        ReportBaseEnumType::ConfigurationInventory
            | ReportBaseEnumType::FullInventory
            | ReportBaseEnumType::SummaryInventory
    ) {
        return (
            Ok(serde_json::to_value(GetBaseReportResponse {
                status: GenericDeviceModelStatusEnumType::NotSupported,
            })
            .unwrap()),
            SideEffect::None,
        );
    }

    let mut report_data: Vec<Value> = Vec::new();

    // `SummaryInventory`/`FullInventory` always include the station's own
    // identity rows — they exist independent of whatever's in the
    // configuration store, so an empty configuration must not report
    // `EmptyResultSet` for these two report types.
    if matches!(req.report_base, ReportBaseEnumType::SummaryInventory | ReportBaseEnumType::FullInventory) {
        let station = ctx.station.lock().await;
        report_data.push(json!({
            "component": { "name": "ChargingStation" },
            "variable": { "name": "Model" },
            "variableAttribute": [{ "value": station.model }],
        }));
        report_data.push(json!({
            "component": { "name": "ChargingStation" },
            "variable": { "name": "VendorName" },
            "variableAttribute": [{ "value": station.vendor }],
        }));
    }

    if matches!(req.report_base, ReportBaseEnumType::ConfigurationInventory | ReportBaseEnumType::FullInventory) {
        let config = ctx.config.lock().await;
        let snapshot = config.snapshot();
        drop(config);
        report_data.extend(snapshot.into_iter().map(|key| {
            json!({
                "component": { "name": "ChargingStation" },
                "variable": { "name": key.key },
                "variableAttribute": [{
                    "value": key.value,
                    "mutability": if key.readonly { "ReadOnly" } else { "ReadWrite" },
                }],
            })
        }));
    }

    if report_data.is_empty() {
        return (
            Ok(serde_json::to_value(GetBaseReportResponse {
                status: GenericDeviceModelStatusEnumType::EmptyResultSet,
            })
            .unwrap()),
            SideEffect::None,
        );
    }

    // One entry per `NotifyReport` page, holding just that page's row array —
    // `requestId`/`seqNo`/`tbc` are added once, at the single place that
    // actually emits each `NotifyReportRequest` (see `apply_side_effect`).
    let pages: Vec<Value> = report_data.chunks(REPORT_PAGE_SIZE).map(|chunk| json!(chunk)).collect();

    (
        Ok(serde_json::to_value(GetBaseReportResponse {
            status: GenericDeviceModelStatusEnumType::Accepted,
        })
        .unwrap()),
        SideEffect::EmitNotifyReport {
            request_id: req.request_id,
            pages,
        },
    )
}

async fn handle_request_start(ctx: &HandlerContext, payload: Value) -> (HandlerResult, SideEffect) {
    let req: RequestStartTransactionRequest = match serde_json::from_value(payload) {
        Ok(r) => r,
        Err(e) => return (Err(bad_payload("RequestStartTransaction", e)), SideEffect::None),
    };
    let Some(evse_id) = req.evse_id else {
        return (
            Ok(serde_json::to_value(RequestStartTransactionResponse {
                status: RequestStartStopStatusEnumType::Rejected,
                transaction_id: None,
            })
            .unwrap()),
            SideEffect::None,
        );
    };

    let mut station = ctx.station.lock().await;
    let accepted = match station.connector_mut(evse_id as u32) {
        Some(connector) if !connector.has_active_transaction() => connector.begin_preparing().is_ok(),
        _ => false,
    };

    if !accepted {
        return (
            Ok(serde_json::to_value(RequestStartTransactionResponse {
                status: RequestStartStopStatusEnumType::Rejected,
                transaction_id: None,
            })
            .unwrap()),
            SideEffect::None,
        );
    }

    let tx = Transaction::new_v201(evse_id as u32, &req.id_token.id_token, rust_decimal::Decimal::ZERO);
    let tx_id = tx.id.to_string();
    let connector = station.connector_mut(evse_id as u32).unwrap();
    let _ = connector.start_transaction(tx);

    (
        Ok(serde_json::to_value(RequestStartTransactionResponse {
            status: RequestStartStopStatusEnumType::Accepted,
            transaction_id: Some(tx_id),
        })
        .unwrap()),
        SideEffect::EmitTransactionEventStarted {
            connector_id: evse_id as u32,
        },
    )
}

async fn handle_request_stop(ctx: &HandlerContext, payload: Value) -> (HandlerResult, SideEffect) {
    let req: RequestStopTransactionRequest = match serde_json::from_value(payload) {
        Ok(r) => r,
        Err(e) => return (Err(bad_payload("RequestStopTransaction", e)), SideEffect::None),
    };

    let mut station = ctx.station.lock().await;
    let target = station.real_connector_ids().into_iter().find(|id| {
        station
            .connector(*id)
            .and_then(|c| c.transaction.as_ref())
            .map(|tx| tx.id == TransactionId::V201(req.transaction_id.clone()))
            .unwrap_or(false)
    });

    match target {
        Some(connector_id) => {
            let connector = station.connector_mut(connector_id).unwrap();
            let _ = connector.stop_transaction(StopReason::Remote);
            (
                Ok(serde_json::to_value(RequestStopTransactionResponse {
                    status: RequestStartStopStatusEnumType::Accepted,
                })
                .unwrap()),
                SideEffect::EmitTransactionEventEnded {
                    connector_id,
                    reason: StopReason::Remote,
                },
            )
        }
        None => (
            Ok(serde_json::to_value(RequestStopTransactionResponse {
                status: RequestStartStopStatusEnumType::Rejected,
            })
            .unwrap()),
            SideEffect::None,
        ),
    }
}

async fn handle_clear_cache(ctx: &HandlerContext, _payload: Value) -> (HandlerResult, SideEffect) {
    ctx.auth_cache.clear();
    (
        Ok(serde_json::to_value(ClearCacheResponse {
            status: ClearCacheStatusEnumType::Accepted,
        })
        .unwrap()),
        SideEffect::None,
    )
}

async fn handle_install_certificate(ctx: &HandlerContext, payload: Value) -> (HandlerResult, SideEffect) {
    let Some(cert_use) = payload
        .get("certificateType")
        .and_then(Value::as_str)
        .and_then(CertificateUse::from_str)
    else {
        return (
            Ok(json!({"status": "Rejected"})),
            SideEffect::None,
        );
    };
    let Some(pem) = payload.get("certificate").and_then(Value::as_str) else {
        return (Ok(json!({"status": "Rejected"})), SideEffect::None);
    };

    let status = match ctx.certificates.store(&ctx.station_hash_id, cert_use, pem).await {
        Ok(_) => "Accepted",
        Err(_) => "Failed",
    };
    (Ok(json!({ "status": status })), SideEffect::None)
}

async fn handle_delete_certificate(ctx: &HandlerContext, payload: Value) -> (HandlerResult, SideEffect) {
    let Some(hash_data) = payload.get("certificateHashData") else {
        return (Ok(json!({"status": "NotFound"})), SideEffect::None);
    };
    let get_str = |k: &str| hash_data.get(k).and_then(Value::as_str).unwrap_or("").to_string();
    let hash_algorithm = get_str("hashAlgorithm");
    let issuer_name_hash = get_str("issuerNameHash");
    let issuer_key_hash = get_str("issuerKeyHash");
    let serial_number = get_str("serialNumber");

    let mut outcome = crate::domain::certificate::DeleteOutcome::NotFound;
    for cert_use in [
        CertificateUse::CsmsRootCertificate,
        CertificateUse::V2GRootCertificate,
        CertificateUse::ManufacturerRootCertificate,
        CertificateUse::MORootCertificate,
    ] {
        let result = ctx
            .certificates
            .delete(
                &ctx.station_hash_id,
                cert_use,
                &hash_algorithm,
                &serial_number,
                &issuer_name_hash,
                &issuer_key_hash,
            )
            .await;
        if !matches!(result, crate::domain::certificate::DeleteOutcome::NotFound) {
            outcome = result;
            break;
        }
    }

    let status = match outcome {
        crate::domain::certificate::DeleteOutcome::Accepted => "Accepted",
        crate::domain::certificate::DeleteOutcome::NotFound => "NotFound",
        crate::domain::certificate::DeleteOutcome::Failed => "Failed",
    };
    (Ok(json!({ "status": status })), SideEffect::None)
}

async fn handle_get_installed_certificate_ids(
    ctx: &HandlerContext,
    payload: Value,
) -> (HandlerResult, SideEffect) {
    let filter: Option<Vec<CertificateUse>> = payload
        .get("certificateType")
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(Value::as_str)
                .filter_map(CertificateUse::from_str)
                .collect()
        });

    let entries = match ctx
        .certificates
        .list(&ctx.station_hash_id, filter.as_deref())
        .await
    {
        Ok(entries) => entries,
        Err(_) => {
            return (
                Ok(json!({"status": "NotFound", "certificateHashData": []})),
                SideEffect::None,
            )
        }
    };

    if entries.is_empty() {
        return (
            Ok(json!({"status": "NotFound"})),
            SideEffect::None,
        );
    }

    let certificate_hash_data: Vec<Value> = entries
        .into_iter()
        .map(|e| {
            json!({
                "hashAlgorithm": e.hash_algorithm,
                "issuerNameHash": e.issuer_name_hash,
                "issuerKeyHash": e.issuer_key_hash,
                "serialNumber": e.serial_number,
            })
        })
        .collect();

    (
        Ok(json!({
            "status": "Accepted",
            "certificateHashData": certificate_hash_data,
        })),
        SideEffect::None,
    )
}

/// No external OCSP/PKI carrier is configured in this simulator; stub a
/// generic "accepted, no data" pass-through per §4.8.
async fn handle_15118_passthrough(_ctx: &HandlerContext, _payload: Value) -> (HandlerResult, SideEffect) {
    (Ok(json!({"status": "Accepted", "exiResponse": ""})), SideEffect::None)
}

async fn handle_certificate_status_passthrough(
    _ctx: &HandlerContext,
    _payload: Value,
) -> (HandlerResult, SideEffect) {
    (Ok(json!({"status": "Accepted", "ocspResult": ""})), SideEffect::None)
}
