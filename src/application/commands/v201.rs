//! OCPP 2.0.1 outgoing command builders (§4.9).

use chrono::Utc;
use rust_decimal::Decimal;
use rust_ocpp::v2_0_1::datatypes::charging_station_type::ChargingStationType;
use rust_ocpp::v2_0_1::datatypes::evse_type::EVSEType;
use rust_ocpp::v2_0_1::datatypes::id_token_type::IdTokenType;
use rust_ocpp::v2_0_1::datatypes::meter_value_type::MeterValueType;
use rust_ocpp::v2_0_1::datatypes::sampled_value_type::SampledValueType;
use rust_ocpp::v2_0_1::datatypes::transaction_type::TransactionType;
use rust_ocpp::v2_0_1::enumerations::boot_reason_enum_type::BootReasonEnumType;
use rust_ocpp::v2_0_1::enumerations::connector_status_enum_type::ConnectorStatusEnumType;
use rust_ocpp::v2_0_1::enumerations::id_token_enum_type::IdTokenEnumType;
use rust_ocpp::v2_0_1::enumerations::measurand_enum_type::MeasurandEnumType;
use rust_ocpp::v2_0_1::enumerations::reason_enum_type::ReasonEnumType;
use rust_ocpp::v2_0_1::enumerations::transaction_event_enum_type::TransactionEventEnumType;
use rust_ocpp::v2_0_1::enumerations::trigger_reason_enum_type::TriggerReasonEnumType;
use rust_ocpp::v2_0_1::messages::authorize::AuthorizeRequest;
use rust_ocpp::v2_0_1::messages::boot_notification::BootNotificationRequest;
use rust_ocpp::v2_0_1::messages::heartbeat::HeartbeatRequest;
use rust_ocpp::v2_0_1::messages::meter_values::MeterValuesRequest;
use rust_ocpp::v2_0_1::messages::status_notification::StatusNotificationRequest;
use rust_ocpp::v2_0_1::messages::transaction_event::TransactionEventRequest;

use crate::domain::connector::{Connector, ConnectorStatus};
use crate::domain::ocpp::{Identifier, IdentifierType};
use crate::domain::station::Station;
use crate::domain::transaction::{StopReason, Transaction, TransactionId};

fn to_wire_reason(reason: StopReason) -> ReasonEnumType {
    match reason {
        StopReason::DeAuthorized => ReasonEnumType::DeAuthorized,
        StopReason::EmergencyStop => ReasonEnumType::EmergencyStop,
        StopReason::EnergyLimitReached => ReasonEnumType::EnergyLimitReached,
        StopReason::EVDisconnected => ReasonEnumType::EVDisconnected,
        StopReason::GroundFault => ReasonEnumType::GroundFault,
        StopReason::ImmediateReset => ReasonEnumType::ImmediateReset,
        StopReason::Local => ReasonEnumType::Local,
        StopReason::LocalOutOfCredit => ReasonEnumType::LocalOutOfCredit,
        StopReason::MasterPass => ReasonEnumType::MasterPass,
        StopReason::Other => ReasonEnumType::Other,
        StopReason::OvercurrentFault => ReasonEnumType::OvercurrentFault,
        StopReason::PowerLoss => ReasonEnumType::PowerLoss,
        StopReason::PowerQuality => ReasonEnumType::PowerQuality,
        StopReason::Reboot => ReasonEnumType::Reboot,
        StopReason::Remote => ReasonEnumType::Remote,
        StopReason::SOCLimitReached => ReasonEnumType::SOCLimitReached,
        StopReason::StoppedByEV => ReasonEnumType::StoppedByEV,
        StopReason::TimeLimitReached => ReasonEnumType::TimeLimitReached,
        StopReason::Timeout => ReasonEnumType::Timeout,
        StopReason::UnlockCommand => ReasonEnumType::UnlockCommand,
    }
}

pub const ACTION_BOOT_NOTIFICATION: &str = "BootNotification";
pub const ACTION_HEARTBEAT: &str = "Heartbeat";
pub const ACTION_STATUS_NOTIFICATION: &str = "StatusNotification";
pub const ACTION_METER_VALUES: &str = "MeterValues";
pub const ACTION_TRANSACTION_EVENT: &str = "TransactionEvent";
pub const ACTION_AUTHORIZE: &str = "Authorize";

pub fn authorize_request(identifier: &Identifier) -> AuthorizeRequest {
    AuthorizeRequest {
        id_token: to_id_token(identifier),
        certificate: None,
        iso15118_certificate_hash_data: None,
    }
}

pub fn boot_notification_request(station: &Station, reason: BootReasonEnumType) -> BootNotificationRequest {
    BootNotificationRequest {
        reason,
        charging_station: ChargingStationType {
            serial_number: station.serial_number.clone(),
            model: station.model.clone(),
            vendor_name: station.vendor.clone(),
            firmware_version: Some(station.firmware_version.clone()),
            modem: None,
        },
    }
}

pub fn heartbeat_request() -> HeartbeatRequest {
    HeartbeatRequest {}
}

pub fn status_notification_request(
    station_connector_id: u32,
    evse_id: u32,
    status: ConnectorStatus,
) -> StatusNotificationRequest {
    StatusNotificationRequest {
        timestamp: Utc::now(),
        connector_status: to_wire_status(status),
        evse_id: evse_id as i32,
        connector_id: station_connector_id as i32,
    }
}

fn to_wire_status(status: ConnectorStatus) -> ConnectorStatusEnumType {
    match status {
        ConnectorStatus::Available => ConnectorStatusEnumType::Available,
        ConnectorStatus::Preparing => ConnectorStatusEnumType::Occupied,
        ConnectorStatus::Charging => ConnectorStatusEnumType::Occupied,
        ConnectorStatus::SuspendedEV => ConnectorStatusEnumType::Occupied,
        ConnectorStatus::SuspendedEVSE => ConnectorStatusEnumType::Occupied,
        ConnectorStatus::Finishing => ConnectorStatusEnumType::Occupied,
        ConnectorStatus::Reserved => ConnectorStatusEnumType::Reserved,
        ConnectorStatus::Unavailable => ConnectorStatusEnumType::Unavailable,
        ConnectorStatus::Faulted => ConnectorStatusEnumType::Faulted,
    }
}

pub fn meter_values_request(evse_id: u32, energy_register_wh: Decimal) -> MeterValuesRequest {
    MeterValuesRequest {
        evse_id: evse_id as i32,
        meter_value: vec![MeterValueType {
            timestamp: Utc::now(),
            sampled_value: vec![SampledValueType {
                value: energy_register_wh,
                context: None,
                measurand: Some(MeasurandEnumType::EnergyActiveImportRegister),
                phase: None,
                location: None,
                signed_meter_value: None,
                unit_of_measure: None,
            }],
        }],
    }
}

fn to_id_token(identifier: &Identifier) -> IdTokenType {
    IdTokenType {
        id_token: identifier.value.clone(),
        kind: match identifier.id_type {
            IdentifierType::Central => IdTokenEnumType::Central,
            IdentifierType::EMaid => IdTokenEnumType::EMAID,
            IdentifierType::Iso14443 => IdTokenEnumType::ISO14443,
            IdentifierType::Iso15693 => IdTokenEnumType::ISO15693,
            IdentifierType::KeyCode => IdTokenEnumType::KeyCode,
            IdentifierType::MacAddress => IdTokenEnumType::MacAddress,
            IdentifierType::NoAuthorization => IdTokenEnumType::NoAuthorization,
            _ => IdTokenEnumType::Central,
        },
        additional_info: None,
    }
}

pub fn transaction_event_started(
    tx: &Transaction,
    evse_id: u32,
    identifier: &Identifier,
    seq_no: i32,
    trigger_reason: TriggerReasonEnumType,
) -> TransactionEventRequest {
    let TransactionId::V201(ref tx_id) = tx.id else {
        panic!("transaction_event_started called with a non-v201 transaction id");
    };
    TransactionEventRequest {
        event_type: TransactionEventEnumType::Started,
        timestamp: tx.started_at,
        trigger_reason,
        seq_no,
        offline: None,
        number_of_phases_used: None,
        cable_max_current: None,
        reservation_id: None,
        transaction_info: TransactionType {
            transaction_id: tx_id.clone(),
            charging_state: None,
            time_spent_charging: None,
            stopped_reason: None,
            remote_start_id: None,
        },
        evse: Some(EVSEType {
            id: evse_id as i32,
            connector_id: Some(tx.connector_id as i32),
        }),
        meter_value: None,
        id_token: Some(to_id_token(identifier)),
    }
}

pub fn transaction_event_updated(
    tx: &Transaction,
    evse_id: u32,
    seq_no: i32,
    trigger_reason: TriggerReasonEnumType,
) -> TransactionEventRequest {
    let TransactionId::V201(ref tx_id) = tx.id else {
        panic!("transaction_event_updated called with a non-v201 transaction id");
    };
    TransactionEventRequest {
        event_type: TransactionEventEnumType::Updated,
        timestamp: Utc::now(),
        trigger_reason,
        seq_no,
        offline: None,
        number_of_phases_used: None,
        cable_max_current: None,
        reservation_id: None,
        transaction_info: TransactionType {
            transaction_id: tx_id.clone(),
            charging_state: None,
            time_spent_charging: None,
            stopped_reason: None,
            remote_start_id: None,
        },
        evse: Some(EVSEType {
            id: evse_id as i32,
            connector_id: Some(tx.connector_id as i32),
        }),
        meter_value: Some(vec![MeterValueType {
            timestamp: Utc::now(),
            sampled_value: vec![SampledValueType {
                value: tx.meter_latest_wh,
                context: None,
                measurand: Some(MeasurandEnumType::EnergyActiveImportRegister),
                phase: None,
                location: None,
                signed_meter_value: None,
                unit_of_measure: None,
            }],
        }]),
        id_token: None,
    }
}

pub fn transaction_event_ended(
    tx: &Transaction,
    evse_id: u32,
    seq_no: i32,
    trigger_reason: TriggerReasonEnumType,
) -> TransactionEventRequest {
    let TransactionId::V201(ref tx_id) = tx.id else {
        panic!("transaction_event_ended called with a non-v201 transaction id");
    };
    TransactionEventRequest {
        event_type: TransactionEventEnumType::Ended,
        timestamp: tx.stopped_at.unwrap_or_else(Utc::now),
        trigger_reason,
        seq_no,
        offline: None,
        number_of_phases_used: None,
        cable_max_current: None,
        reservation_id: None,
        transaction_info: TransactionType {
            transaction_id: tx_id.clone(),
            charging_state: None,
            time_spent_charging: None,
            stopped_reason: tx.stopped_reason.map(to_wire_reason),
            remote_start_id: None,
        },
        evse: Some(EVSEType {
            id: evse_id as i32,
            connector_id: Some(tx.connector_id as i32),
        }),
        meter_value: None,
        id_token: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn started_event_carries_the_v201_transaction_id() {
        let tx = Transaction::new_v201(1, "TAG1", Decimal::from(0));
        let identifier = Identifier::from_id_token(IdentifierType::Central, "TAG1");
        let req = transaction_event_started(&tx, 1, &identifier, 0, TriggerReasonEnumType::Authorized);
        assert_eq!(req.transaction_info.transaction_id, tx.id.to_string());
        assert!(matches!(req.event_type, TransactionEventEnumType::Started));
    }

    #[test]
    fn ended_event_carries_the_stop_reason() {
        let mut tx = Transaction::new_v201(1, "TAG1", Decimal::from(0));
        tx.stopped_reason = Some(StopReason::Local);
        let req = transaction_event_ended(&tx, 1, 3, TriggerReasonEnumType::StopAuthorized);
        assert!(matches!(req.transaction_info.stopped_reason, Some(ReasonEnumType::Local)));
    }
}
