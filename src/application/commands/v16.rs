//! OCPP 1.6 outgoing command builders (§4.9).

use chrono::Utc;
use rust_ocpp::v1_6::messages::authorize::AuthorizeRequest;
use rust_ocpp::v1_6::messages::boot_notification::BootNotificationRequest;
use rust_ocpp::v1_6::messages::heart_beat::HeartbeatRequest;
use rust_ocpp::v1_6::messages::meter_values::{MeterValuesRequest, MeterValuesRequestMeterValue};
use rust_ocpp::v1_6::messages::start_transaction::StartTransactionRequest;
use rust_ocpp::v1_6::messages::status_notification::StatusNotificationRequest;
use rust_ocpp::v1_6::messages::stop_transaction::StopTransactionRequest;
use rust_ocpp::v1_6::types::{
    ChargePointErrorCode, ChargePointStatus, Measurand, MeterValuesSampledValue, Reason,
    UnitOfMeasure,
};

use crate::domain::connector::{Connector, ConnectorStatus};
use crate::domain::station::Station;
use crate::domain::transaction::{StopReason, Transaction, TransactionId};

pub const ACTION_BOOT_NOTIFICATION: &str = "BootNotification";
pub const ACTION_HEARTBEAT: &str = "Heartbeat";
pub const ACTION_STATUS_NOTIFICATION: &str = "StatusNotification";
pub const ACTION_METER_VALUES: &str = "MeterValues";
pub const ACTION_START_TRANSACTION: &str = "StartTransaction";
pub const ACTION_STOP_TRANSACTION: &str = "StopTransaction";
pub const ACTION_AUTHORIZE: &str = "Authorize";

pub fn authorize_request(id_tag: &str) -> AuthorizeRequest {
    AuthorizeRequest {
        id_tag: id_tag.to_string(),
    }
}

pub fn boot_notification_request(station: &Station) -> BootNotificationRequest {
    BootNotificationRequest {
        charge_point_vendor: station.vendor.clone(),
        charge_point_model: station.model.clone(),
        charge_point_serial_number: station.serial_number.clone(),
        charge_box_serial_number: None,
        firmware_version: Some(station.firmware_version.clone()),
        iccid: None,
        imsi: None,
        meter_type: None,
        meter_serial_number: None,
    }
}

pub fn heartbeat_request() -> HeartbeatRequest {
    HeartbeatRequest {}
}

pub fn status_notification_request(
    connector: &Connector,
    fault: Option<&str>,
) -> StatusNotificationRequest {
    StatusNotificationRequest {
        connector_id: connector.id as i32,
        error_code: if fault.is_some() {
            ChargePointErrorCode::OtherError
        } else {
            ChargePointErrorCode::NoError
        },
        info: fault.map(|s| s.to_string()),
        status: to_wire_status(connector.status),
        timestamp: Some(Utc::now()),
        vendor_id: None,
        vendor_error_code: None,
    }
}

fn to_wire_status(status: ConnectorStatus) -> ChargePointStatus {
    match status {
        ConnectorStatus::Available => ChargePointStatus::Available,
        ConnectorStatus::Preparing => ChargePointStatus::Preparing,
        ConnectorStatus::Charging => ChargePointStatus::Charging,
        ConnectorStatus::SuspendedEV => ChargePointStatus::SuspendedEV,
        ConnectorStatus::SuspendedEVSE => ChargePointStatus::SuspendedEVSE,
        ConnectorStatus::Finishing => ChargePointStatus::Finishing,
        ConnectorStatus::Reserved => ChargePointStatus::Reserved,
        ConnectorStatus::Unavailable => ChargePointStatus::Unavailable,
        ConnectorStatus::Faulted => ChargePointStatus::Faulted,
    }
}

/// Build a MeterValues payload carrying a single sample for the connector's
/// cumulative energy register, in line with the simulator's fixed-function
/// electrical model (no physics, just a clamped ramp — see the ATG module).
pub fn meter_values_request(
    connector: &Connector,
    energy_register_wh: rust_decimal::Decimal,
    transaction_id: Option<i32>,
) -> MeterValuesRequest {
    MeterValuesRequest {
        connector_id: connector.id as i32,
        transaction_id,
        meter_value: vec![MeterValuesRequestMeterValue {
            timestamp: Utc::now(),
            sampled_value: vec![MeterValuesSampledValue {
                value: energy_register_wh.to_string(),
                context: None,
                format: None,
                measurand: Some(Measurand::EnergyActiveImportRegister),
                phase: None,
                location: None,
                unit: Some(UnitOfMeasure::Wh),
            }],
        }],
    }
}

pub fn start_transaction_request(connector_id: u32, id_tag: &str, meter_start_wh: i32) -> StartTransactionRequest {
    StartTransactionRequest {
        connector_id: connector_id as i32,
        id_tag: id_tag.to_string(),
        meter_start: meter_start_wh,
        timestamp: Utc::now(),
        reservation_id: None,
    }
}

pub fn stop_transaction_request(tx: &Transaction, reason: StopReason) -> StopTransactionRequest {
    let TransactionId::Local(local_id) = tx.id else {
        panic!("stop_transaction_request called with a non-local transaction id");
    };
    StopTransactionRequest {
        meter_stop: tx.meter_latest_wh.round().to_string().parse().unwrap_or(0),
        timestamp: Utc::now(),
        transaction_id: local_id as i32,
        reason: Some(to_wire_reason(reason)),
        id_tag: Some(tx.id_tag.clone()),
        transaction_data: None,
    }
}

/// 1.6's `Reason` enum is a strict subset of the full taxonomy; anything
/// outside it (e.g. `SOCLimitReached`, a 2.0.1-only reason) collapses to `Other`.
fn to_wire_reason(reason: StopReason) -> Reason {
    match reason {
        StopReason::DeAuthorized => Reason::DeAuthorized,
        StopReason::EmergencyStop => Reason::EmergencyStop,
        StopReason::EVDisconnected => Reason::EVDisconnected,
        StopReason::ImmediateReset => Reason::HardReset,
        StopReason::Reboot => Reason::SoftReset,
        StopReason::Local => Reason::Local,
        StopReason::PowerLoss => Reason::PowerLoss,
        StopReason::Remote => Reason::Remote,
        StopReason::UnlockCommand => Reason::UnlockCommand,
        _ => Reason::Other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ocpp::OcppVersion;
    use crate::domain::station::{SupervisionUrlDistribution, SupervisionUrls};

    fn sample_station() -> Station {
        Station::new(
            "CS-00001",
            "CS-1",
            OcppVersion::V16,
            "Acme",
            "FastCharge",
            "1.0.0",
            SupervisionUrls::new(vec!["wss://csms.example".into()], SupervisionUrlDistribution::RoundRobin),
            1,
        )
    }

    #[test]
    fn boot_notification_carries_station_identity() {
        let station = sample_station();
        let req = boot_notification_request(&station);
        assert_eq!(req.charge_point_vendor, station.vendor);
    }

    #[test]
    fn status_notification_maps_connector_status() {
        let connector = Connector::new(1);
        let req = status_notification_request(&connector, None);
        assert_eq!(req.connector_id, 1);
        assert!(matches!(req.status, ChargePointStatus::Available));
    }

    #[test]
    fn stop_reason_outside_v16_taxonomy_collapses_to_other() {
        let tx = Transaction::new_local(1, 1, "TAG1", 0);
        let req = stop_transaction_request(&tx, StopReason::SOCLimitReached);
        assert!(matches!(req.reason, Some(Reason::Other)));
    }
}
