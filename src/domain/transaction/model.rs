//! Transaction model (§3, §4.9).
//!
//! OCPP 1.6 identifies a transaction by a small integer assigned by the
//! station itself; 2.0.1 identifies it by a string id (the simulator uses a
//! UUID, capped at 36 chars as the schema requires) assigned by
//! `TransactionEventRequest(eventType=Started)`.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::support::ids::new_transaction_id_v201;

/// A transaction id in either wire shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionId {
    Local(i64),
    V201(String),
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local(id) => write!(f, "{id}"),
            Self::V201(id) => write!(f, "{id}"),
        }
    }
}

/// Full stop-reason taxonomy shared by both protocol versions (2.0.1 names
/// are the superset; 1.6's `Reason` enum maps onto a subset of these).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    DeAuthorized,
    EmergencyStop,
    EnergyLimitReached,
    EVDisconnected,
    GroundFault,
    ImmediateReset,
    Local,
    LocalOutOfCredit,
    MasterPass,
    Other,
    OvercurrentFault,
    PowerLoss,
    PowerQuality,
    Reboot,
    Remote,
    SOCLimitReached,
    StoppedByEV,
    TimeLimitReached,
    Timeout,
    UnlockCommand,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DeAuthorized => "DeAuthorized",
            Self::EmergencyStop => "EmergencyStop",
            Self::EnergyLimitReached => "EnergyLimitReached",
            Self::EVDisconnected => "EVDisconnected",
            Self::GroundFault => "GroundFault",
            Self::ImmediateReset => "ImmediateReset",
            Self::Local => "Local",
            Self::LocalOutOfCredit => "LocalOutOfCredit",
            Self::MasterPass => "MasterPass",
            Self::Other => "Other",
            Self::OvercurrentFault => "OvercurrentFault",
            Self::PowerLoss => "PowerLoss",
            Self::PowerQuality => "PowerQuality",
            Self::Reboot => "Reboot",
            Self::Remote => "Remote",
            Self::SOCLimitReached => "SOCLimitReached",
            Self::StoppedByEV => "StoppedByEV",
            Self::TimeLimitReached => "TimeLimitReached",
            Self::Timeout => "Timeout",
            Self::UnlockCommand => "UnlockCommand",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Transaction {
    pub id: TransactionId,
    pub connector_id: u32,
    pub id_tag: String,
    pub started_at: DateTime<Utc>,
    pub meter_start_wh: Decimal,
    pub meter_latest_wh: Decimal,
    pub stopped_at: Option<DateTime<Utc>>,
    pub stopped_reason: Option<StopReason>,
}

impl Transaction {
    /// Start a 1.6-style transaction with a station-assigned local id.
    pub fn new_local(local_id: i64, connector_id: u32, id_tag: &str, meter_start_wh: i64) -> Self {
        Self {
            id: TransactionId::Local(local_id),
            connector_id,
            id_tag: id_tag.to_string(),
            started_at: Utc::now(),
            meter_start_wh: Decimal::from(meter_start_wh),
            meter_latest_wh: Decimal::from(meter_start_wh),
            stopped_at: None,
            stopped_reason: None,
        }
    }

    /// Start a 2.0.1-style transaction with a generated UUID transaction id.
    pub fn new_v201(connector_id: u32, id_tag: &str, meter_start_wh: Decimal) -> Self {
        Self {
            id: TransactionId::V201(new_transaction_id_v201()),
            connector_id,
            id_tag: id_tag.to_string(),
            started_at: Utc::now(),
            meter_start_wh,
            meter_latest_wh: meter_start_wh,
            stopped_at: None,
            stopped_reason: None,
        }
    }

    pub fn energy_delivered_wh(&self) -> Decimal {
        self.meter_latest_wh - self.meter_start_wh
    }

    pub fn record_meter(&mut self, wh: Decimal) {
        self.meter_latest_wh = wh;
    }

    pub fn is_active(&self) -> bool {
        self.stopped_at.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_transaction_tracks_energy_delivered() {
        let mut tx = Transaction::new_local(7, 1, "TAG1", 1000);
        tx.record_meter(Decimal::from(1500));
        assert_eq!(tx.energy_delivered_wh(), Decimal::from(500));
        assert_eq!(tx.id, TransactionId::Local(7));
    }

    #[test]
    fn v201_transaction_id_is_bounded() {
        let tx = Transaction::new_v201(1, "TAG1", Decimal::from(0));
        assert!(tx.id.to_string().len() <= 36);
    }

    #[test]
    fn stop_reason_strings_match_schema() {
        assert_eq!(StopReason::EVDisconnected.as_str(), "EVDisconnected");
        assert_eq!(StopReason::Local.as_str(), "Local");
    }
}
