//! Per-connector / EVSE state machine (§3, §4.5).
//!
//! Connector id 0 means "whole station" for some operations and never carries
//! a transaction. Invariants enforced here:
//! - a connector with a transaction has a non-null id-tag and start timestamp
//! - `Charging | SuspendedEV | SuspendedEVSE | Finishing` ⇒ transaction in progress
//! - id 0 never has a transaction

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::error::{DomainError, DomainResult};
use crate::domain::transaction::{StopReason, Transaction};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Availability {
    Operative,
    Inoperative,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectorStatus {
    Available,
    Preparing,
    Charging,
    SuspendedEV,
    SuspendedEVSE,
    Finishing,
    Reserved,
    Unavailable,
    Faulted,
}

impl ConnectorStatus {
    /// Whether this status requires a transaction to be in progress, per the
    /// invariant in §3/§8 (property 3).
    pub fn requires_transaction(&self) -> bool {
        matches!(
            self,
            Self::Charging | Self::SuspendedEV | Self::SuspendedEVSE | Self::Finishing
        )
    }
}

/// A stack-leveled charging profile slot (simplified: the simulator tracks
/// enough to report `GetCompositeSchedule`/`GetChargingProfiles`-style
/// queries, not to execute real schedule arithmetic — that is the electrical
/// non-goal from §1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargingProfileSlot {
    pub stack_level: i32,
    pub profile_id: i32,
    pub raw: serde_json::Value,
}

/// Outcome of a `ChangeAvailability` request, per §4.5/§4.8.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AvailabilityChangeOutcome {
    Accepted,
    /// A transaction is in progress; the change will apply once it ends.
    Scheduled,
    Rejected,
}

#[derive(Debug, Clone)]
pub struct Connector {
    pub id: u32,
    pub availability: Availability,
    pub status: ConnectorStatus,
    pub transaction: Option<Transaction>,
    /// Availability change requested while a transaction was active; applied
    /// when the transaction ends (§4.5 tie-break rule).
    pub pending_availability: Option<Availability>,
    pub charging_profiles: Vec<ChargingProfileSlot>,
    pub meter_value_sample_interval: u32,
    pub clock_aligned_data_interval: u32,
    pub last_sample_at: Option<DateTime<Utc>>,
    pub fault: Option<String>,
}

impl Connector {
    pub fn new(id: u32) -> Self {
        Self {
            id,
            availability: Availability::Operative,
            status: ConnectorStatus::Available,
            transaction: None,
            pending_availability: None,
            charging_profiles: Vec::new(),
            meter_value_sample_interval: 60,
            clock_aligned_data_interval: 0,
            last_sample_at: None,
            fault: None,
        }
    }

    pub fn has_active_transaction(&self) -> bool {
        self.transaction.is_some()
    }

    /// Transition to `Preparing` on plug-in or authorize attempt.
    pub fn begin_preparing(&mut self) -> DomainResult<()> {
        self.require_status(ConnectorStatus::Available, ConnectorStatus::Preparing)?;
        self.status = ConnectorStatus::Preparing;
        Ok(())
    }

    /// Begin a transaction: `Preparing -> Charging`.
    pub fn start_transaction(&mut self, tx: Transaction) -> DomainResult<()> {
        if self.id == 0 {
            return Err(DomainError::InvalidTransition {
                connector: self.id,
                from: "n/a".into(),
                to: "Charging".into(),
            });
        }
        if self.has_active_transaction() {
            return Err(DomainError::TransactionAlreadyActive(self.id));
        }
        self.transaction = Some(tx);
        self.status = ConnectorStatus::Charging;
        Ok(())
    }

    /// Move between the power states while charging.
    pub fn suspend_ev(&mut self) -> DomainResult<()> {
        self.require_one_of(
            &[ConnectorStatus::Charging, ConnectorStatus::SuspendedEVSE],
            ConnectorStatus::SuspendedEV,
        )?;
        self.status = ConnectorStatus::SuspendedEV;
        Ok(())
    }

    pub fn suspend_evse(&mut self) -> DomainResult<()> {
        self.require_one_of(
            &[ConnectorStatus::Charging, ConnectorStatus::SuspendedEV],
            ConnectorStatus::SuspendedEVSE,
        )?;
        self.status = ConnectorStatus::SuspendedEVSE;
        Ok(())
    }

    pub fn resume_charging(&mut self) -> DomainResult<()> {
        self.require_one_of(
            &[ConnectorStatus::SuspendedEV, ConnectorStatus::SuspendedEVSE],
            ConnectorStatus::Charging,
        )?;
        self.status = ConnectorStatus::Charging;
        Ok(())
    }

    /// End a transaction: `Charging/Suspended* -> Finishing`. Returns the
    /// stopped transaction so the caller can build the outgoing event.
    pub fn stop_transaction(&mut self, reason: StopReason) -> DomainResult<Transaction> {
        let mut tx = self
            .transaction
            .take()
            .ok_or(DomainError::NoActiveTransaction(self.id))?;
        tx.stopped_reason = Some(reason);
        tx.stopped_at = Some(Utc::now());
        self.status = ConnectorStatus::Finishing;
        Ok(tx)
    }

    /// `Finishing -> Available` after settle, applying any deferred
    /// availability change (§4.5 tie-break rule).
    pub fn settle(&mut self) {
        self.status = ConnectorStatus::Available;
        if let Some(pending) = self.pending_availability.take() {
            self.availability = pending;
            if pending == Availability::Inoperative {
                self.status = ConnectorStatus::Unavailable;
            }
        }
    }

    /// Apply (or schedule) a `ChangeAvailability` request.
    pub fn change_availability(&mut self, target: Availability) -> AvailabilityChangeOutcome {
        if self.has_active_transaction() {
            self.pending_availability = Some(target);
            return AvailabilityChangeOutcome::Scheduled;
        }
        self.availability = target;
        self.status = match target {
            Availability::Inoperative => ConnectorStatus::Unavailable,
            Availability::Operative if self.status == ConnectorStatus::Unavailable => {
                ConnectorStatus::Available
            }
            Availability::Operative => self.status,
        };
        AvailabilityChangeOutcome::Accepted
    }

    /// Inject a fault; requires an operator clear to return to service.
    pub fn fault(&mut self, reason: impl Into<String>) {
        self.fault = Some(reason.into());
        self.status = ConnectorStatus::Faulted;
    }

    pub fn clear_fault(&mut self) {
        self.fault = None;
        self.status = ConnectorStatus::Available;
    }

    pub fn due_for_sample(&self, now: DateTime<Utc>) -> bool {
        if self.status != ConnectorStatus::Charging || self.meter_value_sample_interval == 0 {
            return false;
        }
        match self.last_sample_at {
            None => true,
            Some(last) => {
                (now - last).num_seconds() >= self.meter_value_sample_interval as i64
            }
        }
    }

    fn require_status(
        &self,
        expected: ConnectorStatus,
        target: ConnectorStatus,
    ) -> DomainResult<()> {
        if self.status != expected {
            return Err(DomainError::InvalidTransition {
                connector: self.id,
                from: format!("{:?}", self.status),
                to: format!("{:?}", target),
            });
        }
        Ok(())
    }

    fn require_one_of(
        &self,
        expected: &[ConnectorStatus],
        target: ConnectorStatus,
    ) -> DomainResult<()> {
        if !expected.contains(&self.status) {
            return Err(DomainError::InvalidTransition {
                connector: self.id,
                from: format!("{:?}", self.status),
                to: format!("{:?}", target),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::transaction::Transaction;

    fn tx() -> Transaction {
        Transaction::new_local(1, 1, "TAG1", 0)
    }

    #[test]
    fn charging_requires_transaction_invariant_holds() {
        let mut c = Connector::new(1);
        c.begin_preparing().unwrap();
        c.start_transaction(tx()).unwrap();
        assert!(c.status.requires_transaction());
        assert!(c.transaction.is_some());
    }

    #[test]
    fn connector_zero_rejects_transaction() {
        let mut c = Connector::new(0);
        assert!(c.start_transaction(tx()).is_err());
    }

    #[test]
    fn at_most_one_transaction_per_connector() {
        let mut c = Connector::new(1);
        c.start_transaction(tx()).unwrap();
        assert!(c.start_transaction(tx()).is_err());
    }

    #[test]
    fn change_availability_is_scheduled_during_transaction() {
        let mut c = Connector::new(1);
        c.start_transaction(tx()).unwrap();
        let outcome = c.change_availability(Availability::Inoperative);
        assert_eq!(outcome, AvailabilityChangeOutcome::Scheduled);
        assert_eq!(c.availability, Availability::Operative);

        c.stop_transaction(StopReason::Local).unwrap();
        c.settle();
        assert_eq!(c.availability, Availability::Inoperative);
        assert_eq!(c.status, ConnectorStatus::Unavailable);
    }

    #[test]
    fn settle_returns_to_available() {
        let mut c = Connector::new(1);
        c.start_transaction(tx()).unwrap();
        c.stop_transaction(StopReason::Local).unwrap();
        assert_eq!(c.status, ConnectorStatus::Finishing);
        c.settle();
        assert_eq!(c.status, ConnectorStatus::Available);
    }
}
