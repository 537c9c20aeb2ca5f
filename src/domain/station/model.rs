//! Station model (§3, §4.10, §6 template options).

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::domain::connector::Connector;
use crate::domain::ocpp::OcppVersion;

/// Boot handshake state; distinct from the full lifecycle FSM (C10) which
/// also tracks transport connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootStatus {
    Booting,
    Accepted,
    Pending,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SupervisionUrlDistribution {
    RoundRobin,
    Random,
    Affinity,
}

impl Default for SupervisionUrlDistribution {
    fn default() -> Self {
        SupervisionUrlDistribution::RoundRobin
    }
}

#[derive(Debug, Clone)]
pub struct SupervisionUrls {
    pub urls: Vec<String>,
    pub distribution: SupervisionUrlDistribution,
    next_index: std::sync::Arc<AtomicU64>,
}

impl SupervisionUrls {
    pub fn new(urls: Vec<String>, distribution: SupervisionUrlDistribution) -> Self {
        Self {
            urls,
            distribution,
            next_index: std::sync::Arc::new(AtomicU64::new(0)),
        }
    }

    /// Select the next URL per the configured distribution strategy. For
    /// `Affinity`, the station always uses the same URL (index 0) unless it
    /// is the only one configured differently upstream — the simulator's
    /// affinity key is the station itself, not a shared pool.
    pub fn select(&self) -> &str {
        if self.urls.len() == 1 {
            return &self.urls[0];
        }
        let idx = match self.distribution {
            SupervisionUrlDistribution::RoundRobin => {
                self.next_index.fetch_add(1, Ordering::Relaxed) as usize % self.urls.len()
            }
            SupervisionUrlDistribution::Random => {
                (rand::random::<u64>() as usize) % self.urls.len()
            }
            SupervisionUrlDistribution::Affinity => 0,
        };
        &self.urls[idx]
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PerformanceCounters {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub reconnect_count: u64,
    pub transactions_started: u64,
    pub transactions_stopped: u64,
}

/// One simulated charging station. Owns its connectors, configuration store
/// reference, cache reference, and performance counters (§3 ownership).
pub struct Station {
    pub hash_id: String,
    pub human_id: String,
    pub ocpp_version: OcppVersion,
    pub vendor: String,
    pub model: String,
    pub serial_number: Option<String>,
    pub firmware_version: String,
    pub supervision_urls: SupervisionUrls,
    pub boot_status: BootStatus,
    pub connection_state: ConnectionState,
    pub connectors: BTreeMap<u32, Connector>,
    pub heartbeat_interval_secs: u32,
    pub amperage_limitation_key: Option<String>,
    pub counters: PerformanceCounters,
}

impl Station {
    pub fn new(
        hash_id: impl Into<String>,
        human_id: impl Into<String>,
        ocpp_version: OcppVersion,
        vendor: impl Into<String>,
        model: impl Into<String>,
        firmware_version: impl Into<String>,
        supervision_urls: SupervisionUrls,
        connector_count: u32,
    ) -> Self {
        let mut connectors = BTreeMap::new();
        // Connector 0 represents the whole station for some operations and
        // never carries a transaction (§3).
        connectors.insert(0, Connector::new(0));
        for id in 1..=connector_count {
            connectors.insert(id, Connector::new(id));
        }
        Self {
            hash_id: hash_id.into(),
            human_id: human_id.into(),
            ocpp_version,
            vendor: vendor.into(),
            model: model.into(),
            serial_number: None,
            firmware_version: firmware_version.into(),
            supervision_urls,
            boot_status: BootStatus::Booting,
            connection_state: ConnectionState::Disconnected,
            connectors,
            heartbeat_interval_secs: 60,
            amperage_limitation_key: None,
            counters: PerformanceCounters::default(),
        }
    }

    pub fn connector(&self, id: u32) -> Option<&Connector> {
        self.connectors.get(&id)
    }

    pub fn connector_mut(&mut self, id: u32) -> Option<&mut Connector> {
        self.connectors.get_mut(&id)
    }

    /// Evse/connector ids excluding the whole-station id 0.
    pub fn real_connector_ids(&self) -> Vec<u32> {
        self.connectors.keys().copied().filter(|&id| id != 0).collect()
    }

    pub fn has_any_active_transaction(&self) -> bool {
        self.connectors.values().any(Connector::has_active_transaction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn station() -> Station {
        Station::new(
            "CS-00001",
            "CS-1",
            OcppVersion::V16,
            "Acme",
            "FastCharge",
            "1.0.0",
            SupervisionUrls::new(
                vec!["wss://csms.example/a".into()],
                SupervisionUrlDistribution::RoundRobin,
            ),
            2,
        )
    }

    #[test]
    fn connector_zero_always_present_without_transaction() {
        let s = station();
        assert!(s.connector(0).is_some());
        assert_eq!(s.real_connector_ids(), vec![1, 2]);
    }

    #[test]
    fn round_robin_cycles_through_urls() {
        let urls = SupervisionUrls::new(
            vec!["a".into(), "b".into(), "c".into()],
            SupervisionUrlDistribution::RoundRobin,
        );
        let picks: Vec<_> = (0..6).map(|_| urls.select().to_string()).collect();
        assert_eq!(picks, vec!["a", "b", "c", "a", "b", "c"]);
    }

    #[test]
    fn affinity_always_returns_same_url() {
        let urls = SupervisionUrls::new(
            vec!["a".into(), "b".into()],
            SupervisionUrlDistribution::Affinity,
        );
        assert_eq!(urls.select(), "a");
        assert_eq!(urls.select(), "a");
    }
}
