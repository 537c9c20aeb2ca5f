//! Worker pool (C12): hosts many simulated stations per host process behind
//! three interchangeable scheduling models sharing one external contract.
//!
//! "Worker" here is a bookkeeping and fault-isolation unit, not a literal OS
//! thread: stations are already independently scheduled Tokio tasks (the
//! runtime is the cooperative scheduler §9 asks for), so a worker is the
//! group a station is billed against for pool-sizing decisions and the unit
//! a broadcast or pool-wide stop addresses.

mod core;
mod dynamic;
mod fixed;
mod worker_set;

pub mod factory;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::config::StationTemplate;
use crate::support::errors::SimError;

pub use dynamic::DynamicPool;
pub use fixed::FixedPool;
pub use worker_set::WorkerSet;

/// A callback invoked for every lifecycle event a pool's workers produce.
/// Registered once via `on_message`; the pool may call it from any worker's
/// task, so it must be `Send + Sync`.
pub type MessageHandler = Arc<dyn Fn(WorkerEvent) + Send + Sync>;

/// A station's identity, connectivity, and per-connector status, as surfaced
/// by the UI control-plane's `ListChargingStations` procedure (§4.13).
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StationSummary {
    pub hash_id: String,
    pub human_id: String,
    pub ocpp_version: String,
    pub vendor: String,
    pub model: String,
    pub connection_state: String,
    pub boot_status: String,
    pub started: bool,
    pub connector_statuses: Vec<ConnectorSummary>,
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectorSummary {
    pub connector_id: u32,
    pub status: String,
    pub has_active_transaction: bool,
}

/// Published to `interfaces::ui::EVENTS_CHANNEL` as JSON for every connected
/// UI WebSocket (§4.14).
#[derive(Debug, Clone, serde::Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WorkerEvent {
    StationAdded { worker_id: usize, hash_id: String },
    StationStarted { worker_id: usize, hash_id: String },
    StationStopped { worker_id: usize, hash_id: String },
    WorkerSpawned { worker_id: usize },
    WorkerRetired { worker_id: usize },
}

/// The external contract shared by the fixed-pool, dynamic-pool, and
/// worker-set models (§4.12).
#[async_trait]
pub trait WorkerPool: Send + Sync {
    /// Register a station built from `template` at fleet `index`, assigning
    /// it to a worker per the pool's placement strategy. Does not start it —
    /// call `start_station` (or `start()` to start everything not yet
    /// running) once added.
    async fn add(&self, template: Arc<StationTemplate>, index: u32) -> Result<String, SimError>;

    /// Start every added-but-not-yet-started station across all workers.
    async fn start(&self) -> Result<(), SimError>;

    /// Stop every hosted station across all workers, gracefully.
    async fn stop(&self) -> Result<(), SimError>;

    async fn start_station(&self, hash_id: &str) -> Result<(), SimError>;
    async fn stop_station(&self, hash_id: &str) -> Result<(), SimError>;
    async fn remove_station(&self, hash_id: &str) -> Result<(), SimError>;

    /// Hash ids of every station currently hosted by this pool, across all
    /// workers.
    async fn station_hash_ids(&self) -> Vec<String>;

    /// Brief per-station status, for the UI's `ListChargingStations` (§4.13).
    async fn station_summaries(&self) -> Vec<StationSummary>;

    /// Per-station control-plane operations (§4.13), addressed by hash id.
    /// All fail with `SimError::StationNotFound` if the station isn't hosted
    /// by this pool, or `SimError::Rejected` if it's hosted but not started.
    async fn open_connection(&self, hash_id: &str) -> Result<(), SimError>;
    async fn close_connection(&self, hash_id: &str) -> Result<(), SimError>;
    async fn start_transaction(&self, hash_id: &str, connector_id: u32, id_tag: String) -> Result<(), SimError>;
    async fn stop_transaction(&self, hash_id: &str, connector_id: u32) -> Result<(), SimError>;
    async fn start_atg(&self, hash_id: &str) -> Result<(), SimError>;
    async fn stop_atg(&self, hash_id: &str) -> Result<(), SimError>;
    async fn set_supervision_url(&self, hash_id: &str, url: String) -> Result<(), SimError>;

    /// Fan a message out to every hosted station's broadcast channel (C14).
    fn broadcast(&self, msg: Value);

    /// Register a callback for worker/station lifecycle events.
    fn on_message(&self, handler: MessageHandler);
}
