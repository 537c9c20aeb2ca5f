//! Dynamic-pool model: workers are spawned on demand as load grows past
//! `spawn_threshold` stations-per-worker, up to `max_workers`, and retired
//! automatically once they sit empty for `idle_ttl`. Suited to a long-running
//! simulator whose fleet is added to and shrunk over time rather than fixed
//! at startup.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::config::StationTemplate;
use crate::domain::certificate::CertificateManager;
use crate::support::errors::SimError;

use super::core::PoolCore;
use super::factory::FactorySettings;
use super::{MessageHandler, WorkerPool};

struct Inner {
    core: PoolCore,
    max_workers: usize,
    spawn_threshold: usize,
    idle_ttl: Duration,
    idle_since: AsyncMutex<HashMap<usize, Instant>>,
    next_placement: AtomicUsize,
}

impl Inner {
    async fn worker_for_placement(&self) -> Arc<super::core::Worker> {
        let count = self.core.worker_count().await.max(1);
        let placement = self.next_placement.fetch_add(1, Ordering::SeqCst) % count;
        let workers = self.core.workers_snapshot().await;
        if let Some(worker) = workers.get(placement) {
            if self.core.worker_station_count(worker).await < self.spawn_threshold
                || count >= self.max_workers
            {
                return worker.clone();
            }
        }
        self.core.spawn_worker().await
    }

    async fn reap_idle(&self) {
        let mut idle_since = self.idle_since.lock().await;
        let now_keys: Vec<usize> = idle_since.keys().copied().collect();
        for worker in self.core.workers_snapshot().await {
            let empty = self.core.worker_station_count(&worker).await == 0;
            if empty {
                let first_seen = *idle_since.entry(worker.id).or_insert_with(Instant::now);
                if first_seen.elapsed() >= self.idle_ttl {
                    self.core.retire_if_idle(worker.id).await;
                    idle_since.remove(&worker.id);
                    debug!(worker_id = worker.id, "dynamic pool reaped idle worker");
                }
            } else {
                idle_since.remove(&worker.id);
            }
        }
        // Drop bookkeeping for workers that no longer exist at all.
        let live: std::collections::HashSet<usize> =
            self.core.workers_snapshot().await.iter().map(|w| w.id).collect();
        for id in now_keys {
            if !live.contains(&id) {
                idle_since.remove(&id);
            }
        }
    }
}

pub struct DynamicPool {
    inner: Arc<Inner>,
    reaper: JoinHandle<()>,
}

impl DynamicPool {
    pub fn new(
        max_workers: usize,
        spawn_threshold: usize,
        idle_ttl: Duration,
        broadcast: crate::broadcast::BroadcastRegistry,
        certificates: Arc<CertificateManager>,
        settings: FactorySettings,
    ) -> Self {
        let inner = Arc::new(Inner {
            core: PoolCore::new(broadcast, certificates, settings),
            max_workers: max_workers.max(1),
            spawn_threshold: spawn_threshold.max(1),
            idle_ttl,
            idle_since: AsyncMutex::new(HashMap::new()),
            next_placement: AtomicUsize::new(0),
        });
        let weak: Weak<Inner> = Arc::downgrade(&inner);
        let reaper = tokio::spawn(reap_loop(weak, idle_ttl));
        Self { inner, reaper }
    }
}

impl Drop for DynamicPool {
    fn drop(&mut self) {
        self.reaper.abort();
    }
}

async fn reap_loop(inner: Weak<Inner>, idle_ttl: Duration) {
    let period = (idle_ttl / 4).max(Duration::from_secs(1));
    let mut ticker = tokio::time::interval(period);
    loop {
        ticker.tick().await;
        let Some(inner) = inner.upgrade() else {
            return;
        };
        inner.reap_idle().await;
    }
}

#[async_trait]
impl WorkerPool for DynamicPool {
    async fn add(&self, template: Arc<StationTemplate>, index: u32) -> Result<String, SimError> {
        if self.inner.core.worker_count().await == 0 {
            self.inner.core.spawn_worker().await;
        }
        let worker = self.inner.worker_for_placement().await;
        Ok(self.inner.core.add_to_worker(&worker, template, index).await)
    }

    async fn start(&self) -> Result<(), SimError> {
        self.inner.core.start_all().await
    }

    async fn stop(&self) -> Result<(), SimError> {
        self.inner.core.stop_all().await
    }

    async fn start_station(&self, hash_id: &str) -> Result<(), SimError> {
        self.inner.core.start_station(hash_id).await
    }

    async fn stop_station(&self, hash_id: &str) -> Result<(), SimError> {
        self.inner.core.stop_station(hash_id).await
    }

    async fn remove_station(&self, hash_id: &str) -> Result<(), SimError> {
        self.inner.core.remove_station(hash_id).await
    }

    async fn station_hash_ids(&self) -> Vec<String> {
        self.inner.core.station_hash_ids().await
    }

    async fn station_summaries(&self) -> Vec<super::StationSummary> {
        self.inner.core.station_summaries().await
    }

    async fn open_connection(&self, hash_id: &str) -> Result<(), SimError> {
        self.inner.core.open_connection(hash_id).await
    }

    async fn close_connection(&self, hash_id: &str) -> Result<(), SimError> {
        self.inner.core.close_connection(hash_id).await
    }

    async fn start_transaction(&self, hash_id: &str, connector_id: u32, id_tag: String) -> Result<(), SimError> {
        self.inner.core.start_transaction(hash_id, connector_id, id_tag).await
    }

    async fn stop_transaction(&self, hash_id: &str, connector_id: u32) -> Result<(), SimError> {
        self.inner.core.stop_transaction(hash_id, connector_id).await
    }

    async fn start_atg(&self, hash_id: &str) -> Result<(), SimError> {
        self.inner.core.start_atg(hash_id).await
    }

    async fn stop_atg(&self, hash_id: &str) -> Result<(), SimError> {
        self.inner.core.stop_atg(hash_id).await
    }

    async fn set_supervision_url(&self, hash_id: &str, url: String) -> Result<(), SimError> {
        self.inner.core.set_supervision_url(hash_id, url).await
    }

    fn broadcast(&self, msg: Value) {
        self.inner.core.broadcast(msg);
    }

    fn on_message(&self, handler: MessageHandler) {
        self.inner.core.on_message(handler);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> FactorySettings {
        FactorySettings {
            ping_interval: Duration::from_secs(60),
            reconnect_max: Duration::from_secs(60),
            action_timeout: Duration::from_secs(30),
            auth_cache_lifetime_secs: 3600,
            auth_cache_capacity: 16,
            offline_authorization_enabled: false,
            local_pre_authorize: true,
            data_dir: std::env::temp_dir(),
        }
    }

    #[tokio::test]
    async fn spawns_additional_workers_past_the_threshold() {
        let pool = DynamicPool::new(
            4,
            2,
            Duration::from_secs(300),
            crate::broadcast::BroadcastRegistry::new(),
            Arc::new(CertificateManager::new(std::env::temp_dir())),
            settings(),
        );
        let template = Arc::new(StationTemplate {
            base_name: "CS".into(),
            ..Default::default()
        });
        for i in 0..6 {
            pool.add(template.clone(), i).await.unwrap();
        }
        assert_eq!(pool.station_hash_ids().await.len(), 6);
        assert!(pool.inner.core.worker_count().await >= 2);
    }

    #[tokio::test]
    async fn never_exceeds_max_workers() {
        let pool = DynamicPool::new(
            2,
            1,
            Duration::from_secs(300),
            crate::broadcast::BroadcastRegistry::new(),
            Arc::new(CertificateManager::new(std::env::temp_dir())),
            settings(),
        );
        let template = Arc::new(StationTemplate {
            base_name: "CS".into(),
            ..Default::default()
        });
        for i in 0..10 {
            pool.add(template.clone(), i).await.unwrap();
        }
        assert!(pool.inner.core.worker_count().await <= 2);
    }
}
