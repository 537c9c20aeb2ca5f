//! Fixed-pool model: a set number of workers, chosen at construction time,
//! with stations placed round-robin across them. Simplest of the three and
//! the right default for a fleet whose size is known up front.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::config::StationTemplate;
use crate::domain::certificate::CertificateManager;
use crate::support::errors::SimError;

use super::core::PoolCore;
use super::factory::FactorySettings;
use super::{MessageHandler, WorkerPool};

pub struct FixedPool {
    core: PoolCore,
    worker_count: usize,
    next_placement: AtomicUsize,
}

impl FixedPool {
    pub fn new(
        worker_count: usize,
        broadcast: crate::broadcast::BroadcastRegistry,
        certificates: Arc<CertificateManager>,
        settings: FactorySettings,
    ) -> Self {
        Self {
            core: PoolCore::new(broadcast, certificates, settings),
            worker_count: worker_count.max(1),
            next_placement: AtomicUsize::new(0),
        }
    }

    async fn worker_for_placement(&self, idx: usize) -> Arc<super::core::Worker> {
        while self.core.worker_count().await <= idx {
            self.core.spawn_worker().await;
        }
        self.core
            .worker_by_index(idx)
            .await
            .expect("worker just ensured to exist")
    }
}

#[async_trait]
impl WorkerPool for FixedPool {
    async fn add(&self, template: Arc<StationTemplate>, index: u32) -> Result<String, SimError> {
        let placement = self.next_placement.fetch_add(1, Ordering::SeqCst) % self.worker_count;
        let worker = self.worker_for_placement(placement).await;
        Ok(self.core.add_to_worker(&worker, template, index).await)
    }

    async fn start(&self) -> Result<(), SimError> {
        self.core.start_all().await
    }

    async fn stop(&self) -> Result<(), SimError> {
        self.core.stop_all().await
    }

    async fn start_station(&self, hash_id: &str) -> Result<(), SimError> {
        self.core.start_station(hash_id).await
    }

    async fn stop_station(&self, hash_id: &str) -> Result<(), SimError> {
        self.core.stop_station(hash_id).await
    }

    async fn remove_station(&self, hash_id: &str) -> Result<(), SimError> {
        self.core.remove_station(hash_id).await
    }

    async fn station_hash_ids(&self) -> Vec<String> {
        self.core.station_hash_ids().await
    }

    async fn station_summaries(&self) -> Vec<super::StationSummary> {
        self.core.station_summaries().await
    }

    async fn open_connection(&self, hash_id: &str) -> Result<(), SimError> {
        self.core.open_connection(hash_id).await
    }

    async fn close_connection(&self, hash_id: &str) -> Result<(), SimError> {
        self.core.close_connection(hash_id).await
    }

    async fn start_transaction(&self, hash_id: &str, connector_id: u32, id_tag: String) -> Result<(), SimError> {
        self.core.start_transaction(hash_id, connector_id, id_tag).await
    }

    async fn stop_transaction(&self, hash_id: &str, connector_id: u32) -> Result<(), SimError> {
        self.core.stop_transaction(hash_id, connector_id).await
    }

    async fn start_atg(&self, hash_id: &str) -> Result<(), SimError> {
        self.core.start_atg(hash_id).await
    }

    async fn stop_atg(&self, hash_id: &str) -> Result<(), SimError> {
        self.core.stop_atg(hash_id).await
    }

    async fn set_supervision_url(&self, hash_id: &str, url: String) -> Result<(), SimError> {
        self.core.set_supervision_url(hash_id, url).await
    }

    fn broadcast(&self, msg: Value) {
        self.core.broadcast(msg);
    }

    fn on_message(&self, handler: MessageHandler) {
        self.core.on_message(handler);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::certificate::CertificateManager;
    use std::time::Duration;

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
    async fn placement_round_robins_across_fixed_workers() {
        let pool = FixedPool::new(
            2,
            crate::broadcast::BroadcastRegistry::new(),
            Arc::new(CertificateManager::new(std::env::temp_dir())),
            settings(),
        );
        let template = Arc::new(StationTemplate {
            base_name: "CS".into(),
            ..Default::default()
        });
        for i in 0..4 {
            pool.add(template.clone(), i).await.unwrap();
        }
        assert_eq!(pool.station_hash_ids().await.len(), 4);
        assert_eq!(pool.core.worker_count().await, 2);
    }
}
