//! Automatic transaction generator (C11).
//!
//! One cooperative loop per connector. The loop never touches domain state or
//! the wire directly — it asks its `TransactionDriver` (the station FSM) to
//! begin/end a transaction and waits for the outcome, the same way a human
//! operator driving `RequestStartTransaction`/`RequestStopTransaction` would.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::info;

use crate::domain::transaction::StopReason;

#[derive(Debug, Clone)]
pub struct AtgConfig {
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub min_duration: Duration,
    pub max_duration: Duration,
    pub probability_of_start: f64,
    pub stop_after: Option<Duration>,
    pub id_tags: Vec<String>,
}

/// What one ATG loop iteration asks its owner to do. The station FSM performs
/// the actual authorize/StartTransaction/StopTransaction round trip and
/// reports back whether the transaction actually started.
#[async_trait]
pub trait TransactionDriver: Send + Sync {
    async fn begin(&self, connector_id: u32, id_tag: &str) -> bool;
    async fn end(&self, connector_id: u32, reason: StopReason);
}

pub struct AtgHandle {
    stop: Arc<AtomicBool>,
}

impl AtgHandle {
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

/// Spawn the per-connector loop described in §4.11.
pub fn spawn(connector_id: u32, config: AtgConfig, driver: Arc<dyn TransactionDriver>) -> AtgHandle {
    let stop = Arc::new(AtomicBool::new(false));
    let handle = AtgHandle { stop: stop.clone() };
    tokio::spawn(run_loop(connector_id, config, driver, stop));
    handle
}

async fn run_loop(
    connector_id: u32,
    config: AtgConfig,
    driver: Arc<dyn TransactionDriver>,
    stop: Arc<AtomicBool>,
) {
    let started_at = tokio::time::Instant::now();
    loop {
        // 1. Sleep between transactions — the one point where an external
        // stop takes effect immediately.
        if !sleep_cooperatively(random_duration(config.min_delay, config.max_delay), &stop).await {
            return;
        }

        // 2. Flip the coin.
        if rand::random::<f64>() < config.probability_of_start {
            let id_tag = pick_id_tag(&config.id_tags);
            if driver.begin(connector_id, &id_tag).await {
                // 3-4. Once started, run the transaction to completion even if
                // stopped externally meanwhile — avoids orphaned state (§4.11).
                tokio::time::sleep(random_duration(config.min_duration, config.max_duration)).await;
                driver.end(connector_id, StopReason::Local).await;
            }
        }

        // 5. stopAfterHours.
        if let Some(limit) = config.stop_after {
            if started_at.elapsed() >= limit {
                info!(connector_id, "ATG stop-after-hours elapsed, exiting");
                return;
            }
        }

        if stop.load(Ordering::SeqCst) {
            return;
        }
    }
}

fn random_duration(min: Duration, max: Duration) -> Duration {
    if max <= min {
        return min;
    }
    let min_ms = min.as_millis() as u64;
    let max_ms = max.as_millis() as u64;
    Duration::from_millis(rand::thread_rng().gen_range(min_ms..=max_ms))
}

fn pick_id_tag(tags: &[String]) -> String {
    if tags.is_empty() {
        return "ATG-TAG".to_string();
    }
    let idx = rand::thread_rng().gen_range(0..tags.len());
    tags[idx].clone()
}

/// Sleeps for `delay` in short slices so a stop request lands promptly
/// instead of waiting out the full inter-transaction delay.
async fn sleep_cooperatively(delay: Duration, stop: &Arc<AtomicBool>) -> bool {
    const POLL: Duration = Duration::from_millis(50);
    let mut remaining = delay;
    while remaining > Duration::ZERO {
        if stop.load(Ordering::SeqCst) {
            return false;
        }
        let step = remaining.min(POLL);
        tokio::time::sleep(step).await;
        remaining -= step;
    }
    !stop.load(Ordering::SeqCst)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    struct RecordingDriver {
        begins: StdMutex<Vec<(u32, String)>>,
        ends: StdMutex<Vec<(u32, StopReason)>>,
    }

    impl RecordingDriver {
        fn new() -> Self {
            Self {
                begins: StdMutex::new(Vec::new()),
                ends: StdMutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl TransactionDriver for RecordingDriver {
        async fn begin(&self, connector_id: u32, id_tag: &str) -> bool {
            self.begins.lock().unwrap().push((connector_id, id_tag.to_string()));
            true
        }

        async fn end(&self, connector_id: u32, reason: StopReason) {
            self.ends.lock().unwrap().push((connector_id, reason));
        }
    }

    fn fast_config() -> AtgConfig {
        AtgConfig {
            min_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            min_duration: Duration::from_millis(1),
            max_duration: Duration::from_millis(2),
            probability_of_start: 1.0,
            stop_after: None,
            id_tags: vec!["TAG1".into()],
        }
    }

    #[tokio::test]
    async fn always_starts_at_probability_one_and_stops_each_cycle() {
        let driver = Arc::new(RecordingDriver::new());
        let handle = spawn(1, fast_config(), driver.clone());
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.stop();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let begins = driver.begins.lock().unwrap();
        let ends = driver.ends.lock().unwrap();
        assert!(!begins.is_empty());
        assert_eq!(begins.len(), ends.len());
        assert_eq!(begins[0].1, "TAG1");
        assert_eq!(ends[0].1, StopReason::Local);
    }

    #[tokio::test]
    async fn probability_zero_never_starts_a_transaction() {
        let driver = Arc::new(RecordingDriver::new());
        let mut config = fast_config();
        config.probability_of_start = 0.0;
        let handle = spawn(1, config, driver.clone());
        tokio::time::sleep(Duration::from_millis(30)).await;
        handle.stop();
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(driver.begins.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn stop_after_elapsed_ends_the_loop() {
        let driver = Arc::new(RecordingDriver::new());
        let mut config = fast_config();
        config.stop_after = Some(Duration::from_millis(20));
        let handle = spawn(1, config, driver.clone());
        tokio::time::sleep(Duration::from_millis(200)).await;
        // The loop should have exited on its own; calling stop() again is a no-op.
        handle.stop();
    }
}
