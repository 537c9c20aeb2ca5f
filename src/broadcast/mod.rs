//! Named in-process broadcast channels (C14).
//!
//! Used for UI-to-station and station-to-UI fan-out: the UI control plane
//! addresses a set of station hash ids by broadcasting a tagged message and
//! collecting replies; each station subscribes to its own channel on start
//! and drops the subscription (unsubscribing) on stop. Delivery is
//! best-effort and unordered across subscribers, but ordered from the
//! perspective of a single sender, matching `tokio::sync::broadcast`'s own
//! guarantees directly — no additional sequencing is layered on top.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::{debug, warn};

const DEFAULT_CAPACITY: usize = 256;

/// One message published onto a named channel.
#[derive(Debug, Clone)]
pub struct BroadcastMessage {
    pub channel: String,
    pub payload: serde_json::Value,
}

struct Channel {
    sender: broadcast::Sender<BroadcastMessage>,
    subscriber_count: Arc<AtomicUsize>,
}

/// Registry of named broadcast channels, created lazily on first
/// subscribe/publish and kept for the process lifetime (channel identities
/// are cheap and few: one per station hash id plus a handful of UI-wide
/// topics).
#[derive(Clone, Default)]
pub struct BroadcastRegistry {
    channels: Arc<DashMap<String, Channel>>,
}

impl BroadcastRegistry {
    pub fn new() -> Self {
        Self {
            channels: Arc::new(DashMap::new()),
        }
    }

    fn channel_entry(&self, name: &str) -> Arc<AtomicUsize> {
        let entry = self.channels.entry(name.to_string()).or_insert_with(|| {
            let (sender, _) = broadcast::channel(DEFAULT_CAPACITY);
            Channel {
                sender,
                subscriber_count: Arc::new(AtomicUsize::new(0)),
            }
        });
        entry.subscriber_count.clone()
    }

    /// Publish a message on `channel`. A channel with no subscribers simply
    /// drops the message; that is the normal case when no UI client or
    /// station is currently listening.
    pub fn publish(&self, channel: &str, payload: serde_json::Value) {
        self.channel_entry(channel);
        let message = BroadcastMessage {
            channel: channel.to_string(),
            payload,
        };
        if let Some(entry) = self.channels.get(channel) {
            match entry.sender.send(message) {
                Ok(count) => debug!(channel, subscribers = count, "broadcast published"),
                Err(_) => debug!(channel, "broadcast published (no subscribers)"),
            }
        }
    }

    /// Subscribe to `channel`, creating it if this is the first subscriber.
    pub fn subscribe(&self, channel: &str) -> BroadcastSubscription {
        let count = self.channel_entry(channel);
        let receiver = self
            .channels
            .get(channel)
            .expect("channel just created by channel_entry")
            .sender
            .subscribe();
        count.fetch_add(1, Ordering::SeqCst);
        BroadcastSubscription {
            channel: channel.to_string(),
            receiver,
            subscriber_count: count,
        }
    }

    /// Number of active subscribers on `channel`, 0 if it doesn't exist yet.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .get(channel)
            .map(|c| c.subscriber_count.load(Ordering::SeqCst))
            .unwrap_or(0)
    }
}

/// A live subscription to one named channel. Dropping it unsubscribes.
pub struct BroadcastSubscription {
    pub channel: String,
    receiver: broadcast::Receiver<BroadcastMessage>,
    subscriber_count: Arc<AtomicUsize>,
}

impl BroadcastSubscription {
    /// Receive the next message on this channel, transparently skipping over
    /// a lagged-receiver error (the receiver fell behind the ring buffer)
    /// rather than treating it as a hard failure.
    pub async fn recv(&mut self) -> Option<BroadcastMessage> {
        loop {
            match self.receiver.recv().await {
                Ok(msg) => return Some(msg),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(channel = %self.channel, skipped, "broadcast subscriber lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

impl Drop for BroadcastSubscription {
    fn drop(&mut self) {
        self.subscriber_count.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_is_delivered_to_subscriber() {
        let registry = BroadcastRegistry::new();
        let mut sub = registry.subscribe("CP-00001");

        registry.publish("CP-00001", serde_json::json!({"type": "StartTransaction"}));

        let msg = tokio::time::timeout(std::time::Duration::from_millis(100), sub.recv())
            .await
            .expect("timed out")
            .expect("channel closed");
        assert_eq!(msg.channel, "CP-00001");
    }

    #[tokio::test]
    async fn unrelated_channels_do_not_cross_talk() {
        let registry = BroadcastRegistry::new();
        let mut sub = registry.subscribe("CP-00001");
        registry.publish("CP-00002", serde_json::json!({}));

        let result = tokio::time::timeout(std::time::Duration::from_millis(50), sub.recv()).await;
        assert!(result.is_err(), "subscriber on a different channel should not receive this message");
    }

    #[test]
    fn dropping_subscription_decrements_count() {
        let registry = BroadcastRegistry::new();
        let sub = registry.subscribe("CP-00001");
        assert_eq!(registry.subscriber_count("CP-00001"), 1);
        drop(sub);
        assert_eq!(registry.subscriber_count("CP-00001"), 0);
    }
}
