//! In-process broker transport.
//!
//! [`MemoryBroker`] keeps one sender per subscribed channel and delivers
//! published payloads directly, preserving per-channel ordering. It backs
//! hermetic bus tests and single-process deployments; the connected flag
//! can be flipped to exercise the bus's degraded (disconnected) paths.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::transport::{Broker, BrokerError, BrokerMessage, MessageReceiver};

/// In-memory pub/sub transport.
#[derive(Debug, Default)]
pub struct MemoryBroker {
    subscriptions: Mutex<HashMap<String, mpsc::UnboundedSender<BrokerMessage>>>,
    disconnected: AtomicBool,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate losing or regaining the broker connection.
    pub fn set_connected(&self, connected: bool) {
        self.disconnected.store(!connected, Ordering::SeqCst);
    }

    /// Channels with a live subscription, sorted.
    pub fn subscribed_channels(&self) -> Vec<String> {
        let subscriptions = self
            .subscriptions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut channels: Vec<String> = subscriptions.keys().cloned().collect();
        channels.sort();
        channels
    }

    fn lock_subscriptions(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<String, mpsc::UnboundedSender<BrokerMessage>>> {
        self.subscriptions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn publish(&self, channel: &str, payload: String) -> Result<(), BrokerError> {
        if self.disconnected.load(Ordering::SeqCst) {
            return Err(BrokerError::NotConnected);
        }

        let mut subscriptions = self.lock_subscriptions();
        if let Some(sender) = subscriptions.get(channel) {
            let message = BrokerMessage {
                channel: channel.to_string(),
                payload,
            };
            if sender.send(message).is_err() {
                // Receiver was dropped without unsubscribing.
                subscriptions.remove(channel);
            }
        }
        // No subscriber means the message is dropped, as on a real broker.
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<MessageReceiver, BrokerError> {
        if self.disconnected.load(Ordering::SeqCst) {
            return Err(BrokerError::NotConnected);
        }

        let mut subscriptions = self.lock_subscriptions();
        if subscriptions.contains_key(channel) {
            return Err(BrokerError::Subscribe {
                channel: channel.to_string(),
                reason: "channel already has a live subscription".to_string(),
            });
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        subscriptions.insert(channel.to_string(), sender);
        Ok(receiver)
    }

    async fn unsubscribe(&self, channel: &str) -> Result<(), BrokerError> {
        self.lock_subscriptions().remove(channel);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        !self.disconnected.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn publish_reaches_the_channel_subscriber() {
        let broker = MemoryBroker::new();
        let mut rx = broker.subscribe("events:payment").await.unwrap();

        broker
            .publish("events:payment", "{\"n\":1}".to_string())
            .await
            .unwrap();

        let message = rx.recv().await.unwrap();
        assert_eq!(message.channel, "events:payment");
        assert_eq!(message.payload, "{\"n\":1}");
    }

    #[tokio::test]
    async fn publish_without_subscriber_is_dropped() {
        let broker = MemoryBroker::new();
        broker
            .publish("events:general", "{}".to_string())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn channel_ordering_is_preserved() {
        let broker = MemoryBroker::new();
        let mut rx = broker.subscribe("events:course").await.unwrap();

        for i in 0..5 {
            broker
                .publish("events:course", format!("{i}"))
                .await
                .unwrap();
        }
        for i in 0..5 {
            assert_eq!(rx.recv().await.unwrap().payload, format!("{i}"));
        }
    }

    #[tokio::test]
    async fn double_subscribe_is_rejected() {
        let broker = MemoryBroker::new();
        let _rx = broker.subscribe("events:lab").await.unwrap();

        let err = broker.subscribe("events:lab").await.unwrap_err();
        assert_matches!(err, BrokerError::Subscribe { .. });
    }

    #[tokio::test]
    async fn unsubscribe_closes_the_receiver() {
        let broker = MemoryBroker::new();
        let mut rx = broker.subscribe("events:user").await.unwrap();

        broker.unsubscribe("events:user").await.unwrap();
        assert!(rx.recv().await.is_none());
        assert!(broker.subscribed_channels().is_empty());
    }

    #[tokio::test]
    async fn disconnected_broker_rejects_operations() {
        let broker = MemoryBroker::new();
        broker.set_connected(false);
        assert!(!broker.is_connected());

        let err = broker
            .publish("events:payment", "{}".to_string())
            .await
            .unwrap_err();
        assert_matches!(err, BrokerError::NotConnected);
        assert_matches!(
            broker.subscribe("events:payment").await.unwrap_err(),
            BrokerError::NotConnected
        );

        broker.set_connected(true);
        assert!(broker.is_connected());
        broker
            .publish("events:payment", "{}".to_string())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn dropped_receiver_is_pruned_on_next_publish() {
        let broker = MemoryBroker::new();
        let rx = broker.subscribe("events:admin").await.unwrap();
        drop(rx);

        broker
            .publish("events:admin", "{}".to_string())
            .await
            .unwrap();
        assert!(broker.subscribed_channels().is_empty());
    }
}
