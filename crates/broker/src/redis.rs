//! Redis pub/sub transport.
//!
//! [`RedisBroker`] holds two long-lived connections: a multiplexed
//! command connection for `PUBLISH` and a dedicated pub/sub connection
//! driven by a background task for subscriptions. Each side reconnects
//! independently with exponential backoff
//! (`min(1000 * 2^attempt, 30000)` ms) and gives up for good after
//! [`MAX_RECONNECT_ATTEMPTS`](campus_core::backoff::MAX_RECONNECT_ATTEMPTS)
//! failed attempts; past that point the broker stays disconnected and the
//! process must be restarted.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::{MultiplexedConnection, PubSub};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use campus_core::backoff::{reconnect_delay_ms, MAX_RECONNECT_ATTEMPTS};

use crate::transport::{Broker, BrokerError, BrokerMessage, MessageReceiver};

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Subscription changes sent to the pub/sub driver task.
enum SubCommand {
    Subscribe(String),
    Unsubscribe(String),
}

/// State shared between the broker handle and its background tasks.
struct Shared {
    /// Per-channel senders the driver dispatches incoming messages to.
    subscriptions: Mutex<HashMap<String, mpsc::UnboundedSender<BrokerMessage>>>,
    publish_up: AtomicBool,
    subscribe_up: AtomicBool,
    /// Guards against spawning more than one publish-side reconnect task.
    publish_reconnecting: AtomicBool,
}

impl Shared {
    fn lock_subscriptions(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<String, mpsc::UnboundedSender<BrokerMessage>>> {
        self.subscriptions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

// ---------------------------------------------------------------------------
// RedisBroker
// ---------------------------------------------------------------------------

/// Redis-backed pub/sub transport.
pub struct RedisBroker {
    client: redis::Client,
    publish_conn: Arc<tokio::sync::Mutex<Option<MultiplexedConnection>>>,
    command_tx: mpsc::UnboundedSender<SubCommand>,
    shared: Arc<Shared>,
    cancel: CancellationToken,
}

impl RedisBroker {
    /// Connect both sides and start the pub/sub driver task.
    pub async fn connect(broker_url: &str) -> Result<Self, BrokerError> {
        let client = redis::Client::open(broker_url)
            .map_err(|e| BrokerError::Connection(e.to_string()))?;

        let publish_conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))?;

        let shared = Arc::new(Shared {
            subscriptions: Mutex::new(HashMap::new()),
            publish_up: AtomicBool::new(true),
            subscribe_up: AtomicBool::new(true),
            publish_reconnecting: AtomicBool::new(false),
        });

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        tokio::spawn(run_subscriber(
            client.clone(),
            Arc::clone(&shared),
            command_rx,
            cancel.clone(),
        ));

        Ok(Self {
            client,
            publish_conn: Arc::new(tokio::sync::Mutex::new(Some(publish_conn))),
            command_tx,
            shared,
            cancel,
        })
    }

    /// Stop the background tasks and drop all subscriptions.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        self.shared.lock_subscriptions().clear();
    }

    /// Mark the publish side down and start one reconnect task.
    fn start_publish_reconnect(&self) {
        self.shared.publish_up.store(false, Ordering::SeqCst);
        if self
            .shared
            .publish_reconnecting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        let client = self.client.clone();
        let slot = Arc::clone(&self.publish_conn);
        let shared = Arc::clone(&self.shared);
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            for attempt in 0..MAX_RECONNECT_ATTEMPTS {
                let delay = Duration::from_millis(reconnect_delay_ms(attempt));
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }

                match client.get_multiplexed_async_connection().await {
                    Ok(conn) => {
                        *slot.lock().await = Some(conn);
                        shared.publish_up.store(true, Ordering::SeqCst);
                        shared.publish_reconnecting.store(false, Ordering::SeqCst);
                        tracing::info!(attempt, "Publish connection restored");
                        return;
                    }
                    Err(e) => {
                        tracing::warn!(
                            attempt,
                            error = %e,
                            "Publish connection attempt failed"
                        );
                    }
                }
            }
            shared.publish_reconnecting.store(false, Ordering::SeqCst);
            tracing::error!(
                attempts = MAX_RECONNECT_ATTEMPTS,
                "Giving up on publish connection, broker requires restart"
            );
        });
    }
}

impl Drop for RedisBroker {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn publish(&self, channel: &str, payload: String) -> Result<(), BrokerError> {
        let mut guard = self.publish_conn.lock().await;
        let Some(conn) = guard.as_mut() else {
            return Err(BrokerError::NotConnected);
        };

        let result: Result<i64, redis::RedisError> = redis::cmd("PUBLISH")
            .arg(channel)
            .arg(&payload)
            .query_async(conn)
            .await;

        match result {
            Ok(_receivers) => Ok(()),
            Err(e) => {
                *guard = None;
                drop(guard);
                self.start_publish_reconnect();
                Err(BrokerError::Publish {
                    channel: channel.to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }

    async fn subscribe(&self, channel: &str) -> Result<MessageReceiver, BrokerError> {
        let (sender, receiver) = mpsc::unbounded_channel();
        {
            let mut subscriptions = self.shared.lock_subscriptions();
            if subscriptions.contains_key(channel) {
                return Err(BrokerError::Subscribe {
                    channel: channel.to_string(),
                    reason: "channel already has a live subscription".to_string(),
                });
            }
            subscriptions.insert(channel.to_string(), sender);
        }

        self.command_tx
            .send(SubCommand::Subscribe(channel.to_string()))
            .map_err(|_| BrokerError::NotConnected)?;
        Ok(receiver)
    }

    async fn unsubscribe(&self, channel: &str) -> Result<(), BrokerError> {
        self.shared.lock_subscriptions().remove(channel);
        self.command_tx
            .send(SubCommand::Unsubscribe(channel.to_string()))
            .map_err(|_| BrokerError::NotConnected)?;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.shared.publish_up.load(Ordering::SeqCst)
            && self.shared.subscribe_up.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// Pub/sub driver
// ---------------------------------------------------------------------------

/// What ended one wait on the pub/sub connection.
enum Wakeup {
    Shutdown,
    Command(Option<SubCommand>),
    Message(Option<BrokerMessage>),
}

/// Long-lived task owning the subscribe-side connection.
///
/// Streams messages and applies subscription commands on the same
/// connection; on failure, reconnects with backoff and resubscribes every
/// channel that still has a live receiver.
async fn run_subscriber(
    client: redis::Client,
    shared: Arc<Shared>,
    mut command_rx: mpsc::UnboundedReceiver<SubCommand>,
    cancel: CancellationToken,
) {
    let mut attempts: u32 = 0;

    'reconnect: loop {
        if cancel.is_cancelled() {
            return;
        }

        let mut pubsub = match establish(&client, &shared).await {
            Ok(pubsub) => pubsub,
            Err(e) => {
                shared.subscribe_up.store(false, Ordering::SeqCst);
                if attempts >= MAX_RECONNECT_ATTEMPTS {
                    tracing::error!(
                        attempts,
                        error = %e,
                        "Giving up on subscribe connection, broker requires restart"
                    );
                    return;
                }
                let delay = Duration::from_millis(reconnect_delay_ms(attempts));
                attempts += 1;
                tracing::warn!(
                    attempt = attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Subscribe connection lost, reconnecting"
                );
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(delay) => continue 'reconnect,
                }
            }
        };

        shared.subscribe_up.store(true, Ordering::SeqCst);
        attempts = 0;
        tracing::info!("Subscribe connection established");

        loop {
            // The message stream borrows the connection, so scope it and
            // carry only data out of the select.
            let wakeup = {
                let mut stream = pubsub.on_message();
                tokio::select! {
                    _ = cancel.cancelled() => Wakeup::Shutdown,
                    command = command_rx.recv() => Wakeup::Command(command),
                    message = stream.next() => Wakeup::Message(message.map(decode_message)),
                }
            };

            match wakeup {
                Wakeup::Shutdown => return,
                // Handle side dropped; nothing left to serve.
                Wakeup::Command(None) => return,
                Wakeup::Command(Some(SubCommand::Subscribe(channel))) => {
                    if let Err(e) = pubsub.subscribe(&channel).await {
                        tracing::warn!(channel = %channel, error = %e, "Subscribe failed");
                        continue 'reconnect;
                    }
                }
                Wakeup::Command(Some(SubCommand::Unsubscribe(channel))) => {
                    if let Err(e) = pubsub.unsubscribe(&channel).await {
                        tracing::warn!(channel = %channel, error = %e, "Unsubscribe failed");
                        continue 'reconnect;
                    }
                }
                Wakeup::Message(Some(message)) => {
                    let subscriptions = shared.lock_subscriptions();
                    if let Some(sender) = subscriptions.get(&message.channel) {
                        if sender.send(message).is_err() {
                            tracing::debug!("Receiver dropped without unsubscribing");
                        }
                    }
                }
                Wakeup::Message(None) => {
                    // Connection closed under us.
                    shared.subscribe_up.store(false, Ordering::SeqCst);
                    tracing::warn!("Subscribe connection closed, reconnecting");
                    continue 'reconnect;
                }
            }
        }
    }
}

/// Open the pub/sub connection and restore every channel that still has
/// a live receiver. Any failure here routes through the caller's backoff.
async fn establish(
    client: &redis::Client,
    shared: &Arc<Shared>,
) -> Result<PubSub, redis::RedisError> {
    let mut pubsub = client.get_async_pubsub().await?;
    let channels: Vec<String> = shared.lock_subscriptions().keys().cloned().collect();
    for channel in &channels {
        pubsub.subscribe(channel).await?;
    }
    Ok(pubsub)
}

/// Decode a raw Redis message into a [`BrokerMessage`].
fn decode_message(msg: redis::Msg) -> BrokerMessage {
    let channel = msg.get_channel_name().to_string();
    let payload = msg.get_payload::<String>().unwrap_or_default();
    BrokerMessage { channel, payload }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_to_unreachable_broker_fails() {
        // Port 6399 should have nothing listening in CI.
        let result = RedisBroker::connect("redis://127.0.0.1:6399").await;
        assert!(result.is_err());
    }

    #[test]
    fn invalid_url_is_a_connection_error() {
        let err = redis::Client::open("not-a-url").unwrap_err();
        assert!(!err.to_string().is_empty());
    }
}
