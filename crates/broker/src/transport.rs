//! The broker transport seam.
//!
//! One subscription per channel: the bus multiplexes its own handlers on
//! top, so a second `subscribe` for a channel that already has a live
//! receiver is an error rather than a silent replacement.

use async_trait::async_trait;
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// A raw message delivered on a broker channel.
#[derive(Debug, Clone)]
pub struct BrokerMessage {
    pub channel: String,
    /// Serialized envelope body, JSON on the wire.
    pub payload: String,
}

/// Receiving half of a channel subscription.
pub type MessageReceiver = mpsc::UnboundedReceiver<BrokerMessage>;

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// The transport has no usable connection.
    #[error("Not connected to broker")]
    NotConnected,

    /// Establishing a connection failed.
    #[error("Broker connection failed: {0}")]
    Connection(String),

    /// A publish command failed after the connection was established.
    #[error("Publish on channel {channel} failed: {reason}")]
    Publish { channel: String, reason: String },

    /// A subscribe/unsubscribe command failed.
    #[error("Subscription change for channel {channel} failed: {reason}")]
    Subscribe { channel: String, reason: String },
}

// ---------------------------------------------------------------------------
// Broker
// ---------------------------------------------------------------------------

/// A channel-routed pub/sub transport.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Publish a payload to a channel.
    async fn publish(&self, channel: &str, payload: String) -> Result<(), BrokerError>;

    /// Subscribe to a channel, returning the stream of its messages.
    ///
    /// The subscription stays active until [`unsubscribe`](Broker::unsubscribe)
    /// is called for the channel or the broker shuts down.
    async fn subscribe(&self, channel: &str) -> Result<MessageReceiver, BrokerError>;

    /// Drop the subscription for a channel.
    async fn unsubscribe(&self, channel: &str) -> Result<(), BrokerError>;

    /// Whether both transport directions are currently usable.
    fn is_connected(&self) -> bool;
}
