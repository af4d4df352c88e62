//! Broker transports for the campus event bus.
//!
//! The bus speaks to its broker through the [`Broker`] trait:
//!
//! - [`RedisBroker`] — production transport over Redis pub/sub, with two
//!   long-lived connections (publish and subscribe) that reconnect
//!   independently with exponential backoff.
//! - [`MemoryBroker`] — in-process transport for tests and single-process
//!   deployments.

pub mod memory;
pub mod redis;
pub mod transport;

pub use memory::MemoryBroker;
pub use self::redis::RedisBroker;
pub use transport::{Broker, BrokerError, BrokerMessage, MessageReceiver};
