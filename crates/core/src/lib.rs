//! Campus event system domain logic.
//!
//! This crate holds the pure building blocks of the platform event bus
//! (no I/O, no internal dependencies) so they can be shared by the broker,
//! store, and bus crates as well as any future worker or CLI tooling:
//!
//! - [`DomainEvent`] — the canonical domain event and its builder.
//! - [`EventEnvelope`] — delivery wrapper carrying retry/priority/expiry
//!   metadata, plus the dead-letter wire format.
//! - [`SchemaRegistry`] — per-event-type structural validation.
//! - [`ChannelMap`] — prefix-based event-type to channel routing.
//! - [`backoff`] — retry and reconnect delay math.
//! - [`MetricsRegistry`] — per-event-type delivery accounting.
//! - [`BusConfig`] — construction-time bus configuration.

pub mod backoff;
pub mod catalog;
pub mod config;
pub mod envelope;
pub mod error;
pub mod event;
pub mod metrics;
pub mod routing;
pub mod schema;

pub use config::BusConfig;
pub use envelope::{DeadLetterMessage, EventEnvelope, Priority, PublishOptions};
pub use error::CoreError;
pub use event::DomainEvent;
pub use metrics::{EventMetrics, MetricsRegistry};
pub use routing::ChannelMap;
pub use schema::{EventSchema, FieldType, SchemaRegistry, ValidationReport};
