//! Durable event log for the campus event bus.
//!
//! [`EventStore`] keeps an append-only record of every published event
//! plus the secondary indexes needed for replay: by time, type, source,
//! correlation id, and (when the payload carries one) user/course/lab id.
//! It runs over any [`SortedKv`] backend: [`RedisKv`] in production,
//! [`MemoryKv`] in tests and single-process deployments.

pub mod backend;
pub mod checkpoint;
pub mod error;
pub mod redis_kv;
pub mod store;

pub use backend::{MemoryKv, SortedKv};
pub use checkpoint::RecoveryCheckpoint;
pub use error::StoreError;
pub use redis_kv::RedisKv;
pub use store::{EventFilters, EventStore, StoredEvent};
