//! Campus event bus and replay infrastructure.
//!
//! This crate provides the platform-wide publish/subscribe surface:
//!
//! - [`EventBus`] — validate, route, and publish domain events; dispatch
//!   incoming envelopes to registered handlers with timeout, retry, and
//!   dead-letter handling; per-type delivery metrics.
//! - [`EventHandler`] — the consumer seam, registered via
//!   [`EventBus::subscribe`].
//! - [`ReplayManager`] — batched replay of stored events with filtering,
//!   dry-run, and checkpoint-based recovery.

pub mod bus;
pub mod error;
pub mod handler;
pub mod replay;

pub use bus::EventBus;
pub use error::BusError;
pub use handler::{EventHandler, HandlerError};
pub use replay::{ReplayError, ReplayFilters, ReplayManager, ReplayOptions, ReplayResult};
