//! The consumer seam.
//!
//! Delivery is at-least-once: retries and replays can both invoke a
//! handler more than once for the same logical event, and the bus does no
//! consumer-side deduplication. Handlers must be idempotent, keying on
//! `event.id` where necessary.

use async_trait::async_trait;

use campus_core::envelope::EventEnvelope;
use campus_core::event::DomainEvent;

// ---------------------------------------------------------------------------
// HandlerError
// ---------------------------------------------------------------------------

/// Failure reported by a handler. Any error enters the bus's retry and
/// dead-letter machinery; it never propagates to the publisher.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct HandlerError(String);

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

// ---------------------------------------------------------------------------
// EventHandler
// ---------------------------------------------------------------------------

/// A subscriber for one or more event types.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Stable name identifying this handler in the registry and in logs.
    fn name(&self) -> &str;

    /// Process one delivery.
    ///
    /// Runs raced against the bus's configured timeout; exceeding it
    /// counts as a failure and enters the retry path.
    async fn handle(
        &self,
        event: &DomainEvent,
        envelope: &EventEnvelope,
    ) -> Result<(), HandlerError>;

    /// Called after a failed or timed-out [`handle`](EventHandler::handle)
    /// before the bus decides between retry and dead-letter. Failures in
    /// this callback are contained by the bus.
    async fn on_error(
        &self,
        _error: &HandlerError,
        _event: &DomainEvent,
        _envelope: &EventEnvelope,
    ) {
    }
}
