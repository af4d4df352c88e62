//! Per-event-type delivery accounting.
//!
//! [`MetricsRegistry`] is process-local bookkeeping owned by the bus:
//! created at startup, rebuilt empty after a restart. Recording methods
//! take `&mut self`; the bus guards the registry with its own lock.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

// ---------------------------------------------------------------------------
// EventMetrics
// ---------------------------------------------------------------------------

/// Counters for one event type.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EventMetrics {
    /// Successful `publish` calls.
    pub published: u64,
    /// Envelopes received off the wire, expired ones included.
    pub received: u64,
    /// Handler invocations observed (successes and failures).
    pub event_count: u64,
    /// Cumulative handler execution time across successful invocations.
    pub processing_time_ms: u64,
    /// Successful handler invocations.
    pub processed_count: u64,
    /// Handler failures, timeouts included.
    pub error_count: u64,
    /// Retries scheduled after failures.
    pub retry_count: u64,
    /// When a handler last completed successfully.
    pub last_processed: Option<DateTime<Utc>>,
}

impl EventMetrics {
    /// Running average of successful handler execution time.
    pub fn average_processing_time_ms(&self) -> f64 {
        if self.processed_count == 0 {
            return 0.0;
        }
        self.processing_time_ms as f64 / self.processed_count as f64
    }

    /// Delivery success rate as a percentage.
    ///
    /// `(processed - errors) / processed * 100` with
    /// `processed = event_count - retry_count`. Returns 100 before any
    /// delivery has been observed. Retry-heavy types can yield negative
    /// rates; the figure is a health signal, not a probability.
    pub fn success_rate(&self) -> f64 {
        let processed = self.event_count.saturating_sub(self.retry_count);
        if processed == 0 {
            return 100.0;
        }
        (processed as f64 - self.error_count as f64) / processed as f64 * 100.0
    }
}

// ---------------------------------------------------------------------------
// MetricsRegistry
// ---------------------------------------------------------------------------

/// Metrics for every event type seen since process start.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    by_type: HashMap<String, EventMetrics>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&mut self, event_type: &str) -> &mut EventMetrics {
        self.by_type.entry(event_type.to_string()).or_default()
    }

    pub fn record_published(&mut self, event_type: &str) {
        self.entry(event_type).published += 1;
    }

    pub fn record_received(&mut self, event_type: &str) {
        self.entry(event_type).received += 1;
    }

    /// Record a successful handler invocation and its duration.
    pub fn record_processed(&mut self, event_type: &str, elapsed_ms: u64) {
        let metrics = self.entry(event_type);
        metrics.event_count += 1;
        metrics.processed_count += 1;
        metrics.processing_time_ms += elapsed_ms;
        metrics.last_processed = Some(Utc::now());
    }

    /// Record a failed handler invocation (error or timeout).
    pub fn record_failed(&mut self, event_type: &str) {
        let metrics = self.entry(event_type);
        metrics.event_count += 1;
        metrics.error_count += 1;
    }

    /// Record that a failed delivery was scheduled for retry.
    pub fn record_retried(&mut self, event_type: &str) {
        self.entry(event_type).retry_count += 1;
    }

    /// Metrics for one event type, if any activity was recorded.
    pub fn get(&self, event_type: &str) -> Option<&EventMetrics> {
        self.by_type.get(event_type)
    }

    /// Point-in-time copy of all per-type metrics.
    pub fn snapshot(&self) -> HashMap<String, EventMetrics> {
        self.by_type.clone()
    }

    /// Whether any activity has been recorded at all.
    pub fn is_empty(&self) -> bool {
        self.by_type.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
