//! Delivery envelope and dead-letter wire formats.
//!
//! An [`EventEnvelope`] wraps a [`DomainEvent`] with the delivery metadata
//! the bus needs for retries, priorities, and expiry. The envelope is what
//! actually travels over the broker; it is mutated in place as retries
//! accumulate and discarded once the event is delivered or dead-lettered.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::event::DomainEvent;

// ---------------------------------------------------------------------------
// Priority
// ---------------------------------------------------------------------------

/// Delivery priority hint carried on the envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl Priority {
    /// String representation used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Critical => "critical",
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Medium
    }
}

// ---------------------------------------------------------------------------
// PublishOptions
// ---------------------------------------------------------------------------

/// Per-publish overrides accepted by `EventBus::publish`.
#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    /// Delivery priority, `Medium` when unset.
    pub priority: Option<Priority>,
    /// Retry budget override; the bus config value applies when unset.
    pub max_retries: Option<u32>,
    /// Delay the broker publish by this many milliseconds (0 = immediate).
    pub delay_ms: u64,
    /// Hard delivery deadline; expired envelopes are dropped undelivered.
    pub expires_at: Option<DateTime<Utc>>,
    /// Extra transport headers copied onto the envelope.
    pub headers: HashMap<String, String>,
}

// ---------------------------------------------------------------------------
// EventEnvelope
// ---------------------------------------------------------------------------

/// Delivery wrapper around a [`DomainEvent`].
///
/// Serialized as the broker message body, camelCase on the wire. Decoding
/// tolerates unknown fields in `headers` and the nested event `metadata`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    pub event: DomainEvent,

    #[serde(default)]
    pub priority: Priority,

    /// Delivery attempts consumed so far.
    #[serde(default)]
    pub retry_count: u32,

    /// Retry budget for this envelope.
    pub max_retries: u32,

    /// Backoff delay applied before the next (re)publish.
    #[serde(default)]
    pub delay_ms: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl EventEnvelope {
    /// Wrap an event for delivery, applying per-publish options over the
    /// given default retry budget.
    pub fn wrap(event: DomainEvent, options: PublishOptions, default_max_retries: u32) -> Self {
        Self {
            event,
            priority: options.priority.unwrap_or_default(),
            retry_count: 0,
            max_retries: options.max_retries.unwrap_or(default_max_retries),
            delay_ms: options.delay_ms,
            expires_at: options.expires_at,
            headers: options.headers,
        }
    }

    /// Whether the envelope's delivery deadline has passed at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|deadline| deadline <= now)
    }

    /// Whether another retry attempt is allowed.
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }
}

// ---------------------------------------------------------------------------
// Dead letters
// ---------------------------------------------------------------------------

/// Serialized failure attached to a dead-lettered envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterError {
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Message published to `dlq:<channel>` once an envelope exhausts its
/// retry budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterMessage {
    pub original_event: DomainEvent,
    pub original_envelope: EventEnvelope,
    pub error: DeadLetterError,
    pub failed_at: DateTime<Utc>,
}

impl DeadLetterMessage {
    /// Build a dead-letter record for a failed envelope.
    pub fn new(envelope: EventEnvelope, error_message: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            original_event: envelope.event.clone(),
            original_envelope: envelope,
            error: DeadLetterError {
                message: error_message.into(),
                timestamp: now,
            },
            failed_at: now,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn event() -> DomainEvent {
        DomainEvent::new("payment.succeeded", "payments")
    }

    // -- wrap --

    #[test]
    fn wrap_applies_defaults() {
        let envelope = EventEnvelope::wrap(event(), PublishOptions::default(), 3);
        assert_eq!(envelope.priority, Priority::Medium);
        assert_eq!(envelope.retry_count, 0);
        assert_eq!(envelope.max_retries, 3);
        assert_eq!(envelope.delay_ms, 0);
        assert!(envelope.expires_at.is_none());
        assert!(envelope.headers.is_empty());
    }

    #[test]
    fn wrap_prefers_option_overrides() {
        let options = PublishOptions {
            priority: Some(Priority::Critical),
            max_retries: Some(7),
            delay_ms: 250,
            ..Default::default()
        };
        let envelope = EventEnvelope::wrap(event(), options, 3);
        assert_eq!(envelope.priority, Priority::Critical);
        assert_eq!(envelope.max_retries, 7);
        assert_eq!(envelope.delay_ms, 250);
    }

    // -- expiry --

    #[test]
    fn expiry_checks_against_given_now() {
        let mut envelope = EventEnvelope::wrap(event(), PublishOptions::default(), 3);
        let now = Utc::now();

        assert!(!envelope.is_expired(now));

        envelope.expires_at = Some(now - Duration::seconds(1));
        assert!(envelope.is_expired(now));

        envelope.expires_at = Some(now + Duration::seconds(60));
        assert!(!envelope.is_expired(now));
    }

    // -- retries --

    #[test]
    fn can_retry_until_budget_exhausted() {
        let mut envelope = EventEnvelope::wrap(event(), PublishOptions::default(), 2);
        assert!(envelope.can_retry());
        envelope.retry_count = 1;
        assert!(envelope.can_retry());
        envelope.retry_count = 2;
        assert!(!envelope.can_retry());
    }

    // -- wire format --

    #[test]
    fn envelope_wire_names_are_camel_case() {
        let envelope = EventEnvelope::wrap(event(), PublishOptions::default(), 3);
        let json = serde_json::to_value(&envelope).unwrap();

        assert_eq!(json["retryCount"], 0);
        assert_eq!(json["maxRetries"], 3);
        assert_eq!(json["priority"], "medium");
        assert_eq!(json["event"]["type"], "payment.succeeded");
    }

    #[test]
    fn envelope_decode_tolerates_unknown_fields() {
        let json = r#"{
            "event": {
                "id": "e-1",
                "type": "lab.started",
                "version": "1.0",
                "timestamp": "2026-01-10T12:00:00Z",
                "source": "labs",
                "data": {},
                "metadata": {"futureMarker": [1, 2, 3]}
            },
            "priority": "high",
            "retryCount": 1,
            "maxRetries": 3,
            "delayMs": 1000,
            "headers": {"x-tenant": "t-1"},
            "futureEnvelopeField": "ignored"
        }"#;

        let envelope: EventEnvelope = serde_json::from_str(json).unwrap();
        assert_eq!(envelope.priority, Priority::High);
        assert_eq!(envelope.retry_count, 1);
        assert_eq!(envelope.headers["x-tenant"], "t-1");
        assert_eq!(envelope.event.metadata["futureMarker"], serde_json::json!([1, 2, 3]));
    }

    #[test]
    fn dead_letter_carries_event_and_envelope() {
        let envelope = EventEnvelope::wrap(event(), PublishOptions::default(), 3);
        let event_id = envelope.event.id.clone();

        let dead = DeadLetterMessage::new(envelope, "handler timed out");
        assert_eq!(dead.original_event.id, event_id);
        assert_eq!(dead.original_envelope.event.id, event_id);
        assert_eq!(dead.error.message, "handler timed out");

        let json = serde_json::to_value(&dead).unwrap();
        assert!(json.get("originalEvent").is_some());
        assert!(json.get("originalEnvelope").is_some());
        assert!(json.get("failedAt").is_some());
    }
}
