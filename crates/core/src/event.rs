//! The canonical domain event.
//!
//! [`DomainEvent`] is the unit of communication between platform services.
//! It is constructed via [`DomainEvent::new`] and enriched with the builder
//! methods [`with_data`](DomainEvent::with_data),
//! [`with_correlation`](DomainEvent::with_correlation),
//! [`with_causation`](DomainEvent::with_causation), and
//! [`with_metadata`](DomainEvent::with_metadata).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Event schema version stamped on newly built events.
pub const EVENT_VERSION: &str = "1.0";

// ---------------------------------------------------------------------------
// DomainEvent
// ---------------------------------------------------------------------------

/// A domain event that occurred on the platform.
///
/// Field names on the wire are camelCase (`correlationId`, not
/// `correlation_id`) so that existing consumers keep decoding without
/// changes. Decoding tolerates unknown fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainEvent {
    /// Globally unique id for this logical occurrence.
    pub id: String,

    /// Dot-separated event name, e.g. `"payment.succeeded"`. The prefix
    /// determines broker channel routing.
    #[serde(rename = "type")]
    pub event_type: String,

    /// Schema version of the event shape.
    pub version: String,

    /// When the event occurred (UTC).
    pub timestamp: DateTime<Utc>,

    /// Name of the emitting service.
    pub source: String,

    /// Groups events belonging to one business transaction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,

    /// Id of the event that directly caused this one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub causation_id: Option<String>,

    /// Free-form transport metadata (replay markers, trace ids, ...).
    #[serde(default)]
    pub metadata: Map<String, Value>,

    /// Event-specific payload, validated against the schema registry.
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl DomainEvent {
    /// Create a new event with a fresh id and the current timestamp.
    ///
    /// All optional fields default to `None` / empty maps.
    pub fn new(event_type: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            event_type: event_type.into(),
            version: EVENT_VERSION.to_string(),
            timestamp: Utc::now(),
            source: source.into(),
            correlation_id: None,
            causation_id: None,
            metadata: Map::new(),
            data: Map::new(),
        }
    }

    /// Set the event payload.
    ///
    /// Non-object values are wrapped under a `"value"` key so that `data`
    /// is always a map.
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = match data {
            Value::Object(map) => map,
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                map
            }
        };
        self
    }

    /// Attach a correlation id grouping this event into a transaction.
    pub fn with_correlation(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Record the id of the event that caused this one.
    pub fn with_causation(mut self, causation_id: impl Into<String>) -> Self {
        self.causation_id = Some(causation_id.into());
        self
    }

    /// Insert a single metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// The domain prefix of the event type (`"payment"` for
    /// `"payment.succeeded"`), or the whole type when not namespaced.
    pub fn domain(&self) -> &str {
        self.event_type
            .split_once('.')
            .map_or(self.event_type.as_str(), |(domain, _)| domain)
    }

    /// Look up a string field in `data`.
    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
