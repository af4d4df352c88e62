//! Replay recovery checkpoints.
//!
//! A checkpoint is a named bookmark into the event log: after an outage,
//! a replay can resume from the last event a consumer group is known to
//! have processed instead of re-reading the whole log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// A named bookmark usable to resume replay after an outage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryCheckpoint {
    pub id: String,
    pub name: String,
    /// When the checkpoint was taken.
    pub timestamp: DateTime<Utc>,
    /// Id of the last event known to be fully processed.
    pub last_processed_event_id: String,
    /// Events processed up to this bookmark.
    pub event_count: u64,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl RecoveryCheckpoint {
    /// Create a checkpoint with a fresh id and the current timestamp.
    pub fn new(
        name: impl Into<String>,
        last_processed_event_id: impl Into<String>,
        event_count: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            timestamp: Utc::now(),
            last_processed_event_id: last_processed_event_id.into(),
            event_count,
            metadata: Map::new(),
        }
    }

    /// Attach a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
