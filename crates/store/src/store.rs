//! Append-only event log with secondary indexes.
//!
//! Key shapes on the backend:
//!
//! - `events:record:<id>` — serialized event plus its stored-at time.
//! - `events:replay:<id>` — replay bookkeeping hash (`count`, `last`),
//!   kept apart from the record so replays never rewrite history.
//! - `events:by_time`, `events:by_type:<type>`, `events:by_source:<src>`,
//!   `events:by_correlation:<id>`, `events:by_user:<id>`,
//!   `events:by_course:<id>`, `events:by_lab:<id>` — sorted indexes of
//!   event ids scored by the event timestamp in milliseconds, keeping
//!   range queries `O(log n + k)`.
//! - `events:checkpoint:<name>` plus the `events:checkpoints` index for
//!   recovery bookmarks.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use campus_core::event::DomainEvent;

use crate::backend::SortedKv;
use crate::checkpoint::RecoveryCheckpoint;
use crate::error::StoreError;

// ---------------------------------------------------------------------------
// Keys
// ---------------------------------------------------------------------------

const KEY_RECORD: &str = "events:record:";
const KEY_REPLAY: &str = "events:replay:";
const KEY_CHECKPOINT: &str = "events:checkpoint:";

const IDX_TIME: &str = "events:by_time";
const IDX_TYPE: &str = "events:by_type:";
const IDX_SOURCE: &str = "events:by_source:";
const IDX_CORRELATION: &str = "events:by_correlation:";
const IDX_USER: &str = "events:by_user:";
const IDX_COURSE: &str = "events:by_course:";
const IDX_LAB: &str = "events:by_lab:";
const IDX_CHECKPOINTS: &str = "events:checkpoints";

/// Replay hash fields.
const FIELD_REPLAY_COUNT: &str = "count";
const FIELD_REPLAY_LAST: &str = "last";

/// Payload fields that feed the entity indexes when present.
const DATA_USER_ID: &str = "userId";
const DATA_COURSE_ID: &str = "courseId";
const DATA_LAB_ID: &str = "labId";

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// What actually lands under `events:record:<id>`. Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredRecord {
    event: DomainEvent,
    stored_at: DateTime<Utc>,
}

/// A stored event with its replay bookkeeping attached.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredEvent {
    pub event: DomainEvent,
    pub stored_at: DateTime<Utc>,
    pub replay_count: u64,
    pub last_replay_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Filters
// ---------------------------------------------------------------------------

/// Query filters for [`EventStore::get_events`].
///
/// Exactly one index serves a query, chosen by precedence:
/// `correlation_id` > `event_type` > `source` > `user_id` > `course_id` >
/// `lab_id` > time range. The time bounds always apply (indexes are
/// time-scored); the remaining fields only select the index and do NOT
/// intersect. Refine in memory when combining filters.
#[derive(Debug, Clone, Default)]
pub struct EventFilters {
    pub correlation_id: Option<String>,
    pub event_type: Option<String>,
    pub source: Option<String>,
    pub user_id: Option<String>,
    pub course_id: Option<String>,
    pub lab_id: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub offset: usize,
    pub limit: Option<usize>,
}

impl EventFilters {
    /// The index key serving this query.
    fn index_key(&self) -> String {
        if let Some(id) = &self.correlation_id {
            format!("{IDX_CORRELATION}{id}")
        } else if let Some(event_type) = &self.event_type {
            format!("{IDX_TYPE}{event_type}")
        } else if let Some(source) = &self.source {
            format!("{IDX_SOURCE}{source}")
        } else if let Some(id) = &self.user_id {
            format!("{IDX_USER}{id}")
        } else if let Some(id) = &self.course_id {
            format!("{IDX_COURSE}{id}")
        } else if let Some(id) = &self.lab_id {
            format!("{IDX_LAB}{id}")
        } else {
            IDX_TIME.to_string()
        }
    }

    fn score_bounds(&self) -> (i64, i64) {
        let min = self.from.map_or(i64::MIN, |t| t.timestamp_millis());
        let max = self.to.map_or(i64::MAX, |t| t.timestamp_millis());
        (min, max)
    }
}

// ---------------------------------------------------------------------------
// EventStore
// ---------------------------------------------------------------------------

/// Durable, secondary-indexed log of published events.
pub struct EventStore {
    backend: Arc<dyn SortedKv>,
}

impl EventStore {
    pub fn new(backend: Arc<dyn SortedKv>) -> Self {
        Self { backend }
    }

    /// Append an event to the log and all applicable indexes.
    ///
    /// The record is written once; the entity indexes (user/course/lab)
    /// are only touched when the payload carries the matching id field.
    pub async fn save(&self, event: &DomainEvent) -> Result<(), StoreError> {
        let record = StoredRecord {
            event: event.clone(),
            stored_at: Utc::now(),
        };
        let body = serde_json::to_string(&record)?;
        let score = event.timestamp.timestamp_millis();
        let id = event.id.as_str();

        self.backend
            .put(&format!("{KEY_RECORD}{id}"), body)
            .await?;

        self.backend.zadd(IDX_TIME, score, id).await?;
        self.backend
            .zadd(&format!("{IDX_TYPE}{}", event.event_type), score, id)
            .await?;
        self.backend
            .zadd(&format!("{IDX_SOURCE}{}", event.source), score, id)
            .await?;

        if let Some(correlation_id) = &event.correlation_id {
            self.backend
                .zadd(&format!("{IDX_CORRELATION}{correlation_id}"), score, id)
                .await?;
        }
        for (field, prefix) in [
            (DATA_USER_ID, IDX_USER),
            (DATA_COURSE_ID, IDX_COURSE),
            (DATA_LAB_ID, IDX_LAB),
        ] {
            if let Some(value) = event.data_str(field) {
                self.backend
                    .zadd(&format!("{prefix}{value}"), score, id)
                    .await?;
            }
        }

        Ok(())
    }

    /// Fetch one stored event by id.
    pub async fn get_event_by_id(&self, id: &str) -> Result<Option<StoredEvent>, StoreError> {
        let Some(body) = self.backend.get(&format!("{KEY_RECORD}{id}")).await? else {
            return Ok(None);
        };
        let record: StoredRecord = serde_json::from_str(&body)?;
        Ok(Some(self.attach_replay_info(record).await?))
    }

    /// Query stored events via exactly one secondary index.
    ///
    /// See [`EventFilters`] for index precedence. Results are ascending
    /// by event timestamp; `offset`/`limit` page through the ordered id
    /// set before records are batch-fetched.
    pub async fn get_events(&self, filters: &EventFilters) -> Result<Vec<StoredEvent>, StoreError> {
        let (min, max) = filters.score_bounds();
        let ids = self
            .backend
            .zrange_by_score(&filters.index_key(), min, max)
            .await?;

        let page: Vec<String> = ids
            .into_iter()
            .skip(filters.offset)
            .take(filters.limit.unwrap_or(usize::MAX))
            .map(|id| format!("{KEY_RECORD}{id}"))
            .collect();

        let bodies = self.backend.get_many(&page).await?;
        let mut events = Vec::with_capacity(bodies.len());
        for body in bodies.into_iter().flatten() {
            let record: StoredRecord = serde_json::from_str(&body)?;
            events.push(self.attach_replay_info(record).await?);
        }
        Ok(events)
    }

    /// All events whose timestamp falls in `from..=to`.
    pub async fn get_events_by_time_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<StoredEvent>, StoreError> {
        self.get_events(&EventFilters {
            from: Some(from),
            to: Some(to),
            ..Default::default()
        })
        .await
    }

    /// All events of one type, oldest first.
    pub async fn get_events_by_type(
        &self,
        event_type: &str,
    ) -> Result<Vec<StoredEvent>, StoreError> {
        self.get_events(&EventFilters {
            event_type: Some(event_type.to_string()),
            ..Default::default()
        })
        .await
    }

    /// Record one replay of a stored event.
    ///
    /// Atomic increment plus a last-replay timestamp write; the event
    /// record itself is never touched. Returns the new replay count.
    pub async fn update_replay_count(&self, id: &str) -> Result<u64, StoreError> {
        let key = format!("{KEY_REPLAY}{id}");
        let count = self.backend.hincr(&key, FIELD_REPLAY_COUNT, 1).await?;
        self.backend
            .hset(&key, FIELD_REPLAY_LAST, Utc::now().to_rfc3339())
            .await?;
        Ok(count.max(0) as u64)
    }

    async fn attach_replay_info(&self, record: StoredRecord) -> Result<StoredEvent, StoreError> {
        let key = format!("{KEY_REPLAY}{}", record.event.id);
        let replay_count = self
            .backend
            .hget(&key, FIELD_REPLAY_COUNT)
            .await?
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0);
        let last_replay_at = self
            .backend
            .hget(&key, FIELD_REPLAY_LAST)
            .await?
            .and_then(|v| DateTime::parse_from_rfc3339(&v).ok())
            .map(|t| t.with_timezone(&Utc));

        Ok(StoredEvent {
            event: record.event,
            stored_at: record.stored_at,
            replay_count,
            last_replay_at,
        })
    }

    // -- checkpoints --

    /// Persist a recovery checkpoint under its name.
    pub async fn save_checkpoint(
        &self,
        checkpoint: &RecoveryCheckpoint,
    ) -> Result<(), StoreError> {
        let body = serde_json::to_string(checkpoint)?;
        self.backend
            .put(&format!("{KEY_CHECKPOINT}{}", checkpoint.name), body)
            .await?;
        self.backend
            .zadd(
                IDX_CHECKPOINTS,
                checkpoint.timestamp.timestamp_millis(),
                &checkpoint.name,
            )
            .await?;
        Ok(())
    }

    /// Load a checkpoint by name.
    pub async fn load_checkpoint(
        &self,
        name: &str,
    ) -> Result<Option<RecoveryCheckpoint>, StoreError> {
        let Some(body) = self.backend.get(&format!("{KEY_CHECKPOINT}{name}")).await? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_str(&body)?))
    }

    /// All checkpoints, oldest first.
    pub async fn list_checkpoints(&self) -> Result<Vec<RecoveryCheckpoint>, StoreError> {
        let names = self
            .backend
            .zrange_by_score(IDX_CHECKPOINTS, i64::MIN, i64::MAX)
            .await?;
        let keys: Vec<String> = names
            .iter()
            .map(|name| format!("{KEY_CHECKPOINT}{name}"))
            .collect();

        let bodies = self.backend.get_many(&keys).await?;
        let mut checkpoints = Vec::with_capacity(bodies.len());
        for body in bodies.into_iter().flatten() {
            checkpoints.push(serde_json::from_str(&body)?);
        }
        Ok(checkpoints)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryKv;
    use chrono::Duration;

    fn store() -> EventStore {
        EventStore::new(Arc::new(MemoryKv::new()))
    }

    fn event_at(event_type: &str, source: &str, at: DateTime<Utc>) -> DomainEvent {
        let mut event = DomainEvent::new(event_type, source);
        event.timestamp = at;
        event
    }

    // -- save / fetch --

    #[tokio::test]
    async fn save_then_fetch_by_id() {
        let store = store();
        let event = DomainEvent::new("payment.succeeded", "payments")
            .with_data(serde_json::json!({"amount": 10.0, "userId": "u-1"}));
        store.save(&event).await.unwrap();

        let stored = store.get_event_by_id(&event.id).await.unwrap().unwrap();
        assert_eq!(stored.event, event);
        assert_eq!(stored.replay_count, 0);
        assert!(stored.last_replay_at.is_none());
    }

    #[tokio::test]
    async fn missing_id_returns_none() {
        assert!(store().get_event_by_id("nope").await.unwrap().is_none());
    }

    // -- index selection --

    #[tokio::test]
    async fn type_index_returns_only_that_type() {
        let store = store();
        let now = Utc::now();
        store
            .save(&event_at("course.enrolled", "course", now))
            .await
            .unwrap();
        store
            .save(&event_at("payment.succeeded", "payments", now))
            .await
            .unwrap();

        let events = store.get_events_by_type("course.enrolled").await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event.event_type, "course.enrolled");
    }

    #[tokio::test]
    async fn correlation_index_wins_over_type_filter() {
        let store = store();
        let now = Utc::now();
        let correlated = event_at("payment.succeeded", "payments", now).with_correlation("ord-1");
        let other = event_at("payment.refunded", "payments", now).with_correlation("ord-1");
        let unrelated = event_at("payment.succeeded", "payments", now);
        store.save(&correlated).await.unwrap();
        store.save(&other).await.unwrap();
        store.save(&unrelated).await.unwrap();

        // correlation_id selects the index; event_type does not intersect.
        let events = store
            .get_events(&EventFilters {
                correlation_id: Some("ord-1".to_string()),
                event_type: Some("payment.succeeded".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e
            .event
            .correlation_id
            .as_deref()
            == Some("ord-1")));
    }

    #[tokio::test]
    async fn entity_indexes_are_fed_from_payload_fields() {
        let store = store();
        let now = Utc::now();
        store
            .save(
                &event_at("course.enrolled", "course", now)
                    .with_data(serde_json::json!({"userId": "u-1", "courseId": "c-1"})),
            )
            .await
            .unwrap();
        store
            .save(
                &event_at("lab.started", "labs", now)
                    .with_data(serde_json::json!({"userId": "u-1", "labId": "l-1"})),
            )
            .await
            .unwrap();

        let by_user = store
            .get_events(&EventFilters {
                user_id: Some("u-1".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(by_user.len(), 2);

        let by_lab = store
            .get_events(&EventFilters {
                lab_id: Some("l-1".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(by_lab.len(), 1);
        assert_eq!(by_lab[0].event.event_type, "lab.started");
    }

    // -- time range + pagination --

    #[tokio::test]
    async fn time_range_bounds_apply_on_any_index() {
        let store = store();
        let base = Utc::now();
        for hours_ago in [3, 2, 1] {
            store
                .save(&event_at(
                    "user.login",
                    "auth",
                    base - Duration::hours(hours_ago),
                ))
                .await
                .unwrap();
        }

        let window = store
            .get_events(&EventFilters {
                event_type: Some("user.login".to_string()),
                from: Some(base - Duration::hours(2) - Duration::minutes(5)),
                to: Some(base),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(window.len(), 2);
    }

    #[tokio::test]
    async fn events_come_back_oldest_first_with_pagination() {
        let store = store();
        let base = Utc::now();
        let mut ids = Vec::new();
        for i in 0..5 {
            let event = event_at("user.login", "auth", base + Duration::seconds(i));
            ids.push(event.id.clone());
            store.save(&event).await.unwrap();
        }

        let all = store.get_events_by_type("user.login").await.unwrap();
        let got: Vec<&str> = all.iter().map(|e| e.event.id.as_str()).collect();
        assert_eq!(got, ids.iter().map(String::as_str).collect::<Vec<_>>());

        let page = store
            .get_events(&EventFilters {
                event_type: Some("user.login".to_string()),
                offset: 1,
                limit: Some(2),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].event.id, ids[1]);
        assert_eq!(page[1].event.id, ids[2]);
    }

    // -- replay bookkeeping --

    #[tokio::test]
    async fn replay_count_moves_while_history_stays_identical() {
        let store = store();
        let event = DomainEvent::new("payment.succeeded", "payments")
            .with_data(serde_json::json!({"amount": 10.0}));
        store.save(&event).await.unwrap();

        let before = store.get_event_by_id(&event.id).await.unwrap().unwrap();
        let before_bytes = serde_json::to_string(&before.event).unwrap();

        assert_eq!(store.update_replay_count(&event.id).await.unwrap(), 1);
        assert_eq!(store.update_replay_count(&event.id).await.unwrap(), 2);
        assert_eq!(store.update_replay_count(&event.id).await.unwrap(), 3);

        let after = store.get_event_by_id(&event.id).await.unwrap().unwrap();
        assert_eq!(after.replay_count, 3);
        assert!(after.last_replay_at.is_some());
        assert_eq!(serde_json::to_string(&after.event).unwrap(), before_bytes);
    }

    // -- checkpoints --

    #[tokio::test]
    async fn checkpoint_round_trip_and_listing() {
        let store = store();
        let mut first = RecoveryCheckpoint::new("nightly", "evt-1", 10);
        first.timestamp = Utc::now() - Duration::hours(1);
        let second = RecoveryCheckpoint::new("ledger", "evt-2", 20);

        store.save_checkpoint(&second).await.unwrap();
        store.save_checkpoint(&first).await.unwrap();

        let loaded = store.load_checkpoint("nightly").await.unwrap().unwrap();
        assert_eq!(loaded, first);
        assert!(store.load_checkpoint("missing").await.unwrap().is_none());

        let all = store.list_checkpoints().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].name, "nightly");
        assert_eq!(all[1].name, "ledger");
    }

    #[tokio::test]
    async fn saving_a_checkpoint_name_twice_replaces_it() {
        let store = store();
        store
            .save_checkpoint(&RecoveryCheckpoint::new("nightly", "evt-1", 10))
            .await
            .unwrap();
        store
            .save_checkpoint(&RecoveryCheckpoint::new("nightly", "evt-9", 99))
            .await
            .unwrap();

        let all = store.list_checkpoints().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].last_processed_event_id, "evt-9");
    }
}
