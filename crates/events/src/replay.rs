//! Batched replay of stored events.
//!
//! [`ReplayManager`] reads candidates from the event store, refines them
//! in memory, and republishes each as a DERIVED copy marked with replay
//! metadata; the stored record itself never changes beyond its replay
//! bookkeeping. Replays run in fixed-size batches with an inter-batch
//! delay to bound the load pushed onto downstream consumers.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use campus_core::envelope::PublishOptions;
use campus_store::{EventFilters, EventStore, RecoveryCheckpoint, StoreError, StoredEvent};

use crate::bus::{EventBus, META_IS_REPLAY};
use crate::error::BusError;

/// Replay metadata keys carried on derived events.
const META_ORIGINAL_TIMESTAMP: &str = "originalTimestamp";
const META_REPLAYED_AT: &str = "replayedAt";
const META_REPLAY_COUNT: &str = "replayCount";

/// Base delay for per-event publish retries (linear: base * attempt).
const REPLAY_RETRY_BASE_MS: u64 = 1_000;

// ---------------------------------------------------------------------------
// Options / filters / results
// ---------------------------------------------------------------------------

/// Knobs for one replay run.
#[derive(Debug, Clone)]
pub struct ReplayOptions {
    /// Events republished per batch.
    pub batch_size: usize,
    /// Pause between batches.
    pub batch_delay_ms: u64,
    /// Publish attempts per event before recording a failure.
    pub max_retries: u32,
    /// Count matches and stop; no side effects at all.
    pub dry_run: bool,
}

impl Default for ReplayOptions {
    fn default() -> Self {
        Self {
            batch_size: 50,
            batch_delay_ms: 1_000,
            max_retries: 3,
            dry_run: false,
        }
    }
}

/// What to replay.
///
/// `query` drives the store lookup (one index, see [`EventFilters`]); the
/// remaining fields refine the candidates in memory, which is how
/// combinations beyond a single index are expressed.
#[derive(Debug, Clone, Default)]
pub struct ReplayFilters {
    pub query: EventFilters,
    /// Allow-list of event types; empty means all.
    pub event_types: Vec<String>,
    /// Allow-list of correlation ids; empty means all.
    pub correlation_ids: Vec<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl ReplayFilters {
    fn matches(&self, stored: &StoredEvent) -> bool {
        if !self.event_types.is_empty()
            && !self.event_types.contains(&stored.event.event_type)
        {
            return false;
        }
        if !self.correlation_ids.is_empty() {
            let Some(correlation_id) = &stored.event.correlation_id else {
                return false;
            };
            if !self.correlation_ids.contains(correlation_id) {
                return false;
            }
        }
        if self.from.is_some_and(|from| stored.event.timestamp < from) {
            return false;
        }
        if self.to.is_some_and(|to| stored.event.timestamp > to) {
            return false;
        }
        true
    }
}

/// A single failed replay, captured without aborting the batch.
#[derive(Debug, Clone)]
pub struct ReplayError {
    pub event_id: String,
    pub event_type: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Aggregate outcome of one replay run.
#[derive(Debug, Clone, Default)]
pub struct ReplayResult {
    pub total_events: u64,
    pub successful_replays: u64,
    pub failed_replays: u64,
    pub errors: Vec<ReplayError>,
    pub dry_run: bool,
}

// ---------------------------------------------------------------------------
// ReplayManager
// ---------------------------------------------------------------------------

/// Drives replays of stored events back through the bus.
pub struct ReplayManager {
    bus: Arc<EventBus>,
    store: Arc<EventStore>,
}

impl ReplayManager {
    pub fn new(bus: Arc<EventBus>, store: Arc<EventStore>) -> Self {
        Self { bus, store }
    }

    /// Replay every stored event matching the filters.
    ///
    /// With `dry_run` set, counts matches and returns without publishing
    /// or touching replay bookkeeping. Otherwise events are republished
    /// oldest-first in batches; individual failures are collected into
    /// the result rather than aborting the run.
    pub async fn replay_events(
        &self,
        filters: &ReplayFilters,
        options: &ReplayOptions,
    ) -> Result<ReplayResult, BusError> {
        let candidates = self.store.get_events(&filters.query).await?;
        let matching: Vec<StoredEvent> = candidates
            .into_iter()
            .filter(|stored| filters.matches(stored))
            .collect();

        let mut result = ReplayResult {
            total_events: matching.len() as u64,
            dry_run: options.dry_run,
            ..Default::default()
        };

        if options.dry_run {
            tracing::info!(total = result.total_events, "Replay dry run, nothing published");
            return Ok(result);
        }

        tracing::info!(
            total = result.total_events,
            batch_size = options.batch_size,
            "Starting event replay"
        );

        for (batch_index, batch) in matching.chunks(options.batch_size.max(1)).enumerate() {
            if batch_index > 0 && options.batch_delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(options.batch_delay_ms)).await;
            }
            for stored in batch {
                match self.replay_one(stored, options).await {
                    Ok(()) => result.successful_replays += 1,
                    Err(error) => {
                        tracing::warn!(
                            event_id = %stored.event.id,
                            event_type = %stored.event.event_type,
                            error = %error,
                            "Event replay failed"
                        );
                        result.failed_replays += 1;
                        result.errors.push(ReplayError {
                            event_id: stored.event.id.clone(),
                            event_type: stored.event.event_type.clone(),
                            message: error.to_string(),
                            timestamp: Utc::now(),
                        });
                    }
                }
            }
        }

        tracing::info!(
            total = result.total_events,
            succeeded = result.successful_replays,
            failed = result.failed_replays,
            "Event replay finished"
        );
        Ok(result)
    }

    /// Republish one stored event as a derived copy.
    ///
    /// Up to `max_retries` attempts with linear backoff; the stored
    /// record's replay count is only bumped once a publish goes through.
    async fn replay_one(
        &self,
        stored: &StoredEvent,
        options: &ReplayOptions,
    ) -> Result<(), BusError> {
        let mut derived = stored.event.clone();
        derived
            .metadata
            .insert(META_IS_REPLAY.to_string(), serde_json::json!(true));
        derived.metadata.insert(
            META_ORIGINAL_TIMESTAMP.to_string(),
            serde_json::json!(stored.event.timestamp.to_rfc3339()),
        );
        derived.metadata.insert(
            META_REPLAYED_AT.to_string(),
            serde_json::json!(Utc::now().to_rfc3339()),
        );
        derived.metadata.insert(
            META_REPLAY_COUNT.to_string(),
            serde_json::json!(stored.replay_count + 1),
        );

        let attempts = options.max_retries.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self
                .bus
                .publish(derived.clone(), PublishOptions::default())
                .await
            {
                Ok(()) => {
                    self.store.update_replay_count(&stored.event.id).await?;
                    return Ok(());
                }
                Err(error) if attempt >= attempts => return Err(error),
                Err(error) => {
                    tracing::warn!(
                        event_id = %stored.event.id,
                        attempt,
                        error = %error,
                        "Replay publish attempt failed, retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(
                        REPLAY_RETRY_BASE_MS * u64::from(attempt),
                    ))
                    .await;
                }
            }
        }
    }

    /// Replay everything belonging to one business transaction.
    pub async fn replay_correlated_events(
        &self,
        correlation_id: &str,
        options: &ReplayOptions,
    ) -> Result<ReplayResult, BusError> {
        self.replay_events(
            &ReplayFilters {
                query: EventFilters {
                    correlation_id: Some(correlation_id.to_string()),
                    ..Default::default()
                },
                ..Default::default()
            },
            options,
        )
        .await
    }

    /// Replay one user's events within a time window.
    pub async fn replay_user_events(
        &self,
        user_id: &str,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
        options: &ReplayOptions,
    ) -> Result<ReplayResult, BusError> {
        self.replay_events(
            &ReplayFilters {
                query: EventFilters {
                    user_id: Some(user_id.to_string()),
                    from,
                    to,
                    ..Default::default()
                },
                ..Default::default()
            },
            options,
        )
        .await
    }

    // -- checkpoints --

    /// Persist a named recovery bookmark.
    pub async fn create_checkpoint(
        &self,
        name: &str,
        last_processed_event_id: &str,
        event_count: u64,
    ) -> Result<RecoveryCheckpoint, BusError> {
        let checkpoint = RecoveryCheckpoint::new(name, last_processed_event_id, event_count);
        self.store.save_checkpoint(&checkpoint).await?;
        tracing::info!(
            checkpoint = %name,
            last_processed_event_id = %checkpoint.last_processed_event_id,
            "Checkpoint created"
        );
        Ok(checkpoint)
    }

    /// Resume replay from a checkpoint.
    ///
    /// Replays the window starting just after the checkpoint's last
    /// processed event. When that event is no longer in the store, the
    /// checkpoint's own timestamp is the fallback lower bound.
    pub async fn recover_from_checkpoint(
        &self,
        name: &str,
        options: &ReplayOptions,
    ) -> Result<ReplayResult, BusError> {
        let Some(checkpoint) = self.store.load_checkpoint(name).await? else {
            return Err(StoreError::NotFound(format!("checkpoint: {name}")).into());
        };

        let resume_from = match self
            .store
            .get_event_by_id(&checkpoint.last_processed_event_id)
            .await?
        {
            Some(last) => last.event.timestamp + chrono::Duration::milliseconds(1),
            None => checkpoint.timestamp,
        };

        tracing::info!(
            checkpoint = %name,
            resume_from = %resume_from,
            "Recovering from checkpoint"
        );

        self.replay_events(
            &ReplayFilters {
                query: EventFilters {
                    from: Some(resume_from),
                    ..Default::default()
                },
                ..Default::default()
            },
            options,
        )
        .await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
