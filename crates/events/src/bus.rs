//! Publish/subscribe façade for platform domain events.
//!
//! [`EventBus`] is constructed once at process start and shared via
//! `Arc<EventBus>`; producers call [`publish`](EventBus::publish) and
//! consumers register [`EventHandler`]s via
//! [`subscribe`](EventBus::subscribe). Incoming envelopes are dispatched
//! with a per-bus handler timeout; failures retry with capped exponential
//! backoff and finally land on the channel's dead-letter queue.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use campus_broker::{Broker, RedisBroker};
use campus_core::backoff::next_retry_delay_ms;
use campus_core::config::BusConfig;
use campus_core::envelope::{DeadLetterMessage, EventEnvelope, PublishOptions};
use campus_core::error::CoreError;
use campus_core::event::DomainEvent;
use campus_core::metrics::{EventMetrics, MetricsRegistry};
use campus_core::routing::dlq_channel_for;
use campus_core::schema::SchemaRegistry;
use campus_store::{EventStore, RedisKv};

use crate::error::BusError;
use crate::handler::{EventHandler, HandlerError};

/// How often per-type metrics are written to the log when enabled.
const METRICS_REPORT_INTERVAL: Duration = Duration::from_secs(60);

/// Metadata key marking a replayed event. Replayed events are not
/// re-persisted; the stored record is history.
pub(crate) const META_IS_REPLAY: &str = "isReplay";

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// State shared between the bus handle and its dispatch tasks.
struct BusShared {
    config: BusConfig,
    broker: Arc<dyn Broker>,
    store: Option<Arc<EventStore>>,
    schemas: SchemaRegistry,
    handlers: RwLock<HashMap<String, Vec<Arc<dyn EventHandler>>>>,
    metrics: Mutex<MetricsRegistry>,
    cancel: CancellationToken,
}

impl BusShared {
    fn lock_metrics(&self) -> std::sync::MutexGuard<'_, MetricsRegistry> {
        self.metrics.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn handlers_for(&self, event_type: &str) -> Vec<Arc<dyn EventHandler>> {
        self.handlers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(event_type)
            .cloned()
            .unwrap_or_default()
    }

    /// Serialize and publish an envelope to a channel.
    async fn publish_envelope(
        &self,
        channel: &str,
        envelope: &EventEnvelope,
    ) -> Result<(), BusError> {
        let body = serde_json::to_string(envelope).map_err(CoreError::from)?;
        self.broker.publish(channel, body).await?;
        Ok(())
    }

    /// Decode and dispatch one incoming broker message.
    async fn handle_incoming(self: Arc<Self>, channel: String, payload: String) {
        let envelope: EventEnvelope = match serde_json::from_str(&payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(channel = %channel, error = %e, "Discarding undecodable message");
                return;
            }
        };
        let event_type = envelope.event.event_type.clone();

        if self.config.enable_metrics {
            self.lock_metrics().record_received(&event_type);
        }

        // Expiry is a hard ceiling: past the deadline the handler must
        // never run, and only the receipt above is counted.
        if envelope.is_expired(Utc::now()) {
            tracing::debug!(
                event_type = %event_type,
                event_id = %envelope.event.id,
                "Dropping expired envelope"
            );
            return;
        }

        let handlers = self.handlers_for(&event_type);
        if handlers.is_empty() {
            return;
        }

        let mut first_error: Option<HandlerError> = None;
        let mut failed: Vec<Arc<dyn EventHandler>> = Vec::new();

        for handler in handlers {
            match self.invoke_handler(Arc::clone(&handler), &envelope).await {
                Ok(elapsed_ms) => {
                    if self.config.enable_metrics {
                        self.lock_metrics().record_processed(&event_type, elapsed_ms);
                    }
                }
                Err(error) => {
                    if self.config.enable_metrics {
                        self.lock_metrics().record_failed(&event_type);
                    }
                    tracing::warn!(
                        event_type = %event_type,
                        event_id = %envelope.event.id,
                        handler = handler.name(),
                        error = %error,
                        "Handler failed"
                    );
                    if first_error.is_none() {
                        first_error = Some(error);
                    }
                    failed.push(handler);
                }
            }
        }

        // One retry envelope per delivery, even when several handlers
        // failed; the republish re-runs every handler for the type.
        if let Some(error) = first_error {
            self.handle_event_error(channel, envelope, error, failed).await;
        }
    }

    /// Run one handler raced against the bus timeout.
    ///
    /// The handler runs on its own task: a timeout stops the bus waiting
    /// but does not cancel the handler's side effects, and a panic is
    /// contained as an ordinary failure.
    async fn invoke_handler(
        &self,
        handler: Arc<dyn EventHandler>,
        envelope: &EventEnvelope,
    ) -> Result<u64, HandlerError> {
        let timeout = Duration::from_millis(self.config.default_timeout_ms);
        let started = Instant::now();

        let task_envelope = envelope.clone();
        let task = tokio::spawn(async move {
            handler.handle(&task_envelope.event, &task_envelope).await
        });

        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(Ok(()))) => Ok(started.elapsed().as_millis() as u64),
            Ok(Ok(Err(error))) => Err(error),
            Ok(Err(join_error)) => Err(HandlerError::new(format!(
                "handler panicked: {join_error}"
            ))),
            Err(_) => Err(HandlerError::new(format!(
                "handler timed out after {}ms",
                timeout.as_millis()
            ))),
        }
    }

    /// Retry-or-dead-letter decision after a failed delivery.
    async fn handle_event_error(
        self: Arc<Self>,
        channel: String,
        mut envelope: EventEnvelope,
        error: HandlerError,
        failed: Vec<Arc<dyn EventHandler>>,
    ) {
        for handler in failed {
            let callback_error = error.clone();
            let callback_envelope = envelope.clone();
            // The callback runs on its own task so a panic there cannot
            // take the retry decision down with it.
            let outcome = tokio::spawn(async move {
                handler
                    .on_error(
                        &callback_error,
                        &callback_envelope.event,
                        &callback_envelope,
                    )
                    .await;
            })
            .await;
            if let Err(e) = outcome {
                tracing::warn!(error = %e, "on_error callback failed");
            }
        }

        let event_type = envelope.event.event_type.clone();

        if envelope.can_retry() {
            envelope.retry_count += 1;
            envelope.delay_ms = next_retry_delay_ms(envelope.delay_ms);
            if self.config.enable_metrics {
                self.lock_metrics().record_retried(&event_type);
            }
            tracing::warn!(
                event_type = %event_type,
                event_id = %envelope.event.id,
                retry = envelope.retry_count,
                max_retries = envelope.max_retries,
                delay_ms = envelope.delay_ms,
                "Scheduling delivery retry"
            );

            let shared = Arc::clone(&self);
            let delay = Duration::from_millis(envelope.delay_ms);
            tokio::spawn(async move {
                tokio::select! {
                    _ = shared.cancel.cancelled() => {}
                    _ = tokio::time::sleep(delay) => {
                        if let Err(e) = shared.publish_envelope(&channel, &envelope).await {
                            tracing::error!(
                                event_id = %envelope.event.id,
                                error = %e,
                                "Retry publish failed"
                            );
                        }
                    }
                }
            });
        } else if self.config.enable_dead_letter_queue {
            let dlq_channel = dlq_channel_for(&channel);
            tracing::error!(
                event_type = %event_type,
                event_id = %envelope.event.id,
                channel = %dlq_channel,
                error = %error,
                "Retries exhausted, dead-lettering event"
            );
            let message = DeadLetterMessage::new(envelope, error.to_string());
            match serde_json::to_string(&message) {
                Ok(body) => {
                    if let Err(e) = self.broker.publish(&dlq_channel, body).await {
                        tracing::error!(error = %e, "Dead-letter publish failed");
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "Dead-letter message did not serialize");
                }
            }
        } else {
            tracing::error!(
                event_type = %event_type,
                event_id = %envelope.event.id,
                error = %error,
                "Retries exhausted, dropping event"
            );
        }
    }

    fn report_metrics(&self) {
        let snapshot = self.lock_metrics().snapshot();
        for (event_type, metrics) in snapshot {
            tracing::info!(
                event_type = %event_type,
                published = metrics.published,
                received = metrics.received,
                processed = metrics.processed_count,
                failed = metrics.error_count,
                retried = metrics.retry_count,
                avg_processing_ms = metrics.average_processing_time_ms(),
                success_rate = metrics.success_rate(),
                "Event metrics"
            );
        }
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// The platform event bus.
pub struct EventBus {
    shared: Arc<BusShared>,
    channel_tasks: tokio::sync::Mutex<HashMap<String, JoinHandle<()>>>,
}

impl EventBus {
    /// Build a bus over an existing broker and optional store, using the
    /// platform default schema registry.
    pub fn new(config: BusConfig, broker: Arc<dyn Broker>, store: Option<Arc<EventStore>>) -> Self {
        Self::with_schemas(config, broker, store, SchemaRegistry::platform_defaults())
    }

    /// Build a bus with an explicit schema registry.
    pub fn with_schemas(
        config: BusConfig,
        broker: Arc<dyn Broker>,
        store: Option<Arc<EventStore>>,
        schemas: SchemaRegistry,
    ) -> Self {
        let enable_metrics = config.enable_metrics;
        let shared = Arc::new(BusShared {
            config,
            broker,
            store,
            schemas,
            handlers: RwLock::new(HashMap::new()),
            metrics: Mutex::new(MetricsRegistry::new()),
            cancel: CancellationToken::new(),
        });

        if enable_metrics {
            let loop_shared = Arc::clone(&shared);
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(METRICS_REPORT_INTERVAL);
                interval.tick().await;
                loop {
                    tokio::select! {
                        _ = loop_shared.cancel.cancelled() => break,
                        _ = interval.tick() => loop_shared.report_metrics(),
                    }
                }
            });
        }

        Self {
            shared,
            channel_tasks: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Connect to the configured Redis broker (and store, when enabled).
    pub async fn connect(config: BusConfig) -> Result<Self, BusError> {
        let broker = Arc::new(RedisBroker::connect(&config.broker_url).await?);
        let store = if config.enable_event_store {
            let backend = Arc::new(RedisKv::connect(&config.broker_url).await?);
            Some(Arc::new(EventStore::new(backend)))
        } else {
            None
        };
        Ok(Self::new(config, broker, store))
    }

    /// Publish a domain event.
    ///
    /// Validates against the schema registry (unless disabled), wraps the
    /// event in an [`EventEnvelope`], routes it to its channel, persists
    /// it to the event store, and updates the `published` metric. A
    /// `delay_ms` in `options` schedules the broker publish without
    /// blocking the caller.
    ///
    /// When the broker is disconnected the event is DROPPED with a
    /// warning and `Ok(())` is returned: producers stay up through broker
    /// outages at the cost of losing the events published during one.
    /// Handler failures downstream never surface here.
    pub async fn publish(
        &self,
        event: DomainEvent,
        options: PublishOptions,
    ) -> Result<(), BusError> {
        let shared = &self.shared;

        if !shared.broker.is_connected() {
            tracing::warn!(
                event_type = %event.event_type,
                event_id = %event.id,
                "Broker disconnected, dropping event"
            );
            return Ok(());
        }

        if shared.config.enable_validation {
            let report = shared.schemas.validate(&event);
            if !report.is_valid {
                return Err(CoreError::Validation(report.summary()).into());
            }
        }

        let channel = shared
            .config
            .channels
            .channel_for(&event.event_type)
            .to_string();
        let is_replay = event
            .metadata
            .get(META_IS_REPLAY)
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let envelope = EventEnvelope::wrap(event, options, shared.config.max_retries);

        if shared.config.enable_event_store && !is_replay {
            if let Some(store) = &shared.store {
                if let Err(e) = store.save(&envelope.event).await {
                    tracing::error!(
                        event_id = %envelope.event.id,
                        error = %e,
                        "Failed to persist event"
                    );
                }
            }
        }

        if shared.config.enable_metrics {
            shared.lock_metrics().record_published(&envelope.event.event_type);
        }

        if envelope.delay_ms > 0 {
            let task_shared = Arc::clone(shared);
            let delay = Duration::from_millis(envelope.delay_ms);
            tokio::spawn(async move {
                tokio::select! {
                    _ = task_shared.cancel.cancelled() => {}
                    _ = tokio::time::sleep(delay) => {
                        if let Err(e) = task_shared.publish_envelope(&channel, &envelope).await {
                            tracing::error!(
                                event_id = %envelope.event.id,
                                error = %e,
                                "Delayed publish failed"
                            );
                        }
                    }
                }
            });
            return Ok(());
        }

        shared.publish_envelope(&channel, &envelope).await
    }

    /// Register a handler for one or more event types.
    ///
    /// Every type must have a registered schema (unless validation is
    /// disabled). Multiple handlers may share a type; types sharing a
    /// channel share one underlying broker subscription.
    pub async fn subscribe(
        &self,
        event_types: &[&str],
        handler: Arc<dyn EventHandler>,
    ) -> Result<(), BusError> {
        let shared = &self.shared;

        if shared.config.enable_validation {
            for event_type in event_types {
                if !shared.schemas.contains(event_type) {
                    return Err(CoreError::UnknownEventType((*event_type).to_string()).into());
                }
            }
        }

        {
            let mut handlers = shared
                .handlers
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            for event_type in event_types {
                handlers
                    .entry((*event_type).to_string())
                    .or_default()
                    .push(Arc::clone(&handler));
            }
        }

        let mut channels: Vec<&str> = Vec::new();
        for event_type in event_types {
            let channel = shared.config.channels.channel_for(event_type);
            if !channels.contains(&channel) {
                channels.push(channel);
            }
        }
        for channel in channels {
            self.ensure_channel_subscription(channel).await?;
        }
        Ok(())
    }

    /// Remove a handler (by name) from an event type.
    ///
    /// When the last handler for the channel's types goes, the underlying
    /// channel subscription is dropped too.
    pub async fn unsubscribe(&self, event_type: &str, handler_name: &str) -> Result<(), BusError> {
        let shared = &self.shared;
        let channel = shared.config.channels.channel_for(event_type);

        let channel_still_used = {
            let mut handlers = shared
                .handlers
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if let Some(list) = handlers.get_mut(event_type) {
                list.retain(|h| h.name() != handler_name);
                if list.is_empty() {
                    handlers.remove(event_type);
                }
            }
            handlers
                .keys()
                .any(|t| shared.config.channels.channel_for(t) == channel)
        };

        if !channel_still_used {
            let mut tasks = self.channel_tasks.lock().await;
            if let Some(task) = tasks.remove(channel) {
                task.abort();
            }
            drop(tasks);
            shared.broker.unsubscribe(channel).await?;
        }
        Ok(())
    }

    async fn ensure_channel_subscription(&self, channel: &str) -> Result<(), BusError> {
        let mut tasks = self.channel_tasks.lock().await;
        if tasks.contains_key(channel) {
            return Ok(());
        }

        let mut receiver = self.shared.broker.subscribe(channel).await?;
        let shared = Arc::clone(&self.shared);
        let task_channel = channel.to_string();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shared.cancel.cancelled() => break,
                    message = receiver.recv() => match message {
                        Some(message) => {
                            // Each message dispatches on its own task so a
                            // slow handler does not stall the channel.
                            tokio::spawn(
                                Arc::clone(&shared)
                                    .handle_incoming(message.channel, message.payload),
                            );
                        }
                        None => {
                            tracing::debug!(
                                channel = %task_channel,
                                "Channel subscription closed"
                            );
                            break;
                        }
                    }
                }
            }
        });
        tasks.insert(channel.to_string(), task);
        Ok(())
    }

    /// Whether the underlying broker is currently connected.
    pub fn is_connected(&self) -> bool {
        self.shared.broker.is_connected()
    }

    /// The event store backing this bus, when enabled.
    pub fn store(&self) -> Option<Arc<EventStore>> {
        self.shared.store.clone()
    }

    /// Metrics recorded for one event type.
    pub fn metrics_for(&self, event_type: &str) -> Option<EventMetrics> {
        self.shared.lock_metrics().get(event_type).cloned()
    }

    /// Point-in-time copy of all per-type metrics.
    pub fn metrics_snapshot(&self) -> HashMap<String, EventMetrics> {
        self.shared.lock_metrics().snapshot()
    }

    /// Stop background loops and drop all channel subscriptions.
    pub async fn shutdown(&self) {
        self.shared.cancel.cancel();
        let mut tasks = self.channel_tasks.lock().await;
        for (channel, task) in tasks.drain() {
            task.abort();
            if let Err(e) = self.shared.broker.unsubscribe(&channel).await {
                tracing::debug!(channel = %channel, error = %e, "Unsubscribe during shutdown failed");
            }
        }
        tracing::info!("Event bus shut down");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
