//! Fire-and-forget tracking event log
//!
//! Tracked actions are appended to `component_usage_events` off the request
//! path:
//! - Handlers enqueue with `try_send`, which never blocks
//! - A background task batches events and writes each batch in one transaction
//! - Failures degrade to tracing output under the `event_fallback` target
//!
//! ## Configuration
//!
//! - `STACKPULSE_EVENT_BUFFER_SIZE`: Max events in the queue (default: 1000)
//! - `STACKPULSE_EVENT_FLUSH_INTERVAL_MS`: Flush interval in milliseconds (default: 1000)

use serde::Serialize;
use stackpulse_analytics_core::TrackingEvent;
use stackpulse_analytics_storage::{insert_events, AnalyticsBackend, DynAnalyticsBackend};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Default buffer size for tracking events
const DEFAULT_BUFFER_SIZE: usize = 1000;

/// Default flush interval in milliseconds
const DEFAULT_FLUSH_INTERVAL_MS: u64 = 1000;

/// Events per write batch
const BATCH_SIZE: usize = 100;

/// Configuration for the event queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventQueueConfig {
    /// Maximum number of events in the buffer
    pub buffer_size: usize,
    /// Flush interval in milliseconds
    pub flush_interval_ms: u64,
}

impl Default for EventQueueConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            flush_interval_ms: DEFAULT_FLUSH_INTERVAL_MS,
        }
    }
}

impl EventQueueConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.buffer_size == 0 {
            return Err("event buffer_size must be > 0".to_string());
        }
        if self.flush_interval_ms == 0 {
            return Err("event flush_interval_ms must be > 0".to_string());
        }
        Ok(())
    }
}

/// What happened to an enqueued event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EnqueueOutcome {
    Queued,
    /// Buffer full or writer gone; the event was logged to tracing instead
    Dropped,
}

/// Cheap-to-clone handle for enqueueing tracking events
#[derive(Clone)]
pub struct EventQueue {
    sender: mpsc::Sender<TrackingEvent>,
}

impl EventQueue {
    /// Create a queue; returns the handle and the receiver for the writer task
    pub fn new(config: &EventQueueConfig) -> (Self, mpsc::Receiver<TrackingEvent>) {
        let (sender, receiver) = mpsc::channel(config.buffer_size);
        (Self { sender }, receiver)
    }

    /// Enqueue an event without blocking
    pub fn enqueue(&self, event: TrackingEvent) -> EnqueueOutcome {
        match self.sender.try_send(event) {
            Ok(()) => EnqueueOutcome::Queued,
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!(
                    component_id = %event.component_id,
                    action = event.action.as_str(),
                    "Event buffer full, event dropped"
                );
                log_fallback(&event, "buffer full");
                #[cfg(feature = "metrics")]
                crate::metrics::record_event_dropped("buffer_full");
                EnqueueOutcome::Dropped
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                error!(
                    component_id = %event.component_id,
                    "Event channel closed, logging to tracing"
                );
                log_fallback(&event, "channel closed");
                #[cfg(feature = "metrics")]
                crate::metrics::record_event_dropped("channel_closed");
                EnqueueOutcome::Dropped
            }
        }
    }
}

fn log_fallback(event: &TrackingEvent, reason: &str) {
    info!(
        target: "event_fallback",
        event_id = %event.id,
        component_id = %event.component_id,
        action = event.action.as_str(),
        user_id = ?event.user_id,
        session_id = ?event.session_id,
        reason,
        "Tracking event (fallback)"
    );
}

/// Background task that writes tracking events to the database
///
/// Runs until every [`EventQueue`] handle is dropped, then flushes what is
/// left and exits.
pub async fn event_writer_task(
    mut receiver: mpsc::Receiver<TrackingEvent>,
    backend: Arc<DynAnalyticsBackend>,
    config: EventQueueConfig,
) {
    let flush_interval = std::time::Duration::from_millis(config.flush_interval_ms);
    let mut batch: Vec<TrackingEvent> = Vec::with_capacity(BATCH_SIZE);
    let mut interval = tokio::time::interval(flush_interval);

    info!(
        buffer_size = config.buffer_size,
        flush_interval_ms = config.flush_interval_ms,
        "Event writer task started"
    );

    loop {
        tokio::select! {
            event = receiver.recv() => {
                match event {
                    Some(e) => {
                        batch.push(e);
                        if batch.len() >= BATCH_SIZE {
                            flush_batch(&mut batch, &backend).await;
                        }
                    }
                    None => {
                        flush_batch(&mut batch, &backend).await;
                        info!("Event writer task shutting down");
                        break;
                    }
                }
            }
            _ = interval.tick() => {
                flush_batch(&mut batch, &backend).await;
            }
        }
    }
}

async fn flush_batch(batch: &mut Vec<TrackingEvent>, backend: &Arc<DynAnalyticsBackend>) {
    if batch.is_empty() {
        return;
    }

    let events: Vec<TrackingEvent> = std::mem::take(batch);
    let count = events.len();
    let backend = Arc::clone(backend);

    debug!(count, "Flushing event batch");

    // Return events on error so they can be logged as fallback
    let result = tokio::task::spawn_blocking(move || {
        let conn = match backend.get_connection() {
            Ok(conn) => conn,
            Err(e) => return Err((e, events)),
        };
        match insert_events(&conn, &events) {
            Ok(written) => Ok(written),
            Err(e) => Err((e, events)),
        }
    })
    .await;

    match result {
        Ok(Ok(written)) => debug!(written, "Event batch written to database"),
        Ok(Err((e, events))) => {
            error!(error = %e, count, "Failed to write event batch to database");
            for event in &events {
                log_fallback(event, "write failure");
            }
        }
        Err(e) => error!(error = %e, count, "Event write task panicked"),
    }
}
