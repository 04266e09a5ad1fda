//! Outbound delivery of history events to an external log sink.
//!
//! Committed enter/exit events are queued as [`SyncRecord`]s and delivered in
//! FIFO order by a background drain task (see [`SyncQueue::spawn_drain`]) or
//! on demand by [`SyncQueue::flush`]. A failing record is retried with
//! exponential backoff, each attempt bounded by a timeout, and dropped once
//! the attempt budget is spent. Dropping raises exactly one [`SyncFailure`]
//! and never blocks the records queued behind it.
//!
//! Local device state is authoritative: nothing in this module feeds back into
//! the presence engine.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{broadcast, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn, Span};
use utoipa::ToSchema;

use crate::config::SyncConfig;
use crate::error::BeaconError;
use crate::types::EventKind;

/// Capacity of the failure broadcast channel.
const FAILURE_CHANNEL_CAPACITY: usize = 64;

/// A queued outbound unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "device_name": "MacBook Pro",
    "device_id": "AA:BB:CC:DD:EE:01",
    "timestamp": "2025-01-15T03:30:00Z",
    "geofence_name": "Office",
    "event": "enter"
}))]
pub struct SyncRecord {
    /// Display name of the device (its identifier when unnamed).
    pub device_name: String,

    /// Device identifier.
    pub device_id: String,

    /// When the event happened.
    pub timestamp: DateTime<Utc>,

    /// Geofence the event refers to.
    pub geofence_name: Option<String>,

    /// Event kind.
    pub event: EventKind,
}

/// Why a single delivery attempt failed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncError {
    /// The sink received the record and refused it.
    #[error("Sink rejected record: {0}")]
    Rejected(String),

    /// The attempt did not finish within the configured timeout.
    #[error("Delivery timed out after {0:?}")]
    Timeout(Duration),

    /// The sink could not be reached.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The sink is temporarily unavailable.
    #[error("Sink unavailable: {0}")]
    Unavailable(String),
}

/// The external log sink.
#[async_trait]
pub trait SyncSink: Send + Sync {
    /// Deliver one record.
    async fn append(&self, record: &SyncRecord) -> Result<(), SyncError>;

    /// Whether the sink is configured. Records stay queued while this is
    /// `false` instead of burning retry attempts.
    fn is_enabled(&self) -> bool {
        true
    }
}

/// Signal raised when a record is dropped after exhausting its retries.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SyncFailure {
    /// The record that was dropped.
    pub record: SyncRecord,

    /// Attempts made before giving up.
    pub attempts: u32,

    /// Last error reported for the record.
    pub reason: String,

    /// When the record was dropped.
    pub failed_at: DateTime<Utc>,
}

impl From<SyncFailure> for BeaconError {
    fn from(failure: SyncFailure) -> Self {
        Self::SyncFailure {
            device_id: failure.record.device_id,
            attempts: failure.attempts,
            reason: failure.reason,
        }
    }
}

/// Retry policy for sink delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncPolicy {
    /// Attempts per record before it is dropped (at least 1).
    pub max_attempts: u32,

    /// Delay after the first failed attempt.
    pub initial_backoff: Duration,

    /// Upper bound on the delay between attempts.
    pub max_backoff: Duration,

    /// Upper bound on a single attempt.
    pub attempt_timeout: Duration,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self::from(&SyncConfig::default())
    }
}

impl From<&SyncConfig> for SyncPolicy {
    fn from(config: &SyncConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: config.initial_backoff(),
            max_backoff: config.max_backoff(),
            attempt_timeout: config.attempt_timeout(),
        }
    }
}

impl SyncPolicy {
    /// Delay to wait after failed attempt number `attempt` (1-based).
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Delivery counters for a "last sync" indicator.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct SyncStatus {
    /// Whether the sink is configured.
    pub enabled: bool,

    /// Records waiting for delivery.
    pub pending: usize,

    /// Records delivered since startup.
    pub delivered_total: u64,

    /// Records dropped since startup.
    pub failed_total: u64,

    /// Last successful delivery.
    pub last_success_at: Option<DateTime<Utc>>,

    /// Most recent dropped record.
    pub last_failure: Option<SyncFailure>,
}

/// Outcome of a [`SyncQueue::flush`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct FlushReport {
    /// Records delivered during the flush.
    pub delivered: usize,

    /// Records dropped during the flush (0 or 1).
    pub failed: usize,

    /// Records still queued afterwards.
    pub remaining: usize,
}

#[derive(Debug, Default)]
struct Counters {
    delivered_total: u64,
    failed_total: u64,
    last_success_at: Option<DateTime<Utc>>,
    last_failure: Option<SyncFailure>,
}

enum Drain {
    /// Keep going after a dropped record.
    Continue,
    /// Return after the first dropped record.
    StopOnFailure,
}

struct QueueInner {
    records: Mutex<VecDeque<SyncRecord>>,
    counters: Mutex<Counters>,
    wake: Notify,
    /// Held while delivering so the drain task and `flush` never send the same
    /// head record twice.
    delivery: tokio::sync::Mutex<()>,
    failures: broadcast::Sender<SyncFailure>,
    sink: Arc<dyn SyncSink>,
    policy: SyncPolicy,
}

/// FIFO of records awaiting delivery.
///
/// Cloning is cheap and yields a handle to the same queue.
#[derive(Clone)]
pub struct SyncQueue {
    inner: Arc<QueueInner>,
}

impl std::fmt::Debug for SyncQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncQueue")
            .field("pending", &self.len())
            .field("policy", &self.inner.policy)
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SyncQueue {
    /// Create a queue delivering to `sink`.
    #[must_use]
    pub fn new(sink: Arc<dyn SyncSink>, policy: SyncPolicy) -> Self {
        let (failures, _) = broadcast::channel(FAILURE_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(QueueInner {
                records: Mutex::new(VecDeque::new()),
                counters: Mutex::new(Counters::default()),
                wake: Notify::new(),
                delivery: tokio::sync::Mutex::new(()),
                failures,
                sink,
                policy,
            }),
        }
    }

    /// Append a record. Never blocks on delivery.
    pub fn enqueue(&self, record: SyncRecord) {
        debug!(
            device_id = %record.device_id,
            event = %record.event,
            geofence = ?record.geofence_name,
            "Sync record queued"
        );
        lock(&self.inner.records).push_back(record);
        self.inner.wake.notify_one();
    }

    /// Records waiting for delivery.
    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.inner.records).len()
    }

    /// Returns `true` if nothing is waiting for delivery.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        lock(&self.inner.records).is_empty()
    }

    /// Copy of the queued records in delivery order.
    #[must_use]
    pub fn pending(&self) -> Vec<SyncRecord> {
        lock(&self.inner.records).iter().cloned().collect()
    }

    /// The active retry policy.
    #[must_use]
    pub fn policy(&self) -> SyncPolicy {
        self.inner.policy
    }

    /// Subscribe to [`SyncFailure`] signals.
    #[must_use]
    pub fn subscribe_failures(&self) -> broadcast::Receiver<SyncFailure> {
        self.inner.failures.subscribe()
    }

    /// Current counters.
    #[must_use]
    pub fn status(&self) -> SyncStatus {
        let pending = self.len();
        let counters = lock(&self.inner.counters);
        SyncStatus {
            enabled: self.inner.sink.is_enabled(),
            pending,
            delivered_total: counters.delivered_total,
            failed_total: counters.failed_total,
            last_success_at: counters.last_success_at,
            last_failure: counters.last_failure.clone(),
        }
    }

    /// Deliver everything queued now.
    ///
    /// Returns once the queue is empty, the sink is disabled, or the head
    /// record fails terminally (it is dropped and reported like any other
    /// failure).
    pub async fn flush(&self) -> FlushReport {
        let mut report = self.drain(Drain::StopOnFailure).await;
        report.remaining = self.len();
        info!(
            delivered = report.delivered,
            failed = report.failed,
            remaining = report.remaining,
            "Sync flush finished"
        );
        report
    }

    /// Start the background drain task.
    #[must_use]
    pub fn spawn_drain(&self) -> SyncWorker {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let queue = self.clone();
        let idle_recheck = self.inner.policy.max_backoff.max(Duration::from_secs(1));

        let handle = tokio::spawn(async move {
            info!("Sync drain started");
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => break,
                    _ = queue.drain(Drain::Continue) => {}
                }

                tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => break,
                    () = queue.inner.wake.notified() => {}
                    () = tokio::time::sleep(idle_recheck) => {}
                }
            }
            info!("Sync drain stopped");
        });

        SyncWorker {
            shutdown_tx,
            handle,
        }
    }

    async fn drain(&self, mode: Drain) -> FlushReport {
        let _delivery = self.inner.delivery.lock().await;
        let mut report = FlushReport::default();

        if !self.inner.sink.is_enabled() {
            debug!(pending = self.len(), "Sync sink disabled, keeping records queued");
            return report;
        }

        loop {
            // The head stays queued until it is delivered or dropped.
            let head = lock(&self.inner.records).front().cloned();
            let Some(record) = head else {
                return report;
            };

            match self.deliver(&record).await {
                Ok(attempts) => {
                    lock(&self.inner.records).pop_front();
                    {
                        let mut counters = lock(&self.inner.counters);
                        counters.delivered_total += 1;
                        counters.last_success_at = Some(Utc::now());
                    }
                    report.delivered += 1;
                    debug!(device_id = %record.device_id, attempts, "Sync record delivered");
                }
                Err(failure) => {
                    lock(&self.inner.records).pop_front();
                    self.report_failure(failure);
                    report.failed += 1;
                    if matches!(mode, Drain::StopOnFailure) {
                        return report;
                    }
                }
            }
        }
    }

    /// Try one record until it succeeds or the attempt budget is spent.
    /// Returns the number of attempts used on success.
    #[instrument(
        level = "debug",
        skip_all,
        fields(
            device_id = %record.device_id,
            geofence = ?record.geofence_name,
            attempt = tracing::field::Empty,
        )
    )]
    async fn deliver(&self, record: &SyncRecord) -> Result<u32, SyncFailure> {
        let policy = self.inner.policy;
        let mut attempt = 0;

        loop {
            attempt += 1;
            Span::current().record("attempt", attempt);
            let outcome =
                match tokio::time::timeout(policy.attempt_timeout, self.inner.sink.append(record))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(SyncError::Timeout(policy.attempt_timeout)),
                };

            let err = match outcome {
                Ok(()) => return Ok(attempt),
                Err(err) => err,
            };

            if attempt >= policy.max_attempts {
                return Err(SyncFailure {
                    record: record.clone(),
                    attempts: attempt,
                    reason: err.to_string(),
                    failed_at: Utc::now(),
                });
            }

            let delay = policy.backoff(attempt);
            warn!(
                device_id = %record.device_id,
                attempt,
                max_attempts = policy.max_attempts,
                retry_in_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %err,
                "Sync delivery failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }

    fn report_failure(&self, failure: SyncFailure) {
        error!(
            device_id = %failure.record.device_id,
            event = %failure.record.event,
            attempts = failure.attempts,
            reason = %failure.reason,
            "Sync record dropped after exhausting retries"
        );
        {
            let mut counters = lock(&self.inner.counters);
            counters.failed_total += 1;
            counters.last_failure = Some(failure.clone());
        }
        // No subscribers is fine; the counters still record the failure.
        let _ = self.inner.failures.send(failure);
    }
}

/// Handle to the background drain task.
#[derive(Debug)]
pub struct SyncWorker {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl SyncWorker {
    /// Stop the drain task and wait for it to exit.
    ///
    /// A delivery in progress is abandoned; its record stays at the head of
    /// the queue.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.handle.await {
            warn!(error = %e, "Sync drain task panicked");
        }
    }
}
