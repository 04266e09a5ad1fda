//! The presence state machine.
//!
//! Every evaluation tick decides, per device, a target status and a target
//! geofence, then reconciles the device record with it:
//!
//! ```text
//!   stale sighting ─────────────────────────────► out_of_range, no fence
//!   fresh sighting, no sample yet ──────────────► keep fence (active if any, else inactive)
//!   fresh sighting, sample inside first fence ──► active, that fence
//!   fresh sighting, sample outside all fences ──► inactive, no fence
//! ```
//!
//! A change of fence appends `exit` (old) and/or `enter` (new) entries and
//! hands them to the sync queue while the device lock is still held, so the
//! queue sees each device's events in the order they were recorded.

use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::config::PresenceConfig;
use crate::device::{Device, DeviceRegistry, HistoryRange, Sighting, SightingOutcome};
use crate::error::{BeaconError, Result};
use crate::geo::find_containing;
use crate::geofence::{Geofence, GeofenceRegistry};
use crate::storage::Snapshot;
use crate::sync::{SyncQueue, SyncRecord};
use crate::types::{DeviceStatus, HistoryEntry, LocationSample};

/// How far ahead of the engine clock a sample timestamp may be, in seconds.
pub const MAX_SAMPLE_CLOCK_SKEW_SECS: i64 = 60;

/// Where a device should be after an evaluation.
#[derive(Debug, Clone, PartialEq)]
struct Target {
    status: DeviceStatus,
    geofence: Option<(Uuid, String)>,
}

fn is_stale(device: &Device, now: DateTime<Utc>, threshold: chrono::Duration) -> bool {
    now.signed_duration_since(device.last_sighting) > threshold
}

fn target_for(
    device: &Device,
    sample: Option<&LocationSample>,
    active: &[Geofence],
    now: DateTime<Utc>,
    stale_threshold: chrono::Duration,
) -> Target {
    if is_stale(device, now, stale_threshold) {
        return Target {
            status: DeviceStatus::OutOfRange,
            geofence: None,
        };
    }

    let Some(sample) = sample else {
        let geofence = device.geofence_id.zip(device.geofence_name.clone());
        let status = if geofence.is_some() {
            DeviceStatus::Active
        } else {
            DeviceStatus::Inactive
        };
        return Target { status, geofence };
    };

    match find_containing(sample.coordinate(), active) {
        Some(fence) => Target {
            status: DeviceStatus::Active,
            geofence: Some((fence.id, fence.name.clone())),
        },
        None => Target {
            status: DeviceStatus::Inactive,
            geofence: None,
        },
    }
}

/// Move `device` to `target`, returning the history entries appended.
fn reconcile(device: &mut Device, target: Target, now: DateTime<Utc>) -> Vec<HistoryEntry> {
    let mut appended = Vec::new();
    let previous_id = device.geofence_id;
    let target_id = target.geofence.as_ref().map(|(id, _)| *id);

    if previous_id != target_id {
        if previous_id.is_some() {
            // Use the recorded name: the fence may have been deleted since.
            let name = device
                .geofence_name
                .clone()
                .unwrap_or_else(|| previous_id.map(|id| id.to_string()).unwrap_or_default());
            appended.push(HistoryEntry::exit(name, now));
        }
        if let Some((_, name)) = &target.geofence {
            appended.push(HistoryEntry::enter(name.clone(), now));
        }
    }

    if device.status != target.status {
        info!(
            device_id = %device.identifier,
            from = %device.status,
            to = %target.status,
            "Device status changed"
        );
    }

    device.status = target.status;
    device.geofence_id = target_id;
    device.geofence_name = target.geofence.map(|(_, name)| name);
    for entry in &appended {
        device.append(entry.clone());
    }
    appended
}

fn sync_record(device: &Device, entry: &HistoryEntry) -> SyncRecord {
    SyncRecord {
        device_name: device.display_name().to_string(),
        device_id: device.identifier.clone(),
        timestamp: entry.timestamp,
        geofence_name: entry.geofence.clone(),
        event: entry.event,
    }
}

struct EngineInner {
    devices: DeviceRegistry,
    geofences: GeofenceRegistry,
    sync: SyncQueue,
    clock: Arc<dyn Clock>,
    stale_threshold: chrono::Duration,
    sample: RwLock<Option<LocationSample>>,
}

/// Fuses sightings and location samples into device status and history.
///
/// Cloning is cheap and yields a handle to the same engine.
#[derive(Clone)]
pub struct PresenceEngine {
    inner: Arc<EngineInner>,
}

impl std::fmt::Debug for PresenceEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PresenceEngine")
            .field("devices", &self.inner.devices.len())
            .field("geofences", &self.inner.geofences.len())
            .field("stale_threshold", &self.inner.stale_threshold)
            .finish_non_exhaustive()
    }
}

impl PresenceEngine {
    /// Create an engine with empty registries and the system clock.
    #[must_use]
    pub fn new(config: &PresenceConfig, sync: SyncQueue) -> Self {
        Self::with_parts(
            config,
            GeofenceRegistry::new(),
            DeviceRegistry::new(),
            sync,
            Arc::new(SystemClock),
        )
    }

    /// Create an engine over existing registries and a custom clock.
    #[must_use]
    pub fn with_parts(
        config: &PresenceConfig,
        geofences: GeofenceRegistry,
        devices: DeviceRegistry,
        sync: SyncQueue,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let stale_threshold = chrono::Duration::from_std(config.stale_threshold())
            .unwrap_or(chrono::Duration::MAX);
        Self {
            inner: Arc::new(EngineInner {
                devices,
                geofences,
                sync,
                clock,
                stale_threshold,
                sample: RwLock::new(None),
            }),
        }
    }

    /// The device registry.
    #[must_use]
    pub fn devices(&self) -> &DeviceRegistry {
        &self.inner.devices
    }

    /// The geofence registry.
    #[must_use]
    pub fn geofences(&self) -> &GeofenceRegistry {
        &self.inner.geofences
    }

    /// The outbound sync queue.
    #[must_use]
    pub fn sync_queue(&self) -> &SyncQueue {
        &self.inner.sync
    }

    /// The engine's current time.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.inner.clock.now()
    }

    /// The most recent location sample, if any.
    #[must_use]
    pub fn current_sample(&self) -> Option<LocationSample> {
        *self
            .inner
            .sample
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a sighting from the scan source.
    ///
    /// Appends one `sighted` entry. Sightings are not synced and do not
    /// trigger containment evaluation.
    ///
    /// # Errors
    ///
    /// Returns [`BeaconError::Validation`] for malformed sighting data.
    pub async fn record_sighting(&self, sighting: Sighting) -> Result<SightingOutcome> {
        self.inner
            .devices
            .record_sighting(sighting, self.now())
            .await
    }

    /// Accept a new location sample and evaluate every device against it.
    ///
    /// # Errors
    ///
    /// Returns [`BeaconError::Validation`] if the coordinates are out of range,
    /// the timestamp is more than [`MAX_SAMPLE_CLOCK_SKEW_SECS`] ahead of
    /// the engine clock, or it precedes the retained sample. The retained sample
    /// is unchanged in that case.
    #[instrument(skip(self), fields(lat = sample.latitude, lon = sample.longitude))]
    pub async fn ingest_sample(&self, sample: LocationSample) -> Result<()> {
        sample.coordinate().validate()?;
        let latest_allowed = self.now() + chrono::Duration::seconds(MAX_SAMPLE_CLOCK_SKEW_SECS);
        if sample.timestamp > latest_allowed {
            return Err(BeaconError::validation(format!(
                "sample timestamp {} is in the future (latest accepted {latest_allowed})",
                sample.timestamp
            )));
        }
        {
            let mut current = self
                .inner
                .sample
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            if let Some(previous) = *current {
                if sample.timestamp < previous.timestamp {
                    return Err(BeaconError::validation(format!(
                        "sample timestamp {} is earlier than the current sample {}",
                        sample.timestamp, previous.timestamp
                    )));
                }
            }
            *current = Some(sample);
        }
        debug!("Location sample accepted");
        self.tick().await;
        Ok(())
    }

    /// Evaluate every device against the retained sample at the current time.
    ///
    /// Devices are evaluated concurrently; each one under its own lock.
    pub async fn tick(&self) {
        let identifiers = self.inner.devices.identifiers();
        let results = join_all(identifiers.iter().map(|id| self.evaluate_device(id))).await;

        let changed = results
            .iter()
            .filter(|r| matches!(r, Ok(entries) if !entries.is_empty()))
            .count();
        debug!(devices = identifiers.len(), changed, "Evaluation tick finished");
    }

    /// Evaluate one device, returning the history entries it produced.
    ///
    /// # Errors
    ///
    /// Returns [`BeaconError::DeviceNotFound`] for an unknown identifier.
    #[instrument(level = "debug", skip(self, identifier), fields(device_id = %identifier))]
    pub async fn evaluate_device(&self, identifier: &str) -> Result<Vec<HistoryEntry>> {
        let sample = self.current_sample();
        let active = self.inner.geofences.list_active();
        let threshold = self.inner.stale_threshold;
        let sync = &self.inner.sync;
        let clock = &self.inner.clock;

        let result = self
            .inner
            .devices
            .with_device(identifier, |device| {
                // Read the clock under the lock so entries stay in time order.
                let now = clock.now();
                let target = target_for(device, sample.as_ref(), &active, now, threshold);
                let appended = reconcile(device, target, now);
                for entry in &appended {
                    info!(
                        device_id = %device.identifier,
                        event = %entry.event,
                        geofence = ?entry.geofence,
                        "Geofence transition"
                    );
                    if entry.event.is_synced() {
                        sync.enqueue(sync_record(device, entry));
                    }
                }
                appended
            })
            .await;

        if let Err(e) = &result {
            // Deleted between listing and locking; nothing to evaluate.
            debug!(device_id = %identifier, error = %e, "Skipping evaluation");
        }
        result
    }

    /// History of one device within `range`, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`BeaconError::DeviceNotFound`] for an unknown identifier and
    /// [`BeaconError::Validation`] for an inverted range.
    pub async fn device_history(
        &self,
        identifier: &str,
        range: HistoryRange,
    ) -> Result<Vec<HistoryEntry>> {
        self.inner.devices.history(identifier, range).await
    }

    /// Copy of the registry contents and retained sample for persistence.
    pub async fn snapshot(&self) -> Snapshot {
        Snapshot {
            saved_at: self.now(),
            devices: self.inner.devices.list().await,
            geofences: self.inner.geofences.list(),
            sample: self.current_sample(),
        }
    }

    /// Reload state saved by [`PresenceEngine::snapshot`].
    pub fn restore(&self, snapshot: Snapshot) {
        self.inner.geofences.restore(snapshot.geofences);
        self.inner.devices.restore(snapshot.devices);
        *self
            .inner
            .sample
            .write()
            .unwrap_or_else(PoisonError::into_inner) = snapshot.sample;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::geofence::{GeofenceUpdate, NewGeofence};
    use crate::sync::{SyncError, SyncPolicy, SyncSink};
    use crate::types::{Coordinate, EventKind};
    use async_trait::async_trait;
    use chrono::Duration;

    struct NullSink;

    #[async_trait]
    impl SyncSink for NullSink {
        async fn append(&self, _record: &SyncRecord) -> std::result::Result<(), SyncError> {
            Ok(())
        }
    }

    struct Harness {
        engine: PresenceEngine,
        clock: Arc<ManualClock>,
    }

    impl Harness {
        fn new(stale_threshold_secs: u64) -> Self {
            let clock = Arc::new(ManualClock::new(Utc::now()));
            let config = PresenceConfig {
                stale_threshold_secs,
                ..PresenceConfig::default()
            };
            let engine = PresenceEngine::with_parts(
                &config,
                GeofenceRegistry::new(),
                DeviceRegistry::new(),
                SyncQueue::new(Arc::new(NullSink), SyncPolicy::default()),
                clock.clone(),
            );
            Self { engine, clock }
        }

        fn fence(&self, name: &str, lat: f64, lon: f64, radius: f64) -> Geofence {
            self.engine
                .geofences()
                .create(NewGeofence {
                    name: name.to_string(),
                    color: None,
                    center: Coordinate::new(lat, lon),
                    radius_meters: radius,
                    active: true,
                })
                .unwrap()
        }

        async fn sight(&self, id: &str) {
            self.engine
                .record_sighting(Sighting::new(id, -50))
                .await
                .unwrap();
        }

        async fn sample_at(&self, lat: f64, lon: f64) {
            let sample = LocationSample::new(Coordinate::new(lat, lon), self.clock.now());
            self.engine.ingest_sample(sample).await.unwrap();
        }

        async fn device(&self, id: &str) -> Device {
            self.engine.devices().get(id).await.unwrap()
        }

        async fn transitions(&self, id: &str) -> Vec<(EventKind, Option<String>)> {
            self.device(id)
                .await
                .history()
                .iter()
                .filter(|e| e.event != EventKind::Sighted)
                .map(|e| (e.event, e.geofence.clone()))
                .collect()
        }
    }

    #[tokio::test]
    async fn test_office_scenario() {
        let h = Harness::new(300);
        let office = h.fence("Office", 37.0, -122.0, 100.0);
        h.sight("D1").await;

        h.sample_at(37.0, -122.0).await;

        let device = h.device("D1").await;
        assert_eq!(device.status, DeviceStatus::Active);
        assert_eq!(device.geofence_id, Some(office.id));
        assert_eq!(device.geofence_name.as_deref(), Some("Office"));
        assert_eq!(
            h.transitions("D1").await,
            vec![(EventKind::Enter, Some("Office".to_string()))]
        );

        let pending = h.engine.sync_queue().pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].device_id, "D1");
        assert_eq!(pending[0].event, EventKind::Enter);
        assert_eq!(pending[0].geofence_name.as_deref(), Some("Office"));
    }

    #[tokio::test]
    async fn test_same_sample_twice_records_once() {
        let h = Harness::new(300);
        h.fence("Office", 37.0, -122.0, 100.0);
        h.sight("D1").await;

        h.sample_at(37.0, -122.0).await;
        h.sample_at(37.0, -122.0).await;

        assert_eq!(h.transitions("D1").await.len(), 1);
        assert_eq!(h.engine.sync_queue().len(), 1);
    }

    #[tokio::test]
    async fn test_move_between_fences_exits_then_enters() {
        let h = Harness::new(300);
        h.fence("A", 0.0, 0.0, 50.0);
        h.fence("B", 1.0, 0.0, 50.0);
        h.sight("D1").await;

        h.sample_at(0.0, 0.0).await;
        h.sample_at(1.0, 0.0).await;

        assert_eq!(
            h.transitions("D1").await,
            vec![
                (EventKind::Enter, Some("A".to_string())),
                (EventKind::Exit, Some("A".to_string())),
                (EventKind::Enter, Some("B".to_string())),
            ]
        );
        let events: Vec<EventKind> = h
            .engine
            .sync_queue()
            .pending()
            .into_iter()
            .map(|r| r.event)
            .collect();
        assert_eq!(events, vec![EventKind::Enter, EventKind::Exit, EventKind::Enter]);
    }

    #[tokio::test]
    async fn test_leaving_fence_records_exit() {
        let h = Harness::new(300);
        h.fence("Office", 37.0, -122.0, 100.0);
        h.sight("D1").await;

        h.sample_at(37.0, -122.0).await;
        h.sample_at(38.0, -122.0).await;

        let device = h.device("D1").await;
        assert_eq!(device.status, DeviceStatus::Inactive);
        assert!(device.geofence_id.is_none());
        assert_eq!(
            h.transitions("D1").await.last(),
            Some(&(EventKind::Exit, Some("Office".to_string())))
        );
    }

    #[tokio::test]
    async fn test_stale_device_is_out_of_range() {
        let h = Harness::new(5 * 60);
        h.fence("Office", 37.0, -122.0, 100.0);
        h.sight("D1").await;

        h.clock.advance(Duration::minutes(10));
        h.sample_at(37.0, -122.0).await;

        let device = h.device("D1").await;
        assert_eq!(device.status, DeviceStatus::OutOfRange);
        assert!(device.geofence_id.is_none());
        assert!(h.transitions("D1").await.is_empty());
    }

    #[tokio::test]
    async fn test_going_stale_inside_fence_exits() {
        let h = Harness::new(60);
        h.fence("Office", 37.0, -122.0, 100.0);
        h.sight("D1").await;
        h.sample_at(37.0, -122.0).await;

        h.clock.advance(Duration::minutes(2));
        h.engine.tick().await;

        let device = h.device("D1").await;
        assert_eq!(device.status, DeviceStatus::OutOfRange);
        assert_eq!(
            h.transitions("D1").await.last(),
            Some(&(EventKind::Exit, Some("Office".to_string())))
        );

        // Sighted again: back inside on the next tick.
        h.sight("D1").await;
        h.engine.tick().await;
        let device = h.device("D1").await;
        assert_eq!(device.status, DeviceStatus::Active);
        assert_eq!(h.transitions("D1").await.len(), 3);
    }

    #[tokio::test]
    async fn test_deactivating_fence_exits_without_moving() {
        let h = Harness::new(300);
        let office = h.fence("Office", 37.0, -122.0, 100.0);
        h.sight("D1").await;
        h.sample_at(37.0, -122.0).await;

        h.engine
            .geofences()
            .update(
                office.id,
                GeofenceUpdate {
                    active: Some(false),
                    ..GeofenceUpdate::default()
                },
            )
            .unwrap();
        h.engine.tick().await;

        let device = h.device("D1").await;
        assert_eq!(device.status, DeviceStatus::Inactive);
        assert_eq!(
            h.transitions("D1").await,
            vec![
                (EventKind::Enter, Some("Office".to_string())),
                (EventKind::Exit, Some("Office".to_string())),
            ]
        );
        assert_eq!(h.engine.sync_queue().len(), 2);
    }

    #[tokio::test]
    async fn test_deleted_fence_exit_uses_recorded_name() {
        let h = Harness::new(300);
        let office = h.fence("Office", 37.0, -122.0, 100.0);
        h.sight("D1").await;
        h.sample_at(37.0, -122.0).await;

        assert!(h.engine.geofences().remove(office.id));
        h.engine.tick().await;

        assert_eq!(
            h.transitions("D1").await.last(),
            Some(&(EventKind::Exit, Some("Office".to_string())))
        );
    }

    #[tokio::test]
    async fn test_overlapping_fences_first_registered_wins() {
        let h = Harness::new(300);
        let campus = h.fence("Campus", 0.0, 0.0, 500.0);
        h.fence("Lab", 0.0, 0.0, 20.0);
        h.sight("D1").await;

        h.sample_at(0.0, 0.0).await;

        assert_eq!(h.device("D1").await.geofence_id, Some(campus.id));
    }

    #[tokio::test]
    async fn test_without_sample_status_follows_staleness_only() {
        let h = Harness::new(60);
        h.fence("Office", 37.0, -122.0, 100.0);
        h.sight("D1").await;

        h.engine.tick().await;
        let device = h.device("D1").await;
        assert_eq!(device.status, DeviceStatus::Inactive);
        assert!(device.geofence_id.is_none());

        h.clock.advance(Duration::minutes(5));
        h.engine.tick().await;
        assert_eq!(h.device("D1").await.status, DeviceStatus::OutOfRange);
        assert!(h.transitions("D1").await.is_empty());
    }

    #[tokio::test]
    async fn test_sightings_are_logged_but_not_synced() {
        let h = Harness::new(300);
        h.sight("D1").await;
        h.sight("D1").await;
        h.sight("D1").await;

        let device = h.device("D1").await;
        assert_eq!(device.history().len(), 3);
        assert!(device
            .history()
            .iter()
            .all(|e| e.event == EventKind::Sighted));
        assert!(h.engine.sync_queue().is_empty());
    }

    #[tokio::test]
    async fn test_sync_record_uses_display_name() {
        let h = Harness::new(300);
        h.fence("Office", 37.0, -122.0, 100.0);
        h.engine
            .record_sighting(Sighting::new("AA:BB:CC:DD:EE:01", -40).with_name("Laptop"))
            .await
            .unwrap();
        h.sight("D2").await;

        h.sample_at(37.0, -122.0).await;

        let pending = h.engine.sync_queue().pending();
        let names: Vec<&str> = pending.iter().map(|r| r.device_name.as_str()).collect();
        assert_eq!(names, vec!["Laptop", "D2"]);
    }

    #[tokio::test]
    async fn test_rejects_out_of_order_and_invalid_samples() {
        let h = Harness::new(300);
        h.sample_at(1.0, 1.0).await;
        let earlier = LocationSample::new(
            Coordinate::new(2.0, 2.0),
            h.clock.now() - Duration::seconds(1),
        );
        let err = h.engine.ingest_sample(earlier).await.unwrap_err();
        assert!(err.is_validation_error());

        let invalid = LocationSample::new(Coordinate::new(100.0, 0.0), h.clock.now());
        assert!(h.engine.ingest_sample(invalid).await.is_err());

        let current = h.engine.current_sample().unwrap();
        assert_eq!(current.coordinate(), Coordinate::new(1.0, 1.0));
    }

    #[tokio::test]
    async fn test_future_sample_is_rejected_and_does_not_block_later_ones() {
        let h = Harness::new(300);
        let next_year = LocationSample::new(
            Coordinate::new(2.0, 2.0),
            h.clock.now() + Duration::days(365),
        );
        let err = h.engine.ingest_sample(next_year).await.unwrap_err();
        assert!(err.is_validation_error());
        assert!(h.engine.current_sample().is_none());

        // Small skew is tolerated.
        let slightly_ahead = LocationSample::new(
            Coordinate::new(1.0, 1.0),
            h.clock.now() + Duration::seconds(30),
        );
        h.engine.ingest_sample(slightly_ahead).await.unwrap();

        h.clock.advance(Duration::seconds(60));
        h.sample_at(3.0, 3.0).await;
        assert_eq!(
            h.engine.current_sample().unwrap().coordinate(),
            Coordinate::new(3.0, 3.0)
        );
    }

    #[tokio::test]
    async fn test_device_history_window() {
        let h = Harness::new(300);
        h.fence("Office", 37.0, -122.0, 100.0);
        h.sight("D1").await;
        let start = h.clock.now();
        h.clock.advance(Duration::seconds(10));
        h.sample_at(37.0, -122.0).await;
        h.clock.advance(Duration::seconds(10));
        h.sample_at(0.0, 0.0).await;

        let all = h
            .engine
            .device_history("D1", HistoryRange::default())
            .await
            .unwrap();
        let events: Vec<EventKind> = all.iter().map(|e| e.event).collect();
        assert_eq!(events, vec![EventKind::Exit, EventKind::Enter, EventKind::Sighted]);

        let after_start = HistoryRange::new(Some(start + Duration::seconds(1)), None);
        let recent = h.engine.device_history("D1", after_start).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].event, EventKind::Exit);
    }

    #[tokio::test]
    async fn test_evaluate_unknown_device_is_not_found() {
        let h = Harness::new(300);
        let err = h.engine.evaluate_device("ghost").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_concurrent_sightings_and_ticks_keep_history_consistent() {
        let h = Harness::new(300);
        h.fence("A", 0.0, 0.0, 50.0);
        h.fence("B", 1.0, 0.0, 50.0);
        for id in ["D1", "D2", "D3"] {
            h.sight(id).await;
        }

        let mut tasks = Vec::new();
        for i in 0..20u32 {
            let engine = h.engine.clone();
            let now = h.clock.now();
            tasks.push(tokio::spawn(async move {
                let lat = if i % 2 == 0 { 0.0 } else { 1.0 };
                engine
                    .record_sighting(Sighting::new(format!("D{}", i % 3 + 1), -50))
                    .await
                    .unwrap();
                // Timestamps are equal, so no ordering rejection.
                let _ = engine
                    .ingest_sample(LocationSample::new(Coordinate::new(lat, 0.0), now))
                    .await;
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        for id in ["D1", "D2", "D3"] {
            let device = h.device(id).await;
            let mut inside: Option<String> = None;
            for entry in device.history() {
                match entry.event {
                    EventKind::Enter => {
                        assert!(inside.is_none(), "enter while inside for {id}");
                        inside = entry.geofence.clone();
                    }
                    EventKind::Exit => {
                        assert_eq!(inside, entry.geofence, "unpaired exit for {id}");
                        inside = None;
                    }
                    EventKind::Sighted => {}
                }
            }
            assert_eq!(inside, device.geofence_name);
        }
    }

    #[tokio::test]
    async fn test_snapshot_and_restore() {
        let h = Harness::new(300);
        h.fence("Office", 37.0, -122.0, 100.0);
        h.sight("D1").await;
        h.sample_at(37.0, -122.0).await;
        let snapshot = h.engine.snapshot().await;

        let restored = Harness::new(300);
        restored.engine.restore(snapshot);

        let device = restored.device("D1").await;
        assert_eq!(device.status, DeviceStatus::Active);
        assert_eq!(restored.engine.geofences().len(), 1);
        assert_eq!(
            restored.engine.current_sample().unwrap().coordinate(),
            Coordinate::new(37.0, -122.0)
        );

        restored.engine.tick().await;
        assert_eq!(restored.device("D1").await.status, DeviceStatus::Active);
        assert_eq!(restored.transitions("D1").await.len(), 1);
    }
}
