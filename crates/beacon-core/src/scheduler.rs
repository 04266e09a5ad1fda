//! Background tasks that feed the presence engine.
//!
//! - [`LocationSampler`] polls a [`LocationSource`] on a fixed period and runs
//!   an evaluation tick each time, even when no fix is available, so that
//!   devices still go stale.
//! - [`ScanPump`] forwards sightings from a [`ScanSource`] to the engine.
//!
//! Both stop through a watch channel; `stop()` waits for the task, so no
//! further work happens once it returns.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::error::Result;
use crate::presence::PresenceEngine;
use crate::scan::ScanSource;
use crate::types::{Coordinate, LocationSample};

/// Anything that can report where the tracker currently is.
#[async_trait]
pub trait LocationSource: Send + Sync {
    /// Current position.
    ///
    /// # Errors
    ///
    /// Returns an error when no fix is available.
    async fn current_location(&self) -> Result<Coordinate>;
}

async fn sample_once(engine: &PresenceEngine, source: Option<&dyn LocationSource>) {
    let Some(source) = source else {
        engine.tick().await;
        return;
    };

    match source.current_location().await {
        Ok(coordinate) => {
            let sample = LocationSample::new(coordinate, engine.now());
            if let Err(e) = engine.ingest_sample(sample).await {
                warn!(error = %e, "Location sample rejected");
                engine.tick().await;
            }
        }
        Err(e) => {
            warn!(error = %e, "No location fix");
            engine.tick().await;
        }
    }
}

/// Periodic location sampling.
#[derive(Debug)]
pub struct LocationSampler {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl LocationSampler {
    /// Start sampling every `period`, beginning immediately.
    ///
    /// Without a source, each period only re-evaluates the retained sample.
    #[must_use]
    pub fn start(
        engine: PresenceEngine,
        source: Option<Arc<dyn LocationSource>>,
        period: Duration,
    ) -> Self {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(period = ?period, has_source = source.is_some(), "Location sampler started");

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => break,
                    _ = interval.tick() => {
                        sample_once(&engine, source.as_deref()).await;
                    }
                }
            }
            info!("Location sampler stopped");
        });

        Self {
            shutdown_tx,
            handle,
        }
    }

    /// Stop sampling and wait for an in-flight tick to finish.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.handle.await {
            warn!("Location sampler task panicked: {}", e);
        }
    }
}

/// Forwards sightings from a scan source to the engine.
#[derive(Debug)]
pub struct ScanPump {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl ScanPump {
    /// Start pumping `source` into `engine`.
    #[must_use]
    pub fn start(engine: PresenceEngine, mut source: Box<dyn ScanSource>) -> Self {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            info!("Scan pump started");
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => break,
                    next = source.next_sighting() => {
                        let Some(sighting) = next else {
                            info!("Scan source exhausted");
                            break;
                        };
                        if let Err(e) = engine.record_sighting(sighting).await {
                            warn!(error = %e, "Sighting rejected");
                        }
                    }
                }
            }
        });

        Self {
            shutdown_tx,
            handle,
        }
    }

    /// Wait until the source runs dry.
    pub async fn wait(self) {
        if let Err(e) = self.handle.await {
            warn!("Scan pump task panicked: {}", e);
        }
    }

    /// Stop pumping and wait for the task to exit.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        self.wait().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::PresenceConfig;
    use crate::device::{DeviceRegistry, Sighting};
    use crate::error::BeaconError;
    use crate::geofence::{GeofenceRegistry, NewGeofence};
    use crate::scan::MockScanSource;
    use crate::sync::{SyncError, SyncPolicy, SyncQueue, SyncRecord, SyncSink};
    use crate::types::DeviceStatus;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NullSink;

    #[async_trait]
    impl SyncSink for NullSink {
        async fn append(&self, _record: &SyncRecord) -> std::result::Result<(), SyncError> {
            Ok(())
        }
    }

    struct CountingSource {
        calls: AtomicUsize,
        fix: Option<Coordinate>,
    }

    #[async_trait]
    impl LocationSource for CountingSource {
        async fn current_location(&self) -> Result<Coordinate> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.fix
                .ok_or_else(|| BeaconError::validation("location unavailable"))
        }
    }

    fn engine(clock: Arc<ManualClock>, stale_threshold_secs: u64) -> PresenceEngine {
        let config = PresenceConfig {
            stale_threshold_secs,
            ..PresenceConfig::default()
        };
        PresenceEngine::with_parts(
            &config,
            GeofenceRegistry::new(),
            DeviceRegistry::new(),
            SyncQueue::new(Arc::new(NullSink), SyncPolicy::default()),
            clock,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_sampler_ticks_on_period_and_stops() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let engine = engine(clock, 300);
        let source = Arc::new(CountingSource {
            calls: AtomicUsize::new(0),
            fix: Some(Coordinate::new(0.0, 0.0)),
        });

        let sampler = LocationSampler::start(
            engine,
            Some(source.clone() as Arc<dyn LocationSource>),
            Duration::from_secs(30),
        );
        tokio::time::sleep(Duration::from_secs(65)).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);

        sampler.stop().await;
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sampler_moves_device_into_fence() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let engine = engine(clock, 300);
        engine
            .geofences()
            .create(NewGeofence {
                name: "Office".to_string(),
                color: None,
                center: Coordinate::new(37.0, -122.0),
                radius_meters: 100.0,
                active: true,
            })
            .unwrap();
        engine
            .record_sighting(Sighting::new("D1", -50))
            .await
            .unwrap();

        let source = Arc::new(CountingSource {
            calls: AtomicUsize::new(0),
            fix: Some(Coordinate::new(37.0, -122.0)),
        });
        let sampler = LocationSampler::start(
            engine.clone(),
            Some(source as Arc<dyn LocationSource>),
            Duration::from_secs(30),
        );
        tokio::time::sleep(Duration::from_secs(1)).await;
        sampler.stop().await;

        let device = engine.devices().get("D1").await.unwrap();
        assert_eq!(device.status, DeviceStatus::Active);
        assert_eq!(device.geofence_name.as_deref(), Some("Office"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sampler_without_fix_still_marks_stale() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let engine = engine(clock.clone(), 60);
        engine
            .record_sighting(Sighting::new("D1", -50))
            .await
            .unwrap();
        clock.advance(chrono::Duration::minutes(5));

        let source = Arc::new(CountingSource {
            calls: AtomicUsize::new(0),
            fix: None,
        });
        let sampler = LocationSampler::start(
            engine.clone(),
            Some(source as Arc<dyn LocationSource>),
            Duration::from_secs(30),
        );
        tokio::time::sleep(Duration::from_secs(1)).await;
        sampler.stop().await;

        let device = engine.devices().get("D1").await.unwrap();
        assert_eq!(device.status, DeviceStatus::OutOfRange);
        assert!(engine.current_sample().is_none());
    }

    #[tokio::test]
    async fn test_scan_pump_records_every_sighting() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let engine = engine(clock, 300);
        let source = MockScanSource::new(MockScanSource::demo_devices());

        ScanPump::start(engine.clone(), Box::new(source)).wait().await;

        let devices = engine.devices().list().await;
        assert_eq!(devices.len(), 3);
        assert_eq!(devices[0].display_name(), "MacBook Pro");
        assert_eq!(devices[2].signal_strength, -70);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_pump_stops_repeating_source() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let engine = engine(clock, 300);
        let source = MockScanSource::repeating(
            vec![Sighting::new("AA:BB:CC:DD:EE:01", -45)],
            Duration::from_secs(10),
        );

        let pump = ScanPump::start(engine.clone(), Box::new(source));
        tokio::time::sleep(Duration::from_secs(25)).await;
        pump.stop().await;

        let device = engine.devices().get("AA:BB:CC:DD:EE:01").await.unwrap();
        assert_eq!(device.history().len(), 3);
    }
}
