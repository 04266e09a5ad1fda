//! Sources of device sightings.
//!
//! How the radio is driven is up to the implementation; the engine only sees
//! a stream of [`Sighting`]s, pumped by [`crate::scheduler::ScanPump`].

use async_trait::async_trait;

use crate::device::Sighting;

/// Anything that reports devices observed nearby.
#[async_trait]
pub trait ScanSource: Send {
    /// Wait for the next sighting.
    ///
    /// Returns `None` once the source has nothing more to report.
    async fn next_sighting(&mut self) -> Option<Sighting>;
}

/// A scan source that replays a fixed list of sightings.
#[cfg(any(test, feature = "mock-scan"))]
#[derive(Debug, Clone)]
pub struct MockScanSource {
    sightings: Vec<Sighting>,
    position: usize,
    period: Option<std::time::Duration>,
}

#[cfg(any(test, feature = "mock-scan"))]
impl MockScanSource {
    /// Replay `sightings` once, then stop.
    #[must_use]
    pub const fn new(sightings: Vec<Sighting>) -> Self {
        Self {
            sightings,
            position: 0,
            period: None,
        }
    }

    /// Replay `sightings` forever, pausing `period` between rounds.
    #[must_use]
    pub const fn repeating(sightings: Vec<Sighting>, period: std::time::Duration) -> Self {
        Self {
            sightings,
            position: 0,
            period: Some(period),
        }
    }

    /// A small set of typical nearby devices.
    #[must_use]
    pub fn demo_devices() -> Vec<Sighting> {
        vec![
            Sighting::new("AA:BB:CC:DD:EE:01", -45).with_name("MacBook Pro"),
            Sighting::new("AA:BB:CC:DD:EE:02", -60).with_name("AirTag Keys"),
            Sighting::new("AA:BB:CC:DD:EE:03", -70).with_name("Tracking Card"),
        ]
    }
}

#[cfg(any(test, feature = "mock-scan"))]
#[async_trait]
impl ScanSource for MockScanSource {
    async fn next_sighting(&mut self) -> Option<Sighting> {
        if self.sightings.is_empty() {
            return None;
        }
        if self.position >= self.sightings.len() {
            let period = self.period?;
            tokio::time::sleep(period).await;
            self.position = 0;
        }
        let sighting = self.sightings[self.position].clone();
        self.position += 1;
        Some(sighting)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_replays_once() {
        let mut source = MockScanSource::new(MockScanSource::demo_devices());
        let mut names = Vec::new();
        while let Some(sighting) = source.next_sighting().await {
            names.push(sighting.name.unwrap());
        }
        assert_eq!(names, vec!["MacBook Pro", "AirTag Keys", "Tracking Card"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeating_waits_between_rounds() {
        let mut source = MockScanSource::repeating(
            vec![Sighting::new("AA:BB:CC:DD:EE:01", -45)],
            Duration::from_secs(10),
        );
        let start = tokio::time::Instant::now();

        assert!(source.next_sighting().await.is_some());
        assert_eq!(start.elapsed(), Duration::ZERO);

        assert!(source.next_sighting().await.is_some());
        assert!(start.elapsed() >= Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_empty_source_ends() {
        let mut source = MockScanSource::repeating(Vec::new(), Duration::from_secs(1));
        assert!(source.next_sighting().await.is_none());
    }
}
