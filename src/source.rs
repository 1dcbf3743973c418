use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::models::{AuthorizationStatus, Fix, RawFix};
use crate::processor::GeoEventRecorder;

/// Events delivered by a location source.
#[derive(Debug, Clone)]
pub enum SourceEvent {
    Fix(Fix),
    Authorization(AuthorizationStatus),
}

/// Accuracy/power policy pushed down to the location source by the
/// recorder.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TrackingProfile {
    /// Tight accuracy, report every movement. Used away from home.
    HighAccuracy,
    /// Relaxed accuracy, updates coalesced by the given distance filter.
    /// Used near home.
    LowPower { distance_filter_m: f64 },
}

/// Reconfiguration seam of the platform location service.
pub trait SourceControl: Send + Sync {
    fn reconfigure(&self, profile: TrackingProfile);
}

/// Replays fixes from a JSON-lines file through the pipeline channel,
/// standing in for the platform location service.
pub struct ReplaySource {
    path: PathBuf,
}

impl ReplaySource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Emits an authorization grant followed by every parseable fix.
    /// Stops early if the pipeline has gone away.
    pub async fn run(&self, tx: mpsc::Sender<SourceEvent>) -> anyhow::Result<()> {
        let content = tokio::fs::read_to_string(&self.path).await?;
        info!("replaying fixes from {}", self.path.display());

        if tx
            .send(SourceEvent::Authorization(
                AuthorizationStatus::AuthorizedAlways,
            ))
            .await
            .is_err()
        {
            return Ok(());
        }

        for (lineno, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }

            let raw: RawFix = match serde_json::from_str(line) {
                Ok(raw) => raw,
                Err(e) => {
                    warn!("failed to parse fix at line {}: {}", lineno + 1, e);
                    continue;
                }
            };

            match raw.into_fix() {
                Some(fix) => {
                    if tx.send(SourceEvent::Fix(fix)).await.is_err() {
                        debug!("pipeline gone, stopping replay");
                        break;
                    }
                }
                None => warn!("fix at line {} missing required fields, skipping", lineno + 1),
            }
        }

        Ok(())
    }
}

impl SourceControl for ReplaySource {
    fn reconfigure(&self, profile: TrackingProfile) {
        debug!("replay source ignoring profile change: {:?}", profile);
    }
}

/// Drives the recorder from a source event channel.
///
/// Fixes arriving before an authorization grant are dropped; a denied
/// status leaves the loop waiting for a later grant. Recorder errors are
/// logged and the loop keeps consuming.
pub struct Pipeline {
    recorder: Arc<GeoEventRecorder>,
    live: Arc<AtomicBool>,
}

/// Stops a running pipeline. An event that raced the stop is a safe no-op
/// on the loop side.
#[derive(Clone)]
pub struct PipelineHandle {
    live: Arc<AtomicBool>,
}

impl PipelineHandle {
    pub fn stop(&self) {
        if self.live.swap(false, Ordering::SeqCst) {
            info!("location updates stopped");
        }
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }
}

impl Pipeline {
    pub fn new(recorder: Arc<GeoEventRecorder>) -> (Self, PipelineHandle) {
        let live = Arc::new(AtomicBool::new(true));
        (
            Self {
                recorder,
                live: live.clone(),
            },
            PipelineHandle { live },
        )
    }

    /// Consumes events until the channel closes.
    pub async fn run(self, mut rx: mpsc::Receiver<SourceEvent>) {
        let mut authorized = false;
        info!("location updates started");

        while let Some(event) = rx.recv().await {
            if !self.live.load(Ordering::SeqCst) {
                debug!("event delivered after stop, ignoring");
                continue;
            }

            match event {
                SourceEvent::Authorization(status) => {
                    info!("authorization changed: {}", status.as_str());
                    authorized = status.is_authorized();
                }
                SourceEvent::Fix(fix) => {
                    if !authorized {
                        warn!("fix received without authorization, dropping");
                        continue;
                    }
                    match self.recorder.on_fix(&fix) {
                        Ok(result) => debug!("fix processed: {:?}", result),
                        Err(e) => error!("failed to record fix: {}", e),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::home::HomeCalibrator;
    use crate::processor::RecorderConfig;
    use crate::store::{EventStore, MemoryEventStore, MemoryKeyValueStore};
    use chrono::Utc;

    struct NoopSource;

    impl SourceControl for NoopSource {
        fn reconfigure(&self, _profile: TrackingProfile) {}
    }

    fn recorder() -> (Arc<MemoryEventStore>, Arc<GeoEventRecorder>) {
        let store = Arc::new(MemoryEventStore::new());
        let home = Arc::new(HomeCalibrator::new(Arc::new(MemoryKeyValueStore::new())));
        let rec = Arc::new(GeoEventRecorder::new(
            RecorderConfig::default(),
            store.clone(),
            home,
            Arc::new(NoopSource),
        ));
        (store, rec)
    }

    fn fix() -> Fix {
        Fix {
            latitude: 45.0,
            longitude: 7.0,
            timestamp: Utc::now(),
            horizontal_accuracy_m: 10.0,
            speed_mps: 3.0,
        }
    }

    #[tokio::test]
    async fn test_fix_before_authorization_dropped() {
        let (store, rec) = recorder();
        let (pipeline, _handle) = Pipeline::new(rec);
        let (tx, rx) = mpsc::channel(16);

        tx.send(SourceEvent::Fix(fix())).await.unwrap();
        tx.send(SourceEvent::Authorization(
            AuthorizationStatus::AuthorizedWhenInUse,
        ))
        .await
        .unwrap();
        tx.send(SourceEvent::Fix(fix())).await.unwrap();
        drop(tx);

        pipeline.run(rx).await;

        // Only the authorized fix landed (it calibrated home).
        assert_eq!(store.geo_event_count(), 1);
    }

    #[tokio::test]
    async fn test_denied_authorization_blocks_until_granted() {
        let (store, rec) = recorder();
        let (pipeline, _handle) = Pipeline::new(rec);
        let (tx, rx) = mpsc::channel(16);

        tx.send(SourceEvent::Authorization(AuthorizationStatus::Denied))
            .await
            .unwrap();
        tx.send(SourceEvent::Fix(fix())).await.unwrap();
        tx.send(SourceEvent::Authorization(
            AuthorizationStatus::AuthorizedAlways,
        ))
        .await
        .unwrap();
        tx.send(SourceEvent::Fix(fix())).await.unwrap();
        drop(tx);

        pipeline.run(rx).await;
        assert_eq!(store.geo_event_count(), 1);
    }

    #[tokio::test]
    async fn test_events_after_stop_are_noops() {
        let (store, rec) = recorder();
        let (pipeline, handle) = Pipeline::new(rec);
        let (tx, rx) = mpsc::channel(16);

        tx.send(SourceEvent::Authorization(
            AuthorizationStatus::AuthorizedAlways,
        ))
        .await
        .unwrap();
        handle.stop();
        tx.send(SourceEvent::Fix(fix())).await.unwrap();
        drop(tx);

        pipeline.run(rx).await;
        assert_eq!(store.geo_event_count(), 0);
        assert!(!handle.is_live());
    }
}
