use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::home::HomeCalibrator;
use crate::models::{Fix, GeoEvent};
use crate::source::{SourceControl, TrackingProfile};
use crate::store::{EventStore, StoreError};

/// Recorder thresholds. `min_speed_mph: None` disables the speed gate and
/// leaves the pure distance rule.
#[derive(Debug, Clone)]
pub struct RecorderConfig {
    pub max_accuracy_m: f64,
    pub max_fix_age_secs: f64,
    pub home_distance_m: f64,
    pub min_speed_mph: Option<f64>,
    pub near_home_distance_filter_m: f64,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            max_accuracy_m: 50.0,
            max_fix_age_secs: 60.0,
            home_distance_m: 200.0,
            min_speed_mph: None,
            near_home_distance_filter_m: 100.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    LowAccuracy,
    Stale,
}

/// Outcome of one fix through the recorder.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordResult {
    /// Failed the data-quality gate; logged and counted, never stored.
    Discarded { reason: DiscardReason },
    /// Accepted but below the distance (or speed) gate; not stored.
    NotSignificant { distance_m: f64 },
    Recorded { event: GeoEvent },
    /// First accepted fix with home unset: home was calibrated and the fix
    /// stored regardless of distance.
    HomeCalibrated { event: GeoEvent },
}

#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Turns raw fixes into filtered, persisted geo events tagged to the
/// active trip, calibrating home from the first accepted fix and pushing
/// the accuracy/power profile down to the location source.
pub struct GeoEventRecorder {
    config: RecorderConfig,
    store: Arc<dyn EventStore>,
    home: Arc<HomeCalibrator>,
    source: Arc<dyn SourceControl>,
    active_trip: Mutex<Option<Uuid>>,
    discard_count: AtomicU32,
    last_fix: Mutex<Option<Fix>>,
    last_profile: Mutex<Option<TrackingProfile>>,
}

impl GeoEventRecorder {
    pub fn new(
        config: RecorderConfig,
        store: Arc<dyn EventStore>,
        home: Arc<HomeCalibrator>,
        source: Arc<dyn SourceControl>,
    ) -> Self {
        Self {
            config,
            store,
            home,
            source,
            active_trip: Mutex::new(None),
            discard_count: AtomicU32::new(0),
            last_fix: Mutex::new(None),
            last_profile: Mutex::new(None),
        }
    }

    /// Processes one fix. Persistence failures come back as a typed error;
    /// the caller decides how to react.
    pub fn on_fix(&self, fix: &Fix) -> Result<RecordResult, RecordError> {
        let now = Utc::now();

        if fix.horizontal_accuracy_m >= self.config.max_accuracy_m {
            let count = self.discard_count.fetch_add(1, Ordering::Relaxed) + 1;
            warn!(
                "discard location count {} horizontal accuracy = {:.1}",
                count, fix.horizontal_accuracy_m
            );
            return Ok(RecordResult::Discarded {
                reason: DiscardReason::LowAccuracy,
            });
        }

        let age = fix.age_secs(now);
        if age >= self.config.max_fix_age_secs || age < 0.0 {
            let count = self.discard_count.fetch_add(1, Ordering::Relaxed) + 1;
            warn!("discard location count {} fix age = {:.1}s", count, age);
            return Ok(RecordResult::Discarded {
                reason: DiscardReason::Stale,
            });
        }

        let speed_mph = fix.speed_mph();
        info!(
            "fix lat:{:.5} long:{:.5} speed MPH = {:.1}",
            fix.latitude, fix.longitude, speed_mph
        );

        let home = self.home.home();
        let distance_m = home
            .map(|h| h.distance_m(&fix.coordinate()).abs())
            .unwrap_or(0.0);

        let speed_ok = self
            .config
            .min_speed_mph
            .map(|min| speed_mph > min)
            .unwrap_or(true);

        let mut result = if distance_m > self.config.home_distance_m && speed_ok {
            let event = self.persist(fix, speed_mph)?;
            RecordResult::Recorded { event }
        } else {
            info!(
                "no significant travel, distance from home = {:.1} meters",
                distance_m
            );
            RecordResult::NotSignificant { distance_m }
        };

        // First accepted fix with home unset calibrates home and is stored
        // regardless of the distance test.
        if home.is_none() {
            self.home.set_home(fix.coordinate())?;
            let event = self.persist(fix, speed_mph)?;
            result = RecordResult::HomeCalibrated { event };
        }

        self.reconfigure_source(distance_m);

        *self.last_fix.lock().expect("lock poisoned") = Some(fix.clone());

        Ok(result)
    }

    pub fn discard_count(&self) -> u32 {
        self.discard_count.load(Ordering::Relaxed)
    }

    pub fn last_fix(&self) -> Option<Fix> {
        self.last_fix.lock().expect("lock poisoned").clone()
    }

    pub fn active_trip(&self) -> Option<Uuid> {
        *self.active_trip.lock().expect("lock poisoned")
    }

    pub fn set_active_trip(&self, trip_id: Option<Uuid>) {
        *self.active_trip.lock().expect("lock poisoned") = trip_id;
    }

    fn persist(&self, fix: &Fix, speed_mph: f64) -> Result<GeoEvent, RecordError> {
        let event = GeoEvent {
            id: Uuid::new_v4(),
            timestamp: fix.timestamp,
            latitude: fix.latitude,
            longitude: fix.longitude,
            speed_mph,
            trip_id: self.active_trip(),
        };
        Ok(self.store.insert_geo_event(event)?)
    }

    /// Far from home: tight accuracy, no distance filter. Near home: relax
    /// accuracy and let the source coalesce updates. Only reconfigures on
    /// a profile change.
    fn reconfigure_source(&self, distance_m: f64) {
        let profile = if distance_m > self.config.home_distance_m {
            TrackingProfile::HighAccuracy
        } else {
            TrackingProfile::LowPower {
                distance_filter_m: self.config.near_home_distance_filter_m,
            }
        };

        let mut last = self.last_profile.lock().expect("lock poisoned");
        if last.as_ref() != Some(&profile) {
            self.source.reconfigure(profile);
            *last = Some(profile);
        }
    }
}
