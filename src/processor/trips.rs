use std::sync::{Arc, Mutex};

use tracing::info;
use uuid::Uuid;

use crate::models::TripEvent;
use crate::observer::GeoEventMirror;
use crate::processor::recorder::GeoEventRecorder;
use crate::store::{EventFilter, EventStore, Result, StoreError};

/// Active-trip selection: at most one trip is active, and newly recorded
/// geo events attach to it.
///
/// Every transition rebuilds the bound observers' subscriptions under the
/// new filter: trip equality while a trip is active, the idle
/// minimum-speed threshold otherwise. The previous subscription is torn
/// down, not incrementally re-filtered.
pub struct TripSelector {
    store: Arc<dyn EventStore>,
    recorder: Arc<GeoEventRecorder>,
    idle_min_speed_mph: Option<f64>,
    observers: Mutex<Vec<Arc<GeoEventMirror>>>,
}

impl TripSelector {
    pub fn new(
        store: Arc<dyn EventStore>,
        recorder: Arc<GeoEventRecorder>,
        idle_min_speed_mph: Option<f64>,
    ) -> Self {
        Self {
            store,
            recorder,
            idle_min_speed_mph,
            observers: Mutex::new(Vec::new()),
        }
    }

    /// Registers a mirror to be re-filtered on every transition and applies
    /// the current filter to it immediately.
    pub fn bind_observer(&self, mirror: Arc<GeoEventMirror>) {
        mirror.set_filter(self.current_filter());
        let mut observers = self.observers.lock().expect("lock poisoned");
        observers.push(mirror);
    }

    /// Creates a trip and makes it the active one.
    pub fn create_trip(&self, name: &str) -> Result<TripEvent> {
        let trip = self.store.create_trip(name)?;
        self.activate(Some(&trip));
        Ok(trip)
    }

    /// Selects an existing trip.
    pub fn select_trip(&self, trip_id: Uuid) -> Result<TripEvent> {
        let trip = self
            .store
            .trip(trip_id)
            .ok_or(StoreError::NotFound(trip_id))?;
        self.activate(Some(&trip));
        Ok(trip)
    }

    pub fn clear_selection(&self) {
        self.activate(None);
    }

    pub fn active_trip(&self) -> Option<Uuid> {
        self.recorder.active_trip()
    }

    pub fn current_filter(&self) -> EventFilter {
        match self.recorder.active_trip() {
            Some(trip_id) => EventFilter::for_trip(trip_id),
            None => match self.idle_min_speed_mph {
                Some(mph) => EventFilter::min_speed(mph),
                None => EventFilter::all(),
            },
        }
    }

    fn activate(&self, trip: Option<&TripEvent>) {
        self.recorder.set_active_trip(trip.map(|t| t.id));
        match trip {
            Some(t) => info!("active trip set to '{}'", t.trip_name),
            None => info!("active trip cleared"),
        }

        let filter = self.current_filter();
        let observers = self.observers.lock().expect("lock poisoned");
        for mirror in observers.iter() {
            mirror.set_filter(filter.clone());
        }
    }
}
