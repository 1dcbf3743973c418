//! Storage layer: the event store holding geo events and trips, and the
//! small key-value store backing the home location.
//!
//! The event store is an opaque transactional object store. Every committed
//! mutation recomputes each live query subscription and delivers the minimal
//! ordered diff to its listener.

pub mod kv;
pub mod memory;

pub use kv::{FileKeyValueStore, KeyValueStore, MemoryKeyValueStore};
pub use memory::MemoryEventStore;

use std::sync::Arc;

use uuid::Uuid;

use crate::models::{GeoEvent, TripEvent};

/// Errors surfaced by the storage layer. The caller decides whether to
/// retry, surface, or abort; the pipeline never terminates the process on a
/// persistence failure.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("record not found: {0}")]
    NotFound(Uuid),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Predicate over geo events: trip equality when a trip is selected, or an
/// optional minimum-speed threshold otherwise.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct EventFilter {
    pub trip_id: Option<Uuid>,
    pub min_speed_mph: Option<f64>,
}

impl EventFilter {
    /// Matches every event.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn for_trip(trip_id: Uuid) -> Self {
        Self {
            trip_id: Some(trip_id),
            min_speed_mph: None,
        }
    }

    pub fn min_speed(mph: f64) -> Self {
        Self {
            trip_id: None,
            min_speed_mph: Some(mph),
        }
    }

    pub fn matches(&self, event: &GeoEvent) -> bool {
        if let Some(trip_id) = self.trip_id {
            if event.trip_id != Some(trip_id) {
                return false;
            }
        }
        if let Some(min) = self.min_speed_mph {
            if event.speed_mph < min {
                return false;
            }
        }
        true
    }
}

/// One change to an ordered query result. Operations are applied in
/// delivery order; each index assumes the previous operations in the batch
/// have already been applied.
#[derive(Debug, Clone, PartialEq)]
pub enum DiffOp {
    Insert { index: usize, event: GeoEvent },
    Delete { index: usize },
    Update { index: usize, event: GeoEvent },
    Move { from: usize, to: usize },
}

/// Receives a subscription's change stream. `will_change`/`did_change`
/// bracket each batch so a consumer can group its own updates. Callbacks
/// may run on any thread and must not call back into the store.
pub trait ChangeListener: Send + Sync {
    fn will_change(&self) {}
    fn apply(&self, ops: &[DiffOp]);
    fn did_change(&self) {}
}

/// Identifies a live subscription. Subscribers are held strongly until an
/// explicit `unsubscribe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(pub(crate) u64);

/// Transactional store of geo events and trips with query subscriptions.
///
/// Queries return newest first (timestamp descending, insertion order
/// breaking ties). Every committed mutation recomputes each live
/// subscription's result and delivers the minimal ordered diff to its
/// listener.
pub trait EventStore: Send + Sync {
    /// Creates a trip stamped with the current time.
    fn create_trip(&self, name: &str) -> Result<TripEvent>;

    /// All trips, newest first.
    fn trips(&self) -> Vec<TripEvent>;

    fn trip(&self, id: Uuid) -> Option<TripEvent>;

    /// Persists a geo event and notifies matching subscriptions.
    fn insert_geo_event(&self, event: GeoEvent) -> Result<GeoEvent>;

    /// Changes an event's trip association (the one mutable field).
    fn assign_trip(&self, event_id: Uuid, trip_id: Option<Uuid>) -> Result<()>;

    fn delete_geo_event(&self, event_id: Uuid) -> Result<()>;

    /// Deletes a trip and cascades to its owned geo events.
    fn delete_trip(&self, trip_id: Uuid) -> Result<()>;

    /// Drops every geo event and trip.
    fn clear_all(&self) -> Result<()>;

    /// Events matching `filter`, newest first.
    fn geo_events(&self, filter: &EventFilter) -> Vec<GeoEvent>;

    fn geo_event_count(&self) -> usize;

    /// Registers a listener for the query described by `filter`. The
    /// baseline result is captured at subscription time; only subsequent
    /// mutations are delivered as diffs.
    fn subscribe(&self, filter: EventFilter, listener: Arc<dyn ChangeListener>) -> SubscriptionId {
        self.subscribe_with_snapshot(filter, listener).0
    }

    /// Like `subscribe`, but also returns the baseline result the diff
    /// stream will be computed against, captured atomically with the
    /// subscription.
    fn subscribe_with_snapshot(
        &self,
        filter: EventFilter,
        listener: Arc<dyn ChangeListener>,
    ) -> (SubscriptionId, Vec<GeoEvent>);

    fn unsubscribe(&self, id: SubscriptionId);
}
