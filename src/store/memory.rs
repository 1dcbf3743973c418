use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use super::{
    ChangeListener, DiffOp, EventFilter, EventStore, Result, StoreError, SubscriptionId,
};
use crate::models::{GeoEvent, TripEvent};

/// In-memory reference implementation of the event store.
///
/// A single mutex guards records and subscriptions; change notifications
/// are dispatched after the lock is released, so listeners may safely take
/// their own locks but must not call back into the store.
pub struct MemoryEventStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    seq: u64,
    next_subscription: u64,
    geo_events: Vec<StoredEvent>,
    trips: Vec<StoredTrip>,
    subscriptions: Vec<Subscription>,
}

struct StoredEvent {
    event: GeoEvent,
    /// Insertion order; breaks timestamp ties so query order is stable.
    seq: u64,
    /// Bumped on every mutation of the record.
    rev: u64,
}

struct StoredTrip {
    trip: TripEvent,
    seq: u64,
}

struct Subscription {
    id: SubscriptionId,
    filter: EventFilter,
    listener: Arc<dyn ChangeListener>,
    /// (id, rev) of the last delivered result, in query order.
    rows: Vec<(Uuid, u64)>,
}

type Notification = (Arc<dyn ChangeListener>, Vec<DiffOp>);

impl MemoryEventStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    fn dispatch(&self, notifications: Vec<Notification>) {
        for (listener, ops) in notifications {
            listener.will_change();
            listener.apply(&ops);
            listener.did_change();
        }
    }
}

impl EventStore for MemoryEventStore {
    fn create_trip(&self, name: &str) -> Result<TripEvent> {
        let trip = TripEvent {
            id: Uuid::new_v4(),
            trip_name: name.to_string(),
            timestamp: Utc::now(),
        };

        let mut inner = self.inner.lock().expect("lock poisoned");
        inner.seq += 1;
        let seq = inner.seq;
        inner.trips.push(StoredTrip {
            trip: trip.clone(),
            seq,
        });

        Ok(trip)
    }

    fn trips(&self) -> Vec<TripEvent> {
        let inner = self.inner.lock().expect("lock poisoned");
        let mut trips: Vec<&StoredTrip> = inner.trips.iter().collect();
        trips.sort_by(|a, b| {
            b.trip
                .timestamp
                .cmp(&a.trip.timestamp)
                .then(b.seq.cmp(&a.seq))
        });
        trips.into_iter().map(|t| t.trip.clone()).collect()
    }

    fn trip(&self, id: Uuid) -> Option<TripEvent> {
        let inner = self.inner.lock().expect("lock poisoned");
        inner
            .trips
            .iter()
            .find(|t| t.trip.id == id)
            .map(|t| t.trip.clone())
    }

    fn insert_geo_event(&self, event: GeoEvent) -> Result<GeoEvent> {
        let notifications = {
            let mut inner = self.inner.lock().expect("lock poisoned");
            if let Some(trip_id) = event.trip_id {
                if !inner.trips.iter().any(|t| t.trip.id == trip_id) {
                    return Err(StoreError::NotFound(trip_id));
                }
            }
            inner.seq += 1;
            let seq = inner.seq;
            inner.geo_events.push(StoredEvent {
                event: event.clone(),
                seq,
                rev: 0,
            });
            inner.recompute_subscriptions()
        };

        self.dispatch(notifications);
        Ok(event)
    }

    fn assign_trip(&self, event_id: Uuid, trip_id: Option<Uuid>) -> Result<()> {
        let notifications = {
            let mut inner = self.inner.lock().expect("lock poisoned");
            if let Some(trip_id) = trip_id {
                if !inner.trips.iter().any(|t| t.trip.id == trip_id) {
                    return Err(StoreError::NotFound(trip_id));
                }
            }
            let stored = inner
                .geo_events
                .iter_mut()
                .find(|s| s.event.id == event_id)
                .ok_or(StoreError::NotFound(event_id))?;
            stored.event.trip_id = trip_id;
            stored.rev += 1;
            inner.recompute_subscriptions()
        };

        self.dispatch(notifications);
        Ok(())
    }

    fn delete_geo_event(&self, event_id: Uuid) -> Result<()> {
        let notifications = {
            let mut inner = self.inner.lock().expect("lock poisoned");
            let index = inner
                .geo_events
                .iter()
                .position(|s| s.event.id == event_id)
                .ok_or(StoreError::NotFound(event_id))?;
            inner.geo_events.remove(index);
            inner.recompute_subscriptions()
        };

        self.dispatch(notifications);
        Ok(())
    }

    fn delete_trip(&self, trip_id: Uuid) -> Result<()> {
        let notifications = {
            let mut inner = self.inner.lock().expect("lock poisoned");
            let index = inner
                .trips
                .iter()
                .position(|t| t.trip.id == trip_id)
                .ok_or(StoreError::NotFound(trip_id))?;
            inner.trips.remove(index);
            inner.geo_events.retain(|s| s.event.trip_id != Some(trip_id));
            inner.recompute_subscriptions()
        };

        self.dispatch(notifications);
        Ok(())
    }

    fn clear_all(&self) -> Result<()> {
        let notifications = {
            let mut inner = self.inner.lock().expect("lock poisoned");
            let events = inner.geo_events.len();
            let trips = inner.trips.len();
            inner.geo_events.clear();
            inner.trips.clear();
            debug!(events, trips, "clear_all");
            inner.recompute_subscriptions()
        };

        self.dispatch(notifications);
        Ok(())
    }

    fn geo_events(&self, filter: &EventFilter) -> Vec<GeoEvent> {
        let inner = self.inner.lock().expect("lock poisoned");
        inner
            .query(filter)
            .into_iter()
            .map(|(_, _, event)| event)
            .collect()
    }

    fn geo_event_count(&self) -> usize {
        let inner = self.inner.lock().expect("lock poisoned");
        inner.geo_events.len()
    }

    fn subscribe_with_snapshot(
        &self,
        filter: EventFilter,
        listener: Arc<dyn ChangeListener>,
    ) -> (SubscriptionId, Vec<GeoEvent>) {
        let mut inner = self.inner.lock().expect("lock poisoned");
        inner.next_subscription += 1;
        let id = SubscriptionId(inner.next_subscription);
        let result = inner.query(&filter);
        let rows = result.iter().map(|(id, rev, _)| (*id, *rev)).collect();
        let snapshot = result.into_iter().map(|(_, _, event)| event).collect();
        inner.subscriptions.push(Subscription {
            id,
            filter,
            listener,
            rows,
        });
        (id, snapshot)
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        let mut inner = self.inner.lock().expect("lock poisoned");
        inner.subscriptions.retain(|s| s.id != id);
    }
}

impl Default for MemoryEventStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Inner {
    /// Matching events as (id, rev, event), timestamp descending with
    /// insertion order breaking ties.
    fn query(&self, filter: &EventFilter) -> Vec<(Uuid, u64, GeoEvent)> {
        let mut rows: Vec<&StoredEvent> = self
            .geo_events
            .iter()
            .filter(|s| filter.matches(&s.event))
            .collect();
        rows.sort_by(|a, b| {
            b.event
                .timestamp
                .cmp(&a.event.timestamp)
                .then(b.seq.cmp(&a.seq))
        });
        rows.into_iter()
            .map(|s| (s.event.id, s.rev, s.event.clone()))
            .collect()
    }

    fn recompute_subscriptions(&mut self) -> Vec<Notification> {
        let mut notifications = Vec::new();
        // Split borrow: query needs &self fields other than subscriptions.
        let mut subscriptions = std::mem::take(&mut self.subscriptions);
        for sub in &mut subscriptions {
            let new_rows = self.query(&sub.filter);
            let ops = diff_rows(&sub.rows, &new_rows);
            sub.rows = new_rows.into_iter().map(|(id, rev, _)| (id, rev)).collect();
            if !ops.is_empty() {
                notifications.push((Arc::clone(&sub.listener), ops));
            }
        }
        self.subscriptions = subscriptions;
        notifications
    }
}

/// Computes the ordered operation sequence transforming `old` into `new`.
/// Each operation's indices assume the previous operations have been
/// applied: deletes first (descending), then per-position inserts, moves
/// and updates.
fn diff_rows(old: &[(Uuid, u64)], new: &[(Uuid, u64, GeoEvent)]) -> Vec<DiffOp> {
    let new_ids: HashSet<Uuid> = new.iter().map(|(id, _, _)| *id).collect();
    let old_revs: HashMap<Uuid, u64> = old.iter().copied().collect();

    let mut ops = Vec::new();
    let mut work: Vec<Uuid> = old.iter().map(|(id, _)| *id).collect();

    for i in (0..work.len()).rev() {
        if !new_ids.contains(&work[i]) {
            ops.push(DiffOp::Delete { index: i });
            work.remove(i);
        }
    }

    for (j, (id, rev, event)) in new.iter().enumerate() {
        // Positions below j are already settled, so any hit is at k >= j.
        match work.iter().position(|w| w == id) {
            None => {
                ops.push(DiffOp::Insert {
                    index: j,
                    event: event.clone(),
                });
                work.insert(j, *id);
            }
            Some(k) if k != j => {
                work.remove(k);
                work.insert(j, *id);
                ops.push(DiffOp::Move { from: k, to: j });
                if old_revs.get(id) != Some(rev) {
                    ops.push(DiffOp::Update {
                        index: j,
                        event: event.clone(),
                    });
                }
            }
            Some(_) => {
                if old_revs.get(id) != Some(rev) {
                    ops.push(DiffOp::Update {
                        index: j,
                        event: event.clone(),
                    });
                }
            }
        }
    }

    ops
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use std::sync::Mutex as StdMutex;

    fn event(ts_offset_secs: i64, speed_mph: f64, trip_id: Option<Uuid>) -> GeoEvent {
        GeoEvent {
            id: Uuid::new_v4(),
            timestamp: Utc::now() + Duration::seconds(ts_offset_secs),
            latitude: 20.0,
            longitude: -100.0,
            speed_mph,
            trip_id,
        }
    }

    #[derive(Default)]
    struct RecordingListener {
        batches: StdMutex<Vec<Vec<DiffOp>>>,
        brackets: StdMutex<(usize, usize)>,
    }

    impl ChangeListener for RecordingListener {
        fn will_change(&self) {
            self.brackets.lock().unwrap().0 += 1;
        }

        fn apply(&self, ops: &[DiffOp]) {
            self.batches.lock().unwrap().push(ops.to_vec());
        }

        fn did_change(&self) {
            self.brackets.lock().unwrap().1 += 1;
        }
    }

    #[test]
    fn test_insert_notifies_at_sorted_position() {
        let store = MemoryEventStore::new();
        let listener = Arc::new(RecordingListener::default());
        store.subscribe(EventFilter::all(), listener.clone());

        let newer = event(0, 10.0, None);
        let older = event(-100, 5.0, None);
        store.insert_geo_event(newer.clone()).unwrap();
        store.insert_geo_event(older.clone()).unwrap();

        let batches = listener.batches.lock().unwrap();
        assert_eq!(batches.len(), 2);
        assert_eq!(
            batches[0],
            vec![DiffOp::Insert {
                index: 0,
                event: newer,
            }]
        );
        // The older event sorts below the newer one.
        assert_eq!(
            batches[1],
            vec![DiffOp::Insert {
                index: 1,
                event: older,
            }]
        );

        let brackets = listener.brackets.lock().unwrap();
        assert_eq!(*brackets, (2, 2));
    }

    #[test]
    fn test_delete_notifies_with_current_index() {
        let store = MemoryEventStore::new();
        let a = store.insert_geo_event(event(0, 1.0, None)).unwrap();
        let _b = store.insert_geo_event(event(-10, 1.0, None)).unwrap();

        let listener = Arc::new(RecordingListener::default());
        store.subscribe(EventFilter::all(), listener.clone());

        store.delete_geo_event(a.id).unwrap();

        let batches = listener.batches.lock().unwrap();
        assert_eq!(batches.as_slice(), &[vec![DiffOp::Delete { index: 0 }]]);
    }

    #[test]
    fn test_assign_trip_delivers_update() {
        let store = MemoryEventStore::new();
        let trip = store.create_trip("commute").unwrap();
        let ev = store.insert_geo_event(event(0, 3.0, None)).unwrap();

        let listener = Arc::new(RecordingListener::default());
        store.subscribe(EventFilter::all(), listener.clone());

        store.assign_trip(ev.id, Some(trip.id)).unwrap();

        let batches = listener.batches.lock().unwrap();
        assert_eq!(batches.len(), 1);
        match &batches[0][0] {
            DiffOp::Update { index: 0, event } => assert_eq!(event.trip_id, Some(trip.id)),
            other => panic!("expected update, got {:?}", other),
        }
    }

    #[test]
    fn test_trip_filter_sees_membership_changes_as_insert_delete() {
        let store = MemoryEventStore::new();
        let trip = store.create_trip("errand").unwrap();
        let ev = store.insert_geo_event(event(0, 3.0, None)).unwrap();

        let listener = Arc::new(RecordingListener::default());
        store.subscribe(EventFilter::for_trip(trip.id), listener.clone());

        store.assign_trip(ev.id, Some(trip.id)).unwrap();
        store.assign_trip(ev.id, None).unwrap();

        let batches = listener.batches.lock().unwrap();
        assert_eq!(batches.len(), 2);
        assert!(matches!(batches[0][0], DiffOp::Insert { index: 0, .. }));
        assert_eq!(batches[1], vec![DiffOp::Delete { index: 0 }]);
    }

    #[test]
    fn test_delete_trip_cascades_to_owned_events() {
        let store = MemoryEventStore::new();
        let trip = store.create_trip("cascade").unwrap();
        store
            .insert_geo_event(event(0, 3.0, Some(trip.id)))
            .unwrap();
        store
            .insert_geo_event(event(-5, 4.0, Some(trip.id)))
            .unwrap();
        let loose = store.insert_geo_event(event(-10, 5.0, None)).unwrap();

        store.delete_trip(trip.id).unwrap();

        let remaining = store.geo_events(&EventFilter::all());
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, loose.id);
        assert!(store.trip(trip.id).is_none());
    }

    #[test]
    fn test_trips_listed_newest_first() {
        let store = MemoryEventStore::new();
        let first = store.create_trip("first").unwrap();
        let second = store.create_trip("second").unwrap();

        let trips = store.trips();
        assert_eq!(trips.len(), 2);
        // Created back to back; insertion order breaks the timestamp tie.
        assert_eq!(trips[0].id, second.id);
        assert_eq!(trips[1].id, first.id);
    }

    #[test]
    fn test_insert_with_unknown_trip_rejected() {
        let store = MemoryEventStore::new();
        let result = store.insert_geo_event(event(0, 3.0, Some(Uuid::new_v4())));
        assert!(matches!(result, Err(StoreError::NotFound(_))));
        assert_eq!(store.geo_event_count(), 0);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let store = MemoryEventStore::new();
        let listener = Arc::new(RecordingListener::default());
        let sub = store.subscribe(EventFilter::all(), listener.clone());
        store.unsubscribe(sub);

        store.insert_geo_event(event(0, 1.0, None)).unwrap();
        assert!(listener.batches.lock().unwrap().is_empty());
    }

    #[test]
    fn test_diff_rows_move_and_update() {
        let a = event(0, 1.0, None);
        let b = event(-1, 1.0, None);
        let c = event(-2, 1.0, None);

        let old = vec![(a.id, 0), (b.id, 0), (c.id, 0)];
        // b deleted; c updated and now ahead of a.
        let new = vec![(c.id, 1, c.clone()), (a.id, 0, a.clone())];

        let ops = diff_rows(&old, &new);
        assert_eq!(
            ops,
            vec![
                DiffOp::Delete { index: 1 },
                DiffOp::Move { from: 1, to: 0 },
                DiffOp::Update {
                    index: 0,
                    event: c,
                },
            ]
        );
    }

    #[test]
    fn test_diff_rows_empty_to_full_is_ordered_inserts() {
        let a = event(0, 1.0, None);
        let b = event(-1, 1.0, None);
        let ops = diff_rows(&[], &[(a.id, 0, a.clone()), (b.id, 0, b.clone())]);
        assert_eq!(
            ops,
            vec![
                DiffOp::Insert { index: 0, event: a },
                DiffOp::Insert { index: 1, event: b },
            ]
        );
    }
}
