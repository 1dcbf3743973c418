use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::models::GeoEvent;
use crate::store::{ChangeListener, DiffOp, EventFilter, EventStore, SubscriptionId};

/// Mirrors a sorted, filtered geo-event query into an in-memory list by
/// applying the store's diff stream in delivery order.
///
/// A single lock guards the mirrored list for the whole duration of any
/// read or write; the store may deliver batches on any thread. Switching
/// the filter tears the subscription down and rebuilds it; there is no
/// incremental predicate change. Callers must `detach` on teardown; the
/// store holds its subscribers strongly.
pub struct GeoEventMirror {
    store: Arc<dyn EventStore>,
    state: Mutex<MirrorState>,
}

struct MirrorState {
    events: Vec<GeoEvent>,
    subscription: Option<SubscriptionId>,
    /// Bumped on every resubscribe; stale batches from a torn-down
    /// subscription are dropped.
    generation: u64,
}

/// Per-subscription listener handed to the store. Carries the generation
/// it was created under so a batch that raced a resubscribe is a no-op.
struct MirrorSubscriber {
    mirror: Arc<GeoEventMirror>,
    generation: u64,
}

impl ChangeListener for MirrorSubscriber {
    fn apply(&self, ops: &[DiffOp]) {
        self.mirror.apply_batch(self.generation, ops);
    }
}

impl GeoEventMirror {
    /// Builds a mirror of `filter`'s query and subscribes to its changes.
    pub fn attach(store: Arc<dyn EventStore>, filter: EventFilter) -> Arc<Self> {
        let mirror = Arc::new(Self {
            store,
            state: Mutex::new(MirrorState {
                events: Vec::new(),
                subscription: None,
                generation: 0,
            }),
        });
        mirror.resubscribe(filter);
        mirror
    }

    /// Replaces the query filter: tears down the current subscription,
    /// re-fetches the full result under the new filter and subscribes anew.
    pub fn set_filter(self: &Arc<Self>, filter: EventFilter) {
        self.resubscribe(filter);
    }

    /// Unregisters from the store. The mirror keeps its last contents.
    pub fn detach(&self) {
        let mut state = self.state.lock().expect("lock poisoned");
        state.generation += 1;
        if let Some(id) = state.subscription.take() {
            self.store.unsubscribe(id);
        }
    }

    /// Snapshot of the mirrored list, newest first.
    pub fn events(&self) -> Vec<GeoEvent> {
        let state = self.state.lock().expect("lock poisoned");
        state.events.clone()
    }

    pub fn len(&self) -> usize {
        let state = self.state.lock().expect("lock poisoned");
        state.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn resubscribe(self: &Arc<Self>, filter: EventFilter) {
        // The mirror lock is held across the store call so a batch
        // dispatched concurrently waits until priming is complete. The
        // store releases its own lock before delivering, so the lock order
        // here cannot deadlock.
        let mut state = self.state.lock().expect("lock poisoned");
        if let Some(old) = state.subscription.take() {
            self.store.unsubscribe(old);
        }
        state.generation += 1;
        let subscriber = Arc::new(MirrorSubscriber {
            mirror: Arc::clone(self),
            generation: state.generation,
        });
        let (id, snapshot) = self.store.subscribe_with_snapshot(filter, subscriber);
        state.events = snapshot;
        state.subscription = Some(id);
    }

    fn apply_batch(&self, generation: u64, ops: &[DiffOp]) {
        let mut state = self.state.lock().expect("lock poisoned");
        if generation != state.generation {
            debug!("dropping change batch from torn-down subscription");
            return;
        }

        for op in ops {
            match op {
                DiffOp::Insert { index, event } => state.events.insert(*index, event.clone()),
                DiffOp::Delete { index } => {
                    state.events.remove(*index);
                }
                DiffOp::Update { index, event } => state.events[*index] = event.clone(),
                DiffOp::Move { from, to } => {
                    let event = state.events.remove(*from);
                    state.events.insert(*to, event);
                }
            }
        }
    }
}
