use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A user-named grouping of geo events. Owned events carry this trip's id
/// and are discovered by query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripEvent {
    pub id: Uuid,
    pub trip_name: String,
    pub timestamp: DateTime<Utc>,
}
