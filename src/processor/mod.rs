pub mod recorder;
pub mod trips;

pub use recorder::{DiscardReason, GeoEventRecorder, RecordError, RecordResult, RecorderConfig};
pub use trips::TripSelector;
